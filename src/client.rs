//! The transfer client
//!
//! [`TransferClient`] ties the pieces together: it authorizes through the
//! [`AccountAuthorizationCache`], leases upload urls from the
//! [`UploadUrlCache`], splits big uploads into parts, runs every request under
//! a fresh retry policy, and verifies downloads through the [`ContentWriter`].

use crate::auth_cache::{AccountAuthorizationCache, AccountAuthorizer};
use crate::config::TransferConfig;
use crate::content::UploadBody;
use crate::content_writer::{ContentReceipt, ContentWriter};
use crate::destination::{Destination, FileDestination};
use crate::error::{RequestCategory, Result, TransferError};
use crate::headers::ResponseHeaders;
use crate::metrics::TransferMetrics;
use crate::models::{FileVersion, Part, PartSpec};
use crate::part_sizes::PartSizes;
use crate::progress::{PartReporter, UploadState};
use crate::retry::{DefaultRetryPolicy, RetryPolicySupplier, Retryer};
use crate::service::{DownloadRequest, StartLargeFileRequest, StorageService, UploadFileRequest};
use crate::sleeper::{Interrupter, Sleeper, ThreadSleeper};
use crate::upload_url_cache::UploadUrlCache;
use crate::uploader::{reusable_parts, LargeFileUploader};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Reliable uploads and downloads against a [`StorageService`]
pub struct TransferClient {
    config: TransferConfig,
    service: Arc<dyn StorageService>,
    auth_cache: Arc<AccountAuthorizationCache>,
    upload_url_cache: UploadUrlCache,
    retryer: Retryer,
    policy_supplier: RetryPolicySupplier,
    content_writer: ContentWriter,
    metrics: Arc<TransferMetrics>,
}

impl TransferClient {
    /// Create a client
    ///
    /// # Returns
    /// * `Err(TransferError::ConfigError)` if the configuration is invalid
    pub fn new(
        config: TransferConfig,
        service: Arc<dyn StorageService>,
        authorizer: Arc<dyn AccountAuthorizer>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(TransferMetrics::new());
        let auth_cache = Arc::new(AccountAuthorizationCache::new(authorizer));
        let upload_url_cache = UploadUrlCache::new(
            service.clone(),
            auth_cache.clone(),
            config.upload_url_cache_buckets,
            metrics.clone(),
        );
        let retryer = Retryer::new(Arc::new(ThreadSleeper::new()), metrics.clone());
        let policy_supplier = DefaultRetryPolicy::supplier(&config);
        let content_writer = ContentWriter::new(config.copy_buffer_size).with_metrics(metrics.clone());

        Ok(TransferClient {
            config,
            service,
            auth_cache,
            upload_url_cache,
            retryer,
            policy_supplier,
            content_writer,
            metrics,
        })
    }

    /// The handle that interrupts retry waits of transfers run on the calling thread
    ///
    /// Hand it to another thread to cancel a transfer blocked in backoff. Only
    /// transfers on this thread are affected, including the part uploads it
    /// spreads over worker threads.
    pub fn current_thread_interrupter(&self) -> Interrupter {
        Interrupter::current()
    }

    /// Use `sleeper` for retry backoff
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retryer = Retryer::new(sleeper, self.metrics.clone());
        self
    }

    /// Use policies from `supplier` instead of the default policy
    pub fn with_retry_policy_supplier(mut self, supplier: RetryPolicySupplier) -> Self {
        self.policy_supplier = supplier;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<TransferMetrics> {
        &self.metrics
    }

    pub fn account_authorization_cache(&self) -> &Arc<AccountAuthorizationCache> {
        &self.auth_cache
    }

    pub fn upload_url_cache(&self) -> &UploadUrlCache {
        &self.upload_url_cache
    }

    /// Part size constraints of the account, authorizing under retry if needed
    pub fn part_sizes(&self) -> Result<PartSizes> {
        let mut policy = (self.policy_supplier)();
        let auth = self.retryer.run_with_retry(
            "authorize_account",
            &self.auth_cache,
            policy.as_mut(),
            |_| self.auth_cache.get(),
        )?;
        PartSizes::from_authorization(&auth, self.config.max_parts)
    }

    /// Upload a file, as a large file when it's big enough to benefit
    pub fn upload(&self, request: &UploadFileRequest) -> Result<FileVersion> {
        let content_length = content_length_of(request)?;
        let part_sizes = self.part_sizes()?;
        if part_sizes.should_split(content_length) {
            self.upload_large_file_with(request, content_length, part_sizes)
        } else {
            self.upload_small_file(request)
        }
    }

    /// Upload a file in one request
    pub fn upload_small_file(&self, request: &UploadFileRequest) -> Result<FileVersion> {
        let content_length = content_length_of(request)?;
        let reporter = PartReporter::new(
            request.listener.as_ref(),
            PartSpec::new(1, 0, content_length),
            1,
        );

        let mut policy = (self.policy_supplier)();
        let file = self.retryer.run_with_retry(
            "upload_file",
            &self.auth_cache,
            policy.as_mut(),
            |attempt| match self.upload_small_file_once(request, attempt.is_retry(), &reporter) {
                Ok(file) => {
                    reporter.succeeded();
                    Ok(file)
                }
                Err(e) => {
                    reporter.failed();
                    Err(e)
                }
            },
        )?;
        info!("Uploaded {} ({})", file.file_name, file.file_id);
        Ok(file)
    }

    fn upload_small_file_once(
        &self,
        request: &UploadFileRequest,
        is_retry: bool,
        reporter: &PartReporter<'_>,
    ) -> Result<FileVersion> {
        let url = self.upload_url_cache.get(&request.bucket_id, is_retry)?;
        reporter.report(0, UploadState::Starting);
        let body =
            UploadBody::from_source_with_progress(request.source.as_ref(), reporter.byte_listener())?;
        let file = self
            .service
            .upload_file(&url, request, body)
            .map_err(|e| e.with_request_category(RequestCategory::Uploading))?;
        self.upload_url_cache.release(url);
        Ok(file)
    }

    /// Upload a file as a large file, whatever its size
    ///
    /// # Returns
    /// * `Err(TransferError::Precondition)` if the content is too small for two parts
    pub fn upload_large_file(&self, request: &UploadFileRequest) -> Result<FileVersion> {
        let content_length = content_length_of(request)?;
        let part_sizes = self.part_sizes()?;
        self.upload_large_file_with(request, content_length, part_sizes)
    }

    fn upload_large_file_with(
        &self,
        request: &UploadFileRequest,
        content_length: u64,
        part_sizes: PartSizes,
    ) -> Result<FileVersion> {
        let specs = part_sizes.plan(content_length)?;
        let large_file_sha1 = request
            .source
            .sha1_or_none()
            .map_err(|e| TransferError::local("read_failed", format!("couldn't get content sha1: {}", e)))?;
        let start_request = StartLargeFileRequest::from_upload(request, large_file_sha1.as_deref());

        let mut policy = (self.policy_supplier)();
        let large_file = self.retryer.run_with_retry(
            "start_large_file",
            &self.auth_cache,
            policy.as_mut(),
            |_| {
                let auth = self.auth_cache.get()?;
                self.service.start_large_file(&auth, &start_request)
            },
        )?;
        debug!(
            "Started large file {} ({}) with {} parts",
            large_file.file_name,
            large_file.file_id,
            specs.len()
        );

        self.large_file_uploader(request)
            .upload_parts_and_finish(&large_file, &specs, &Default::default())
    }

    /// Resume a large file that was started earlier
    ///
    /// Parts in `already_uploaded` that match the plan for the content are
    /// kept; the rest of the parts are uploaded and the file is finished.
    ///
    /// # Returns
    /// * `Err(TransferError::Precondition)` if `large_file` doesn't belong to
    ///   this content
    pub fn finish_uploading_large_file(
        &self,
        large_file: &FileVersion,
        request: &UploadFileRequest,
        already_uploaded: Vec<Part>,
    ) -> Result<FileVersion> {
        if large_file.file_name != request.file_name {
            return Err(TransferError::Precondition(format!(
                "large file is named {} but the upload is for {}",
                large_file.file_name, request.file_name
            )));
        }
        let source_sha1 = request
            .source
            .sha1_or_none()
            .map_err(|e| TransferError::local("read_failed", format!("couldn't get content sha1: {}", e)))?;
        if large_file.large_file_sha1 != source_sha1 {
            return Err(TransferError::Precondition(format!(
                "large file sha1 {:?} doesn't match the content's sha1 {:?}",
                large_file.large_file_sha1, source_sha1
            )));
        }

        let content_length = content_length_of(request)?;
        let specs = self.part_sizes()?.plan(content_length)?;
        let reusable = reusable_parts(&specs, already_uploaded);

        self.large_file_uploader(request)
            .upload_parts_and_finish(large_file, &specs, &reusable)
    }

    fn large_file_uploader<'a>(&'a self, request: &'a UploadFileRequest) -> LargeFileUploader<'a> {
        LargeFileUploader {
            service: &self.service,
            auth_cache: &self.auth_cache,
            retryer: &self.retryer,
            policy_supplier: &self.policy_supplier,
            metrics: &self.metrics,
            request,
            max_concurrent_parts: self.config.max_concurrent_parts,
        }
    }

    /// Download a file into `destination`, verifying its sha1 when possible
    pub fn download<D: Destination>(
        &self,
        request: &DownloadRequest,
        destination: &mut D,
    ) -> Result<ContentReceipt> {
        let mut policy = (self.policy_supplier)();
        self.retryer.run_with_retry(
            "download",
            &self.auth_cache,
            policy.as_mut(),
            |_| {
                let auth = self.auth_cache.get()?;
                let mut receipt = None;
                self.service.download(
                    &auth,
                    request,
                    &mut |headers: &ResponseHeaders, body: &mut dyn Read| {
                        receipt = Some(self.content_writer.read_content(
                            headers,
                            body,
                            &mut *destination,
                        )?);
                        Ok(())
                    },
                )?;
                receipt.ok_or_else(|| {
                    TransferError::Internal(format!(
                        "download of {} finished without a response body",
                        request.file_id
                    ))
                })
            },
        )
    }

    /// Download a file to `path`, replacing it only once the content checks out
    pub fn download_to_file(
        &self,
        request: &DownloadRequest,
        path: impl AsRef<Path>,
    ) -> Result<ContentReceipt> {
        let mut destination = FileDestination::new(path)
            .with_verify_by_rereading(self.config.verify_downloads_by_rereading);
        self.download(request, &mut destination)
    }
}

fn content_length_of(request: &UploadFileRequest) -> Result<u64> {
    request.source.content_length().map_err(|e| {
        TransferError::local("read_failed", format!("couldn't get content length: {}", e))
    })
}
