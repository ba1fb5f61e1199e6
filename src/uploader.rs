//! Large file uploads
//!
//! Parts are uploaded by a small pool of scoped worker threads, each part under
//! its own retry policy. Once any part fails for good no new parts are
//! started; the error of the lowest-numbered failed part is reported.

use crate::auth_cache::AccountAuthorizationCache;
use crate::content::{PartOfContentSource, UploadBody};
use crate::error::{RequestCategory, Result, TransferError};
use crate::metrics::TransferMetrics;
use crate::models::{FileVersion, Part, PartSpec};
use crate::progress::{PartReporter, UploadState};
use crate::retry::{Retryer, RetryPolicySupplier};
use crate::service::{StorageService, UploadFileRequest};
use crate::sleeper::Interrupter;
use crate::upload_url_cache::UploadPartUrlCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Uploads the parts of one large file and finishes it
pub(crate) struct LargeFileUploader<'a> {
    pub(crate) service: &'a Arc<dyn StorageService>,
    pub(crate) auth_cache: &'a Arc<AccountAuthorizationCache>,
    pub(crate) retryer: &'a Retryer,
    pub(crate) policy_supplier: &'a RetryPolicySupplier,
    pub(crate) metrics: &'a Arc<TransferMetrics>,
    pub(crate) request: &'a UploadFileRequest,
    pub(crate) max_concurrent_parts: usize,
}

impl LargeFileUploader<'_> {
    /// Upload every part in `specs` not in `already_uploaded`, then finish the file
    pub(crate) fn upload_parts_and_finish(
        &self,
        large_file: &FileVersion,
        specs: &[PartSpec],
        already_uploaded: &HashMap<u32, Part>,
    ) -> Result<FileVersion> {
        info!(
            "Uploading {} parts of {} ({} already uploaded)",
            specs.len(),
            large_file.file_name,
            already_uploaded.len()
        );

        let part_sha1s = self.upload_parts(large_file, specs, already_uploaded)?;

        let mut policy = (self.policy_supplier)();
        let finished = self.retryer.run_with_retry(
            "finish_large_file",
            self.auth_cache,
            policy.as_mut(),
            |_| {
                let auth = self.auth_cache.get()?;
                self.service
                    .finish_large_file(&auth, &large_file.file_id, &part_sha1s)
            },
        )?;

        info!("Finished large file {}", finished.file_name);
        Ok(finished)
    }

    fn upload_parts(
        &self,
        large_file: &FileVersion,
        specs: &[PartSpec],
        already_uploaded: &HashMap<u32, Part>,
    ) -> Result<Vec<String>> {
        let part_url_cache = UploadPartUrlCache::new(
            self.service.clone(),
            self.auth_cache.clone(),
            large_file.file_id.clone(),
            self.metrics.clone(),
        );

        let part_count = u32::try_from(specs.len()).unwrap_or(u32::MAX);
        for spec in specs {
            let reporter = self.reporter(*spec, part_count);
            reporter.report(0, UploadState::WaitingToStart);
            if already_uploaded.contains_key(&spec.part_number) {
                reporter.succeeded();
            }
        }

        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let results: Mutex<Vec<Option<Result<Part>>>> = Mutex::new(vec![None; specs.len()]);
        let workers = self.max_concurrent_parts.clamp(1, specs.len().max(1));
        // workers answer to the interrupt flag of the thread that started the upload
        let interrupter = Interrupter::current();

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| interrupter.scoped(|| loop {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::AcqRel);
                    let Some(spec) = specs.get(i) else {
                        break;
                    };

                    let result = match already_uploaded.get(&spec.part_number) {
                        Some(part) => {
                            debug!("Part {} was already uploaded", spec.part_number);
                            Ok(part.clone())
                        }
                        None => self.upload_part(&part_url_cache, *spec, part_count),
                    };
                    if let Err(e) = &result {
                        warn!("Part {} failed: {}", spec.part_number, e);
                        stop.store(true, Ordering::Release);
                    }
                    results.lock()[i] = Some(result);
                }));
            }
        });

        // parts are handed out in order, so unstarted parts only follow a failure
        let mut part_sha1s = Vec::with_capacity(specs.len());
        for (spec, result) in specs.iter().zip(results.into_inner()) {
            match result {
                Some(Ok(part)) => part_sha1s.push(part.content_sha1),
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(TransferError::Internal(format!(
                        "part {} was never uploaded",
                        spec.part_number
                    )))
                }
            }
        }
        Ok(part_sha1s)
    }

    fn reporter(&self, spec: PartSpec, part_count: u32) -> PartReporter<'_> {
        PartReporter::new(self.request.listener.as_ref(), spec, part_count)
    }

    fn upload_part(
        &self,
        part_url_cache: &UploadPartUrlCache,
        spec: PartSpec,
        part_count: u32,
    ) -> Result<Part> {
        let operation = format!("upload_part_{}", spec.part_number);
        let reporter = self.reporter(spec, part_count);
        let mut policy = (self.policy_supplier)();
        let part = self.retryer.run_with_retry(
            &operation,
            self.auth_cache,
            policy.as_mut(),
            |attempt| match self.upload_part_once(part_url_cache, spec, attempt.is_retry(), &reporter) {
                Ok(part) => {
                    reporter.succeeded();
                    Ok(part)
                }
                Err(e) => {
                    reporter.failed();
                    Err(e)
                }
            },
        )?;

        self.metrics.record_part_uploaded();
        debug!(
            "Uploaded part {} ({} bytes at {})",
            spec.part_number, spec.length, spec.start
        );
        Ok(part)
    }

    fn upload_part_once(
        &self,
        part_url_cache: &UploadPartUrlCache,
        spec: PartSpec,
        is_retry: bool,
        reporter: &PartReporter<'_>,
    ) -> Result<Part> {
        let url = part_url_cache.get(is_retry)?;
        reporter.report(0, UploadState::Starting);
        let source = PartOfContentSource::new(self.request.source.as_ref(), spec.start, spec.length);
        let body = UploadBody::from_source_with_progress(&source, reporter.byte_listener())?;
        let part = self
            .service
            .upload_part(&url, spec.part_number, body)
            .map_err(|e| e.with_request_category(RequestCategory::Uploading))?;
        part_url_cache.release(url);
        Ok(part)
    }
}

/// Match parts the service already has against a fresh plan
///
/// A part is kept only if its number and length agree with the plan; anything
/// else is uploaded again.
pub(crate) fn reusable_parts(specs: &[PartSpec], already_uploaded: Vec<Part>) -> HashMap<u32, Part> {
    let planned: HashMap<u32, &PartSpec> = specs.iter().map(|s| (s.part_number, s)).collect();
    already_uploaded
        .into_iter()
        .filter(|part| {
            let matches = planned
                .get(&part.part_number)
                .is_some_and(|spec| spec.length == part.content_length);
            if !matches {
                debug!(
                    "Part {} ({} bytes) doesn't match the plan; uploading it again",
                    part.part_number, part.content_length
                );
            }
            matches
        })
        .map(|part| (part.part_number, part))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(number: u32, length: u64) -> Part {
        Part {
            file_id: "f".to_string(),
            part_number: number,
            content_length: length,
            content_sha1: format!("sha1-{}", number),
        }
    }

    #[test]
    fn test_reusable_parts_require_matching_length() {
        let specs = vec![
            PartSpec::new(1, 0, 100),
            PartSpec::new(2, 100, 100),
            PartSpec::new(3, 200, 150),
        ];
        let reusable = reusable_parts(&specs, vec![part(1, 100), part(2, 99), part(4, 10)]);
        assert_eq!(reusable.len(), 1);
        assert!(reusable.contains_key(&1));
    }
}
