//! Pools of reusable upload urls
//!
//! An upload url can serve one upload at a time, and getting a new one costs a
//! round trip. Urls that finished an upload cleanly are put back in a pool and
//! handed to the next upload. Retries always get a fresh url, since the failed
//! attempt may have been caused by the url itself.
//!
//! [`UploadUrlCache`] keeps one pool per bucket, for at most a bounded number of
//! buckets. [`UploadPartUrlCache`] keeps one pool for the parts of a single
//! large file.

use crate::auth_cache::AccountAuthorizationCache;
use crate::error::{RequestCategory, Result};
use crate::lru::BoundedLruMap;
use crate::metrics::TransferMetrics;
use crate::models::{UploadPartUrl, UploadUrl};
use crate::service::StorageService;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Upload urls for whole files, pooled per bucket
pub struct UploadUrlCache {
    service: Arc<dyn StorageService>,
    auth_cache: Arc<AccountAuthorizationCache>,
    per_bucket: Mutex<BoundedLruMap<String, VecDeque<UploadUrl>>>,
    metrics: Arc<TransferMetrics>,
}

impl UploadUrlCache {
    pub fn new(
        service: Arc<dyn StorageService>,
        auth_cache: Arc<AccountAuthorizationCache>,
        max_buckets: usize,
        metrics: Arc<TransferMetrics>,
    ) -> Self {
        UploadUrlCache {
            service,
            auth_cache,
            per_bucket: Mutex::new(BoundedLruMap::new(max_buckets)),
            metrics,
        }
    }

    /// Get an upload url for `bucket_id`, from the pool unless this is a retry
    ///
    /// The url is leased to the caller, who should [`release`](Self::release)
    /// it after a successful upload and drop it otherwise.
    pub fn get(&self, bucket_id: &str, is_retry: bool) -> Result<UploadUrl> {
        if !is_retry {
            let pooled = self
                .per_bucket
                .lock()
                .get_mut(bucket_id)
                .and_then(|pool| pool.pop_front());
            if let Some(url) = pooled {
                self.metrics.record_upload_url_cache_hit();
                debug!("Reusing upload url for bucket {}", bucket_id);
                return Ok(url);
            }
        }

        self.metrics.record_upload_url_cache_miss();
        let auth = self.auth_cache.get()?;
        debug!("Fetching new upload url for bucket {}", bucket_id);
        self.service
            .get_upload_url(&auth, bucket_id)
            .map_err(|e| e.with_request_category(RequestCategory::Other))
    }

    /// Return a url after a successful upload so it can be reused
    pub fn release(&self, url: UploadUrl) {
        let mut per_bucket = self.per_bucket.lock();
        if let Some(pool) = per_bucket.get_mut(url.bucket_id.as_str()) {
            pool.push_back(url);
            return;
        }

        let bucket_id = url.bucket_id.clone();
        if let Some((evicted, pool)) = per_bucket.put(bucket_id, VecDeque::from([url])) {
            debug!(
                "Forgot {} pooled upload urls for bucket {}",
                pool.len(),
                evicted
            );
        }
    }

    /// How many released urls are waiting for `bucket_id`
    pub fn pooled_count(&self, bucket_id: &str) -> usize {
        self.per_bucket.lock().peek(bucket_id).map_or(0, VecDeque::len)
    }

    /// How many buckets have a pool
    pub fn bucket_count(&self) -> usize {
        self.per_bucket.lock().len()
    }
}

/// Upload urls for the parts of one large file
pub struct UploadPartUrlCache {
    service: Arc<dyn StorageService>,
    auth_cache: Arc<AccountAuthorizationCache>,
    file_id: String,
    pool: Mutex<VecDeque<UploadPartUrl>>,
    metrics: Arc<TransferMetrics>,
}

impl UploadPartUrlCache {
    pub fn new(
        service: Arc<dyn StorageService>,
        auth_cache: Arc<AccountAuthorizationCache>,
        file_id: impl Into<String>,
        metrics: Arc<TransferMetrics>,
    ) -> Self {
        UploadPartUrlCache {
            service,
            auth_cache,
            file_id: file_id.into(),
            pool: Mutex::new(VecDeque::new()),
            metrics,
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn get(&self, is_retry: bool) -> Result<UploadPartUrl> {
        if !is_retry {
            let pooled = self.pool.lock().pop_front();
            if let Some(url) = pooled {
                self.metrics.record_upload_url_cache_hit();
                return Ok(url);
            }
        }

        self.metrics.record_upload_url_cache_miss();
        let auth = self.auth_cache.get()?;
        debug!("Fetching new upload part url for {}", self.file_id);
        self.service
            .get_upload_part_url(&auth, &self.file_id)
            .map_err(|e| e.with_request_category(RequestCategory::Other))
    }

    pub fn release(&self, url: UploadPartUrl) {
        self.pool.lock().push_back(url);
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.lock().len()
    }
}
