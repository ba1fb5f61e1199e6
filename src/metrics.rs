//! Metrics collection for the transfer engine
//!
//! Thread-safe counters using atomic operations. One [`TransferMetrics`] is
//! shared by every component of a client.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for the transfer engine
#[derive(Debug, Default)]
pub struct TransferMetrics {
    // Retry statistics
    attempts: AtomicU64,
    retries: AtomicU64,
    unretryable_failures: AtomicU64,
    exhausted: AtomicU64,
    interrupted: AtomicU64,

    // Upload url cache statistics
    upload_url_cache_hits: AtomicU64,
    upload_url_cache_misses: AtomicU64,

    // Integrity statistics
    integrity_failures: AtomicU64,

    // Part statistics
    parts_uploaded: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub retries: u64,
    pub unretryable_failures: u64,
    pub exhausted: u64,
    pub interrupted: u64,
    pub upload_url_cache_hits: u64,
    pub upload_url_cache_misses: u64,
    pub integrity_failures: u64,
    pub parts_uploaded: u64,
}

impl TransferMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call of an operation under retry
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decision to try an operation again
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unretryable(&self) {
        self.unretryable_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an operation that ran out of attempts
    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload_url_cache_hit(&self) {
        self.upload_url_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload_url_cache_miss(&self) {
        self.upload_url_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_part_uploaded(&self) {
        self.parts_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a consistent-enough view of all counters
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            unretryable_failures: self.unretryable_failures.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            upload_url_cache_hits: self.upload_url_cache_hits.load(Ordering::Relaxed),
            upload_url_cache_misses: self.upload_url_cache_misses.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            parts_uploaded: self.parts_uploaded.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.unretryable_failures.store(0, Ordering::Relaxed);
        self.exhausted.store(0, Ordering::Relaxed);
        self.interrupted.store(0, Ordering::Relaxed);
        self.upload_url_cache_hits.store(0, Ordering::Relaxed);
        self.upload_url_cache_misses.store(0, Ordering::Relaxed);
        self.integrity_failures.store(0, Ordering::Relaxed);
        self.parts_uploaded.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = TransferMetrics::new();
        metrics.record_attempt();
        metrics.record_attempt();
        metrics.record_retry();
        metrics.record_upload_url_cache_hit();
        metrics.record_integrity_failure();

        let stats = metrics.get_stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.upload_url_cache_hits, 1);
        assert_eq!(stats.upload_url_cache_misses, 0);
        assert_eq!(stats.integrity_failures, 1);
    }

    #[test]
    fn test_reset() {
        let metrics = TransferMetrics::new();
        metrics.record_attempt();
        metrics.record_part_uploaded();
        metrics.reset();
        assert_eq!(metrics.get_stats(), MetricsSnapshot::default());
    }
}
