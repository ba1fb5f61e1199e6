//! Retry coordination
//!
//! [`Retryer::run_with_retry`] calls an operation until it succeeds, fails in a
//! way that retrying can't fix, or the [`RetryPolicy`] gives up. Failures are
//! handled in this order:
//!
//! 1. unauthorized while authorizing the account: give up
//! 2. unauthorized while uploading: retry immediately; the upload url was bad,
//!    not the account session
//! 3. any other unauthorized: drop the cached session and retry immediately
//! 4. throttling, service trouble, timeouts and network failures: retry after
//!    the delay the policy picks
//! 5. everything else: give up
//!
//! When the policy stops retrying, the last error is returned unchanged.

use crate::auth_cache::AccountAuthorizationCache;
use crate::config::TransferConfig;
use crate::error::{RequestCategory, Result, TransferError};
use crate::metrics::TransferMetrics;
use crate::sleeper::Sleeper;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Where one call of an operation falls among its attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Starts at 1
    pub number: u32,
}

impl Attempt {
    pub fn is_retry(&self) -> bool {
        self.number > 1
    }
}

/// Decides whether and when an operation is tried again
///
/// One policy instance serves one operation; it may keep state between
/// attempts, such as the current backoff.
pub trait RetryPolicy: Send {
    fn succeeded(&mut self, _operation: &str, _attempts_so_far: u32, _took: Duration) {}

    /// How long to wait before trying again, or `None` to give up
    fn retryable_after_delay(
        &mut self,
        operation: &str,
        attempts_so_far: u32,
        took: Duration,
        error: &TransferError,
    ) -> Option<Duration>;

    /// Whether to try again right away
    fn retryable_immediately(
        &mut self,
        operation: &str,
        attempts_so_far: u32,
        took: Duration,
        error: &TransferError,
    ) -> bool;

    fn unretryable(
        &mut self,
        _operation: &str,
        _attempts_so_far: u32,
        _took: Duration,
        _error: &TransferError,
    ) {
    }
}

/// Creates a fresh policy for each operation
pub type RetryPolicySupplier = Arc<dyn Fn() -> Box<dyn RetryPolicy> + Send + Sync>;

/// Bounded attempts with exponential backoff
///
/// The backoff starts at `initial_backoff` and doubles after every delayed
/// retry. When the service says how long to wait, that wait is used instead
/// and the backoff starts over.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    next_backoff: Duration,
}

impl DefaultRetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        DefaultRetryPolicy {
            max_attempts,
            initial_backoff,
            next_backoff: initial_backoff,
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_secs(config.initial_backoff_secs),
        )
    }

    /// A supplier handing out new default policies built from `config`
    pub fn supplier(config: &TransferConfig) -> RetryPolicySupplier {
        let template = Self::from_config(config);
        Arc::new(move || Box::new(template.clone()) as Box<dyn RetryPolicy>)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::from_config(&TransferConfig::default())
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn retryable_after_delay(
        &mut self,
        _operation: &str,
        attempts_so_far: u32,
        _took: Duration,
        error: &TransferError,
    ) -> Option<Duration> {
        if attempts_so_far >= self.max_attempts {
            return None;
        }

        match error.retry_after_secs() {
            Some(secs) => {
                self.next_backoff = self.initial_backoff;
                Some(Duration::from_secs(secs))
            }
            None => {
                let delay = self.next_backoff;
                self.next_backoff = self.next_backoff.saturating_mul(2);
                Some(delay)
            }
        }
    }

    fn retryable_immediately(
        &mut self,
        _operation: &str,
        attempts_so_far: u32,
        _took: Duration,
        _error: &TransferError,
    ) -> bool {
        attempts_so_far < self.max_attempts
    }
}

/// How a failed attempt is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Unretryable,
    RetryImmediately { clear_authorization: bool },
    RetryAfterDelay,
}

fn classify(error: &TransferError) -> Disposition {
    match error {
        TransferError::Unauthorized { category, .. } => match category {
            RequestCategory::AccountAuthorization => Disposition::Unretryable,
            RequestCategory::Uploading => Disposition::RetryImmediately {
                clear_authorization: false,
            },
            RequestCategory::Other => Disposition::RetryImmediately {
                clear_authorization: true,
            },
        },
        e if e.should_retry() => Disposition::RetryAfterDelay,
        _ => Disposition::Unretryable,
    }
}

/// Runs operations under a retry policy
#[derive(Clone)]
pub struct Retryer {
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<TransferMetrics>,
}

impl Retryer {
    pub fn new(sleeper: Arc<dyn Sleeper>, metrics: Arc<TransferMetrics>) -> Self {
        Retryer { sleeper, metrics }
    }

    /// Call `attempt_fn` until it succeeds or `policy` gives up
    ///
    /// # Returns
    /// * the first successful result
    /// * the last error, when it can't be retried or attempts ran out
    /// * `Err(TransferError::Interrupted)` if a backoff sleep was interrupted
    pub fn run_with_retry<T, F>(
        &self,
        operation: &str,
        auth_cache: &AccountAuthorizationCache,
        policy: &mut dyn RetryPolicy,
        mut attempt_fn: F,
    ) -> Result<T>
    where
        F: FnMut(Attempt) -> Result<T>,
    {
        let mut attempts_so_far = 0u32;
        loop {
            attempts_so_far += 1;
            let attempt = Attempt {
                number: attempts_so_far,
            };
            self.metrics.record_attempt();

            let started = Instant::now();
            let result = attempt_fn(attempt);
            let took = started.elapsed();

            let error = match result {
                Ok(value) => {
                    if attempt.is_retry() {
                        debug!("{} succeeded on attempt {}", operation, attempts_so_far);
                    }
                    policy.succeeded(operation, attempts_so_far, took);
                    return Ok(value);
                }
                Err(error) => error,
            };

            match classify(&error) {
                Disposition::Unretryable => {
                    debug!("{} failed with unretryable error: {}", operation, error);
                    policy.unretryable(operation, attempts_so_far, took, &error);
                    self.metrics.record_unretryable();
                    return Err(error);
                }
                Disposition::RetryImmediately {
                    clear_authorization,
                } => {
                    if clear_authorization {
                        auth_cache.clear();
                    }
                    if !policy.retryable_immediately(operation, attempts_so_far, took, &error) {
                        return Err(self.give_up(operation, attempts_so_far, error));
                    }
                    warn!(
                        "{} attempt {} unauthorized, retrying immediately: {}",
                        operation, attempts_so_far, error
                    );
                    self.metrics.record_retry();
                }
                Disposition::RetryAfterDelay => {
                    let delay =
                        match policy.retryable_after_delay(operation, attempts_so_far, took, &error) {
                            Some(delay) => delay,
                            None => return Err(self.give_up(operation, attempts_so_far, error)),
                        };
                    warn!(
                        "{} attempt {} failed, retrying in {:?}: {}",
                        operation, attempts_so_far, delay, error
                    );
                    self.metrics.record_retry();

                    if let Err(interrupted) = self.sleeper.sleep(delay) {
                        self.metrics.record_interrupted();
                        return Err(TransferError::Interrupted(format!(
                            "{} stopped after attempt {} ({}): {}",
                            operation, attempts_so_far, interrupted, error
                        )));
                    }
                }
            }
        }
    }

    fn give_up(&self, operation: &str, attempts_so_far: u32, error: TransferError) -> TransferError {
        warn!(
            "{} giving up after {} attempts: {}",
            operation, attempts_so_far, error
        );
        self.metrics.record_exhausted();
        error
    }
}
