//! Account authorization cache
//!
//! Authorizing an account is slow and rate limited, so the session is kept
//! until something says it went stale. Concurrent callers that find the cache
//! empty share a single authorization call. The lock protecting the cached
//! value is never held while that call is in flight; a separate refresh gate
//! serializes callers instead, so [`AccountAuthorizationCache::clear`] never
//! blocks behind the network.

use crate::error::{RequestCategory, Result, TransferError};
use crate::models::AccountAuthorization;
use crate::part_sizes::PartSizes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Performs the account authorization call
pub trait AccountAuthorizer: Send + Sync {
    fn authorize(&self) -> Result<AccountAuthorization>;
}

#[derive(Default)]
struct AuthState {
    authorization: Option<Arc<AccountAuthorization>>,
    /// The account of the first successful authorization
    account_id: Option<String>,
}

pub struct AccountAuthorizationCache {
    authorizer: Arc<dyn AccountAuthorizer>,
    state: Mutex<AuthState>,
    refresh: Mutex<()>,
}

impl AccountAuthorizationCache {
    pub fn new(authorizer: Arc<dyn AccountAuthorizer>) -> Self {
        AccountAuthorizationCache {
            authorizer,
            state: Mutex::new(AuthState::default()),
            refresh: Mutex::new(()),
        }
    }

    fn cached(&self) -> Option<Arc<AccountAuthorization>> {
        self.state.lock().authorization.clone()
    }

    /// The current authorization, authorizing the account if needed
    ///
    /// Authorization failures are always tagged as account-authorization
    /// failures, so the retry coordinator never retries them.
    pub fn get(&self) -> Result<Arc<AccountAuthorization>> {
        if let Some(auth) = self.cached() {
            return Ok(auth);
        }

        let _refresh = self.refresh.lock();
        // another caller may have finished authorizing while we waited
        if let Some(auth) = self.cached() {
            return Ok(auth);
        }

        debug!("Authorizing account");
        let auth = self
            .authorizer
            .authorize()
            .map_err(|e| e.with_request_category(RequestCategory::AccountAuthorization))?;
        let auth = Arc::new(auth);

        let mut state = self.state.lock();
        match state.account_id.clone() {
            None => state.account_id = Some(auth.account_id.clone()),
            Some(previous) if previous != auth.account_id => {
                return Err(TransferError::unauthorized(
                    RequestCategory::AccountAuthorization,
                    "account_changed",
                    format!(
                        "authorized as account {} but previously authorized as {}",
                        auth.account_id, previous
                    ),
                ));
            }
            Some(_) => {}
        }
        state.authorization = Some(auth.clone());
        info!("Authorized account {}", auth.account_id);
        Ok(auth)
    }

    /// Forget the cached authorization; the next `get` authorizes again
    pub fn clear(&self) {
        if self.state.lock().authorization.take().is_some() {
            debug!("Cleared cached account authorization");
        }
    }

    pub fn is_cached(&self) -> bool {
        self.state.lock().authorization.is_some()
    }

    pub fn account_id(&self) -> Result<String> {
        if let Some(id) = self.state.lock().account_id.clone() {
            return Ok(id);
        }
        Ok(self.get()?.account_id.clone())
    }

    /// Part size constraints from the current authorization
    pub fn part_sizes(&self, max_parts: u32) -> Result<PartSizes> {
        let auth = self.get()?;
        PartSizes::from_authorization(&auth, max_parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct CountingAuthorizer {
        calls: AtomicUsize,
        account_ids: Vec<&'static str>,
        delay: Duration,
    }

    impl CountingAuthorizer {
        fn new(account_ids: Vec<&'static str>) -> Self {
            CountingAuthorizer {
                calls: AtomicUsize::new(0),
                account_ids,
                delay: Duration::ZERO,
            }
        }
    }

    impl AccountAuthorizer for CountingAuthorizer {
        fn authorize(&self) -> Result<AccountAuthorization> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            let account_id = self.account_ids[call.min(self.account_ids.len() - 1)];
            Ok(AccountAuthorization {
                account_id: account_id.to_string(),
                authorization_token: format!("token-{}", call),
                api_url: "https://api.example.com".to_string(),
                download_url: "https://f.example.com".to_string(),
                recommended_part_size: 1000,
                absolute_minimum_part_size: 100,
            })
        }
    }

    struct FailingAuthorizer;

    impl AccountAuthorizer for FailingAuthorizer {
        fn authorize(&self) -> Result<AccountAuthorization> {
            Err(TransferError::from_http_status(401, "bad_auth_token", "nope", None))
        }
    }

    #[test]
    fn test_caches_until_cleared() {
        let authorizer = Arc::new(CountingAuthorizer::new(vec!["acct"]));
        let cache = AccountAuthorizationCache::new(authorizer.clone());

        let first = cache.get().unwrap();
        let second = cache.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(authorizer.calls.load(Ordering::SeqCst), 1);

        cache.clear();
        assert!(!cache.is_cached());
        let third = cache.get().unwrap();
        assert_eq!(third.authorization_token, "token-1");
        assert_eq!(authorizer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_callers_share_one_authorization() {
        let mut authorizer = CountingAuthorizer::new(vec!["acct"]);
        authorizer.delay = Duration::from_millis(50);
        let authorizer = Arc::new(authorizer);
        let cache = AccountAuthorizationCache::new(authorizer.clone());

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| cache.get().unwrap());
            }
        });
        assert_eq!(authorizer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_account_change_is_rejected() {
        let authorizer = Arc::new(CountingAuthorizer::new(vec!["acct-1", "acct-2"]));
        let cache = AccountAuthorizationCache::new(authorizer);
        assert_eq!(cache.account_id().unwrap(), "acct-1");

        cache.clear();
        let err = cache.get().unwrap_err();
        assert!(!err.should_retry());
        assert_eq!(cache.account_id().unwrap(), "acct-1");
    }

    #[test]
    fn test_authorization_failure_is_not_retryable() {
        let cache = AccountAuthorizationCache::new(Arc::new(FailingAuthorizer));
        let err = cache.get().unwrap_err();
        assert!(matches!(
            err,
            TransferError::Unauthorized {
                category: RequestCategory::AccountAuthorization,
                ..
            }
        ));
        assert!(!err.should_retry());
    }

    #[test]
    fn test_part_sizes() {
        let cache = AccountAuthorizationCache::new(Arc::new(CountingAuthorizer::new(vec!["acct"])));
        let sizes = cache.part_sizes(10_000).unwrap();
        assert_eq!(sizes.minimum_part_size(), 100);
        assert_eq!(sizes.recommended_part_size(), 1000);
    }
}
