//! Shared access-token cache with single-flight refresh.
//!
//! One [`TokenCache`] holds the process's only access token. Readers that find
//! a fresh token return it without suspending. When the token is missing or
//! inside the expiry skew window, the first caller starts a refresh and stores
//! it as a [`Shared`] future; every caller that arrives while it is pending
//! awaits that same future, so the identity provider sees exactly one request.
//!
//! The refresh future records its outcome and clears the in-flight handle in
//! one critical section. A failed refresh leaves the previous token untouched
//! and the error reaches every waiter; the next call starts a new attempt.

use crate::clock::Clock;
use crate::error::RefreshError;
use crate::token::{AccessToken, TokenSource};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tokens within this many seconds of expiry are treated as expired.
pub const TOKEN_EXPIRY_SKEW_SECS: i64 = 120;

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken, RefreshError>>>;

#[derive(Debug, Clone)]
struct CachedToken {
    value: AccessToken,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at.saturating_sub(TOKEN_EXPIRY_SKEW_SECS)
    }
}

#[derive(Default)]
struct CacheState {
    token: Option<CachedToken>,
    in_flight: Option<RefreshFuture>,
}

struct Inner {
    source: Arc<dyn TokenSource>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

#[derive(Clone)]
pub struct TokenCache {
    inner: Arc<Inner>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                clock,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Returns a token that is valid for at least the skew window, refreshing
    /// it first if needed.
    pub async fn get(&self) -> Result<AccessToken, RefreshError> {
        let refresh = {
            let mut state = self.inner.state.lock();
            let now = self.inner.clock.now().timestamp();

            if let Some(cached) = state.token.as_ref().filter(|t| t.is_fresh(now)) {
                return Ok(cached.value.clone());
            }

            match state.in_flight.clone() {
                Some(pending) => {
                    debug!("awaiting in-flight token refresh");
                    pending
                }
                None => {
                    let pending = start_refresh(Arc::clone(&self.inner), now);
                    state.in_flight = Some(pending.clone());
                    pending
                }
            }
        };

        refresh.await
    }

    #[cfg(test)]
    fn expires_at(&self) -> Option<i64> {
        self.inner.state.lock().token.as_ref().map(|t| t.expires_at)
    }

    #[cfg(test)]
    fn is_refreshing(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }
}

fn start_refresh(inner: Arc<Inner>, started_at: i64) -> RefreshFuture {
    debug!("refreshing access token");

    async move {
        let outcome = inner.source.fetch().await;

        let mut state = inner.state.lock();
        state.in_flight = None;

        match outcome {
            Ok(issued) => {
                state.token = Some(CachedToken {
                    value: issued.access_token.clone(),
                    expires_at: started_at.saturating_add(issued.expires_in),
                });
                Ok(issued.access_token)
            }
            Err(e) => {
                warn!(error = %e, "access token refresh failed");
                Err(e)
            }
        }
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::token::IssuedToken;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: i64 = 1_700_000_000;

    struct ScriptedSource {
        calls: AtomicUsize,
        outcomes: Mutex<VecDeque<Result<IssuedToken, RefreshError>>>,
        delay: std::time::Duration,
    }

    impl ScriptedSource {
        fn new(outcomes: Vec<Result<IssuedToken, RefreshError>>) -> Arc<Self> {
            Self::with_delay(outcomes, std::time::Duration::ZERO)
        }

        fn with_delay(
            outcomes: Vec<Result<IssuedToken, RefreshError>>,
            delay: std::time::Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcomes: Mutex::new(outcomes.into()),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenSource for ScriptedSource {
        async fn fetch(&self) -> Result<IssuedToken, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(RefreshError::Http("script exhausted".to_string())))
        }
    }

    fn issued(value: &str, expires_in: i64) -> Result<IssuedToken, RefreshError> {
        Ok(IssuedToken {
            access_token: AccessToken::new(value),
            expires_in,
        })
    }

    fn cache_with(source: Arc<ScriptedSource>) -> (TokenCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch_secs(T0));
        let cache = TokenCache::new(source, clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn test_cached_token_skips_source() {
        let source = ScriptedSource::new(vec![issued("first", 3600)]);
        let (cache, clock) = cache_with(source.clone());

        assert_eq!(cache.get().await.unwrap().as_str(), "first");
        clock.advance(Duration::seconds(1000));
        assert_eq!(cache.get().await.unwrap().as_str(), "first");

        assert_eq!(source.calls(), 1);
        assert_eq!(cache.expires_at(), Some(T0 + 3600));
    }

    #[tokio::test]
    async fn test_skew_boundary() {
        let source = ScriptedSource::new(vec![issued("first", 3600), issued("second", 3600)]);
        let (cache, clock) = cache_with(source.clone());

        cache.get().await.unwrap();

        clock.set(chrono::DateTime::from_timestamp(T0 + 3600 - 121, 0).unwrap());
        assert_eq!(cache.get().await.unwrap().as_str(), "first");
        assert_eq!(source.calls(), 1);

        clock.set(chrono::DateTime::from_timestamp(T0 + 3600 - 120, 0).unwrap());
        assert_eq!(cache.get().await.unwrap().as_str(), "second");
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.expires_at(), Some(T0 + 3600 - 120 + 3600));
    }

    #[tokio::test]
    async fn test_huge_lifetime_saturates_expiry() {
        let source = ScriptedSource::new(vec![issued("forever", i64::MAX)]);
        let (cache, clock) = cache_with(source.clone());

        assert_eq!(cache.get().await.unwrap().as_str(), "forever");
        assert_eq!(cache.expires_at(), Some(i64::MAX));

        clock.advance(Duration::days(365));
        assert_eq!(cache.get().await.unwrap().as_str(), "forever");
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let source = ScriptedSource::with_delay(
            vec![issued("shared", 3600)],
            std::time::Duration::from_millis(20),
        );
        let (cache, _clock) = cache_with(source.clone());

        let results = futures::future::join_all((0..16).map(|_| cache.get())).await;

        assert_eq!(source.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap().as_str(), "shared");
        }
        assert!(!cache.is_refreshing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tasks_share_one_refresh() {
        let source = ScriptedSource::with_delay(
            vec![issued("shared", 3600)],
            std::time::Duration::from_millis(50),
        );
        let (cache, _clock) = cache_with(source.clone());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().as_str(), "shared");
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let source = ScriptedSource::with_delay(
            vec![Err(RefreshError::Status {
                status: 401,
                body: "unauthorized".to_string(),
            })],
            std::time::Duration::from_millis(20),
        );
        let (cache, _clock) = cache_with(source.clone());

        let results = futures::future::join_all((0..4).map(|_| cache.get())).await;

        assert_eq!(source.calls(), 1);
        for result in results {
            assert!(matches!(result, Err(RefreshError::Status { status: 401, .. })));
        }
        assert_eq!(cache.expires_at(), None);
    }

    #[tokio::test]
    async fn test_failure_clears_in_flight_marker() {
        let source = ScriptedSource::new(vec![
            Err(RefreshError::Http("connection reset".to_string())),
            issued("recovered", 3600),
        ]);
        let (cache, _clock) = cache_with(source.clone());

        assert!(cache.get().await.is_err());
        assert!(!cache.is_refreshing());

        assert_eq!(cache.get().await.unwrap().as_str(), "recovered");
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_token_not_returned_when_refresh_fails() {
        let source = ScriptedSource::new(vec![
            issued("stale", 3600),
            Err(RefreshError::Malformed("missing access_token".to_string())),
        ]);
        let (cache, clock) = cache_with(source.clone());

        cache.get().await.unwrap();
        clock.advance(Duration::seconds(3600));

        let err = cache.get().await.unwrap_err();
        assert_eq!(
            err,
            RefreshError::Malformed("missing access_token".to_string())
        );
        // Previous token is kept but never handed out once stale.
        assert_eq!(cache.expires_at(), Some(T0 + 3600));
    }

    #[tokio::test]
    async fn test_abandoned_refresh_completes_for_next_caller() {
        let source = ScriptedSource::with_delay(
            vec![issued("late", 3600)],
            std::time::Duration::from_millis(20),
        );
        let (cache, _clock) = cache_with(source.clone());

        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(1), cache.get()).await;
        assert!(abandoned.is_err());
        assert!(cache.is_refreshing());

        assert_eq!(cache.get().await.unwrap().as_str(), "late");
        assert_eq!(source.calls(), 1);
    }
}
