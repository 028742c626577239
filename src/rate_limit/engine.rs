use super::identity::{resolve_subject, resolve_tier, RequestMeta};
use super::policy::{EndpointCategory, RateLimitPolicy};
use super::store::{RateLimitStore, StoreError};
use super::types::{Decision, RateLimitResult, Subject, Tier};
use crate::metrics;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Tiered, per-endpoint limiter over a shared counter store
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: Arc<RateLimitPolicy>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Decide whether a request may proceed.
    ///
    /// Store failures, and any panic raised while evaluating, fail open: the
    /// error is logged and the request continues without limiting.
    pub async fn check(&self, meta: &RequestMeta) -> Decision {
        let subject = resolve_subject(meta);
        let tier = resolve_tier(meta.principal.as_ref());
        let category = self.policy.endpoints.resolve(&meta.path);

        let outcome = AssertUnwindSafe(self.evaluate(&subject, tier, category))
            .catch_unwind()
            .await;

        let decision = match outcome {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                error!(
                    error = %e,
                    tier = %tier,
                    category = category.name,
                    "Rate limit store failed, allowing request"
                );
                Decision::FailOpen
            }
            Err(_) => {
                error!(
                    tier = %tier,
                    category = category.name,
                    "Rate limit evaluation panicked, allowing request"
                );
                Decision::FailOpen
            }
        };

        metrics::record_rate_limit_decision(tier, category.name, &decision);
        decision
    }

    /// Run the counter/block algorithm for one subject and endpoint category
    pub async fn evaluate(
        &self,
        subject: &Subject,
        tier: Tier,
        category: EndpointCategory<'_>,
    ) -> Result<Decision, StoreError> {
        let quota = self.policy.tiers.quota(tier);
        let limit = quota.adjusted_points(category.sensitivity);

        let counter_key = format!("{}:{}:{}", self.policy.key_prefix, subject, category.name);
        let block_key = format!("{}:blocked", counter_key);

        if self.store.exists(&block_key).await? {
            let retry_after = match self.store.ttl(&block_key).await? {
                Some(ttl) => ttl,
                None => quota.block_secs.max(quota.window_secs),
            };
            warn!(
                subject = %subject,
                tier = %tier,
                category = category.name,
                retry_after,
                "Request rejected, subject is blocked"
            );
            return Ok(Decision::Reject(RateLimitResult::denied(
                limit,
                0,
                retry_after,
                retry_after,
            )));
        }

        let count = self.store.increment(&counter_key, quota.window_secs).await?;
        let remaining = (i64::from(limit) - count).max(0) as u64;
        let reset_after = self
            .store
            .ttl(&counter_key)
            .await?
            .unwrap_or(quota.window_secs);

        if count > i64::from(limit) {
            if quota.block_secs > 0 {
                self.store.set(&block_key, "1", quota.block_secs).await?;
                // A fresh window starts once the block lapses
                self.store.delete(&counter_key).await?;
            }
            warn!(
                subject = %subject,
                tier = %tier,
                category = category.name,
                limit,
                block_secs = quota.block_secs,
                "Rate limit exceeded"
            );
            return Ok(Decision::Reject(RateLimitResult::denied(
                limit,
                remaining,
                reset_after,
                reset_after,
            )));
        }

        debug!(
            tier = %tier,
            category = category.name,
            limit,
            remaining,
            "Rate limit check passed"
        );

        Ok(Decision::Allow(RateLimitResult::allowed(
            limit,
            remaining,
            reset_after,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use crate::rate_limit::store::MemoryStore;
    use crate::rate_limit::types::Quota;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn limiter_with(store: Arc<dyn RateLimitStore>, overrides: &[(Tier, Quota)]) -> RateLimiter {
        let mut policy = RateLimitPolicy::default();
        let overrides: HashMap<Tier, Quota> = overrides.iter().copied().collect();
        policy.tiers = crate::rate_limit::policy::TierPolicy::with_overrides(&overrides);
        RateLimiter::new(store, policy)
    }

    fn anonymous(ip: &str, path: &str) -> RequestMeta {
        RequestMeta {
            principal: None,
            path: path.to_string(),
            forwarded_for: None,
            remote_addr: Some(ip.parse().unwrap()),
        }
    }

    fn user(principal: Principal, path: &str) -> RequestMeta {
        RequestMeta {
            principal: Some(principal),
            path: path.to_string(),
            forwarded_for: None,
            remote_addr: Some("10.0.0.1".parse().unwrap()),
        }
    }

    async fn allowed_before_reject(limiter: &RateLimiter, meta: &RequestMeta) -> usize {
        let mut allowed = 0;
        loop {
            match limiter.check(meta).await {
                Decision::Allow(_) => allowed += 1,
                Decision::Reject(_) => return allowed,
                Decision::FailOpen => panic!("unexpected fail-open"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_tier_default_category() {
        let limiter = limiter_with(Arc::new(MemoryStore::new()), &[]);
        let meta = user(Principal::new("u-1"), "/api/playlists");

        assert_eq!(allowed_before_reject(&limiter, &meta).await, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_tier_admin_category() {
        let limiter = limiter_with(Arc::new(MemoryStore::new()), &[]);
        let meta = user(Principal::new("root").with_role("ADMIN"), "/api/admin/users");

        assert_eq!(allowed_before_reject(&limiter, &meta).await, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_is_non_increasing_and_never_negative() {
        let limiter = limiter_with(
            Arc::new(MemoryStore::new()),
            &[(Tier::Anonymous, Quota::new(5, 60, 0))],
        );
        let meta = anonymous("192.168.1.1", "/api/songs");

        let mut previous = u64::MAX;
        for i in 0..8 {
            let decision = limiter.check(&meta).await;
            let result = decision.result().unwrap();
            assert_eq!(result.limit, 5);
            assert!(result.remaining <= previous, "request {}", i);
            previous = result.remaining;
            assert_eq!(decision.is_allowed(), i < 5);
        }
        assert_eq!(previous, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_rejects_without_incrementing() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(store.clone(), &[(Tier::Anonymous, Quota::new(2, 10, 30))]);
        let meta = anonymous("192.168.1.2", "/api/songs");

        assert!(limiter.check(&meta).await.is_allowed());
        assert!(limiter.check(&meta).await.is_allowed());

        // Violation: retry-after is the window's remaining time
        match limiter.check(&meta).await {
            Decision::Reject(result) => assert_eq!(result.retry_after, Some(10)),
            other => panic!("expected rejection, got {:?}", other),
        }

        let counter_key = "ratelimit:ip:192.168.1.2:songs";
        assert!(store.exists(&format!("{}:blocked", counter_key)).await.unwrap());

        // The window expires, but the block outlasts it
        tokio::time::advance(Duration::from_secs(15)).await;
        match limiter.check(&meta).await {
            Decision::Reject(result) => {
                assert_eq!(result.retry_after, Some(15));
                assert_eq!(result.remaining, 0);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        // Blocked requests never touch the counter
        assert!(!store.exists(counter_key).await.unwrap());

        tokio::time::advance(Duration::from_secs(15)).await;
        match limiter.check(&meta).await {
            Decision::Allow(result) => {
                assert_eq!(result.remaining, 1);
                assert_eq!(result.reset_after, 10);
            }
            other => panic!("expected fresh window, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_shorter_than_window_starts_fresh_window() {
        let store = Arc::new(MemoryStore::new());
        // Default BASIC tier: 120 points, 60s window, 30s block
        let limiter = limiter_with(store.clone(), &[]);
        let meta = user(Principal::new("b-1").with_subscription("PRO"), "/api/playlists");

        assert_eq!(allowed_before_reject(&limiter, &meta).await, 120);

        tokio::time::advance(Duration::from_secs(10)).await;
        match limiter.check(&meta).await {
            Decision::Reject(result) => assert_eq!(result.retry_after, Some(20)),
            other => panic!("expected rejection, got {:?}", other),
        }

        // The block lapses well before the original window would have
        tokio::time::advance(Duration::from_secs(21)).await;
        match limiter.check(&meta).await {
            Decision::Allow(result) => {
                assert_eq!(result.limit, 120);
                assert_eq!(result.remaining, 119);
                assert_eq!(result.reset_after, 60);
            }
            other => panic!("expected fresh window, got {:?}", other),
        }
        assert!(!store
            .exists("ratelimit:user:b-1:default:blocked")
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_limit_releases_at_window_end() {
        let store = Arc::new(MemoryStore::new());
        let limiter = limiter_with(store.clone(), &[(Tier::Premium, Quota::new(3, 20, 0))]);
        let meta = user(Principal::new("p-1").with_subscription("PREMIUM"), "/api/songs/1");

        assert_eq!(allowed_before_reject(&limiter, &meta).await, 3);

        tokio::time::advance(Duration::from_secs(5)).await;
        match limiter.check(&meta).await {
            Decision::Reject(result) => assert_eq!(result.retry_after, Some(15)),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(!store
            .exists("ratelimit:user:p-1:songs:blocked")
            .await
            .unwrap());

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(limiter.check(&meta).await.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_longest_prefix_sensitivity_applies() {
        let limiter = limiter_with(
            Arc::new(MemoryStore::new()),
            &[(Tier::Free, Quota::new(10, 60, 0))],
        );

        let recs = user(Principal::new("u-2"), "/api/songs/recommendations");
        let songs = user(Principal::new("u-2"), "/api/songs/42");

        assert_eq!(limiter.check(&recs).await.result().unwrap().limit, 20);
        assert_eq!(limiter.check(&songs).await.result().unwrap().limit, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_categories_are_counted_separately() {
        let limiter = limiter_with(
            Arc::new(MemoryStore::new()),
            &[(Tier::Anonymous, Quota::new(2, 60, 0))],
        );

        let songs = anonymous("192.168.1.3", "/api/songs");
        let comments = anonymous("192.168.1.3", "/api/comments");

        assert_eq!(allowed_before_reject(&limiter, &songs).await, 2);
        // floor(2 * 0.7) = 1
        assert_eq!(allowed_before_reject(&limiter, &comments).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_identity_starts_fresh() {
        let limiter = limiter_with(
            Arc::new(MemoryStore::new()),
            &[(Tier::Anonymous, Quota::new(2, 60, 0))],
        );

        let anon = anonymous("192.168.1.4", "/api/songs");
        assert_eq!(allowed_before_reject(&limiter, &anon).await, 2);

        let mut signed_in = anon.clone();
        signed_in.principal = Some(Principal::new("u-4"));
        match limiter.check(&signed_in).await {
            Decision::Allow(result) => assert_eq!(result.remaining, 59),
            other => panic!("expected allow, got {:?}", other),
        }
    }

    struct FailingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn increment(&self, _key: &str, _window_secs: u64) -> Result<i64, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn ttl(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<(), StoreError> {
            panic!("block state must never be set when the store is failing");
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            panic!("counters must never be cleared when the store is failing");
        }
    }

    #[tokio::test]
    async fn test_failing_store_fails_open() {
        let store = Arc::new(FailingStore {
            calls: AtomicUsize::new(0),
        });
        let limiter = limiter_with(store.clone(), &[(Tier::Anonymous, Quota::new(1, 60, 60))]);
        let meta = anonymous("192.168.1.5", "/api/songs");

        for _ in 0..10 {
            assert_eq!(limiter.check(&meta).await, Decision::FailOpen);
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 10);
    }

    struct PanickingStore;

    #[async_trait]
    impl RateLimitStore for PanickingStore {
        async fn increment(&self, _key: &str, _window_secs: u64) -> Result<i64, StoreError> {
            panic!("bug")
        }

        async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn ttl(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_internal_panic_fails_open() {
        let limiter = limiter_with(Arc::new(PanickingStore), &[]);
        let meta = anonymous("192.168.1.6", "/api/songs");

        assert_eq!(limiter.check(&meta).await, Decision::FailOpen);
    }
}
