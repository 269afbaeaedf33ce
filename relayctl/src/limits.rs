//! Per-user, per-feature request limiting.
//!
//! Every forwarded request first passes through [`RateLimiter::check_rate_limit`], which takes one
//! slot from the `(user, feature)` counter if the current window still has room. Counters live in
//! a [`CounterStore`]; the increment-and-check is a single atomic store operation, so two
//! concurrent requests can never both take the last slot.
//!
//! Rejections are recorded through [`RateLimiter::log_rate_limited_request`] at most once per
//! username, feature and UTC day, and listed for the "you were rate limited" history.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::config::RateLimitsConfig;
use crate::db::{
    Database,
    errors::Result as DbResult,
    handlers::{Counters, RateLimitEvents},
    models::rate_limits::{CounterOutcome, RateLimitedEvent},
};
use crate::errors::{Error, Result};
use crate::types::Feature;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct RateLimitDecision {
    pub admitted: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Convert a denial into the error surfaced to the caller.
    pub fn into_error(self, feature: Feature) -> Error {
        Error::RateLimited {
            feature,
            limit: self.limit,
            remaining: self.remaining,
            reset_at: self.reset_at,
        }
    }
}

/// Storage for counters and rejection events.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Take one slot for `(user_id, feature)` if the window has room. Must be atomic per key.
    async fn try_increment(
        &self,
        user_id: &str,
        feature: Feature,
        limit: u32,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> DbResult<CounterOutcome>;

    /// Record a rejection unless one exists for the same username, feature and UTC day.
    async fn record_rejection(&self, user_id: &str, username: &str, feature: Feature, now: DateTime<Utc>) -> DbResult<bool>;

    async fn rejections_since(&self, username: &str, since: DateTime<Utc>) -> DbResult<Vec<RateLimitedEvent>>;

    async fn purge_rejections_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;
}

#[async_trait]
impl CounterStore for Database {
    async fn try_increment(
        &self,
        user_id: &str,
        feature: Feature,
        limit: u32,
        window: TimeDelta,
        now: DateTime<Utc>,
    ) -> DbResult<CounterOutcome> {
        Counters::new(self).try_increment(user_id, feature.as_str(), limit, window, now).await
    }

    async fn record_rejection(&self, user_id: &str, username: &str, feature: Feature, now: DateTime<Utc>) -> DbResult<bool> {
        RateLimitEvents::new(self)
            .record_once(user_id, username, feature.as_str(), now)
            .await
    }

    async fn rejections_since(&self, username: &str, since: DateTime<Utc>) -> DbResult<Vec<RateLimitedEvent>> {
        RateLimitEvents::new(self).list_since(username, since).await
    }

    async fn purge_rejections_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        RateLimitEvents::new(self).purge_before(cutoff).await
    }
}

/// Admission control for forwarded requests.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitsConfig,
    window: TimeDelta,
    retention: TimeDelta,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter").field("config", &self.config).finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitsConfig) -> Self {
        let window = TimeDelta::from_std(config.window).unwrap_or(TimeDelta::MAX);
        let retention = TimeDelta::from_std(config.event_retention).unwrap_or(TimeDelta::days(1));
        Self {
            store,
            config,
            window,
            retention,
        }
    }

    pub fn limit_for(&self, feature: Feature) -> u32 {
        self.config.limit_for(feature)
    }

    /// Take one slot for `(user_id, feature)`, or report when the next slot frees up.
    pub async fn check_rate_limit(&self, user_id: &str, feature: Feature) -> Result<RateLimitDecision> {
        self.check_rate_limit_at(user_id, feature, Utc::now()).await
    }

    /// [`check_rate_limit`](Self::check_rate_limit) against an explicit clock.
    ///
    /// A store failure denies the request with a zero limit.
    #[instrument(skip(self), fields(feature = %feature), err)]
    pub async fn check_rate_limit_at(&self, user_id: &str, feature: Feature, now: DateTime<Utc>) -> Result<RateLimitDecision> {
        if user_id.trim().is_empty() {
            return Err(Error::BadRequest {
                message: "userId is required".to_string(),
            });
        }

        let limit = self.limit_for(feature);
        if limit == 0 {
            record_decision(feature, "denied");
            return Ok(RateLimitDecision {
                admitted: false,
                limit: 0,
                remaining: 0,
                reset_at: now.checked_add_signed(self.window).unwrap_or(DateTime::<Utc>::MAX_UTC),
            });
        }

        let decision = match self.store.try_increment(user_id, feature, limit, self.window, now).await {
            Ok(outcome) => RateLimitDecision {
                admitted: outcome.admitted,
                limit,
                remaining: limit.saturating_sub(outcome.count),
                reset_at: outcome.window_start.checked_add_signed(self.window).unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
            Err(e) => {
                error!(error = %e, "Counter store unavailable, denying request");
                record_decision(feature, "store_error");
                return Ok(RateLimitDecision {
                    admitted: false,
                    limit: 0,
                    remaining: 0,
                    reset_at: now,
                });
            }
        };

        if decision.admitted {
            debug!(remaining = decision.remaining, "Request admitted");
            record_decision(feature, "admitted");
        } else {
            info!(limit, reset_at = %decision.reset_at, "Request denied by rate limit");
            record_decision(feature, "denied");
        }
        Ok(decision)
    }

    /// Check the limit and turn a denial into [`Error::RateLimited`], recording the rejection.
    pub async fn enforce(&self, user_id: &str, username: &str, feature: Feature) -> Result<RateLimitDecision> {
        let decision = self.check_rate_limit(user_id, feature).await?;
        if !decision.admitted {
            self.log_rate_limited_request(user_id, username, feature).await;
            return Err(decision.into_error(feature));
        }
        Ok(decision)
    }

    /// Record a rejection. Returns whether a new event was written.
    ///
    /// Only the first rejection per username, feature and UTC day is stored. Store failures are
    /// logged and reported as `false`.
    pub async fn log_rate_limited_request(&self, user_id: &str, username: &str, feature: Feature) -> bool {
        self.log_rate_limited_request_at(user_id, username, feature, Utc::now()).await
    }

    pub async fn log_rate_limited_request_at(&self, user_id: &str, username: &str, feature: Feature, now: DateTime<Utc>) -> bool {
        match self.store.record_rejection(user_id, username, feature, now).await {
            Ok(written) => {
                if written {
                    metrics::counter!("relayctl_rate_limited_events_total", "feature" => feature.as_str()).increment(1);
                }
                written
            }
            Err(e) => {
                warn!(error = %e, %feature, "Failed to record rate-limited request");
                false
            }
        }
    }

    /// Rejections for `username` inside the retention period, newest first.
    pub async fn rate_limited_events(&self, username: &str) -> Result<Vec<RateLimitedEvent>> {
        let since = Utc::now() - self.retention;
        Ok(self.store.rejections_since(username, since).await?)
    }

    /// Drop rejections older than the retention period.
    pub async fn purge_expired_events(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.retention;
        let removed = self.store.purge_rejections_before(cutoff).await?;
        if removed > 0 {
            debug!(removed, "Purged expired rate-limit events");
        }
        Ok(removed)
    }
}

fn record_decision(feature: Feature, outcome: &'static str) {
    metrics::counter!(
        "relayctl_rate_limit_decisions_total",
        "feature" => feature.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::DbError;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config(limit: u32, window: Duration) -> RateLimitsConfig {
        RateLimitsConfig {
            default_per_day: limit,
            window,
            features: HashMap::new(),
            ..Default::default()
        }
    }

    fn limiter(limit: u32) -> RateLimiter {
        RateLimiter::new(Arc::new(Database::in_memory()), config(limit, Duration::from_secs(86_400)))
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    struct UnavailableStore;

    #[async_trait]
    impl CounterStore for UnavailableStore {
        async fn try_increment(&self, _: &str, _: Feature, _: u32, _: TimeDelta, _: DateTime<Utc>) -> DbResult<CounterOutcome> {
            Err(DbError::Other(anyhow::anyhow!("connection refused")))
        }

        async fn record_rejection(&self, _: &str, _: &str, _: Feature, _: DateTime<Utc>) -> DbResult<bool> {
            Err(DbError::Other(anyhow::anyhow!("connection refused")))
        }

        async fn rejections_since(&self, _: &str, _: DateTime<Utc>) -> DbResult<Vec<RateLimitedEvent>> {
            Err(DbError::Other(anyhow::anyhow!("connection refused")))
        }

        async fn purge_rejections_before(&self, _: DateTime<Utc>) -> DbResult<u64> {
            Err(DbError::Other(anyhow::anyhow!("connection refused")))
        }
    }

    #[tokio::test]
    async fn test_admits_limit_then_denies() {
        let limiter = limiter(3);

        for remaining in [2, 1, 0] {
            let decision = limiter.check_rate_limit_at("u1", Feature::Chat, noon()).await.unwrap();
            assert!(decision.admitted);
            assert_eq!(decision.remaining, remaining);
        }

        let denied = limiter.check_rate_limit_at("u1", Feature::Chat, noon()).await.unwrap();
        assert!(!denied.admitted);
        assert_eq!(denied.limit, 3);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, noon() + TimeDelta::days(1));

        // Denial is stable until the window ends
        let still_denied = limiter
            .check_rate_limit_at("u1", Feature::Chat, noon() + TimeDelta::hours(23))
            .await
            .unwrap();
        assert!(!still_denied.admitted);
    }

    #[tokio::test]
    async fn test_window_expiry_resets_counter() {
        let limiter = limiter(1);
        assert!(limiter.check_rate_limit_at("u1", Feature::Chat, noon()).await.unwrap().admitted);
        assert!(!limiter.check_rate_limit_at("u1", Feature::Chat, noon()).await.unwrap().admitted);

        let next = noon() + TimeDelta::days(1);
        let decision = limiter.check_rate_limit_at("u1", Feature::Chat, next).await.unwrap();
        assert!(decision.admitted);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, next + TimeDelta::days(1));
    }

    #[tokio::test]
    async fn test_window_beyond_calendar_range_does_not_panic() {
        let window = Duration::from_secs(300_000 * 365 * 86_400);
        let limiter = RateLimiter::new(Arc::new(Database::in_memory()), config(1, window));

        let admitted = limiter.check_rate_limit_at("u1", Feature::Chat, noon()).await.unwrap();
        assert!(admitted.admitted);
        assert!(!limiter.check_rate_limit_at("u1", Feature::Chat, noon()).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn test_users_and_features_are_independent() {
        let limiter = limiter(1);
        assert!(limiter.check_rate_limit_at("u1", Feature::Chat, noon()).await.unwrap().admitted);
        assert!(limiter.check_rate_limit_at("u2", Feature::Chat, noon()).await.unwrap().admitted);
        assert!(limiter.check_rate_limit_at("u1", Feature::VoiceCall, noon()).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn test_feature_specific_limit() {
        let mut config = config(50, Duration::from_secs(86_400));
        config.features.insert(Feature::VoiceCall, 2);
        let limiter = RateLimiter::new(Arc::new(Database::in_memory()), config);

        assert_eq!(limiter.limit_for(Feature::Chat), 50);
        let decision = limiter.check_rate_limit_at("u1", Feature::VoiceCall, noon()).await.unwrap();
        assert_eq!(decision.limit, 2);
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_take_last_slot_once() {
        let limiter = limiter(5);
        for _ in 0..4 {
            limiter.check_rate_limit_at("u1", Feature::Chat, noon()).await.unwrap();
        }

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check_rate_limit_at("u1", Feature::Chat, noon()).await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_zero_limit_denies_without_counting() {
        let db = Database::in_memory();
        let mut config = config(50, Duration::from_secs(86_400));
        config.features.insert(Feature::VoiceCall, 0);
        let limiter = RateLimiter::new(Arc::new(db.clone()), config);

        let decision = limiter.check_rate_limit_at("u1", Feature::VoiceCall, noon()).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.limit, 0);
        assert!(Counters::new(&db).get("u1", "voice_call").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let limiter = RateLimiter::new(Arc::new(UnavailableStore), config(50, Duration::from_secs(86_400)));

        let decision = limiter.check_rate_limit_at("u1", Feature::Chat, noon()).await.unwrap();
        assert!(!decision.admitted);
        assert_eq!(decision.limit, 0);
        assert_eq!(decision.remaining, 0);

        assert!(!limiter.log_rate_limited_request("u1", "ada", Feature::Chat).await);
    }

    #[tokio::test]
    async fn test_empty_user_is_rejected() {
        let err = limiter(5).check_rate_limit_at("  ", Feature::Chat, noon()).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[tokio::test]
    async fn test_rejections_logged_once_per_day() {
        let limiter = limiter(1);

        assert!(limiter.log_rate_limited_request("u1", "ada", Feature::Chat).await);
        assert!(!limiter.log_rate_limited_request("u1", "ada", Feature::Chat).await);

        let events = limiter.rate_limited_events("ada").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].feature, "chat");
        assert!(limiter.rate_limited_events("grace").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enforce_returns_rate_limited_error() {
        let limiter = limiter(1);
        limiter.enforce("u1", "ada", Feature::Chat).await.unwrap();

        let err = limiter.enforce("u1", "ada", Feature::Chat).await.unwrap_err();
        match err {
            Error::RateLimited { feature, limit, remaining, .. } => {
                assert_eq!(feature, Feature::Chat);
                assert_eq!(limit, 1);
                assert_eq!(remaining, 0);
            }
            other => panic!("expected rate limit error, got {other:?}"),
        }
        assert_eq!(limiter.rate_limited_events("ada").await.unwrap().len(), 1);
    }
}
