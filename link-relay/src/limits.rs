//! Rate limiting for heartlink-relay.
//!
//! Callers are identified by their resolved [`UserId`], so every limiter is
//! keyed on the 16 id bytes. Love sends and pair requests have separate
//! per-user quotas; a direct limiter caps aggregate API throughput.
//!
//! Keyed limiters are backed by DashMap and grow with the number of distinct
//! callers, so [`spawn_sweeper`] periodically drops idle entries.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use link_types::UserId;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Love sends per user, `limits.love_per_minute`.
    love_limiter: Arc<KeyedLimiter<[u8; 16]>>,

    /// Pair request creations per user, `limits.pair_requests_per_minute`.
    pair_request_limiter: Arc<KeyedLimiter<[u8; 16]>>,

    /// Authenticated API calls across all users.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("love_limiter", &"KeyedLimiter<[u8;16]>")
            .field("pair_request_limiter", &"KeyedLimiter<[u8;16]>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

/// A zero quota in the config is treated as one per period.
fn quota_value(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

impl RateLimits {
    /// Create rate limiters from configuration.
    pub fn new(config: &LimitsConfig) -> Self {
        let love_quota = Quota::per_minute(quota_value(config.love_per_minute));
        let pair_request_quota = Quota::per_minute(quota_value(config.pair_requests_per_minute));
        let global_quota = Quota::per_second(quota_value(config.global_requests_per_second));

        Self {
            love_limiter: Arc::new(RateLimiter::keyed(love_quota)),
            pair_request_limiter: Arc::new(RateLimiter::keyed(pair_request_quota)),
            global_limiter: Arc::new(RateLimiter::direct(global_quota)),
        }
    }

    /// Check if `user` may send another love event.
    pub fn check_love(&self, user: &UserId) -> Result<(), RateLimitError> {
        self.love_limiter
            .check_key(user.as_bytes())
            .map_err(|_| RateLimitError::LoveLimitExceeded)
    }

    /// Check if `user` may create another pair request.
    pub fn check_pair_request(&self, user: &UserId) -> Result<(), RateLimitError> {
        self.pair_request_limiter
            .check_key(user.as_bytes())
            .map_err(|_| RateLimitError::PairRequestLimitExceeded)
    }

    /// Check if the global request rate is within limits.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of tracked keys across the keyed limiters (for metrics).
    pub fn tracked_keys(&self) -> usize {
        self.love_limiter.len() + self.pair_request_limiter.len()
    }

    /// Evict entries whose cells have fully recharged.
    pub fn shrink(&self) {
        self.love_limiter.retain_recent();
        self.pair_request_limiter.retain_recent();
    }
}

/// Spawn a background task that calls [`RateLimits::shrink`] every `period`.
pub fn spawn_sweeper(limits: RateLimits, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(period_secs = period.as_secs(), "Rate limit sweeper started");
        let mut timer = tokio::time::interval(period);
        // The first tick completes immediately.
        timer.tick().await;

        loop {
            timer.tick().await;
            let before = limits.tracked_keys();
            limits.shrink();
            tracing::debug!(before, after = limits.tracked_keys(), "Swept rate limiters");
        }
    })
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many love events from this user.
    #[error("love rate limit exceeded")]
    LoveLimitExceeded,
    /// Too many pair requests from this user.
    #[error("pair request rate limit exceeded")]
    PairRequestLimitExceeded,
    /// Global request rate exceeded across all users.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(love: u32, pair_requests: u32, global: u32) -> LimitsConfig {
        LimitsConfig {
            love_per_minute: love,
            pair_requests_per_minute: pair_requests,
            global_requests_per_second: global,
            ..LimitsConfig::default()
        }
    }

    #[test]
    fn fresh_limits_track_nothing() {
        let limits = RateLimits::new(&LimitsConfig::default());
        assert_eq!(limits.tracked_keys(), 0);
    }

    #[test]
    fn love_limit_allows_within_quota() {
        let limits = RateLimits::new(&config(5, 100, 1000));
        let user = UserId::new();

        for _ in 0..5 {
            assert!(limits.check_love(&user).is_ok());
        }

        assert_eq!(
            limits.check_love(&user),
            Err(RateLimitError::LoveLimitExceeded)
        );
    }

    #[test]
    fn pair_request_limit_is_separate_from_love() {
        let limits = RateLimits::new(&config(1, 2, 1000));
        let user = UserId::new();

        assert!(limits.check_love(&user).is_ok());
        assert!(limits.check_love(&user).is_err());

        assert!(limits.check_pair_request(&user).is_ok());
        assert!(limits.check_pair_request(&user).is_ok());
        assert_eq!(
            limits.check_pair_request(&user),
            Err(RateLimitError::PairRequestLimitExceeded)
        );
    }

    #[test]
    fn different_users_have_independent_limits() {
        let limits = RateLimits::new(&config(2, 2, 1000));
        let alice = UserId::new();
        let bob = UserId::new();

        assert!(limits.check_love(&alice).is_ok());
        assert!(limits.check_love(&alice).is_ok());
        assert!(limits.check_love(&alice).is_err());

        assert!(limits.check_love(&bob).is_ok());
        assert!(limits.check_love(&bob).is_ok());
        assert!(limits.check_love(&bob).is_err());
    }

    #[test]
    fn global_rate_limiter_rejects_excess() {
        let limits = RateLimits::new(&config(100, 100, 5));

        for _ in 0..5 {
            assert!(limits.check_global().is_ok());
        }

        assert_eq!(
            limits.check_global(),
            Err(RateLimitError::GlobalLimitExceeded)
        );
    }

    #[test]
    fn zero_quota_means_one() {
        let limits = RateLimits::new(&config(0, 0, 0));
        let user = UserId::new();

        assert!(limits.check_love(&user).is_ok());
        assert!(limits.check_love(&user).is_err());
    }

    #[test]
    fn shrink_keeps_working_limiters() {
        let limits = RateLimits::new(&LimitsConfig::default());
        let user = UserId::new();
        let _ = limits.check_love(&user);
        let _ = limits.check_pair_request(&user);
        assert!(limits.tracked_keys() > 0);

        limits.shrink();
        assert!(limits.check_love(&user).is_ok());
    }

    #[test]
    fn rate_limit_error_display() {
        assert_eq!(
            RateLimitError::LoveLimitExceeded.to_string(),
            "love rate limit exceeded"
        );
        assert_eq!(
            RateLimitError::GlobalLimitExceeded.to_string(),
            "global rate limit exceeded"
        );
    }
}
