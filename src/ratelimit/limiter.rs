//! Core rate limiter: a bucket registry plus its background sweeper.

use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::quota::Quota;
use super::registry::LimiterRegistry;
use super::sweeper::{SweepPolicy, Sweeper};

/// Settings for a [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Per-key quota
    pub quota: Quota,
    /// Idle eviction schedule
    pub sweep: SweepPolicy,
    /// Optional cap on tracked keys
    pub max_tracked_keys: Option<NonZeroUsize>,
}

impl RateLimiterConfig {
    /// Config with the default sweep policy and no key cap.
    pub fn new(quota: Quota) -> Self {
        Self {
            quota,
            sweep: SweepPolicy::default(),
            max_tracked_keys: None,
        }
    }
}

/// Per-client token bucket rate limiter.
///
/// Owns the bucket registry and the task that sweeps it. Construct one at
/// startup, share it behind an `Arc`, and call [`RateLimiter::shutdown`] when
/// the server stops.
#[derive(Debug)]
pub struct RateLimiter {
    registry: Arc<LimiterRegistry>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RateLimiter {
    /// Create a rate limiter and spawn its sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: RateLimiterConfig) -> Self {
        let registry = Arc::new(Self::build_registry(&config));
        let sweeper = Sweeper::spawn(Arc::clone(&registry), config.sweep);

        info!(
            max_tokens = config.quota.max_tokens(),
            window = ?config.quota.window(),
            max_tracked_keys = ?config.max_tracked_keys,
            "Rate limiter initialized"
        );

        Self {
            registry,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Create a rate limiter with no background sweeper.
    ///
    /// Idle buckets are only removed by calling `registry().sweep(..)`.
    pub fn unswept(quota: Quota) -> Self {
        Self {
            registry: Arc::new(LimiterRegistry::new(quota)),
            sweeper: Mutex::new(None),
        }
    }

    fn build_registry(config: &RateLimiterConfig) -> LimiterRegistry {
        let registry = LimiterRegistry::new(config.quota);
        match config.max_tracked_keys {
            Some(max) => registry.with_max_tracked_keys(max),
            None => registry,
        }
    }

    /// Check whether the client identified by `key` may make a request,
    /// consuming a token if so.
    pub fn allow(&self, key: &str) -> bool {
        self.registry.allow(key)
    }

    /// The underlying bucket registry.
    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    /// Per-key quota.
    pub fn quota(&self) -> &Quota {
        self.registry.quota()
    }

    /// Number of client keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.registry.len()
    }

    /// Whether the background sweeper is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(Sweeper::is_running)
    }

    /// Stop the background sweeper. Safe to call more than once.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quota(max: u32, window_secs: u64) -> Quota {
        Quota::new(max, Duration::from_secs(window_secs)).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limiter_creation() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(quota(10, 60)));
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(limiter.is_sweeping());

        limiter.shutdown().await;
        assert!(!limiter.is_sweeping());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(quota(10, 60)));
        limiter.shutdown().await;
        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_per_three_seconds() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(quota(3, 3)));

        let burst: Vec<bool> = (0..3).map(|_| limiter.allow("A")).collect();
        assert_eq!(burst, vec![true, true, true]);
        assert!(!limiter.allow("A"));

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(limiter.allow("A"));

        limiter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_bounded_by_capacity() {
        let limiter = RateLimiter::unswept(quota(2, 2));
        assert!(limiter.allow("A"));
        assert!(limiter.allow("A"));

        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert!(limiter.allow("A"));
        assert!(limiter.allow("A"));
        assert!(!limiter.allow("A"));
    }

    #[test]
    fn test_unswept_limiter_needs_no_runtime() {
        let limiter = RateLimiter::unswept(quota(1, 60));
        assert!(!limiter.is_sweeping());
        assert!(limiter.allow("A"));
        assert!(!limiter.allow("A"));
        assert!(limiter.allow("B"));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[tokio::test]
    async fn test_key_cap_from_config() {
        let config = RateLimiterConfig {
            max_tracked_keys: NonZeroUsize::new(1),
            ..RateLimiterConfig::new(quota(5, 60))
        };
        let limiter = RateLimiter::new(config);

        limiter.allow("a");
        limiter.allow("b");
        assert_eq!(limiter.tracked_keys(), 1);

        limiter.shutdown().await;
    }
}
