//! Registry of token buckets keyed by client.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use super::quota::Quota;

/// Maps client keys to their token buckets.
///
/// Buckets are created on first use and removed by [`LimiterRegistry::sweep`]
/// once idle. Insertion for a key goes through the map's entry API, so
/// concurrent first requests for the same key share one bucket.
///
/// Lock order is always map shard, then bucket. `allow` releases the shard
/// before it locks the bucket.
#[derive(Debug)]
pub struct LimiterRegistry {
    /// Buckets indexed by client key
    buckets: DashMap<String, Arc<TokenBucket>>,
    /// Quota applied to buckets created through `allow`
    quota: Quota,
    /// Soft cap on tracked keys; least recently seen keys go first
    max_tracked_keys: Option<NonZeroUsize>,
}

impl LimiterRegistry {
    /// Create an empty registry.
    pub fn new(quota: Quota) -> Self {
        Self {
            buckets: DashMap::new(),
            quota,
            max_tracked_keys: None,
        }
    }

    /// Limit how many keys are tracked at once.
    ///
    /// The cap can be overshot by the number of callers creating new keys at
    /// the same moment.
    pub fn with_max_tracked_keys(mut self, max: NonZeroUsize) -> Self {
        self.max_tracked_keys = Some(max);
        self
    }

    /// The quota used by [`LimiterRegistry::allow`].
    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    /// Check whether the client identified by `key` may make a request.
    pub fn allow(&self, key: &str) -> bool {
        let bucket = self.get_or_create(key, &self.quota);
        let allowed = bucket.allow();

        trace!(key = %key, allowed, "Checked rate limit");
        allowed
    }

    /// Get the bucket for `key`, creating a full one from `quota` if absent.
    ///
    /// `quota` is only consulted when the bucket is created.
    pub fn get_or_create(&self, key: &str, quota: &Quota) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }

        self.evict_if_full();

        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            debug!(
                key = %key,
                max_tokens = quota.max_tokens(),
                refill_interval = ?quota.refill_interval(),
                "Creating new token bucket"
            );
            Arc::new(TokenBucket::new(quota))
        });
        Arc::clone(entry.value())
    }

    /// Remove every bucket that has not refilled within `idle_threshold`.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, now: Instant, idle_threshold: Duration) -> usize {
        let mut removed = 0;
        self.buckets.retain(|key, bucket| {
            if bucket.is_idle(now, idle_threshold) {
                trace!(key = %key, "Evicting idle token bucket");
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    fn evict_if_full(&self) {
        let Some(max) = self.max_tracked_keys else {
            return;
        };

        while self.buckets.len() >= max.get() {
            let oldest = self
                .buckets
                .iter()
                .min_by_key(|entry| entry.value().last_seen())
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    debug!(key = %key, "Key cap reached, evicting least recently seen bucket");
                    self.buckets.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Whether a bucket exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.buckets.contains_key(key)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }
}
