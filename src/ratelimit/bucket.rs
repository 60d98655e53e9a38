//! Token bucket for a single client key.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::quota::Quota;

#[derive(Debug)]
struct BucketState {
    /// Tokens currently available
    tokens: u32,
    /// When tokens were last added
    last_refill: Instant,
    /// When the bucket was last checked, for LRU eviction
    last_seen: Instant,
}

/// A token bucket with lazy, whole-token refill.
///
/// Refill and consumption happen under one lock, so a check is atomic with
/// respect to other checks (and sweeps) on the same bucket.
#[derive(Debug)]
pub struct TokenBucket {
    max_tokens: u32,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket for the given quota.
    pub fn new(quota: &Quota) -> Self {
        Self::new_at(quota, Instant::now())
    }

    pub(crate) fn new_at(quota: &Quota, now: Instant) -> Self {
        Self {
            max_tokens: quota.max_tokens(),
            refill_interval: quota.refill_interval(),
            state: Mutex::new(BucketState {
                tokens: quota.max_tokens(),
                last_refill: now,
                last_seen: now,
            }),
        }
    }

    /// Try to consume one token.
    ///
    /// Returns `true` if a token was available, `false` if the bucket is empty.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub(crate) fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.last_seen = now;

        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Add one token per whole refill interval elapsed.
    ///
    /// `last_refill` jumps to `now`, so any partial interval is dropped.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let whole = elapsed.as_nanos() / self.refill_interval.as_nanos();
        if whole == 0 {
            return;
        }

        let to_add = whole.min(self.max_tokens as u128) as u32;
        state.tokens = state.tokens.saturating_add(to_add).min(self.max_tokens);
        state.last_refill = now;
    }

    /// Tokens available right now, without refilling.
    pub fn tokens(&self) -> u32 {
        self.state.lock().tokens
    }

    /// Bucket capacity.
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Time it takes to earn back one token.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// When tokens were last added (or the bucket was created).
    pub fn last_refill(&self) -> Instant {
        self.state.lock().last_refill
    }

    pub(crate) fn last_seen(&self) -> Instant {
        self.state.lock().last_seen
    }

    /// Whether the bucket has gone longer than `threshold` without a refill.
    pub fn is_idle(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.last_refill()) > threshold
    }
}
