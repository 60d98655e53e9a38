//! Rate limit quota: how many requests are allowed over which window.

use std::time::Duration;

use crate::error::{GatekeeperError, Result};

/// A validated request quota.
///
/// `max_tokens` requests are admitted per `window`; one token is earned back
/// every `window / max_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    max_tokens: u32,
    window: Duration,
    refill_interval: Duration,
}

impl Quota {
    /// Create a new quota, rejecting zero capacity and degenerate windows.
    pub fn new(max_tokens: u32, window: Duration) -> Result<Self> {
        if max_tokens == 0 {
            return Err(GatekeeperError::InvalidQuota(
                "max_tokens must be greater than zero".to_string(),
            ));
        }

        if window.is_zero() {
            return Err(GatekeeperError::InvalidQuota(
                "window must be greater than zero".to_string(),
            ));
        }

        let refill_interval = window / max_tokens;
        if refill_interval.is_zero() {
            return Err(GatekeeperError::InvalidQuota(format!(
                "window {:?} is too short for {} tokens",
                window, max_tokens
            )));
        }

        Ok(Self {
            max_tokens,
            window,
            refill_interval,
        })
    }

    /// `max_tokens` requests per second.
    pub fn per_second(max_tokens: u32) -> Result<Self> {
        Self::new(max_tokens, Duration::from_secs(1))
    }

    /// `max_tokens` requests per minute.
    pub fn per_minute(max_tokens: u32) -> Result<Self> {
        Self::new(max_tokens, Duration::from_secs(60))
    }

    /// `max_tokens` requests per hour.
    pub fn per_hour(max_tokens: u32) -> Result<Self> {
        Self::new(max_tokens, Duration::from_secs(3600))
    }

    /// `max_tokens` requests per day.
    pub fn per_day(max_tokens: u32) -> Result<Self> {
        Self::new(max_tokens, Duration::from_secs(86400))
    }

    /// Bucket capacity.
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Window over which `max_tokens` requests are allowed.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Time it takes to earn back one token.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }
}
