//! Background eviction of idle token buckets.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::LimiterRegistry;

/// How often to sweep, and how long a bucket may sit idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Time between sweeps
    pub interval: Duration,
    /// Buckets without a refill for longer than this are removed
    pub idle_threshold: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10 * 60),
            idle_threshold: Duration::from_secs(30 * 60),
        }
    }
}

/// Handle to the background sweep task.
///
/// The task stops on [`Sweeper::shutdown`] or when the handle is dropped.
pub struct Sweeper {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn a sweep task for `registry` on the current tokio runtime.
    pub fn spawn(registry: Arc<LimiterRegistry>, policy: SweepPolicy) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = policy.interval.as_secs(),
                idle_threshold_secs = policy.idle_threshold.as_secs(),
                "Token bucket sweeper started"
            );

            let mut ticker = interval(policy.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = registry.sweep(Instant::now(), policy.idle_threshold);
                        debug!(
                            removed,
                            remaining = registry.len(),
                            "Swept idle token buckets"
                        );
                    }
                    _ = task_token.cancelled() => {
                        break;
                    }
                }
            }

            info!("Token bucket sweeper stopped");
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Whether the sweep task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the sweep task and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Token bucket sweeper exited abnormally");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("running", &self.is_running())
            .finish()
    }
}
