//! Background removal of expired rate limit entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Longest accepted time between sweeps. Longer intervals are clamped.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Handle to a running sweep task.
///
/// The task calls [`RateLimiter::sweep`] once per interval, starting one
/// full interval after spawn. Dropping the handle ends the task at its next
/// wake-up; [`Sweeper::stop`] ends it and waits for it.
#[derive(Debug)]
pub struct Sweeper {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<usize>,
}

impl Sweeper {
    /// Start sweeping `limiter` every `interval`, clamped to
    /// `1ms..=`[`MAX_SWEEP_INTERVAL`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        let interval = interval.clamp(Duration::from_millis(1), MAX_SWEEP_INTERVAL);
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        info!(
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "Starting rate limit sweeper"
        );

        // First deadline is fixed here, not at the task's first poll
        let start = Instant::now() + interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut total_removed = 0;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        total_removed += removed;
                        debug!(removed = removed, tracked = limiter.len(), "Sweep finished");
                    }
                }
            }

            info!(total_removed = total_removed, "Rate limit sweeper stopped");
            total_removed
        });

        Self { shutdown, handle }
    }

    /// Stop the task and wait for it. Returns the total number of entries
    /// it removed.
    pub async fn stop(self) -> usize {
        // The task may already be gone if the runtime is shutting down
        let _ = self.shutdown.send(());
        match self.handle.await {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, "Rate limit sweeper ended abnormally");
                0
            }
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
