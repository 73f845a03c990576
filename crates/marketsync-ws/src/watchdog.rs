//! Stall detection for push connections.
//!
//! The watchdog fires its callback when `interval` passes without a
//! `kick()`. It only reports; reconnecting is left to whoever owns the
//! callback.

use marketsync_telemetry::Metrics;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Shortest interval a watchdog will run with.
pub const MIN_WATCHDOG_INTERVAL: Duration = Duration::from_millis(10);

struct Shared {
    interval: Duration,
    deadline: Mutex<Instant>,
    enabled: AtomicBool,
}

/// Fires a callback once per `interval` of inactivity.
pub struct WatchdogTimer {
    shared: Arc<Shared>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchdogTimer {
    /// Start an enabled watchdog. Must be called inside a tokio runtime.
    ///
    /// Intervals below `MIN_WATCHDOG_INTERVAL` are raised to it.
    pub fn start<F>(interval: Duration, on_elapsed: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let interval = interval.max(MIN_WATCHDOG_INTERVAL);
        let shared = Arc::new(Shared {
            interval,
            deadline: Mutex::new(Instant::now() + interval),
            enabled: AtomicBool::new(true),
        });
        let stop = CancellationToken::new();
        let task = tokio::spawn(run(Arc::clone(&shared), on_elapsed, stop.clone()));

        Self { shared, stop, task }
    }

    /// Push the deadline out by one interval.
    pub fn kick(&self) {
        *self.shared.deadline.lock() = Instant::now() + self.shared.interval;
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Gate firing. Enabling also re-arms the deadline.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.kick();
        }
        self.shared.enabled.store(enabled, Ordering::Release);
    }

    /// Stop the background task. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchdogTimer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run<F>(shared: Arc<Shared>, on_elapsed: F, stop: CancellationToken)
where
    F: Fn() + Send + Sync + 'static,
{
    loop {
        let deadline = *shared.deadline.lock();

        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            () = tokio::time::sleep_until(deadline) => {}
        }

        let now = Instant::now();
        {
            let mut current = shared.deadline.lock();
            if *current > now {
                // Kicked while sleeping.
                continue;
            }
            *current = now + shared.interval;
        }

        if shared.enabled.load(Ordering::Acquire) {
            debug!(interval_ms = shared.interval.as_millis() as u64, "Watchdog elapsed");
            Metrics::watchdog_elapsed();
            on_elapsed();
        }
    }
}
