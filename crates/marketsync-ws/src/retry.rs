//! Supervised restart of a long-running stream action.
//!
//! `RetryController::begin` runs the action in a background task. When the
//! action fails the error is reported, the controller waits a fixed delay
//! and starts the action again. Cancellation ends the loop; `cancel()`
//! waits for the in-flight action to observe it and return.

use crate::error::{WsError, WsResult};
use marketsync_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn default_delay_ms() -> u64 {
    5_000
}

fn default_healthy_run_ms() -> u64 {
    60_000
}

/// Retry loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Fixed wait between a failure and the next attempt.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Consecutive failures tolerated before giving up (0 = infinite).
    #[serde(default)]
    pub max_attempts: u32,
    /// A run lasting at least this long resets the consecutive failure count.
    #[serde(default = "default_healthy_run_ms")]
    pub healthy_run_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            max_attempts: 0,
            healthy_run_ms: default_healthy_run_ms(),
        }
    }
}

/// Observable run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    /// Never started, or the previous loop finished on its own.
    Idle,
    Running,
    /// Cancelled through `cancel()`/`shutdown()`.
    Stopped,
}

enum Session {
    Idle,
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Supervises one stream action at a time.
pub struct RetryController {
    config: RetryConfig,
    session: Mutex<Session>,
    failures: Arc<AtomicU32>,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            session: Mutex::new(Session::Idle),
            failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Start supervising `action`.
    ///
    /// `action` receives the session's cancellation token and must return
    /// promptly once it fires. `Ok(())` ends the loop; an error while not
    /// cancelled is passed to `on_error` and the action restarts after the
    /// configured delay.
    ///
    /// Fails with `WsError::AlreadyRunning` while a previous loop is live.
    pub fn begin<A, Fut, E, H>(&self, action: A, on_error: H) -> WsResult<()>
    where
        A: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
        H: Fn(&E) + Send + Sync + 'static,
    {
        let mut session = self.session.lock();
        if let Session::Running { handle, .. } = &*session {
            if !handle.is_finished() {
                return Err(WsError::AlreadyRunning);
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(
            action,
            on_error,
            cancel.clone(),
            self.config.clone(),
            Arc::clone(&self.failures),
        ));
        *session = Session::Running { cancel, handle };
        Ok(())
    }

    /// Signal cancellation and wait for the current action to return.
    ///
    /// Only the first call after `begin` waits; later calls are no-ops.
    pub async fn cancel(&self) {
        let previous = std::mem::replace(&mut *self.session.lock(), Session::Stopped);
        match previous {
            Session::Running { cancel, handle } => {
                cancel.cancel();
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!(error = %e, "Supervised stream task panicked");
                    }
                }
                info!("Retry controller stopped");
            }
            Session::Idle => {}
            Session::Stopped => {}
        }
    }

    /// Same as `cancel()`; provided for symmetry with other components.
    pub async fn shutdown(&self) {
        self.cancel().await;
    }

    pub fn status(&self) -> RetryStatus {
        match &*self.session.lock() {
            Session::Idle => RetryStatus::Idle,
            Session::Running { handle, .. } if handle.is_finished() => RetryStatus::Idle,
            Session::Running { .. } => RetryStatus::Running,
            Session::Stopped => RetryStatus::Stopped,
        }
    }

    /// Number of `on_error` invocations since construction.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Drop for RetryController {
    fn drop(&mut self) {
        if let Session::Running { cancel, .. } = &*self.session.lock() {
            cancel.cancel();
        }
    }
}

async fn supervise<A, Fut, E, H>(
    mut action: A,
    on_error: H,
    cancel: CancellationToken,
    config: RetryConfig,
    failures: Arc<AtomicU32>,
) where
    A: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
    H: Fn(&E) + Send + Sync + 'static,
{
    let delay = Duration::from_millis(config.delay_ms);
    let healthy_run = Duration::from_millis(config.healthy_run_ms);
    let mut attempt = 0u32;

    while !cancel.is_cancelled() {
        let started = Instant::now();
        match action(cancel.clone()).await {
            Ok(()) => {
                debug!("Stream action completed");
                break;
            }
            Err(e) if cancel.is_cancelled() => {
                debug!(error = %e, "Stream action ended after cancellation");
                break;
            }
            Err(e) => {
                let ran_for = started.elapsed();
                if ran_for >= healthy_run {
                    debug!(
                        ran_ms = ran_for.as_millis() as u64,
                        "Run was healthy, resetting attempts"
                    );
                    attempt = 0;
                }
                attempt += 1;
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %e,
                    attempt,
                    delay_ms = config.delay_ms,
                    "Stream action failed, restarting"
                );
                on_error(&e);
                Metrics::stream_restart();

                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(attempt, "Max stream restart attempts reached, giving up");
                    break;
                }

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!("Cancelled during retry delay");
                        break;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::oneshot;

    fn controller(delay_ms: u64) -> RetryController {
        RetryController::new(RetryConfig {
            delay_ms,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_n_times_then_succeeds() {
        let controller = controller(1_000);
        let calls = Arc::new(AtomicU32::new(0));
        let errors = Arc::new(AtomicU32::new(0));
        let (done_tx, done_rx) = oneshot::channel();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));

        let action_calls = Arc::clone(&calls);
        let on_error_count = Arc::clone(&errors);
        controller
            .begin(
                move |_cancel| {
                    let n = action_calls.fetch_add(1, Ordering::SeqCst);
                    let done_tx = Arc::clone(&done_tx);
                    async move {
                        if n < 3 {
                            Err(format!("failure {n}"))
                        } else {
                            if let Some(tx) = done_tx.lock().take() {
                                let _ = tx.send(());
                            }
                            Ok(())
                        }
                    }
                },
                move |_e: &String| {
                    on_error_count.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        done_rx.await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(errors.load(Ordering::SeqCst), 3);
        assert_eq!(controller.failures(), 3);
        assert_eq!(controller.status(), RetryStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_fixed_delay_between_attempts() {
        let controller = controller(2_000);
        let start = tokio::time::Instant::now();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&starts);
        controller
            .begin(
                move |_cancel| {
                    recorded.lock().push(start.elapsed());
                    async { Err::<(), _>("boom") }
                },
                |_e: &&str| {},
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        controller.cancel().await;

        let starts = starts.lock();
        assert_eq!(starts.len(), 3);
        assert!(starts[1] >= Duration::from_millis(2_000));
        assert!(starts[2] >= Duration::from_millis(4_000));
    }

    #[tokio::test]
    async fn test_second_begin_is_rejected() {
        let controller = controller(100);
        controller
            .begin(
                |cancel: CancellationToken| async move {
                    cancel.cancelled().await;
                    Ok::<(), String>(())
                },
                |_e: &String| {},
            )
            .unwrap();

        let second = controller.begin(
            |_cancel| async { Ok::<(), String>(()) },
            |_e: &String| {},
        );
        assert!(matches!(second, Err(WsError::AlreadyRunning)));
        assert_eq!(controller.status(), RetryStatus::Running);

        controller.cancel().await;
    }

    #[tokio::test]
    async fn test_cancel_waits_for_action_and_is_idempotent() {
        let controller = controller(100);
        let observed = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&observed);
        controller
            .begin(
                move |cancel: CancellationToken| {
                    let flag = Arc::clone(&flag);
                    async move {
                        cancel.cancelled().await;
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        flag.store(true, Ordering::SeqCst);
                        Ok::<(), String>(())
                    }
                },
                |_e: &String| {},
            )
            .unwrap();

        tokio::task::yield_now().await;
        controller.cancel().await;
        assert!(observed.load(Ordering::SeqCst));
        assert_eq!(controller.status(), RetryStatus::Stopped);

        controller.cancel().await;
        controller.shutdown().await;
        assert_eq!(controller.status(), RetryStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_after_cancellation_is_not_reported() {
        let controller = controller(100);
        let errors = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&errors);
        controller
            .begin(
                |cancel: CancellationToken| async move {
                    cancel.cancelled().await;
                    Err::<(), _>("connection reset during shutdown".to_string())
                },
                move |_e: &String| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.cancel().await;
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_exits_promptly() {
        let controller = controller(60_000);
        controller
            .begin(|_cancel| async { Err::<(), _>("down") }, |_e: &&str| {})
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        let start = tokio::time::Instant::now();
        controller.cancel().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(controller.failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_gives_up() {
        let controller = RetryController::new(RetryConfig {
            delay_ms: 10,
            max_attempts: 2,
            ..Default::default()
        });
        controller
            .begin(|_cancel| async { Err::<(), _>("down") }, |_e: &&str| {})
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(controller.failures(), 2);
        assert_eq!(controller.status(), RetryStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_healthy_runs_reset_consecutive_failures() {
        let controller = RetryController::new(RetryConfig {
            delay_ms: 1_000,
            max_attempts: 2,
            ..Default::default()
        });
        let runs = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&runs);
        controller
            .begin(
                move |cancel: CancellationToken| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        tokio::select! {
                            () = cancel.cancelled() => Ok(()),
                            () = tokio::time::sleep(Duration::from_secs(86_400)) => {
                                Err("daily disconnect")
                            }
                        }
                    }
                },
                |_e: &&str| {},
            )
            .unwrap();

        // Two day-long runs end in errors; the third is still streaming.
        tokio::time::sleep(Duration::from_secs(3 * 86_400)).await;
        assert_eq!(controller.failures(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(controller.status(), RetryStatus::Running);

        controller.cancel().await;
        assert_eq!(controller.status(), RetryStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_runs_between_failures_still_count() {
        let controller = RetryController::new(RetryConfig {
            delay_ms: 10,
            max_attempts: 3,
            healthy_run_ms: 60_000,
        });
        controller
            .begin(
                |_cancel| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err::<(), _>("flapping")
                },
                |_e: &&str| {},
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(controller.failures(), 3);
        assert_eq!(controller.status(), RetryStatus::Idle);
    }

    #[tokio::test]
    async fn test_begin_after_cancel_starts_fresh_session() {
        let controller = controller(100);
        controller
            .begin(|_cancel| async { Ok::<(), String>(()) }, |_e: &String| {})
            .unwrap();
        controller.cancel().await;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        controller
            .begin(
                move |_cancel| {
                    flag.store(true, Ordering::SeqCst);
                    async { Ok::<(), String>(()) }
                },
                |_e: &String| {},
            )
            .unwrap();
        controller.cancel().await;
        assert!(ran.load(Ordering::SeqCst));
    }
}
