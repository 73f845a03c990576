//! Single-consumer, strictly ordered event pipeline.
//!
//! `post` never blocks: events go onto an unbounded queue drained by one
//! worker task. The worker finishes one event, including everything it
//! awaits, before taking the next, so consumption order equals post order
//! no matter how many producers post concurrently.

use crate::error::FeedResult;
use marketsync_telemetry::Metrics;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Consumer side of a pipeline.
pub trait EventHandler<E>: Send + 'static {
    /// Process one event to completion.
    ///
    /// Errors other than cancellation are logged by the pipeline and the
    /// next event is processed; the failed event is not retried.
    fn handle(&mut self, event: E) -> impl Future<Output = FeedResult<()>> + Send;
}

/// Ordered queue with exactly one consumer.
pub struct OrderedEventPipeline<E> {
    name: Arc<str>,
    tx: Mutex<Option<mpsc::UnboundedSender<E>>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Send + 'static> OrderedEventPipeline<E> {
    /// Spawn the worker. The pipeline stops when `parent` is cancelled.
    pub fn spawn<H>(name: impl Into<Arc<str>>, handler: H, parent: &CancellationToken) -> Self
    where
        H: EventHandler<E>,
    {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = parent.child_token();
        let worker = tokio::spawn(drain(Arc::clone(&name), rx, handler, cancel.clone()));

        Self {
            name,
            tx: Mutex::new(Some(tx)),
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue an event. Returns `false` once the pipeline no longer accepts
    /// events (completed, cancelled, or the worker has exited).
    pub fn post(&self, event: E) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        match &*self.tx.lock() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Stop accepting events. Already queued events are still processed.
    pub fn complete(&self) {
        self.tx.lock().take();
    }

    pub fn is_completed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Abandon draining. The event being processed is dropped at its next
    /// suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker to exit (after `complete` or `cancel`).
    pub async fn wait(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(pipeline = %self.name, error = %e, "Pipeline worker panicked");
                }
            }
        }
    }

    /// Stop accepting events, cancel, and wait for the worker. Idempotent.
    pub async fn shutdown(&self) {
        self.complete();
        self.cancel();
        self.wait().await;
    }
}

impl<E> Drop for OrderedEventPipeline<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drain<E, H>(
    name: Arc<str>,
    mut rx: mpsc::UnboundedReceiver<E>,
    mut handler: H,
    cancel: CancellationToken,
) where
    E: Send + 'static,
    H: EventHandler<E>,
{
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = handler.handle(event) => result,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                debug!(pipeline = %name, "Event handling cancelled");
            }
            Err(e) => {
                warn!(pipeline = %name, error = %e, "Event handling failed, continuing");
                Metrics::pipeline_error(&name);
            }
        }
    }

    debug!(pipeline = %name, "Pipeline worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct Recorder {
        seen: Arc<Mutex<Vec<u32>>>,
        in_flight: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
    }

    impl EventHandler<u32> for Recorder {
        fn handle(&mut self, event: u32) -> impl Future<Output = FeedResult<()>> + Send {
            async move {
                if self.in_flight.swap(true, Ordering::SeqCst) {
                    self.overlapped.store(true, Ordering::SeqCst);
                }
                // Every other event suspends mid-processing.
                if event % 2 == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                self.seen.lock().push(event);
                self.in_flight.store(false, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn recorder() -> (Recorder, Arc<Mutex<Vec<u32>>>, Arc<AtomicBool>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let overlapped = Arc::new(AtomicBool::new(false));
        let recorder = Recorder {
            seen: Arc::clone(&seen),
            in_flight: Arc::new(AtomicBool::new(false)),
            overlapped: Arc::clone(&overlapped),
        };
        (recorder, seen, overlapped)
    }

    #[tokio::test]
    async fn test_events_consumed_in_post_order_without_overlap() {
        let (handler, seen, overlapped) = recorder();
        let pipeline = Arc::new(OrderedEventPipeline::spawn(
            "test",
            handler,
            &CancellationToken::new(),
        ));

        // Producers take turns so the global post order is known.
        let turn = Arc::new(AtomicUsize::new(0));
        let mut producers = Vec::new();
        for producer in 0..4usize {
            let pipeline = Arc::clone(&pipeline);
            let turn = Arc::clone(&turn);
            producers.push(tokio::spawn(async move {
                loop {
                    let current = turn.load(Ordering::SeqCst);
                    if current >= 100 {
                        break;
                    }
                    if current % 4 == producer {
                        assert!(pipeline.post(current as u32));
                        turn.store(current + 1, Ordering::SeqCst);
                    } else {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        pipeline.complete();
        pipeline.wait().await;

        let seen = seen.lock().clone();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    struct FailOnOdd {
        processed: Arc<AtomicUsize>,
    }

    impl EventHandler<u32> for FailOnOdd {
        fn handle(&mut self, event: u32) -> impl Future<Output = FeedResult<()>> + Send {
            async move {
                self.processed.fetch_add(1, Ordering::SeqCst);
                if event % 2 == 1 {
                    Err(FeedError::InvalidData(format!("odd event {event}")))
                } else {
                    Ok(())
                }
            }
        }
    }

    #[tokio::test]
    async fn test_handler_errors_are_swallowed() {
        let processed = Arc::new(AtomicUsize::new(0));
        let pipeline = OrderedEventPipeline::spawn(
            "errors",
            FailOnOdd {
                processed: Arc::clone(&processed),
            },
            &CancellationToken::new(),
        );

        for i in 0..10 {
            assert!(pipeline.post(i));
        }
        pipeline.complete();
        pipeline.wait().await;

        assert_eq!(processed.load(Ordering::SeqCst), 10);
    }

    struct Blocking;

    impl EventHandler<u32> for Blocking {
        fn handle(&mut self, _event: u32) -> impl Future<Output = FeedResult<()>> + Send {
            async {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_queue() {
        let parent = CancellationToken::new();
        let pipeline = OrderedEventPipeline::spawn("blocked", Blocking, &parent);
        for i in 0..5 {
            assert!(pipeline.post(i));
        }

        tokio::time::timeout(Duration::from_secs(1), pipeline.shutdown())
            .await
            .expect("shutdown should not wait for queued events");
        assert!(!pipeline.post(99));
        assert!(pipeline.is_completed());

        // Second shutdown is a no-op.
        pipeline.shutdown().await;
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_worker() {
        let (handler, _seen, _) = recorder();
        let parent = CancellationToken::new();
        let pipeline = OrderedEventPipeline::spawn("parent", handler, &parent);

        parent.cancel();
        assert!(!pipeline.post(1));
        tokio::time::timeout(Duration::from_secs(1), pipeline.wait())
            .await
            .unwrap();
    }
}
