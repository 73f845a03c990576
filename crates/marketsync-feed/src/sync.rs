//! Generic snapshot/diff synchronization engine.
//!
//! A `SyncCache<M>` wires a push stream into an `OrderedEventPipeline`
//! whose single consumer drives a `Synchronizer<M>`. The model owns the
//! local state and knows how to fetch a baseline and place an event
//! relative to it; the synchronizer decides when to bootstrap or resync
//! and the cache publishes every update produced.
//!
//! State machine per subscription:
//! `Uninitialized -> Bootstrapping -> Synced <-> Resyncing`, with a failed
//! resync falling back to `Uninitialized`.

use crate::error::{FeedError, FeedResult};
use crate::pipeline::{EventHandler, OrderedEventPipeline};
use dashmap::DashMap;
use marketsync_rest::{CompositeRateLimiter, RestSource};
use marketsync_telemetry::Metrics;
use marketsync_ws::{MessageHandler, PushMessage, PushSource};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the broadcast channel behind `SyncCache::updates`.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Uninitialized,
    Bootstrapping,
    Synced,
    Resyncing,
}

/// Where a stream event falls relative to the local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// Already reflected locally.
    Stale,
    /// Extends (or overlaps) the local state without missing anything.
    Contiguous,
    /// Something between the local state and the event is missing.
    Gap,
}

/// Collaborators a model needs while processing one event.
#[derive(Clone)]
pub struct SyncContext {
    pub rest: Arc<dyn RestSource>,
    pub limiter: Arc<CompositeRateLimiter>,
    pub cancel: CancellationToken,
}

impl SyncContext {
    /// Wait for rate-limit capacity for a request of `weight`.
    pub async fn throttle(&self, weight: u32) -> FeedResult<()> {
        self.limiter.delay(weight, &self.cancel).await?;
        Ok(())
    }
}

/// Per-symbol state plugged into a `Synchronizer`.
///
/// Implementations only describe their data: how to decode an event, fetch
/// a REST baseline, classify an event against local state and apply it.
/// Bootstrap, resync and reset decisions live in `Synchronizer`.
pub trait SyncModel: Send + 'static {
    type Config: Clone + Send + Sync + 'static;
    /// Immutable value handed to subscribers.
    type Update: Clone + Send + Sync + 'static;
    /// One decoded stream event.
    type Event: Send + Sync + 'static;
    /// Ordering key (sequence id, trade id, open time) used in logs.
    type Position: fmt::Debug;

    /// Label used in logs and metrics.
    const KIND: &'static str;

    fn new(symbol: &str, config: &Self::Config) -> Self;

    /// Push stream carrying this model's events for `symbol`.
    fn stream_name(symbol: &str, config: &Self::Config) -> String;

    fn symbol(&self) -> &str;

    /// Decode a raw payload. `Ok(None)` for payloads this model ignores.
    fn decode(&self, payload: &str) -> FeedResult<Option<Self::Event>>;

    /// Replace the local state with a freshly fetched baseline.
    fn fetch_baseline(&mut self, ctx: &SyncContext) -> impl Future<Output = FeedResult<()>> + Send;

    fn continuity(&self, event: &Self::Event) -> Continuity;

    /// Apply a `Contiguous` event and describe the result.
    fn apply(&mut self, event: Self::Event) -> Self::Update;

    /// Describe the state exactly as fetched. Published when a fresh
    /// baseline already covers the event that triggered the fetch.
    fn baseline_update(&mut self) -> Option<Self::Update>;

    /// Forget all local state.
    fn clear(&mut self);

    /// Newest position held locally.
    fn position(&self) -> Option<Self::Position>;

    fn event_position(event: &Self::Event) -> Self::Position;
}

/// Bootstrap and gap-recovery policy shared by every `SyncModel`.
///
/// The first event after construction or a reset fetches a baseline. A gap
/// triggers exactly one resync; if the refreshed baseline still leaves a
/// gap the event is dropped and the state reset, so the next event
/// bootstraps again.
pub struct Synchronizer<M: SyncModel> {
    model: M,
    status: SyncStatus,
    /// Set after a fetch until the refreshed baseline has been published.
    baseline_pending: bool,
}

impl<M: SyncModel> Synchronizer<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            status: SyncStatus::Uninitialized,
            baseline_pending: false,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Process one raw payload. Returns the update to publish, if any.
    pub async fn process(
        &mut self,
        payload: &str,
        ctx: &SyncContext,
    ) -> FeedResult<Option<M::Update>> {
        match self.model.decode(payload)? {
            Some(event) => self.process_event(event, ctx).await,
            None => Ok(None),
        }
    }

    pub async fn process_event(
        &mut self,
        event: M::Event,
        ctx: &SyncContext,
    ) -> FeedResult<Option<M::Update>> {
        if self.status == SyncStatus::Uninitialized {
            self.bootstrap(ctx).await?;
        }

        if self.model.continuity(&event) == Continuity::Gap && !self.resync(&event, ctx).await? {
            return Ok(None);
        }

        match self.model.continuity(&event) {
            Continuity::Contiguous => {
                self.baseline_pending = false;
                Ok(Some(self.model.apply(event)))
            }
            Continuity::Stale if self.baseline_pending => {
                self.baseline_pending = false;
                Ok(self.model.baseline_update())
            }
            Continuity::Stale => {
                trace!(
                    cache = M::KIND,
                    symbol = %self.model.symbol(),
                    event = ?M::event_position(&event),
                    local = ?self.model.position(),
                    "Stale event ignored"
                );
                Metrics::event_dropped(M::KIND, "stale");
                Ok(None)
            }
            // Resolved above.
            Continuity::Gap => Ok(None),
        }
    }

    async fn fetch(&mut self, ctx: &SyncContext) -> FeedResult<()> {
        self.model.fetch_baseline(ctx).await?;
        self.baseline_pending = true;
        Ok(())
    }

    async fn bootstrap(&mut self, ctx: &SyncContext) -> FeedResult<()> {
        self.status = SyncStatus::Bootstrapping;
        if let Err(e) = self.fetch(ctx).await {
            self.reset();
            if !e.is_cancelled() {
                Metrics::event_dropped(M::KIND, "bootstrap_failed");
            }
            return Err(e);
        }

        self.status = SyncStatus::Synced;
        info!(
            cache = M::KIND,
            symbol = %self.model.symbol(),
            local = ?self.model.position(),
            "Bootstrapped"
        );
        Ok(())
    }

    /// Returns `Ok(false)` when the gap persists and the event must be dropped.
    async fn resync(&mut self, event: &M::Event, ctx: &SyncContext) -> FeedResult<bool> {
        warn!(
            cache = M::KIND,
            symbol = %self.model.symbol(),
            local = ?self.model.position(),
            event = ?M::event_position(event),
            "Gap detected, resyncing"
        );
        self.status = SyncStatus::Resyncing;

        if let Err(e) = self.fetch(ctx).await {
            self.reset();
            if !e.is_cancelled() {
                Metrics::resync(M::KIND, "failed");
                Metrics::event_dropped(M::KIND, "resync_failed");
            }
            return Err(e);
        }

        if self.model.continuity(event) == Continuity::Gap {
            warn!(
                cache = M::KIND,
                symbol = %self.model.symbol(),
                local = ?self.model.position(),
                event = ?M::event_position(event),
                "Gap persists after resync, dropping event and resetting"
            );
            self.reset();
            Metrics::resync(M::KIND, "unresolved");
            Metrics::event_dropped(M::KIND, "gap");
            return Ok(false);
        }

        self.status = SyncStatus::Synced;
        Metrics::resync(M::KIND, "resolved");
        info!(
            cache = M::KIND,
            symbol = %self.model.symbol(),
            local = ?self.model.position(),
            "Resynced"
        );
        Ok(true)
    }

    fn reset(&mut self) {
        self.model.clear();
        self.status = SyncStatus::Uninitialized;
        self.baseline_pending = false;
    }
}

/// Callback invoked with every published update.
pub type UpdateCallback<U> = Arc<dyn Fn(&U) + Send + Sync>;

struct CacheInner<M: SyncModel> {
    push: Arc<dyn PushSource>,
    rest: Arc<dyn RestSource>,
    limiter: Arc<CompositeRateLimiter>,
    config: M::Config,
    subscriptions: Mutex<HashSet<String>>,
    latest: DashMap<String, M::Update>,
    updates: broadcast::Sender<M::Update>,
}

/// Push-fed cache kept consistent through a `SyncModel`.
pub struct SyncCache<M: SyncModel> {
    inner: Arc<CacheInner<M>>,
}

impl<M: SyncModel> Clone for SyncCache<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: SyncModel> SyncCache<M> {
    pub fn new(
        push: Arc<dyn PushSource>,
        rest: Arc<dyn RestSource>,
        limiter: Arc<CompositeRateLimiter>,
        config: M::Config,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                push,
                rest,
                limiter,
                config,
                subscriptions: Mutex::new(HashSet::new()),
                latest: DashMap::new(),
                updates,
            }),
        }
    }

    pub fn config(&self) -> &M::Config {
        &self.inner.config
    }

    /// Run one subscription for `symbol` until the push stream ends.
    ///
    /// Every run starts from a fresh model, so a restarted subscription
    /// bootstraps again. Resolves to `Ok(())` when `cancel` fires and to the
    /// transport error otherwise. Queued events are abandoned on
    /// cancellation and drained when the stream fails.
    pub async fn subscribe(
        &self,
        symbol: &str,
        callback: Option<UpdateCallback<M::Update>>,
        cancel: CancellationToken,
    ) -> FeedResult<()> {
        let _registration = Registration::acquire(&self.inner, symbol)?;

        let stream = M::stream_name(symbol, &self.inner.config);
        let worker = SyncWorker::<M> {
            sync: Synchronizer::new(M::new(symbol, &self.inner.config)),
            ctx: SyncContext {
                rest: Arc::clone(&self.inner.rest),
                limiter: Arc::clone(&self.inner.limiter),
                cancel: cancel.clone(),
            },
            publisher: Publisher {
                inner: Arc::clone(&self.inner),
                symbol: symbol.to_string(),
                callback,
            },
        };
        let pipeline = Arc::new(OrderedEventPipeline::spawn(
            format!("{}:{}", M::KIND, symbol),
            worker,
            &cancel,
        ));

        let producer = Arc::clone(&pipeline);
        let handler: MessageHandler = Arc::new(move |msg: PushMessage| {
            if !producer.post(msg) {
                trace!(pipeline = producer.name(), "Pipeline closed, message discarded");
            }
        });

        info!(cache = M::KIND, %symbol, %stream, "Subscribing");
        let result = self
            .inner
            .push
            .subscribe_and_run(&stream, handler, cancel.clone())
            .await;

        // The push source has released the handler; nothing posts past here.
        pipeline.complete();
        if cancel.is_cancelled() {
            pipeline.shutdown().await;
        } else {
            pipeline.wait().await;
        }

        match result {
            Ok(()) => {
                debug!(cache = M::KIND, %symbol, "Subscription ended");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(FeedError::Ws(e)),
        }
    }

    /// Last update published for `symbol`.
    pub fn latest(&self, symbol: &str) -> Option<M::Update> {
        self.inner.latest.get(symbol).map(|u| u.value().clone())
    }

    /// Receiver for every update this cache publishes, all symbols.
    pub fn updates(&self) -> broadcast::Receiver<M::Update> {
        self.inner.updates.subscribe()
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.inner.subscriptions.lock().contains(symbol)
    }
}

/// Marks a symbol as subscribed for the lifetime of one `subscribe` call.
struct Registration<M: SyncModel> {
    inner: Arc<CacheInner<M>>,
    symbol: String,
}

impl<M: SyncModel> Registration<M> {
    fn acquire(inner: &Arc<CacheInner<M>>, symbol: &str) -> FeedResult<Self> {
        if !inner.subscriptions.lock().insert(symbol.to_string()) {
            return Err(FeedError::AlreadySubscribed(format!("{}:{}", M::KIND, symbol)));
        }
        Ok(Self {
            inner: Arc::clone(inner),
            symbol: symbol.to_string(),
        })
    }
}

impl<M: SyncModel> Drop for Registration<M> {
    fn drop(&mut self) {
        self.inner.subscriptions.lock().remove(&self.symbol);
    }
}

struct Publisher<M: SyncModel> {
    inner: Arc<CacheInner<M>>,
    symbol: String,
    callback: Option<UpdateCallback<M::Update>>,
}

impl<M: SyncModel> Publisher<M> {
    fn publish(&self, update: M::Update) {
        self.inner.latest.insert(self.symbol.clone(), update.clone());
        Metrics::snapshot_published(M::KIND);

        if let Some(callback) = &self.callback {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&update)));
            if outcome.is_err() {
                error!(cache = M::KIND, symbol = %self.symbol, "Update callback panicked");
            }
        }

        // No receivers is not an error.
        let _ = self.inner.updates.send(update);
    }
}

struct SyncWorker<M: SyncModel> {
    sync: Synchronizer<M>,
    ctx: SyncContext,
    publisher: Publisher<M>,
}

impl<M: SyncModel> EventHandler<PushMessage> for SyncWorker<M> {
    fn handle(&mut self, msg: PushMessage) -> impl Future<Output = FeedResult<()>> + Send {
        async move {
            if let Some(update) = self.sync.process(&msg.payload, &self.ctx).await? {
                self.publisher.publish(update);
            }
            Ok(())
        }
    }
}
