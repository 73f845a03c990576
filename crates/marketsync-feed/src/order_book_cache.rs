//! Order book cache: REST snapshot bootstrap plus streamed depth diffs.

use crate::book::{DiffAction, OrderBookState, OrderBookView};
use crate::error::FeedResult;
use crate::parser::{parse_push, PushEvent};
use crate::sync::{Continuity, SyncCache, SyncContext, SyncModel};
use marketsync_core::{DiffEvent, Level};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

fn default_snapshot_limit() -> u32 {
    1000
}

fn default_stream_suffix() -> String {
    "@depth@100ms".to_string()
}

fn default_request_weight() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookConfig {
    /// Levels requested per side when fetching a snapshot.
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: u32,
    /// Levels per side in published views (None = full book).
    #[serde(default)]
    pub publish_depth: Option<usize>,
    #[serde(default = "default_stream_suffix")]
    pub stream_suffix: String,
    /// Rate-limit weight of one snapshot request.
    #[serde(default = "default_request_weight")]
    pub request_weight: u32,
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            snapshot_limit: default_snapshot_limit(),
            publish_depth: None,
            stream_suffix: default_stream_suffix(),
            request_weight: default_request_weight(),
        }
    }
}

/// Published order book state.
#[derive(Debug, Clone)]
pub struct OrderBookUpdate {
    pub snapshot: Arc<OrderBookView>,
    pub best_bid: Option<Level>,
    pub best_ask: Option<Level>,
    /// Range of the diff that produced this update. Both equal the
    /// snapshot's sequence id when the update follows a fresh fetch.
    pub first_sequence_id: u64,
    pub last_sequence_id: u64,
}

pub type OrderBookCache = SyncCache<OrderBookModel>;

pub struct OrderBookModel {
    symbol: String,
    config: OrderBookConfig,
    state: OrderBookState,
}

impl OrderBookModel {
    pub fn state(&self) -> &OrderBookState {
        &self.state
    }

    fn build_update(&self, range: Option<(u64, u64)>) -> OrderBookUpdate {
        let snapshot = self.state.view(self.config.publish_depth);
        let last = self.state.last_sequence_id();
        let (first_sequence_id, last_sequence_id) = range.unwrap_or((last, last));
        OrderBookUpdate {
            best_bid: snapshot.bids.first().copied(),
            best_ask: snapshot.asks.first().copied(),
            snapshot: Arc::new(snapshot),
            first_sequence_id,
            last_sequence_id,
        }
    }
}

impl SyncModel for OrderBookModel {
    type Config = OrderBookConfig;
    type Update = OrderBookUpdate;
    type Event = DiffEvent;
    type Position = u64;
    const KIND: &'static str = "order_book";

    fn new(symbol: &str, config: &OrderBookConfig) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            config: config.clone(),
            state: OrderBookState::new(symbol.to_uppercase()),
        }
    }

    fn stream_name(symbol: &str, config: &OrderBookConfig) -> String {
        format!("{}{}", symbol.to_lowercase(), config.stream_suffix)
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn decode(&self, payload: &str) -> FeedResult<Option<DiffEvent>> {
        match parse_push(payload)? {
            PushEvent::Depth(event) => Ok(Some(event)),
            _ => Ok(None),
        }
    }

    fn fetch_baseline(&mut self, ctx: &SyncContext) -> impl Future<Output = FeedResult<()>> + Send {
        async move {
            ctx.throttle(self.config.request_weight).await?;
            let limit = self.config.snapshot_limit;
            let snapshot = ctx
                .rest
                .get_order_book_snapshot(&self.symbol, limit, ctx.cancel.clone())
                .await?;

            self.state.apply_snapshot(&snapshot);
            debug!(
                symbol = %self.symbol,
                last_sequence_id = snapshot.last_sequence_id,
                bids = self.state.bid_depth(),
                asks = self.state.ask_depth(),
                "Order book snapshot applied"
            );
            Ok(())
        }
    }

    fn continuity(&self, event: &DiffEvent) -> Continuity {
        match self.state.classify(event) {
            DiffAction::Stale => Continuity::Stale,
            DiffAction::Apply => Continuity::Contiguous,
            DiffAction::Gap => Continuity::Gap,
        }
    }

    fn apply(&mut self, event: DiffEvent) -> OrderBookUpdate {
        self.state.apply(&event);
        self.build_update(Some((event.first_sequence_id, event.last_sequence_id)))
    }

    fn baseline_update(&mut self) -> Option<OrderBookUpdate> {
        Some(self.build_update(None))
    }

    fn clear(&mut self) {
        self.state.clear();
    }

    fn position(&self) -> Option<u64> {
        Some(self.state.last_sequence_id())
    }

    fn event_position(event: &DiffEvent) -> u64 {
        event.first_sequence_id
    }
}
