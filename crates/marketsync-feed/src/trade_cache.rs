//! Recent-trades cache: history fetch bootstrap plus streamed trades.

use crate::error::FeedResult;
use crate::parser::{parse_push, PushEvent};
use crate::sync::{Continuity, SyncCache, SyncContext, SyncModel};
use crate::trade_window::{TradeAction, TradeWindowState};
use marketsync_core::Trade;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

fn default_capacity() -> usize {
    500
}

fn default_stream_suffix() -> String {
    "@trade".to_string()
}

fn default_request_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCacheConfig {
    /// Trades kept in the window (and requested on bootstrap).
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_stream_suffix")]
    pub stream_suffix: String,
    #[serde(default = "default_request_weight")]
    pub request_weight: u32,
}

impl Default for TradeCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            stream_suffix: default_stream_suffix(),
            request_weight: default_request_weight(),
        }
    }
}

/// Published trade window.
#[derive(Debug, Clone)]
pub struct TradeWindowUpdate {
    /// Oldest first.
    pub trades: Arc<[Trade]>,
    /// Ids that were not in the previously published window.
    pub new_trade_ids: Vec<u64>,
}

pub type TradeCache = SyncCache<TradeWindowModel>;

pub struct TradeWindowModel {
    symbol: String,
    config: TradeCacheConfig,
    window: TradeWindowState,
    /// Newest id included in the last published update.
    published_through: Option<u64>,
}

impl TradeWindowModel {
    pub fn window(&self) -> &TradeWindowState {
        &self.window
    }

    fn build_update(&mut self) -> TradeWindowUpdate {
        let trades = self.window.snapshot();
        let new_trade_ids = trades
            .iter()
            .map(|t| t.id)
            .filter(|id| self.published_through.map_or(true, |p| *id > p))
            .collect();
        self.published_through = self.window.last_id();
        TradeWindowUpdate {
            trades,
            new_trade_ids,
        }
    }
}

impl SyncModel for TradeWindowModel {
    type Config = TradeCacheConfig;
    type Update = TradeWindowUpdate;
    type Event = Trade;
    type Position = u64;
    const KIND: &'static str = "trades";

    fn new(symbol: &str, config: &TradeCacheConfig) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            config: config.clone(),
            window: TradeWindowState::new(symbol.to_uppercase(), config.capacity),
            published_through: None,
        }
    }

    fn stream_name(symbol: &str, config: &TradeCacheConfig) -> String {
        format!("{}{}", symbol.to_lowercase(), config.stream_suffix)
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn decode(&self, payload: &str) -> FeedResult<Option<Trade>> {
        match parse_push(payload)? {
            PushEvent::Trade { trade, .. } => Ok(Some(trade)),
            _ => Ok(None),
        }
    }

    fn fetch_baseline(&mut self, ctx: &SyncContext) -> impl Future<Output = FeedResult<()>> + Send {
        async move {
            ctx.throttle(self.config.request_weight).await?;
            let limit = u32::try_from(self.config.capacity).unwrap_or(u32::MAX);
            let history = ctx
                .rest
                .get_recent_trades(&self.symbol, limit, ctx.cancel.clone())
                .await?;

            self.window.reset_with(history);
            debug!(
                symbol = %self.symbol,
                trades = self.window.len(),
                last_id = ?self.window.last_id(),
                "Trade history applied"
            );
            Ok(())
        }
    }

    fn continuity(&self, trade: &Trade) -> Continuity {
        match self.window.classify(trade) {
            TradeAction::Stale => Continuity::Stale,
            TradeAction::Append => Continuity::Contiguous,
            TradeAction::Gap => Continuity::Gap,
        }
    }

    fn apply(&mut self, trade: Trade) -> TradeWindowUpdate {
        self.window.push(trade);
        self.build_update()
    }

    fn baseline_update(&mut self) -> Option<TradeWindowUpdate> {
        Some(self.build_update())
    }

    fn clear(&mut self) {
        self.window.clear();
    }

    fn position(&self) -> Option<u64> {
        self.window.last_id()
    }

    fn event_position(trade: &Trade) -> u64 {
        trade.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{SyncStatus, Synchronizer};
    use chrono::Utc;
    use marketsync_core::{Price, Size};
    use marketsync_rest::{CompositeRateLimiter, MockRestSource, RestError};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use tokio_util::sync::CancellationToken;

    fn trade(id: u64) -> Trade {
        Trade::new(id, Price::new(dec!(100)), Size::new(dec!(1)), Utc::now())
    }

    fn trade_payload(id: u64) -> String {
        serde_json::json!({
            "e": "trade", "E": 1, "s": "BTCUSDT", "t": id,
            "p": "100.0", "q": "1.0", "T": 1_700_000_000_000i64, "m": false
        })
        .to_string()
    }

    fn rest_serving(histories: Vec<Vec<u64>>) -> MockRestSource {
        let expected = histories.len();
        let queue = Mutex::new(histories.into_iter());
        let mut rest = MockRestSource::new();
        rest.expect_get_recent_trades()
            .times(expected)
            .returning(move |_, _, _| {
                let ids = queue.lock().next().unwrap_or_default();
                let trades: Vec<Trade> = ids.into_iter().map(trade).collect();
                Box::pin(async move { Ok::<_, RestError>(trades) })
            });
        rest
    }

    fn ctx(rest: MockRestSource) -> SyncContext {
        SyncContext {
            rest: Arc::new(rest),
            limiter: Arc::new(CompositeRateLimiter::new()),
            cancel: CancellationToken::new(),
        }
    }

    fn synchronizer(capacity: usize) -> Synchronizer<TradeWindowModel> {
        let config = TradeCacheConfig {
            capacity,
            ..Default::default()
        };
        Synchronizer::new(TradeWindowModel::new("btcusdt", &config))
    }

    #[tokio::test]
    async fn test_append_evicts_then_gap_triggers_history_resync() {
        let ctx = ctx(rest_serving(vec![vec![10, 11, 12], vec![12, 13, 14, 15]]));
        let mut sync = synchronizer(3);

        let update = sync.process(&trade_payload(13), &ctx).await.unwrap().unwrap();
        assert_eq!(sync.model().window().ids(), vec![11, 12, 13]);
        assert_eq!(update.trades.len(), 3);
        assert_eq!(update.new_trade_ids, vec![11, 12, 13]);

        // 14 is missing: one history fetch, which already contains 15.
        let update = sync.process(&trade_payload(15), &ctx).await.unwrap().unwrap();
        assert_eq!(sync.status(), SyncStatus::Synced);
        assert_eq!(sync.model().window().ids(), vec![13, 14, 15]);
        assert_eq!(update.new_trade_ids, vec![14, 15]);
    }

    #[tokio::test]
    async fn test_gap_resolved_by_resync_then_appended() {
        let ctx = ctx(rest_serving(vec![vec![1, 2], vec![2, 3, 4]]));
        let mut sync = synchronizer(10);

        sync.process(&trade_payload(3), &ctx).await.unwrap();
        let update = sync.process(&trade_payload(5), &ctx).await.unwrap().unwrap();

        // The fetched history replaces the window.
        assert_eq!(sync.model().window().ids(), vec![2, 3, 4, 5]);
        assert_eq!(update.new_trade_ids, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_unresolved_gap_drops_and_resets() {
        let ctx = ctx(rest_serving(vec![vec![1, 2], vec![1, 2, 3], vec![20, 21]]));
        let mut sync = synchronizer(10);

        sync.process(&trade_payload(3), &ctx).await.unwrap();
        assert!(sync.process(&trade_payload(9), &ctx).await.unwrap().is_none());
        assert_eq!(sync.status(), SyncStatus::Uninitialized);
        assert!(sync.model().window().is_empty());

        let update = sync.process(&trade_payload(22), &ctx).await.unwrap().unwrap();
        assert_eq!(sync.model().window().ids(), vec![20, 21, 22]);
        assert_eq!(update.new_trade_ids, vec![20, 21, 22]);
    }

    #[tokio::test]
    async fn test_duplicate_trade_is_stale() {
        let ctx = ctx(rest_serving(vec![vec![1, 2]]));
        let mut sync = synchronizer(10);

        sync.process(&trade_payload(3), &ctx).await.unwrap();
        assert!(sync.process(&trade_payload(3), &ctx).await.unwrap().is_none());
        assert!(sync.process(&trade_payload(1), &ctx).await.unwrap().is_none());
        assert_eq!(sync.model().window().ids(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_history_accepts_first_trade() {
        let ctx = ctx(rest_serving(vec![vec![]]));
        let mut sync = synchronizer(10);

        let update = sync.process(&trade_payload(42), &ctx).await.unwrap().unwrap();
        assert_eq!(update.new_trade_ids, vec![42]);
        assert_eq!(
            TradeWindowModel::stream_name("BTCUSDT", &TradeCacheConfig::default()),
            "btcusdt@trade"
        );
    }
}
