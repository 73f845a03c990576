//! Candlestick cache: kline history bootstrap plus streamed kline updates.

use crate::candles::{CandleAction, CandleWindowState};
use crate::error::FeedResult;
use crate::parser::{parse_push, PushEvent};
use crate::sync::{Continuity, SyncCache, SyncContext, SyncModel};
use marketsync_core::{Candle, CandleInterval};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

fn default_capacity() -> usize {
    500
}

fn default_request_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleCacheConfig {
    #[serde(default)]
    pub interval: CandleInterval,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_request_weight")]
    pub request_weight: u32,
}

impl Default for CandleCacheConfig {
    fn default() -> Self {
        Self {
            interval: CandleInterval::default(),
            capacity: default_capacity(),
            request_weight: default_request_weight(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandleUpdate {
    /// Oldest first.
    pub candles: Arc<[Candle]>,
    /// Open time of the candle that changed, or of the newest candle after
    /// a fetch.
    pub updated_open_time: i64,
}

pub type CandleCache = SyncCache<CandleModel>;

pub struct CandleModel {
    symbol: String,
    config: CandleCacheConfig,
    window: CandleWindowState,
}

impl CandleModel {
    pub fn window(&self) -> &CandleWindowState {
        &self.window
    }
}

impl SyncModel for CandleModel {
    type Config = CandleCacheConfig;
    type Update = CandleUpdate;
    type Event = Candle;
    type Position = i64;
    const KIND: &'static str = "candles";

    fn new(symbol: &str, config: &CandleCacheConfig) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            config: config.clone(),
            window: CandleWindowState::new(symbol.to_uppercase(), config.interval, config.capacity),
        }
    }

    fn stream_name(symbol: &str, config: &CandleCacheConfig) -> String {
        format!("{}@kline_{}", symbol.to_lowercase(), config.interval)
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Klines for other intervals are ignored.
    fn decode(&self, payload: &str) -> FeedResult<Option<Candle>> {
        match parse_push(payload)? {
            PushEvent::Kline {
                interval, candle, ..
            } if interval == self.config.interval => Ok(Some(candle)),
            _ => Ok(None),
        }
    }

    fn fetch_baseline(&mut self, ctx: &SyncContext) -> impl Future<Output = FeedResult<()>> + Send {
        async move {
            ctx.throttle(self.config.request_weight).await?;
            let limit = u32::try_from(self.config.capacity).unwrap_or(u32::MAX);
            let history = ctx
                .rest
                .get_candles(&self.symbol, self.config.interval, limit, ctx.cancel.clone())
                .await?;

            self.window.reset_with(history);
            debug!(
                symbol = %self.symbol,
                interval = %self.config.interval,
                candles = self.window.len(),
                "Candle history applied"
            );
            Ok(())
        }
    }

    fn continuity(&self, candle: &Candle) -> Continuity {
        match self.window.classify(candle) {
            CandleAction::Stale => Continuity::Stale,
            CandleAction::Replace | CandleAction::Append => Continuity::Contiguous,
            CandleAction::Gap => Continuity::Gap,
        }
    }

    fn apply(&mut self, candle: Candle) -> CandleUpdate {
        let updated_open_time = candle.open_time_ms;
        self.window.apply(candle);
        CandleUpdate {
            candles: self.window.snapshot(),
            updated_open_time,
        }
    }

    /// `None` while the fetched history is empty.
    fn baseline_update(&mut self) -> Option<CandleUpdate> {
        let updated_open_time = self.window.latest()?.open_time_ms;
        Some(CandleUpdate {
            candles: self.window.snapshot(),
            updated_open_time,
        })
    }

    fn clear(&mut self) {
        self.window.clear();
    }

    fn position(&self) -> Option<i64> {
        self.window.latest().map(|c| c.open_time_ms)
    }

    fn event_position(candle: &Candle) -> i64 {
        candle.open_time_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{SyncStatus, Synchronizer};
    use marketsync_core::{Price, Size};
    use marketsync_rest::{CompositeRateLimiter, MockRestSource, RestError};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use tokio_util::sync::CancellationToken;

    const MINUTE: i64 = 60_000;

    fn candle(open_time_ms: i64) -> Candle {
        Candle {
            open_time_ms,
            close_time_ms: open_time_ms + MINUTE - 1,
            open: Price::new(dec!(1)),
            high: Price::new(dec!(1)),
            low: Price::new(dec!(1)),
            close: Price::new(dec!(1)),
            volume: Size::new(dec!(1)),
            is_closed: true,
        }
    }

    fn kline_payload(open_time_ms: i64, close: &str, interval: &str) -> String {
        serde_json::json!({
            "e": "kline", "E": 1, "s": "BTCUSDT",
            "k": {
                "t": open_time_ms, "T": open_time_ms + MINUTE - 1, "i": interval,
                "o": "1", "h": "2", "l": "1", "c": close, "v": "10", "x": false
            }
        })
        .to_string()
    }

    fn rest_serving(histories: Vec<Vec<i64>>) -> MockRestSource {
        let expected = histories.len();
        let queue = Mutex::new(histories.into_iter());
        let mut rest = MockRestSource::new();
        rest.expect_get_candles()
            .times(expected)
            .returning(move |_, _, _, _| {
                let opens = queue.lock().next().unwrap_or_default();
                let candles: Vec<Candle> = opens.into_iter().map(candle).collect();
                Box::pin(async move { Ok::<_, RestError>(candles) })
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

    fn synchronizer() -> Synchronizer<CandleModel> {
        let config = CandleCacheConfig {
            capacity: 3,
            ..Default::default()
        };
        Synchronizer::new(CandleModel::new("btcusdt", &config))
    }

    #[tokio::test]
    async fn test_replace_then_append() {
        let ctx = ctx(rest_serving(vec![vec![0, MINUTE]]));
        let mut sync = synchronizer();

        let update = sync
            .process(&kline_payload(MINUTE, "5", "1m"), &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.updated_open_time, MINUTE);
        assert_eq!(update.candles.len(), 2);
        assert_eq!(update.candles[1].close, Price::new(dec!(5)));

        let update = sync
            .process(&kline_payload(2 * MINUTE, "6", "1m"), &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.candles.len(), 3);
        assert_eq!(update.updated_open_time, 2 * MINUTE);
    }

    #[tokio::test]
    async fn test_gap_resync_once_then_drop() {
        let ctx = ctx(rest_serving(vec![vec![0], vec![0, MINUTE], vec![9 * MINUTE]]));
        let mut sync = synchronizer();

        sync.process(&kline_payload(0, "1", "1m"), &ctx).await.unwrap();
        // 5m ahead: one resync that only reaches 1m, then drop.
        let dropped = sync
            .process(&kline_payload(5 * MINUTE, "1", "1m"), &ctx)
            .await
            .unwrap();
        assert!(dropped.is_none());
        assert_eq!(sync.status(), SyncStatus::Uninitialized);

        let update = sync
            .process(&kline_payload(10 * MINUTE, "1", "1m"), &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.updated_open_time, 10 * MINUTE);
        assert_eq!(sync.status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_other_interval_ignored() {
        let ctx = ctx(MockRestSource::new());
        let mut sync = synchronizer();
        let result = sync
            .process(&kline_payload(0, "1", "5m"), &ctx)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(sync.status(), SyncStatus::Uninitialized);
    }

    #[test]
    fn test_stream_name() {
        let config = CandleCacheConfig {
            interval: CandleInterval::FifteenMinutes,
            ..Default::default()
        };
        assert_eq!(CandleModel::stream_name("BTCUSDT", &config), "btcusdt@kline_15m");
    }
}
