//! REST collaborator used by caches to bootstrap and resynchronize.

use crate::error::RestResult;
use futures_util::future::BoxFuture;
use marketsync_core::{Candle, CandleInterval, OrderBookSnapshot, Trade};
use tokio_util::sync::CancellationToken;

/// Async snapshot and history fetches.
///
/// Futures are boxed and `'static` so the trait stays object safe and can
/// be shared as `Arc<dyn RestSource>`. Implementations must abort with
/// `RestError::Cancelled` once `cancel` fires. Rate limiting is the
/// caller's job.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait RestSource: Send + Sync {
    /// Full order book, tagged with the sequence id it reflects.
    fn get_order_book_snapshot(
        &self,
        symbol: &str,
        limit: u32,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, RestResult<OrderBookSnapshot>>;

    /// Most recent trades, oldest first.
    fn get_recent_trades(
        &self,
        symbol: &str,
        limit: u32,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, RestResult<Vec<Trade>>>;

    /// Most recent candles for `interval`, oldest first.
    fn get_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        limit: u32,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, RestResult<Vec<Candle>>>;
}
