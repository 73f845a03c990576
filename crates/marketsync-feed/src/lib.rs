//! Synchronized market data caches for marketsync.
//!
//! Merges streamed diff events into locally owned state that stays
//! consistent with the server:
//! - `OrderedEventPipeline`: single-consumer, strictly ordered event queue
//! - `OrderBookState`, `TradeWindowState`, `CandleWindowState`: cache state
//! - `Synchronizer`: snapshot bootstrap, gap detection and resync policy
//! - `SyncCache`: per-symbol subscriptions and publishing
//! - `OrderBookCache`, `TradeCache`, `CandleCache`: concrete caches

pub mod book;
pub mod candle_cache;
pub mod candles;
pub mod error;
pub mod order_book_cache;
pub mod parser;
pub mod pipeline;
pub mod sync;
pub mod trade_cache;
pub mod trade_window;

pub use book::{DiffAction, OrderBookState, OrderBookView};
pub use candle_cache::{CandleCache, CandleCacheConfig, CandleModel, CandleUpdate};
pub use candles::{CandleAction, CandleWindowState};
pub use error::{FeedError, FeedResult};
pub use order_book_cache::{OrderBookCache, OrderBookConfig, OrderBookModel, OrderBookUpdate};
pub use parser::{parse_push, PushEvent};
pub use pipeline::{EventHandler, OrderedEventPipeline};
pub use sync::{
    Continuity, SyncCache, SyncContext, SyncModel, SyncStatus, Synchronizer, UpdateCallback,
};
pub use trade_cache::{TradeCache, TradeCacheConfig, TradeWindowModel, TradeWindowUpdate};
pub use trade_window::{TradeAction, TradeWindowState};
