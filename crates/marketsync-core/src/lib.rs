//! Core market data types for marketsync.
//!
//! This crate provides the values shared by every cache and collaborator:
//! - `Price`, `Size`: precision-safe numeric types
//! - `DiffEvent`, `OrderBookSnapshot`: order book sequencing primitives
//! - `Trade`, `Candle`: trade tape and candlestick records
//! - `OrderKind`, `OrderRequest`: closed order-type variant validated at construction

pub mod decimal;
pub mod error;
pub mod order;
pub mod types;

pub use decimal::{Price, Size};
pub use error::{CoreError, CoreResult};
pub use order::{OrderKind, OrderRequest, OrderSide, TimeInForce};
pub use types::{BookTop, Candle, CandleInterval, DiffEvent, Level, OrderBookSnapshot, Trade};
