//! marketsync application.
//!
//! Wires the caches to real collaborators:
//! - `WsPushSource` for streamed diffs, trades and klines
//! - `RestClient` behind one shared `CompositeRateLimiter`
//! - One `RetryController` per (cache, symbol) subscription

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::{AppConfig, RateLimitConfig};
pub use error::{AppError, AppResult};
