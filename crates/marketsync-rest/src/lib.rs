//! REST collaborator for marketsync caches.
//!
//! Provides:
//! - Sliding-window rate limiting (`RateLimiter`, `CompositeRateLimiter`)
//! - The `RestSource` trait caches use to bootstrap and resynchronize
//! - `RestClient`, a reqwest implementation against a Binance-shaped API

pub mod client;
pub mod error;
pub mod rate_limiter;
pub mod responses;
pub mod source;

pub use client::{RestClient, RestConfig};
pub use error::{RestError, RestResult};
pub use rate_limiter::{CompositeRateLimiter, RateLimitRule, RateLimiter};
pub use source::RestSource;

#[cfg(any(test, feature = "mock"))]
pub use source::MockRestSource;
