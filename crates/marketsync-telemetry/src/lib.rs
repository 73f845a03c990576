//! Prometheus metrics and structured logging for marketsync.
//!
//! - Prometheus counters for resyncs, dropped events, stream restarts
//! - Rate-limit wait histogram
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
