//! Prometheus metrics for marketsync.
//!
//! Covers the synchronization engine:
//! - Resync attempts and outcomes per cache kind
//! - Dropped events (stale, unresolved gap, failed fetch)
//! - Published snapshots
//! - Rate-limit waits
//! - Stream restarts and watchdog elapses
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. Registration only fails on
//! duplicate metric names, which is a programming error caught at startup.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};

/// Resync attempts.
/// Labels: cache (order_book/trades/candles), outcome (resolved/unresolved/failed)
pub static RESYNC_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "marketsync_resync_total",
        "Resync attempts after a detected sequence gap",
        &["cache", "outcome"]
    )
    .unwrap()
});

/// Events discarded by a cache.
/// Labels: cache, reason (stale/gap/fetch_failed/parse)
pub static EVENTS_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "marketsync_events_dropped_total",
        "Events discarded without being applied",
        &["cache", "reason"]
    )
    .unwrap()
});

/// Snapshots handed to callbacks and subscribers.
pub static SNAPSHOTS_PUBLISHED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "marketsync_snapshots_published_total",
        "Immutable snapshots published by a cache",
        &["cache"]
    )
    .unwrap()
});

/// Time spent waiting on a rate-limit window, in milliseconds.
pub static RATE_LIMIT_DELAY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "marketsync_rate_limit_delay_ms",
        "Delay imposed by a rate-limit window in milliseconds",
        &["window"],
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0, 60000.0]
    )
    .unwrap()
});

/// Stream actions restarted by a retry controller.
pub static STREAM_RESTARTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "marketsync_stream_restarts_total",
        "Stream actions restarted after a failure"
    )
    .unwrap()
});

/// Watchdog intervals that elapsed without a kick.
pub static WATCHDOG_ELAPSED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "marketsync_watchdog_elapsed_total",
        "Watchdog intervals elapsed without activity"
    )
    .unwrap()
});

/// Event handler failures swallowed by a pipeline.
pub static PIPELINE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "marketsync_pipeline_errors_total",
        "Event handler errors logged and skipped by a pipeline",
        &["pipeline"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record a resync attempt outcome.
    pub fn resync(cache: &str, outcome: &str) {
        RESYNC_TOTAL.with_label_values(&[cache, outcome]).inc();
    }

    /// Record a dropped event.
    pub fn event_dropped(cache: &str, reason: &str) {
        EVENTS_DROPPED_TOTAL.with_label_values(&[cache, reason]).inc();
    }

    /// Record a published snapshot.
    pub fn snapshot_published(cache: &str) {
        SNAPSHOTS_PUBLISHED_TOTAL.with_label_values(&[cache]).inc();
    }

    /// Record a rate-limit wait for a window label (e.g. "1s", "60s").
    pub fn rate_limit_delay(window: &str, delay_ms: f64) {
        RATE_LIMIT_DELAY_MS
            .with_label_values(&[window])
            .observe(delay_ms);
    }

    /// Record a stream restart.
    pub fn stream_restart() {
        STREAM_RESTARTS_TOTAL.inc();
    }

    /// Record a watchdog elapse.
    pub fn watchdog_elapsed() {
        WATCHDOG_ELAPSED_TOTAL.inc();
    }

    /// Record a swallowed pipeline error.
    pub fn pipeline_error(pipeline: &str) {
        PIPELINE_ERRORS_TOTAL.with_label_values(&[pipeline]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
