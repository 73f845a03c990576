//! Application configuration.

use crate::error::{AppError, AppResult};
use marketsync_feed::{CandleCacheConfig, OrderBookConfig, TradeCacheConfig};
use marketsync_rest::{RateLimitRule, RestConfig};
use marketsync_ws::{RetryConfig, WsSourceConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// One sliding-window request limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_count: u32,
}

fn default_rate_limits() -> Vec<RateLimitConfig> {
    vec![
        // Sustained: 1200 requests per minute.
        RateLimitConfig {
            window_ms: 60_000,
            max_count: 1200,
        },
        // Burst: 100 requests per second.
        RateLimitConfig {
            window_ms: 1_000,
            max_count: 100,
        },
    ]
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub ws: WsSourceConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_rate_limits")]
    pub rate_limits: Vec<RateLimitConfig>,
    #[serde(default)]
    pub order_book: OrderBookConfig,
    #[serde(default)]
    pub trades: TradeCacheConfig,
    #[serde(default)]
    pub candles: CandleCacheConfig,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rest: RestConfig::default(),
            ws: WsSourceConfig::default(),
            retry: RetryConfig::default(),
            rate_limits: default_rate_limits(),
            order_book: OrderBookConfig::default(),
            trades: TradeCacheConfig::default(),
            candles: CandleCacheConfig::default(),
            symbols: default_symbols(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Like `from_file`, but a missing file yields the defaults.
    pub fn load(path: &str) -> AppResult<Self> {
        if !Path::new(path).exists() {
            warn!(path, "Config file not found, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::from_file(path)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.symbols.is_empty() {
            return Err(AppError::Config("symbols must not be empty".to_string()));
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(AppError::Config("symbols must not contain blanks".to_string()));
        }
        let mut seen = HashSet::new();
        for symbol in &self.symbols {
            if !seen.insert(symbol.trim().to_uppercase()) {
                return Err(AppError::Config(format!("duplicate symbol {symbol}")));
            }
        }
        if self.trades.capacity == 0 {
            return Err(AppError::Config("trades.capacity must be positive".to_string()));
        }
        if self.candles.capacity == 0 {
            return Err(AppError::Config("candles.capacity must be positive".to_string()));
        }
        if self.order_book.snapshot_limit == 0 {
            return Err(AppError::Config(
                "order_book.snapshot_limit must be positive".to_string(),
            ));
        }
        for limit in &self.rate_limits {
            if limit.max_count == 0 || limit.window_ms == 0 {
                return Err(AppError::Config(format!(
                    "invalid rate limit {}ms/{}: window and count must be positive",
                    limit.window_ms, limit.max_count
                )));
            }
        }
        let mut windows = HashSet::new();
        for limit in &self.rate_limits {
            if !windows.insert(limit.window_ms) {
                return Err(AppError::Config(format!(
                    "duplicate rate limit window {}ms",
                    limit.window_ms
                )));
            }
        }
        Ok(())
    }

    pub fn rate_limit_rules(&self) -> AppResult<Vec<RateLimitRule>> {
        self.rate_limits
            .iter()
            .map(|l| {
                RateLimitRule::new(Duration::from_millis(l.window_ms), l.max_count)
                    .map_err(AppError::from)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketsync_core::CandleInterval;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.symbols, vec!["BTCUSDT".to_string()]);
        assert_eq!(config.rate_limits, default_rate_limits());
        assert_eq!(config.retry.delay_ms, 5_000);
        assert_eq!(config.order_book.snapshot_limit, 1000);
        assert_eq!(config.trades.capacity, 500);
    }

    #[test]
    fn test_parse_full_config() {
        let content = r#"
            symbols = ["BTCUSDT", "ETHUSDT"]

            [rest]
            base_url = "http://localhost:8080"

            [ws]
            base_url = "ws://localhost:9000/ws"
            watchdog_interval_ms = 0

            [retry]
            delay_ms = 250
            max_attempts = 3

            [[rate_limits]]
            window_ms = 10000
            max_count = 50

            [order_book]
            publish_depth = 20

            [candles]
            interval = "5m"
            capacity = 100
        "#;
        let config = AppConfig::from_toml(content).unwrap();

        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.rest.base_url, "http://localhost:8080");
        assert_eq!(config.ws.watchdog_interval_ms, 0);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.order_book.publish_depth, Some(20));
        assert_eq!(config.candles.interval, CandleInterval::FiveMinutes);

        let rules = config.rate_limit_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].duration, Duration::from_secs(10));
        assert_eq!(rules[0].max_count, 50);
    }

    #[test]
    fn test_validation_failures() {
        assert!(AppConfig::from_toml("symbols = []").is_err());
        assert!(AppConfig::from_toml("[trades]\ncapacity = 0").is_err());
        assert!(AppConfig::from_toml("[[rate_limits]]\nwindow_ms = 1000\nmax_count = 0").is_err());
        assert!(AppConfig::from_toml("symbols = 5").is_err());
    }

    #[test]
    fn test_duplicate_symbols_and_windows_rejected() {
        let exact = AppConfig::from_toml(r#"symbols = ["BTCUSDT", "BTCUSDT"]"#);
        assert!(matches!(exact, Err(AppError::Config(msg)) if msg.contains("duplicate symbol")));

        let case_only = AppConfig::from_toml(r#"symbols = ["btcusdt", " BTCUSDT"]"#);
        assert!(matches!(case_only, Err(AppError::Config(_))));

        let windows = r#"
            [[rate_limits]]
            window_ms = 1000
            max_count = 100

            [[rate_limits]]
            window_ms = 1000
            max_count = 5
        "#;
        let dup_window = AppConfig::from_toml(windows);
        assert!(matches!(dup_window, Err(AppError::Config(msg)) if msg.contains("1000ms")));

        let distinct = AppConfig::from_toml(r#"symbols = ["BTCUSDT", "ETHUSDT"]"#).unwrap();
        assert_eq!(distinct.symbols.len(), 2);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load("/nonexistent/marketsync.toml").unwrap();
        assert_eq!(config.symbols, default_symbols());
        assert!(AppConfig::from_file("/nonexistent/marketsync.toml").is_err());
    }
}
