//! HTTP client for order book snapshots and market history.
//!
//! Implements `RestSource` against a Binance-shaped public API
//! (`/api/v3/depth`, `/api/v3/trades`, `/api/v3/klines`). Every request
//! races the caller's cancellation token.

use crate::error::{RestError, RestResult};
use crate::responses::{kline_row_to_candle, DepthSnapshotResponse, TradeResponse};
use crate::source::RestSource;
use chrono::Utc;
use futures_util::future::BoxFuture;
use marketsync_core::{Candle, CandleInterval, OrderBookSnapshot, Trade};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn default_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// REST client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// API root, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Client for public market data endpoints.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: Arc<str>,
}

impl RestClient {
    /// Create a new client.
    pub fn new(config: &RestConfig) -> RestResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RestError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get<T>(
        &self,
        path: &'static str,
        query: Vec<(&'static str, String)>,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = RestResult<T>> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = self.client.clone();
        let url = format!("{}{}", self.base_url, path);

        async move {
            if cancel.is_cancelled() {
                return Err(RestError::Cancelled);
            }
            debug!(%url, ?query, "REST request");

            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(RestError::Cancelled),
                result = fetch_json::<T>(&client, &url, &query) => result,
            }
        }
    }
}

async fn fetch_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    query: &[(&'static str, String)],
) -> RestResult<T> {
    let response = client.get(url).query(query).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| RestError::Parse(format!("{url}: {e}")))
}

impl RestSource for RestClient {
    fn get_order_book_snapshot(
        &self,
        symbol: &str,
        limit: u32,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, RestResult<OrderBookSnapshot>> {
        let symbol = symbol.to_uppercase();
        let request = self.get::<DepthSnapshotResponse>(
            "/api/v3/depth",
            vec![("symbol", symbol.clone()), ("limit", limit.to_string())],
            cancel,
        );

        Box::pin(async move { request.await?.into_snapshot(&symbol) })
    }

    fn get_recent_trades(
        &self,
        symbol: &str,
        limit: u32,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, RestResult<Vec<Trade>>> {
        let request = self.get::<Vec<TradeResponse>>(
            "/api/v3/trades",
            vec![("symbol", symbol.to_uppercase()), ("limit", limit.to_string())],
            cancel,
        );

        Box::pin(async move {
            let mut trades = request
                .await?
                .into_iter()
                .map(TradeResponse::into_trade)
                .collect::<RestResult<Vec<_>>>()?;
            trades.sort_by_key(|t| t.id);
            Ok(trades)
        })
    }

    fn get_candles(
        &self,
        symbol: &str,
        interval: CandleInterval,
        limit: u32,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, RestResult<Vec<Candle>>> {
        let request = self.get::<Vec<Vec<serde_json::Value>>>(
            "/api/v3/klines",
            vec![
                ("symbol", symbol.to_uppercase()),
                ("interval", interval.as_str().to_string()),
                ("limit", limit.to_string()),
            ],
            cancel,
        );

        Box::pin(async move {
            let now = Utc::now();
            let mut candles = request
                .await?
                .iter()
                .map(|row| kline_row_to_candle(row, now))
                .collect::<RestResult<Vec<_>>>()?;
            candles.sort_by_key(|c| c.open_time_ms);
            Ok(candles)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RestConfig::default();
        assert_eq!(config.base_url, "https://api.binance.com");
        assert_eq!(config.timeout_ms, 10_000);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = RestClient::new(&RestConfig {
            base_url: "http://localhost:8080/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_cancelled_request_skips_network() {
        let client = RestClient::new(&RestConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        })
        .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client.get_order_book_snapshot("btcusdt", 100, cancel).await;
        assert!(tokio_test::assert_err!(result).is_cancelled());
    }
}
