//! Raw REST response bodies and their conversion into core types.
//!
//! Numeric values arrive as decimal strings.

use crate::error::{RestError, RestResult};
use chrono::{DateTime, Utc};
use marketsync_core::{Candle, Level, OrderBookSnapshot, Price, Size, Trade};
use serde::Deserialize;
use serde_json::Value;

/// `GET /api/v3/depth` body.
#[derive(Debug, Deserialize)]
pub struct DepthSnapshotResponse {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
}

impl DepthSnapshotResponse {
    pub fn into_snapshot(self, symbol: &str) -> RestResult<OrderBookSnapshot> {
        Ok(OrderBookSnapshot {
            symbol: symbol.to_string(),
            last_sequence_id: self.last_update_id,
            bids: parse_levels(&self.bids)?,
            asks: parse_levels(&self.asks)?,
        })
    }
}

/// One entry of `GET /api/v3/trades`.
#[derive(Debug, Deserialize)]
pub struct TradeResponse {
    pub id: u64,
    pub price: String,
    pub qty: String,
    pub time: i64,
    #[serde(rename = "isBuyerMaker", default)]
    pub is_buyer_maker: bool,
}

impl TradeResponse {
    pub fn into_trade(self) -> RestResult<Trade> {
        Ok(Trade {
            id: self.id,
            price: parse_decimal::<Price>("price", &self.price)?,
            size: parse_decimal::<Size>("qty", &self.qty)?,
            time: timestamp(self.time)?,
            buyer_is_maker: self.is_buyer_maker,
        })
    }
}

/// Convert one `GET /api/v3/klines` row.
///
/// Rows are positional arrays:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
pub fn kline_row_to_candle(row: &[Value], now: DateTime<Utc>) -> RestResult<Candle> {
    if row.len() < 7 {
        return Err(RestError::Parse(format!(
            "kline row has {} fields, expected at least 7",
            row.len()
        )));
    }

    let int_at = |idx: usize| {
        row[idx]
            .as_i64()
            .ok_or_else(|| RestError::Parse(format!("kline field {idx} is not an integer")))
    };
    let str_at = |idx: usize| {
        row[idx]
            .as_str()
            .ok_or_else(|| RestError::Parse(format!("kline field {idx} is not a string")))
    };

    let close_time_ms = int_at(6)?;
    Ok(Candle {
        open_time_ms: int_at(0)?,
        close_time_ms,
        open: parse_decimal("open", str_at(1)?)?,
        high: parse_decimal("high", str_at(2)?)?,
        low: parse_decimal("low", str_at(3)?)?,
        close: parse_decimal("close", str_at(4)?)?,
        volume: parse_decimal("volume", str_at(5)?)?,
        is_closed: close_time_ms < now.timestamp_millis(),
    })
}

fn parse_levels(raw: &[(String, String)]) -> RestResult<Vec<Level>> {
    raw.iter()
        .map(|(px, sz)| {
            Ok(Level::new(
                parse_decimal("price", px)?,
                parse_decimal("size", sz)?,
            ))
        })
        .collect()
}

fn parse_decimal<T: std::str::FromStr<Err = rust_decimal::Error>>(
    field: &str,
    value: &str,
) -> RestResult<T> {
    value
        .parse()
        .map_err(|e| RestError::Parse(format!("invalid {field} '{value}': {e}")))
}

fn timestamp(ms: i64) -> RestResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| RestError::Parse(format!("timestamp out of range: {ms}")))
}
