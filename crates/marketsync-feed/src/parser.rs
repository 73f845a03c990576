//! Push payload parsing.
//!
//! Payloads are Binance-shaped JSON events keyed by `"e"`:
//! - `depthUpdate`: `{"s", "E", "U", "u", "b": [[px, qty]], "a": [[px, qty]]}`
//! - `trade`: `{"s", "t", "p", "q", "T", "m"}`
//! - `kline`: `{"s", "k": {"t", "T", "i", "o", "h", "l", "c", "v", "x"}}`
//!
//! Both raw payloads and combined-stream envelopes
//! (`{"stream": "...", "data": {...}}`) are accepted. Anything else,
//! such as subscription acknowledgements, parses to `PushEvent::Other`.

use crate::error::{FeedError, FeedResult};
use chrono::{DateTime, Utc};
use marketsync_core::{Candle, CandleInterval, DiffEvent, Level, Trade};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

/// Parsed push event.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Depth(DiffEvent),
    Trade {
        symbol: String,
        trade: Trade,
    },
    Kline {
        symbol: String,
        interval: CandleInterval,
        candle: Candle,
    },
    /// Payload that carries no market data (acks, unknown event types).
    Other,
}

#[derive(Debug, Deserialize)]
struct RawDepthUpdate {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "E", default)]
    event_time: Option<i64>,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    last_update_id: u64,
    #[serde(rename = "b", default)]
    bids: Vec<(String, String)>,
    #[serde(rename = "a", default)]
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    qty: String,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m", default)]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct RawKlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: RawKline,
}

#[derive(Debug, Deserialize)]
struct RawKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x", default)]
    is_closed: bool,
}

/// Parse one push payload.
pub fn parse_push(payload: &str) -> FeedResult<PushEvent> {
    let mut value: Value = serde_json::from_str(payload)?;

    if value.get("stream").is_some() {
        if let Some(data) = value.get_mut("data") {
            value = data.take();
        }
    }

    let event_type = value
        .get("e")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match event_type.as_str() {
        "depthUpdate" => parse_depth(value).map(PushEvent::Depth),
        "trade" => {
            let raw: RawTrade = serde_json::from_value(value)?;
            let mut trade = Trade::new(
                raw.id,
                parse_decimal("p", &raw.price)?,
                parse_decimal("q", &raw.qty)?,
                timestamp(raw.trade_time)?,
            );
            trade.buyer_is_maker = raw.buyer_is_maker;
            Ok(PushEvent::Trade {
                symbol: raw.symbol,
                trade,
            })
        }
        "kline" => {
            let raw: RawKlineEvent = serde_json::from_value(value)?;
            let k = raw.kline;
            Ok(PushEvent::Kline {
                symbol: raw.symbol,
                interval: CandleInterval::from_str(&k.interval)?,
                candle: Candle {
                    open_time_ms: k.open_time,
                    close_time_ms: k.close_time,
                    open: parse_decimal("o", &k.open)?,
                    high: parse_decimal("h", &k.high)?,
                    low: parse_decimal("l", &k.low)?,
                    close: parse_decimal("c", &k.close)?,
                    volume: parse_decimal("v", &k.volume)?,
                    is_closed: k.is_closed,
                },
            })
        }
        _ => Ok(PushEvent::Other),
    }
}

fn parse_depth(value: Value) -> FeedResult<DiffEvent> {
    let raw: RawDepthUpdate = serde_json::from_value(value)?;
    let event = DiffEvent::new(
        raw.symbol,
        raw.first_update_id,
        raw.last_update_id,
        parse_levels(&raw.bids)?,
        parse_levels(&raw.asks)?,
    )?;
    Ok(match raw.event_time {
        Some(ms) => event.with_event_time(ms),
        None => event,
    })
}

fn parse_levels(raw: &[(String, String)]) -> FeedResult<Vec<Level>> {
    raw.iter()
        .map(|(px, qty)| Ok(Level::new(parse_decimal("px", px)?, parse_decimal("qty", qty)?)))
        .collect()
}

fn parse_decimal<T: FromStr<Err = rust_decimal::Error>>(field: &str, value: &str) -> FeedResult<T> {
    value
        .parse()
        .map_err(|e| FeedError::Parse(format!("invalid {field} '{value}': {e}")))
}

fn timestamp(ms: i64) -> FeedResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| FeedError::InvalidData(format!("timestamp out of range: {ms}")))
}
