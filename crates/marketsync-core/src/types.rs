//! Market data records shared by caches and collaborators.
//!
//! Contains order book levels and sequencing primitives, trade records,
//! and candlesticks.

use crate::error::{CoreError, CoreResult};
use crate::{Price, Size};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One price level (or a level delta when carried by a `DiffEvent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Price,
    pub size: Size,
}

impl Level {
    pub fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }

    /// A delta with size zero or below removes the level.
    #[inline]
    pub fn is_removal(&self) -> bool {
        !self.size.is_positive()
    }
}

/// Incremental order book update covering `[first_sequence_id, last_sequence_id]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEvent {
    pub symbol: String,
    pub first_sequence_id: u64,
    pub last_sequence_id: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    /// Exchange event time in milliseconds, when provided.
    pub event_time_ms: Option<i64>,
}

impl DiffEvent {
    /// Create a diff event, rejecting ranges where `first > last`.
    pub fn new(
        symbol: impl Into<String>,
        first_sequence_id: u64,
        last_sequence_id: u64,
        bids: Vec<Level>,
        asks: Vec<Level>,
    ) -> CoreResult<Self> {
        if first_sequence_id > last_sequence_id {
            return Err(CoreError::InvalidSequence {
                first: first_sequence_id,
                last: last_sequence_id,
            });
        }
        Ok(Self {
            symbol: symbol.into(),
            first_sequence_id,
            last_sequence_id,
            bids,
            asks,
            event_time_ms: None,
        })
    }

    pub fn with_event_time(mut self, event_time_ms: i64) -> Self {
        self.event_time_ms = Some(event_time_ms);
        self
    }
}

/// Full order book state fetched over REST, tagged with its own sequence id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub last_sequence_id: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Best bid and ask of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookTop {
    pub best_bid: Option<Level>,
    pub best_ask: Option<Level>,
}

impl BookTop {
    /// Spread (ask - bid), if both sides are present.
    pub fn spread(&self) -> Option<Price> {
        Some(self.best_ask?.price - self.best_bid?.price)
    }

    /// Mid price, if both sides are present.
    pub fn mid_price(&self) -> Option<Price> {
        Some(self.best_bid?.price.midpoint(self.best_ask?.price))
    }
}

/// Public trade record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub price: Price,
    pub size: Size,
    pub time: DateTime<Utc>,
    pub buyer_is_maker: bool,
}

impl Trade {
    pub fn new(id: u64, price: Price, size: Size, time: DateTime<Utc>) -> Self {
        Self {
            id,
            price,
            size,
            time,
            buyer_is_maker: false,
        }
    }
}

/// Candlestick interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    #[default]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    /// Interval length in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Self::OneMinute => MINUTE,
            Self::FiveMinutes => 5 * MINUTE,
            Self::FifteenMinutes => 15 * MINUTE,
            Self::OneHour => 60 * MINUTE,
            Self::FourHours => 240 * MINUTE,
            Self::OneDay => 1_440 * MINUTE,
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::OneHour),
            "4h" => Ok(Self::FourHours),
            "1d" => Ok(Self::OneDay),
            other => Err(CoreError::UnknownInterval(other.to_string())),
        }
    }
}

/// Candlestick keyed by its open time (milliseconds since epoch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub close_time_ms: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Size,
    /// Whether the exchange has finalized this candle.
    pub is_closed: bool,
}
