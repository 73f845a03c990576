//! Order request types.
//!
//! Order types form a closed set; each variant carries only the fields it
//! needs and `OrderRequest::new` validates them once at construction.

use crate::error::{CoreError, CoreResult};
use crate::{Price, Size};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Time-in-force for resting orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-cancelled.
    #[default]
    #[serde(rename = "GTC")]
    GoodTilCancelled,
    /// Immediate-or-cancel.
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
    /// Fill-or-kill.
    #[serde(rename = "FOK")]
    FillOrKill,
}

/// Closed set of order types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market {
        quantity: Size,
    },
    Limit {
        price: Price,
        quantity: Size,
        time_in_force: TimeInForce,
    },
    StopLoss {
        quantity: Size,
        stop_price: Price,
    },
    StopLossLimit {
        price: Price,
        quantity: Size,
        stop_price: Price,
        time_in_force: TimeInForce,
    },
    TakeProfit {
        quantity: Size,
        stop_price: Price,
    },
    TakeProfitLimit {
        price: Price,
        quantity: Size,
        stop_price: Price,
        time_in_force: TimeInForce,
    },
    /// Post-only limit order; rejected by the exchange if it would take.
    LimitMaker {
        price: Price,
        quantity: Size,
    },
}

impl OrderKind {
    pub fn quantity(&self) -> Size {
        match self {
            Self::Market { quantity }
            | Self::Limit { quantity, .. }
            | Self::StopLoss { quantity, .. }
            | Self::StopLossLimit { quantity, .. }
            | Self::TakeProfit { quantity, .. }
            | Self::TakeProfitLimit { quantity, .. }
            | Self::LimitMaker { quantity, .. } => *quantity,
        }
    }

    /// Limit price, for the variants that rest on the book.
    pub fn limit_price(&self) -> Option<Price> {
        match self {
            Self::Limit { price, .. }
            | Self::StopLossLimit { price, .. }
            | Self::TakeProfitLimit { price, .. }
            | Self::LimitMaker { price, .. } => Some(*price),
            Self::Market { .. } | Self::StopLoss { .. } | Self::TakeProfit { .. } => None,
        }
    }

    pub fn stop_price(&self) -> Option<Price> {
        match self {
            Self::StopLoss { stop_price, .. }
            | Self::StopLossLimit { stop_price, .. }
            | Self::TakeProfit { stop_price, .. }
            | Self::TakeProfitLimit { stop_price, .. } => Some(*stop_price),
            _ => None,
        }
    }

    pub fn time_in_force(&self) -> Option<TimeInForce> {
        match self {
            Self::Limit { time_in_force, .. }
            | Self::StopLossLimit { time_in_force, .. }
            | Self::TakeProfitLimit { time_in_force, .. } => Some(*time_in_force),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Market { .. } => "MARKET",
            Self::Limit { .. } => "LIMIT",
            Self::StopLoss { .. } => "STOP_LOSS",
            Self::StopLossLimit { .. } => "STOP_LOSS_LIMIT",
            Self::TakeProfit { .. } => "TAKE_PROFIT",
            Self::TakeProfitLimit { .. } => "TAKE_PROFIT_LIMIT",
            Self::LimitMaker { .. } => "LIMIT_MAKER",
        }
    }
}

/// Validated order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    symbol: String,
    side: OrderSide,
    kind: OrderKind,
}

impl OrderRequest {
    /// Build an order request.
    ///
    /// Rejects empty symbols and non-positive quantities or prices.
    pub fn new(symbol: impl Into<String>, side: OrderSide, kind: OrderKind) -> CoreResult<Self> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(CoreError::InvalidOrder("symbol is empty".to_string()));
        }
        if !kind.quantity().is_positive() {
            return Err(CoreError::InvalidSize(format!(
                "{} quantity must be positive, got {}",
                kind.name(),
                kind.quantity()
            )));
        }
        for (label, price) in [("price", kind.limit_price()), ("stop price", kind.stop_price())] {
            if let Some(price) = price {
                if !price.is_positive() {
                    return Err(CoreError::InvalidPrice(format!(
                        "{} {label} must be positive, got {price}",
                        kind.name()
                    )));
                }
            }
        }
        Ok(Self { symbol, side, kind })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn kind(&self) -> &OrderKind {
        &self.kind
    }
}
