//! Error types for marketsync-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid sequence range: first={first}, last={last}")]
    InvalidSequence { first: u64, last: u64 },

    #[error("Unknown candle interval: {0}")]
    UnknownInterval(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
