//! Feed error types.

use marketsync_core::CoreError;
use marketsync_rest::RestError;
use marketsync_ws::WsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Already subscribed: {0}")]
    AlreadySubscribed(String),

    #[error("REST error: {0}")]
    Rest(#[from] RestError),

    #[error("Push stream error: {0}")]
    Ws(#[from] WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Cancelled")]
    Cancelled,
}

impl FeedError {
    /// True for cancellation, including cancellation reported by a collaborator.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Rest(e) => e.is_cancelled(),
            Self::Ws(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_recognized_through_wrappers() {
        assert!(FeedError::Cancelled.is_cancelled());
        assert!(FeedError::from(RestError::Cancelled).is_cancelled());
        assert!(FeedError::from(WsError::Cancelled).is_cancelled());
        assert!(!FeedError::Parse("x".into()).is_cancelled());
        assert!(!FeedError::from(RestError::Parse("x".into())).is_cancelled());
    }
}
