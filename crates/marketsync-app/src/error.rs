//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("REST error: {0}")]
    Rest(#[from] marketsync_rest::RestError),

    #[error("Push stream error: {0}")]
    Ws(#[from] marketsync_ws::WsError),

    #[error("Feed error: {0}")]
    Feed(#[from] marketsync_feed::FeedError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] marketsync_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Rest(e) => e.is_cancelled(),
            Self::Ws(e) => e.is_cancelled(),
            Self::Feed(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
