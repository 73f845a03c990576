//! Push stream error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Stream stalled: no message for {idle_ms}ms")]
    Stalled { idle_ms: u64 },

    #[error("Retry controller is already running")]
    AlreadyRunning,

    #[error("Cancelled")]
    Cancelled,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

impl WsError {
    /// Cancellation is an exit path, not a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type WsResult<T> = Result<T, WsError>;
