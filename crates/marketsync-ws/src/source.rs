//! Push-source collaborator.

use crate::error::WsResult;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One raw message delivered by a push source.
#[derive(Debug, Clone)]
pub struct PushMessage {
    /// Stream the message arrived on (e.g. "btcusdt@depth@100ms").
    pub stream: String,
    /// Undecoded payload.
    pub payload: String,
    /// Cancellation signal of the run that delivered it.
    pub cancel: CancellationToken,
}

/// Per-message callback. Runs on the transport's task and must not block.
pub type MessageHandler = Arc<dyn Fn(PushMessage) + Send + Sync>;

/// Source of streamed messages.
///
/// Owns connect/disconnect mechanics; callers never touch sockets.
pub trait PushSource: Send + Sync {
    /// Subscribe to `stream` and deliver every message to `handler` until
    /// the connection ends.
    ///
    /// Resolves to `Ok(())` once `cancel` fires and the connection is
    /// closed, or to an error when the transport fails. The handler is
    /// dropped before the future resolves.
    fn subscribe_and_run(
        &self,
        stream: &str,
        handler: MessageHandler,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, WsResult<()>>;
}
