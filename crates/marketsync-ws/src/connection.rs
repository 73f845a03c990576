//! tokio-tungstenite implementation of `PushSource`.
//!
//! One call to `subscribe_and_run` is one connection: connect, deliver
//! frames until the server closes, the watchdog reports a stall, or the
//! caller cancels. Reconnecting is the `RetryController`'s job.

use crate::error::{WsError, WsResult};
use crate::source::{MessageHandler, PushMessage, PushSource};
use crate::watchdog::WatchdogTimer;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

fn default_base_url() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}

fn default_watchdog_interval_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Push connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsSourceConfig {
    /// Stream endpoint root; the stream name is appended as a path segment.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Maximum silence before the connection is considered stalled (0 = off).
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for WsSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// WebSocket push source.
#[derive(Debug, Clone)]
pub struct WsPushSource {
    config: Arc<WsSourceConfig>,
}

impl WsPushSource {
    pub fn new(config: WsSourceConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &WsSourceConfig {
        &self.config
    }

    /// Full URL for a stream name.
    pub fn stream_url(&self, stream: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), stream)
    }
}

impl PushSource for WsPushSource {
    fn subscribe_and_run(
        &self,
        stream: &str,
        handler: MessageHandler,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, WsResult<()>> {
        let config = Arc::clone(&self.config);
        let url = self.stream_url(stream);
        let stream = stream.to_string();

        Box::pin(async move {
            let result = run_connection(&config, &url, &stream, &handler, &cancel).await;
            // Release the subscriber before reporting the end of the run.
            drop(handler);
            result
        })
    }
}

async fn run_connection(
    config: &WsSourceConfig,
    url: &str,
    stream: &str,
    handler: &MessageHandler,
    cancel: &CancellationToken,
) -> WsResult<()> {
    if cancel.is_cancelled() {
        return Ok(());
    }

    info!(%url, "Connecting to push stream");
    let connect = tokio::time::timeout(
        Duration::from_millis(config.connect_timeout_ms),
        connect_async_tls_with_config(url, None, true, None),
    );
    let ws_stream = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        result = connect => match result {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => return Err(WsError::ConnectionFailed(format!("{url}: {e}"))),
            Err(_) => {
                return Err(WsError::ConnectionFailed(format!(
                    "{url}: connect timed out after {}ms",
                    config.connect_timeout_ms
                )))
            }
        },
    };
    let (mut write, mut read) = ws_stream.split();
    info!(%stream, "Push stream connected");

    let stalled = CancellationToken::new();
    let watchdog = (config.watchdog_interval_ms > 0).then(|| {
        let stalled = stalled.clone();
        WatchdogTimer::start(Duration::from_millis(config.watchdog_interval_ms), move || {
            stalled.cancel();
        })
    });

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%stream, "Cancellation received, closing push stream");
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!(error = %e, "Failed to send Close frame");
                }
                return Ok(());
            }

            () = stalled.cancelled() => {
                warn!(%stream, idle_ms = config.watchdog_interval_ms, "Push stream stalled");
                return Err(WsError::Stalled { idle_ms: config.watchdog_interval_ms });
            }

            msg = read.next() => {
                if let Some(watchdog) = &watchdog {
                    watchdog.kick();
                }
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        trace!(%stream, len = text.len(), "Push message");
                        handler(PushMessage {
                            stream: stream.to_string(),
                            payload: text,
                            cancel: cancel.clone(),
                        });
                    }
                    Some(Ok(Message::Ping(data))) => {
                        trace!("Received ping, sending pong");
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason): (u16, String) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        warn!(code, %reason, "Push stream closed by server");
                        return Err(WsError::ConnectionClosed { code, reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Push stream read error");
                        return Err(e.into());
                    }
                    None => {
                        return Err(WsError::ConnectionClosed {
                            code: 1006,
                            reason: "stream ended without close frame".to_string(),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WsSourceConfig::default();
        assert_eq!(config.base_url, "wss://stream.binance.com:9443/ws");
        assert_eq!(config.watchdog_interval_ms, 30_000);
    }

    #[test]
    fn test_stream_url() {
        let source = WsPushSource::new(WsSourceConfig {
            base_url: "ws://127.0.0.1:9000/ws/".to_string(),
            ..Default::default()
        });
        assert_eq!(
            source.stream_url("btcusdt@depth@100ms"),
            "ws://127.0.0.1:9000/ws/btcusdt@depth@100ms"
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_ok_and_drops_handler() {
        let source = WsPushSource::new(WsSourceConfig {
            base_url: "ws://127.0.0.1:9".to_string(),
            ..Default::default()
        });
        let handler: MessageHandler = Arc::new(|_msg| {});
        let weak = Arc::downgrade(&handler);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = source.subscribe_and_run("btcusdt@trade", handler, cancel).await;
        tokio_test::assert_ok!(result);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_refused_connection_is_an_error() {
        let source = WsPushSource::new(WsSourceConfig {
            base_url: "ws://127.0.0.1:9".to_string(),
            connect_timeout_ms: 2_000,
            ..Default::default()
        });
        let handler: MessageHandler = Arc::new(|_msg| {});

        let result = source
            .subscribe_and_run("btcusdt@trade", handler, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(WsError::ConnectionFailed(_))));
    }
}
