//! Push stream plumbing for marketsync.
//!
//! Provides:
//! - The `PushSource` collaborator trait and a tokio-tungstenite implementation
//! - `RetryController`: supervised restart of a long-running stream action
//! - `WatchdogTimer`: stall detection for silent connections

pub mod connection;
pub mod error;
pub mod retry;
pub mod source;
pub mod watchdog;

pub use connection::{WsPushSource, WsSourceConfig};
pub use error::{WsError, WsResult};
pub use retry::{RetryConfig, RetryController, RetryStatus};
pub use source::{MessageHandler, PushMessage, PushSource};
pub use watchdog::{WatchdogTimer, MIN_WATCHDOG_INTERVAL};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
