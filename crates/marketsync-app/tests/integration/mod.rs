//! Integration tests for marketsync.
//!
//! These tests drive real components against a local WebSocket server:
//! - Push source connection lifecycle
//! - Supervised reconnection
//! - End-to-end order book synchronization

pub mod common;
