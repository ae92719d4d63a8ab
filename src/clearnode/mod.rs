//! External-Session Coordinator
//!
//! Long-lived multiplexed WebSocket connections to the clearing network.
//! One process-wide engine connection (supervised, reconnecting with
//! backoff) plus lazily-opened per-user connections; framed JSON requests
//! correlated by integer id; per-operation signing with session keys and
//! EIP-712 wallet attestations.

pub mod assets;
pub mod auth;
pub mod connection;
pub mod pool;
pub mod rpc;
pub mod types;

pub use assets::AssetMap;
pub use connection::Connection;
pub use pool::ClearnodePool;

use thiserror::Error;

/// Application label session keys are delegated under.
pub const APPLICATION: &str = "darkpool";

#[derive(Debug, Error)]
pub enum ClearnodeError {
    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("clearing network unreachable: {0}")]
    Unreachable(String),

    #[error("clearing network rejected request: {0}")]
    ConsensusRejected(String),

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("session-key storage error: {0}")]
    Storage(String),
}
