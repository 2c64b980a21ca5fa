//! Error types for the controller library

use opsrelay_proto::ProtocolError;
use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Send target is not present in the registry
    #[error("agent offline: {0}")]
    UserOffline(String),

    /// Handshake rejected; never reported back to the peer
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Wire protocol failure on a session stream
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid controller configuration
    #[error("configuration error: {0}")]
    Config(String),
}
