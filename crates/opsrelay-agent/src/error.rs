//! Error types for agent operations

use opsrelay_proto::ProtocolError;
use thiserror::Error;

/// Main error type for the agent
#[derive(Debug, Error)]
pub enum AgentError {
    /// Embedded configuration missing or unparsable
    #[error("configuration error: {0}")]
    Config(String),

    /// The `fetch` endpoint document could not be retrieved or parsed
    #[error("endpoint resolution failed: {0}")]
    EndpointResolution(String),

    /// Wire protocol failure on the controller connection
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Command invocation failure
    #[error("command execution failed: {0}")]
    Exec(String),

    /// I/O errors
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
