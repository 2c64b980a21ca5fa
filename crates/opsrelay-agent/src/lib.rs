//! # Opsrelay Agent
//!
//! The remotely-controlled process that connects out to a controller,
//! executes relayed commands, and reports their captured output.

/// Agent connection and receive loop
pub mod agent;

/// Embedded agent configuration
pub mod config;

/// Error types for agent operations
pub mod error;

/// Command invocation with captured output
pub mod exec;

pub use agent::AgentConn;
pub use config::{AgentConfig, EndpointMode};
pub use error::AgentError;
pub use exec::{CommandRunner, ShellRunner};
