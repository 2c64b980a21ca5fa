//! # Opsrelay
//!
//! Controller side of the Opsrelay command relay.
//!
//! The controller accepts inbound agent connections, authenticates them
//! against a shared password and persistent deny-lists, keeps a registry of
//! connected agents, and relays typed, length-prefixed binary messages to
//! issue commands and collect their output.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use opsrelay_proto as proto;

/// Error types for the controller library
pub mod error;

/// Controller: accept loop, handshake, and dispatch
pub mod controller;

/// Persistent deny-lists keyed by address or identity
pub mod denylist;

/// Operator-facing sink for relayed command output
pub mod output;

/// Session records and the connected-agent registry
pub mod registry;

pub use controller::{Controller, ControllerBuilder, ControllerConfig};
pub use denylist::{DenyStore, EmptyDenyList, FileDenyList};
pub use error::RelayError;
pub use output::{LogSink, OutputSink};
pub use registry::{AgentRegistry, Session};

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, RelayError>;
