//! # Opsrelay Protocol
//!
//! Message types and frame codec for the Opsrelay command relay.
//!
//! The wire format is a length-prefixed binary frame, all integers
//! little-endian: `length:u32 | type:u32 | payload:bytes[length-4]`,
//! where `length` counts the 4-byte type tag plus the payload.

#![warn(missing_docs)]

/// Message types and handshake credentials
pub mod message;

/// Frame codec for async streams
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use codec::{FrameCodec, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use message::{Credentials, Message, MessageType};
