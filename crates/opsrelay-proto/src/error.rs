//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Peer closed the transport, or it was closed locally
    #[error("transport closed")]
    TransportClosed,

    /// Wire tag does not map to a known message type
    #[error("invalid message type tag: {0}")]
    InvalidMessageType(u32),

    /// Frame body shorter than the 4-byte type tag
    #[error("truncated frame: {len} body bytes")]
    TruncatedFrame {
        /// Body length announced by the length field
        len: usize,
    },

    /// Frame too large
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Announced frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// `UserData` payload is not a well-formed `identity|credential` pair
    #[error("malformed handshake payload")]
    MalformedHandshake,

    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error means the peer is gone rather than misbehaving
    pub fn is_closed(&self) -> bool {
        match self {
            Self::TransportClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
