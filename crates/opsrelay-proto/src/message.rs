//! Message types and handshake credentials

use crate::ProtocolError;
use bytes::Bytes;
use std::borrow::Cow;

/// Message type tags as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    /// Controller to agent: run a command line
    ExecuteCommand = 0,
    /// Agent to controller: captured output of a finished command
    CommandOutput = 1,
    /// Agent to controller: one-shot identity/credential handshake
    UserData = 2,
    /// Sender is going away; empty payload
    Disconnect = 3,
}

impl MessageType {
    /// The numeric wire tag for this message type
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Map a wire tag back to a message type
    pub fn from_tag(tag: u32) -> Result<Self, ProtocolError> {
        match tag {
            0 => Ok(Self::ExecuteCommand),
            1 => Ok(Self::CommandOutput),
            2 => Ok(Self::UserData),
            3 => Ok(Self::Disconnect),
            other => Err(ProtocolError::InvalidMessageType(other)),
        }
    }
}

/// A single protocol message: a type tag plus an opaque payload
///
/// Payload semantics are determined entirely by the type; a message is not
/// self-describing beyond type, length, and bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type
    pub message_type: MessageType,
    /// Opaque payload
    pub payload: Bytes,
}

impl Message {
    /// Create a message from a type and raw payload
    pub fn new(message_type: MessageType, payload: Bytes) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    /// Create an `ExecuteCommand` message carrying a UTF-8 command line
    pub fn execute_command(command_line: &str) -> Self {
        Self::new(
            MessageType::ExecuteCommand,
            Bytes::copy_from_slice(command_line.as_bytes()),
        )
    }

    /// Create a `CommandOutput` message carrying captured process output
    pub fn command_output(output: &str) -> Self {
        Self::new(
            MessageType::CommandOutput,
            Bytes::copy_from_slice(output.as_bytes()),
        )
    }

    /// Create the `UserData` handshake message for a credential pair
    pub fn user_data(credentials: &Credentials) -> Self {
        Self::new(MessageType::UserData, credentials.to_payload())
    }

    /// Create an empty `Disconnect` message
    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect, Bytes::new())
    }

    /// View the payload as UTF-8 text, lossily
    pub fn payload_utf8(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Identity/credential pair carried by a `UserData` handshake
///
/// Encoded on the wire as UTF-8 `"<identity>|<credential>"`; neither field
/// may itself contain the `|` delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Agent-supplied name, asserted but not cryptographically verified
    pub identity: String,
    /// Agent-supplied secret, checked against the controller password
    pub credential: String,
}

impl Credentials {
    /// Create a credential pair, rejecting embedded delimiters
    pub fn new(
        identity: impl Into<String>,
        credential: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let identity = identity.into();
        let credential = credential.into();
        if identity.contains('|') || credential.contains('|') {
            return Err(ProtocolError::MalformedHandshake);
        }
        Ok(Self {
            identity,
            credential,
        })
    }

    /// Encode as the pipe-delimited `UserData` payload
    pub fn to_payload(&self) -> Bytes {
        Bytes::from(format!("{}|{}", self.identity, self.credential))
    }

    /// Decode from a `UserData` payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::MalformedHandshake)?;
        let (identity, credential) = text
            .split_once('|')
            .ok_or(ProtocolError::MalformedHandshake)?;
        if credential.contains('|') {
            return Err(ProtocolError::MalformedHandshake);
        }
        Ok(Self {
            identity: identity.to_string(),
            credential: credential.to_string(),
        })
    }
}
