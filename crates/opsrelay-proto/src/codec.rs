//! Frame codec for async streams
//!
//! Wire layout, all integers little-endian:
//! `length:u32 | type:u32 | payload:bytes[length-4]`.
//!
//! The length field counts the 4-byte type tag plus the payload, on encode
//! and decode alike. A frame is atomic: no bytes are interpreted until the
//! whole frame has been buffered, however the underlying stream chunks them.

use crate::{Message, MessageType, ProtocolError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes in the length prefix
const LEN_PREFIX: usize = 4;

/// Bytes in the type tag, counted inside the length field
const TAG_LEN: usize = 4;

/// Frame codec for encoding/decoding messages over async streams
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum frame size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a new frame codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Encode a message to a complete frame, length prefix included
    pub fn encode_frame(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        let body_len = message.payload.len() + TAG_LEN;
        if body_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len,
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(LEN_PREFIX + body_len);
        buf.put_u32_le(body_len as u32);
        buf.put_u32_le(message.message_type.tag());
        buf.put_slice(&message.payload);

        Ok(buf.freeze())
    }

    /// Write a message to an async writer as one frame
    pub async fn write_frame<W>(
        &self,
        writer: &mut W,
        message: &Message,
    ) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_frame(message)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one message from an async reader
    ///
    /// Returns `Ok(None)` on a clean close at a frame boundary. A close in
    /// the middle of a frame is `TransportClosed`. Short reads are retried
    /// until the full frame is assembled.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Message>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(message) = self.try_decode_frame()? {
                return Ok(Some(message));
            }

            let mut chunk = [0u8; 8192];
            let n = reader.read(&mut chunk).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::TransportClosed);
            }

            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Try to decode one message from the internal buffer
    pub fn try_decode_frame(&mut self) -> Result<Option<Message>, ProtocolError> {
        if self.read_buf.len() < LEN_PREFIX {
            // Not enough data for the length prefix
            return Ok(None);
        }

        let body_len = (&self.read_buf[..LEN_PREFIX]).get_u32_le() as usize;

        if body_len < TAG_LEN {
            return Err(ProtocolError::TruncatedFrame { len: body_len });
        }
        if body_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len,
                max: self.max_frame_size,
            });
        }

        if self.read_buf.len() < LEN_PREFIX + body_len {
            // Frame is not complete yet
            return Ok(None);
        }

        self.read_buf.advance(LEN_PREFIX);
        let mut body = self.read_buf.split_to(body_len);
        let tag = body.get_u32_le();
        let message_type = MessageType::from_tag(tag)?;

        Ok(Some(Message::new(message_type, body.freeze())))
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }
}
