//! The fixed-size `MessageHeader` that prefixes every message on the wire.

use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::Cursor;
use thiserror::Error;

/// Length in bytes of the fixed `uri` field of a [`MessageHeader`].
pub const URI_LENGTH: usize = 64;

/// Message type tag. Numeric values are part of the wire protocol and must
/// never be renumbered. Unrecognized values on the wire are not an error at
/// the header level; decoding a header always succeeds and callers that
/// don't recognize `MessageType::Unknown` should skip the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum MessageType {
    None = 0,
    StreamOpen = 3,
    FinishFrame = 4,
    Tile = 5,
    BindEvents = 6,
    BindEventsEx = 7,
    BindEventsReply = 8,
    Event = 9,
    Quit = 12,
    SizeHints = 13,
    Data = 14,
    ImageView = 15,
    ImageRowOrder = 16,
    ImageChannel = 17,
    ObserverOpen = 18,
}

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("incomplete header: need {need} more bytes")]
    Incomplete { need: usize },
    #[error("uri field is not valid UTF-8")]
    InvalidUri,
}

/// Fixed-size header: `type: u32, size: u32, uri: [u8; 64]`.
///
/// Serialization writes fields one at a time rather than transmuting the
/// struct, so the wire layout never depends on compiler struct layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: u32,
    pub size: u32,
    uri: [u8; URI_LENGTH],
}

impl MessageHeader {
    /// Size in bytes of the serialized header. Always exactly this many
    /// bytes, regardless of `uri` content.
    pub const SERIALIZED_SIZE: usize = 4 + 4 + URI_LENGTH;

    pub fn new(message_type: MessageType, size: u32, uri: &str) -> Result<Self, HeaderError> {
        Self::with_raw_type(message_type.into(), size, uri)
    }

    /// Build a header with a raw, possibly-unrecognized type tag. Used when
    /// forwarding or testing against the wire directly.
    pub fn with_raw_type(message_type: u32, size: u32, uri: &str) -> Result<Self, HeaderError> {
        let bytes = uri.as_bytes();
        if bytes.len() >= URI_LENGTH {
            return Err(HeaderError::InvalidUri);
        }
        let mut buf = [0u8; URI_LENGTH];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            message_type,
            size,
            uri: buf,
        })
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.message_type).ok()
    }

    /// The URI field with zero padding stripped. `None` if the stored bytes
    /// are not valid UTF-8 up to the first zero byte (should never happen
    /// for headers this crate produced).
    pub fn uri(&self) -> Option<&str> {
        let len = self.uri.iter().position(|&b| b == 0).unwrap_or(URI_LENGTH);
        std::str::from_utf8(&self.uri[..len]).ok()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.message_type);
        buf.put_u32_le(self.size);
        buf.put_slice(&self.uri);
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, HeaderError> {
        if buf.remaining() < Self::SERIALIZED_SIZE {
            return Err(HeaderError::Incomplete {
                need: Self::SERIALIZED_SIZE - buf.remaining(),
            });
        }
        let message_type = buf.get_u32_le();
        let size = buf.get_u32_le();
        let mut uri = [0u8; URI_LENGTH];
        buf.copy_to_slice(&mut uri);
        Ok(Self {
            message_type,
            size,
            uri,
        })
    }
}
