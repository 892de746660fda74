//! Typed message bodies carried after a [`MessageHeader`](super::header::MessageHeader).

use crate::types::{Event, EventType, PixelFormat, RowOrder, SizeHints, View};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("incomplete body: need {need} more bytes")]
    Incomplete { need: usize },
    #[error("unrecognized {field} value: {value}")]
    InvalidEnumValue { field: &'static str, value: u32 },
}

/// The fixed prefix of a `tile` message body. `image_data` (the remaining
/// `size - SegmentParameters::SERIALIZED_SIZE` bytes) follows immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentParameters {
    pub format: PixelFormat,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SegmentParameters {
    pub const SERIALIZED_SIZE: usize = 4 * 5;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.format as u32);
        buf.put_u32_le(self.x);
        buf.put_u32_le(self.y);
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, BodyError> {
        if buf.remaining() < Self::SERIALIZED_SIZE {
            return Err(BodyError::Incomplete {
                need: Self::SERIALIZED_SIZE - buf.remaining(),
            });
        }
        let format_raw = buf.get_u32_le();
        let format = PixelFormat::try_from(format_raw).map_err(|_| BodyError::InvalidEnumValue {
            field: "format",
            value: format_raw,
        })?;
        Ok(Self {
            format,
            x: buf.get_u32_le(),
            y: buf.get_u32_le(),
            width: buf.get_u32_le(),
            height: buf.get_u32_le(),
        })
    }
}

/// Encodes one of the `image_view` / `image_row_order` / `image_channel`
/// state-setter bodies, each a single byte.
pub fn encode_state_byte(value: u8) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1);
    buf.put_u8(value);
    buf
}

pub fn decode_view(body: &[u8]) -> Result<View, BodyError> {
    let value = *body.first().ok_or(BodyError::Incomplete { need: 1 })?;
    View::try_from(value).map_err(|_| BodyError::InvalidEnumValue {
        field: "view",
        value: value as u32,
    })
}

pub fn decode_row_order(body: &[u8]) -> Result<RowOrder, BodyError> {
    let value = *body.first().ok_or(BodyError::Incomplete { need: 1 })?;
    RowOrder::try_from(value).map_err(|_| BodyError::InvalidEnumValue {
        field: "row_order",
        value: value as u32,
    })
}

pub fn decode_channel(body: &[u8]) -> Result<u8, BodyError> {
    body.first().copied().ok_or(BodyError::Incomplete { need: 1 })
}

impl SizeHints {
    pub const SERIALIZED_SIZE: usize = 4 * 6;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.min_width);
        buf.put_u32_le(self.min_height);
        buf.put_u32_le(self.max_width);
        buf.put_u32_le(self.max_height);
        buf.put_u32_le(self.preferred_width);
        buf.put_u32_le(self.preferred_height);
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, BodyError> {
        if buf.remaining() < Self::SERIALIZED_SIZE {
            return Err(BodyError::Incomplete {
                need: Self::SERIALIZED_SIZE - buf.remaining(),
            });
        }
        Ok(Self {
            min_width: buf.get_u32_le(),
            min_height: buf.get_u32_le(),
            max_width: buf.get_u32_le(),
            max_height: buf.get_u32_le(),
            preferred_width: buf.get_u32_le(),
            preferred_height: buf.get_u32_le(),
        })
    }
}

impl Event {
    /// Fixed wire size of an `event` message body.
    pub const SERIALIZED_SIZE: usize = 4 + 8 * 4 + 3 + 4 + 4 + 16;

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.event_type.into());
        buf.put_f64_le(self.mouse_x);
        buf.put_f64_le(self.mouse_y);
        buf.put_f64_le(self.dx);
        buf.put_f64_le(self.dy);
        buf.put_u8(self.mouse_left as u8);
        buf.put_u8(self.mouse_right as u8);
        buf.put_u8(self.mouse_middle as u8);
        buf.put_i32_le(self.key);
        buf.put_i32_le(self.modifiers);
        buf.put_slice(&self.text);
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, BodyError> {
        if buf.remaining() < Self::SERIALIZED_SIZE {
            return Err(BodyError::Incomplete {
                need: Self::SERIALIZED_SIZE - buf.remaining(),
            });
        }
        let type_raw = buf.get_u32_le();
        let event_type = EventType::try_from(type_raw).map_err(|_| BodyError::InvalidEnumValue {
            field: "event_type",
            value: type_raw,
        })?;
        let mouse_x = buf.get_f64_le();
        let mouse_y = buf.get_f64_le();
        let dx = buf.get_f64_le();
        let dy = buf.get_f64_le();
        let mouse_left = buf.get_u8() != 0;
        let mouse_right = buf.get_u8() != 0;
        let mouse_middle = buf.get_u8() != 0;
        let key = buf.get_i32_le();
        let modifiers = buf.get_i32_le();
        let mut text = [0u8; 16];
        buf.copy_to_slice(&mut text);
        Ok(Self {
            event_type,
            mouse_x,
            mouse_y,
            dx,
            dy,
            mouse_left,
            mouse_right,
            mouse_middle,
            key,
            modifiers,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_parameters_round_trip() {
        let params = SegmentParameters {
            format: PixelFormat::Jpeg,
            x: 10,
            y: 20,
            width: 320,
            height: 240,
        };
        let mut buf = BytesMut::new();
        params.encode(&mut buf);
        assert_eq!(buf.len(), SegmentParameters::SERIALIZED_SIZE);
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(SegmentParameters::decode(&mut cursor).unwrap(), params);
    }

    #[test]
    fn event_round_trip() {
        let event = Event {
            event_type: EventType::Click,
            mouse_x: 0.5,
            mouse_y: 0.25,
            dx: 0.0,
            dy: 0.0,
            mouse_left: true,
            mouse_right: false,
            mouse_middle: false,
            key: 65,
            modifiers: 0,
            text: [0; 16],
        };
        let mut buf = BytesMut::new();
        event.encode(&mut buf);
        assert_eq!(buf.len(), Event::SERIALIZED_SIZE);
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(Event::decode(&mut cursor).unwrap(), event);
    }

    #[test]
    fn size_hints_default_is_all_unspecified() {
        let hints = SizeHints::default();
        assert_eq!(hints.min_width, SizeHints::UNSPECIFIED);
        let mut buf = BytesMut::new();
        hints.encode(&mut buf);
        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(SizeHints::decode(&mut cursor).unwrap(), hints);
    }

    #[test]
    fn state_setters_decode_single_byte() {
        assert_eq!(decode_view(&[1]).unwrap(), View::LeftEye);
        assert_eq!(decode_row_order(&[1]).unwrap(), RowOrder::BottomUp);
        assert_eq!(decode_channel(&[7]).unwrap(), 7);
    }
}
