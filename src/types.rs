//! Core data model: stream/source identifiers, tile geometry, pixel formats,
//! frames, size hints and interaction events.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// Opaque, non-empty stream identifier. Multiple producers may share one
/// `StreamId` to co-produce a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(uri: impl Into<String>) -> Option<Self> {
        let uri = uri.into();
        if uri.is_empty() { None } else { Some(Self(uri)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Server-assigned identifier, unique per TCP connection within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// Stereo eye / mono hint carried per-tile and per-connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum View {
    Mono = 0,
    LeftEye = 1,
    RightEye = 2,
    /// Producer-side hint only; never placed on a wire `Tile`.
    SideBySide = 3,
}

impl Default for View {
    fn default() -> Self {
        View::Mono
    }
}

/// Row order of pixel data within a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RowOrder {
    TopDown = 0,
    BottomUp = 1,
}

impl Default for RowOrder {
    fn default() -> Self {
        RowOrder::TopDown
    }
}

/// Raw or compressed pixel layout of a tile's `image_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum PixelFormat {
    Rgb = 0,
    Rgba = 1,
    Argb = 2,
    Bgr = 3,
    Bgra = 4,
    Abgr = 5,
    Jpeg = 6,
    Yuv444 = 7,
    Yuv422 = 8,
    Yuv420 = 9,
}

impl PixelFormat {
    /// Bytes per pixel for the raw (non-JPEG, non-YUV) formats.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb | PixelFormat::Bgr => Some(3),
            PixelFormat::Rgba | PixelFormat::Argb | PixelFormat::Bgra | PixelFormat::Abgr => {
                Some(4)
            }
            PixelFormat::Jpeg | PixelFormat::Yuv444 | PixelFormat::Yuv422 | PixelFormat::Yuv420 => {
                None
            }
        }
    }
}

/// A rectangular subregion of one frame; the atomic wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub view: View,
    pub row_order: RowOrder,
    pub channel: u8,
    pub image_data: Vec<u8>,
}

/// The assembled set of tiles from all sources for one logical time step.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub stream_id: StreamId,
    pub tiles: Vec<Tile>,
}

impl Frame {
    /// `(width, height)` spanned by the union of all tiles.
    pub fn dimensions(&self) -> (u32, u32) {
        self.tiles.iter().fold((0, 0), |(w, h), tile| {
            (w.max(tile.x + tile.width), h.max(tile.y + tile.height))
        })
    }

    /// The common row order across all tiles, or `None` if the frame is
    /// ill-formed (tiles disagree on row order).
    pub fn row_order(&self) -> Option<RowOrder> {
        let mut tiles = self.tiles.iter();
        let first = tiles.next()?.row_order;
        if tiles.all(|t| t.row_order == first) {
            Some(first)
        } else {
            None
        }
    }
}

/// Hints about minimum, maximum and preferred sizes of a streamer. A value of
/// [`SizeHints::UNSPECIFIED`] means the streamer did not report that hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeHints {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub preferred_width: u32,
    pub preferred_height: u32,
}

impl SizeHints {
    pub const UNSPECIFIED: u32 = 0;
}

/// The full set of interaction event types carried back to producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum EventType {
    Close = 0,
    Press = 1,
    Release = 2,
    DoubleClick = 3,
    Move = 4,
    Click = 5,
    Wheel = 6,
    SwipeLeft = 7,
    SwipeRight = 8,
    SwipeUp = 9,
    SwipeDown = 10,
    KeyPress = 11,
    KeyRelease = 12,
    ViewSizeChanged = 13,
    TapAndHold = 14,
    Pan = 15,
    Pinch = 16,
}

/// A single interaction event. Wire size is fixed (see
/// `crate::wire::message::EVENT_BODY_SIZE`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    pub mouse_x: f64,
    pub mouse_y: f64,
    pub dx: f64,
    pub dy: f64,
    pub mouse_left: bool,
    pub mouse_right: bool,
    pub mouse_middle: bool,
    pub key: i32,
    pub modifiers: i32,
    pub text: [u8; 16],
}

impl Event {
    pub fn close() -> Self {
        Event {
            event_type: EventType::Close,
            mouse_x: 0.0,
            mouse_y: 0.0,
            dx: 0.0,
            dy: 0.0,
            mouse_left: false,
            mouse_right: false,
            mouse_middle: false,
            key: 0,
            modifiers: 0,
            text: [0; 16],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_rejects_empty() {
        assert!(StreamId::new("").is_none());
        assert!(StreamId::new("wall").is_some());
    }

    #[test]
    fn frame_dimensions_are_the_bounding_union() {
        let frame = Frame {
            stream_id: StreamId::new("t").unwrap(),
            tiles: vec![
                Tile {
                    x: 0,
                    y: 0,
                    width: 320,
                    height: 480,
                    format: PixelFormat::Rgba,
                    view: View::Mono,
                    row_order: RowOrder::TopDown,
                    channel: 0,
                    image_data: vec![],
                },
                Tile {
                    x: 320,
                    y: 480,
                    width: 320,
                    height: 480,
                    format: PixelFormat::Rgba,
                    view: View::Mono,
                    row_order: RowOrder::TopDown,
                    channel: 0,
                    image_data: vec![],
                },
            ],
        };
        assert_eq!(frame.dimensions(), (640, 960));
        assert_eq!(frame.row_order(), Some(RowOrder::TopDown));
    }

    #[test]
    fn frame_with_mixed_row_order_is_ill_formed() {
        let frame = Frame {
            stream_id: StreamId::new("t").unwrap(),
            tiles: vec![
                Tile {
                    x: 0,
                    y: 0,
                    width: 10,
                    height: 10,
                    format: PixelFormat::Rgba,
                    view: View::Mono,
                    row_order: RowOrder::TopDown,
                    channel: 0,
                    image_data: vec![],
                },
                Tile {
                    x: 0,
                    y: 0,
                    width: 10,
                    height: 10,
                    format: PixelFormat::Rgba,
                    view: View::Mono,
                    row_order: RowOrder::BottomUp,
                    channel: 0,
                    image_data: vec![],
                },
            ],
        };
        assert_eq!(frame.row_order(), None);
    }
}
