//! `tilecast`: a concurrent pixel-streaming transport. Producers tile and
//! push frames over TCP; a [`server::dispatcher::FrameDispatcher`] rendezvous
//! their sources into complete frames for hosts to pull; [`client::Stream`]/
//! [`client::Observer`] are the producer- and viewer-side connections.
//!
//! See `DESIGN.md` in the repository root for how each module is grounded.

pub mod client;
pub mod decoder;
pub mod net;
pub mod segmenter;
pub mod server;
pub mod types;
pub mod wire;

pub use client::{ClientConfig, ClientError, Observer, Stream};
pub use server::{Acceptor, ServerConfig, ServerHandler};
pub use types::{Event, EventType, Frame, PixelFormat, RowOrder, SizeHints, SourceId, StreamId, Tile, View};

/// Error returned by functions that don't have a more specific error enum of
/// their own (binaries and demos; library code always returns a per-module
/// error type).
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for the above.
pub type Result<T> = std::result::Result<T, Error>;
