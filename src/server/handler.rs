//! The host-facing callback surface (SPEC_FULL.md A.6, B.11.3).

use crate::types::{Frame, SizeHints, StreamId};
use std::future::Future;
use std::pin::Pin;

/// Implemented by the application that consumes reassembled frames and
/// reacts to stream lifecycle/metadata. All methods have a no-op default so
/// a host only overrides what it cares about, matching the narrow Qt signal
/// surface of `deflect::Server` (`examples/original_source/deflect/Server.h`).
pub trait ServerHandler: Send + Sync + 'static {
    fn pixel_stream_opened(&self, _stream_id: &StreamId) {}
    fn pixel_stream_closed(&self, _stream_id: &StreamId) {}

    /// Always follows a prior `request_frame` for this stream.
    fn received_frame(&self, _frame: Frame) {}

    fn received_size_hints(&self, _stream_id: &StreamId, _hints: SizeHints) {}
    fn received_data(&self, _stream_id: &StreamId, _data: Vec<u8>) {}

    /// Non-fatal: the stream continues (e.g. a rejected late join).
    fn pixel_stream_warning(&self, _stream_id: &StreamId, _reason: &str) {}

    /// Fatal to the stream (but never to the server): the stream is closed.
    fn pixel_stream_exception(&self, _stream_id: &StreamId, _reason: &str) {}

    /// Decide whether to grant an event-registration request. Defaults to
    /// rejecting, since forwarding interaction events is opt-in per host.
    ///
    /// Returns a manually boxed future rather than being declared `async fn`:
    /// `ServerHandler` is used as `Arc<dyn ServerHandler>`, and a trait with
    /// an `async fn` method has no fixed-size return type, which makes it
    /// not object-safe.
    fn register_to_events(
        &self,
        _stream_id: &StreamId,
        _exclusive: bool,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { false })
    }
}
