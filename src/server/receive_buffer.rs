//! Multi-source rendezvous: a frame is complete when every active source
//! has finished it (SPEC_FULL.md A.4.6).

use crate::server::source_buffer::SourceBuffer;
use crate::types::{SourceId, Tile};
use std::collections::HashMap;
use thiserror::Error;

/// A source is rejected if it queues more completed frames than this
/// without the rendezvous advancing (~5s at 30Hz).
pub const MAX_QUEUE_SIZE: usize = 150;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReceiveBufferError {
    #[error("stream already started; late join forbidden")]
    AlreadyStarted,
    #[error("source {0:?} is not registered on this stream")]
    UnknownSource(SourceId),
    #[error("source {0:?} exceeded the maximum queue size of {MAX_QUEUE_SIZE}")]
    QueueOverflow(SourceId),
    #[error("pop_frame called with no complete frame available")]
    Empty,
}

/// Per-stream aggregation state: one [`SourceBuffer`] per contributing
/// source, plus the rendezvous counter and the one-shot send credit.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    sources: HashMap<SourceId, SourceBuffer>,
    last_frame_complete: u64,
    allowed_to_send: bool,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new source. Fails if the stream has already dispatched a
    /// frame (late join). Adding an already-registered source is a silent
    /// no-op (see SPEC_FULL.md B.12 duplicate-addSource resolution).
    pub fn add_source(&mut self, source_id: SourceId) -> Result<(), ReceiveBufferError> {
        if self.last_frame_complete > 0 {
            return Err(ReceiveBufferError::AlreadyStarted);
        }
        self.sources.entry(source_id).or_insert_with(SourceBuffer::new);
        Ok(())
    }

    /// Remove a source. Resets the rendezvous counter once the stream has
    /// no remaining sources, so a future producer can start cleanly.
    pub fn remove_source(&mut self, source_id: SourceId) {
        self.sources.remove(&source_id);
        if self.sources.is_empty() {
            self.last_frame_complete = 0;
        }
    }

    pub fn insert(&mut self, source_id: SourceId, tile: Tile) -> Result<(), ReceiveBufferError> {
        self.sources
            .get_mut(&source_id)
            .ok_or(ReceiveBufferError::UnknownSource(source_id))?
            .insert(tile);
        Ok(())
    }

    pub fn finish_frame_for_source(&mut self, source_id: SourceId) -> Result<(), ReceiveBufferError> {
        let buffer = self
            .sources
            .get_mut(&source_id)
            .ok_or(ReceiveBufferError::UnknownSource(source_id))?;
        if buffer.queue_size() > MAX_QUEUE_SIZE {
            return Err(ReceiveBufferError::QueueOverflow(source_id));
        }
        buffer.push();
        Ok(())
    }

    /// True iff the stream has at least one source and every source has
    /// completed at least one frame beyond `last_frame_complete`.
    pub fn has_complete_frame(&self) -> bool {
        !self.sources.is_empty()
            && self
                .sources
                .values()
                .all(|buffer| buffer.back_frame_index() > self.last_frame_complete)
    }

    /// Pop one rendezvous worth of tiles: the front list from every source,
    /// concatenated. Advances `last_frame_complete` by one.
    pub fn pop_frame(&mut self) -> Result<Vec<Tile>, ReceiveBufferError> {
        if !self.has_complete_frame() {
            return Err(ReceiveBufferError::Empty);
        }
        let mut tiles = Vec::new();
        for buffer in self.sources.values_mut() {
            tiles.extend(buffer.pop());
        }
        self.last_frame_complete += 1;
        Ok(tiles)
    }

    pub fn set_allowed_to_send(&mut self, allowed: bool) {
        self.allowed_to_send = allowed;
    }

    pub fn is_allowed_to_send(&self) -> bool {
        self.allowed_to_send
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn last_frame_complete(&self) -> u64 {
        self.last_frame_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PixelFormat, RowOrder, View};

    fn tile() -> Tile {
        Tile {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            format: PixelFormat::Rgba,
            view: View::Mono,
            row_order: RowOrder::TopDown,
            channel: 0,
            image_data: vec![],
        }
    }

    #[test]
    fn single_source_completes_each_frame_in_turn() {
        let mut rb = ReceiveBuffer::new();
        let a = SourceId(1);
        rb.add_source(a).unwrap();
        assert!(!rb.has_complete_frame());

        rb.insert(a, tile()).unwrap();
        rb.finish_frame_for_source(a).unwrap();
        assert!(rb.has_complete_frame());

        let frame = rb.pop_frame().unwrap();
        assert_eq!(frame.len(), 1);
        assert!(!rb.has_complete_frame());
    }

    #[test]
    fn frame_completes_only_once_every_source_finished() {
        let mut rb = ReceiveBuffer::new();
        let (a, b) = (SourceId(1), SourceId(2));
        rb.add_source(a).unwrap();
        rb.add_source(b).unwrap();

        rb.finish_frame_for_source(a).unwrap();
        assert!(!rb.has_complete_frame());
        rb.finish_frame_for_source(b).unwrap();
        assert!(rb.has_complete_frame());
    }

    #[test]
    fn pop_frame_on_empty_buffer_is_an_error() {
        let mut rb = ReceiveBuffer::new();
        assert_eq!(rb.pop_frame().unwrap_err(), ReceiveBufferError::Empty);
    }

    #[test]
    fn late_join_after_first_pop_is_rejected() {
        let mut rb = ReceiveBuffer::new();
        let a = SourceId(1);
        rb.add_source(a).unwrap();
        rb.finish_frame_for_source(a).unwrap();
        rb.pop_frame().unwrap();

        let b = SourceId(2);
        assert_eq!(rb.add_source(b).unwrap_err(), ReceiveBufferError::AlreadyStarted);
    }

    #[test]
    fn duplicate_add_source_is_a_no_op() {
        let mut rb = ReceiveBuffer::new();
        let a = SourceId(1);
        rb.add_source(a).unwrap();
        rb.insert(a, tile()).unwrap();
        rb.add_source(a).unwrap();
        // The in-progress frame for `a` was not reset by the duplicate add.
        rb.finish_frame_for_source(a).unwrap();
        let frame = rb.pop_frame().unwrap();
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn remove_source_resets_rendezvous_once_empty() {
        let mut rb = ReceiveBuffer::new();
        let a = SourceId(1);
        rb.add_source(a).unwrap();
        rb.finish_frame_for_source(a).unwrap();
        rb.pop_frame().unwrap();
        assert_eq!(rb.last_frame_complete(), 1);

        rb.remove_source(a);
        assert_eq!(rb.last_frame_complete(), 0);
        rb.add_source(a).unwrap(); // allowed again: rendezvous reset
    }

    #[test]
    fn overflow_past_max_queue_size_is_an_error() {
        let mut rb = ReceiveBuffer::new();
        let a = SourceId(1);
        rb.add_source(a).unwrap();
        for _ in 0..MAX_QUEUE_SIZE {
            rb.finish_frame_for_source(a).unwrap();
        }
        assert_eq!(
            rb.finish_frame_for_source(a).unwrap_err(),
            ReceiveBufferError::QueueOverflow(a)
        );
    }
}
