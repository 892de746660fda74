//! Per-source FIFO of tile-lists (SPEC_FULL.md A.4.5).

use crate::types::Tile;
use std::collections::VecDeque;

/// One source's queue of in-progress and completed tile lists. The back
/// list is always the "in-progress" frame; each [`SourceBuffer::push`]
/// starts a fresh one.
#[derive(Debug, Default)]
pub struct SourceBuffer {
    tiles: VecDeque<Vec<Tile>>,
    back_frame_index: u64,
}

impl SourceBuffer {
    pub fn new() -> Self {
        let mut buffer = Self::default();
        buffer.tiles.push_back(Vec::new());
        buffer
    }

    /// Append a tile to the in-progress (back) frame.
    pub fn insert(&mut self, tile: Tile) {
        self.tiles.back_mut().expect("back frame always present").push(tile);
    }

    /// Close out the in-progress frame and start a new empty one.
    /// Increments `back_frame_index`.
    pub fn push(&mut self) {
        self.tiles.push_back(Vec::new());
        self.back_frame_index += 1;
    }

    /// Remove and return the front (oldest completed) tile list.
    pub fn pop(&mut self) -> Vec<Tile> {
        self.tiles.pop_front().expect("pop on non-empty SourceBuffer")
    }

    /// The front (oldest completed) tile list, without removing it.
    pub fn tiles(&self) -> &[Tile] {
        self.tiles.front().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn back_frame_index(&self) -> u64 {
        self.back_frame_index
    }

    pub fn is_back_frame_empty(&self) -> bool {
        self.tiles.back().is_none_or(Vec::is_empty)
    }

    /// Number of tile-lists currently queued (including the in-progress
    /// one), used by [`super::receive_buffer::ReceiveBuffer`] to detect an
    /// overflowing producer.
    pub fn queue_size(&self) -> usize {
        self.tiles.len()
    }
}
