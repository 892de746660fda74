//! Client-side configuration (SPEC_FULL.md B.10.3).

use crate::net::{CLIENT_RECEIVE_TIMEOUT, DEFAULT_PORT};
use std::time::Duration;

/// Tuning knobs for a `Stream`/`Observer` connection and its segmenter.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub port: u16,
    pub receive_timeout: Duration,
    /// `0` means "one tile covering the whole image", matching
    /// `ImageSegmenter`'s default.
    pub nominal_tile_width: u32,
    pub nominal_tile_height: u32,
    pub jpeg_quality: u8,
    /// Bounded depth of the send worker's request queue.
    pub request_queue_capacity: usize,
    /// Bounded depth of the received-event queue drained by `hasEvent`/`getEvent`.
    pub event_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            receive_timeout: CLIENT_RECEIVE_TIMEOUT,
            nominal_tile_width: 0,
            nominal_tile_height: 0,
            jpeg_quality: 80,
            request_queue_capacity: 64,
            event_queue_capacity: 64,
        }
    }
}
