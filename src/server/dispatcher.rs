//! Per-stream lifecycle, pull-model dispatch and row-order normalization
//! (SPEC_FULL.md A.4.7).
//!
//! `FrameDispatcher` is deliberately plain synchronous logic with no I/O and
//! no locking, mirroring how [`super::receive_buffer::ReceiveBuffer`] is
//! structured: every mutating call returns the [`DispatcherEvent`]s it
//! produced, and the task that owns the single `FrameDispatcher` instance
//! (see `server::acceptor`) is responsible for forwarding them to a
//! `ServerHandler`. This keeps "exactly one thread mutates a `ReceiveBuffer`"
//! (SPEC_FULL.md B.12) a property of ownership rather than locking.

use crate::server::handler::ServerHandler;
use crate::server::receive_buffer::{ReceiveBuffer, ReceiveBufferError};
use crate::types::{Event, Frame, RowOrder, SizeHints, SourceId, StreamId, Tile};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq)]
pub enum DispatcherEvent {
    StreamOpened(StreamId),
    StreamClosed(StreamId),
    SourceRejected(StreamId, SourceId),
    Warning(StreamId, String),
    SendFrame(Frame),
    StreamError(StreamId, String),
}

#[derive(Debug, Default)]
struct StreamEntry {
    receive_buffer: ReceiveBuffer,
    observers: usize,
}

impl StreamEntry {
    fn is_empty(&self) -> bool {
        self.receive_buffer.source_count() == 0 && self.observers == 0
    }
}

#[derive(Debug, Default)]
pub struct FrameDispatcher {
    streams: HashMap<StreamId, StreamEntry>,
}

impl FrameDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, stream_id: StreamId, source_id: SourceId) -> Vec<DispatcherEvent> {
        let is_new = !self.streams.contains_key(&stream_id);
        let entry = self.streams.entry(stream_id.clone()).or_default();
        match entry.receive_buffer.add_source(source_id) {
            Ok(()) => {
                let mut events = Vec::new();
                if is_new {
                    events.push(DispatcherEvent::StreamOpened(stream_id));
                }
                events
            }
            Err(ReceiveBufferError::AlreadyStarted) => vec![
                DispatcherEvent::SourceRejected(stream_id.clone(), source_id),
                DispatcherEvent::Warning(stream_id, "late join forbidden".to_string()),
            ],
            Err(other) => vec![DispatcherEvent::StreamError(stream_id, other.to_string())],
        }
    }

    pub fn remove_source(&mut self, stream_id: &StreamId, source_id: SourceId) -> Vec<DispatcherEvent> {
        let Some(entry) = self.streams.get_mut(stream_id) else {
            return Vec::new();
        };
        entry.receive_buffer.remove_source(source_id);
        self.close_if_empty(stream_id)
    }

    pub fn add_observer(&mut self, stream_id: StreamId) -> Vec<DispatcherEvent> {
        let is_new = !self.streams.contains_key(&stream_id);
        let entry = self.streams.entry(stream_id.clone()).or_default();
        entry.observers += 1;
        if is_new {
            vec![DispatcherEvent::StreamOpened(stream_id)]
        } else {
            Vec::new()
        }
    }

    pub fn remove_observer(&mut self, stream_id: &StreamId) -> Vec<DispatcherEvent> {
        let Some(entry) = self.streams.get_mut(stream_id) else {
            return Vec::new();
        };
        entry.observers = entry.observers.saturating_sub(1);
        self.close_if_empty(stream_id)
    }

    pub fn process_tile(
        &mut self,
        stream_id: &StreamId,
        source_id: SourceId,
        tile: Tile,
    ) -> Vec<DispatcherEvent> {
        let Some(entry) = self.streams.get_mut(stream_id) else {
            return vec![DispatcherEvent::Warning(
                stream_id.clone(),
                "tile received for unknown stream".to_string(),
            )];
        };
        match entry.receive_buffer.insert(source_id, tile) {
            Ok(()) => Vec::new(),
            Err(err) => vec![DispatcherEvent::StreamError(stream_id.clone(), err.to_string())],
        }
    }

    pub fn process_frame_finished(
        &mut self,
        stream_id: &StreamId,
        source_id: SourceId,
    ) -> Vec<DispatcherEvent> {
        let Some(entry) = self.streams.get_mut(stream_id) else {
            return Vec::new();
        };
        if let Err(err) = entry.receive_buffer.finish_frame_for_source(source_id) {
            return vec![DispatcherEvent::StreamError(stream_id.clone(), err.to_string())];
        }
        if entry.receive_buffer.is_allowed_to_send() && entry.receive_buffer.has_complete_frame() {
            self.dispatch(stream_id)
        } else {
            Vec::new()
        }
    }

    pub fn request_frame(&mut self, stream_id: &StreamId) -> Vec<DispatcherEvent> {
        let Some(entry) = self.streams.get_mut(stream_id) else {
            return Vec::new();
        };
        entry.receive_buffer.set_allowed_to_send(true);
        if entry.receive_buffer.has_complete_frame() {
            self.dispatch(stream_id)
        } else {
            Vec::new()
        }
    }

    pub fn delete_stream(&mut self, stream_id: &StreamId) -> Vec<DispatcherEvent> {
        if self.streams.remove(stream_id).is_some() {
            vec![DispatcherEvent::StreamClosed(stream_id.clone())]
        } else {
            Vec::new()
        }
    }

    fn close_if_empty(&mut self, stream_id: &StreamId) -> Vec<DispatcherEvent> {
        let is_empty = self.streams.get(stream_id).is_some_and(StreamEntry::is_empty);
        if is_empty {
            self.streams.remove(stream_id);
            vec![DispatcherEvent::StreamClosed(stream_id.clone())]
        } else {
            Vec::new()
        }
    }

    /// "Always latest": drain every complete frame, keeping only the newest,
    /// clear the send credit, and normalize row order to top-down.
    fn dispatch(&mut self, stream_id: &StreamId) -> Vec<DispatcherEvent> {
        let Some(entry) = self.streams.get_mut(stream_id) else {
            return Vec::new();
        };
        let mut latest_tiles = None;
        while entry.receive_buffer.has_complete_frame() {
            latest_tiles = Some(
                entry
                    .receive_buffer
                    .pop_frame()
                    .expect("has_complete_frame just returned true"),
            );
        }
        entry.receive_buffer.set_allowed_to_send(false);

        let Some(tiles) = latest_tiles else {
            return Vec::new();
        };
        let frame = Frame {
            stream_id: stream_id.clone(),
            tiles,
        };
        match normalize_row_order(frame) {
            Ok(frame) => vec![DispatcherEvent::SendFrame(frame)],
            Err(reason) => vec![DispatcherEvent::StreamError(stream_id.clone(), reason)],
        }
    }
}

/// Rewrite bottom-up tiles so every tile in the dispatched frame reads
/// top-down. Mixed row orders within one frame are ill-formed.
fn normalize_row_order(mut frame: Frame) -> Result<Frame, String> {
    if frame.tiles.is_empty() {
        return Ok(frame);
    }
    match frame.row_order() {
        Some(RowOrder::TopDown) => Ok(frame),
        Some(RowOrder::BottomUp) => {
            let (_, frame_height) = frame.dimensions();
            for tile in &mut frame.tiles {
                tile.y = frame_height - tile.y - tile.height;
                tile.row_order = RowOrder::TopDown;
            }
            Ok(frame)
        }
        None => Err("tiles of one frame disagree on row order".to_string()),
    }
}

/// Commands a [`DispatcherHandle`] sends to the single task that owns the
/// `FrameDispatcher` and the event-registration registry. All server
/// workers and the `Acceptor`'s host-facing calls (`request_frame`,
/// `close_pixel_stream`, `reply_to_event_registration` in SPEC_FULL.md
/// B.11.3) go through this one channel, so exactly one task ever mutates a
/// `ReceiveBuffer` (SPEC_FULL.md B.12).
pub enum DispatcherCommand {
    AddSource { stream_id: StreamId, source_id: SourceId },
    RemoveSource { stream_id: StreamId, source_id: SourceId },
    AddObserver { stream_id: StreamId },
    RemoveObserver { stream_id: StreamId },
    ProcessTile { stream_id: StreamId, source_id: SourceId, tile: Tile },
    ProcessFrameFinished { stream_id: StreamId, source_id: SourceId },
    RequestFrame { stream_id: StreamId },
    DeleteStream { stream_id: StreamId },
    ReceivedSizeHints { stream_id: StreamId, hints: SizeHints },
    ReceivedData { stream_id: StreamId, data: Vec<u8> },
    /// `bind_events` / `bind_events_ex`: the worker's event outbox is handed
    /// over so the dispatcher task can push events to it once granted.
    RegisterToEvents {
        stream_id: StreamId,
        exclusive: bool,
        events_tx: mpsc::Sender<Event>,
        reply: oneshot::Sender<bool>,
    },
    /// Host-initiated: deliver `event` to whichever connection is currently
    /// registered for `stream_id`, if any.
    SendEvent { stream_id: StreamId, event: Event },
}

/// Cloneable handle to the dispatcher task's command channel.
#[derive(Clone)]
pub struct DispatcherHandle {
    commands: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    /// Spawn the dispatcher task and return a handle to it. `handler`
    /// receives every lifecycle/frame/warning notification the task emits.
    pub fn spawn(handler: Arc<dyn ServerHandler>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_dispatcher_task(rx, handler));
        Self { commands: tx }
    }

    async fn send(&self, command: DispatcherCommand) {
        if self.commands.send(command).await.is_err() {
            tracing::warn!("dispatcher task is gone; dropping command");
        }
    }

    pub async fn add_source(&self, stream_id: StreamId, source_id: SourceId) {
        self.send(DispatcherCommand::AddSource { stream_id, source_id }).await;
    }

    pub async fn remove_source(&self, stream_id: StreamId, source_id: SourceId) {
        self.send(DispatcherCommand::RemoveSource { stream_id, source_id }).await;
    }

    pub async fn add_observer(&self, stream_id: StreamId) {
        self.send(DispatcherCommand::AddObserver { stream_id }).await;
    }

    pub async fn remove_observer(&self, stream_id: StreamId) {
        self.send(DispatcherCommand::RemoveObserver { stream_id }).await;
    }

    pub async fn process_tile(&self, stream_id: StreamId, source_id: SourceId, tile: Tile) {
        self.send(DispatcherCommand::ProcessTile { stream_id, source_id, tile }).await;
    }

    pub async fn process_frame_finished(&self, stream_id: StreamId, source_id: SourceId) {
        self.send(DispatcherCommand::ProcessFrameFinished { stream_id, source_id }).await;
    }

    pub async fn request_frame(&self, stream_id: StreamId) {
        self.send(DispatcherCommand::RequestFrame { stream_id }).await;
    }

    pub async fn delete_stream(&self, stream_id: StreamId) {
        self.send(DispatcherCommand::DeleteStream { stream_id }).await;
    }

    pub async fn received_size_hints(&self, stream_id: StreamId, hints: SizeHints) {
        self.send(DispatcherCommand::ReceivedSizeHints { stream_id, hints }).await;
    }

    pub async fn received_data(&self, stream_id: StreamId, data: Vec<u8>) {
        self.send(DispatcherCommand::ReceivedData { stream_id, data }).await;
    }

    /// Returns whether the registration was granted.
    pub async fn register_to_events(
        &self,
        stream_id: StreamId,
        exclusive: bool,
        events_tx: mpsc::Sender<Event>,
    ) -> bool {
        let (reply, reply_rx) = oneshot::channel();
        self.send(DispatcherCommand::RegisterToEvents {
            stream_id,
            exclusive,
            events_tx,
            reply,
        })
        .await;
        reply_rx.await.unwrap_or(false)
    }

    pub async fn send_event(&self, stream_id: StreamId, event: Event) {
        self.send(DispatcherCommand::SendEvent { stream_id, event }).await;
    }
}

async fn run_dispatcher_task(mut commands: mpsc::Receiver<DispatcherCommand>, handler: Arc<dyn ServerHandler>) {
    let mut dispatcher = FrameDispatcher::new();
    let mut event_registry: HashMap<StreamId, mpsc::Sender<Event>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        let events = match command {
            DispatcherCommand::AddSource { stream_id, source_id } => {
                dispatcher.add_source(stream_id, source_id)
            }
            DispatcherCommand::RemoveSource { stream_id, source_id } => {
                dispatcher.remove_source(&stream_id, source_id)
            }
            DispatcherCommand::AddObserver { stream_id } => dispatcher.add_observer(stream_id),
            DispatcherCommand::RemoveObserver { stream_id } => {
                dispatcher.remove_observer(&stream_id)
            }
            DispatcherCommand::ProcessTile { stream_id, source_id, tile } => {
                dispatcher.process_tile(&stream_id, source_id, tile)
            }
            DispatcherCommand::ProcessFrameFinished { stream_id, source_id } => {
                dispatcher.process_frame_finished(&stream_id, source_id)
            }
            DispatcherCommand::RequestFrame { stream_id } => dispatcher.request_frame(&stream_id),
            DispatcherCommand::DeleteStream { stream_id } => {
                event_registry.remove(&stream_id);
                dispatcher.delete_stream(&stream_id)
            }
            DispatcherCommand::ReceivedSizeHints { stream_id, hints } => {
                handler.received_size_hints(&stream_id, hints);
                continue;
            }
            DispatcherCommand::ReceivedData { stream_id, data } => {
                handler.received_data(&stream_id, data);
                continue;
            }
            DispatcherCommand::RegisterToEvents {
                stream_id,
                exclusive,
                events_tx,
                reply,
            } => {
                let already_bound = event_registry.contains_key(&stream_id);
                let granted = if exclusive && already_bound {
                    false
                } else {
                    handler.register_to_events(&stream_id, exclusive).await
                };
                if granted {
                    event_registry.insert(stream_id, events_tx);
                }
                let _ = reply.send(granted);
                continue;
            }
            DispatcherCommand::SendEvent { stream_id, event } => {
                if let Some(sender) = event_registry.get(&stream_id) {
                    if sender.try_send(event).is_err() {
                        tracing::warn!(%stream_id, "event dropped: receiver outbox full or closed");
                    }
                }
                continue;
            }
        };

        for event in events {
            match event {
                DispatcherEvent::StreamOpened(id) => handler.pixel_stream_opened(&id),
                DispatcherEvent::StreamClosed(id) => {
                    event_registry.remove(&id);
                    handler.pixel_stream_closed(&id);
                }
                DispatcherEvent::SourceRejected(id, source_id) => {
                    handler.pixel_stream_warning(&id, &format!("source {source_id:?} rejected: late join"));
                }
                DispatcherEvent::Warning(id, reason) => handler.pixel_stream_warning(&id, &reason),
                DispatcherEvent::SendFrame(frame) => handler.received_frame(frame),
                DispatcherEvent::StreamError(id, reason) => handler.pixel_stream_exception(&id, &reason),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PixelFormat, View};

    fn tile(x: u32, y: u32, w: u32, h: u32, row_order: RowOrder) -> Tile {
        Tile {
            x,
            y,
            width: w,
            height: h,
            format: PixelFormat::Rgba,
            view: View::Mono,
            row_order,
            channel: 0,
            image_data: vec![],
        }
    }

    #[test]
    fn first_join_opens_the_stream() {
        let mut d = FrameDispatcher::new();
        let s = StreamId::new("t").unwrap();
        let events = d.add_source(s.clone(), SourceId(1));
        assert_eq!(events, vec![DispatcherEvent::StreamOpened(s)]);
    }

    #[test]
    fn single_source_two_frames_scenario() {
        let mut d = FrameDispatcher::new();
        let s = StreamId::new("t").unwrap();
        d.add_source(s.clone(), SourceId(1));

        d.process_tile(&s, SourceId(1), tile(0, 0, 640, 480, RowOrder::TopDown));
        d.process_frame_finished(&s, SourceId(1));

        let events = d.request_frame(&s);
        assert!(matches!(&events[0], DispatcherEvent::SendFrame(f) if f.tiles.len() == 1));

        d.process_tile(&s, SourceId(1), tile(0, 0, 640, 480, RowOrder::TopDown));
        d.process_frame_finished(&s, SourceId(1));
        let events = d.request_frame(&s);
        assert!(matches!(&events[0], DispatcherEvent::SendFrame(_)));
    }

    #[test]
    fn two_sources_tile_split_scenario() {
        let mut d = FrameDispatcher::new();
        let s = StreamId::new("t").unwrap();
        let (a, b) = (SourceId(1), SourceId(2));
        d.add_source(s.clone(), a);
        d.add_source(s.clone(), b);
        d.request_frame(&s);

        d.process_tile(&s, a, tile(0, 0, 320, 480, RowOrder::TopDown));
        d.process_tile(&s, a, tile(0, 480, 320, 480, RowOrder::TopDown));
        d.process_tile(&s, b, tile(320, 0, 320, 480, RowOrder::TopDown));
        d.process_tile(&s, b, tile(320, 480, 320, 480, RowOrder::TopDown));
        d.process_frame_finished(&s, a);
        let events = d.process_frame_finished(&s, b);

        let DispatcherEvent::SendFrame(frame) = &events[0] else {
            panic!("expected SendFrame")
        };
        assert_eq!(frame.tiles.len(), 4);
        assert_eq!(frame.dimensions(), (640, 960));
    }

    #[test]
    fn bottom_up_frame_is_normalized_to_top_down() {
        let mut d = FrameDispatcher::new();
        let s = StreamId::new("t").unwrap();
        d.add_source(s.clone(), SourceId(1));
        d.request_frame(&s);

        d.process_tile(&s, SourceId(1), tile(0, 100, 640, 200, RowOrder::BottomUp));
        let events = d.process_frame_finished(&s, SourceId(1));

        let DispatcherEvent::SendFrame(frame) = &events[0] else {
            panic!("expected SendFrame")
        };
        assert_eq!(frame.tiles[0].y, 180);
        assert_eq!(frame.tiles[0].row_order, RowOrder::TopDown);
    }

    #[test]
    fn always_latest_drops_intermediate_frames() {
        let mut d = FrameDispatcher::new();
        let s = StreamId::new("t").unwrap();
        d.add_source(s.clone(), SourceId(1));

        // Two frames complete before any requestFrame.
        d.process_tile(&s, SourceId(1), tile(0, 0, 1, 1, RowOrder::TopDown));
        d.process_frame_finished(&s, SourceId(1));
        d.process_tile(&s, SourceId(1), tile(9, 9, 1, 1, RowOrder::TopDown));
        d.process_frame_finished(&s, SourceId(1));

        let events = d.request_frame(&s);
        let DispatcherEvent::SendFrame(frame) = &events[0] else {
            panic!("expected SendFrame")
        };
        // Only the newest frame's tile (x=9) survives.
        assert_eq!(frame.tiles.len(), 1);
        assert_eq!(frame.tiles[0].x, 9);
    }

    #[test]
    fn late_join_is_rejected_with_a_warning() {
        let mut d = FrameDispatcher::new();
        let s = StreamId::new("t").unwrap();
        d.add_source(s.clone(), SourceId(1));
        d.process_frame_finished(&s, SourceId(1));
        d.request_frame(&s);

        let events = d.add_source(s.clone(), SourceId(2));
        assert!(matches!(events[0], DispatcherEvent::SourceRejected(_, SourceId(2))));
    }

    #[test]
    fn overflow_emits_stream_error() {
        let mut d = FrameDispatcher::new();
        let s = StreamId::new("t").unwrap();
        d.add_source(s.clone(), SourceId(1));
        for _ in 0..super::super::receive_buffer::MAX_QUEUE_SIZE {
            d.process_frame_finished(&s, SourceId(1));
        }
        let events = d.process_frame_finished(&s, SourceId(1));
        assert!(matches!(events[0], DispatcherEvent::StreamError(..)));
    }

    #[test]
    fn stream_closes_once_last_participant_leaves() {
        let mut d = FrameDispatcher::new();
        let s = StreamId::new("t").unwrap();
        d.add_source(s.clone(), SourceId(1));
        let events = d.remove_source(&s, SourceId(1));
        assert_eq!(events, vec![DispatcherEvent::StreamClosed(s)]);
    }
}
