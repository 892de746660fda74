//! Per-connection state machine (SPEC_FULL.md A.4.8).
//!
//! States: `AwaitingHello -> AwaitingOpen -> Streaming -> Terminated`. The
//! protocol version is sent during `AwaitingHello` (folded into the start of
//! [`ServerWorker::run`]); everything past that is modeled explicitly.

use crate::net::{ChannelError, SocketChannel};
use crate::server::dispatcher::DispatcherHandle;
use crate::types::{Event, RowOrder, SourceId, StreamId, View};
use crate::wire::header::MessageType;
use crate::wire::message::{self, BodyError, SegmentParameters};
use crate::wire::{HeaderError, MessageHeader};
use bytes::{Bytes, BytesMut};
use std::io::Cursor;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("expected stream_open or observer_open as the first message")]
    UnexpectedMessageBeforeOpen,
    #[error("stream uri must not be empty")]
    EmptyStreamId,
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Body(#[from] BodyError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

enum Role {
    Source,
    Observer,
}

/// Per-connection state that applies to subsequent `tile` messages until
/// changed by a state-setter message.
struct TileState {
    view: View,
    row_order: RowOrder,
    channel: u8,
}

impl Default for TileState {
    fn default() -> Self {
        Self {
            view: View::default(),
            row_order: RowOrder::default(),
            channel: 0,
        }
    }
}

pub struct ServerWorker {
    channel: SocketChannel,
    dispatcher: DispatcherHandle,
    source_id: SourceId,
    event_queue_capacity: usize,
}

impl ServerWorker {
    pub fn new(
        channel: SocketChannel,
        dispatcher: DispatcherHandle,
        source_id: SourceId,
        event_queue_capacity: usize,
    ) -> Self {
        Self {
            channel,
            dispatcher,
            source_id,
            event_queue_capacity,
        }
    }

    pub async fn run(mut self) -> Result<(), WorkerError> {
        self.channel.send_protocol_version().await?;

        let (stream_id, role) = self.await_open().await?;
        tracing::info!(%stream_id, source_id = ?self.source_id, "connection streaming");

        let result = self.stream(&stream_id).await;

        match role {
            Role::Source => self.dispatcher.remove_source(stream_id.clone(), self.source_id).await,
            Role::Observer => self.dispatcher.remove_observer(stream_id.clone()).await,
        }
        tracing::info!(%stream_id, "connection terminated");
        result
    }

    /// `AwaitingOpen`: the only messages accepted here are `stream_open`
    /// and `observer_open`.
    async fn await_open(&mut self) -> Result<(StreamId, Role), WorkerError> {
        let Some((header, _body)) = self.channel.receive().await? else {
            return Err(WorkerError::UnexpectedMessageBeforeOpen);
        };
        let role = match header.message_type() {
            Some(MessageType::StreamOpen) => Role::Source,
            Some(MessageType::ObserverOpen) => Role::Observer,
            _ => return Err(WorkerError::UnexpectedMessageBeforeOpen),
        };
        let uri = header.uri().unwrap_or_default();
        let stream_id = StreamId::new(uri).ok_or(WorkerError::EmptyStreamId)?;

        match role {
            Role::Source => self.dispatcher.add_source(stream_id.clone(), self.source_id).await,
            Role::Observer => self.dispatcher.add_observer(stream_id.clone()).await,
        }
        Ok((stream_id, role))
    }

    /// `Streaming`: dispatch each incoming message and forward registered
    /// events back to the producer, until `quit` or a fatal error.
    async fn stream(&mut self, stream_id: &StreamId) -> Result<(), WorkerError> {
        let mut state = TileState::default();
        let (events_tx, mut events_rx) = mpsc::channel::<Event>(self.event_queue_capacity);
        let mut registered = false;

        loop {
            tokio::select! {
                biased;

                received = self.channel.receive() => {
                    let Some((header, body)) = received? else {
                        break;
                    };
                    match header.message_type() {
                        Some(MessageType::Tile) => self.handle_tile(stream_id, &state, &header, &body).await?,
                        Some(MessageType::FinishFrame) => {
                            self.dispatcher.process_frame_finished(stream_id.clone(), self.source_id).await;
                        }
                        Some(MessageType::ImageView) => state.view = message::decode_view(&body)?,
                        Some(MessageType::ImageRowOrder) => state.row_order = message::decode_row_order(&body)?,
                        Some(MessageType::ImageChannel) => state.channel = message::decode_channel(&body)?,
                        Some(MessageType::SizeHints) => {
                            let mut cursor = Cursor::new(&body[..]);
                            let hints = crate::types::SizeHints::decode(&mut cursor)?;
                            self.dispatcher.received_size_hints(stream_id.clone(), hints).await;
                        }
                        Some(MessageType::Data) => {
                            self.dispatcher.received_data(stream_id.clone(), body.to_vec()).await;
                        }
                        Some(MessageType::BindEvents) | Some(MessageType::BindEventsEx) => {
                            let exclusive = header.message_type() == Some(MessageType::BindEventsEx);
                            let granted = self
                                .dispatcher
                                .register_to_events(stream_id.clone(), exclusive, events_tx.clone())
                                .await;
                            registered = granted;
                            self.send_bind_reply(stream_id, granted).await?;
                        }
                        Some(MessageType::Quit) => break,
                        _ => {
                            tracing::debug!(?header, "ignoring unrecognized or out-of-place message type");
                        }
                    }
                }

                Some(event) = events_rx.recv() => {
                    self.send_event(stream_id, event).await?;
                }
            }
        }

        if registered {
            let _ = self.send_event(stream_id, Event::close()).await;
        }
        Ok(())
    }

    async fn handle_tile(
        &mut self,
        stream_id: &StreamId,
        state: &TileState,
        header: &MessageHeader,
        body: &Bytes,
    ) -> Result<(), WorkerError> {
        let mut cursor = Cursor::new(&body[..]);
        let params = SegmentParameters::decode(&mut cursor)?;
        let image_data = body[SegmentParameters::SERIALIZED_SIZE..header.size as usize].to_vec();
        let tile = crate::types::Tile {
            x: params.x,
            y: params.y,
            width: params.width,
            height: params.height,
            format: params.format,
            view: state.view,
            row_order: state.row_order,
            channel: state.channel,
            image_data,
        };
        self.dispatcher
            .process_tile(stream_id.clone(), self.source_id, tile)
            .await;
        Ok(())
    }

    async fn send_bind_reply(&mut self, stream_id: &StreamId, granted: bool) -> Result<(), ChannelError> {
        let header = MessageHeader::new(MessageType::BindEventsReply, 1, stream_id.as_str())
            .expect("stream ids are validated non-empty and under URI_LENGTH at open time");
        self.channel.send(&header, &[granted as u8]).await?;
        Ok(())
    }

    async fn send_event(&mut self, stream_id: &StreamId, event: Event) -> Result<(), ChannelError> {
        let mut body = BytesMut::with_capacity(Event::SERIALIZED_SIZE);
        event.encode(&mut body);
        let header = MessageHeader::new(MessageType::Event, body.len() as u32, stream_id.as_str())
            .expect("stream ids are validated non-empty and under URI_LENGTH at open time");
        self.channel.send(&header, &body).await?;
        Ok(())
    }
}
