//! Single-owner serialization worker for one `Stream`/`Observer` connection
//! (SPEC_FULL.md A.4.4). The worker is the sole reader and writer of its
//! [`SocketChannel`]: outbound tiles and control messages are dispatched
//! here, and incoming `bind_events_reply`/`event` messages are drained here
//! too, so the "owned by exactly one worker" rule from A.4.2 holds on the
//! client side exactly as it does on the server's `ServerWorker`.

use crate::client::error::{ClientError, ClientResult};
use crate::net::SocketChannel;
use crate::types::{Event, RowOrder, SizeHints, StreamId, Tile, View};
use crate::wire::header::MessageType;
use crate::wire::MessageHeader;
use crate::wire::SegmentParameters;
use bytes::BytesMut;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, Notify};

/// One unit of work the send worker performs against its socket, matching
/// the original's `_send*` method set.
#[derive(Debug)]
pub(crate) enum ClientTask {
    OpenStream,
    OpenObserver,
    Close,
    Tile(Box<Tile>),
    Finish,
    SizeHints(SizeHints),
    Data(Vec<u8>),
}

pub(crate) enum Request {
    /// A batch of tasks, all-or-nothing: the first failing task aborts the
    /// rest and is reported back through `reply`.
    Tasks {
        tasks: Vec<ClientTask>,
        is_finish: bool,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    /// `bind_events`/`bind_events_ex`; resolved once the matching
    /// `bind_events_reply` arrives on the socket.
    BindEvents { exclusive: bool, reply: oneshot::Sender<ClientResult<bool>> },
}

/// Per-connection state applied implicitly to every subsequent tile, so
/// state-setter messages are only emitted on change.
#[derive(Debug, Default)]
struct TileState {
    view: View,
    row_order: RowOrder,
    channel: u8,
}

/// Bounded, peekable queue of events received for this connection, backing
/// `hasEvent`/`getEvent`. Unlike a plain `mpsc` channel this supports a
/// non-consuming peek (`has_event`). When full, the oldest event is dropped
/// in favor of the new one.
#[derive(Debug)]
pub(crate) struct EventBuffer {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
}

impl EventBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    fn push(&self, event: Event) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    pub(crate) fn has_event(&self) -> bool {
        !self.queue.lock().unwrap().is_empty()
    }

    /// Waits up to `timeout` for an event, returning a synthetic
    /// [`Event::close`] if none arrives in time (SPEC_FULL.md B.11.5:
    /// "otherwise an empty (default) Event").
    pub(crate) async fn get_event(&self, timeout: Duration) -> Event {
        loop {
            if let Some(event) = self.queue.lock().unwrap().pop_front() {
                return event;
            }
            if tokio::time::timeout(timeout, self.notify.notified()).await.is_err() {
                return Event::close();
            }
        }
    }
}

/// How long `get_event` waits before giving up and returning `Event::close()`
/// (SPEC_FULL.md B.11.5).
pub(crate) const EVENT_TIMEOUT: Duration = Duration::from_secs(1);

/// Cloneable handle to a running send worker task.
#[derive(Clone)]
pub(crate) struct SendWorkerHandle {
    requests: mpsc::Sender<Request>,
    events: Arc<EventBuffer>,
}

impl SendWorkerHandle {
    pub(crate) fn spawn(
        channel: SocketChannel,
        stream_id: StreamId,
        queue_capacity: usize,
        event_capacity: usize,
    ) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(queue_capacity);
        let events = Arc::new(EventBuffer::new(event_capacity));
        let worker = SendWorker {
            channel,
            stream_id,
            requests: requests_rx,
            events: Arc::clone(&events),
        };
        tokio::spawn(worker.run());
        Self { requests: requests_tx, events }
    }

    pub(crate) fn has_event(&self) -> bool {
        self.events.has_event()
    }

    pub(crate) async fn get_event(&self) -> Event {
        self.events.get_event(EVENT_TIMEOUT).await
    }

    /// True as long as the worker task is still alive to accept requests.
    pub(crate) fn is_connected(&self) -> bool {
        !self.requests.is_closed()
    }

    /// Resolves once the worker task has exited (e.g. the peer closed the
    /// connection), backing `setDisconnectedCallback`.
    pub(crate) async fn closed(&self) {
        self.requests.closed().await
    }

    pub(crate) async fn submit(&self, tasks: Vec<ClientTask>, is_finish: bool) -> ClientResult<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.requests
            .send(Request::Tasks { tasks, is_finish, reply })
            .await
            .map_err(|_| ClientError::WorkerGone)?;
        reply_rx.await.map_err(|_| ClientError::WorkerGone)?
    }

    pub(crate) async fn bind_events(&self, exclusive: bool) -> ClientResult<bool> {
        let (reply, reply_rx) = oneshot::channel();
        self.requests
            .send(Request::BindEvents { exclusive, reply })
            .await
            .map_err(|_| ClientError::WorkerGone)?;
        reply_rx.await.map_err(|_| ClientError::WorkerGone)?
    }
}

struct SendWorker {
    channel: SocketChannel,
    stream_id: StreamId,
    requests: mpsc::Receiver<Request>,
    events: Arc<EventBuffer>,
}

type PendingFinish = Option<(Vec<ClientTask>, oneshot::Sender<ClientResult<()>>)>;
type PendingBindReply = Option<oneshot::Sender<ClientResult<bool>>>;

impl SendWorker {
    async fn run(mut self) {
        let mut state = TileState::default();
        let mut pending_finish: PendingFinish = None;
        let mut pending_bind_reply: PendingBindReply = None;

        loop {
            // A pending finish must drain every already-queued non-finish
            // request before it runs, without waiting for new ones to arrive
            // (mirrors the original's "try_dequeue_bulk until empty, then
            // run the deferred finish" loop).
            if let Some((tasks, reply)) = pending_finish.take() {
                match self.requests.try_recv() {
                    Ok(request) => {
                        pending_finish = Some((tasks, reply));
                        self.handle_request(request, &mut state, &mut pending_finish, &mut pending_bind_reply)
                            .await;
                    }
                    Err(TryRecvError::Empty) => {
                        let result = self.run_tasks(&tasks, &mut state).await;
                        let _ = reply.send(result);
                    }
                    Err(TryRecvError::Disconnected) => {
                        let result = self.run_tasks(&tasks, &mut state).await;
                        let _ = reply.send(result);
                        break;
                    }
                }
                continue;
            }

            tokio::select! {
                biased;

                received = self.channel.receive() => {
                    match received {
                        Ok(Some((header, body))) => {
                            self.handle_incoming(header.message_type(), &body, &mut pending_bind_reply);
                        }
                        Ok(None) | Err(_) => break,
                    }
                }

                maybe_request = self.requests.recv() => {
                    match maybe_request {
                        Some(request) => {
                            self.handle_request(request, &mut state, &mut pending_finish, &mut pending_bind_reply).await;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_request(
        &mut self,
        request: Request,
        state: &mut TileState,
        pending_finish: &mut PendingFinish,
        pending_bind_reply: &mut PendingBindReply,
    ) {
        match request {
            Request::Tasks { tasks, is_finish, reply } => {
                if is_finish {
                    if pending_finish.is_some() {
                        let _ = reply.send(Err(ClientError::AlreadyHavePendingFinish));
                        return;
                    }
                    *pending_finish = Some((tasks, reply));
                    return;
                }
                let result = self.run_tasks(&tasks, state).await;
                let _ = reply.send(result);
            }
            Request::BindEvents { exclusive, reply } => {
                if pending_bind_reply.is_some() {
                    let _ = reply.send(Err(ClientError::Failed));
                    return;
                }
                let message_type = if exclusive { MessageType::BindEventsEx } else { MessageType::BindEvents };
                match self.send_empty(message_type).await {
                    Ok(()) => *pending_bind_reply = Some(reply),
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
        }
    }

    async fn run_tasks(&mut self, tasks: &[ClientTask], state: &mut TileState) -> ClientResult<()> {
        for task in tasks {
            self.run_task(task, state).await?;
        }
        Ok(())
    }

    async fn run_task(&mut self, task: &ClientTask, state: &mut TileState) -> ClientResult<()> {
        match task {
            ClientTask::OpenStream => self.send_open(MessageType::StreamOpen).await,
            ClientTask::OpenObserver => self.send_open(MessageType::ObserverOpen).await,
            ClientTask::Close => self.send_empty(MessageType::Quit).await,
            ClientTask::Finish => self.send_empty(MessageType::FinishFrame).await,
            ClientTask::Tile(tile) => self.send_tile(tile, state).await,
            ClientTask::SizeHints(hints) => self.send_size_hints(hints).await,
            ClientTask::Data(bytes) => self.send_data(bytes).await,
        }
    }

    /// `stream_open`/`observer_open` carry the protocol version as a decimal
    /// ASCII body, matching the wire layout in SPEC_FULL.md A.6; the server
    /// doesn't re-validate it since the raw handshake (A.4.2) already did.
    async fn send_open(&mut self, message_type: MessageType) -> ClientResult<()> {
        let body = crate::net::PROTOCOL_VERSION.to_string().into_bytes();
        let header = MessageHeader::new(message_type, body.len() as u32, self.stream_id.as_str())?;
        self.channel.send(&header, &body).await?;
        Ok(())
    }

    async fn send_empty(&mut self, message_type: MessageType) -> ClientResult<()> {
        let header = MessageHeader::new(message_type, 0, self.stream_id.as_str())?;
        self.channel.send(&header, &[]).await?;
        Ok(())
    }

    async fn send_state_setter(&mut self, message_type: MessageType, value: u8) -> ClientResult<()> {
        let header = MessageHeader::new(message_type, 1, self.stream_id.as_str())?;
        self.channel.send(&header, &[value]).await?;
        Ok(())
    }

    async fn send_tile(&mut self, tile: &Tile, state: &mut TileState) -> ClientResult<()> {
        if tile.view != state.view {
            self.send_state_setter(MessageType::ImageView, tile.view.into()).await?;
            state.view = tile.view;
        }
        if tile.row_order != state.row_order {
            self.send_state_setter(MessageType::ImageRowOrder, tile.row_order.into()).await?;
            state.row_order = tile.row_order;
        }
        if tile.channel != state.channel {
            self.send_state_setter(MessageType::ImageChannel, tile.channel).await?;
            state.channel = tile.channel;
        }

        let params = SegmentParameters {
            format: tile.format,
            x: tile.x,
            y: tile.y,
            width: tile.width,
            height: tile.height,
        };
        let mut body = BytesMut::with_capacity(SegmentParameters::SERIALIZED_SIZE + tile.image_data.len());
        params.encode(&mut body);
        body.extend_from_slice(&tile.image_data);
        let header = MessageHeader::new(MessageType::Tile, body.len() as u32, self.stream_id.as_str())?;
        self.channel.send(&header, &body).await?;
        Ok(())
    }

    async fn send_size_hints(&mut self, hints: &SizeHints) -> ClientResult<()> {
        let mut body = BytesMut::with_capacity(SizeHints::SERIALIZED_SIZE);
        hints.encode(&mut body);
        let header = MessageHeader::new(MessageType::SizeHints, body.len() as u32, self.stream_id.as_str())?;
        self.channel.send(&header, &body).await?;
        Ok(())
    }

    async fn send_data(&mut self, data: &[u8]) -> ClientResult<()> {
        let header = MessageHeader::new(MessageType::Data, data.len() as u32, self.stream_id.as_str())?;
        self.channel.send(&header, data).await?;
        Ok(())
    }

    fn handle_incoming(&mut self, message_type: Option<MessageType>, body: &[u8], pending_bind_reply: &mut PendingBindReply) {
        match message_type {
            Some(MessageType::BindEventsReply) => {
                let granted = body.first().copied().unwrap_or(0) != 0;
                if let Some(reply) = pending_bind_reply.take() {
                    let _ = reply.send(Ok(granted));
                }
            }
            Some(MessageType::Event) => {
                let mut cursor = Cursor::new(body);
                if let Ok(event) = Event::decode(&mut cursor) {
                    self.events.push(event);
                }
            }
            other => {
                tracing::debug!(?other, "ignoring unexpected message on client connection");
            }
        }
    }
}
