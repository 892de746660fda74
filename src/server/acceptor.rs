//! TCP listener that accepts connections and spawns one [`ServerWorker`] per
//! connection (SPEC_FULL.md A.4.9, B.11.3 — the `deflect::Server` surface).

use crate::net::SocketChannel;
use crate::server::config::ServerConfig;
use crate::server::dispatcher::DispatcherHandle;
use crate::server::handler::ServerHandler;
use crate::server::worker::ServerWorker;
use crate::types::{Event, SourceId, StreamId};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Host-facing entry point. Owns the single [`DispatcherHandle`] for the
/// process and the listening socket; every accepted connection gets its own
/// [`ServerWorker`] task talking to that one dispatcher.
///
/// The original `registerToEvents`/`replyToEventRegistration` pair collapses
/// here into one async call on [`ServerHandler`] (see SPEC_FULL.md B.12):
/// there is no separate reply method to expose, since the handler's future
/// resolving *is* the reply.
pub struct Acceptor {
    dispatcher: DispatcherHandle,
    config: ServerConfig,
    next_source_id: AtomicU64,
}

impl Acceptor {
    pub fn new(handler: Arc<dyn ServerHandler>, config: ServerConfig) -> Self {
        Self {
            dispatcher: DispatcherHandle::spawn(handler),
            config,
            next_source_id: AtomicU64::new(1),
        }
    }

    /// A cloneable handle to the same dispatcher this acceptor feeds, for
    /// hosts that want to push events or request frames without holding the
    /// `Acceptor` itself.
    pub fn dispatcher(&self) -> DispatcherHandle {
        self.dispatcher.clone()
    }

    /// Bind and accept connections until an I/O error ends the loop. Each
    /// connection is handed to its own task; a single misbehaving
    /// connection never blocks the listener.
    pub async fn run(&self) -> io::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        tracing::info!(port = self.config.port, "accepting connections");

        loop {
            let (stream, peer) = listener.accept().await?;
            let source_id = SourceId(self.next_source_id.fetch_add(1, Ordering::Relaxed));
            let channel = SocketChannel::new(stream, self.config.receive_timeout);
            let worker = ServerWorker::new(
                channel,
                self.dispatcher.clone(),
                source_id,
                self.config.event_queue_capacity,
            );

            tokio::spawn(async move {
                if let Err(err) = worker.run().await {
                    tracing::warn!(%peer, error = %err, "connection ended with an error");
                }
            });
        }
    }

    /// Pull-model credit: the next complete frame for `stream_id` is sent as
    /// soon as one is available.
    pub async fn request_frame(&self, stream_id: StreamId) {
        self.dispatcher.request_frame(stream_id).await;
    }

    pub async fn close_pixel_stream(&self, stream_id: StreamId) {
        self.dispatcher.delete_stream(stream_id).await;
    }

    /// Deliver a host-originated interaction event to whichever connection
    /// is currently registered for `stream_id`, if any.
    pub async fn send_event(&self, stream_id: StreamId, event: Event) {
        self.dispatcher.send_event(stream_id, event).await;
    }
}
