//! Client-side pixel stream API (SPEC_FULL.md A.4.4, B.10-B.11): [`Stream`]
//! for sources pushing frames, [`Observer`] for receive-only event
//! listeners, both backed by one send-worker task per connection
//! (`send_worker`).

pub mod config;
pub mod error;
pub mod observer;
mod send_worker;
pub mod stream;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use observer::Observer;
pub use stream::Stream;

use crate::net::SocketChannel;
use crate::types::Event;
use send_worker::{ClientTask, SendWorkerHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;

/// Resolves the server host and port from an explicit argument or
/// `DEFLECT_HOST`, which may itself carry a `host:port` suffix.
pub(crate) fn resolve_host(explicit: Option<&str>, config: &ClientConfig) -> ClientResult<(String, u16)> {
    let host = explicit
        .map(str::to_string)
        .or_else(|| std::env::var("DEFLECT_HOST").ok())
        .ok_or(ClientError::NoHost)?;

    match host.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            let port: u16 = port.parse().map_err(|_| ClientError::NoHost)?;
            Ok((host.to_string(), port))
        }
        _ => Ok((host, config.port)),
    }
}

/// Resolves the stream/observer identifier from an explicit argument,
/// `DEFLECT_ID`, or a synthesized `<hostname>_<randomhex>` fallback. This
/// crate carries no `rand` dependency, so the fallback's randomness comes
/// from the wall clock and process id instead.
pub(crate) fn resolve_id(explicit: Option<&str>) -> String {
    if let Some(id) = explicit {
        return id.to_string();
    }
    if let Ok(id) = std::env::var("DEFLECT_ID") {
        return id;
    }

    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "deflect".to_string());
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    let salt = (nanos as u64) ^ (std::process::id() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    format!("{hostname}_{salt:012x}")
}

pub(crate) async fn connect(host: &str, port: u16, config: &ClientConfig) -> ClientResult<SocketChannel> {
    let stream = TcpStream::connect((host, port)).await?;
    let mut channel = SocketChannel::new(stream, config.receive_timeout);
    channel.negotiate_protocol_version().await?;
    Ok(channel)
}

/// The event-registration and liveness surface shared verbatim by `Stream`
/// and `Observer` (`Observer.h`'s `registerForEvents`/`hasEvent`/`getEvent`/
/// `setDisconnectedCallback`). Held by composition rather than inheritance,
/// since neither type in the original derives from the other.
pub(crate) struct Connection {
    id: String,
    host: String,
    worker: SendWorkerHandle,
    registered_for_events: AtomicBool,
}

impl Connection {
    fn new(id: String, host: String, worker: SendWorkerHandle) -> Self {
        Self {
            id,
            host,
            worker,
            registered_for_events: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.worker.is_connected()
    }

    pub(crate) fn is_registered_for_events(&self) -> bool {
        self.registered_for_events.load(Ordering::Acquire)
    }

    pub(crate) async fn register_for_events(&self, exclusive: bool) -> ClientResult<bool> {
        let granted = self.worker.bind_events(exclusive).await?;
        self.registered_for_events.store(granted, Ordering::Release);
        Ok(granted)
    }

    pub(crate) fn has_event(&self) -> bool {
        self.worker.has_event()
    }

    pub(crate) async fn get_event(&self) -> Event {
        self.worker.get_event().await
    }

    /// Sends a `quit` message to the server, matching `_sendClose`.
    pub(crate) async fn close(&self) -> ClientResult<()> {
        self.worker.submit(vec![ClientTask::Close], false).await
    }

    pub(crate) async fn submit(&self, tasks: Vec<ClientTask>, is_finish: bool) -> ClientResult<()> {
        self.worker.submit(tasks, is_finish).await
    }

    /// Runs `callback` once the connection's send worker has exited. Spawns
    /// its own task since Rust has no async `Drop` to hang this off of.
    pub(crate) fn set_disconnected_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let worker = self.worker.clone();
        tokio::spawn(async move {
            worker.closed().await;
            callback();
        });
    }
}
