//! Receive-only connection to a stream's interaction events, with no frame
//! production of its own (grounded on `Observer.h`).

use crate::client::config::ClientConfig;
use crate::client::error::ClientResult;
use crate::client::send_worker::{ClientTask, SendWorkerHandle};
use crate::client::Connection;
use crate::types::{Event, StreamId};

/// Registers for and receives interaction events for a stream.
pub struct Observer {
    connection: Connection,
}

impl Observer {
    /// Connects using `DEFLECT_HOST`/`DEFLECT_ID` where `host`/`id` are
    /// omitted, with default tuning.
    pub async fn connect(id: Option<&str>, host: Option<&str>) -> ClientResult<Self> {
        Self::connect_with_config(id, host, ClientConfig::default()).await
    }

    pub async fn connect_with_config(id: Option<&str>, host: Option<&str>, config: ClientConfig) -> ClientResult<Self> {
        let (resolved_host, port) = crate::client::resolve_host(host, &config)?;
        let stream_id = StreamId::new(crate::client::resolve_id(id)).expect("resolve_id never returns an empty string");
        let channel = crate::client::connect(&resolved_host, port, &config).await?;
        let worker = SendWorkerHandle::spawn(
            channel,
            stream_id.clone(),
            config.request_queue_capacity,
            config.event_queue_capacity,
        );
        worker.submit(vec![ClientTask::OpenObserver], false).await?;

        Ok(Self {
            connection: Connection::new(stream_id.as_str().to_string(), resolved_host, worker),
        })
    }

    pub fn id(&self) -> &str {
        self.connection.id()
    }

    pub fn host(&self) -> &str {
        self.connection.host()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_registered_for_events(&self) -> bool {
        self.connection.is_registered_for_events()
    }

    /// Requests event delivery for this stream. `exclusive` asks the server
    /// to reject concurrent observers; the returned bool is the server's
    /// grant, not just send success.
    pub async fn register_for_events(&self, exclusive: bool) -> ClientResult<bool> {
        self.connection.register_for_events(exclusive).await
    }

    /// Non-blocking: true if an event is already queued.
    pub fn has_event(&self) -> bool {
        self.connection.has_event()
    }

    /// Waits up to one second for the next event, returning `Event::close()`
    /// if none arrives in time.
    pub async fn get_event(&self) -> Event {
        self.connection.get_event().await
    }

    pub fn set_disconnected_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.connection.set_disconnected_callback(callback);
    }

    pub async fn close(&self) -> ClientResult<()> {
        self.connection.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::SocketChannel;
    use crate::wire::MessageType;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn resolve_id_returns_the_explicit_value_unchanged() {
        assert_eq!(crate::client::resolve_id(Some("wall")), "wall");
    }

    #[tokio::test]
    async fn resolve_host_parses_embedded_port() {
        let config = ClientConfig::default();
        let (host, port) = crate::client::resolve_host(Some("wall.example.com:9000"), &config).unwrap();
        assert_eq!(host, "wall.example.com");
        assert_eq!(port, 9000);
    }

    #[tokio::test]
    async fn resolve_host_uses_config_port_when_none_embedded() {
        let config = ClientConfig::default();
        let (host, port) = crate::client::resolve_host(Some("wall.example.com"), &config).unwrap();
        assert_eq!(host, "wall.example.com");
        assert_eq!(port, config.port);
    }

    #[tokio::test]
    async fn connect_performs_handshake_and_sends_observer_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut channel = SocketChannel::new(stream, std::time::Duration::from_millis(500));
            channel.send_protocol_version().await.unwrap();
            channel.receive().await.unwrap().unwrap()
        });

        let config = ClientConfig { port: addr.port(), ..ClientConfig::default() };
        let observer = Observer::connect_with_config(Some("wall"), Some(&addr.ip().to_string()), config)
            .await
            .unwrap();
        assert_eq!(observer.id(), "wall");

        let (header, _body) = server.await.unwrap();
        assert_eq!(header.message_type(), Some(MessageType::ObserverOpen));
        assert_eq!(header.uri(), Some("wall"));
    }
}
