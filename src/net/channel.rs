//! Length-prefixed message framing over TCP, plus the protocol-version
//! handshake exchanged immediately after connect/accept.

use crate::wire::{HeaderError, MessageHeader};
use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, Cursor};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// Default TCP port for stream connections.
pub const DEFAULT_PORT: u16 = 1701;

/// Protocol version this crate speaks. A server rejects a client whose
/// advertised version is lower than this.
pub const PROTOCOL_VERSION: u32 = 1;

/// Idle timeout on the client side while waiting for a message body.
/// Intentionally distinct from [`SERVER_RECEIVE_TIMEOUT`] (see SPEC_FULL.md
/// B.12 "Socket timeouts").
pub const CLIENT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Idle timeout on the server side while waiting for a message body.
pub const SERVER_RECEIVE_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection closed by peer")]
    Closed,
    #[error("receive timed out")]
    Timeout,
    #[error("malformed header: {0}")]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("server protocol version {server} is older than required {required}")]
    VersionTooOld { server: u32, required: u32 },
}

/// Owns one TCP connection and its read/write buffering. Not thread-safe by
/// design: it is meant to be pinned to exactly one worker task (see
/// SPEC_FULL.md A.4.2).
#[derive(Debug)]
pub struct SocketChannel {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    receive_timeout: Duration,
}

impl SocketChannel {
    pub fn new(stream: TcpStream, receive_timeout: Duration) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(8 * 1024),
            receive_timeout,
        }
    }

    /// Server-side half of the handshake: write our version immediately
    /// after accept.
    pub async fn send_protocol_version(&mut self) -> io::Result<()> {
        self.stream.write_u32_le(PROTOCOL_VERSION).await?;
        self.stream.flush().await
    }

    /// Client-side half of the handshake: read the server's version and
    /// reject it if it is older than what we require.
    pub async fn negotiate_protocol_version(&mut self) -> Result<u32, ChannelError> {
        let server_version = self.stream.read_u32_le().await?;
        if server_version < PROTOCOL_VERSION {
            return Err(ChannelError::VersionTooOld {
                server: server_version,
                required: PROTOCOL_VERSION,
            });
        }
        Ok(server_version)
    }

    /// Write a header followed by its body, then flush. Flushing blocks
    /// until the kernel has accepted the bytes, matching the "no event loop"
    /// blocking-send semantics required by SPEC_FULL.md A.4.2: send order
    /// must be preserved even without overlapping I/O.
    pub async fn send(&mut self, header: &MessageHeader, body: &[u8]) -> io::Result<()> {
        let mut encoded = BytesMut::with_capacity(MessageHeader::SERIALIZED_SIZE);
        header.encode(&mut encoded);
        self.stream.write_all(&encoded).await?;
        self.stream.write_all(body).await?;
        self.stream.flush().await
    }

    /// Read one full message, honoring the configured idle timeout on the
    /// body read. Returns `Ok(None)` on a clean peer shutdown between
    /// messages.
    pub async fn receive(&mut self) -> Result<Option<(MessageHeader, Bytes)>, ChannelError> {
        let header = match self.read_exact_or_eof(MessageHeader::SERIALIZED_SIZE).await? {
            Some(bytes) => {
                let mut cursor = Cursor::new(&bytes[..]);
                MessageHeader::decode(&mut cursor)?
            }
            None => return Ok(None),
        };

        let body_len = header.size as usize;
        let body = tokio::time::timeout(self.receive_timeout, self.read_exact(body_len))
            .await
            .map_err(|_| ChannelError::Timeout)??;

        Ok(Some((header, body.freeze())))
    }

    /// Non-blocking peek: true only if a full header plus at least
    /// `min_body_bytes` of body are already buffered.
    pub fn has_message(&self, min_body_bytes: usize) -> bool {
        if self.buffer.len() < MessageHeader::SERIALIZED_SIZE {
            return false;
        }
        let mut cursor = Cursor::new(&self.buffer[..]);
        match MessageHeader::decode(&mut cursor) {
            Ok(header) => {
                let available_body = self.buffer.len() - MessageHeader::SERIALIZED_SIZE;
                available_body >= min_body_bytes.min(header.size as usize)
            }
            Err(_) => false,
        }
    }

    async fn read_exact(&mut self, len: usize) -> io::Result<BytesMut> {
        while self.buffer.len() < len {
            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection reset by peer"));
            }
        }
        Ok(self.buffer.split_to(len))
    }

    async fn read_exact_or_eof(&mut self, len: usize) -> Result<Option<BytesMut>, ChannelError> {
        while self.buffer.len() < len {
            let read = self.stream.read_buf(&mut self.buffer).await?;
            if read == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(ChannelError::Closed)
                };
            }
        }
        Ok(Some(self.buffer.split_to(len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MessageType;
    use tokio::net::{TcpListener, TcpStream};

    async fn paired_channels() -> (SocketChannel, SocketChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_fut = TcpStream::connect(addr);
        let (server_stream, _) = listener.accept().await.unwrap();
        let client_stream = client_fut.await.unwrap();
        (
            SocketChannel::new(server_stream, SERVER_RECEIVE_TIMEOUT),
            SocketChannel::new(client_stream, CLIENT_RECEIVE_TIMEOUT),
        )
    }

    #[tokio::test]
    async fn handshake_accepts_matching_version() {
        let (mut server, mut client) = paired_channels().await;
        server.send_protocol_version().await.unwrap();
        let version = client.negotiate_protocol_version().await.unwrap();
        assert_eq!(version, PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn send_then_receive_round_trips_a_message() {
        let (mut server, mut client) = paired_channels().await;
        let header = MessageHeader::new(MessageType::FinishFrame, 0, "wall").unwrap();
        client.send(&header, &[]).await.unwrap();

        let (received_header, body) = server.receive().await.unwrap().unwrap();
        assert_eq!(received_header, header);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn receive_returns_none_on_clean_close() {
        let (mut server, client) = paired_channels().await;
        drop(client);
        assert!(server.receive().await.unwrap().is_none());
    }
}
