//! Source-side connection that pushes tiles for one stream and, like
//! [`super::Observer`], can receive interaction events back (grounded on
//! `Stream.h`/`StreamPrivate.h`).

use crate::client::config::ClientConfig;
use crate::client::error::ClientResult;
use crate::client::send_worker::{ClientTask, SendWorkerHandle};
use crate::client::Connection;
use crate::segmenter::{ImageSegmenter, SourceImage};
use crate::types::{Event, SizeHints, StreamId};

/// A producer-side connection. Frames are pushed tile by tile via [`Stream::send`]
/// and closed off with [`Stream::finish_frame`].
pub struct Stream {
    connection: Connection,
    segmenter: ImageSegmenter,
    compress: bool,
    jpeg_quality: u8,
}

impl Stream {
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
        worker.submit(vec![ClientTask::OpenStream], false).await?;

        let mut segmenter = ImageSegmenter::new();
        segmenter.set_nominal_segment_dimensions(config.nominal_tile_width, config.nominal_tile_height);

        Ok(Self {
            connection: Connection::new(stream_id.as_str().to_string(), resolved_host, worker),
            segmenter,
            compress: true,
            jpeg_quality: config.jpeg_quality,
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

    /// Whether outgoing tiles are JPEG-compressed (default: yes).
    pub fn set_compression(&mut self, compress: bool) {
        self.compress = compress;
    }

    pub fn set_jpeg_quality(&mut self, quality: u8) {
        self.jpeg_quality = quality;
    }

    /// Segments `image` into tiles (JPEG-encoding them first unless
    /// compression is disabled) and enqueues them for send. Does not itself
    /// mark the frame complete — call [`Stream::finish_frame`] for that.
    pub async fn send(&self, image: SourceImage) -> ClientResult<()> {
        let tiles = if self.compress {
            self.segmenter.generate_jpeg(image, self.jpeg_quality).await?
        } else {
            self.segmenter.generate_raw(&image)?
        };

        let tasks = tiles.into_iter().map(|tile| ClientTask::Tile(Box::new(tile))).collect();
        self.submit(tasks, false).await
    }

    /// Marks the current frame complete. Per SPEC_FULL.md A.4.4, a second
    /// `finish_frame` enqueued while one is still draining the queue fails
    /// with [`crate::client::ClientError::AlreadyHavePendingFinish`] instead
    /// of queuing behind it.
    pub async fn finish_frame(&self) -> ClientResult<()> {
        self.submit(vec![ClientTask::Finish], true).await
    }

    pub async fn send_size_hints(&self, hints: SizeHints) -> ClientResult<()> {
        self.submit(vec![ClientTask::SizeHints(hints)], false).await
    }

    pub async fn send_data(&self, data: Vec<u8>) -> ClientResult<()> {
        self.submit(vec![ClientTask::Data(data)], false).await
    }

    async fn submit(&self, tasks: Vec<ClientTask>, is_finish: bool) -> ClientResult<()> {
        self.connection.submit(tasks, is_finish).await
    }

    pub fn is_registered_for_events(&self) -> bool {
        self.connection.is_registered_for_events()
    }

    pub async fn register_for_events(&self, exclusive: bool) -> ClientResult<bool> {
        self.connection.register_for_events(exclusive).await
    }

    pub fn has_event(&self) -> bool {
        self.connection.has_event()
    }

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
    use crate::types::{PixelFormat, RowOrder, View};
    use crate::wire::MessageType;
    use tokio::net::TcpListener;

    fn solid_image(width: u32, height: u32) -> SourceImage {
        SourceImage {
            data: vec![9u8; (width * height * 4) as usize].into(),
            width,
            height,
            format: PixelFormat::Rgba,
            x: 0,
            y: 0,
            view: View::Mono,
            row_order: RowOrder::TopDown,
            channel: 0,
        }
    }

    #[tokio::test]
    async fn connect_sends_stream_open_then_tile_then_finish_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut channel = SocketChannel::new(tcp, std::time::Duration::from_millis(500));
            channel.send_protocol_version().await.unwrap();
            let open = channel.receive().await.unwrap().unwrap();
            let tile = channel.receive().await.unwrap().unwrap();
            let finish = channel.receive().await.unwrap().unwrap();
            (open.0, tile.0, finish.0)
        });

        let config = ClientConfig { port: addr.port(), ..ClientConfig::default() };
        let stream = Stream::connect_with_config(Some("wall"), Some(&addr.ip().to_string()), config)
            .await
            .unwrap();
        stream.send(solid_image(8, 8)).await.unwrap();
        stream.finish_frame().await.unwrap();

        let (open_header, tile_header, finish_header) = server.await.unwrap();
        assert_eq!(open_header.message_type(), Some(MessageType::StreamOpen));
        assert_eq!(tile_header.message_type(), Some(MessageType::Tile));
        assert_eq!(finish_header.message_type(), Some(MessageType::FinishFrame));
        assert_eq!(open_header.uri(), Some("wall"));
    }

    #[tokio::test]
    async fn a_second_finish_frame_while_one_is_pending_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut channel = SocketChannel::new(tcp, std::time::Duration::from_millis(500));
            channel.send_protocol_version().await.unwrap();
            // Drain stream_open and both finish_frame messages so the
            // worker's queue still sees the client's sends succeed.
            channel.receive().await.unwrap();
            channel.receive().await.unwrap();
        });

        let config = ClientConfig { port: addr.port(), ..ClientConfig::default() };
        let stream = Stream::connect_with_config(Some("wall"), Some(&addr.ip().to_string()), config)
            .await
            .unwrap();

        let first = stream.finish_frame();
        let second = stream.finish_frame();
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_ok() ^ second.is_ok(), "exactly one finish_frame should succeed");
        server.await.unwrap();
    }
}
