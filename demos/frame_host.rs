//! Minimal pixel-stream host: accepts connections, requests every frame as
//! soon as a stream opens, and logs what arrives.
//!
//! ```bash
//! cargo run --example frame_host -- --port 1701
//! ```

use argh::FromArgs;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tilecast::server::{Acceptor, ServerConfig, ServerHandler};
use tilecast::types::{Frame, SizeHints, StreamId};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Accepts pixel streams and logs what it receives.
#[derive(FromArgs)]
struct CliArgs {
    /// listening port
    #[argh(option, default = "1701")]
    port: u16,
}

struct LoggingHandler {
    dispatcher: tokio::sync::OnceCell<tilecast::server::DispatcherHandle>,
}

impl ServerHandler for LoggingHandler {
    fn pixel_stream_opened(&self, stream_id: &StreamId) {
        info!(%stream_id, "stream opened");
        if let Some(dispatcher) = self.dispatcher.get() {
            let dispatcher = dispatcher.clone();
            let stream_id = stream_id.clone();
            tokio::spawn(async move { dispatcher.request_frame(stream_id).await });
        }
    }

    fn pixel_stream_closed(&self, stream_id: &StreamId) {
        info!(%stream_id, "stream closed");
    }

    fn received_frame(&self, frame: Frame) {
        let (width, height) = frame.dimensions();
        info!(
            stream_id = %frame.stream_id,
            tiles = frame.tiles.len(),
            width,
            height,
            "received frame"
        );
        if let Some(dispatcher) = self.dispatcher.get() {
            let dispatcher = dispatcher.clone();
            let stream_id = frame.stream_id;
            tokio::spawn(async move { dispatcher.request_frame(stream_id).await });
        }
    }

    fn received_size_hints(&self, stream_id: &StreamId, hints: SizeHints) {
        info!(%stream_id, ?hints, "received size hints");
    }

    fn register_to_events(
        &self,
        stream_id: &StreamId,
        exclusive: bool,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        info!(%stream_id, exclusive, "rejecting event registration (frame_host is display-only)");
        Box::pin(async { false })
    }
}

#[tokio::main]
async fn main() -> tilecast::Result<()> {
    let args: CliArgs = argh::from_env();
    FmtSubscriber::builder().with_max_level(Level::INFO).init();

    let handler = Arc::new(LoggingHandler { dispatcher: tokio::sync::OnceCell::new() });
    let config = ServerConfig { port: args.port, ..ServerConfig::default() };
    let acceptor = Acceptor::new(handler.clone(), config);
    handler
        .dispatcher
        .set(acceptor.dispatcher())
        .unwrap_or_else(|_| unreachable!("dispatcher set exactly once before accepting connections"));

    acceptor.run().await?;
    Ok(())
}
