//! Minimal pixel-stream producer: generates a scrolling test pattern and
//! pushes it as a stream until interrupted.
//!
//! ```bash
//! cargo run --example tile_producer -- --id wall --host 127.0.0.1
//! ```

use argh::FromArgs;
use tilecast::client::Stream;
use tilecast::segmenter::SourceImage;
use tilecast::types::{PixelFormat, RowOrder, View};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Pushes a generated test pattern to a tilecast server.
#[derive(FromArgs)]
struct CliArgs {
    /// stream id (default: $DEFLECT_ID or a generated one)
    #[argh(option)]
    id: Option<String>,

    /// server host (default: $DEFLECT_HOST)
    #[argh(option)]
    host: Option<String>,

    /// pattern width in pixels
    #[argh(option, default = "640")]
    width: u32,

    /// pattern height in pixels
    #[argh(option, default = "480")]
    height: u32,

    /// how many frames to send before exiting (0 = forever)
    #[argh(option, default = "0")]
    frames: u32,
}

fn test_pattern(width: u32, height: u32, tick: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = ((x + tick) % 256) as u8;
            let g = ((y + tick) % 256) as u8;
            let b = ((x ^ y) % 256) as u8;
            data.extend_from_slice(&[r, g, b, 255]);
        }
    }
    data
}

#[tokio::main]
async fn main() -> tilecast::Result<()> {
    let args: CliArgs = argh::from_env();
    FmtSubscriber::builder().with_max_level(Level::INFO).init();

    let stream = Stream::connect(args.id.as_deref(), args.host.as_deref()).await?;
    info!(id = stream.id(), host = stream.host(), "connected");

    let mut tick: u32 = 0;
    loop {
        let image = SourceImage {
            data: test_pattern(args.width, args.height, tick).into(),
            width: args.width,
            height: args.height,
            format: PixelFormat::Rgba,
            x: 0,
            y: 0,
            view: View::Mono,
            row_order: RowOrder::TopDown,
            channel: 0,
        };

        if let Err(err) = stream.send(image).await {
            warn!(error = %err, "failed to send frame");
            break;
        }
        stream.finish_frame().await?;

        tick = tick.wrapping_add(1);
        if args.frames != 0 && tick >= args.frames {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(33)).await;
    }

    stream.close().await?;
    Ok(())
}
