//! Decodes JPEG [`Tile`]s back to raw RGBA, synchronously or as a
//! drop-if-busy background task (SPEC_FULL.md A.4.10).

use crate::types::{PixelFormat, Tile};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("tile is not in jpeg format")]
    NotJpeg,
    #[error("jpeg decode failed: {0}")]
    Decode(String),
    #[error("decoded size {actual:?} does not match declared tile size {expected:?}")]
    SizeMismatch { expected: (u32, u32), actual: (u32, u32) },
}

/// Stateless JPEG->RGBA decoder. Safe to share across threads; the `image`
/// crate's decoder carries no per-thread handle worth caching the way the
/// turbojpeg-backed original does (see DESIGN.md).
#[derive(Debug, Default)]
pub struct TileDecoder;

impl TileDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode `tile` in place. On success its `image_data` holds raw RGBA
    /// and its `format` is [`PixelFormat::Rgba`].
    pub fn decode(&self, tile: &mut Tile) -> Result<(), DecoderError> {
        let rgba = self.decode_to_rgba(tile)?;
        tile.image_data = rgba.into_raw();
        tile.format = PixelFormat::Rgba;
        Ok(())
    }

    /// Decode `tile` in place to planar YUV, deferring the final YUV->RGB
    /// conversion to the consumer (e.g. a GPU shader). `subsampling` must be
    /// one of [`PixelFormat::Yuv444`], [`PixelFormat::Yuv422`] or
    /// [`PixelFormat::Yuv420`].
    pub fn decode_to_yuv(&self, tile: &mut Tile, subsampling: PixelFormat) -> Result<(), DecoderError> {
        let rgba = self.decode_to_rgba(tile)?;
        tile.image_data = to_planar_yuv(&rgba, subsampling)?;
        tile.format = subsampling;
        Ok(())
    }

    fn decode_to_rgba(&self, tile: &Tile) -> Result<image::RgbaImage, DecoderError> {
        if tile.format != PixelFormat::Jpeg {
            return Err(DecoderError::NotJpeg);
        }

        let decoded = image::load_from_memory_with_format(&tile.image_data, image::ImageFormat::Jpeg)
            .map_err(|err| DecoderError::Decode(err.to_string()))?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width != tile.width || height != tile.height {
            return Err(DecoderError::SizeMismatch {
                expected: (tile.width, tile.height),
                actual: (width, height),
            });
        }
        Ok(rgba)
    }
}

/// BT.601 full-range RGB->YCbCr, followed by the chroma subsampling implied
/// by `subsampling`. Matches `_getExpectedSize`'s byte counts: `w*h*3` for
/// 444, `w*h*2` for 422, `w*h + (w*h>>1)` for 420.
fn to_planar_yuv(rgba: &image::RgbaImage, subsampling: PixelFormat) -> Result<Vec<u8>, DecoderError> {
    let (width, height) = rgba.dimensions();
    let (w, h) = (width as usize, height as usize);

    let mut y_plane = Vec::with_capacity(w * h);
    let mut cb_full = Vec::with_capacity(w * h);
    let mut cr_full = Vec::with_capacity(w * h);
    for pixel in rgba.pixels() {
        let [r, g, b, _] = pixel.0;
        let (r, g, b) = (r as f32, g as f32, b as f32);
        y_plane.push((0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8);
        cb_full.push((-0.168736 * r - 0.331264 * g + 0.5 * b + 128.0).round().clamp(0.0, 255.0) as u8);
        cr_full.push((0.5 * r - 0.418688 * g - 0.081312 * b + 128.0).round().clamp(0.0, 255.0) as u8);
    }

    let (cb, cr) = match subsampling {
        PixelFormat::Yuv444 => (cb_full, cr_full),
        PixelFormat::Yuv422 => (subsample_horizontal(&cb_full, w, h), subsample_horizontal(&cr_full, w, h)),
        PixelFormat::Yuv420 => (subsample_both(&cb_full, w, h), subsample_both(&cr_full, w, h)),
        other => {
            return Err(DecoderError::Decode(format!("{other:?} is not a YUV subsampling")));
        }
    };

    let mut out = y_plane;
    out.extend(cb);
    out.extend(cr);
    Ok(out)
}

fn subsample_horizontal(plane: &[u8], width: usize, height: usize) -> Vec<u8> {
    let half_width = width / 2;
    let mut out = Vec::with_capacity(half_width * height);
    for row in 0..height {
        for col in 0..half_width {
            out.push(plane[row * width + col * 2]);
        }
    }
    out
}

fn subsample_both(plane: &[u8], width: usize, height: usize) -> Vec<u8> {
    let (half_width, half_height) = (width / 2, height / 2);
    let mut out = Vec::with_capacity(half_width * half_height);
    for row in 0..half_height {
        for col in 0..half_width {
            out.push(plane[(row * 2) * width + col * 2]);
        }
    }
    out
}

/// Background decode with the `startDecoding`/`waitDecoding` drop-if-busy
/// contract: a second `start_decoding` call while one is already in flight
/// is silently ignored rather than queued.
#[derive(Debug)]
pub struct AsyncTileDecoder {
    decoder: Arc<TileDecoder>,
    in_flight: Option<JoinHandle<Result<Tile, DecoderError>>>,
}

impl Default for AsyncTileDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncTileDecoder {
    pub fn new() -> Self {
        Self {
            decoder: Arc::new(TileDecoder::new()),
            in_flight: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Starts decoding `tile` on the blocking pool. Drops the request if a
    /// decode is already running.
    pub fn start_decoding(&mut self, mut tile: Tile) {
        if self.is_running() {
            return;
        }
        let decoder = Arc::clone(&self.decoder);
        self.in_flight = Some(tokio::task::spawn_blocking(move || {
            decoder.decode(&mut tile)?;
            Ok(tile)
        }));
    }

    /// Waits for the in-flight decode to finish. Returns `None` if no decode
    /// was started since the last `wait_decoding`.
    pub async fn wait_decoding(&mut self) -> Option<Result<Tile, DecoderError>> {
        let handle = self.in_flight.take()?;
        match handle.await {
            Ok(result) => Some(result),
            Err(join_err) => Some(Err(DecoderError::Decode(join_err.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RowOrder, View};
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageBuffer, Rgba};

    fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let buffer: ImageBuffer<Rgba<u8>, _> = ImageBuffer::from_fn(width, height, |_, _| Rgba([200, 100, 50, 255]));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90).encode_image(&buffer).unwrap();
        out
    }

    fn jpeg_tile(width: u32, height: u32) -> Tile {
        Tile {
            x: 0,
            y: 0,
            width,
            height,
            format: PixelFormat::Jpeg,
            view: View::Mono,
            row_order: RowOrder::TopDown,
            channel: 0,
            image_data: sample_jpeg(width, height),
        }
    }

    #[test]
    fn decodes_jpeg_tile_to_rgba() {
        let mut tile = jpeg_tile(16, 16);
        TileDecoder::new().decode(&mut tile).unwrap();
        assert_eq!(tile.format, PixelFormat::Rgba);
        assert_eq!(tile.image_data.len(), 16 * 16 * 4);
    }

    #[test]
    fn decodes_jpeg_tile_to_yuv420_with_expected_size() {
        let mut tile = jpeg_tile(16, 16);
        TileDecoder::new().decode_to_yuv(&mut tile, PixelFormat::Yuv420).unwrap();
        assert_eq!(tile.format, PixelFormat::Yuv420);
        // w*h + (w*h >> 1)
        assert_eq!(tile.image_data.len(), 16 * 16 + (16 * 16 / 2));
    }

    #[test]
    fn decodes_jpeg_tile_to_yuv444_with_expected_size() {
        let mut tile = jpeg_tile(16, 16);
        TileDecoder::new().decode_to_yuv(&mut tile, PixelFormat::Yuv444).unwrap();
        assert_eq!(tile.format, PixelFormat::Yuv444);
        assert_eq!(tile.image_data.len(), 16 * 16 * 3);
    }

    #[test]
    fn rejects_non_jpeg_tile() {
        let mut tile = Tile {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            format: PixelFormat::Rgba,
            view: View::Mono,
            row_order: RowOrder::TopDown,
            channel: 0,
            image_data: vec![0; 4],
        };
        assert!(matches!(TileDecoder::new().decode(&mut tile), Err(DecoderError::NotJpeg)));
    }

    #[tokio::test]
    async fn async_decoder_round_trips_start_and_wait() {
        let mut decoder = AsyncTileDecoder::new();
        decoder.start_decoding(jpeg_tile(8, 8));

        let result = decoder.wait_decoding().await.unwrap().unwrap();
        assert_eq!(result.format, PixelFormat::Rgba);
        // No decode started since the last wait.
        assert!(decoder.wait_decoding().await.is_none());
    }
}
