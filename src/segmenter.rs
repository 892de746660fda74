//! Splits a producer-side source image into wire [`Tile`]s, optionally
//! JPEG-encoding each one in parallel (SPEC_FULL.md A.4.4).

use crate::types::{PixelFormat, RowOrder, Tile, View};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegmenterError {
    #[error("side_by_side image width must be even")]
    OddSideBySideWidth,
    #[error("pixel format {0:?} has no fixed bytes-per-pixel; only raw formats can be segmented")]
    NotARawFormat(PixelFormat),
    #[error("jpeg encode failed: {0}")]
    JpegEncode(String),
    #[error("uncompressed output split into more than one tile must be Rgba, got {0:?}")]
    RawMultiTileRequiresRgba(PixelFormat),
}

/// One frame's worth of raw pixels from a single producer, before tiling.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub x: u32,
    pub y: u32,
    pub view: View,
    pub row_order: RowOrder,
    pub channel: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct SegmentationInfo {
    width: u32,
    height: u32,
    count_x: u32,
    count_y: u32,
    last_width: u32,
    last_height: u32,
}

#[derive(Debug, Clone, Copy)]
struct SegmentParams {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// Tiling grid. A nominal segment size of `(0, 0)` (the default) means "one
/// segment covering the whole image".
#[derive(Debug, Default)]
pub struct ImageSegmenter {
    nominal_segment_width: u32,
    nominal_segment_height: u32,
}

impl ImageSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_nominal_segment_dimensions(&mut self, width: u32, height: u32) {
        self.nominal_segment_width = width;
        self.nominal_segment_height = height;
    }

    /// Slice `image` into uncompressed tiles. Per SPEC_FULL.md A.4.3, a
    /// non-`Rgba` raw format is only allowed when the image isn't actually
    /// split (a single tile and a single view).
    pub fn generate_raw(&self, image: &SourceImage) -> Result<Vec<Tile>, SegmenterError> {
        let bytes_per_pixel = image
            .format
            .bytes_per_pixel()
            .ok_or(SegmenterError::NotARawFormat(image.format))?;

        let views = self.segment_views(image)?;
        if views.len() > 1 && image.format != PixelFormat::Rgba {
            return Err(SegmenterError::RawMultiTileRequiresRgba(image.format));
        }

        views
            .into_iter()
            .map(|(params, view)| {
                Ok(Tile {
                    x: params.x,
                    y: params.y,
                    width: params.width,
                    height: params.height,
                    format: image.format,
                    view,
                    row_order: image.row_order,
                    channel: image.channel,
                    image_data: copy_region(image, &params, view, bytes_per_pixel),
                })
            })
            .collect()
    }

    /// Slice and JPEG-encode `image`'s tiles. Each tile is encoded on the
    /// blocking thread pool (`tokio::task::spawn_blocking`, standing in for
    /// `QtConcurrent::map`); results are awaited back in segment order so the
    /// returned list is always deterministic regardless of which encode
    /// finishes first.
    pub async fn generate_jpeg(&self, image: SourceImage, quality: u8) -> Result<Vec<Tile>, SegmenterError> {
        let bytes_per_pixel = image
            .format
            .bytes_per_pixel()
            .ok_or(SegmenterError::NotARawFormat(image.format))?;
        let image = Arc::new(image);

        let handles: Vec<_> = self
            .segment_views(&image)?
            .into_iter()
            .map(|(params, view)| {
                let image = Arc::clone(&image);
                tokio::task::spawn_blocking(move || {
                    let region = copy_region(&image, &params, view, bytes_per_pixel);
                    encode_jpeg_tile(&region, params.width, params.height, image.format, quality).map(|jpeg| Tile {
                        x: params.x,
                        y: params.y,
                        width: params.width,
                        height: params.height,
                        format: PixelFormat::Jpeg,
                        view,
                        row_order: image.row_order,
                        channel: image.channel,
                        image_data: jpeg,
                    })
                })
            })
            .collect();

        let mut tiles = Vec::with_capacity(handles.len());
        for handle in handles {
            let tile = handle.await.map_err(|err| SegmenterError::JpegEncode(err.to_string()))??;
            tiles.push(tile);
        }
        Ok(tiles)
    }

    fn segment_views(&self, image: &SourceImage) -> Result<Vec<(SegmentParams, View)>, SegmenterError> {
        let params = self.segment_params(image);
        let mut views: Vec<(SegmentParams, View)> = params
            .iter()
            .map(|p| (*p, if image.view == View::SideBySide { View::LeftEye } else { image.view }))
            .collect();

        if image.view == View::SideBySide {
            if image.width % 2 != 0 {
                return Err(SegmenterError::OddSideBySideWidth);
            }
            views.extend(params.iter().map(|p| (*p, View::RightEye)));
        }
        Ok(views)
    }

    fn segment_params(&self, image: &SourceImage) -> Vec<SegmentParams> {
        let info = self.segmentation_info(image);
        let mut out = Vec::with_capacity((info.count_x * info.count_y) as usize);
        for j in 0..info.count_y {
            for i in 0..info.count_x {
                out.push(SegmentParams {
                    x: image.x + i * info.width,
                    y: image.y + j * info.height,
                    width: if i + 1 < info.count_x { info.width } else { info.last_width },
                    height: if j + 1 < info.count_y { info.height } else { info.last_height },
                });
            }
        }
        out
    }

    fn segmentation_info(&self, image: &SourceImage) -> SegmentationInfo {
        let image_width = if image.view == View::SideBySide { image.width / 2 } else { image.width };

        if self.nominal_segment_width == 0 || self.nominal_segment_height == 0 {
            return SegmentationInfo {
                width: self.nominal_segment_width,
                height: self.nominal_segment_height,
                count_x: 1,
                count_y: 1,
                last_width: image_width,
                last_height: image.height,
            };
        }

        let mut count_x = image_width / self.nominal_segment_width + 1;
        let mut count_y = image.height / self.nominal_segment_height + 1;
        let mut last_width = image_width % self.nominal_segment_width;
        let mut last_height = image.height % self.nominal_segment_height;

        if last_width == 0 {
            last_width = self.nominal_segment_width;
            count_x -= 1;
        }
        if last_height == 0 {
            last_height = self.nominal_segment_height;
            count_y -= 1;
        }

        SegmentationInfo {
            width: self.nominal_segment_width,
            height: self.nominal_segment_height,
            count_x,
            count_y,
            last_width,
            last_height,
        }
    }
}

fn copy_region(image: &SourceImage, params: &SegmentParams, view: View, bytes_per_pixel: u32) -> Vec<u8> {
    let bpp = bytes_per_pixel as usize;
    let pitch = image.width as usize * bpp;
    let mut x_offset = (params.x - image.x) as usize * bpp;
    if image.view == View::SideBySide && view == View::RightEye {
        x_offset += image.width as usize / 2 * bpp;
    }
    let row_bytes = params.width as usize * bpp;

    let mut out = Vec::with_capacity(row_bytes * params.height as usize);
    let mut row_start = (params.y - image.y) as usize * pitch + x_offset;
    for _ in 0..params.height {
        out.extend_from_slice(&image.data[row_start..row_start + row_bytes]);
        row_start += pitch;
    }
    out
}

fn encode_jpeg_tile(
    raw: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    quality: u8,
) -> Result<Vec<u8>, SegmenterError> {
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageBuffer, Rgba};

    let rgba = to_rgba(raw, format)
        .ok_or_else(|| SegmenterError::JpegEncode(format!("unsupported raw format for jpeg encode: {format:?}")))?;
    let buffer: ImageBuffer<Rgba<u8>, _> =
        ImageBuffer::from_raw(width, height, rgba).ok_or_else(|| SegmenterError::JpegEncode("tile buffer size mismatch".to_string()))?;

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&buffer)
        .map_err(|err| SegmenterError::JpegEncode(err.to_string()))?;
    Ok(out)
}

fn to_rgba(raw: &[u8], format: PixelFormat) -> Option<Vec<u8>> {
    match format {
        PixelFormat::Rgba => Some(raw.to_vec()),
        PixelFormat::Rgb => Some(raw.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect()),
        PixelFormat::Bgra => Some(raw.chunks_exact(4).flat_map(|p| [p[2], p[1], p[0], p[3]]).collect()),
        PixelFormat::Bgr => Some(raw.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0], 255]).collect()),
        PixelFormat::Argb => Some(raw.chunks_exact(4).flat_map(|p| [p[1], p[2], p[3], p[0]]).collect()),
        PixelFormat::Abgr => Some(raw.chunks_exact(4).flat_map(|p| [p[3], p[2], p[1], p[0]]).collect()),
        _ => None,
    }
}
