//! Conversion between pixel blocks and tile PNGs.

use crate::png::create_png_auto;
use image::ImageFormat;
use mosaic_common::{PixelBlock, PixelEncoding};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TileCodecError {
    #[error("PNG encoding failed: {0}")]
    Encode(String),

    #[error("PNG decoding failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("tile is {width}x{height}, expected {expected}x{expected}")]
    WrongSize { width: u32, height: u32, expected: u32 },

    #[error("block has {block} bands, encoding expects {encoding}")]
    BandMismatch { block: u8, encoding: u8 },
}

/// Encode a tile. No-data pixels become transparent.
pub fn encode_tile(block: &PixelBlock, encoding: &PixelEncoding) -> Result<Vec<u8>, TileCodecError> {
    if block.bands != encoding.bands {
        return Err(TileCodecError::BandMismatch {
            block: block.bands,
            encoding: encoding.bands,
        });
    }
    let bands = block.bands as usize;
    let color = bands == 3;

    let mut pixels = Vec::with_capacity(block.data.len() / bands * (bands + 1));
    for px in block.data.chunks_exact(bands) {
        pixels.extend_from_slice(px);
        pixels.push(if encoding.is_nodata(px) { 0 } else { 255 });
    }

    create_png_auto(&pixels, block.width as usize, block.height as usize, color)
        .map_err(TileCodecError::Encode)
}

/// Decode a tile written by [`encode_tile`] back into `encoding`.
///
/// Transparent pixels come back as the sentinel; any opaque pixel that
/// happens to equal the sentinel is nudged off it.
pub fn decode_tile(
    bytes: &[u8],
    encoding: &PixelEncoding,
    tile_size: u32,
) -> Result<PixelBlock, TileCodecError> {
    let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    if img.width() != tile_size || img.height() != tile_size {
        return Err(TileCodecError::WrongSize {
            width: img.width(),
            height: img.height(),
            expected: tile_size,
        });
    }

    let mut block = PixelBlock::filled(tile_size, tile_size, encoding);
    let bands = encoding.bands as usize;
    if bands == 1 {
        let gray = img.to_luma_alpha8();
        for (dst, src) in block.data.chunks_exact_mut(1).zip(gray.as_raw().chunks_exact(2)) {
            if src[1] != 0 {
                dst[0] = src[0];
                encoding.avoid_sentinel(dst);
            }
        }
    } else {
        let rgba = img.to_rgba8();
        for (dst, src) in block.data.chunks_exact_mut(3).zip(rgba.as_raw().chunks_exact(4)) {
            if src[3] != 0 {
                dst.copy_from_slice(&src[..3]);
                encoding.avoid_sentinel(dst);
            }
        }
    }
    Ok(block)
}

/// The fully transparent tile.
pub fn blank_tile(tile_size: u32, encoding: &PixelEncoding) -> Result<Vec<u8>, TileCodecError> {
    encode_tile(&PixelBlock::filled(tile_size, tile_size, encoding), encoding)
}
