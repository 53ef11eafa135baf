//! PNG encoding for tile pixel data.
//!
//! Supports four encoding modes, picked per tile:
//! - **Grayscale (color type 0)**: single-band tiles without no-data.
//! - **Gray + alpha (color type 4)**: single-band tiles with no-data.
//! - **Indexed PNG (color type 3)**: color tiles with ≤256 unique colors.
//!   Produces smaller files and encodes faster.
//! - **RGB / RGBA (color types 2 and 6)**: color tiles with more colors,
//!   RGBA only when some pixel is transparent.
//!
//! Use `create_png_auto` for automatic mode selection.

use rayon::prelude::*;
use std::collections::HashMap;
use std::io::Write;

/// Maximum colors for indexed PNG (PNG8)
const MAX_PALETTE_SIZE: usize = 256;

/// Minimum pixels to benefit from parallel palette extraction
const PARALLEL_THRESHOLD: usize = 4096; // 64x64 or larger

/// PNG color types used by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PngColorType {
    Gray = 0,
    Rgb = 2,
    Indexed = 3,
    GrayAlpha = 4,
    Rgba = 6,
}

impl PngColorType {
    fn bytes_per_pixel(self) -> usize {
        match self {
            PngColorType::Gray | PngColorType::Indexed => 1,
            PngColorType::GrayAlpha => 2,
            PngColorType::Rgb => 3,
            PngColorType::Rgba => 4,
        }
    }
}

/// Create a PNG image with automatic format selection.
///
/// `pixels` holds interleaved samples with a trailing alpha channel: gray +
/// alpha when `color` is false, RGBA otherwise. The alpha channel is only
/// kept when some pixel is not fully opaque.
pub fn create_png_auto(
    pixels: &[u8],
    width: usize,
    height: usize,
    color: bool,
) -> Result<Vec<u8>, String> {
    let channels = if color { 4 } else { 2 };
    if pixels.len() != width * height * channels {
        return Err(format!(
            "pixel buffer holds {} bytes, expected {}",
            pixels.len(),
            width * height * channels
        ));
    }
    let opaque = pixels.chunks_exact(channels).all(|px| px[channels - 1] == 255);

    if !color {
        return if opaque {
            let gray: Vec<u8> = pixels.chunks_exact(2).map(|px| px[0]).collect();
            create_png(&gray, width, height, PngColorType::Gray)
        } else {
            create_png(pixels, width, height, PngColorType::GrayAlpha)
        };
    }

    let num_pixels = pixels.len() / 4;

    // Try to extract a palette (use parallel version for larger images)
    let palette_result = if num_pixels >= PARALLEL_THRESHOLD {
        extract_palette_parallel(pixels)
    } else {
        extract_palette_sequential(pixels)
    };

    match palette_result {
        Some((palette, indices)) => create_png_indexed(width, height, &palette, &indices),
        None if opaque => {
            let rgb: Vec<u8> = pixels
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect();
            create_png(&rgb, width, height, PngColorType::Rgb)
        }
        None => create_png(pixels, width, height, PngColorType::Rgba),
    }
}

/// Pack RGBA bytes into a u32 for faster hashing and comparison
#[inline(always)]
fn pack_color(r: u8, g: u8, b: u8, a: u8) -> u32 {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16) | ((a as u32) << 24)
}

/// Unpack u32 back to RGBA tuple
#[inline(always)]
fn unpack_color(packed: u32) -> (u8, u8, u8, u8) {
    (
        packed as u8,
        (packed >> 8) as u8,
        (packed >> 16) as u8,
        (packed >> 24) as u8,
    )
}

/// Sequential palette extraction for small images.
fn extract_palette_sequential(pixels: &[u8]) -> Option<(Vec<(u8, u8, u8, u8)>, Vec<u8>)> {
    let mut color_to_index: HashMap<u32, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut palette: Vec<(u8, u8, u8, u8)> = Vec::with_capacity(MAX_PALETTE_SIZE);
    let mut indices: Vec<u8> = Vec::with_capacity(pixels.len() / 4);

    for chunk in pixels.chunks_exact(4) {
        let packed = pack_color(chunk[0], chunk[1], chunk[2], chunk[3]);

        let index = match color_to_index.get(&packed) {
            Some(&idx) => idx,
            None => {
                if palette.len() >= MAX_PALETTE_SIZE {
                    return None;
                }
                let idx = palette.len() as u8;
                palette.push((chunk[0], chunk[1], chunk[2], chunk[3]));
                color_to_index.insert(packed, idx);
                idx
            }
        };
        indices.push(index);
    }

    Some((palette, indices))
}

/// Parallel palette extraction for larger images.
///
/// Unique colors are collected per chunk, merged, and the pixels are then
/// mapped to palette indices in a second parallel pass. The palette is
/// sorted so that the output does not depend on thread scheduling.
fn extract_palette_parallel(pixels: &[u8]) -> Option<(Vec<(u8, u8, u8, u8)>, Vec<u8>)> {
    let chunk_size = (pixels.len() / 4 / rayon::current_num_threads()).max(256) * 4;

    let mut unique_colors: Vec<u32> = pixels
        .par_chunks(chunk_size)
        .flat_map(|chunk| {
            let mut local_colors: HashMap<u32, ()> = HashMap::with_capacity(MAX_PALETTE_SIZE);
            for pixel in chunk.chunks_exact(4) {
                let packed = pack_color(pixel[0], pixel[1], pixel[2], pixel[3]);
                local_colors.insert(packed, ());
                // Early exit if we definitely have too many colors
                if local_colors.len() > MAX_PALETTE_SIZE {
                    break;
                }
            }
            local_colors.into_keys().collect::<Vec<_>>()
        })
        .collect();
    unique_colors.sort_unstable();
    unique_colors.dedup();
    if unique_colors.len() > MAX_PALETTE_SIZE {
        return None;
    }

    let palette: Vec<(u8, u8, u8, u8)> = unique_colors.iter().map(|&c| unpack_color(c)).collect();
    let global_colors: HashMap<u32, u8> = unique_colors
        .iter()
        .enumerate()
        .map(|(i, &c)| (c, i as u8))
        .collect();

    let indices: Vec<u8> = pixels
        .par_chunks(4)
        .map(|px| {
            global_colors
                .get(&pack_color(px[0], px[1], px[2], px[3]))
                .copied()
                .unwrap_or(0)
        })
        .collect();

    Some((palette, indices))
}

/// Create an indexed PNG (color type 3) from palette and indices.
///
/// This is more efficient than RGBA when the image has few unique colors:
/// - 1 byte per pixel instead of 4
/// - Less data to compress
/// - Smaller output file
pub fn create_png_indexed(
    width: usize,
    height: usize,
    palette: &[(u8, u8, u8, u8)],
    indices: &[u8],
) -> Result<Vec<u8>, String> {
    let mut png = Vec::new();

    // PNG signature
    png.extend_from_slice(&[137, 80, 78, 71, 13, 10, 26, 10]);

    write_chunk(&mut png, b"IHDR", &ihdr(width, height, PngColorType::Indexed));

    // PLTE chunk (palette)
    let mut plte_data = Vec::with_capacity(palette.len() * 3);
    for (r, g, b, _) in palette {
        plte_data.push(*r);
        plte_data.push(*g);
        plte_data.push(*b);
    }
    write_chunk(&mut png, b"PLTE", &plte_data);

    // tRNS chunk (transparency) - only if any color has alpha < 255
    let has_transparency = palette.iter().any(|(_, _, _, a)| *a < 255);
    if has_transparency {
        let trns_data: Vec<u8> = palette.iter().map(|(_, _, _, a)| *a).collect();
        write_chunk(&mut png, b"tRNS", &trns_data);
    }

    let idat_data = deflate_idat(indices, width, height, 1)
        .map_err(|e| format!("IDAT compression failed: {}", e))?;
    write_chunk(&mut png, b"IDAT", &idat_data);

    write_chunk(&mut png, b"IEND", &[]);

    Ok(png)
}

/// Create a non-indexed PNG from interleaved samples of `color_type`.
pub fn create_png(
    pixels: &[u8],
    width: usize,
    height: usize,
    color_type: PngColorType,
) -> Result<Vec<u8>, String> {
    let bpp = color_type.bytes_per_pixel();
    if pixels.len() != width * height * bpp {
        return Err(format!(
            "pixel buffer holds {} bytes, expected {}",
            pixels.len(),
            width * height * bpp
        ));
    }

    let mut png = Vec::new();

    // PNG signature
    png.extend_from_slice(&[137, 80, 78, 71, 13, 10, 26, 10]);

    write_chunk(&mut png, b"IHDR", &ihdr(width, height, color_type));

    let idat_data = deflate_idat(pixels, width, height, bpp)
        .map_err(|e| format!("IDAT compression failed: {}", e))?;
    write_chunk(&mut png, b"IDAT", &idat_data);

    write_chunk(&mut png, b"IEND", &[]);

    Ok(png)
}

fn ihdr(width: usize, height: usize, color_type: PngColorType) -> Vec<u8> {
    let mut ihdr_data = Vec::with_capacity(13);
    ihdr_data.extend_from_slice(&(width as u32).to_be_bytes());
    ihdr_data.extend_from_slice(&(height as u32).to_be_bytes());
    ihdr_data.push(8); // bit depth
    ihdr_data.push(color_type as u8);
    ihdr_data.push(0); // compression method
    ihdr_data.push(0); // filter method
    ihdr_data.push(0); // interlace method
    ihdr_data
}

/// Write a PNG chunk
fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);

    let crc_data = [chunk_type.as_slice(), data].concat();
    let crc = crc32fast::hash(&crc_data);
    png.extend_from_slice(&crc.to_be_bytes());
}

/// Deflate scanlines of `bpp`-byte pixels for the IDAT chunk.
fn deflate_idat(
    pixels: &[u8],
    width: usize,
    height: usize,
    bpp: usize,
) -> Result<Vec<u8>, std::io::Error> {
    let stride = width * bpp;
    // Add filter byte (0 = no filter) to each scanline
    let mut uncompressed = Vec::with_capacity(height * (1 + stride));
    for row in pixels.chunks_exact(stride).take(height) {
        uncompressed.push(0);
        uncompressed.extend_from_slice(row);
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(&uncompressed)?;
    encoder.finish()
}
