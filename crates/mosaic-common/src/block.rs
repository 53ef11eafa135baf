//! In-memory block of 8-bit interleaved pixels.

use crate::PixelEncoding;

/// A rectangular block of interleaved 8-bit pixels in row-major order.
///
/// Used for mosaic strips, tiles and everything in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBlock {
    pub width: u32,
    pub height: u32,
    pub bands: u8,
    pub data: Vec<u8>,
}

impl PixelBlock {
    /// A block where every pixel is the encoding's sentinel.
    pub fn filled(width: u32, height: u32, encoding: &PixelEncoding) -> Self {
        Self {
            width,
            height,
            bands: encoding.bands,
            data: vec![encoding.nodata; width as usize * height as usize * encoding.bands as usize],
        }
    }

    pub fn from_raw(width: u32, height: u32, bands: u8, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * bands as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            bands,
            data,
        })
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.bands as usize
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let start = self.offset(x, y);
        &self.data[start..start + self.bands as usize]
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let start = self.offset(x, y);
        let bands = self.bands as usize;
        &mut self.data[start..start + bands]
    }

    /// Bytes of one row.
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * self.bands as usize;
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /// True when every pixel is no-data.
    pub fn is_empty(&self, encoding: &PixelEncoding) -> bool {
        self.data.iter().all(|&v| v == encoding.nodata)
    }

    /// Number of pixels holding data.
    pub fn valid_pixel_count(&self, encoding: &PixelEncoding) -> usize {
        self.data
            .chunks_exact(self.bands as usize)
            .filter(|px| !encoding.is_nodata(px))
            .count()
    }

    /// Copy a `width × height` rectangle from `src` at (`src_x`, `src_y`)
    /// into this block at (`dst_x`, `dst_y`).
    ///
    /// With `skip_nodata`, source no-data pixels leave the destination
    /// untouched (last-wins compositing).
    #[allow(clippy::too_many_arguments)]
    pub fn copy_rect(
        &mut self,
        src: &PixelBlock,
        src_x: u32,
        src_y: u32,
        dst_x: u32,
        dst_y: u32,
        width: u32,
        height: u32,
        skip_nodata: Option<&PixelEncoding>,
    ) {
        debug_assert_eq!(self.bands, src.bands);
        let bands = self.bands as usize;
        let span = width as usize * bands;

        for row in 0..height {
            let s = src.offset(src_x, src_y + row);
            let d = self.offset(dst_x, dst_y + row);
            let src_row = &src.data[s..s + span];

            match skip_nodata {
                None => self.data[d..d + span].copy_from_slice(src_row),
                Some(encoding) => {
                    let dst_row = &mut self.data[d..d + span];
                    for (dst_px, src_px) in dst_row
                        .chunks_exact_mut(bands)
                        .zip(src_row.chunks_exact(bands))
                    {
                        if !encoding.is_nodata(src_px) {
                            dst_px.copy_from_slice(src_px);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_block_is_empty() {
        let enc = PixelEncoding::rgb(0);
        let block = PixelBlock::filled(4, 3, &enc);
        assert_eq!(block.data.len(), 36);
        assert!(block.is_empty(&enc));
        assert_eq!(block.valid_pixel_count(&enc), 0);
    }

    #[test]
    fn test_copy_rect_skips_nodata() {
        let enc = PixelEncoding::gray(0);
        let mut dst = PixelBlock::from_raw(3, 1, 1, vec![5, 5, 5]).unwrap();
        let src = PixelBlock::from_raw(3, 1, 1, vec![9, 0, 9]).unwrap();

        dst.copy_rect(&src, 0, 0, 0, 0, 3, 1, Some(&enc));
        assert_eq!(dst.data, vec![9, 5, 9]);

        dst.copy_rect(&src, 0, 0, 0, 0, 3, 1, None);
        assert_eq!(dst.data, vec![9, 0, 9]);
    }

    #[test]
    fn test_copy_rect_offsets() {
        let mut dst = PixelBlock::filled(4, 4, &PixelEncoding::gray(0));
        let src = PixelBlock::from_raw(2, 2, 1, vec![1, 2, 3, 4]).unwrap();
        dst.copy_rect(&src, 1, 1, 2, 3, 1, 1, None);
        assert_eq!(dst.pixel(2, 3), &[4]);
        assert_eq!(dst.valid_pixel_count(&PixelEncoding::gray(0)), 1);
    }
}
