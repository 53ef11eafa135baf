//! Pixel encoding shared by normalized rasters, the mosaic and tiles.

use serde::{Deserialize, Serialize};

/// Fixed output pixel encoding: 8-bit samples, 1 or 3 bands, and an explicit
/// no-data sentinel value.
///
/// A pixel is no-data when every band equals `nodata`. Real pixels are never
/// allowed to collide with the sentinel (see [`PixelEncoding::avoid_sentinel`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelEncoding {
    pub bit_depth: u8,
    pub bands: u8,
    pub nodata: u8,
}

impl Default for PixelEncoding {
    fn default() -> Self {
        Self {
            bit_depth: 8,
            bands: 1,
            nodata: 0,
        }
    }
}

impl PixelEncoding {
    pub fn gray(nodata: u8) -> Self {
        Self {
            bit_depth: 8,
            bands: 1,
            nodata,
        }
    }

    pub fn rgb(nodata: u8) -> Self {
        Self {
            bit_depth: 8,
            bands: 3,
            nodata,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bit_depth != 8 {
            return Err(format!(
                "encoding.bit_depth must be 8, got {}",
                self.bit_depth
            ));
        }
        if self.bands != 1 && self.bands != 3 {
            return Err(format!("encoding.bands must be 1 or 3, got {}", self.bands));
        }
        Ok(())
    }

    /// Bytes per pixel (one byte per band).
    pub fn bytes_per_pixel(&self) -> usize {
        self.bands as usize
    }

    #[inline]
    pub fn is_nodata(&self, pixel: &[u8]) -> bool {
        pixel.iter().all(|&v| v == self.nodata)
    }

    /// Nudge a real pixel that happens to equal the sentinel by one level in
    /// its first band so it stays distinguishable from no-data.
    #[inline]
    pub fn avoid_sentinel(&self, pixel: &mut [u8]) {
        if self.is_nodata(pixel) {
            pixel[0] = if self.nodata == u8::MAX {
                self.nodata - 1
            } else {
                self.nodata + 1
            };
        }
    }
}
