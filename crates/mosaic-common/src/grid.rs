//! Affine georeferencing and the global pixel grid of a pyramid level.
//!
//! Every normalized raster and the mosaic live on the pixel grid of one
//! pyramid level: the Mercator world square divided into
//! `tile_size * 2^zoom` pixels per axis, origin at the top-left corner.
//! Windows into that grid are expressed in global pixel coordinates, so
//! rasters on the same level align exactly and need no resampling to merge.

use crate::{BoundingBox, Crs, TileRange};
use serde::{Deserialize, Serialize};

/// Deepest zoom level the pipeline will build.
///
/// At this level with 1024-pixel tiles the grid is 2^34 pixels wide, which
/// still fits the `u64` pixel coordinates and the `u32` tile coordinates.
pub const MAX_ZOOM: u32 = 24;

/// Tolerance (in pixels) applied when snapping coordinates to the grid.
const SNAP_EPSILON: f64 = 1e-6;

/// Affine pixel-to-world transform in GDAL coefficient order.
///
/// `x = c[0] + col * c[1] + row * c[2]`
/// `y = c[3] + col * c[4] + row * c[5]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform with the top-left corner at (`min_x`, `max_y`).
    pub fn north_up(min_x: f64, max_y: f64, res_x: f64, res_y: f64) -> Self {
        Self([min_x, res_x, 0.0, max_y, 0.0, -res_y])
    }

    /// Map a (fractional) pixel position to world coordinates.
    #[inline]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let c = &self.0;
        (
            c[0] + col * c[1] + row * c[2],
            c[3] + col * c[4] + row * c[5],
        )
    }

    /// The world-to-pixel transform, or None for a singular matrix.
    pub fn invert(&self) -> Option<GeoTransform> {
        let [g0, g1, g2, g3, g4, g5] = self.0;
        let det = g1 * g5 - g2 * g4;
        if det.abs() < f64::EPSILON * (g1.abs() + g5.abs()).max(1e-300) || !det.is_finite() {
            return None;
        }
        Some(GeoTransform([
            (g2 * g3 - g5 * g0) / det,
            g5 / det,
            -g2 / det,
            (g4 * g0 - g1 * g3) / det,
            -g4 / det,
            g1 / det,
        ]))
    }

    /// Ground size of one pixel along the column and row axes.
    pub fn pixel_size(&self) -> (f64, f64) {
        let c = &self.0;
        (c[1].hypot(c[4]), c[2].hypot(c[5]))
    }
}

/// Rectangle of global pixel coordinates on a level grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    pub col: u64,
    pub row: u64,
    pub width: u64,
    pub height: u64,
}

impl PixelWindow {
    pub fn new(col: u64, row: u64, width: u64, height: u64) -> Self {
        Self {
            col,
            row,
            width,
            height,
        }
    }

    /// One past the last column.
    pub fn end_col(&self) -> u64 {
        self.col + self.width
    }

    /// One past the last row.
    pub fn end_row(&self) -> u64 {
        self.row + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> u64 {
        self.width * self.height
    }

    pub fn intersect(&self, other: &PixelWindow) -> Option<PixelWindow> {
        let col = self.col.max(other.col);
        let row = self.row.max(other.row);
        let end_col = self.end_col().min(other.end_col());
        let end_row = self.end_row().min(other.end_row());
        if end_col <= col || end_row <= row {
            return None;
        }
        Some(PixelWindow::new(col, row, end_col - col, end_row - row))
    }

    pub fn union(&self, other: &PixelWindow) -> PixelWindow {
        let col = self.col.min(other.col);
        let row = self.row.min(other.row);
        let end_col = self.end_col().max(other.end_col());
        let end_row = self.end_row().max(other.end_row());
        PixelWindow::new(col, row, end_col - col, end_row - row)
    }
}

/// The global pixel grid of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelGrid {
    pub crs: Crs,
    pub tile_size: u32,
    pub zoom: u32,
}

impl LevelGrid {
    pub fn new(crs: Crs, tile_size: u32, zoom: u32) -> Self {
        Self {
            crs,
            tile_size,
            zoom,
        }
    }

    /// The same grid at another zoom level.
    pub fn at_zoom(&self, zoom: u32) -> Self {
        Self { zoom, ..*self }
    }

    /// Number of tiles along each axis: `2^zoom`.
    pub fn tiles_per_axis(&self) -> u64 {
        1u64 << self.zoom
    }

    /// Number of pixels along each axis: `tile_size * 2^zoom`.
    pub fn pixels_per_axis(&self) -> u64 {
        (self.tile_size as u64) << self.zoom
    }

    /// Ground size of one pixel in CRS units.
    pub fn resolution(&self) -> f64 {
        2.0 * self.crs.half_circumference() / self.pixels_per_axis() as f64
    }

    /// World coordinates of a pixel's center.
    #[inline]
    pub fn pixel_center(&self, col: u64, row: u64) -> (f64, f64) {
        let half = self.crs.half_circumference();
        let res = self.resolution();
        (
            -half + (col as f64 + 0.5) * res,
            half - (row as f64 + 0.5) * res,
        )
    }

    /// Snap a CRS-space box outward to whole pixels, clamped to the world.
    ///
    /// Returns None when the box lies outside the world or covers no pixel.
    pub fn window_for_bounds(&self, bounds: &BoundingBox) -> Option<PixelWindow> {
        let half = self.crs.half_circumference();
        let res = self.resolution();
        let n = self.pixels_per_axis() as f64;

        let to_col = |x: f64| ((x + half) / res).clamp(0.0, n);
        let to_row = |y: f64| ((half - y) / res).clamp(0.0, n);

        let c0 = (to_col(bounds.min_x) + SNAP_EPSILON).floor();
        let c1 = (to_col(bounds.max_x) - SNAP_EPSILON).ceil();
        let r0 = (to_row(bounds.max_y) + SNAP_EPSILON).floor();
        let r1 = (to_row(bounds.min_y) - SNAP_EPSILON).ceil();

        if !(c1 > c0 && r1 > r0) {
            return None;
        }
        Some(PixelWindow::new(
            c0 as u64,
            r0 as u64,
            (c1 - c0) as u64,
            (r1 - r0) as u64,
        ))
    }

    /// CRS-space extent of a window.
    pub fn window_bounds(&self, window: &PixelWindow) -> BoundingBox {
        let half = self.crs.half_circumference();
        let res = self.resolution();
        BoundingBox::new(
            -half + window.col as f64 * res,
            half - window.end_row() as f64 * res,
            -half + window.end_col() as f64 * res,
            half - window.row as f64 * res,
        )
    }

    /// Affine transform whose pixel (0, 0) is the window's top-left pixel.
    pub fn geotransform(&self, window: &PixelWindow) -> GeoTransform {
        let bounds = self.window_bounds(window);
        let res = self.resolution();
        GeoTransform::north_up(bounds.min_x, bounds.max_y, res, res)
    }

    /// Tiles at this level that intersect a window on this level.
    pub fn tile_range(&self, window: &PixelWindow) -> Option<TileRange> {
        if window.is_empty() {
            return None;
        }
        let t = self.tile_size as u64;
        Some(TileRange {
            z: self.zoom,
            min_x: (window.col / t) as u32,
            max_x: ((window.end_col() - 1) / t) as u32,
            min_y: (window.row / t) as u32,
            max_y: ((window.end_row() - 1) / t) as u32,
        })
    }

    /// Project a window on this level to the coarser level `zoom`.
    pub fn window_at_zoom(&self, window: &PixelWindow, zoom: u32) -> PixelWindow {
        debug_assert!(zoom <= self.zoom);
        let shift = self.zoom - zoom;
        let scale = 1u64 << shift;
        let col = window.col >> shift;
        let row = window.row >> shift;
        let end_col = window.end_col().div_ceil(scale);
        let end_row = window.end_row().div_ceil(scale);
        PixelWindow::new(col, row, end_col - col, end_row - row)
    }
}
