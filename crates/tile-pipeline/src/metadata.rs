//! Tile-set description for map viewers, and tile location helpers.

use crate::config::EmptyTilePolicy;
use crate::plan::PyramidPlan;
use crate::pyramid::PyramidSummary;
use mosaic_common::tile::tile_to_latlon_bounds;
use mosaic_common::{MapperError, MapperResult, PixelEncoding, TileCoord, TileScheme, MAX_ZOOM};
use projection::Mercator;
use raster_io::atomic::write_atomic;
use raster_io::RasterHeader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";

/// Written next to the tiles as `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSetMetadata {
    pub format: String,
    pub scheme: TileScheme,
    pub tile_size: u32,
    pub min_zoom: u32,
    pub max_zoom: u32,
    /// West, south, east, north in degrees.
    pub bounds: [f64; 4],
    /// Longitude, latitude and a zoom showing the whole mosaic.
    pub center: [f64; 3],
    pub crs: String,
    pub body_radius_m: f64,
    pub encoding: PixelEncoding,
    pub empty_tiles: EmptyTilePolicy,
    pub tile_counts: BTreeMap<u32, u64>,
}

impl TileSetMetadata {
    pub fn describe(
        plan: &PyramidPlan,
        mosaic: &RasterHeader,
        summary: &PyramidSummary,
        empty_tiles: EmptyTilePolicy,
    ) -> Self {
        let bbox = mosaic.bounds();
        let mercator = Mercator::new(plan.crs.radius, plan.crs.center_lon);
        let (west, south) = mercator.inverse(bbox.min_x, bbox.min_y);
        let (east, north) = mercator.inverse(bbox.max_x, bbox.max_y);
        let (cx, cy) = bbox.center();
        let (center_lon, center_lat) = mercator.inverse(cx, cy);

        let span = mosaic.window.width.max(mosaic.window.height) as f64 / plan.tile_size as f64;
        let shrink = if span > 1.0 { span.log2().ceil() as u32 } else { 0 };
        let fit_zoom = plan.max_zoom.saturating_sub(shrink).max(plan.min_zoom);

        Self {
            format: "png".to_string(),
            scheme: plan.scheme,
            tile_size: plan.tile_size,
            min_zoom: plan.min_zoom,
            max_zoom: plan.max_zoom,
            bounds: [west, south, east, north],
            center: [center_lon, center_lat, fit_zoom as f64],
            crs: plan.crs.to_string(),
            body_radius_m: plan.crs.radius,
            encoding: mosaic.encoding,
            empty_tiles,
            tile_counts: summary.tile_counts(),
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(METADATA_FILE)
    }

    pub fn write(&self, dir: &Path) -> MapperResult<PathBuf> {
        let path = Self::path(dir);
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| MapperError::storage(&path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    pub fn read(dir: &Path) -> MapperResult<Self> {
        let path = Self::path(dir);
        let text = fs::read_to_string(&path).map_err(|e| MapperError::storage(&path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| MapperError::storage(&path, io::Error::new(io::ErrorKind::InvalidData, e)))
    }
}

/// Where a tile is on the body, and a zoom for centering a viewer on it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TileLocation {
    pub coord: TileCoord,
    pub lat: f64,
    pub lon: f64,
    pub view_zoom: u32,
}

/// Locate tile `(z, x, y)` given in `scheme`: its north-west corner, or its
/// center when `center` is set. The suggested view zoom is one level deeper
/// for a corner and two for a center.
pub fn locate_tile(
    z: u32,
    x: u32,
    y: u32,
    scheme: TileScheme,
    center: bool,
) -> MapperResult<TileLocation> {
    if z > MAX_ZOOM {
        return Err(MapperError::ZoomOutOfRange(format!(
            "zoom {} exceeds {}",
            z, MAX_ZOOM
        )));
    }
    let n = 1u64 << z;
    if x as u64 >= n || y as u64 >= n {
        return Err(MapperError::InvalidConfig(format!(
            "tile {}/{}/{} lies outside the {}x{} grid of zoom {}",
            z, x, y, n, n, z
        )));
    }

    let coord = scheme.to_xyz(z, x, y);
    let (lon, lat) = if center {
        // Mercator latitude is not linear in y, so the center is computed
        // from the fractional tile position rather than the bounds
        let fx = coord.x as f64 + 0.5;
        let fy = coord.y as f64 + 0.5;
        let nf = n as f64;
        let lon = fx / nf * 360.0 - 180.0;
        let lat = (std::f64::consts::PI * (1.0 - 2.0 * fy / nf))
            .sinh()
            .atan()
            .to_degrees();
        (lon, lat)
    } else {
        let bounds = tile_to_latlon_bounds(&coord);
        (bounds.min_x, bounds.max_y)
    };

    Ok(TileLocation {
        coord,
        lat,
        lon,
        view_zoom: z + if center { 2 } else { 1 },
    })
}
