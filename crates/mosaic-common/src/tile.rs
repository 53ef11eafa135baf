//! Tile addressing for the output pyramid.
//!
//! Level `z` has `2^z × 2^z` tiles over the whole Mercator world. Coordinates
//! are XYZ (top-left origin, y grows southward) everywhere inside the
//! pipeline; the TMS y-flip is applied only when naming files on disk.

use crate::BoundingBox;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A tile coordinate (z/x/y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column (x)
    pub x: u32,
    /// Row (y), counted from the top
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Relative storage key `z/x/y` under the given scheme.
    pub fn path_key(&self, scheme: TileScheme) -> String {
        let (z, x, y) = scheme.scheme_coords(self);
        format!("{}/{}/{}", z, x, y)
    }

    /// Get the parent tile (zoom - 1).
    pub fn parent(&self) -> Option<TileCoord> {
        if self.z == 0 {
            return None;
        }
        Some(TileCoord {
            z: self.z - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// Get the four children tiles (zoom + 1), in the order
    /// top-left, top-right, bottom-left, bottom-right.
    pub fn children(&self) -> [TileCoord; 4] {
        let x = self.x * 2;
        let y = self.y * 2;
        let z = self.z + 1;
        [
            TileCoord { z, x, y },
            TileCoord { z, x: x + 1, y },
            TileCoord { z, x, y: y + 1 },
            TileCoord {
                z,
                x: x + 1,
                y: y + 1,
            },
        ]
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Row numbering convention of the tile files on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileScheme {
    /// Top-left origin (OSM, Leaflet default).
    #[default]
    Xyz,
    /// Bottom-left origin (TMS, gdal2tiles).
    Tms,
}

impl TileScheme {
    /// Convert an internal XYZ coordinate to this scheme's (z, x, y).
    pub fn scheme_coords(&self, coord: &TileCoord) -> (u32, u32, u32) {
        match self {
            TileScheme::Xyz => (coord.z, coord.x, coord.y),
            TileScheme::Tms => xyz_to_tms(coord),
        }
    }

    /// Convert this scheme's (z, x, y) to an internal XYZ coordinate.
    pub fn to_xyz(self, z: u32, x: u32, y: u32) -> TileCoord {
        match self {
            TileScheme::Xyz => TileCoord { z, x, y },
            TileScheme::Tms => tms_to_xyz(z, x, y),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TileScheme::Xyz => "xyz",
            TileScheme::Tms => "tms",
        }
    }
}

impl FromStr for TileScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xyz" | "google" | "osm" => Ok(Self::Xyz),
            "tms" => Ok(Self::Tms),
            other => Err(format!("unknown tile scheme '{}'", other)),
        }
    }
}

/// Inclusive rectangle of tiles on one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub z: u32,
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl TileRange {
    pub fn count(&self) -> u64 {
        (self.max_x - self.min_x + 1) as u64 * (self.max_y - self.min_y + 1) as u64
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        coord.z == self.z
            && (self.min_x..=self.max_x).contains(&coord.x)
            && (self.min_y..=self.max_y).contains(&coord.y)
    }

    /// All tiles in row-major order.
    pub fn tiles(&self) -> Vec<TileCoord> {
        let z = self.z;
        (self.min_y..=self.max_y)
            .flat_map(|y| (self.min_x..=self.max_x).map(move |x| TileCoord { z, x, y }))
            .collect()
    }

    /// The range covering the parents of every tile in this range.
    pub fn parent_range(&self) -> Option<TileRange> {
        if self.z == 0 {
            return None;
        }
        Some(TileRange {
            z: self.z - 1,
            min_x: self.min_x / 2,
            max_x: self.max_x / 2,
            min_y: self.min_y / 2,
            max_y: self.max_y / 2,
        })
    }
}

/// Convert lat/lon to Mercator tile coordinates.
pub fn latlon_to_tile(lat: f64, lon: f64, zoom: u32) -> TileCoord {
    let n = 2u64.pow(zoom) as f64;
    let max = (n as u64).saturating_sub(1) as f64;

    let x = ((lon + 180.0) / 360.0 * n).floor().clamp(0.0, max) as u32;
    let lat_rad = lat.to_radians();
    let y = ((1.0 - lat_rad.tan().asinh() / std::f64::consts::PI) / 2.0 * n)
        .floor()
        .clamp(0.0, max) as u32;

    TileCoord { z: zoom, x, y }
}

/// Convert Mercator tile coordinates to lat/lon bounds.
///
/// Independent of the sphere radius: Mercator latitudes depend only on the
/// fractional position in the world square.
pub fn tile_to_latlon_bounds(coord: &TileCoord) -> BoundingBox {
    let n = 2u64.pow(coord.z) as f64;

    let lon_min = coord.x as f64 / n * 360.0 - 180.0;
    let lon_max = (coord.x as f64 + 1.0) / n * 360.0 - 180.0;

    let lat_max = (std::f64::consts::PI * (1.0 - 2.0 * coord.y as f64 / n))
        .sinh()
        .atan()
        .to_degrees();
    let lat_min = (std::f64::consts::PI * (1.0 - 2.0 * (coord.y as f64 + 1.0) / n))
        .sinh()
        .atan()
        .to_degrees();

    BoundingBox::new(lon_min, lat_min, lon_max, lat_max)
}

/// TMS (Tile Map Service) Y-flip conversion.
/// TMS uses bottom-left origin, while XYZ uses top-left.
pub fn tms_to_xyz(z: u32, x: u32, y: u32) -> TileCoord {
    let n = 2u64.pow(z);
    TileCoord {
        z,
        x,
        y: (n - 1 - y as u64) as u32,
    }
}

pub fn xyz_to_tms(coord: &TileCoord) -> (u32, u32, u32) {
    let n = 2u64.pow(coord.z);
    (coord.z, coord.x, (n - 1 - coord.y as u64) as u32)
}
