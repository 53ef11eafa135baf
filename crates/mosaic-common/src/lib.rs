//! Common types and utilities shared across the mosaic tiling pipeline.

pub mod bbox;
pub mod block;
pub mod crs;
pub mod encoding;
pub mod error;
pub mod grid;
pub mod tile;

pub use bbox::BoundingBox;
pub use block::PixelBlock;
pub use crs::{Crs, CrsCode};
pub use encoding::PixelEncoding;
pub use error::{MapperError, MapperResult};
pub use grid::{GeoTransform, LevelGrid, PixelWindow, MAX_ZOOM};
pub use tile::{TileCoord, TileRange, TileScheme};
