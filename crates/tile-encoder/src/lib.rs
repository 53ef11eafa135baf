//! Map tile encoding.
//!
//! Tiles are PNGs. No-data pixels are fully transparent; every other pixel
//! is opaque, so the sentinel survives a round trip through any viewer or
//! image library without being mistaken for data.

pub mod png;
pub mod tile;

pub use png::{create_png, create_png_auto, create_png_indexed, PngColorType};
pub use tile::{blank_tile, decode_tile, encode_tile, TileCodecError};
