//! Raster input/output for the tiling pipeline.
//!
//! - [`source`]: discovery and decoding of heterogeneous source rasters
//!   (GeoTIFF, PNG/JPEG with world files) into floating-point sample planes.
//! - [`geokeys`]: the GeoTIFF key directory, read and written.
//! - [`raster`]: the 8-bit GeoTIFF format used for normalized rasters and
//!   the mosaic, written strip by strip and read back by row range.
//! - [`atomic`]: write-to-temporary-then-rename helpers.

pub mod atomic;
pub mod geokeys;
mod geotiff;
pub mod raster;
pub mod source;
mod worldfile;

pub use raster::{GeoTiffSpec, RasterHeader, RasterKind, RasterReader};
pub use source::{discover_sources, SamplePlanes, SourceFormat, SourceRaster, SourceStamp};
