//! Planetary raster tiling pipeline.
//!
//! Source rasters in mixed formats and projections are turned into a
//! web-map tile pyramid in three stages:
//!
//! - [`normalize`]: each source is reprojected onto the pixel grid of the
//!   finest pyramid level ([`RasterNormalizer`]).
//! - [`mosaic`]: the normalized rasters are composited into one raster
//!   covering their union ([`MosaicBuilder`]).
//! - [`pyramid`]: the mosaic is cut into tiles at the finest level and
//!   reduced 2×2 down to the coarsest ([`PyramidTiler`]).
//!
//! [`PipelineOrchestrator`] sequences the stages, skips those whose outputs
//! are already complete, and reports one terminal outcome.

pub mod config;
pub mod downsample;
pub mod manifest;
pub mod metadata;
pub mod mosaic;
pub mod normalize;
pub mod orchestrator;
pub mod plan;
pub mod pyramid;
pub mod resample;
pub mod store;

pub use config::{
    EmptyTilePolicy, OverlapPolicy, PipelineConfig, ResamplingMethod, SourceErrorPolicy,
    OVERLAP_POLICY,
};
pub use manifest::StageManifest;
pub use metadata::{locate_tile, TileLocation, TileSetMetadata};
pub use mosaic::{MosaicBuilder, MosaicOutput};
pub use normalize::{NormalizedRaster, RasterNormalizer};
pub use orchestrator::{
    PipelineOrchestrator, PipelineReport, PipelineState, RunOutcome, Stage, StageStatus,
};
pub use plan::PyramidPlan;
pub use pyramid::{LevelSummary, PyramidSummary, PyramidTiler};
pub use store::{DirectoryTileStore, MemoryTileStore, TileStore};
