//! Shared test utilities for the planet-tiles workspace.
//!
//! - Temporary run directories laid out like a real pipeline run
//! - Synthetic pixel generators
//! - GeoTIFF and world-file source fixtures
//! - Output tree checksums
//!
//! ```ignore
//! use test_utils::{gray_ramp, GeoTiffSource, RunDirs};
//!
//! let dirs = RunDirs::new();
//! GeoTiffSource::gray(64, 64, gray_ramp(64, 64))
//!     .at(20.0, 10.0, 0.25)
//!     .write(&dirs.input.join("a.tif"));
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

pub use fixtures::*;
pub use generators::*;
pub use paths::*;
