//! Coordinate reference system transformations.
//!
//! Implements spherical map projections from scratch without external
//! dependencies. Every projection is defined on a sphere whose radius comes
//! from the CRS, and conversions between systems pivot through longitude and
//! latitude. Because the pivot is angular, a source on one body can be
//! re-expressed on a sphere of a different radius without complaint.

pub mod equirectangular;
pub mod geographic;
pub mod mercator;
pub mod transform;

pub use equirectangular::Equirectangular;
pub use geographic::normalize_longitude;
pub use mercator::Mercator;
pub use transform::{footprint, CrsTransform, SphereProjection};
