//! Pyramid geometry shared by every stage of a run.

use crate::config::PipelineConfig;
use mosaic_common::{
    BoundingBox, Crs, LevelGrid, MapperError, MapperResult, TileScheme, MAX_ZOOM,
};
use projection::{footprint, CrsTransform};
use raster_io::SourceRaster;
use serde::{Deserialize, Serialize};

/// Points sampled along each source edge when computing footprints.
pub const FOOTPRINT_SAMPLES: u32 = 32;

/// Target CRS, tile size and zoom range of a run.
///
/// Every normalized raster and the mosaic live on the pixel grid of
/// `max_zoom`; coarser levels are derived from it by 2×2 reduction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PyramidPlan {
    pub crs: Crs,
    pub tile_size: u32,
    pub max_zoom: u32,
    pub min_zoom: u32,
    pub scheme: TileScheme,
    /// Whether `max_zoom` was derived from the sources.
    pub auto_zoom: bool,
}

impl PyramidPlan {
    /// A plan with an explicit zoom range.
    pub fn new(
        crs: Crs,
        tile_size: u32,
        max_zoom: i64,
        min_zoom: i64,
        scheme: TileScheme,
    ) -> MapperResult<Self> {
        let (max_zoom, min_zoom) = check_zoom_range(max_zoom, min_zoom)?;
        Ok(Self {
            crs,
            tile_size,
            max_zoom,
            min_zoom,
            scheme,
            auto_zoom: false,
        })
    }

    /// Plan a run. Without a configured `max_zoom` the finest level is the
    /// first whose resolution matches the finest source.
    pub fn from_config(config: &PipelineConfig, sources: &[SourceRaster]) -> MapperResult<Self> {
        let crs = config.target_crs()?;
        let min_zoom = config.min_zoom as i64;

        match config.max_zoom {
            Some(max_zoom) => Self::new(
                crs,
                config.tile_size,
                max_zoom as i64,
                min_zoom,
                config.tile_scheme,
            ),
            None => {
                if sources.is_empty() {
                    return Err(MapperError::EmptyInputSet);
                }
                let finest = sources
                    .iter()
                    .filter_map(|src| source_resolution(src, &crs))
                    .fold(f64::INFINITY, f64::min);
                if !finest.is_finite() {
                    return Err(MapperError::Projection(
                        "no source has a usable footprint in the target CRS".to_string(),
                    ));
                }
                let auto = auto_max_zoom(&crs, config.tile_size, finest);
                let (max_zoom, min_zoom) =
                    check_zoom_range((auto as i64).max(min_zoom), min_zoom)?;
                Ok(Self {
                    crs,
                    tile_size: config.tile_size,
                    max_zoom,
                    min_zoom,
                    scheme: config.tile_scheme,
                    auto_zoom: true,
                })
            }
        }
    }

    /// Pixel grid of the finest level.
    pub fn grid(&self) -> LevelGrid {
        LevelGrid::new(self.crs, self.tile_size, self.max_zoom)
    }

    pub fn level_grid(&self, zoom: u32) -> LevelGrid {
        LevelGrid::new(self.crs, self.tile_size, zoom)
    }

    /// Levels from finest to coarsest.
    pub fn levels(&self) -> impl Iterator<Item = u32> {
        (self.min_zoom..=self.max_zoom).rev()
    }

    /// Ground size of one pixel at `zoom`, in CRS units.
    pub fn resolution(&self, zoom: u32) -> f64 {
        self.level_grid(zoom).resolution()
    }
}

/// Reject zooms outside `0..=MAX_ZOOM` and inverted ranges.
pub fn check_zoom_range(max_zoom: i64, min_zoom: i64) -> MapperResult<(u32, u32)> {
    if max_zoom < 0 || min_zoom < 0 {
        return Err(MapperError::ZoomOutOfRange(format!(
            "zoom levels must not be negative (min {}, max {})",
            min_zoom, max_zoom
        )));
    }
    if max_zoom > MAX_ZOOM as i64 {
        return Err(MapperError::ZoomOutOfRange(format!(
            "max zoom {} exceeds {}",
            max_zoom, MAX_ZOOM
        )));
    }
    if min_zoom > max_zoom {
        return Err(MapperError::ZoomOutOfRange(format!(
            "min zoom {} is above max zoom {}",
            min_zoom, max_zoom
        )));
    }
    Ok((max_zoom as u32, min_zoom as u32))
}

/// Smallest zoom whose pixels are no larger than `resolution`, clamped to
/// `0..=MAX_ZOOM`.
pub fn auto_max_zoom(crs: &Crs, tile_size: u32, resolution: f64) -> u32 {
    let world = 2.0 * crs.half_circumference();
    let ratio = world / (tile_size as f64 * resolution);
    if !ratio.is_finite() || ratio <= 1.0 {
        return 0;
    }
    // tolerate rounding noise on exact powers of two
    let zoom = (ratio.log2() - 1e-9).ceil();
    zoom.clamp(0.0, MAX_ZOOM as f64) as u32
}

/// Footprint of a source in the target CRS.
pub fn target_footprint(src: &SourceRaster, target: &Crs) -> Option<BoundingBox> {
    let transform = CrsTransform::new(&src.crs, target);
    footprint(
        &transform,
        &src.geotransform,
        src.width,
        src.height,
        FOOTPRINT_SAMPLES,
    )
}

/// Approximate pixel size of a source once projected into the target CRS.
pub fn source_resolution(src: &SourceRaster, target: &Crs) -> Option<f64> {
    let bbox = target_footprint(src, target)?;
    let res = (bbox.width() / src.width as f64).min(bbox.height() / src.height as f64);
    (res.is_finite() && res > 0.0).then_some(res)
}
