//! Configuration for a pipeline run.

use mosaic_common::crs::MARS_RADIUS_M;
use mosaic_common::{Crs, CrsCode, MapperError, MapperResult, PixelEncoding, TileScheme};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// How overlapping inputs are composited. Only one policy exists: the input
/// that sorts last by identifier wins wherever it has data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    LastWins,
}

/// Compositing policy used by the mosaic stage.
pub const OVERLAP_POLICY: OverlapPolicy = OverlapPolicy::LastWins;

/// Prefix of every environment variable read by [`PipelineConfig::apply_env`].
pub const ENV_PREFIX: &str = "MAPPER_";

/// Resampling kernel used when reprojecting sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingMethod {
    /// Accepted by the parser so it can be rejected with a clear message.
    Nearest,
    /// Weighted average of the 4 surrounding samples.
    #[default]
    Bilinear,
    /// Catmull-Rom over the 16 surrounding samples.
    Cubic,
}

impl ResamplingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResamplingMethod::Nearest => "nearest",
            ResamplingMethod::Bilinear => "bilinear",
            ResamplingMethod::Cubic => "cubic",
        }
    }
}

impl FromStr for ResamplingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(ResamplingMethod::Nearest),
            "bilinear" | "linear" => Ok(ResamplingMethod::Bilinear),
            "cubic" | "bicubic" => Ok(ResamplingMethod::Cubic),
            other => Err(format!("unknown resampling method '{}'", other)),
        }
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with tiles that hold no data at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyTilePolicy {
    /// No file; clients treat a missing tile as transparent.
    #[default]
    Omit,
    /// A fully transparent tile for every position in the mosaic's range.
    WriteBlank,
}

impl EmptyTilePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmptyTilePolicy::Omit => "omit",
            EmptyTilePolicy::WriteBlank => "write_blank",
        }
    }
}

impl FromStr for EmptyTilePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "omit" => Ok(EmptyTilePolicy::Omit),
            "write_blank" | "blank" => Ok(EmptyTilePolicy::WriteBlank),
            other => Err(format!("unknown empty tile policy '{}'", other)),
        }
    }
}

impl fmt::Display for EmptyTilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when a single source cannot be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorPolicy {
    /// Fail the run on the first bad input.
    #[default]
    Abort,
    /// Log the input and continue with the rest.
    Skip,
}

impl SourceErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceErrorPolicy::Abort => "abort",
            SourceErrorPolicy::Skip => "skip",
        }
    }
}

impl FromStr for SourceErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(SourceErrorPolicy::Abort),
            "skip" => Ok(SourceErrorPolicy::Skip),
            other => Err(format!("unknown source error policy '{}'", other)),
        }
    }
}

impl fmt::Display for SourceErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker threads used when none are configured: all CPUs but two, at least one.
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(2).max(1)
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory scanned (recursively) for source rasters.
    pub input_dir: PathBuf,

    /// Private directory for normalized rasters, the mosaic and manifests.
    pub work_dir: PathBuf,

    /// Directory receiving `{z}/{x}/{y}.png` and `metadata.json`.
    pub output_dir: PathBuf,

    /// Target CRS identifier; only spherical Mercator is accepted.
    pub target_crs: String,

    /// Radius of the body's reference sphere in meters.
    pub body_radius_m: f64,

    /// Pixel encoding of every intermediate and tile.
    pub encoding: PixelEncoding,

    /// Tile edge in pixels.
    pub tile_size: u32,

    /// Finest pyramid level; `None` derives it from the finest source.
    pub max_zoom: Option<i32>,

    /// Coarsest pyramid level.
    pub min_zoom: i32,

    pub resampling: ResamplingMethod,

    pub empty_tiles: EmptyTilePolicy,

    pub tile_scheme: TileScheme,

    pub source_errors: SourceErrorPolicy,

    /// Size of the worker pool.
    pub workers: usize,

    /// Sources decoded at the same time. Each holds its full decoded
    /// planes in memory while it is reprojected.
    pub max_parallel_sources: usize,

    /// Rows per strip when writing and compositing rasters.
    pub window_rows: u32,

    /// CRS of PNG/JPEG sources placed by world files.
    pub world_file_crs: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("downloaded_data/raw"),
            work_dir: PathBuf::from("processed_data"),
            output_dir: PathBuf::from("map_tiles"),
            target_crs: "MERCATOR".to_string(),
            body_radius_m: MARS_RADIUS_M,
            encoding: PixelEncoding::default(),
            tile_size: 256,
            max_zoom: None,
            min_zoom: 0,
            resampling: ResamplingMethod::Bilinear,
            empty_tiles: EmptyTilePolicy::Omit,
            tile_scheme: TileScheme::Xyz,
            source_errors: SourceErrorPolicy::Abort,
            workers: default_workers(),
            max_parallel_sources: 2,
            window_rows: 256,
            world_file_crs: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `MAPPER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `MAPPER_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    /// Override fields from a variable lookup. Unparsable values are logged
    /// and leave the field unchanged.
    pub fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

        if let Some(val) = var("INPUT_DIR") {
            self.input_dir = PathBuf::from(val);
        }
        if let Some(val) = var("WORK_DIR") {
            self.work_dir = PathBuf::from(val);
        }
        if let Some(val) = var("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }
        if let Some(val) = var("TARGET_CRS") {
            self.target_crs = val;
        }
        if let Some(val) = var("WORLD_FILE_CRS") {
            self.world_file_crs = if val.is_empty() { None } else { Some(val) };
        }

        parse_into(var("BODY_RADIUS_M"), "BODY_RADIUS_M", &mut self.body_radius_m);
        parse_into(var("BANDS"), "BANDS", &mut self.encoding.bands);
        parse_into(var("NODATA"), "NODATA", &mut self.encoding.nodata);
        parse_into(var("TILE_SIZE"), "TILE_SIZE", &mut self.tile_size);
        parse_into(var("MIN_ZOOM"), "MIN_ZOOM", &mut self.min_zoom);
        parse_into(var("WORKERS"), "WORKERS", &mut self.workers);
        parse_into(
            var("MAX_PARALLEL_SOURCES"),
            "MAX_PARALLEL_SOURCES",
            &mut self.max_parallel_sources,
        );
        parse_into(var("WINDOW_ROWS"), "WINDOW_ROWS", &mut self.window_rows);
        parse_into(var("RESAMPLING"), "RESAMPLING", &mut self.resampling);
        parse_into(var("EMPTY_TILES"), "EMPTY_TILES", &mut self.empty_tiles);
        parse_into(var("TILE_SCHEME"), "TILE_SCHEME", &mut self.tile_scheme);
        parse_into(var("SOURCE_ERRORS"), "SOURCE_ERRORS", &mut self.source_errors);

        if let Some(val) = var("MAX_ZOOM") {
            if val.eq_ignore_ascii_case("auto") || val.is_empty() {
                self.max_zoom = None;
            } else {
                let mut zoom = 0i32;
                if parse_into(Some(val), "MAX_ZOOM", &mut zoom) {
                    self.max_zoom = Some(zoom);
                }
            }
        }
    }

    /// Validate the configuration. Zoom bounds are checked while planning,
    /// where the automatic maximum is known.
    pub fn validate(&self) -> Result<(), String> {
        self.encoding.validate()?;

        if !self.tile_size.is_power_of_two() || !(8..=1024).contains(&self.tile_size) {
            return Err(format!(
                "tile_size must be a power of two between 8 and 1024, got {}",
                self.tile_size
            ));
        }

        if !(self.body_radius_m.is_finite() && self.body_radius_m > 0.0) {
            return Err(format!(
                "body_radius_m must be positive, got {}",
                self.body_radius_m
            ));
        }

        self.target_crs().map_err(|e| e.to_string())?;
        self.world_file_crs().map_err(|e| e.to_string())?;

        if self.resampling == ResamplingMethod::Nearest {
            return Err(
                "nearest-neighbour resampling is not supported; use bilinear or cubic".to_string(),
            );
        }

        if self.workers == 0 {
            return Err("workers must be at least 1".to_string());
        }

        if self.max_parallel_sources == 0 {
            return Err("max_parallel_sources must be at least 1".to_string());
        }

        if self.window_rows == 0 {
            return Err("window_rows must be at least 1".to_string());
        }

        Ok(())
    }

    /// The target CRS: spherical Mercator on the configured body.
    pub fn target_crs(&self) -> MapperResult<Crs> {
        let crs = Crs::from_identifier(&self.target_crs)
            .map_err(|e| MapperError::InvalidConfig(e.to_string()))?;
        if crs.code != CrsCode::Mercator {
            return Err(MapperError::InvalidConfig(format!(
                "target_crs must be a Mercator CRS (EPSG:3857, EPSG:900913 or MERCATOR), got '{}'",
                self.target_crs
            )));
        }
        Ok(Crs::mercator(self.body_radius_m))
    }

    /// CRS assigned to world-file sources. Bare projection names take the
    /// configured body radius; EPSG and IAU codes keep their own.
    pub fn world_file_crs(&self) -> MapperResult<Option<Crs>> {
        let Some(id) = self.world_file_crs.as_deref() else {
            return Ok(None);
        };
        let crs = Crs::from_identifier(id)
            .map_err(|e| MapperError::InvalidConfig(format!("world_file_crs: {}", e)))?;
        if id.contains(':') {
            Ok(Some(crs))
        } else {
            Ok(Some(crs.with_radius(self.body_radius_m)))
        }
    }
}

fn parse_into<T>(value: Option<String>, key: &str, field: &mut T) -> bool
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(value) = value else {
        return false;
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => {
            *field = parsed;
            true
        }
        Err(e) => {
            warn!(variable = %format!("{}{}", ENV_PREFIX, key), value = %value, error = %e, "Ignoring invalid environment value");
            false
        }
    }
}
