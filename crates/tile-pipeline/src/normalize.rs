//! Reprojection of one source raster onto the finest pyramid grid.
//!
//! Each output pixel center is taken from the target CRS back through
//! longitude/latitude into the source CRS, then into source pixel space
//! through the inverted geotransform, and interpolated there.

use crate::config::ResamplingMethod;
use crate::plan::{target_footprint, PyramidPlan};
use crate::resample::interpolate;
use mosaic_common::{
    GeoTransform, LevelGrid, MapperError, MapperResult, PixelEncoding, PixelWindow,
};
use projection::CrsTransform;
use raster_io::raster::{read_header, write_geotiff};
use raster_io::{GeoTiffSpec, RasterHeader, RasterKind, SamplePlanes, SourceRaster};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A source re-expressed on the finest pyramid grid, stored as a GeoTIFF.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRaster {
    pub header: RasterHeader,
    pub path: PathBuf,
    /// Size of the file on disk.
    pub bytes: u64,
    /// Whether an existing file was kept instead of being rebuilt.
    pub reused: bool,
}

impl NormalizedRaster {
    /// Load a normalized raster written by an earlier run.
    pub fn open(path: &Path) -> MapperResult<Self> {
        let header = read_header(path)?;
        let bytes = fs::metadata(path)
            .map_err(|e| MapperError::storage(path, e))?
            .len();
        Ok(Self {
            header,
            path: path.to_path_buf(),
            bytes,
            reused: true,
        })
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }
}

/// Produces normalized rasters for one pyramid plan and encoding.
#[derive(Debug, Clone)]
pub struct RasterNormalizer {
    plan: PyramidPlan,
    encoding: PixelEncoding,
    resampling: ResamplingMethod,
    window_rows: u32,
    out_dir: PathBuf,
}

impl RasterNormalizer {
    /// Fails for nearest-neighbour resampling, which is only offered
    /// for the 2×2 pyramid reduction.
    pub fn new(
        plan: PyramidPlan,
        encoding: PixelEncoding,
        resampling: ResamplingMethod,
        out_dir: impl Into<PathBuf>,
    ) -> MapperResult<Self> {
        if resampling == ResamplingMethod::Nearest {
            return Err(MapperError::InvalidConfig(
                "reprojection needs bilinear or cubic resampling".to_string(),
            ));
        }
        Ok(Self {
            plan,
            encoding,
            resampling,
            window_rows: 256,
            out_dir: out_dir.into(),
        })
    }

    /// Rows per strip of the written files.
    pub fn with_window_rows(mut self, rows: u32) -> Self {
        self.window_rows = rows.max(1);
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Where the normalized form of source `id` is stored.
    pub fn output_path(&self, id: &str) -> PathBuf {
        self.out_dir.join(format!("{}.norm.tif", id))
    }

    /// Pixel window of the finest level covered by a source.
    pub fn target_window(&self, src: &SourceRaster) -> MapperResult<PixelWindow> {
        let bbox = target_footprint(src, &self.plan.crs).ok_or_else(|| {
            MapperError::incompatible(&src.id, "no part of the raster projects into the target CRS")
        })?;
        self.plan.grid().window_for_bounds(&bbox).ok_or_else(|| {
            MapperError::incompatible(&src.id, "footprint lies outside the target world extent")
        })
    }

    /// Header the normalized form of `src` will carry.
    pub fn expected_header(&self, src: &SourceRaster) -> MapperResult<RasterHeader> {
        let grid = self.plan.grid();
        Ok(RasterHeader {
            id: src.id.clone(),
            kind: RasterKind::Normalized,
            crs: grid.crs,
            zoom: grid.zoom,
            tile_size: grid.tile_size,
            window: self.target_window(src)?,
            encoding: self.encoding,
            source: Some(src.stamp.clone()),
        })
    }

    /// Reproject `src`, or reuse a complete earlier result for the same
    /// source file and grid.
    pub fn normalize(&self, src: &SourceRaster) -> MapperResult<NormalizedRaster> {
        let header = self.expected_header(src)?;
        let path = self.output_path(&src.id);

        if let Some(existing) = self.reusable(&path, &header) {
            debug!(source = %src.id, "Reusing normalized raster");
            return Ok(existing);
        }

        let planes = src.read_planes()?.with_band_count(self.encoding.bands);
        let inverse = src.geotransform.invert().ok_or_else(|| {
            MapperError::missing_georeference(&src.path, "geotransform is singular")
        })?;
        let sampler = Sampler {
            planes: &planes,
            inverse,
            transform: CrsTransform::new(&self.plan.crs, &src.crs),
            wrap_longitude: src.crs.is_geographic(),
            method: self.resampling,
        };

        let grid = self.plan.grid();
        let window = header.window;
        let spec = GeoTiffSpec::new(header.clone(), self.window_rows);
        let bytes = write_geotiff(&path, &spec, |_, row, rows| {
            Ok(self.render_rows(&sampler, &grid, &window, row, rows))
        })?;

        info!(
            source = %src.id,
            col = window.col,
            row = window.row,
            width = window.width,
            height = window.height,
            bytes,
            "Normalized source raster"
        );

        Ok(NormalizedRaster {
            header,
            path,
            bytes,
            reused: false,
        })
    }

    fn reusable(&self, path: &Path, expected: &RasterHeader) -> Option<NormalizedRaster> {
        if !path.is_file() {
            return None;
        }
        match NormalizedRaster::open(path) {
            Ok(existing) if existing.header == *expected => Some(existing),
            Ok(_) => {
                debug!(path = %path.display(), "Normalized raster is stale, rebuilding");
                None
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Normalized raster unreadable, rebuilding");
                None
            }
        }
    }

    /// Rows `row..row + rows` of the window, relative to its top.
    fn render_rows(
        &self,
        sampler: &Sampler<'_>,
        grid: &LevelGrid,
        window: &PixelWindow,
        row: u32,
        rows: u32,
    ) -> Vec<u8> {
        let bands = self.encoding.bands as usize;
        let stride = window.width as usize * bands;
        let mut buf = vec![self.encoding.nodata; stride * rows as usize];

        buf.par_chunks_mut(stride)
            .enumerate()
            .for_each(|(i, line)| {
                let global_row = window.row + row as u64 + i as u64;
                for (j, px) in line.chunks_exact_mut(bands).enumerate() {
                    let (x, y) = grid.pixel_center(window.col + j as u64, global_row);
                    sampler.sample(x, y, &self.encoding, px);
                }
            });
        buf
    }
}

/// Per-source state for mapping target positions to source values.
struct Sampler<'a> {
    planes: &'a SamplePlanes,
    inverse: GeoTransform,
    transform: CrsTransform,
    /// Geographic sources may be published in 0..360 longitudes.
    wrap_longitude: bool,
    method: ResamplingMethod,
}

impl Sampler<'_> {
    /// Fractional source pixel position of a target point, if inside the source.
    fn source_position(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let offsets: &[f64] = if self.wrap_longitude {
            &[0.0, 360.0, -360.0]
        } else {
            &[0.0]
        };
        let width = self.planes.width as f64;
        let height = self.planes.height as f64;

        for &offset in offsets {
            let projected = if offset == 0.0 {
                self.transform.transform(x, y)
            } else {
                self.transform.transform_shifted(x, y, offset)
            };
            let Some((sx, sy)) = projected else {
                continue;
            };
            let (col, row) = self.inverse.apply(sx, sy);
            if col >= 0.0 && row >= 0.0 && col < width && row < height {
                return Some((col, row));
            }
        }
        None
    }

    /// Write the quantized value at target point `(x, y)` into `out`, which
    /// already holds the sentinel.
    fn sample(&self, x: f64, y: f64, encoding: &PixelEncoding, out: &mut [u8]) {
        let Some((col, row)) = self.source_position(x, y) else {
            return;
        };
        let width = self.planes.width as usize;
        let height = self.planes.height as usize;

        let mut pixel = [0u8; 3];
        for (value, plane) in pixel.iter_mut().zip(&self.planes.bands) {
            let v = interpolate(self.method, plane, width, height, col - 0.5, row - 0.5);
            if v.is_nan() {
                return;
            }
            *value = v.round().clamp(0.0, 255.0) as u8;
        }
        let pixel = &mut pixel[..out.len()];
        encoding.avoid_sentinel(pixel);
        out.copy_from_slice(pixel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_common::crs::MARS_RADIUS_M;
    use mosaic_common::{Crs, TileScheme};
    use raster_io::SourceStamp;

    fn planes(width: u32, height: u32, values: Vec<f32>) -> SamplePlanes {
        SamplePlanes {
            width,
            height,
            bands: vec![values],
        }
    }

    fn identity_sampler(planes: &SamplePlanes) -> Sampler<'_> {
        let crs = Crs::mercator(MARS_RADIUS_M);
        Sampler {
            planes,
            inverse: GeoTransform::north_up(0.0, 0.0, 1.0, 1.0).invert().unwrap(),
            transform: CrsTransform::new(&crs, &crs),
            wrap_longitude: false,
            method: ResamplingMethod::Bilinear,
        }
    }

    #[test]
    fn test_sample_outside_leaves_sentinel() {
        let p = planes(2, 2, vec![10.0, 20.0, 30.0, 40.0]);
        let sampler = identity_sampler(&p);
        let enc = PixelEncoding::gray(0);
        let mut out = [0u8];
        sampler.sample(-0.5, 0.5, &enc, &mut out);
        assert_eq!(out, [0]);
        sampler.sample(1.5, -1.5, &enc, &mut out);
        assert_eq!(out, [40]);
    }

    #[test]
    fn test_sample_nudges_sentinel_collision() {
        let p = planes(1, 1, vec![0.0]);
        let sampler = identity_sampler(&p);
        let mut out = [0u8];
        sampler.sample(0.5, -0.5, &PixelEncoding::gray(0), &mut out);
        assert_eq!(out, [1]);
    }

    #[test]
    fn test_sample_nodata_source() {
        let p = planes(1, 1, vec![f32::NAN]);
        let sampler = identity_sampler(&p);
        let mut out = [7u8];
        sampler.sample(0.5, -0.5, &PixelEncoding::gray(7), &mut out);
        assert_eq!(out, [7]);
    }

    #[test]
    fn test_wrapped_longitude_is_found() {
        let p = planes(2, 1, vec![50.0, 60.0]);
        let geo = Crs::geographic(MARS_RADIUS_M);
        let sampler = Sampler {
            planes: &p,
            // pixels span longitudes 200..202
            inverse: GeoTransform::north_up(200.0, 1.0, 1.0, 1.0).invert().unwrap(),
            transform: CrsTransform::new(&geo, &geo),
            wrap_longitude: true,
            method: ResamplingMethod::Bilinear,
        };
        let (col, _) = sampler.source_position(-159.5, 0.5).unwrap();
        assert!((col - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_nearest_resampling_is_rejected() {
        let plan = PyramidPlan::new(Crs::mercator(MARS_RADIUS_M), 256, 4, 0, TileScheme::Xyz)
            .unwrap();
        let err =
            RasterNormalizer::new(plan, PixelEncoding::gray(0), ResamplingMethod::Nearest, "/w/n")
                .unwrap_err();
        assert_eq!(err.kind(), "InvalidConfig");
        assert!(
            RasterNormalizer::new(plan, PixelEncoding::gray(0), ResamplingMethod::Cubic, "/w/n")
                .is_ok()
        );
    }

    #[test]
    fn test_output_path_and_header() {
        let plan = PyramidPlan::new(Crs::mercator(MARS_RADIUS_M), 256, 4, 0, TileScheme::Xyz)
            .unwrap();
        let normalizer =
            RasterNormalizer::new(plan, PixelEncoding::gray(0), ResamplingMethod::Bilinear, "/w/n")
                .unwrap();
        assert_eq!(
            normalizer.output_path("a.tif"),
            PathBuf::from("/w/n/a.tif.norm.tif")
        );

        let src = SourceRaster {
            id: "a.tif".into(),
            path: PathBuf::from("/in/a.tif"),
            format: raster_io::SourceFormat::GeoTiff,
            width: 10,
            height: 10,
            geotransform: GeoTransform::north_up(0.0, 10.0, 1.0, 1.0),
            crs: Crs::geographic(MARS_RADIUS_M),
            nodata: None,
            stamp: SourceStamp {
                file_name: "a.tif".into(),
                bytes: 1,
                modified_secs: 0,
            },
        };
        let header = normalizer.expected_header(&src).unwrap();
        assert_eq!(header.kind, RasterKind::Normalized);
        assert_eq!(header.zoom, 4);
        // 10 degrees at zoom 4 (4096 px / 360 deg) spans ~114 pixels
        assert!((113..=116).contains(&header.window.width));
        assert_eq!(header.window.col, 2048);
    }
}
