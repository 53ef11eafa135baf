//! Source rasters: discovery, georeference and sample decoding.
//!
//! Sources arrive in whatever shape the data provider chose: GeoTIFFs of
//! any sample type, or PNG/JPEG images placed by a world file. Opening a
//! source reads only its georeference; [`SourceRaster::read_planes`] decodes
//! the pixels into floating-point planes where no-data is NaN, which is the
//! only representation the normalizer deals with.

use crate::{geotiff, worldfile};
use mosaic_common::{Crs, GeoTransform, MapperError, MapperResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;
use walkdir::WalkDir;

/// File extensions picked up by [`discover_sources`].
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "tif", "tiff", "gtiff", "png", "jpg", "jpeg", "jp2", "j2k",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    GeoTiff,
    /// PNG or JPEG with a world-file sidecar.
    WorldFileImage,
    /// Recognized so it fails loudly instead of being passed over; there is
    /// no decoder for it.
    Jpeg2000,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tif" | "tiff" | "gtiff" => Some(SourceFormat::GeoTiff),
            "png" | "jpg" | "jpeg" => Some(SourceFormat::WorldFileImage),
            "jp2" | "j2k" => Some(SourceFormat::Jpeg2000),
            _ => None,
        }
    }
}

fn jpeg2000_unsupported(path: &Path) -> MapperError {
    MapperError::unsupported(
        path,
        "JPEG 2000 is not decoded; convert the source to GeoTIFF first \
         (for example with gdal_translate -of GTiff)",
    )
}

/// Identity of a source file at the time it was read.
///
/// Two stamps are equal when the file was most likely not touched in
/// between; used to decide whether earlier output can be reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceStamp {
    pub file_name: String,
    pub bytes: u64,
    pub modified_secs: u64,
}

impl SourceStamp {
    pub fn of(path: &Path) -> MapperResult<Self> {
        let meta = fs::metadata(path).map_err(|e| MapperError::storage(path, e))?;
        let modified_secs = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Self {
            file_name: file_name(path),
            bytes: meta.len(),
            modified_secs,
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Georeferenced source raster, pixels not yet loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRaster {
    /// Source file name; unique within one input directory.
    pub id: String,
    pub path: PathBuf,
    pub format: SourceFormat,
    pub width: u32,
    pub height: u32,
    /// Pixel-corner transform into `crs`.
    pub geotransform: GeoTransform,
    pub crs: Crs,
    /// Declared no-data sample value, if any.
    pub nodata: Option<f64>,
    pub stamp: SourceStamp,
}

impl SourceRaster {
    /// Open a source and read its georeference.
    ///
    /// `world_file_crs` is the CRS assumed for world-file images, which
    /// carry no CRS of their own.
    pub fn open(path: &Path, world_file_crs: Option<&Crs>) -> MapperResult<Self> {
        let format = SourceFormat::from_path(path)
            .ok_or_else(|| MapperError::unsupported(path, "unrecognized file extension"))?;
        let stamp = SourceStamp::of(path)?;

        let georef = match format {
            SourceFormat::GeoTiff => geotiff::read_georeference(path)?,
            SourceFormat::WorldFileImage => worldfile::read_georeference(path, world_file_crs)?,
            SourceFormat::Jpeg2000 => return Err(jpeg2000_unsupported(path)),
        };
        if georef.width == 0 || georef.height == 0 {
            return Err(MapperError::unsupported(path, "raster has no pixels"));
        }
        if georef.geotransform.invert().is_none() {
            return Err(MapperError::missing_georeference(
                path,
                "geotransform is singular",
            ));
        }

        debug!(
            source = %stamp.file_name,
            width = georef.width,
            height = georef.height,
            crs = %georef.crs,
            "Opened source raster"
        );

        Ok(Self {
            id: stamp.file_name.clone(),
            path: path.to_path_buf(),
            format,
            width: georef.width,
            height: georef.height,
            geotransform: georef.geotransform,
            crs: georef.crs,
            nodata: georef.nodata,
            stamp,
        })
    }

    /// Decode all samples into floating-point planes.
    pub fn read_planes(&self) -> MapperResult<SamplePlanes> {
        let raw = match self.format {
            SourceFormat::GeoTiff => geotiff::read_samples(&self.path)?,
            SourceFormat::WorldFileImage => worldfile::read_samples(&self.path)?,
            SourceFormat::Jpeg2000 => return Err(jpeg2000_unsupported(&self.path)),
        };
        if raw.width != self.width || raw.height != self.height {
            return Err(MapperError::unsupported(
                &self.path,
                format!(
                    "decoded {}x{} pixels, header declares {}x{}",
                    raw.width, raw.height, self.width, self.height
                ),
            ));
        }
        raw.into_planes(self.nodata, &self.path)
    }
}

/// Georeference extracted from a source file.
#[derive(Debug, Clone)]
pub(crate) struct Georeference {
    pub width: u32,
    pub height: u32,
    pub geotransform: GeoTransform,
    pub crs: Crs,
    pub nodata: Option<f64>,
}

/// Interleaved samples in the type they were decoded as.
///
/// Kept narrow until they are split into planes, so an 8-bit source costs
/// one byte per sample on top of its planes.
#[derive(Debug)]
pub(crate) enum SampleBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl SampleBuffer {
    fn len(&self) -> usize {
        match self {
            SampleBuffer::U8(v) => v.len(),
            SampleBuffer::U16(v) => v.len(),
            SampleBuffer::I16(v) => v.len(),
            SampleBuffer::U32(v) => v.len(),
            SampleBuffer::I32(v) => v.len(),
            SampleBuffer::F32(v) => v.len(),
            SampleBuffer::F64(v) => v.len(),
        }
    }

    /// Anything wider than 8 bits is stretched to 0..255.
    fn needs_stretch(&self) -> bool {
        !matches!(self, SampleBuffer::U8(_))
    }
}

/// Interleaved samples as decoded, before masking and stretching.
pub(crate) struct RawSamples {
    pub width: u32,
    pub height: u32,
    pub samples: SampleBuffer,
    pub samples_per_pixel: usize,
    /// Last sample of every pixel is alpha.
    pub has_alpha: bool,
}

impl RawSamples {
    /// Split into planes, masking no-data and stretching wide sample types.
    ///
    /// A pixel is no-data when its alpha is zero, when any color sample is
    /// NaN, or when every color sample equals the declared no-data value.
    pub fn into_planes(self, nodata: Option<f64>, path: &Path) -> MapperResult<SamplePlanes> {
        let spp = self.samples_per_pixel;
        let color = spp.saturating_sub(usize::from(self.has_alpha));
        let pixels = self.width as usize * self.height as usize;
        if color == 0 || self.samples.len() != pixels * spp {
            return Err(MapperError::unsupported(
                path,
                format!(
                    "{} samples for {} pixels of {} samples each",
                    self.samples.len(),
                    pixels,
                    spp
                ),
            ));
        }
        let nodata = nodata.map(|v| v as f32);
        let needs_stretch = self.samples.needs_stretch();

        let split = Splitter {
            spp,
            color,
            has_alpha: self.has_alpha,
            nodata,
        };
        let mut bands = match self.samples {
            SampleBuffer::U8(v) => split.run(&v, f32::from),
            SampleBuffer::U16(v) => split.run(&v, f32::from),
            SampleBuffer::I16(v) => split.run(&v, f32::from),
            SampleBuffer::U32(v) => split.run(&v, |s| s as f32),
            SampleBuffer::I32(v) => split.run(&v, |s| s as f32),
            SampleBuffer::F32(v) => split.run(&v, |s| s),
            SampleBuffer::F64(v) => split.run(&v, |s| s as f32),
        };

        if needs_stretch {
            stretch_to_byte_range(&mut bands);
        }

        Ok(SamplePlanes {
            width: self.width,
            height: self.height,
            bands,
        })
    }
}

/// De-interleaves pixels into color planes, masking no-data as NaN.
struct Splitter {
    spp: usize,
    color: usize,
    has_alpha: bool,
    nodata: Option<f32>,
}

impl Splitter {
    fn run<T: Copy>(&self, samples: &[T], widen: impl Fn(T) -> f32) -> Vec<Vec<f32>> {
        let pixels = samples.len() / self.spp;
        let mut bands: Vec<Vec<f32>> =
            (0..self.color).map(|_| Vec::with_capacity(pixels)).collect();
        let mut values = vec![0.0f32; self.color];
        for px in samples.chunks_exact(self.spp) {
            for (v, &s) in values.iter_mut().zip(px) {
                *v = widen(s);
            }
            let masked = (self.has_alpha && widen(px[self.spp - 1]) <= 0.0)
                || values.iter().any(|v| v.is_nan())
                || self.nodata.is_some_and(|nd| values.iter().all(|&v| v == nd));
            for (band, &v) in bands.iter_mut().zip(&values) {
                band.push(if masked { f32::NAN } else { v });
            }
        }
        bands
    }
}

/// Linearly map the valid range of all bands onto 0..255.
fn stretch_to_byte_range(bands: &mut [Vec<f32>]) {
    let (min, max) = bands
        .iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() {
        return;
    }
    let range = max - min;
    for v in bands.iter_mut().flatten() {
        if v.is_finite() {
            *v = if range > 0.0 {
                (*v - min) / range * 255.0
            } else {
                255.0
            };
        }
    }
}

/// Decoded source samples, one plane per color band, no-data as NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePlanes {
    pub width: u32,
    pub height: u32,
    pub bands: Vec<Vec<f32>>,
}

impl SamplePlanes {
    #[inline]
    pub fn value(&self, band: usize, col: u32, row: u32) -> f32 {
        self.bands[band][row as usize * self.width as usize + col as usize]
    }

    /// Convert to `bands` planes: gray is replicated to RGB, RGB becomes
    /// gray through Rec. 601 luma.
    pub fn with_band_count(self, bands: u8) -> SamplePlanes {
        let target = bands as usize;
        if self.bands.len() == target {
            return self;
        }
        let planes = match (target, self.bands.len()) {
            (1, n) if n >= 3 => {
                let (r, g, b) = (&self.bands[0], &self.bands[1], &self.bands[2]);
                vec![r
                    .iter()
                    .zip(g)
                    .zip(b)
                    .map(|((&r, &g), &b)| 0.299 * r + 0.587 * g + 0.114 * b)
                    .collect()]
            }
            (1, _) => vec![self.bands[0].clone()],
            (t, n) if n >= t => self.bands.into_iter().take(t).collect(),
            (t, _) => vec![self.bands[0].clone(); t],
        };
        SamplePlanes {
            width: self.width,
            height: self.height,
            bands: planes,
        }
    }
}

/// List the source rasters in `dir`, recursively, sorted by path.
///
/// Hidden files and files with other extensions are ignored, as are world
/// files and leftovers of interrupted writes.
pub fn discover_sources(dir: &Path) -> MapperResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(MapperError::storage(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "input directory not found"),
        ));
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            MapperError::storage(&path, std::io::Error::other(e.to_string()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && SourceFormat::from_path(entry.path()).is_some() {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(samples: SampleBuffer, spp: usize, has_alpha: bool) -> RawSamples {
        let pixels = samples.len() / spp;
        RawSamples {
            width: pixels as u32,
            height: 1,
            samples,
            samples_per_pixel: spp,
            has_alpha,
        }
    }

    #[test]
    fn test_alpha_masks_pixels() {
        let planes = raw(SampleBuffer::U8(vec![10, 255, 20, 0]), 2, true)
            .into_planes(None, Path::new("a.png"))
            .unwrap();
        assert_eq!(planes.bands.len(), 1);
        assert_eq!(planes.bands[0][0], 10.0);
        assert!(planes.bands[0][1].is_nan());
    }

    #[test]
    fn test_nodata_value_requires_all_bands() {
        let planes = raw(SampleBuffer::U8(vec![0, 0, 0, 0, 5, 0]), 3, false)
            .into_planes(Some(0.0), Path::new("a.tif"))
            .unwrap();
        assert!(planes.bands[1][0].is_nan());
        assert_eq!(planes.bands[1][1], 5.0);
    }

    #[test]
    fn test_stretch_ignores_nodata() {
        let planes = raw(SampleBuffer::F32(vec![-9999.0, 100.0, 300.0, 200.0]), 1, false)
            .into_planes(Some(-9999.0), Path::new("dem.tif"))
            .unwrap();
        let b = &planes.bands[0];
        assert!(b[0].is_nan());
        assert_eq!(b[1], 0.0);
        assert_eq!(b[2], 255.0);
        assert!((b[3] - 127.5).abs() < 1e-4);
    }

    #[test]
    fn test_only_wide_samples_are_stretched() {
        let bytes = raw(SampleBuffer::U8(vec![10, 20]), 1, false)
            .into_planes(None, Path::new("a.tif"))
            .unwrap();
        assert_eq!(bytes.bands[0], vec![10.0, 20.0]);

        let words = raw(SampleBuffer::U16(vec![1000, 3000]), 1, false)
            .into_planes(None, Path::new("b.tif"))
            .unwrap();
        assert_eq!(words.bands[0], vec![0.0, 255.0]);
    }

    #[test]
    fn test_sample_count_mismatch() {
        let mut r = raw(SampleBuffer::U8(vec![1, 2, 3]), 3, false);
        r.width = 2;
        let err = r.into_planes(None, Path::new("x.tif")).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFormat");
    }

    #[test]
    fn test_band_conversion() {
        let rgb = SamplePlanes {
            width: 1,
            height: 1,
            bands: vec![vec![100.0], vec![100.0], vec![100.0]],
        };
        let gray = rgb.with_band_count(1);
        assert_eq!(gray.bands.len(), 1);
        assert!((gray.bands[0][0] - 100.0).abs() < 1e-3);

        let back = gray.with_band_count(3);
        assert_eq!(back.bands.len(), 3);
        assert_eq!(back.bands[2], back.bands[0]);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SourceFormat::from_path(Path::new("a.TIF")), Some(SourceFormat::GeoTiff));
        assert_eq!(
            SourceFormat::from_path(Path::new("b.jpeg")),
            Some(SourceFormat::WorldFileImage)
        );
        assert_eq!(SourceFormat::from_path(Path::new("c.pgw")), None);
        assert_eq!(
            SourceFormat::from_path(Path::new("ESP_011261_1960_RED.JP2")),
            Some(SourceFormat::Jpeg2000)
        );
    }

    #[test]
    fn test_jpeg2000_is_reported_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ESP_011261_1960_RED.JP2");
        fs::write(&path, b"\0\0\0\x0cjP  \r\n\x87\n").unwrap();

        assert_eq!(discover_sources(dir.path()).unwrap(), vec![path.clone()]);
        let err = SourceRaster::open(&path, None).unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFormat");
        assert!(err.to_string().contains("GeoTIFF"), "{}", err);
    }
}
