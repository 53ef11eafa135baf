//! Source raster fixtures written to disk.
//!
//! The GeoTIFF writer here deliberately does not share code with the
//! pipeline, so that tests exercise the reader against files produced
//! independently.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use walkdir::WalkDir;

/// Mars mean radius used by the IAU 2000 Mars spheres.
pub const MARS_RADIUS_M: f64 = 3_396_190.0;

/// GeoTIFF key directory (tag 34735) with its double parameters (34736).
#[derive(Debug, Clone, PartialEq)]
pub struct GeoKeys {
    pub directory: Vec<u16>,
    pub doubles: Vec<f64>,
}

impl GeoKeys {
    /// User-defined geographic CRS on the Mars sphere.
    pub fn mars_geographic() -> Self {
        Self {
            directory: vec![
                1, 1, 0, 6, //
                1024, 0, 1, 2, // GTModelType: geographic
                1025, 0, 1, 1, // GTRasterType: pixel is area
                2048, 0, 1, 32767, // GeographicType: user defined
                2054, 0, 1, 9102, // GeogAngularUnits: degree
                2057, 34736, 1, 0, // GeogSemiMajorAxis
                2058, 34736, 1, 1, // GeogSemiMinorAxis
            ],
            doubles: vec![MARS_RADIUS_M, MARS_RADIUS_M],
        }
    }

    /// User-defined equirectangular projection on the Mars sphere.
    pub fn mars_equirectangular(center_lon: f64, standard_parallel: f64) -> Self {
        Self {
            directory: vec![
                1, 1, 0, 10, //
                1024, 0, 1, 1, // GTModelType: projected
                1025, 0, 1, 1, // GTRasterType: pixel is area
                2048, 0, 1, 32767, // GeographicType: user defined
                2057, 34736, 1, 0, // GeogSemiMajorAxis
                3072, 0, 1, 32767, // ProjectedCSType: user defined
                3074, 0, 1, 32767, // Projection: user defined
                3075, 0, 1, 17, // ProjCoordTrans: equirectangular
                3076, 0, 1, 9001, // ProjLinearUnits: meter
                3078, 34736, 1, 1, // ProjStdParallel1
                3088, 34736, 1, 2, // ProjCenterLong
            ],
            doubles: vec![MARS_RADIUS_M, standard_parallel, center_lon],
        }
    }

    /// A projected CRS the pipeline cannot handle (UTM zone 33N).
    pub fn utm_33n() -> Self {
        Self {
            directory: vec![1, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 32633],
            doubles: Vec::new(),
        }
    }

    /// Switch the raster type to pixel-is-point.
    pub fn pixel_is_point(mut self) -> Self {
        for entry in self.directory[4..].chunks_exact_mut(4) {
            if entry[0] == 1025 {
                entry[3] = 2;
            }
        }
        self
    }
}

/// Sample storage of a fixture GeoTIFF.
#[derive(Debug, Clone)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

/// Sample interleaving of a fixture GeoTIFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Gray,
    Rgb,
    Rgba,
}

/// A synthetic GeoTIFF source.
///
/// Defaults to a north-up raster in the Mars geographic CRS with its
/// top-left corner at 0°E 0°N and 0.01° pixels.
#[derive(Debug, Clone)]
pub struct GeoTiffSource {
    pub width: u32,
    pub height: u32,
    pub layout: Layout,
    pub samples: Samples,
    /// World coordinates of the top-left pixel corner.
    pub origin: (f64, f64),
    pub pixel_size: (f64, f64),
    /// None writes a TIFF without georeference.
    pub geokeys: Option<GeoKeys>,
    pub nodata: Option<String>,
}

impl GeoTiffSource {
    pub fn new(width: u32, height: u32, layout: Layout, samples: Samples) -> Self {
        Self {
            width,
            height,
            layout,
            samples,
            origin: (0.0, 0.0),
            pixel_size: (0.01, 0.01),
            geokeys: Some(GeoKeys::mars_geographic()),
            nodata: None,
        }
    }

    pub fn rgb(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::new(width, height, Layout::Rgb, Samples::U8(data))
    }

    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::new(width, height, Layout::Gray, Samples::U8(data))
    }

    /// Place the top-left corner at (`x`, `y`) with square pixels.
    pub fn at(mut self, x: f64, y: f64, pixel_size: f64) -> Self {
        self.origin = (x, y);
        self.pixel_size = (pixel_size, pixel_size);
        self
    }

    pub fn with_geokeys(mut self, geokeys: Option<GeoKeys>) -> Self {
        self.geokeys = geokeys;
        self
    }

    pub fn with_nodata(mut self, nodata: &str) -> Self {
        self.nodata = Some(nodata.to_string());
        self
    }

    /// Write the raster to `path`.
    pub fn write(&self, path: &Path) {
        let file = File::create(path).expect("Failed to create fixture GeoTIFF");
        let mut encoder =
            TiffEncoder::new(BufWriter::new(file)).expect("Failed to start fixture GeoTIFF");

        match (&self.samples, self.layout) {
            (Samples::U8(d), Layout::Gray) => self.write_image::<colortype::Gray8, _>(&mut encoder, d),
            (Samples::U8(d), Layout::Rgb) => self.write_image::<colortype::RGB8, _>(&mut encoder, d),
            (Samples::U8(d), Layout::Rgba) => self.write_image::<colortype::RGBA8, _>(&mut encoder, d),
            (Samples::U16(d), Layout::Gray) => self.write_image::<colortype::Gray16, _>(&mut encoder, d),
            (Samples::U16(d), Layout::Rgb) => self.write_image::<colortype::RGB16, _>(&mut encoder, d),
            (Samples::U16(d), Layout::Rgba) => self.write_image::<colortype::RGBA16, _>(&mut encoder, d),
            (Samples::F32(d), Layout::Gray) => {
                self.write_image::<colortype::Gray32Float, _>(&mut encoder, d)
            }
            (Samples::F32(d), Layout::Rgb) => {
                self.write_image::<colortype::RGB32Float, _>(&mut encoder, d)
            }
            (Samples::F32(d), Layout::Rgba) => {
                self.write_image::<colortype::RGBA32Float, _>(&mut encoder, d)
            }
        }
    }

    fn write_image<C, W>(&self, encoder: &mut TiffEncoder<W>, data: &[C::Inner])
    where
        C: ColorType,
        W: Write + Seek,
        [C::Inner]: TiffValue,
    {
        let mut image = encoder
            .new_image::<C>(self.width, self.height)
            .expect("Failed to create fixture image");
        {
            let dir = image.encoder();
            if let Some(keys) = &self.geokeys {
                let scale = [self.pixel_size.0, self.pixel_size.1, 0.0];
                let tiepoint = [0.0, 0.0, 0.0, self.origin.0, self.origin.1, 0.0];
                dir.write_tag(Tag::Unknown(33550), &scale[..]).expect("pixel scale");
                dir.write_tag(Tag::Unknown(33922), &tiepoint[..]).expect("tiepoint");
                dir.write_tag(Tag::Unknown(34735), keys.directory.as_slice())
                    .expect("geokeys");
                if !keys.doubles.is_empty() {
                    dir.write_tag(Tag::Unknown(34736), keys.doubles.as_slice())
                        .expect("geo doubles");
                }
            }
            if let Some(nodata) = &self.nodata {
                dir.write_tag(Tag::Unknown(42113), nodata.as_str()).expect("nodata");
            }
        }
        image.write_data(data).expect("Failed to write fixture pixels");
    }
}

/// Write an 8-bit PNG (`bands` of 1, 3 or 4) and its world file.
///
/// The world file places the top-left pixel corner at `origin` with square
/// pixels of `pixel_size`.
pub fn write_png_with_world_file(
    path: &Path,
    width: u32,
    height: u32,
    bands: u8,
    data: &[u8],
    origin: (f64, f64),
    pixel_size: f64,
) {
    let color = match bands {
        1 => image::ColorType::L8,
        3 => image::ColorType::Rgb8,
        _ => image::ColorType::Rgba8,
    };
    image::save_buffer(path, data, width, height, color).expect("Failed to write fixture PNG");

    let world = format!(
        "{}\n0.0\n0.0\n{}\n{}\n{}\n",
        pixel_size,
        -pixel_size,
        origin.0 + pixel_size / 2.0,
        origin.1 - pixel_size / 2.0
    );
    std::fs::write(path.with_extension("pgw"), world).expect("Failed to write world file");
}

/// A file with a TIFF extension that is not a readable TIFF.
pub fn write_corrupt_tiff(path: &Path) {
    std::fs::write(path, b"II*\0this is not really a tiff").expect("Failed to write corrupt file");
}

/// CRC32 of every file under `dir`, keyed by relative path.
///
/// Two runs producing identical trees produce identical maps.
pub fn tree_checksum(dir: &Path) -> BTreeMap<String, u32> {
    let mut sums = BTreeMap::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.expect("Failed to walk directory");
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .expect("walked path outside root")
            .to_string_lossy()
            .replace('\\', "/");
        let bytes = std::fs::read(entry.path()).expect("Failed to read file");
        sums.insert(rel, crc32fast::hash(&bytes));
    }
    sums
}

/// Number of files under `dir` with extension `ext`.
pub fn count_files(dir: &Path, ext: &str) -> usize {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|x| x == ext).unwrap_or(false))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rgb_gradient, temp_test_dir};

    #[test]
    fn test_fixture_geotiff_is_readable() {
        let dir = temp_test_dir();
        let path = dir.path().join("src.tif");
        GeoTiffSource::rgb(8, 4, rgb_gradient(8, 4)).write(&path);

        let mut decoder = tiff::decoder::Decoder::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (8, 4));
        let keys = decoder
            .find_tag(Tag::Unknown(34735))
            .unwrap()
            .unwrap()
            .into_u16_vec()
            .unwrap();
        assert_eq!(keys, GeoKeys::mars_geographic().directory);
    }

    #[test]
    fn test_pixel_is_point_patch() {
        let keys = GeoKeys::mars_geographic().pixel_is_point();
        assert_eq!(&keys.directory[8..12], &[1025, 0, 1, 2]);
    }

    #[test]
    fn test_tree_checksum_detects_changes() {
        let dir = temp_test_dir();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/1.txt"), b"one").unwrap();
        let before = tree_checksum(dir.path());
        assert_eq!(before.keys().collect::<Vec<_>>(), vec!["a/1.txt"]);

        std::fs::write(dir.path().join("a/1.txt"), b"two").unwrap();
        assert_ne!(before, tree_checksum(dir.path()));
        assert_eq!(count_files(dir.path(), "txt"), 1);
    }
}
