//! 8-bit GeoTIFF intermediates: normalized rasters and the mosaic.
//!
//! Both are plain strip-organized GeoTIFFs that any GIS can open. Alongside
//! the GeoTIFF keys they carry a JSON [`RasterHeader`] in the
//! `ImageDescription` tag, which is what the pipeline itself relies on when
//! it reads them back: the level grid, the pixel window and the encoding.
//!
//! Writing is driven by a callback producing one strip at a time, so a
//! raster larger than memory can be produced without ever being held whole.

use crate::atomic::{commit, ensure_parent, partial_path};
use crate::geokeys::{
    GeoKeyDirectory, GDAL_NODATA_TAG, GEO_ASCII_PARAMS_TAG, GEO_DOUBLE_PARAMS_TAG,
    GEO_KEY_DIRECTORY_TAG, MODEL_PIXEL_SCALE_TAG, MODEL_TIEPOINT_TAG,
};
use crate::source::SourceStamp;
use mosaic_common::{
    BoundingBox, Crs, GeoTransform, LevelGrid, MapperError, MapperResult, PixelBlock,
    PixelEncoding, PixelWindow,
};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{Compression, TiffEncoder};
use tiff::tags::Tag;
use tiff::TiffError;
use tracing::debug;

/// What an intermediate raster holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterKind {
    /// One source reprojected onto the level grid.
    Normalized,
    /// All normalized rasters composited.
    Mosaic,
}

/// Self-description embedded in every intermediate raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterHeader {
    /// Stable identifier; for normalized rasters the source file name.
    pub id: String,
    pub kind: RasterKind,
    pub crs: Crs,
    /// Level whose pixel grid the raster lives on.
    pub zoom: u32,
    pub tile_size: u32,
    /// Position of the raster in global pixel coordinates of the level.
    pub window: PixelWindow,
    pub encoding: PixelEncoding,
    /// Identity of the source a normalized raster was produced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceStamp>,
}

impl RasterHeader {
    pub fn grid(&self) -> LevelGrid {
        LevelGrid::new(self.crs, self.tile_size, self.zoom)
    }

    pub fn geotransform(&self) -> GeoTransform {
        self.grid().geotransform(&self.window)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.grid().window_bounds(&self.window)
    }

    /// Whether two rasters can be composited without resampling.
    pub fn same_grid(&self, other: &RasterHeader) -> Result<(), String> {
        if self.encoding != other.encoding {
            return Err(format!(
                "encoding {:?} differs from {:?}",
                other.encoding, self.encoding
            ));
        }
        if self.crs != other.crs {
            return Err(format!("CRS {} differs from {}", other.crs, self.crs));
        }
        if self.zoom != other.zoom || self.tile_size != other.tile_size {
            return Err(format!(
                "grid z{}/{}px differs from z{}/{}px",
                other.zoom, other.tile_size, self.zoom, self.tile_size
            ));
        }
        Ok(())
    }
}

/// Layout of a raster about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTiffSpec {
    pub header: RasterHeader,
    pub rows_per_strip: u32,
}

impl GeoTiffSpec {
    pub fn new(header: RasterHeader, rows_per_strip: u32) -> Self {
        Self {
            header,
            rows_per_strip: rows_per_strip.max(1),
        }
    }

    pub fn width(&self) -> u32 {
        self.header.window.width as u32
    }

    pub fn height(&self) -> u32 {
        self.header.window.height as u32
    }

    pub fn strip_count(&self) -> u32 {
        self.height().div_ceil(self.rows_per_strip)
    }

    /// First row and row count of strip `index`.
    pub fn strip_rows(&self, index: u32) -> (u32, u32) {
        let row = index * self.rows_per_strip;
        (row, self.rows_per_strip.min(self.height() - row))
    }
}

/// Write a raster strip by strip, then move it into place.
///
/// `next_strip(index, first_row, rows)` must return exactly
/// `rows * width * bands` bytes. Strips are requested in order. Returns the
/// size of the written file.
pub fn write_geotiff<F>(path: &Path, spec: &GeoTiffSpec, mut next_strip: F) -> MapperResult<u64>
where
    F: FnMut(u32, u32, u32) -> MapperResult<Vec<u8>>,
{
    let header = &spec.header;
    header.encoding.validate().map_err(MapperError::InvalidConfig)?;
    let window = header.window;
    if window.is_empty() || window.width > u32::MAX as u64 || window.height > u32::MAX as u64 {
        return Err(MapperError::incompatible(
            &header.id,
            format!("cannot store a {}x{} raster", window.width, window.height),
        ));
    }

    ensure_parent(path)?;
    let partial = partial_path(path);
    let result = write_to(&partial, spec, &mut next_strip);
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result?;
    commit(&partial, path)?;

    let bytes = fs::metadata(path)
        .map_err(|e| MapperError::storage(path, e))?
        .len();
    debug!(
        path = %path.display(),
        width = window.width,
        height = window.height,
        bytes,
        "Wrote raster"
    );
    Ok(bytes)
}

fn write_to<F>(partial: &Path, spec: &GeoTiffSpec, next_strip: &mut F) -> MapperResult<()>
where
    F: FnMut(u32, u32, u32) -> MapperResult<Vec<u8>>,
{
    let file = File::create(partial).map_err(|e| MapperError::storage(partial, e))?;
    let mut writer = BufWriter::new(file);
    match spec.header.encoding.bands {
        1 => write_image::<colortype::Gray8, _, _>(&mut writer, spec, next_strip, partial)?,
        _ => write_image::<colortype::RGB8, _, _>(&mut writer, spec, next_strip, partial)?,
    }
    writer.flush().map_err(|e| MapperError::storage(partial, e))
}

fn write_image<C, W, F>(
    writer: &mut W,
    spec: &GeoTiffSpec,
    next_strip: &mut F,
    path: &Path,
) -> MapperResult<()>
where
    C: ColorType<Inner = u8>,
    W: Write + Seek,
    F: FnMut(u32, u32, u32) -> MapperResult<Vec<u8>>,
{
    let header = &spec.header;
    let err = |e: TiffError| write_error(path, e);

    // BigTIFF: a mosaic easily outgrows 32-bit offsets. Strips are written
    // as they come, so the declared compression must match the raw bytes.
    let mut encoder = TiffEncoder::new_big(writer)
        .map_err(err)?
        .with_compression(Compression::Uncompressed);
    let mut image = encoder
        .new_image::<C>(spec.width(), spec.height())
        .map_err(err)?;
    image.rows_per_strip(spec.rows_per_strip).map_err(err)?;

    let gt = header.geotransform();
    let (res_x, res_y) = gt.pixel_size();
    let pixel_scale = [res_x, res_y, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, gt.0[0], gt.0[3], 0.0];
    let (directory, doubles, ascii) = GeoKeyDirectory::for_crs(&header.crs).to_tags();
    let description = serde_json::to_string(header)?;
    let nodata = header.encoding.nodata.to_string();

    let dir = image.encoder();
    dir.write_tag(Tag::ImageDescription, description.as_str())
        .map_err(err)?;
    dir.write_tag(Tag::Unknown(MODEL_PIXEL_SCALE_TAG), &pixel_scale[..])
        .map_err(err)?;
    dir.write_tag(Tag::Unknown(MODEL_TIEPOINT_TAG), &tiepoint[..])
        .map_err(err)?;
    dir.write_tag(Tag::Unknown(GEO_KEY_DIRECTORY_TAG), directory.as_slice())
        .map_err(err)?;
    if !doubles.is_empty() {
        dir.write_tag(Tag::Unknown(GEO_DOUBLE_PARAMS_TAG), doubles.as_slice())
            .map_err(err)?;
    }
    if !ascii.is_empty() {
        dir.write_tag(Tag::Unknown(GEO_ASCII_PARAMS_TAG), ascii.as_str())
            .map_err(err)?;
    }
    dir.write_tag(Tag::Unknown(GDAL_NODATA_TAG), nodata.as_str())
        .map_err(err)?;

    let stride = spec.width() as usize * header.encoding.bands as usize;
    for index in 0..spec.strip_count() {
        let (row, rows) = spec.strip_rows(index);
        let data = next_strip(index, row, rows)?;
        if data.len() != rows as usize * stride {
            return Err(MapperError::storage(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "strip {} holds {} bytes, expected {}",
                        index,
                        data.len(),
                        rows as usize * stride
                    ),
                ),
            ));
        }
        image.write_strip(&data).map_err(err)?;
    }
    image.finish().map_err(err)
}

fn write_error(path: &Path, err: TiffError) -> MapperError {
    match err {
        TiffError::IoError(e) => MapperError::storage(path, e),
        other => MapperError::storage(
            path,
            io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        ),
    }
}

fn read_error(path: &Path, err: TiffError) -> MapperError {
    match err {
        TiffError::IoError(e) => MapperError::storage(path, e),
        other => MapperError::storage(
            path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("not a readable intermediate raster: {}", other),
            ),
        ),
    }
}

/// Read the embedded header without decoding pixels.
pub fn read_header(path: &Path) -> MapperResult<RasterHeader> {
    RasterReader::open(path).map(|r| r.header)
}

/// Row-range access to an intermediate raster.
///
/// The most recently decoded strip is kept, so consecutive reads of
/// neighbouring rows decompress each strip once.
pub struct RasterReader {
    path: PathBuf,
    header: RasterHeader,
    decoder: Decoder<BufReader<File>>,
    rows_per_strip: u32,
    cached: Option<(u32, Vec<u8>)>,
}

impl RasterReader {
    pub fn open(path: &Path) -> MapperResult<Self> {
        let file = File::open(path).map_err(|e| MapperError::storage(path, e))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .map_err(|e| read_error(path, e))?
            .with_limits(Limits::unlimited());

        let description = decoder
            .get_tag_ascii_string(Tag::ImageDescription)
            .map_err(|e| read_error(path, e))?;
        let header: RasterHeader = serde_json::from_str(description.trim_end_matches('\0'))
            .map_err(|e| {
                MapperError::storage(
                    path,
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid raster header: {}", e),
                    ),
                )
            })?;

        let (width, height) = decoder.dimensions().map_err(|e| read_error(path, e))?;
        if width as u64 != header.window.width || height as u64 != header.window.height {
            return Err(MapperError::storage(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "image is {}x{} but header says {}x{}",
                        width, height, header.window.width, header.window.height
                    ),
                ),
            ));
        }
        let rows_per_strip = decoder.chunk_dimensions().1.max(1);

        Ok(Self {
            path: path.to_path_buf(),
            header,
            decoder,
            rows_per_strip,
            cached: None,
        })
    }

    pub fn header(&self) -> &RasterHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> u32 {
        self.header.window.width as u32
    }

    pub fn height(&self) -> u32 {
        self.header.window.height as u32
    }

    /// Read `rows` rows starting at local row `row0`.
    pub fn read_rows(&mut self, row0: u32, rows: u32) -> MapperResult<PixelBlock> {
        let width = self.width();
        let bands = self.header.encoding.bands;
        let stride = width as usize * bands as usize;
        if rows == 0 || row0 + rows > self.height() {
            return Err(MapperError::storage(
                &self.path,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "rows {}..{} outside raster of height {}",
                        row0,
                        row0 + rows,
                        self.height()
                    ),
                ),
            ));
        }

        let mut data = Vec::with_capacity(rows as usize * stride);
        let first_strip = row0 / self.rows_per_strip;
        let last_strip = (row0 + rows - 1) / self.rows_per_strip;
        for strip in first_strip..=last_strip {
            let strip_row0 = strip * self.rows_per_strip;
            let from = row0.max(strip_row0) - strip_row0;
            let to = (row0 + rows).min(strip_row0 + self.rows_per_strip) - strip_row0;
            let path = self.path.clone();
            let bytes = self.strip(strip)?;
            let start = from as usize * stride;
            let end = to as usize * stride;
            let slice = bytes.get(start..end).ok_or_else(|| {
                MapperError::storage(
                    &path,
                    io::Error::new(io::ErrorKind::UnexpectedEof, format!("strip {} is short", strip)),
                )
            })?;
            data.extend_from_slice(slice);
        }

        PixelBlock::from_raw(width, rows, bands, data).ok_or_else(|| {
            MapperError::storage(
                &self.path,
                io::Error::new(io::ErrorKind::InvalidData, "row block size mismatch"),
            )
        })
    }

    /// The whole raster as one block.
    pub fn read_all(&mut self) -> MapperResult<PixelBlock> {
        self.read_rows(0, self.height())
    }

    fn strip(&mut self, index: u32) -> MapperResult<&[u8]> {
        let hit = matches!(&self.cached, Some((cached, _)) if *cached == index);
        if !hit {
            let decoded = self
                .decoder
                .read_chunk(index)
                .map_err(|e| read_error(&self.path, e))?;
            let bytes = match decoded {
                DecodingResult::U8(v) => v,
                _ => {
                    return Err(MapperError::storage(
                        &self.path,
                        io::Error::new(io::ErrorKind::InvalidData, "samples are not 8-bit"),
                    ))
                }
            };
            self.cached = Some((index, bytes));
        }
        match &self.cached {
            Some((_, bytes)) => Ok(bytes.as_slice()),
            None => Err(MapperError::storage(
                &self.path,
                io::Error::new(io::ErrorKind::Other, "strip cache empty"),
            )),
        }
    }
}
