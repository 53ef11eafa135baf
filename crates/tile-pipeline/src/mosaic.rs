//! Compositing normalized rasters into one mosaic.
//!
//! All inputs share the finest-level grid, so compositing is pure copying:
//! no resampling happens here. The mosaic is produced strip by strip; for a
//! strip, each input overlapping it is opened and only the rows it
//! contributes are decoded.

use crate::config::OVERLAP_POLICY;
use crate::normalize::NormalizedRaster;
use mosaic_common::{MapperError, MapperResult, PixelBlock, PixelWindow};
use raster_io::raster::write_geotiff;
use raster_io::{GeoTiffSpec, RasterHeader, RasterKind, RasterReader};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Identifier stored in the mosaic's header.
pub const MOSAIC_ID: &str = "mosaic";

/// The composited raster.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicOutput {
    pub header: RasterHeader,
    pub path: PathBuf,
    pub bytes: u64,
    /// Input identifiers in compositing order.
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MosaicBuilder {
    window_rows: u32,
    /// Strips composited concurrently.
    batch_strips: usize,
}

impl MosaicBuilder {
    pub fn new(window_rows: u32, workers: usize) -> Self {
        Self {
            window_rows: window_rows.max(1),
            batch_strips: workers.max(1),
        }
    }

    /// Inputs in compositing order: lexical by identifier, later wins.
    pub fn compositing_order(inputs: &[NormalizedRaster]) -> Vec<&NormalizedRaster> {
        let mut ordered: Vec<&NormalizedRaster> = inputs.iter().collect();
        ordered.sort_by(|a, b| a.id().cmp(b.id()));
        ordered
    }

    /// Header of the mosaic of `inputs`, after checking they share a grid.
    pub fn mosaic_header(inputs: &[&NormalizedRaster]) -> MapperResult<RasterHeader> {
        let first = inputs.first().ok_or(MapperError::EmptyInputSet)?;
        let mut window = first.header.window;
        for input in &inputs[1..] {
            first
                .header
                .same_grid(&input.header)
                .map_err(|reason| MapperError::incompatible(input.id(), reason))?;
            window = window.union(&input.header.window);
        }

        Ok(RasterHeader {
            id: MOSAIC_ID.to_string(),
            kind: RasterKind::Mosaic,
            source: None,
            window,
            ..first.header.clone()
        })
    }

    /// Composite `inputs` into a new raster at `path`.
    pub fn build(&self, inputs: &[NormalizedRaster], path: &Path) -> MapperResult<MosaicOutput> {
        if inputs.is_empty() {
            return Err(MapperError::EmptyInputSet);
        }
        let ordered = Self::compositing_order(inputs);
        let header = Self::mosaic_header(&ordered)?;
        let spec = GeoTiffSpec::new(header.clone(), self.window_rows);
        let strip_count = spec.strip_count();

        info!(
            inputs = ordered.len(),
            width = header.window.width,
            height = header.window.height,
            strips = strip_count,
            policy = ?OVERLAP_POLICY,
            "Building mosaic"
        );

        let mut pending: VecDeque<Vec<u8>> = VecDeque::new();
        let bytes = write_geotiff(path, &spec, |index, _, _| {
            if pending.is_empty() {
                let end = (index + self.batch_strips as u32).min(strip_count);
                let strips: Vec<MapperResult<Vec<u8>>> = (index..end)
                    .into_par_iter()
                    .map(|i| {
                        let (row, rows) = spec.strip_rows(i);
                        compose_strip(&ordered, &header, row, rows).map(|block| block.data)
                    })
                    .collect();
                for strip in strips {
                    pending.push_back(strip?);
                }
            }
            pending.pop_front().ok_or_else(|| {
                MapperError::incompatible(MOSAIC_ID, format!("strip {} was not composited", index))
            })
        })?;

        info!(path = %path.display(), bytes, "Mosaic written");

        Ok(MosaicOutput {
            header,
            path: path.to_path_buf(),
            bytes,
            inputs: ordered.iter().map(|r| r.id().to_string()).collect(),
        })
    }
}

/// Composite rows `row..row + rows` of the mosaic (relative to its top).
///
/// Inputs are applied in order and only their data pixels are copied, so
/// the last input with data at a pixel wins.
pub fn compose_strip(
    ordered: &[&NormalizedRaster],
    mosaic: &RasterHeader,
    row: u32,
    rows: u32,
) -> MapperResult<PixelBlock> {
    let window = mosaic.window;
    let strip = PixelWindow::new(window.col, window.row + row as u64, window.width, rows as u64);
    let encoding = mosaic.encoding;
    let mut block = PixelBlock::filled(window.width as u32, rows, &encoding);

    for input in ordered {
        let input_window = input.header.window;
        let Some(overlap) = input_window.intersect(&strip) else {
            continue;
        };

        let mut reader = RasterReader::open(&input.path)?;
        let src = reader.read_rows(
            (overlap.row - input_window.row) as u32,
            overlap.height as u32,
        )?;
        block.copy_rect(
            &src,
            (overlap.col - input_window.col) as u32,
            0,
            (overlap.col - strip.col) as u32,
            (overlap.row - strip.row) as u32,
            overlap.width as u32,
            overlap.height as u32,
            Some(&encoding),
        );
        debug!(input = %input.id(), row = overlap.row, rows = overlap.height, "Composited input rows");
    }

    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_common::crs::MARS_RADIUS_M;
    use mosaic_common::{Crs, PixelEncoding};

    fn header(id: &str, window: PixelWindow, encoding: PixelEncoding) -> RasterHeader {
        RasterHeader {
            id: id.to_string(),
            kind: RasterKind::Normalized,
            crs: Crs::mercator(MARS_RADIUS_M),
            zoom: 5,
            tile_size: 256,
            window,
            encoding,
            source: None,
        }
    }

    fn fake(id: &str, window: PixelWindow) -> NormalizedRaster {
        NormalizedRaster {
            header: header(id, window, PixelEncoding::gray(0)),
            path: PathBuf::from(format!("/nowhere/{}", id)),
            bytes: 0,
            reused: false,
        }
    }

    #[test]
    fn test_compositing_order_is_lexical() {
        let inputs = vec![
            fake("b.tif", PixelWindow::new(0, 0, 1, 1)),
            fake("a.tif", PixelWindow::new(0, 0, 1, 1)),
            fake("B.tif", PixelWindow::new(0, 0, 1, 1)),
        ];
        let ids: Vec<&str> = MosaicBuilder::compositing_order(&inputs)
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(ids, vec!["B.tif", "a.tif", "b.tif"]);
    }

    #[test]
    fn test_header_is_union() {
        let a = fake("a", PixelWindow::new(10, 10, 5, 5));
        let b = fake("b", PixelWindow::new(12, 20, 10, 2));
        let h = MosaicBuilder::mosaic_header(&[&a, &b]).unwrap();
        assert_eq!(h.window, PixelWindow::new(10, 10, 12, 12));
        assert_eq!(h.kind, RasterKind::Mosaic);
        assert_eq!(h.id, MOSAIC_ID);
    }

    #[test]
    fn test_incompatible_encoding() {
        let a = fake("a", PixelWindow::new(0, 0, 5, 5));
        let mut b = fake("b", PixelWindow::new(0, 0, 5, 5));
        b.header.encoding = PixelEncoding::rgb(0);
        let err = MosaicBuilder::mosaic_header(&[&a, &b]).unwrap_err();
        assert_eq!(err.kind(), "IncompatibleRaster");
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_incompatible_zoom() {
        let a = fake("a", PixelWindow::new(0, 0, 5, 5));
        let mut b = fake("b", PixelWindow::new(0, 0, 5, 5));
        b.header.zoom = 6;
        assert!(MosaicBuilder::mosaic_header(&[&a, &b]).is_err());
    }

    #[test]
    fn test_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = MosaicBuilder::new(16, 2)
            .build(&[], &dir.path().join("m.tif"))
            .unwrap_err();
        assert_eq!(err.kind(), "EmptyInputSet");
        assert!(!dir.path().join("m.tif").exists());
    }
}
