//! Cutting the mosaic into a tile pyramid.
//!
//! The finest level is cut straight from the mosaic, one tile row at a time
//! so only `tile_size` mosaic rows are held. Every coarser level is built
//! from the tiles of the level below, read back from the store, so the
//! mosaic is decoded once.

use crate::config::EmptyTilePolicy;
use crate::downsample::downsample_quadrants;
use crate::plan::{check_zoom_range, PyramidPlan};
use crate::store::TileStore;
use mosaic_common::{
    MapperError, MapperResult, PixelBlock, PixelEncoding, TileCoord, TileRange,
};
use raster_io::RasterReader;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tile_encoder::{blank_tile, decode_tile, encode_tile, TileCodecError};
use tracing::{debug, info};

/// What happened to one tile position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TileOutcome {
    Written,
    Blank,
    /// Already present from an interrupted run.
    Kept,
    Omitted,
}

/// Tile tallies for one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub zoom: u32,
    pub range: TileRange,
    pub written: u64,
    pub blank: u64,
    pub kept: u64,
    pub omitted: u64,
}

impl LevelSummary {
    fn new(zoom: u32, range: TileRange) -> Self {
        Self {
            zoom,
            range,
            written: 0,
            blank: 0,
            kept: 0,
            omitted: 0,
        }
    }

    fn tally(&mut self, outcome: TileOutcome) {
        match outcome {
            TileOutcome::Written => self.written += 1,
            TileOutcome::Blank => self.blank += 1,
            TileOutcome::Kept => self.kept += 1,
            TileOutcome::Omitted => self.omitted += 1,
        }
    }

    /// Tiles present in the store for this level.
    pub fn stored(&self) -> u64 {
        self.written + self.blank + self.kept
    }
}

/// Result of tiling a mosaic, finest level first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidSummary {
    pub levels: Vec<LevelSummary>,
}

impl PyramidSummary {
    /// Stored tiles per zoom level.
    pub fn tile_counts(&self) -> BTreeMap<u32, u64> {
        self.levels.iter().map(|l| (l.zoom, l.stored())).collect()
    }

    pub fn total_stored(&self) -> u64 {
        self.levels.iter().map(LevelSummary::stored).sum()
    }
}

/// Builds every level of the pyramid into a [`TileStore`].
pub struct PyramidTiler<'a, S: TileStore + ?Sized> {
    store: &'a S,
    plan: PyramidPlan,
    encoding: PixelEncoding,
    empty_tiles: EmptyTilePolicy,
    resume: bool,
}

impl<'a, S: TileStore + ?Sized> PyramidTiler<'a, S> {
    pub fn new(
        store: &'a S,
        plan: PyramidPlan,
        encoding: PixelEncoding,
        empty_tiles: EmptyTilePolicy,
    ) -> Self {
        Self {
            store,
            plan,
            encoding,
            empty_tiles,
            resume: false,
        }
    }

    /// Keep tiles already in the store instead of recomputing them.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Tile the mosaic at `mosaic_path` from the finest level down to
    /// the plan's minimum zoom.
    pub fn build(&self, mosaic_path: &Path) -> MapperResult<PyramidSummary> {
        check_zoom_range(self.plan.max_zoom as i64, self.plan.min_zoom as i64)?;

        let mut reader = RasterReader::open(mosaic_path)?;
        let header = reader.header().clone();
        let grid = self.plan.grid();
        if header.zoom != grid.zoom || header.tile_size != grid.tile_size || header.crs != grid.crs {
            return Err(MapperError::incompatible(
                &header.id,
                format!(
                    "mosaic is on the z{}/{}px grid, pyramid expects z{}/{}px",
                    header.zoom, header.tile_size, grid.zoom, grid.tile_size
                ),
            ));
        }
        if header.encoding != self.encoding {
            return Err(MapperError::incompatible(
                &header.id,
                format!(
                    "mosaic encoding {:?} differs from {:?}",
                    header.encoding, self.encoding
                ),
            ));
        }
        let window = header.window;
        if window.width < u64::from(grid.tile_size) && window.height < u64::from(grid.tile_size) {
            return Err(MapperError::ZoomOutOfRange(format!(
                "a {}x{} mosaic is smaller than one {}px tile at zoom {}",
                window.width, window.height, grid.tile_size, grid.zoom
            )));
        }
        let range = grid.tile_range(&header.window).ok_or_else(|| {
            MapperError::ZoomOutOfRange(format!(
                "mosaic has no pixels at zoom {}",
                grid.zoom
            ))
        })?;

        let blank = match self.empty_tiles {
            EmptyTilePolicy::WriteBlank => Some(
                blank_tile(grid.tile_size, &self.encoding)
                    .map_err(|e| codec_error("blank tile", e))?,
            ),
            EmptyTilePolicy::Omit => None,
        };

        let mut levels = Vec::new();
        let finest = self.cut_finest(&mut reader, range, blank.as_deref())?;
        log_level(&finest);
        levels.push(finest);

        let mut child_range = range;
        while child_range.z > self.plan.min_zoom {
            let Some(parent_range) = child_range.parent_range() else {
                break;
            };
            let level = self.reduce_level(parent_range, blank.as_deref())?;
            log_level(&level);
            levels.push(level);
            child_range = parent_range;
        }

        Ok(PyramidSummary { levels })
    }

    /// Cut the finest level out of the mosaic.
    fn cut_finest(
        &self,
        reader: &mut RasterReader,
        range: TileRange,
        blank: Option<&[u8]>,
    ) -> MapperResult<LevelSummary> {
        let window = reader.header().window;
        let t = self.plan.tile_size as u64;
        let mut summary = LevelSummary::new(range.z, range);

        for ty in range.min_y..=range.max_y {
            let coords: Vec<TileCoord> = (range.min_x..=range.max_x)
                .map(|tx| TileCoord::new(range.z, tx, ty))
                .collect();
            if self.resume && coords.iter().all(|c| self.store.exists(c)) {
                for _ in &coords {
                    summary.tally(TileOutcome::Kept);
                }
                continue;
            }

            let tile_top = ty as u64 * t;
            let r0 = tile_top.max(window.row);
            let r1 = (tile_top + t).min(window.end_row());
            let band = reader.read_rows((r0 - window.row) as u32, (r1 - r0) as u32)?;

            let outcomes = coords
                .par_iter()
                .map(|coord| {
                    if self.resume && self.store.exists(coord) {
                        return Ok(TileOutcome::Kept);
                    }
                    let tile_left = coord.x as u64 * t;
                    let c0 = tile_left.max(window.col);
                    let c1 = (tile_left + t).min(window.end_col());

                    let mut tile = PixelBlock::filled(self.plan.tile_size, self.plan.tile_size, &self.encoding);
                    tile.copy_rect(
                        &band,
                        (c0 - window.col) as u32,
                        0,
                        (c0 - tile_left) as u32,
                        (r0 - tile_top) as u32,
                        (c1 - c0) as u32,
                        (r1 - r0) as u32,
                        None,
                    );
                    self.emit(coord, &tile, blank)
                })
                .collect::<MapperResult<Vec<_>>>()?;

            for outcome in outcomes {
                summary.tally(outcome);
            }
        }

        Ok(summary)
    }

    /// Build one level from the four children of each of its tiles.
    fn reduce_level(&self, range: TileRange, blank: Option<&[u8]>) -> MapperResult<LevelSummary> {
        let tile_size = self.plan.tile_size;
        let outcomes = range
            .tiles()
            .par_iter()
            .map(|coord| {
                if self.resume && self.store.exists(coord) {
                    return Ok(TileOutcome::Kept);
                }
                let children = coord
                    .children()
                    .map(|child| self.load(&child, tile_size));
                let [a, b, c, d] = children;
                let children = [a?, b?, c?, d?];
                let tile = downsample_quadrants(
                    [
                        children[0].as_ref(),
                        children[1].as_ref(),
                        children[2].as_ref(),
                        children[3].as_ref(),
                    ],
                    tile_size,
                    &self.encoding,
                );
                self.emit(coord, &tile, blank)
            })
            .collect::<MapperResult<Vec<_>>>()?;

        let mut summary = LevelSummary::new(range.z, range);
        for outcome in outcomes {
            summary.tally(outcome);
        }
        Ok(summary)
    }

    /// Decode a stored tile; blank and missing tiles both come back as None.
    fn load(&self, coord: &TileCoord, tile_size: u32) -> MapperResult<Option<PixelBlock>> {
        let Some(bytes) = self.store.get(coord)? else {
            return Ok(None);
        };
        let block = decode_tile(&bytes, &self.encoding, tile_size)
            .map_err(|e| codec_error(&coord.to_string(), e))?;
        Ok((!block.is_empty(&self.encoding)).then_some(block))
    }

    fn emit(&self, coord: &TileCoord, tile: &PixelBlock, blank: Option<&[u8]>) -> MapperResult<TileOutcome> {
        if tile.is_empty(&self.encoding) {
            return match blank {
                Some(bytes) => {
                    self.store.put(coord, bytes)?;
                    Ok(TileOutcome::Blank)
                }
                None => Ok(TileOutcome::Omitted),
            };
        }
        let png = encode_tile(tile, &self.encoding).map_err(|e| codec_error(&coord.to_string(), e))?;
        self.store.put(coord, &png)?;
        debug!(tile = %coord, bytes = png.len(), "Wrote tile");
        Ok(TileOutcome::Written)
    }
}

fn log_level(level: &LevelSummary) {
    info!(
        zoom = level.zoom,
        written = level.written,
        blank = level.blank,
        kept = level.kept,
        omitted = level.omitted,
        "Tiled level"
    );
}

fn codec_error(what: &str, err: TileCodecError) -> MapperError {
    MapperError::storage(
        PathBuf::from(what),
        io::Error::new(io::ErrorKind::InvalidData, err.to_string()),
    )
}
