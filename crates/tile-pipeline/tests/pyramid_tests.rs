//! Tiling a mosaic on disk into a directory pyramid.

use mosaic_common::crs::MARS_RADIUS_M;
use mosaic_common::{Crs, PixelBlock, PixelEncoding, PixelWindow, TileCoord, TileScheme};
use raster_io::raster::write_geotiff;
use raster_io::{GeoTiffSpec, RasterHeader, RasterKind, RasterReader};
use std::path::{Path, PathBuf};
use test_utils::count_files;
use tile_encoder::decode_tile;
use tile_pipeline::downsample::downsample_quadrants;
use tile_pipeline::{
    DirectoryTileStore, EmptyTilePolicy, PyramidPlan, PyramidTiler, TileStore,
};

const TILE: u32 = 256;

fn plan(max_zoom: i64, scheme: TileScheme) -> PyramidPlan {
    PyramidPlan::new(Crs::mercator(MARS_RADIUS_M), TILE, max_zoom, 0, scheme).unwrap()
}

/// Write a gray mosaic at `zoom` with pixel values from `value(col, row)`
/// (window-relative).
fn write_mosaic<F>(dir: &Path, zoom: u32, window: PixelWindow, value: F) -> PathBuf
where
    F: Fn(u64, u64) -> u8,
{
    let header = RasterHeader {
        id: "mosaic".to_string(),
        kind: RasterKind::Mosaic,
        crs: Crs::mercator(MARS_RADIUS_M),
        zoom,
        tile_size: TILE,
        window,
        encoding: PixelEncoding::gray(0),
        source: None,
    };
    let path = dir.join("mosaic.tif");
    let spec = GeoTiffSpec::new(header, 64);
    write_geotiff(&path, &spec, |_, row, rows| {
        let mut buf = Vec::with_capacity(window.width as usize * rows as usize);
        for r in row as u64..(row + rows) as u64 {
            for c in 0..window.width {
                buf.push(value(c, r));
            }
        }
        Ok(buf)
    })
    .unwrap();
    path
}

fn ramp(c: u64, r: u64) -> u8 {
    (1 + (c * 5 + r * 3) % 254) as u8
}

fn load(store: &DirectoryTileStore, coord: &TileCoord) -> Option<PixelBlock> {
    store
        .get(coord)
        .unwrap()
        .map(|png| decode_tile(&png, &PixelEncoding::gray(0), TILE).unwrap())
}

#[test]
fn test_600px_mosaic_makes_3x3_tiles_and_one_root() {
    let dir = tempfile::tempdir().unwrap();
    let mosaic = write_mosaic(dir.path(), 2, PixelWindow::new(0, 0, 600, 600), ramp);
    let store = DirectoryTileStore::new(dir.path().join("tiles"), TileScheme::Xyz);
    let enc = PixelEncoding::gray(0);

    let summary = PyramidTiler::new(&store, plan(2, TileScheme::Xyz), enc, EmptyTilePolicy::Omit)
        .build(&mosaic)
        .unwrap();

    let counts = summary.tile_counts();
    assert_eq!(counts.get(&2), Some(&9));
    assert_eq!(counts.get(&1), Some(&4));
    assert_eq!(counts.get(&0), Some(&1));
    assert_eq!(count_files(store.root(), "png"), 14);

    for x in 0..3 {
        for y in 0..3 {
            assert!(store.exists(&TileCoord::new(2, x, y)), "missing 2/{}/{}", x, y);
        }
    }
    assert!(!store.exists(&TileCoord::new(2, 3, 0)));

    // 600 - 512 = 88 valid columns and rows in the last tiles
    let right = load(&store, &TileCoord::new(2, 2, 0)).unwrap();
    assert!(!enc.is_nodata(right.pixel(87, 10)));
    assert!(enc.is_nodata(right.pixel(88, 10)));
    let corner = load(&store, &TileCoord::new(2, 2, 2)).unwrap();
    assert_eq!(corner.valid_pixel_count(&enc), 88 * 88);
}

#[test]
fn test_finest_tiles_reassemble_the_mosaic() {
    let dir = tempfile::tempdir().unwrap();
    let window = PixelWindow::new(300, 200, 400, 350);
    let mosaic = write_mosaic(dir.path(), 2, window, ramp);
    let store = DirectoryTileStore::new(dir.path().join("tiles"), TileScheme::Xyz);
    let enc = PixelEncoding::gray(0);

    PyramidTiler::new(&store, plan(2, TileScheme::Xyz), enc, EmptyTilePolicy::Omit)
        .build(&mosaic)
        .unwrap();

    let expected = RasterReader::open(&mosaic).unwrap().read_all().unwrap();
    let world = 4 * TILE;
    let mut canvas = PixelBlock::filled(world, world, &enc);
    for x in 0..4 {
        for y in 0..4 {
            if let Some(tile) = load(&store, &TileCoord::new(2, x, y)) {
                canvas.copy_rect(&tile, 0, 0, x * TILE, y * TILE, TILE, TILE, None);
            }
        }
    }

    for row in 0..world as u64 {
        for col in 0..world as u64 {
            let inside = col >= window.col
                && col < window.end_col()
                && row >= window.row
                && row < window.end_row();
            let actual = canvas.pixel(col as u32, row as u32);
            if inside {
                let want = expected.pixel((col - window.col) as u32, (row - window.row) as u32);
                assert_eq!(actual, want, "pixel {},{}", col, row);
            } else {
                assert!(enc.is_nodata(actual), "pixel {},{} outside the mosaic", col, row);
            }
        }
    }
}

#[test]
fn test_coarse_tiles_are_downsampled_children() {
    let dir = tempfile::tempdir().unwrap();
    let mosaic = write_mosaic(dir.path(), 3, PixelWindow::new(700, 900, 800, 500), |c, r| {
        // a hole of no-data in the middle
        if (300..400).contains(&c) && (200..260).contains(&r) {
            0
        } else {
            ramp(c, r)
        }
    });
    let store = DirectoryTileStore::new(dir.path().join("tiles"), TileScheme::Xyz);
    let enc = PixelEncoding::gray(0);
    let summary = PyramidTiler::new(&store, plan(3, TileScheme::Xyz), enc, EmptyTilePolicy::Omit)
        .build(&mosaic)
        .unwrap();

    for level in summary.levels.iter().filter(|l| l.zoom < 3) {
        for coord in level.range.tiles() {
            let children: Vec<Option<PixelBlock>> =
                coord.children().iter().map(|c| load(&store, c)).collect();
            let expected = downsample_quadrants(
                [
                    children[0].as_ref(),
                    children[1].as_ref(),
                    children[2].as_ref(),
                    children[3].as_ref(),
                ],
                TILE,
                &enc,
            );
            match load(&store, &coord) {
                Some(parent) => assert_eq!(parent, expected, "tile {}", coord),
                None => assert!(expected.is_empty(&enc), "tile {} was omitted", coord),
            }
        }
    }
}

#[test]
fn test_empty_tile_policies() {
    let dir = tempfile::tempdir().unwrap();
    // only the top-left 256×256 holds data
    let mosaic = write_mosaic(dir.path(), 2, PixelWindow::new(0, 0, 600, 600), |c, r| {
        if c < 256 && r < 256 {
            ramp(c, r)
        } else {
            0
        }
    });
    let enc = PixelEncoding::gray(0);

    let omit = DirectoryTileStore::new(dir.path().join("omit"), TileScheme::Xyz);
    let summary = PyramidTiler::new(&omit, plan(2, TileScheme::Xyz), enc, EmptyTilePolicy::Omit)
        .build(&mosaic)
        .unwrap();
    assert_eq!(summary.tile_counts().get(&2), Some(&1));
    assert_eq!(summary.levels[0].omitted, 8);

    let blank = DirectoryTileStore::new(dir.path().join("blank"), TileScheme::Xyz);
    let summary =
        PyramidTiler::new(&blank, plan(2, TileScheme::Xyz), enc, EmptyTilePolicy::WriteBlank)
            .build(&mosaic)
            .unwrap();
    assert_eq!(summary.tile_counts().get(&2), Some(&9));
    assert_eq!(summary.levels[0].blank, 8);
    let empty = load(&blank, &TileCoord::new(2, 1, 1)).unwrap();
    assert!(empty.is_empty(&enc));
}

#[test]
fn test_tms_layout_flips_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mosaic = write_mosaic(dir.path(), 2, PixelWindow::new(0, 0, 300, 200), ramp);
    let store = DirectoryTileStore::new(dir.path().join("tiles"), TileScheme::Tms);
    PyramidTiler::new(
        &store,
        plan(2, TileScheme::Tms),
        PixelEncoding::gray(0),
        EmptyTilePolicy::Omit,
    )
    .build(&mosaic)
    .unwrap();

    assert!(dir.path().join("tiles/2/0/3.png").is_file());
    assert!(!dir.path().join("tiles/2/0/0.png").exists());
    assert!(dir.path().join("tiles/0/0/0.png").is_file());
}

#[test]
fn test_mosaic_on_another_grid_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mosaic = write_mosaic(dir.path(), 3, PixelWindow::new(0, 0, 64, 64), ramp);
    let store = DirectoryTileStore::new(dir.path().join("tiles"), TileScheme::Xyz);
    let err = PyramidTiler::new(
        &store,
        plan(2, TileScheme::Xyz),
        PixelEncoding::gray(0),
        EmptyTilePolicy::Omit,
    )
    .build(&mosaic)
    .unwrap_err();
    assert_eq!(err.kind(), "IncompatibleRaster");
}

#[test]
fn test_mosaic_smaller_than_a_tile_is_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let mosaic = write_mosaic(dir.path(), 3, PixelWindow::new(40, 40, 10, 10), ramp);
    let store = DirectoryTileStore::new(dir.path().join("tiles"), TileScheme::Xyz);
    let err = PyramidTiler::new(
        &store,
        plan(3, TileScheme::Xyz),
        PixelEncoding::gray(0),
        EmptyTilePolicy::Omit,
    )
    .build(&mosaic)
    .unwrap_err();
    assert_eq!(err.kind(), "ZoomOutOfRange");
    assert!(!dir.path().join("tiles").exists());
}
