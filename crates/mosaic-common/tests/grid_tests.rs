//! Tests for level grids, pixel windows and tile addressing working together.

use mosaic_common::crs::{EARTH_RADIUS_M, MARS_RADIUS_M};
use mosaic_common::tile::tile_to_latlon_bounds;
use mosaic_common::{BoundingBox, Crs, LevelGrid, PixelWindow, TileCoord, TileScheme};

// ============================================================================
// Resolution tests
// ============================================================================

#[test]
fn test_web_mercator_level_zero_resolution() {
    let grid = LevelGrid::new(Crs::mercator(EARTH_RADIUS_M), 256, 0);
    // The classic 156543.03 m/px at zoom 0
    assert!((grid.resolution() - 156_543.033_928).abs() < 1e-3);
}

#[test]
fn test_resolution_halves_per_level() {
    let grid = LevelGrid::new(Crs::mercator(MARS_RADIUS_M), 256, 5);
    let finer = grid.at_zoom(6);
    assert!((grid.resolution() / finer.resolution() - 2.0).abs() < 1e-12);
}

// ============================================================================
// Window / tile alignment tests
// ============================================================================

#[test]
fn test_tile_bounds_match_window_bounds() {
    let grid = LevelGrid::new(Crs::mercator(MARS_RADIUS_M), 256, 3);
    let tile = TileCoord::new(3, 5, 2);
    let window = PixelWindow::new(5 * 256, 2 * 256, 256, 256);

    let bounds = grid.window_bounds(&window);
    let range = grid.tile_range(&window).unwrap();
    assert_eq!(range.count(), 1);
    assert!(range.contains(&tile));

    // Longitudes of the tile edges are linear in x
    let half = grid.crs.half_circumference();
    let lonlat = tile_to_latlon_bounds(&tile);
    let west = bounds.min_x / half * 180.0;
    assert!((west - lonlat.min_x).abs() < 1e-9);
}

#[test]
fn test_geotransform_maps_window_origin() {
    let grid = LevelGrid::new(Crs::mercator(MARS_RADIUS_M), 256, 4);
    let window = PixelWindow::new(100, 200, 50, 60);
    let gt = grid.geotransform(&window);

    let (x, y) = gt.apply(0.5, 0.5);
    let (cx, cy) = grid.pixel_center(100, 200);
    assert!((x - cx).abs() < 1e-6);
    assert!((y - cy).abs() < 1e-6);
}

#[test]
fn test_snapped_window_contains_bounds() {
    let grid = LevelGrid::new(Crs::mercator(MARS_RADIUS_M), 256, 7);
    let bbox = BoundingBox::new(1.0e5, -3.3e5, 4.5e5, 2.0e4);
    let window = grid.window_for_bounds(&bbox).unwrap();
    let snapped = grid.window_bounds(&window);

    assert!(snapped.min_x <= bbox.min_x && snapped.max_x >= bbox.max_x);
    assert!(snapped.min_y <= bbox.min_y && snapped.max_y >= bbox.max_y);
    assert!(snapped.width() - bbox.width() < 2.0 * grid.resolution());
}

// ============================================================================
// Scheme tests
// ============================================================================

#[test]
fn test_tms_paths_flip_rows() {
    let coords = [TileCoord::new(1, 0, 0), TileCoord::new(1, 1, 1)];
    assert_eq!(coords[0].path_key(TileScheme::Tms), "1/0/1");
    assert_eq!(coords[1].path_key(TileScheme::Tms), "1/1/0");
    assert_eq!("TMS".parse::<TileScheme>().unwrap(), TileScheme::Tms);
    assert!("quadkey".parse::<TileScheme>().is_err());
}
