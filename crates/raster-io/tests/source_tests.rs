//! Source opening and decoding against fixture files.

use mosaic_common::crs::MARS_RADIUS_M;
use mosaic_common::{Crs, CrsCode};
use raster_io::{discover_sources, SourceFormat, SourceRaster};
use test_utils::{
    create_test_grid, gray_ramp, rgb_gradient, with_alpha, write_corrupt_tiff,
    write_png_with_world_file, GeoKeys, GeoTiffSource, Layout, Samples,
};

#[test]
fn test_open_mars_geographic_geotiff() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("ctx_a.tif");
    GeoTiffSource::rgb(20, 10, rgb_gradient(20, 10))
        .at(10.0, 5.0, 0.5)
        .write(&path);

    let src = SourceRaster::open(&path, None).unwrap();
    assert_eq!(src.id, "ctx_a.tif");
    assert_eq!(src.format, SourceFormat::GeoTiff);
    assert_eq!((src.width, src.height), (20, 10));
    assert_eq!(src.crs, Crs::geographic(MARS_RADIUS_M));
    assert_eq!(src.geotransform.0, [10.0, 0.5, 0.0, 5.0, 0.0, -0.5]);
    assert_eq!(src.stamp.file_name, "ctx_a.tif");
    assert!(src.stamp.bytes > 0);

    let planes = src.read_planes().unwrap();
    assert_eq!(planes.bands.len(), 3);
    assert_eq!(planes.value(0, 0, 0), 1.0);
    assert_eq!(planes.value(0, 19, 0), 255.0);
    assert_eq!(planes.value(2, 7, 3), 128.0);
}

#[test]
fn test_pixel_is_point_shifts_origin() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("point.tif");
    GeoTiffSource::gray(4, 4, gray_ramp(4, 4))
        .at(10.0, 5.0, 1.0)
        .with_geokeys(Some(GeoKeys::mars_geographic().pixel_is_point()))
        .write(&path);

    let src = SourceRaster::open(&path, None).unwrap();
    assert_eq!(src.geotransform.0[0], 9.5);
    assert_eq!(src.geotransform.0[3], 5.5);
}

#[test]
fn test_equirectangular_geotiff() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("eqc.tif");
    GeoTiffSource::gray(4, 4, gray_ramp(4, 4))
        .at(0.0, 0.0, 200.0)
        .with_geokeys(Some(GeoKeys::mars_equirectangular(180.0, 0.0)))
        .write(&path);

    let src = SourceRaster::open(&path, None).unwrap();
    assert_eq!(src.crs.code, CrsCode::Equirectangular);
    assert_eq!(src.crs.center_lon, 180.0);
    assert_eq!(src.crs.radius, MARS_RADIUS_M);
}

#[test]
fn test_missing_georeference() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("plain.tif");
    GeoTiffSource::gray(4, 4, gray_ramp(4, 4))
        .with_geokeys(None)
        .write(&path);

    let err = SourceRaster::open(&path, None).unwrap_err();
    assert_eq!(err.kind(), "MissingGeoreference");
}

#[test]
fn test_unsupported_projection() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("utm.tif");
    GeoTiffSource::gray(4, 4, gray_ramp(4, 4))
        .with_geokeys(Some(GeoKeys::utm_33n()))
        .write(&path);

    let err = SourceRaster::open(&path, None).unwrap_err();
    assert_eq!(err.kind(), "UnsupportedFormat");
}

#[test]
fn test_corrupt_file_is_unsupported() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("broken.tif");
    write_corrupt_tiff(&path);

    let err = SourceRaster::open(&path, None).unwrap_err();
    assert_eq!(err.kind(), "UnsupportedFormat");
    assert!(err.is_per_input());
}

#[test]
fn test_u16_with_nodata_is_stretched() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("wide.tif");
    let samples = vec![0u16, 1000, 2000, 3000];
    GeoTiffSource::new(4, 1, Layout::Gray, Samples::U16(samples))
        .with_nodata("0")
        .write(&path);

    let src = SourceRaster::open(&path, None).unwrap();
    assert_eq!(src.nodata, Some(0.0));
    let planes = src.read_planes().unwrap();
    let band = &planes.bands[0];
    assert!(band[0].is_nan());
    assert_eq!(band[1], 0.0);
    assert!((band[2] - 127.5).abs() < 1e-3);
    assert_eq!(band[3], 255.0);
}

#[test]
fn test_float_dem_nan_is_nodata() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("dem.tif");
    let mut grid = create_test_grid(3, 2);
    grid[4] = f32::NAN;
    GeoTiffSource::new(3, 2, Layout::Gray, Samples::F32(grid))
        .write(&path);

    let planes = SourceRaster::open(&path, None).unwrap().read_planes().unwrap();
    assert!(planes.value(0, 1, 1).is_nan());
    assert_eq!(planes.value(0, 0, 0), 0.0);
    assert_eq!(planes.value(0, 2, 1), 255.0);
}

#[test]
fn test_rgba_geotiff_alpha_masks() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("rgba.tif");
    let rgba = with_alpha(&rgb_gradient(4, 4), 3, 4, |col, _| col == 0);
    GeoTiffSource::new(4, 4, Layout::Rgba, Samples::U8(rgba)).write(&path);

    let planes = SourceRaster::open(&path, None).unwrap().read_planes().unwrap();
    assert_eq!(planes.bands.len(), 3);
    assert!(planes.value(1, 0, 2).is_nan());
    assert!(!planes.value(1, 1, 2).is_nan());
}

#[test]
fn test_png_with_world_file() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("hirise.png");
    let rgba = with_alpha(&rgb_gradient(8, 8), 3, 8, |col, row| col == 7 && row == 7);
    write_png_with_world_file(&path, 8, 8, 4, &rgba, (137.0, -4.0), 0.125);

    // Without a configured CRS the image cannot be placed
    let err = SourceRaster::open(&path, None).unwrap_err();
    assert_eq!(err.kind(), "MissingGeoreference");

    let crs = Crs::geographic(MARS_RADIUS_M);
    let src = SourceRaster::open(&path, Some(&crs)).unwrap();
    assert_eq!(src.format, SourceFormat::WorldFileImage);
    assert_eq!(src.geotransform.0, [137.0, 0.125, 0.0, -4.0, 0.0, -0.125]);

    let planes = src.read_planes().unwrap();
    assert_eq!(planes.bands.len(), 3);
    assert!(planes.value(0, 7, 7).is_nan());
    assert_eq!(planes.value(2, 0, 0), 128.0);
}

#[test]
fn test_png_without_world_file() {
    let dir = test_utils::temp_test_dir();
    let path = dir.path().join("lonely.png");
    write_png_with_world_file(&path, 2, 2, 1, &[1, 2, 3, 4], (0.0, 0.0), 1.0);
    std::fs::remove_file(path.with_extension("pgw")).unwrap();

    let crs = Crs::geographic(MARS_RADIUS_M);
    let err = SourceRaster::open(&path, Some(&crs)).unwrap_err();
    assert_eq!(err.kind(), "MissingGeoreference");
}

#[test]
fn test_discover_sources() {
    let dir = test_utils::temp_test_dir();
    let root = dir.path();
    std::fs::create_dir_all(root.join("sub")).unwrap();
    for name in ["b.tif", "a.TIFF", "sub/c.png", "sub/c.pgw", ".hidden.tif", "notes.txt"] {
        std::fs::write(root.join(name), b"x").unwrap();
    }

    let found: Vec<String> = discover_sources(root)
        .unwrap()
        .iter()
        .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
        .collect();
    assert_eq!(found, vec!["a.TIFF", "b.tif", "sub/c.png"]);
}

#[test]
fn test_discover_missing_directory() {
    let dir = test_utils::temp_test_dir();
    let err = discover_sources(&dir.path().join("nope")).unwrap_err();
    assert_eq!(err.kind(), "StorageIOError");
}
