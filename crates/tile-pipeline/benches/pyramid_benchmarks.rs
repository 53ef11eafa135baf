//! Benchmarks for the pyramid reduction and mosaic compositing kernels.
//!
//! Run with: cargo bench --package tile-pipeline

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mosaic_common::crs::MARS_RADIUS_M;
use mosaic_common::{Crs, PixelBlock, PixelEncoding, PixelWindow, TileScheme};
use raster_io::raster::write_geotiff;
use raster_io::{GeoTiffSpec, RasterHeader, RasterKind};
use std::path::Path;
use tile_pipeline::downsample::downsample_quadrants;
use tile_pipeline::mosaic::compose_strip;
use tile_pipeline::{
    EmptyTilePolicy, MemoryTileStore, MosaicBuilder, NormalizedRaster, PyramidPlan, PyramidTiler,
};

fn terrain_block(size: u32, encoding: &PixelEncoding, seed: u32) -> PixelBlock {
    let mut block = PixelBlock::filled(size, size, encoding);
    for y in 0..size {
        for x in 0..size {
            if (x + seed) % 97 == 0 {
                continue; // sparse no-data columns
            }
            let v = (((x + seed) as f32 * 0.05).sin() + (y as f32 * 0.07).cos()) * 60.0 + 128.0;
            for sample in block.pixel_mut(x, y) {
                *sample = (v as u8).max(1);
            }
        }
    }
    block
}

fn header(id: &str, kind: RasterKind, window: PixelWindow) -> RasterHeader {
    RasterHeader {
        id: id.to_string(),
        kind,
        crs: Crs::mercator(MARS_RADIUS_M),
        zoom: 4,
        tile_size: 256,
        window,
        encoding: PixelEncoding::gray(0),
        source: None,
    }
}

fn write_raster(path: &Path, header: RasterHeader) {
    let width = header.window.width as usize;
    let spec = GeoTiffSpec::new(header, 64);
    write_geotiff(path, &spec, |_, row, rows| {
        Ok((row..row + rows)
            .flat_map(|r| (0..width).map(move |c| (1 + (c + r as usize * 3) % 250) as u8))
            .collect())
    })
    .expect("write bench raster");
}

// =============================================================================
// DOWNSAMPLE BENCHMARKS
// =============================================================================

fn bench_downsample(c: &mut Criterion) {
    let mut group = c.benchmark_group("downsample_quadrants");

    for (name, encoding) in [("gray", PixelEncoding::gray(0)), ("rgb", PixelEncoding::rgb(0))] {
        let children: Vec<PixelBlock> = (0..4).map(|i| terrain_block(256, &encoding, i * 31)).collect();
        group.bench_with_input(BenchmarkId::new(name, 256), &children, |b, children| {
            b.iter(|| {
                downsample_quadrants(
                    [
                        Some(&children[0]),
                        Some(&children[1]),
                        Some(&children[2]),
                        Some(&children[3]),
                    ],
                    256,
                    black_box(&encoding),
                )
            })
        });
    }

    group.finish();
}

// =============================================================================
// COMPOSITING BENCHMARKS
// =============================================================================

fn bench_compose_strip(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    let inputs: Vec<NormalizedRaster> = [
        ("a.tif", PixelWindow::new(0, 0, 1024, 768)),
        ("b.tif", PixelWindow::new(512, 256, 1024, 768)),
        ("c.tif", PixelWindow::new(256, 512, 768, 512)),
    ]
    .iter()
    .map(|(id, window)| {
        let path = dir.path().join(id);
        write_raster(&path, header(id, RasterKind::Normalized, *window));
        NormalizedRaster::open(&path).expect("open bench raster")
    })
    .collect();

    let ordered = MosaicBuilder::compositing_order(&inputs);
    let mosaic = MosaicBuilder::mosaic_header(&ordered).expect("mosaic header");

    c.bench_function("compose_strip_256_rows", |b| {
        b.iter(|| compose_strip(&ordered, black_box(&mosaic), 384, 256).expect("compose"))
    });
}

// =============================================================================
// TILING BENCHMARKS
// =============================================================================

fn bench_pyramid(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("mosaic.tif");
    write_raster(&path, header("mosaic", RasterKind::Mosaic, PixelWindow::new(1800, 1900, 1200, 900)));
    let plan = PyramidPlan::new(Crs::mercator(MARS_RADIUS_M), 256, 4, 0, TileScheme::Xyz)
        .expect("plan");

    let mut group = c.benchmark_group("pyramid");
    group.sample_size(10);
    group.bench_function("mosaic_1200x900_z4", |b| {
        b.iter(|| {
            let store = MemoryTileStore::new();
            PyramidTiler::new(&store, plan, PixelEncoding::gray(0), EmptyTilePolicy::Omit)
                .build(black_box(&path))
                .expect("tile")
        })
    });
    group.finish();
}

criterion_group!(benches, bench_downsample, bench_compose_strip, bench_pyramid);
criterion_main!(benches);
