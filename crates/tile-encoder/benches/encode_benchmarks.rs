//! Benchmarks for tile PNG encoding.
//!
//! Run with: cargo bench --package tile-encoder

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mosaic_common::{PixelBlock, PixelEncoding};
use tile_encoder::{decode_tile, encode_tile};

fn terrain_block(size: u32, encoding: &PixelEncoding) -> PixelBlock {
    let mut block = PixelBlock::filled(size, size, encoding);
    for y in 0..size {
        for x in 0..size {
            let v = (((x as f32 * 0.05).sin() + (y as f32 * 0.07).cos()) * 60.0 + 128.0) as u8;
            let px = block.pixel_mut(x, y);
            for (b, sample) in px.iter_mut().enumerate() {
                *sample = v.saturating_add(b as u8 * 10).max(1);
            }
        }
    }
    block
}

// =============================================================================
// ENCODE BENCHMARKS
// =============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_tile");

    for (name, encoding) in [("gray", PixelEncoding::gray(0)), ("rgb", PixelEncoding::rgb(0))] {
        for size in [256u32, 512] {
            let block = terrain_block(size, &encoding);
            group.bench_with_input(BenchmarkId::new(name, size), &block, |b, block| {
                b.iter(|| encode_tile(black_box(block), &encoding))
            });
        }
    }

    group.finish();
}

// =============================================================================
// DECODE BENCHMARKS
// =============================================================================

fn bench_decode(c: &mut Criterion) {
    let encoding = PixelEncoding::rgb(0);
    let png = encode_tile(&terrain_block(256, &encoding), &encoding).expect("encode");

    c.bench_function("decode_tile_rgb_256", |b| {
        b.iter(|| decode_tile(black_box(&png), &encoding, 256))
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
