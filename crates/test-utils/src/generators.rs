//! Test data generators for synthetic imagery.
//!
//! These generators create predictable, verifiable pixel patterns that can
//! be used across the test suite. All byte patterns avoid 0 so that a zero
//! no-data sentinel never collides with real data.

/// Creates a grid of elevation-like values.
///
/// Each cell value is `col * 1000 + row`, which makes it easy to verify that
/// data was read back from the right place.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0); // col=1, row=0
/// assert_eq!(grid[10], 1.0);   // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// A single-band horizontal ramp from 1 to 255.
pub fn gray_ramp(width: usize, height: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(width * height);
    for _ in 0..height {
        for col in 0..width {
            data.push(ramp_value(col, width));
        }
    }
    data
}

/// An interleaved RGB image: red ramps with the column, green with the row,
/// blue is constant.
pub fn rgb_gradient(width: usize, height: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        for col in 0..width {
            data.push(ramp_value(col, width));
            data.push(ramp_value(row, height));
            data.push(128);
        }
    }
    data
}

/// Every pixel set to `pixel`.
pub fn solid(width: usize, height: usize, pixel: &[u8]) -> Vec<u8> {
    pixel.repeat(width * height)
}

/// Append an alpha channel to interleaved pixels: opaque everywhere except
/// where `transparent(col, row)` holds.
pub fn with_alpha<F>(pixels: &[u8], bands: usize, width: usize, transparent: F) -> Vec<u8>
where
    F: Fn(usize, usize) -> bool,
{
    let mut out = Vec::with_capacity(pixels.len() / bands * (bands + 1));
    for (i, px) in pixels.chunks_exact(bands).enumerate() {
        out.extend_from_slice(px);
        out.push(if transparent(i % width, i / width) { 0 } else { 255 });
    }
    out
}

fn ramp_value(i: usize, n: usize) -> u8 {
    if n <= 1 {
        return 128;
    }
    (1 + i * 254 / (n - 1)) as u8
}
