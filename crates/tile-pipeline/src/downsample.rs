//! 2×2 reduction between pyramid levels.
//!
//! A parent tile is assembled from its four children: each child covers one
//! quadrant and each parent pixel is the mean of the 2×2 child pixels under
//! it. No-data pixels do not take part in the mean; a parent pixel with no
//! valid child pixel is no-data.

use mosaic_common::{PixelBlock, PixelEncoding};

/// Children of a parent tile in quadrant order: top-left, top-right,
/// bottom-left, bottom-right. A missing child is all no-data.
pub type Quadrants<'a> = [Option<&'a PixelBlock>; 4];

/// Reduce four `tile_size` children into one `tile_size` parent.
pub fn downsample_quadrants(
    children: Quadrants<'_>,
    tile_size: u32,
    encoding: &PixelEncoding,
) -> PixelBlock {
    let mut parent = PixelBlock::filled(tile_size, tile_size, encoding);
    let half = tile_size / 2;

    for (quadrant, child) in children.iter().enumerate() {
        let Some(child) = child else {
            continue;
        };
        debug_assert_eq!((child.width, child.height), (tile_size, tile_size));
        let off_x = (quadrant as u32 % 2) * half;
        let off_y = (quadrant as u32 / 2) * half;
        for y in 0..half {
            for x in 0..half {
                if let Some(value) = mean_of_block(child, x * 2, y * 2, encoding) {
                    parent
                        .pixel_mut(off_x + x, off_y + y)
                        .copy_from_slice(&value[..encoding.bands as usize]);
                }
            }
        }
    }

    parent
}

/// Mean of the valid pixels of the 2×2 block at `(x, y)`, rounded half up,
/// or None when all four are no-data.
fn mean_of_block(block: &PixelBlock, x: u32, y: u32, encoding: &PixelEncoding) -> Option<[u8; 3]> {
    let bands = encoding.bands as usize;
    let mut sums = [0u32; 3];
    let mut count = 0u32;

    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        let px = block.pixel(x + dx, y + dy);
        if encoding.is_nodata(px) {
            continue;
        }
        for (sum, &v) in sums.iter_mut().zip(px) {
            *sum += v as u32;
        }
        count += 1;
    }

    if count == 0 {
        return None;
    }

    let mut out = [0u8; 3];
    for (o, sum) in out.iter_mut().zip(sums).take(bands) {
        *o = ((sum + count / 2) / count) as u8;
    }
    encoding.avoid_sentinel(&mut out[..bands]);
    Some(out)
}
