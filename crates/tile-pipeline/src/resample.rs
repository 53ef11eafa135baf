//! Interpolation kernels for reprojection.
//!
//! Positions are in sample space: sample `(i, j)` sits at `(i, j)`, so a
//! pixel-space coordinate must be shifted by half a pixel first. Positions
//! are clamped to the sample grid, which extends edge samples over the outer
//! half pixel. No-data is NaN.

use crate::config::ResamplingMethod;

/// Interpolate `data` (row-major, `width × height`) at `(x, y)`.
#[inline]
pub fn interpolate(
    method: ResamplingMethod,
    data: &[f32],
    width: usize,
    height: usize,
    x: f64,
    y: f64,
) -> f32 {
    match method {
        ResamplingMethod::Nearest => nearest_interpolate(data, width, height, x, y),
        ResamplingMethod::Bilinear => bilinear_interpolate(data, width, height, x, y),
        ResamplingMethod::Cubic => cubic_interpolate(data, width, height, x, y),
    }
}

#[inline]
fn clamp_position(width: usize, height: usize, x: f64, y: f64) -> (f64, f64) {
    (
        x.clamp(0.0, (width - 1) as f64),
        y.clamp(0.0, (height - 1) as f64),
    )
}

/// Nearest neighbor interpolation.
pub fn nearest_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if width == 0 || height == 0 {
        return f32::NAN;
    }
    let (x, y) = clamp_position(width, height, x, y);
    let col = x.round() as usize;
    let row = y.round() as usize;
    data[row * width + col]
}

/// Bilinear interpolation.
///
/// The result is no-data when the nearest sample is. Otherwise no-data
/// corners are dropped and the remaining weights renormalized, so valid
/// pixels next to a hole keep a value.
pub fn bilinear_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if width == 0 || height == 0 {
        return f32::NAN;
    }
    let (x, y) = clamp_position(width, height, x, y);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let xf = (x - x0 as f64) as f32;
    let yf = (y - y0 as f64) as f32;

    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x1];
    let v01 = data[y1 * width + x0];
    let v11 = data[y1 * width + x1];

    if !(v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan()) {
        let top = v00 * (1.0 - xf) + v10 * xf;
        let bottom = v01 * (1.0 - xf) + v11 * xf;
        return top * (1.0 - yf) + bottom * yf;
    }

    if nearest_interpolate(data, width, height, x, y).is_nan() {
        return f32::NAN;
    }

    let corners = [
        (v00, (1.0 - xf) * (1.0 - yf)),
        (v10, xf * (1.0 - yf)),
        (v01, (1.0 - xf) * yf),
        (v11, xf * yf),
    ];
    let (sum, weight) = corners
        .iter()
        .filter(|(v, _)| !v.is_nan())
        .fold((0.0f32, 0.0f32), |(s, w), (v, wt)| (s + v * wt, w + wt));
    if weight > 0.0 {
        sum / weight
    } else {
        nearest_interpolate(data, width, height, x, y)
    }
}

/// Bicubic (Catmull-Rom) interpolation over the 16 surrounding samples.
///
/// Falls back to bilinear when any of them is no-data. The result can
/// overshoot the input range; callers clamp when quantizing.
pub fn cubic_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if width == 0 || height == 0 {
        return f32::NAN;
    }
    let (x, y) = clamp_position(width, height, x, y);

    let xi = x.floor() as i64;
    let yi = y.floor() as i64;

    let xf = (x - xi as f64) as f32;
    let yf = (y - yi as f64) as f32;

    let mut values = [[0.0f32; 4]; 4];
    for (j, row) in values.iter_mut().enumerate() {
        for (i, value) in row.iter_mut().enumerate() {
            let px = (xi + i as i64 - 1).clamp(0, width as i64 - 1) as usize;
            let py = (yi + j as i64 - 1).clamp(0, height as i64 - 1) as usize;
            *value = data[py * width + px];

            if value.is_nan() {
                return bilinear_interpolate(data, width, height, x, y);
            }
        }
    }

    let mut row_values = [0.0f32; 4];
    for (j, row) in values.iter().enumerate() {
        row_values[j] = cubic_1d(row[0], row[1], row[2], row[3], xf);
    }

    cubic_1d(row_values[0], row_values[1], row_values[2], row_values[3], yf)
}

/// 1D cubic interpolation using Catmull-Rom spline.
fn cubic_1d(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let t2 = t * t;
    let t3 = t2 * t;

    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    let d = p1;

    a * t3 + b * t2 + c * t + d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilinear_on_sample_returns_sample() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(bilinear_interpolate(&data, 2, 2, 0.0, 0.0), 1.0);
        assert_eq!(bilinear_interpolate(&data, 2, 2, 1.0, 1.0), 4.0);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let data = vec![0.0, 10.0, 20.0, 30.0];
        assert_eq!(bilinear_interpolate(&data, 2, 2, 0.5, 0.5), 15.0);
    }

    #[test]
    fn test_bilinear_clamps_outer_half_pixel() {
        let data = vec![5.0, 7.0];
        assert_eq!(bilinear_interpolate(&data, 2, 1, -0.4, 0.0), 5.0);
        assert_eq!(bilinear_interpolate(&data, 2, 1, 1.4, 0.3), 7.0);
    }

    #[test]
    fn test_bilinear_skips_nan_corners() {
        let data = vec![10.0, f32::NAN, 10.0, 10.0];
        assert_eq!(bilinear_interpolate(&data, 2, 2, 0.25, 0.25), 10.0);
        // nearest sample is no-data
        assert!(bilinear_interpolate(&data, 2, 2, 0.9, 0.1).is_nan());
    }

    #[test]
    fn test_cubic_on_sample_returns_sample() {
        let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
        assert_eq!(cubic_interpolate(&data, 4, 4, 1.0, 2.0), 9.0);
    }

    #[test]
    fn test_cubic_linear_ramp_is_exact() {
        let data: Vec<f32> = (0..16).map(|v| (v % 4) as f32 * 10.0).collect();
        let v = cubic_interpolate(&data, 4, 4, 1.5, 1.5);
        assert!((v - 15.0).abs() < 1e-4);
    }

    #[test]
    fn test_cubic_falls_back_on_nan() {
        let mut data: Vec<f32> = vec![8.0; 16];
        data[0] = f32::NAN;
        assert_eq!(cubic_interpolate(&data, 4, 4, 1.5, 1.5), 8.0);
    }

    #[test]
    fn test_single_sample_grid() {
        assert_eq!(bilinear_interpolate(&[3.0], 1, 1, 0.4, -0.2), 3.0);
        assert_eq!(cubic_interpolate(&[3.0], 1, 1, 0.4, -0.2), 3.0);
    }
}
