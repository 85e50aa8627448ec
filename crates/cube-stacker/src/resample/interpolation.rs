//! Interpolation kernels for resampling.
//!
//! Positions are fractional `(col, row)` with pixel centers at integers.
//! A position within half a pixel of the outer edge is still inside the
//! raster; anything further out has no value.

use crate::config::InterpolationMethod;

/// Whether `(x, y)` falls on the raster.
#[inline]
fn inside(width: usize, height: usize, x: f64, y: f64) -> bool {
    x >= -0.5 && y >= -0.5 && x < width as f64 - 0.5 && y < height as f64 - 0.5
}

/// Nearest neighbor interpolation.
///
/// Returns the value of the pixel containing the position.
pub fn nearest_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> Option<f32> {
    if !inside(width, height, x, y) {
        return None;
    }
    let col = (x.round().max(0.0) as usize).min(width - 1);
    let row = (y.round().max(0.0) as usize).min(height - 1);
    Some(data[row * width + col])
}

/// Bilinear interpolation.
///
/// Smoothly interpolates between the four nearest pixel centers; positions
/// in the outer half pixel are clamped to the edge centers.
pub fn bilinear_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> Option<f32> {
    if !inside(width, height, x, y) {
        return None;
    }
    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);
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

    // A missing corner makes the sample missing
    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        return Some(f32::NAN);
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    Some(top * (1.0 - yf) + bottom * yf)
}

/// Sample a plane with the given method.
#[inline]
pub fn interpolate(
    method: InterpolationMethod,
    data: &[f32],
    width: usize,
    height: usize,
    x: f64,
    y: f64,
) -> Option<f32> {
    match method {
        InterpolationMethod::Nearest => nearest_interpolate(data, width, height, x, y),
        InterpolationMethod::Bilinear => bilinear_interpolate(data, width, height, x, y),
    }
}
