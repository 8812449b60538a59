//! Each routine takes the lower grid index and the fractional offset along every axis, as
//! produced by [index_1d](super::index_1d). An offset of exactly `0.0` or `1.0` samples a grid
//! point. Higher dimensional lookups reduce to two lookups of one dimension less.

use ndarray::{ArrayView2, ArrayView3, ArrayView4, Axis};

#[inline(always)]
fn lerp(lower: f64, upper: f64, offset: f64) -> f64 {
    (1. - offset) * lower + offset * upper
}

/// Bilinear interpolation
#[inline]
pub fn interpolate_2d(table: ArrayView2<f64>, [i, j]: [usize; 2], [di, dj]: [f64; 2]) -> f64 {
    lerp(
        lerp(table[[i, j]], table[[i, j + 1]], dj),
        lerp(table[[i + 1, j]], table[[i + 1, j + 1]], dj),
        di,
    )
}

/// Trilinear interpolation
#[inline]
pub fn interpolate_3d(
    table: ArrayView3<f64>,
    [i, j, k]: [usize; 3],
    [di, dj, dk]: [f64; 3],
) -> f64 {
    lerp(
        interpolate_2d(table.index_axis(Axis(0), i), [j, k], [dj, dk]),
        interpolate_2d(table.index_axis(Axis(0), i + 1), [j, k], [dj, dk]),
        di,
    )
}

/// Quadrilinear interpolation
#[inline]
pub fn interpolate_4d(
    table: ArrayView4<f64>,
    [i, j, k, l]: [usize; 4],
    [di, dj, dk, dl]: [f64; 4],
) -> f64 {
    lerp(
        interpolate_3d(table.index_axis(Axis(0), i), [j, k, l], [dj, dk, dl]),
        interpolate_3d(table.index_axis(Axis(0), i + 1), [j, k, l], [dj, dk, dl]),
        di,
    )
}
