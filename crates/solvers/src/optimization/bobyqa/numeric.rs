//! Thresholds and small helpers shared by the trust-region kernels.

use std::collections::TryReserveError;

use ndarray::{Array1, Array2, ArrayBase, Data};

/// A rotation coefficient below `ROTATION_SKIP * max|z|` is treated as zero.
pub(super) const ROTATION_SKIP: f64 = 1e-20;

/// Givens coefficients are clamped to `±ROTATION_LIMIT`.
pub(super) const ROTATION_LIMIT: f64 = 1e100;

/// Stand-in for the square root of a denominator that is not finite.
pub(super) const DENOM_FLOOR: f64 = 1e-50;

/// Multiplier used when a quotient by the square root of a denominator overflows.
pub(super) const DENOM_BOOST: f64 = 1e50;

/// Below this, differences between Cauchy step lengths are ignored.
pub(super) const CAUCHY_FLOOR: f64 = 1e-50;

/// Smallest admissible gap between a pair of bounds, in scaled units.
pub(super) const MIN_GAP: f64 = 1e-20;

/// Returns `value` clamped to `±ROTATION_LIMIT`.
pub(super) fn clamp_rotation(value: f64) -> f64 {
    value.clamp(-ROTATION_LIMIT, ROTATION_LIMIT)
}

/// Returns `value` if it is finite, otherwise `fallback`.
pub(super) fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

/// Returns `true` if every element is finite.
pub(super) fn all_finite<S: Data<Elem = f64>, D: ndarray::Dimension>(a: &ArrayBase<S, D>) -> bool {
    a.iter().all(|v| v.is_finite())
}

/// Allocates a zeroed vector without aborting on allocation failure.
pub(super) fn try_zeros(len: usize) -> Result<Array1<f64>, TryReserveError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)?;
    data.resize(len, 0.0);
    Ok(Array1::from_vec(data))
}

/// Allocates a zeroed matrix without aborting on allocation failure.
///
/// A shape whose element count overflows is reported as a failed
/// reservation, which is what it would be if it fit in a `usize`.
pub(super) fn try_zeros_2d(rows: usize, cols: usize) -> Result<Array2<f64>, TryReserveError> {
    let len = rows.checked_mul(cols).unwrap_or(usize::MAX);
    let mut data: Vec<f64> = Vec::new();
    data.try_reserve_exact(len)?;
    data.resize(len, 0.0);
    // The buffer holds exactly rows * cols elements.
    Ok(Array2::from_shape_vec((rows, cols), data).expect("buffer length matches the shape"))
}
