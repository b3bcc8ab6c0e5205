//! Small dense solves used by refinement indicators.

use field_types::{Point, Vector};
use nalgebra::{DMatrix, DVector};

use crate::error::{FieldError, FieldResult};

/// Relative tolerance below which a normal-equation determinant counts as
/// zero.
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Least-squares gradient of a scalar sampled at `origin` and at `samples`.
///
/// Fits `f(x) ~ f0 + g . (x - origin)` by solving the normal equations
/// `(A^T A) g = A^T b`.
///
/// # Errors
///
/// Returns [`FieldError::Singular`] if the sample offsets do not span all
/// `D` axes (fewer than `D` samples, or collinear/coplanar offsets).
pub(crate) fn least_squares_gradient<const D: usize>(
    origin: &Point<D>,
    value: f64,
    samples: &[(Point<D>, f64)],
) -> FieldResult<Vector<D>> {
    if samples.len() < D {
        return Err(FieldError::singular(format!(
            "{} samples cannot determine a {D}-dimensional gradient",
            samples.len()
        )));
    }

    let a = DMatrix::from_fn(samples.len(), D, |row, col| samples[row].0[col] - origin[col]);
    let b = DVector::from_fn(samples.len(), |row, _| samples[row].1 - value);
    let normal = a.transpose() * &a;
    let rhs = a.transpose() * b;

    let scale = normal.diagonal().iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let det = normal.determinant();
    if scale == 0.0 || det.abs() <= SINGULAR_TOLERANCE * scale.powi(i32::try_from(D).unwrap_or(i32::MAX)) {
        return Err(FieldError::singular("gradient normal equations are degenerate"));
    }

    let solution = normal
        .lu()
        .solve(&rhs)
        .ok_or_else(|| FieldError::singular("gradient normal equations are degenerate"))?;
    Ok(Vector::from_fn(|i, _| solution[i]))
}
