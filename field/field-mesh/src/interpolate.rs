//! Stencil selection and blending.
//!
//! Every backend maps a query point to a continuous lattice coordinate `t`
//! in which the address with integer position `i` has its center at
//! `t == i`. The engine picks per-axis weights for the requested method,
//! forms the tensor product over `D` axes and asks the backend for the value
//! at each address through a lookup closure.
//!
//! | Method  | Axis stencil | Weights |
//! |---------|--------------|---------|
//! | Nearest | 1 | closest center, ties to the lower address |
//! | Linear  | 2 | `1 - s`, `s`; shifted inward at bounded edges |
//! | Cubic   | 4 | Catmull-Rom |
//! | Spline  | 4 | natural cubic spline through the stencil |
//!
//! Cubic and Spline need the whole 4-point stencil inside the lattice and
//! every tap reported as regular by the backend. Otherwise the sample is
//! taken with Linear, and [`Sample::method`] says so.

use field_types::InterpolationMethod;
use tracing::debug;

use crate::store::FieldElement;

/// An interpolated value together with the method actually applied.
///
/// # Example
///
/// ```
/// use field_mesh::{BackgroundMesh, InterpolationMethod, create_cartesian_grid};
/// use field_mesh::{BoundingBox, Point2, StructuredMesh};
///
/// let mut grid = create_cartesian_grid(
///     BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(4.0, 4.0)),
///     [4, 4],
/// )
/// .unwrap();
/// grid.set_scalar_at("h", [0, 0], 1.0).unwrap();
///
/// // Too close to the edge for a 4-point stencil.
/// let s = grid
///     .sample_scalar_field("h", &Point2::new(0.2, 0.2), InterpolationMethod::Cubic)
///     .unwrap();
/// assert_eq!(s.method, InterpolationMethod::Linear);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<V> {
    /// Reconstructed value.
    pub value: V,
    /// Method used for the reconstruction.
    pub method: InterpolationMethod,
}

impl<V> Sample<V> {
    /// Maps the value, keeping the method.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Sample<U> {
        Sample {
            value: f(self.value),
            method: self.method,
        }
    }
}

/// Value returned by a backend lookup for one stencil address.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tap<V> {
    pub value: V,
    /// `false` when the address is not backed by a regular neighbour (a
    /// coarser or refined tree cell, an inactive voxel).
    pub regular: bool,
}

impl<V> Tap<V> {
    pub(crate) const fn regular(value: V) -> Self {
        Self { value, regular: true }
    }

    pub(crate) const fn irregular(value: V) -> Self {
        Self { value, regular: false }
    }
}

#[derive(Debug, Clone, Copy)]
struct AxisStencil {
    start: i64,
    weights: [f64; 4],
    len: usize,
}

impl AxisStencil {
    const fn single(index: i64) -> Self {
        Self {
            start: index,
            weights: [1.0, 0.0, 0.0, 0.0],
            len: 1,
        }
    }
}

fn catmull_rom(s: f64) -> [f64; 4] {
    let s2 = s * s;
    let s3 = s2 * s;
    [
        0.5 * (-s3 + 2.0 * s2 - s),
        0.5 * (3.0 * s3 - 5.0 * s2 + 2.0),
        0.5 * (-3.0 * s3 + 4.0 * s2 + s),
        0.5 * (s3 - s2),
    ]
}

/// Natural cubic spline through the four stencil values, evaluated on the
/// middle interval. Zero curvature at the outer taps.
fn natural_spline(s: f64) -> [f64; 4] {
    let r = 1.0 - s;
    // Basis terms multiplying the second derivatives at the inner taps.
    let a = -s * r * (2.0 - s) / 6.0;
    let b = -s * r * (1.0 + s) / 6.0;
    let c1 = (8.0 * a - 2.0 * b) / 5.0;
    let c2 = (8.0 * b - 2.0 * a) / 5.0;
    [c1, r - 2.0 * c1 + c2, s + c1 - 2.0 * c2, c2]
}

/// Per-axis stencil; `None` when a 4-point stencil does not fit in
/// `[0, extent)`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn axis_stencil(method: InterpolationMethod, t: f64, extent: Option<i64>) -> Option<AxisStencil> {
    match method {
        InterpolationMethod::Nearest => {
            let mut i = (t - 0.5).ceil() as i64;
            if let Some(n) = extent {
                i = i.clamp(0, n - 1);
            }
            Some(AxisStencil::single(i))
        }
        InterpolationMethod::Linear => {
            if extent == Some(1) {
                return Some(AxisStencil::single(0));
            }
            let mut i = t.floor() as i64;
            if let Some(n) = extent {
                i = i.clamp(0, n - 2);
            }
            let s = t - i as f64;
            Some(AxisStencil {
                start: i,
                weights: [1.0 - s, s, 0.0, 0.0],
                len: 2,
            })
        }
        InterpolationMethod::Cubic | InterpolationMethod::Spline => {
            let i = t.floor() as i64;
            if let Some(n) = extent {
                if i < 1 || i + 2 > n - 1 {
                    return None;
                }
            }
            let s = t - i as f64;
            let weights = if method == InterpolationMethod::Cubic {
                catmull_rom(s)
            } else {
                natural_spline(s)
            };
            Some(AxisStencil {
                start: i - 1,
                weights,
                len: 4,
            })
        }
    }
}

/// Tensor-product stencil: lattice addresses with their weights.
///
/// Returns `None` when `method` needs a 4-point stencil that does not fit.
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn stencil<const D: usize>(
    method: InterpolationMethod,
    t: &[f64; D],
    extent: Option<[i64; D]>,
) -> Option<Vec<([i64; D], f64)>> {
    let mut axes = [AxisStencil::single(0); D];
    for axis in 0..D {
        axes[axis] = axis_stencil(method, t[axis], extent.map(|e| e[axis]))?;
    }

    let total: usize = axes.iter().map(|a| a.len).product();
    let mut taps = Vec::with_capacity(total);
    let mut offset = [0usize; D];
    for _ in 0..total {
        let mut address = [0i64; D];
        let mut weight = 1.0;
        for axis in 0..D {
            address[axis] = axes[axis].start + offset[axis] as i64;
            weight *= axes[axis].weights[offset[axis]];
        }
        taps.push((address, weight));

        for axis in 0..D {
            offset[axis] += 1;
            if offset[axis] < axes[axis].len {
                break;
            }
            offset[axis] = 0;
        }
    }
    Some(taps)
}

enum Blend<V> {
    Value(V),
    Irregular,
    Missing,
}

fn blend<V: FieldElement<D>, const D: usize>(
    taps: &[([i64; D], f64)],
    lookup: &mut impl FnMut([i64; D]) -> Option<Tap<V>>,
    require_regular: bool,
) -> Blend<V> {
    let mut acc = V::zero();
    for &(address, weight) in taps {
        let Some(tap) = lookup(address) else {
            return Blend::Missing;
        };
        if require_regular && !tap.regular {
            return Blend::Irregular;
        }
        acc = acc.add_scaled(tap.value, weight);
    }
    Blend::Value(acc)
}

/// Samples a lattice at coordinate `t`.
///
/// `lookup` returns `None` when an address has no value at all, which makes
/// the whole sample `None`. `extent` bounds the lattice per axis; `None`
/// means unbounded.
pub(crate) fn sample_lattice<V: FieldElement<D>, const D: usize>(
    method: InterpolationMethod,
    t: &[f64; D],
    extent: Option<[i64; D]>,
    mut lookup: impl FnMut([i64; D]) -> Option<Tap<V>>,
) -> Option<Sample<V>> {
    if matches!(method, InterpolationMethod::Cubic | InterpolationMethod::Spline) {
        let reason = match stencil(method, t, extent) {
            Some(taps) => match blend(&taps, &mut lookup, true) {
                Blend::Value(value) => return Some(Sample { value, method }),
                Blend::Missing => return None,
                Blend::Irregular => "irregular neighbourhood",
            },
            None => "stencil leaves the lattice",
        };
        debug!(requested = ?method, reason, "falling back to linear interpolation");
        return sample_lattice(InterpolationMethod::Linear, t, extent, lookup);
    }

    let taps = stencil(method, t, extent)?;
    match blend(&taps, &mut lookup, false) {
        Blend::Value(value) => Some(Sample { value, method }),
        Blend::Irregular | Blend::Missing => None,
    }
}
