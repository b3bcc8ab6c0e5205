//! Fixed-dimension points, vectors and tensors.
//!
//! All three are thin aliases over `nalgebra` statically sized types, so the
//! usual `nalgebra` arithmetic applies directly.

/// A point in `D`-dimensional world space.
pub type Point<const D: usize> = nalgebra::Point<f64, D>;

/// A `D`-component vector value.
pub type Vector<const D: usize> = nalgebra::SVector<f64, D>;

/// A `D x D` tensor value.
pub type Tensor<const D: usize> = nalgebra::SMatrix<f64, D, D>;

/// Two-dimensional point.
pub type Point2 = Point<2>;

/// Three-dimensional point.
pub type Point3 = Point<3>;

/// Distance helpers for [`Point`].
///
/// # Example
///
/// ```
/// use field_types::{Point2, PointExt};
///
/// let a = Point2::new(0.0, 0.0);
/// let b = Point2::new(3.0, 4.0);
/// assert_eq!(a.squared_distance_to(&b), 25.0);
/// assert_eq!(a.distance_to(&b), 5.0);
/// ```
pub trait PointExt {
    /// Euclidean distance to another point.
    fn distance_to(&self, other: &Self) -> f64;

    /// Squared Euclidean distance to another point.
    fn squared_distance_to(&self, other: &Self) -> f64;
}

impl<const D: usize> PointExt for Point<D> {
    #[inline]
    fn distance_to(&self, other: &Self) -> f64 {
        self.squared_distance_to(other).sqrt()
    }

    #[inline]
    fn squared_distance_to(&self, other: &Self) -> f64 {
        (self.coords - other.coords).norm_squared()
    }
}

/// Returns `true` when every coordinate of `point` is finite.
#[must_use]
pub fn is_finite_point<const D: usize>(point: &Point<D>) -> bool {
    point.coords.iter().all(|c| c.is_finite())
}
