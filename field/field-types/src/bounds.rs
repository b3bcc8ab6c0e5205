//! Axis-aligned bounding box.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::point::{Point, Vector};

/// An axis-aligned bounding box in `D` dimensions.
///
/// The box always satisfies `min[i] <= max[i]` on every axis. Degenerate
/// boxes with `min == max` on some axis are legal and have zero volume.
///
/// # Example
///
/// ```
/// use field_types::{BoundingBox, Point2};
///
/// let bbox = BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(10.0, 4.0));
///
/// assert!(bbox.contains(&Point2::new(5.0, 2.0)));
/// assert!(bbox.contains(&Point2::new(10.0, 4.0))); // max is inclusive
/// assert_eq!(bbox.volume(), 40.0);
/// assert_eq!(bbox.center(), Point2::new(5.0, 2.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundingBox<const D: usize> {
    min: Point<D>,
    max: Point<D>,
}

impl<const D: usize> BoundingBox<D> {
    /// Creates a box from two corners.
    ///
    /// The corners are ordered per axis, so the arguments may be given in
    /// any order.
    ///
    /// # Example
    ///
    /// ```
    /// use field_types::{BoundingBox, Point2};
    ///
    /// let bbox = BoundingBox::new(Point2::new(4.0, 0.0), Point2::new(1.0, 3.0));
    /// assert_eq!(*bbox.min(), Point2::new(1.0, 0.0));
    /// assert_eq!(*bbox.max(), Point2::new(4.0, 3.0));
    /// ```
    #[must_use]
    pub fn new(a: Point<D>, b: Point<D>) -> Self {
        let mut min = a;
        let mut max = b;
        for axis in 0..D {
            min[axis] = a[axis].min(b[axis]);
            max[axis] = a[axis].max(b[axis]);
        }
        Self { min, max }
    }

    /// Creates a box from an explicit minimum and maximum corner.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::NonFinite`] if a coordinate is NaN or infinite
    /// and [`GeometryError::InvalidBounds`] if `min[i] > max[i]` on any axis.
    ///
    /// # Example
    ///
    /// ```
    /// use field_types::{BoundingBox, GeometryError, Point2};
    ///
    /// assert!(BoundingBox::try_new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)).is_ok());
    /// assert!(matches!(
    ///     BoundingBox::try_new(Point2::new(2.0, 0.0), Point2::new(1.0, 1.0)),
    ///     Err(GeometryError::InvalidBounds { axis: 0, .. })
    /// ));
    /// ```
    pub fn try_new(min: Point<D>, max: Point<D>) -> Result<Self, GeometryError> {
        for axis in 0..D {
            if !min[axis].is_finite() || !max[axis].is_finite() {
                return Err(GeometryError::NonFinite { axis });
            }
            if min[axis] > max[axis] {
                return Err(GeometryError::InvalidBounds {
                    axis,
                    min: min[axis],
                    max: max[axis],
                });
            }
        }
        Ok(Self { min, max })
    }

    /// Creates a zero-volume box around a single point.
    #[inline]
    #[must_use]
    pub const fn from_point(point: Point<D>) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Minimum corner.
    #[inline]
    #[must_use]
    pub const fn min(&self) -> &Point<D> {
        &self.min
    }

    /// Maximum corner.
    #[inline]
    #[must_use]
    pub const fn max(&self) -> &Point<D> {
        &self.max
    }

    /// Checks whether a point lies inside the box (boundary inclusive).
    #[must_use]
    pub fn contains(&self, point: &Point<D>) -> bool {
        (0..D).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    /// Checks whether two boxes overlap. Boxes sharing only a face count as
    /// intersecting.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        (0..D).all(|axis| self.max[axis] >= other.min[axis] && self.min[axis] <= other.max[axis])
    }

    /// Returns the overlapping region, or `None` if the boxes are disjoint.
    ///
    /// # Example
    ///
    /// ```
    /// use field_types::{BoundingBox, Point2};
    ///
    /// let a = BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(2.0, 2.0));
    /// let b = BoundingBox::new(Point2::new(1.0, 1.0), Point2::new(3.0, 3.0));
    /// let overlap = a.intersection(&b).unwrap();
    /// assert_eq!(*overlap.min(), Point2::new(1.0, 1.0));
    /// assert_eq!(*overlap.max(), Point2::new(2.0, 2.0));
    /// ```
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.intersects(other) {
            return None;
        }
        let mut min = self.min;
        let mut max = self.max;
        for axis in 0..D {
            min[axis] = self.min[axis].max(other.min[axis]);
            max[axis] = self.max[axis].min(other.max[axis]);
        }
        Some(Self { min, max })
    }

    /// Returns the smallest box containing both boxes.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut min = self.min;
        let mut max = self.max;
        for axis in 0..D {
            min[axis] = self.min[axis].min(other.min[axis]);
            max[axis] = self.max[axis].max(other.max[axis]);
        }
        Self { min, max }
    }

    /// Grows the box so that it contains `point`.
    pub fn expand_to_include(&mut self, point: &Point<D>) {
        for axis in 0..D {
            self.min[axis] = self.min[axis].min(point[axis]);
            self.max[axis] = self.max[axis].max(point[axis]);
        }
    }

    /// Product of the per-axis extents.
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.extent().iter().product()
    }

    /// Center point of the box.
    #[must_use]
    pub fn center(&self) -> Point<D> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Per-axis extent (`max - min`).
    #[must_use]
    pub fn extent(&self) -> Vector<D> {
        self.max - self.min
    }

    /// Returns `true` if any axis has zero extent.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        (0..D).any(|axis| self.max[axis] <= self.min[axis])
    }

    /// Clamps a point component-wise into the box.
    #[must_use]
    pub fn clamp_point(&self, point: &Point<D>) -> Point<D> {
        let mut clamped = *point;
        for axis in 0..D {
            clamped[axis] = point[axis].clamp(self.min[axis], self.max[axis]);
        }
        clamped
    }

    /// Returns one of the `2^D` sub-boxes obtained by bisecting every axis.
    ///
    /// Bit `a` of `orthant` selects the upper half along axis `a`.
    ///
    /// # Example
    ///
    /// ```
    /// use field_types::{BoundingBox, Point2};
    ///
    /// let bbox = BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(2.0, 2.0));
    /// let upper_x = bbox.orthant(0b01);
    /// assert_eq!(*upper_x.min(), Point2::new(1.0, 0.0));
    /// assert_eq!(*upper_x.max(), Point2::new(2.0, 1.0));
    /// ```
    #[must_use]
    pub fn orthant(&self, orthant: usize) -> Self {
        let center = self.center();
        let mut min = self.min;
        let mut max = self.max;
        for axis in 0..D {
            if orthant & (1 << axis) == 0 {
                max[axis] = center[axis];
            } else {
                min[axis] = center[axis];
            }
        }
        Self { min, max }
    }
}
