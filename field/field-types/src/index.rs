//! Discrete addresses: structured grid indices and sparse voxel coordinates.

use std::fmt;

/// A multi-index into a structured grid, one non-negative entry per axis.
pub type GridIndex<const D: usize> = [usize; D];

/// A signed integer coordinate identifying a voxel of a sparse grid.
///
/// Coordinates order lexicographically (axis 0 first), which gives sparse
/// grids a stable address order for enumeration and serialization.
///
/// # Example
///
/// ```
/// use field_types::SparseCoord;
///
/// let coord = SparseCoord::new([1, -2, 3]);
/// assert_eq!(coord[1], -2);
/// assert!(SparseCoord::new([0, 0, 0]) < coord);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SparseCoord<const D: usize>(pub [i32; D]);

impl<const D: usize> SparseCoord<D> {
    /// Creates a coordinate from its components.
    #[must_use]
    pub const fn new(components: [i32; D]) -> Self {
        Self(components)
    }

    /// The coordinate at the origin.
    #[must_use]
    pub const fn origin() -> Self {
        Self([0; D])
    }
}

impl<const D: usize> std::ops::Index<usize> for SparseCoord<D> {
    type Output = i32;

    fn index(&self, axis: usize) -> &i32 {
        &self.0[axis]
    }
}

impl<const D: usize> From<[i32; D]> for SparseCoord<D> {
    fn from(components: [i32; D]) -> Self {
        Self(components)
    }
}

impl<const D: usize> fmt::Debug for SparseCoord<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SparseCoord{:?}", self.0)
    }
}

impl<const D: usize> Default for SparseCoord<D> {
    fn default() -> Self {
        Self::origin()
    }
}

/// Iterator over every index of a structured grid with the given resolution.
///
/// Axis 0 varies fastest, matching the grid's linear index order.
///
/// # Example
///
/// ```
/// use field_types::GridIndexIter;
///
/// let all: Vec<_> = GridIndexIter::new([2, 2]).collect();
/// assert_eq!(all, vec![[0, 0], [1, 0], [0, 1], [1, 1]]);
/// ```
#[derive(Debug, Clone)]
pub struct GridIndexIter<const D: usize> {
    resolution: [usize; D],
    current: Option<[usize; D]>,
}

impl<const D: usize> GridIndexIter<D> {
    /// Creates an iterator over `[0, resolution[i])` on every axis.
    ///
    /// Yields nothing if any axis has zero resolution.
    #[must_use]
    pub fn new(resolution: [usize; D]) -> Self {
        let current = if resolution.iter().all(|&r| r > 0) {
            Some([0; D])
        } else {
            None
        };
        Self {
            resolution,
            current,
        }
    }
}

impl<const D: usize> Iterator for GridIndexIter<D> {
    type Item = [usize; D];

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;

        let mut next = current;
        self.current = None;
        for axis in 0..D {
            next[axis] += 1;
            if next[axis] < self.resolution[axis] {
                self.current = Some(next);
                break;
            }
            next[axis] = 0;
        }

        Some(current)
    }
}

/// Iterator over all sparse coordinates in an inclusive box.
///
/// Axis 0 varies fastest.
///
/// # Example
///
/// ```
/// use field_types::{CoordRange, SparseCoord};
///
/// let coords: Vec<_> = CoordRange::new([-1, 0], [0, 1]).collect();
/// assert_eq!(coords.len(), 4);
/// assert_eq!(coords[0], SparseCoord::new([-1, 0]));
/// assert_eq!(coords[3], SparseCoord::new([0, 1]));
/// ```
#[derive(Debug, Clone)]
pub struct CoordRange<const D: usize> {
    min: [i32; D],
    max: [i32; D],
    current: Option<[i32; D]>,
}

impl<const D: usize> CoordRange<D> {
    /// Creates a range over `[min[i], max[i]]` on every axis.
    ///
    /// Yields nothing if `min[i] > max[i]` on any axis.
    #[must_use]
    pub fn new(min: [i32; D], max: [i32; D]) -> Self {
        let current = if min.iter().zip(&max).all(|(lo, hi)| lo <= hi) {
            Some(min)
        } else {
            None
        };
        Self { min, max, current }
    }

    /// Number of coordinates in the range.
    #[must_use]
    pub fn volume(&self) -> u64 {
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| if lo <= hi { u64::from(hi.abs_diff(*lo)) + 1 } else { 0 })
            .fold(1u64, u64::saturating_mul)
    }
}

impl<const D: usize> Iterator for CoordRange<D> {
    type Item = SparseCoord<D>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;

        let mut next = current;
        self.current = None;
        for axis in 0..D {
            if next[axis] < self.max[axis] {
                next[axis] += 1;
                self.current = Some(next);
                break;
            }
            next[axis] = self.min[axis];
        }

        Some(SparseCoord(current))
    }
}
