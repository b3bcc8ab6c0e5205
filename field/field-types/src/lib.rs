//! Value types for spatial field meshes.
//!
//! This crate provides the leaf types shared by every field mesh backend:
//!
//! - [`Point`], [`Vector`], [`Tensor`] - fixed-dimension `nalgebra` values
//! - [`BoundingBox`] - axis-aligned box with an enforced `min <= max` invariant
//! - [`GridIndex`] and [`SparseCoord`] - discrete addresses for structured and
//!   sparse grids, with [`GridIndexIter`] and [`CoordRange`] to walk them
//! - [`MeshType`], [`InterpolationMethod`], [`PartitioningStrategy`],
//!   [`FieldKind`], [`ElementType`] - shared enumerations
//!
//! # Dimension
//!
//! Every type is generic over a `const D: usize` dimension. Quadtrees use
//! `D = 2`, octrees `D = 3`; the value types themselves work for any `D`.
//!
//! # Example
//!
//! ```
//! use field_types::{BoundingBox, Point2, PointExt};
//!
//! let domain = BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(10.0, 10.0));
//! let probe = Point2::new(5.5, 5.5);
//!
//! assert!(domain.contains(&probe));
//! assert!((domain.center().distance_to(&probe) - 0.5_f64.sqrt()).abs() < 1e-12);
//! ```

// Safety: Deny unwrap/expect in library code. Tests may use them (workspace warns).
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod bounds;
mod error;
mod index;
mod kinds;
mod point;

pub use bounds::BoundingBox;
pub use error::GeometryError;
pub use index::{CoordRange, GridIndex, GridIndexIter, SparseCoord};
pub use kinds::{ElementType, FieldKind, InterpolationMethod, MeshType, PartitioningStrategy};
pub use point::{Point, Point2, Point3, PointExt, Tensor, Vector, is_finite_point};

// Re-export nalgebra so downstream crates build values with the same version.
pub use nalgebra;
