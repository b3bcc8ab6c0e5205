//! Spatial field storage and query engine.
//!
//! Named scalar, vector and tensor fields live on one of three backends:
//!
//! - [`CartesianGrid`] - dense structured grid addressed by grid index
//! - [`AdaptiveTree`] - quadtree / octree with refine and coarsen
//! - [`SparseGrid`] - sparse voxel map with level-set boolean composition
//!
//! All three implement [`BackgroundMesh`] (interpolation, field enumeration,
//! serialization). Cell-based backends add [`CellBasedMesh`] and then
//! [`StructuredMesh`] or [`AdaptiveMesh`]; the sparse backend adds
//! [`SparseGridMesh`]. [`AnyMesh`] wraps one backend of any kind, as returned
//! by [`load_mesh`].
//!
//! # Interpolation
//!
//! [`InterpolationMethod`] selects nearest, linear, cubic (Catmull-Rom) or
//! spline (natural cubic spline) reconstruction. Cubic and spline need a full
//! regular stencil; otherwise linear is applied, and the `sample_*` methods
//! report the method actually used. Points outside the mesh give `None`.
//!
//! # Example
//!
//! ```
//! use field_mesh::{
//!     AdaptiveMesh, BackgroundMesh, BoundingBox, CellBasedMesh, InterpolationMethod, Point2,
//!     create_adaptive_grid,
//! };
//!
//! let mut tree = create_adaptive_grid(
//!     BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)),
//!     4,
//! )
//! .unwrap();
//!
//! let whole = tree.bounding_box();
//! tree.refine_region(&whole, 2).unwrap();
//! for id in tree.ordered_cells() {
//!     let c = tree.cell_center(id).unwrap();
//!     tree.set_scalar_field("t", id, c.x + c.y).unwrap();
//! }
//!
//! let t = tree
//!     .interpolate_scalar_field("t", &Point2::new(0.4, 0.3), InterpolationMethod::Linear)
//!     .unwrap();
//! assert!((t - 0.7).abs() < 1e-12);
//! ```
//!
//! # Concurrency
//!
//! Meshes hold no locks. Reads take `&self` and structural mutations take
//! `&mut self`, so the borrow checker enforces single-writer access; wrap a
//! mesh in a `RwLock` to share it across threads.

// Safety: Deny unwrap/expect in library code. Tests may use them (workspace warns).
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod cartesian;
pub mod codec;
mod curve;
mod error;
mod factory;
mod interpolate;
mod io;
mod linalg;
mod params;
mod query;
mod sparse;
mod store;
mod traits;
mod tree;

pub use cartesian::CartesianGrid;
pub use codec::CodecError;
pub use error::{FieldError, FieldResult};
pub use factory::{AnyMesh, create_adaptive_grid, create_cartesian_grid, create_sparse_grid};
pub use interpolate::Sample;
pub use io::{decode_any, load_mesh};
pub use params::{
    AdaptiveTreeParams, CartesianGridParams, OutOfBoundsPolicy, RefinementCriterion, SparseGridParams,
};
pub use sparse::SparseGrid;
pub use traits::{AdaptiveMesh, BackgroundMesh, CellBasedMesh, CellId, SparseGridMesh, StructuredMesh};
pub use tree::{AdaptiveTree, MAX_TREE_DEPTH};

pub use field_types::{
    BoundingBox, CoordRange, ElementType, FieldKind, GridIndex, GridIndexIter, InterpolationMethod,
    MeshType, PartitioningStrategy, Point, Point2, Point3, PointExt, SparseCoord, Tensor, Vector,
};
