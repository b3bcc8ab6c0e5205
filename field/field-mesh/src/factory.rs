//! Backend construction and the closed set of backend variants.

use field_types::{BoundingBox, MeshType};

use crate::error::FieldResult;
use crate::traits::{AdaptiveMesh, BackgroundMesh, CellBasedMesh, SparseGridMesh, StructuredMesh};
use crate::{AdaptiveTree, CartesianGrid, SparseGrid};

/// Creates a structured grid with default parameters.
///
/// # Errors
///
/// Returns [`FieldError::InvalidArgument`](crate::FieldError::InvalidArgument)
/// for a zero resolution on any axis or bounds with zero extent.
///
/// # Example
///
/// ```
/// use field_mesh::{BackgroundMesh, BoundingBox, CellBasedMesh, Point3, create_cartesian_grid};
///
/// let grid = create_cartesian_grid(
///     BoundingBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 2.0, 3.0)),
///     [4, 4, 4],
/// )
/// .unwrap();
/// assert_eq!(grid.cell_count(), 64);
/// assert!(create_cartesian_grid(grid.bounding_box(), [4, 0, 4]).is_err());
/// ```
pub fn create_cartesian_grid<const D: usize>(
    bounds: BoundingBox<D>,
    resolution: [usize; D],
) -> FieldResult<CartesianGrid<D>> {
    CartesianGrid::new(bounds, resolution)
}

/// Creates an adaptive tree holding a single root leaf.
///
/// # Errors
///
/// Returns `InvalidArgument` for bounds with zero extent or a `max_depth`
/// above [`MAX_TREE_DEPTH`](crate::MAX_TREE_DEPTH).
pub fn create_adaptive_grid<const D: usize>(
    bounds: BoundingBox<D>,
    max_depth: usize,
) -> FieldResult<AdaptiveTree<D>> {
    AdaptiveTree::new(bounds, max_depth)
}

/// Creates an empty sparse grid.
///
/// # Errors
///
/// Returns `InvalidArgument` unless `voxel_size` is finite and positive.
pub fn create_sparse_grid<const D: usize>(bounds: BoundingBox<D>, voxel_size: f64) -> FieldResult<SparseGrid<D>> {
    SparseGrid::new(bounds, voxel_size)
}

/// A mesh of any backend, as returned by [`load_mesh`](crate::load_mesh).
///
/// Generic code borrows the capability it needs; backend-specific code
/// matches on the variant.
#[derive(Debug, Clone)]
pub enum AnyMesh<const D: usize> {
    /// Dense structured grid.
    Cartesian(CartesianGrid<D>),
    /// Quadtree or octree.
    Adaptive(AdaptiveTree<D>),
    /// Sparse voxel grid.
    Sparse(SparseGrid<D>),
}

impl<const D: usize> AnyMesh<D> {
    /// Kind of the wrapped backend.
    #[must_use]
    pub fn mesh_type(&self) -> MeshType {
        self.as_background().mesh_type()
    }

    /// The capability every backend has.
    #[must_use]
    pub fn as_background(&self) -> &dyn BackgroundMesh<D> {
        match self {
            Self::Cartesian(m) => m,
            Self::Adaptive(m) => m,
            Self::Sparse(m) => m,
        }
    }

    /// Mutable form of [`AnyMesh::as_background`].
    pub fn as_background_mut(&mut self) -> &mut dyn BackgroundMesh<D> {
        match self {
            Self::Cartesian(m) => m,
            Self::Adaptive(m) => m,
            Self::Sparse(m) => m,
        }
    }

    /// Cell-based view; `None` for sparse grids.
    #[must_use]
    pub fn as_cell_based(&self) -> Option<&dyn CellBasedMesh<D>> {
        match self {
            Self::Cartesian(m) => Some(m),
            Self::Adaptive(m) => Some(m),
            Self::Sparse(_) => None,
        }
    }

    /// Structured view of a Cartesian grid.
    #[must_use]
    pub fn as_structured(&self) -> Option<&dyn StructuredMesh<D>> {
        match self {
            Self::Cartesian(m) => Some(m),
            _ => None,
        }
    }

    /// Mutable adaptive view of a tree.
    pub fn as_adaptive_mut(&mut self) -> Option<&mut dyn AdaptiveMesh<D>> {
        match self {
            Self::Adaptive(m) => Some(m),
            _ => None,
        }
    }

    /// Sparse view of a sparse grid.
    #[must_use]
    pub fn as_sparse(&self) -> Option<&dyn SparseGridMesh<D>> {
        match self {
            Self::Sparse(m) => Some(m),
            _ => None,
        }
    }
}

impl<const D: usize> From<CartesianGrid<D>> for AnyMesh<D> {
    fn from(mesh: CartesianGrid<D>) -> Self {
        Self::Cartesian(mesh)
    }
}

impl<const D: usize> From<AdaptiveTree<D>> for AnyMesh<D> {
    fn from(mesh: AdaptiveTree<D>) -> Self {
        Self::Adaptive(mesh)
    }
}

impl<const D: usize> From<SparseGrid<D>> for AnyMesh<D> {
    fn from(mesh: SparseGrid<D>) -> Self {
        Self::Sparse(mesh)
    }
}
