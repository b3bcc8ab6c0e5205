//! Capability traits shared by the mesh backends.
//!
//! Every backend implements [`BackgroundMesh`]. Cell-based backends add
//! [`CellBasedMesh`], then either [`StructuredMesh`] or [`AdaptiveMesh`];
//! the sparse backend adds [`SparseGridMesh`]. All traits are object safe,
//! so code written against a capability can take `&dyn` references and
//! stay independent of the backend behind them.

use std::path::Path;

use field_types::{
    BoundingBox, GridIndex, InterpolationMethod, MeshType, PartitioningStrategy, Point,
    SparseCoord, Tensor, Vector,
};

use crate::error::FieldResult;
use crate::interpolate::Sample;
use crate::io;

/// Stable identifier of a cell.
///
/// Structured grids use the linear index; adaptive trees use arena slots
/// that are never reused while the mesh lives.
pub type CellId = usize;

/// Operations available on every backend.
pub trait BackgroundMesh<const D: usize> {
    /// Kind of backend.
    fn mesh_type(&self) -> MeshType;

    /// Region the mesh covers.
    fn bounding_box(&self) -> BoundingBox<D>;

    /// Whether `point` lies inside the mesh.
    fn contains_point(&self, point: &Point<D>) -> bool;

    /// Reconstructs a scalar field at `point`.
    ///
    /// Returns `None` when the point lies outside the mesh or no scalar field
    /// named `name` exists.
    fn sample_scalar_field(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<Sample<f64>>;

    /// Reconstructs a vector field at `point`.
    fn sample_vector_field(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<Sample<Vector<D>>>;

    /// Reconstructs a tensor field at `point`.
    fn sample_tensor_field(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<Sample<Tensor<D>>>;

    /// Value-only form of [`BackgroundMesh::sample_scalar_field`].
    fn interpolate_scalar_field(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<f64> {
        self.sample_scalar_field(name, point, method).map(|s| s.value)
    }

    /// Value-only form of [`BackgroundMesh::sample_vector_field`].
    fn interpolate_vector_field(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<Vector<D>> {
        self.sample_vector_field(name, point, method).map(|s| s.value)
    }

    /// Value-only form of [`BackgroundMesh::sample_tensor_field`].
    fn interpolate_tensor_field(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<Tensor<D>> {
        self.sample_tensor_field(name, point, method).map(|s| s.value)
    }

    /// Names of the scalar fields, ascending.
    fn list_scalar_fields(&self) -> Vec<String>;

    /// Names of the vector fields, ascending.
    fn list_vector_fields(&self) -> Vec<String>;

    /// Names of the tensor fields, ascending.
    fn list_tensor_fields(&self) -> Vec<String>;

    /// Removes a field of any kind. Returns `false` if none existed.
    fn remove_field(&mut self, name: &str) -> bool;

    /// Removes every field.
    fn clear_all_fields(&mut self);

    /// Encodes structure and fields. See [`crate::codec`] for the layout.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Serialization`](crate::FieldError::Serialization)
    /// if the payload encoder fails.
    fn serialize(&self) -> FieldResult<Vec<u8>>;

    /// Replaces this mesh with the one encoded in `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::Serialization`](crate::FieldError::Serialization)
    /// for corrupt, truncated or mismatched input. The mesh is unchanged on
    /// error.
    fn deserialize(&mut self, bytes: &[u8]) -> FieldResult<()>;

    /// Approximate heap bytes held by the mesh.
    fn memory_usage(&self) -> usize;

    /// Compacts storage and rebuilds caches. Never changes query results.
    fn optimize(&mut self);

    /// Writes the encoded mesh to `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns an encoding error, or an I/O error if the temporary file
    /// cannot be written or renamed into place; the target file is then left
    /// as it was.
    fn save_to_file(&self, path: &Path) -> FieldResult<()> {
        io::write_atomic(path, &self.serialize()?)
    }

    /// Replaces this mesh with the one stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::FileNotFound`](crate::FieldError::FileNotFound),
    /// an I/O error, or a decoding error. The mesh is unchanged on error.
    fn load_from_file(&mut self, path: &Path) -> FieldResult<()> {
        let bytes = io::read_file(path)?;
        self.deserialize(&bytes)
    }
}

/// Meshes made of cells with stable ids.
pub trait CellBasedMesh<const D: usize>: BackgroundMesh<D> {
    /// Number of leaf cells.
    fn cell_count(&self) -> usize;

    /// Deepest level cells may reach. Zero for structured grids.
    fn max_depth(&self) -> usize;

    /// Order applied by [`CellBasedMesh::ordered_cells`].
    fn partitioning_strategy(&self) -> PartitioningStrategy;

    /// Leaf cell ids in partition order.
    fn ordered_cells(&self) -> Vec<CellId>;

    /// Leaf cells whose bounds intersect `region` (faces included).
    fn find_cells_in_region(&self, region: &BoundingBox<D>) -> Vec<CellId>;

    /// The `k` leaf cells with centers closest to `point`, nearest first,
    /// ties broken by ascending id.
    fn find_nearest_cells(&self, point: &Point<D>, k: usize) -> Vec<CellId>;

    /// Bounds of a cell.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::OutOfRange`](crate::FieldError::OutOfRange) for
    /// an unknown id.
    fn cell_bounds(&self, id: CellId) -> FieldResult<BoundingBox<D>>;

    /// Center of a cell.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` for an unknown id.
    fn cell_center(&self, id: CellId) -> FieldResult<Point<D>> {
        self.cell_bounds(id).map(|b| b.center())
    }

    /// Refinement level of a cell (root = 0).
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` for an unknown id.
    fn cell_level(&self, id: CellId) -> FieldResult<usize>;

    /// Writes a scalar value to a cell, creating the field (zero elsewhere)
    /// on first write.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` for an unknown id and `KindMismatch` if `name`
    /// holds another kind. Adaptive meshes reject interior cells with
    /// `InvalidOperation`.
    fn set_scalar_field(&mut self, name: &str, id: CellId, value: f64) -> FieldResult<()>;

    /// Reads a scalar value; `None` for an unknown id or absent field.
    fn get_scalar_field(&self, name: &str, id: CellId) -> Option<f64>;

    /// Writes a vector value to a cell.
    ///
    /// # Errors
    ///
    /// As for [`CellBasedMesh::set_scalar_field`].
    fn set_vector_field(&mut self, name: &str, id: CellId, value: Vector<D>) -> FieldResult<()>;

    /// Reads a vector value.
    fn get_vector_field(&self, name: &str, id: CellId) -> Option<Vector<D>>;

    /// Writes a tensor value to a cell.
    ///
    /// # Errors
    ///
    /// As for [`CellBasedMesh::set_scalar_field`].
    fn set_tensor_field(&mut self, name: &str, id: CellId, value: Tensor<D>) -> FieldResult<()>;

    /// Reads a tensor value.
    fn get_tensor_field(&self, name: &str, id: CellId) -> Option<Tensor<D>>;

    /// Drops cached enumeration orders and spatial lookups. Field data is
    /// untouched. Structural mutations call this themselves.
    fn clear_cache(&mut self);
}

/// Cell-based meshes that refine and coarsen.
pub trait AdaptiveMesh<const D: usize>: CellBasedMesh<D> {
    /// Splits a leaf into `2^D` children and propagates every field to them.
    ///
    /// Returns the new child ids in orthant order.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for an unknown id; `InvalidOperation` for an interior
    /// cell or a cell at `max_depth`.
    fn refine_cell(&mut self, id: CellId) -> FieldResult<Vec<CellId>>;

    /// Refines every leaf intersecting `region` until it reaches
    /// `min(max_level, max_depth)`. Returns the number of cells refined.
    ///
    /// # Errors
    ///
    /// Propagates refinement errors; cells refined before the failure stay
    /// refined.
    fn refine_region(&mut self, region: &BoundingBox<D>, max_level: usize) -> FieldResult<usize>;

    /// Collapses the children of `id` back into `id`, averaging fields by
    /// volume.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for an unknown id; `InvalidOperation` when `id` is a leaf,
    /// is the root, or has a child that is not a leaf.
    fn coarsen_cell(&mut self, id: CellId) -> FieldResult<()>;

    /// Refines leaves whose indicator for field `name` exceeds `threshold`,
    /// repeatedly, up to `min(max_level, max_depth)`. Returns the number of
    /// cells refined.
    ///
    /// # Errors
    ///
    /// `OutOfRange` if the field does not exist; `InvalidArgument` for a
    /// non-finite threshold.
    fn adapt_to_field(&mut self, name: &str, threshold: f64, max_level: usize) -> FieldResult<usize>;

    /// Whether [`AdaptiveMesh::refine_cell`] would succeed.
    fn can_refine_cell(&self, id: CellId) -> bool;

    /// Whether [`AdaptiveMesh::coarsen_cell`] would succeed.
    fn can_coarsen_cell(&self, id: CellId) -> bool;

    /// Child ids of a cell; empty for leaves and unknown ids.
    fn get_children(&self, id: CellId) -> Vec<CellId>;

    /// Parent id of a cell; `None` for the root and unknown ids.
    fn get_parent(&self, id: CellId) -> Option<CellId>;

    /// Whether `id` is a live leaf.
    fn is_leaf(&self, id: CellId) -> bool;
}

/// Dense regular grids.
pub trait StructuredMesh<const D: usize>: CellBasedMesh<D> {
    /// Cells per axis.
    fn resolution(&self) -> [usize; D];

    /// Cell size per axis.
    fn spacing(&self) -> Vector<D>;

    /// Linear offset of a grid index (axis 0 fastest). Equal to the cell id.
    ///
    /// # Errors
    ///
    /// `OutOfRange` if any component reaches its resolution.
    fn linear_index(&self, index: GridIndex<D>) -> FieldResult<CellId>;

    /// Inverse of [`StructuredMesh::linear_index`].
    ///
    /// # Errors
    ///
    /// `OutOfRange` if `linear` is not below the cell count.
    fn grid_index(&self, linear: CellId) -> FieldResult<GridIndex<D>>;

    /// Grid index of the cell containing `point`.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for a point outside the grid unless the grid clamps.
    fn point_to_grid_index(&self, point: &Point<D>) -> FieldResult<GridIndex<D>>;

    /// Writes a scalar at a grid index.
    ///
    /// # Errors
    ///
    /// `OutOfRange` for an invalid index; `KindMismatch` for a field of
    /// another kind.
    fn set_scalar_at(&mut self, name: &str, index: GridIndex<D>, value: f64) -> FieldResult<()>;

    /// Reads a scalar at a grid index.
    fn get_scalar_at(&self, name: &str, index: GridIndex<D>) -> Option<f64>;

    /// Writes a vector at a grid index.
    ///
    /// # Errors
    ///
    /// As for [`StructuredMesh::set_scalar_at`].
    fn set_vector_at(&mut self, name: &str, index: GridIndex<D>, value: Vector<D>) -> FieldResult<()>;

    /// Reads a vector at a grid index.
    fn get_vector_at(&self, name: &str, index: GridIndex<D>) -> Option<Vector<D>>;
}

/// Sparse voxel grids with a level-set value field.
///
/// `set_value`, `get_value` and the boolean operations act on the mesh's
/// value field (see [`SparseGridParams`](crate::SparseGridParams)).
pub trait SparseGridMesh<const D: usize>: BackgroundMesh<D> {
    /// Edge length of a voxel.
    fn voxel_size(&self) -> f64;

    /// Value implied at inactive voxels.
    fn background(&self) -> f64;

    /// Number of active voxels.
    fn active_voxel_count(&self) -> usize;

    /// Tight box over the full extent of the active voxels; `None` when no
    /// voxel is active.
    fn active_bounds(&self) -> Option<BoundingBox<D>>;

    /// Coordinate of the voxel whose center is nearest to `point`, ties to
    /// the lower coordinate.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the coordinate does not fit in `i32` or the
    /// point is not finite.
    fn world_to_index(&self, point: &Point<D>) -> FieldResult<SparseCoord<D>>;

    /// Center of a voxel.
    fn index_to_world(&self, coord: SparseCoord<D>) -> Point<D>;

    /// Whether a voxel is active.
    fn is_active(&self, coord: SparseCoord<D>) -> bool;

    /// Activates a voxel with every field at its default, or deactivates it
    /// and drops its values.
    fn set_active(&mut self, coord: SparseCoord<D>, active: bool);

    /// Active coordinates in ascending order.
    fn active_coordinates(&self) -> Vec<SparseCoord<D>>;

    /// Writes the value field at a voxel, activating it.
    fn set_value(&mut self, coord: SparseCoord<D>, value: f64);

    /// Value at an active voxel; `None` when inactive.
    fn get_value(&self, coord: SparseCoord<D>) -> Option<f64>;

    /// Value at a voxel, or `default` when inactive.
    fn get_value_or_default(&self, coord: SparseCoord<D>, default: f64) -> f64 {
        self.get_value(coord).unwrap_or(default)
    }

    /// Activates every voxel whose center lies in `region` and sets it to
    /// `value`. Returns the number of voxels written.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the region's voxel range does not fit in `i32`.
    fn fill_region(&mut self, region: &BoundingBox<D>, value: f64) -> FieldResult<usize>;

    /// Deactivates every voxel whose center lies in `region`. Returns the
    /// number of voxels deactivated.
    fn clear_region(&mut self, region: &BoundingBox<D>) -> usize;

    /// Level-set union: minimum of the two values over voxels active in
    /// either operand. An absent operand contributes its background.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the voxel sizes differ.
    fn union_with(&mut self, other: &dyn SparseGridMesh<D>) -> FieldResult<()>;

    /// Level-set intersection: maximum of the two values over voxels active
    /// in either operand, an absent operand contributing its background.
    /// Voxels whose result equals this grid's background end up inactive.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the voxel sizes differ.
    fn intersect_with(&mut self, other: &dyn SparseGridMesh<D>) -> FieldResult<()>;

    /// Level-set difference: `max(a, -b)` over voxels active here, with
    /// `b` the background of `other` where it is inactive. Voxels active in
    /// both that end up outside (`>= 0`) are deactivated.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the voxel sizes differ.
    fn difference_with(&mut self, other: &dyn SparseGridMesh<D>) -> FieldResult<()>;
}
