//! Dense regular grid backend.

use std::mem::size_of;
use std::sync::OnceLock;

use field_types::{
    BoundingBox, FieldKind, GridIndex, GridIndexIter, InterpolationMethod, MeshType,
    PartitioningStrategy, Point, Tensor, Vector, is_finite_point,
};
use tracing::debug;

use crate::codec::{self, CodecError, Decoded, Header, Structure};
use crate::curve;
use crate::error::{FieldError, FieldResult};
use crate::interpolate::{self, Sample, Tap};
use crate::params::{CartesianGridParams, OutOfBoundsPolicy};
use crate::query;
use crate::store::{FieldElement, FieldStore, TensorValue};
use crate::traits::{BackgroundMesh, CellBasedMesh, CellId, StructuredMesh};

/// Code of the only supported linear index layout (axis 0 fastest).
const LAYOUT_AXIS0_FASTEST: u8 = 0;

/// A dense grid of `resolution[0] x ... x resolution[D-1]` equal cells.
///
/// Field values are cell-centred. The cell id of a cell is its linear index,
/// so per-cell and per-grid-index access observe the same values.
///
/// # Example
///
/// ```
/// use field_mesh::{BackgroundMesh, BoundingBox, CartesianGrid, InterpolationMethod, Point2, StructuredMesh};
///
/// let mut grid = CartesianGrid::new(
///     BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(10.0, 10.0)),
///     [10, 10],
/// )
/// .unwrap();
///
/// grid.set_scalar_at("h", [5, 5], 7.0).unwrap();
/// let h = grid.interpolate_scalar_field("h", &Point2::new(5.5, 5.5), InterpolationMethod::Nearest);
/// assert_eq!(h, Some(7.0));
/// ```
#[derive(Debug, Clone)]
pub struct CartesianGrid<const D: usize> {
    bounds: BoundingBox<D>,
    resolution: [usize; D],
    spacing: Vector<D>,
    cell_count: usize,
    params: CartesianGridParams,
    fields: FieldStore<CellId, D>,
    order: OnceLock<Vec<CellId>>,
}

impl<const D: usize> CartesianGrid<D> {
    /// Creates a grid with default parameters.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::InvalidArgument`] if any resolution is zero, the
    /// cell count overflows, or `bounds` has zero extent on some axis.
    pub fn new(bounds: BoundingBox<D>, resolution: [usize; D]) -> FieldResult<Self> {
        Self::with_params(bounds, resolution, CartesianGridParams::default())
    }

    /// Creates a grid with explicit parameters.
    ///
    /// # Errors
    ///
    /// As for [`CartesianGrid::new`].
    pub fn with_params(
        bounds: BoundingBox<D>,
        resolution: [usize; D],
        params: CartesianGridParams,
    ) -> FieldResult<Self> {
        if let Some(axis) = resolution.iter().position(|&r| r == 0) {
            return Err(FieldError::invalid_argument(format!(
                "resolution must be positive on every axis, axis {axis} is 0"
            )));
        }
        if !is_finite_point(bounds.min()) || !is_finite_point(bounds.max()) || bounds.is_degenerate() {
            return Err(FieldError::invalid_argument(
                "grid bounds must be finite with positive extent on every axis",
            ));
        }
        let cell_count = resolution
            .iter()
            .try_fold(1usize, |acc, &r| acc.checked_mul(r))
            .filter(|&n| i64::try_from(n).is_ok())
            .ok_or_else(|| FieldError::invalid_argument("cell count overflows"))?;

        #[allow(clippy::cast_precision_loss)]
        let spacing = Vector::from_fn(|axis, _| bounds.extent()[axis] / resolution[axis] as f64);

        Ok(Self {
            bounds,
            resolution,
            spacing,
            cell_count,
            params,
            fields: FieldStore::new(),
            order: OnceLock::new(),
        })
    }

    /// Construction parameters.
    #[must_use]
    pub const fn params(&self) -> &CartesianGridParams {
        &self.params
    }

    fn linear_unchecked(&self, index: GridIndex<D>) -> CellId {
        (0..D)
            .rev()
            .fold(0, |id, axis| id * self.resolution[axis] + index[axis])
    }

    fn grid_index_unchecked(&self, mut linear: CellId) -> GridIndex<D> {
        let mut index = [0; D];
        for axis in 0..D {
            index[axis] = linear % self.resolution[axis];
            linear /= self.resolution[axis];
        }
        index
    }

    fn check_index(&self, index: GridIndex<D>) -> FieldResult<()> {
        match (0..D).find(|&axis| index[axis] >= self.resolution[axis]) {
            None => Ok(()),
            Some(axis) => Err(FieldError::out_of_range(format!(
                "grid index {index:?} outside resolution {:?} on axis {axis}",
                self.resolution
            ))),
        }
    }

    fn check_cell(&self, id: CellId) -> FieldResult<()> {
        if id < self.cell_count {
            Ok(())
        } else {
            Err(FieldError::out_of_range(format!(
                "cell {id} does not exist ({} cells)",
                self.cell_count
            )))
        }
    }

    fn address_to_id(&self, address: [i64; D]) -> Option<CellId> {
        let mut index = [0; D];
        for axis in 0..D {
            let i = usize::try_from(address[axis]).ok()?;
            if i >= self.resolution[axis] {
                return None;
            }
            index[axis] = i;
        }
        Some(self.linear_unchecked(index))
    }

    #[allow(clippy::cast_precision_loss)]
    fn bounds_of_index(&self, index: GridIndex<D>) -> BoundingBox<D> {
        let origin = self.bounds.min();
        let mut min = *origin;
        let mut max = *origin;
        for axis in 0..D {
            min[axis] = origin[axis] + index[axis] as f64 * self.spacing[axis];
            max[axis] = if index[axis] + 1 == self.resolution[axis] {
                self.bounds.max()[axis]
            } else {
                origin[axis] + (index[axis] + 1) as f64 * self.spacing[axis]
            };
        }
        BoundingBox::new(min, max)
    }

    /// Index of the cell containing an in-bounds point; the max face belongs
    /// to the last cell.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn locate(&self, point: &Point<D>) -> GridIndex<D> {
        let mut index = [0; D];
        for axis in 0..D {
            let t = ((point[axis] - self.bounds.min()[axis]) / self.spacing[axis]).floor();
            index[axis] = (t.max(0.0) as usize).min(self.resolution[axis] - 1);
        }
        index
    }

    fn set_cell<V: FieldElement<D>>(&mut self, name: &str, id: CellId, value: V) -> FieldResult<()> {
        self.check_cell(id)?;
        self.fields.set(name, id, value, 0..self.cell_count)
    }

    fn sample<V: FieldElement<D>>(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<Sample<V>> {
        if !self.contains_point(point) {
            return None;
        }
        let column = self.fields.column::<V>(name)?;
        let fill = self.fields.fill::<V>(name)?;

        let mut t = [0.0; D];
        let mut extent = [0i64; D];
        for axis in 0..D {
            t[axis] = (point[axis] - self.bounds.min()[axis]) / self.spacing[axis] - 0.5;
            extent[axis] = i64::try_from(self.resolution[axis]).ok()?;
        }
        interpolate::sample_lattice(method, &t, Some(extent), |address| {
            let id = self.address_to_id(address)?;
            Some(Tap::regular(column.get(&id).copied().unwrap_or(fill)))
        })
    }

    fn curve_order(&self) -> Vec<CellId> {
        if self.params.partitioning == PartitioningStrategy::None {
            return (0..self.cell_count).collect();
        }
        let bits = self
            .resolution
            .iter()
            .map(|&r| curve::bits_for(r as u64))
            .max()
            .unwrap_or(0);
        let entries = (0..self.cell_count)
            .map(|id| (id, self.grid_index_unchecked(id).map(|i| i as u64)))
            .collect();
        curve::order_ids(self.params.partitioning, entries, bits)
    }

    pub(crate) fn decode(bytes: &[u8], mut params: CartesianGridParams) -> FieldResult<Self> {
        let Decoded {
            header,
            fields,
            structure,
        } = codec::decode::<D>(bytes, MeshType::CartesianGrid)?;
        let Structure::Cartesian {
            resolution: stored,
            layout,
        } = structure
        else {
            return Err(CodecError::invalid("expected a Cartesian grid structure").into());
        };
        if layout != LAYOUT_AXIS0_FASTEST {
            return Err(CodecError::UnknownCode {
                what: "index layout",
                code: layout,
            }
            .into());
        }
        if stored.len() != D {
            return Err(CodecError::invalid(format!("{} resolution entries for {D} axes", stored.len())).into());
        }
        let mut resolution = [0usize; D];
        for (res, &value) in resolution.iter_mut().zip(&stored) {
            *res = usize::try_from(value).map_err(|_| CodecError::invalid(format!("resolution {value} too large")))?;
        }

        params.partitioning = header.partitioning;
        let mut grid = Self::with_params(header.bounds, resolution, params)
            .map_err(|e| CodecError::invalid(e.to_string()))?;
        if grid.cell_count as u64 != header.address_count {
            return Err(CodecError::invalid(format!(
                "header declares {} cells, resolution gives {}",
                header.address_count, grid.cell_count
            ))
            .into());
        }
        let order = grid.ordered_cells();
        grid.fields = codec::assign_fields(fields, &order)?;
        Ok(grid)
    }
}

impl<const D: usize> BackgroundMesh<D> for CartesianGrid<D> {
    fn mesh_type(&self) -> MeshType {
        MeshType::CartesianGrid
    }

    fn bounding_box(&self) -> BoundingBox<D> {
        self.bounds
    }

    fn contains_point(&self, point: &Point<D>) -> bool {
        self.bounds.contains(point)
    }

    fn sample_scalar_field(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<Sample<f64>> {
        self.sample(name, point, method)
    }

    fn sample_vector_field(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<Sample<Vector<D>>> {
        self.sample(name, point, method)
    }

    fn sample_tensor_field(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<Sample<Tensor<D>>> {
        self.sample::<TensorValue<D>>(name, point, method)
            .map(|s| s.map(|t| t.0))
    }

    fn list_scalar_fields(&self) -> Vec<String> {
        self.fields.names_of_kind(FieldKind::Scalar)
    }

    fn list_vector_fields(&self) -> Vec<String> {
        self.fields.names_of_kind(FieldKind::Vector)
    }

    fn list_tensor_fields(&self) -> Vec<String> {
        self.fields.names_of_kind(FieldKind::Tensor)
    }

    fn remove_field(&mut self, name: &str) -> bool {
        self.fields.remove(name)
    }

    fn clear_all_fields(&mut self) {
        self.fields.clear();
    }

    fn serialize(&self) -> FieldResult<Vec<u8>> {
        let order = self.ordered_cells();
        let header = Header {
            mesh_type: MeshType::CartesianGrid,
            partitioning: self.params.partitioning,
            bounds: self.bounds,
            address_count: self.cell_count as u64,
        };
        let structure = Structure::Cartesian {
            resolution: self.resolution.iter().map(|&r| r as u64).collect(),
            layout: LAYOUT_AXIS0_FASTEST,
        };
        codec::encode(&header, &self.fields, &order, structure)
    }

    fn deserialize(&mut self, bytes: &[u8]) -> FieldResult<()> {
        *self = Self::decode(bytes, self.params.clone())?;
        Ok(())
    }

    fn memory_usage(&self) -> usize {
        size_of::<Self>()
            + self.fields.memory_usage()
            + self.order.get().map_or(0, |o| o.capacity() * size_of::<CellId>())
    }

    fn optimize(&mut self) {
        self.fields.shrink_to_fit();
        self.order.get_or_init(|| self.curve_order());
    }
}

impl<const D: usize> CellBasedMesh<D> for CartesianGrid<D> {
    fn cell_count(&self) -> usize {
        self.cell_count
    }

    fn max_depth(&self) -> usize {
        0
    }

    fn partitioning_strategy(&self) -> PartitioningStrategy {
        self.params.partitioning
    }

    fn ordered_cells(&self) -> Vec<CellId> {
        self.order.get_or_init(|| self.curve_order()).clone()
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn find_cells_in_region(&self, region: &BoundingBox<D>) -> Vec<CellId> {
        let Some(overlap) = self.bounds.intersection(region) else {
            return Vec::new();
        };
        // One cell of slack per side; the exact test below settles rounding.
        let mut lo = [0usize; D];
        let mut size = [0usize; D];
        for axis in 0..D {
            let origin = self.bounds.min()[axis];
            let h = self.spacing[axis];
            let last = self.resolution[axis] - 1;
            let first = (((overlap.min()[axis] - origin) / h).floor() - 1.0).max(0.0) as usize;
            let end = ((((overlap.max()[axis] - origin) / h).floor() + 1.0).max(0.0) as usize).min(last);
            lo[axis] = first.min(last);
            size[axis] = end.saturating_sub(lo[axis]) + 1;
        }

        GridIndexIter::new(size)
            .map(|offset| {
                let mut index = offset;
                for axis in 0..D {
                    index[axis] += lo[axis];
                }
                index
            })
            .filter(|&index| self.bounds_of_index(index).intersects(region))
            .map(|index| self.linear_unchecked(index))
            .collect()
    }

    fn find_nearest_cells(&self, point: &Point<D>, k: usize) -> Vec<CellId> {
        query::k_nearest(
            (0..self.cell_count).map(|id| (id, self.bounds_of_index(self.grid_index_unchecked(id)).center())),
            point,
            k,
        )
    }

    fn cell_bounds(&self, id: CellId) -> FieldResult<BoundingBox<D>> {
        self.check_cell(id)?;
        Ok(self.bounds_of_index(self.grid_index_unchecked(id)))
    }

    fn cell_level(&self, id: CellId) -> FieldResult<usize> {
        self.check_cell(id)?;
        Ok(0)
    }

    fn set_scalar_field(&mut self, name: &str, id: CellId, value: f64) -> FieldResult<()> {
        self.set_cell(name, id, value)
    }

    fn get_scalar_field(&self, name: &str, id: CellId) -> Option<f64> {
        self.fields.get(name, &id)
    }

    fn set_vector_field(&mut self, name: &str, id: CellId, value: Vector<D>) -> FieldResult<()> {
        self.set_cell(name, id, value)
    }

    fn get_vector_field(&self, name: &str, id: CellId) -> Option<Vector<D>> {
        self.fields.get(name, &id)
    }

    fn set_tensor_field(&mut self, name: &str, id: CellId, value: Tensor<D>) -> FieldResult<()> {
        self.set_cell(name, id, TensorValue(value))
    }

    fn get_tensor_field(&self, name: &str, id: CellId) -> Option<Tensor<D>> {
        self.fields.get::<TensorValue<D>>(name, &id).map(|t| t.0)
    }

    fn clear_cache(&mut self) {
        if self.order.take().is_some() {
            debug!(mesh = %MeshType::CartesianGrid, "cell order cache cleared");
        }
    }
}

impl<const D: usize> StructuredMesh<D> for CartesianGrid<D> {
    fn resolution(&self) -> [usize; D] {
        self.resolution
    }

    fn spacing(&self) -> Vector<D> {
        self.spacing
    }

    fn linear_index(&self, index: GridIndex<D>) -> FieldResult<CellId> {
        self.check_index(index)?;
        Ok(self.linear_unchecked(index))
    }

    fn grid_index(&self, linear: CellId) -> FieldResult<GridIndex<D>> {
        self.check_cell(linear)?;
        Ok(self.grid_index_unchecked(linear))
    }

    fn point_to_grid_index(&self, point: &Point<D>) -> FieldResult<GridIndex<D>> {
        if !is_finite_point(point) {
            return Err(FieldError::invalid_argument("point has non-finite coordinates"));
        }
        if self.bounds.contains(point) {
            return Ok(self.locate(point));
        }
        match self.params.out_of_bounds {
            OutOfBoundsPolicy::Fail => Err(FieldError::out_of_range(format!(
                "point {:?} outside grid bounds",
                point.coords.as_slice()
            ))),
            OutOfBoundsPolicy::Clamp => Ok(self.locate(&self.bounds.clamp_point(point))),
        }
    }

    fn set_scalar_at(&mut self, name: &str, index: GridIndex<D>, value: f64) -> FieldResult<()> {
        let id = self.linear_index(index)?;
        self.set_cell(name, id, value)
    }

    fn get_scalar_at(&self, name: &str, index: GridIndex<D>) -> Option<f64> {
        let id = self.linear_index(index).ok()?;
        self.fields.get(name, &id)
    }

    fn set_vector_at(&mut self, name: &str, index: GridIndex<D>, value: Vector<D>) -> FieldResult<()> {
        let id = self.linear_index(index)?;
        self.set_cell(name, id, value)
    }

    fn get_vector_at(&self, name: &str, index: GridIndex<D>) -> Option<Vector<D>> {
        let id = self.linear_index(index).ok()?;
        self.fields.get(name, &id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::cast_precision_loss)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use field_types::{Point2, Point3};

    fn grid_10x10() -> CartesianGrid<2> {
        CartesianGrid::new(
            BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(10.0, 10.0)),
            [10, 10],
        )
        .unwrap()
    }

    fn linear_field(grid: &mut CartesianGrid<2>) {
        for id in 0..grid.cell_count() {
            let c = grid.cell_center(id).unwrap();
            grid.set_scalar_field("f", id, 2.0 * c.x - c.y + 0.5).unwrap();
        }
    }

    #[test]
    fn rejects_bad_construction() {
        let bounds = BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0));
        assert!(matches!(
            CartesianGrid::new(bounds, [0, 4]),
            Err(FieldError::InvalidArgument { .. })
        ));
        let flat = BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 0.0));
        assert!(CartesianGrid::new(flat, [2, 2]).is_err());
        assert!(CartesianGrid::new(bounds, [usize::MAX, 2]).is_err());
    }

    #[test]
    fn nearest_scenario() {
        let mut grid = grid_10x10();
        grid.set_scalar_at("h", [5, 5], 7.0).unwrap();
        assert_eq!(
            grid.interpolate_scalar_field("h", &Point2::new(5.5, 5.5), InterpolationMethod::Nearest),
            Some(7.0)
        );
        assert_eq!(grid.get_scalar_field("h", 55), Some(7.0));
        assert_eq!(grid.get_scalar_at("h", [4, 5]), Some(0.0));
    }

    #[test]
    fn index_bijection() {
        let grid = CartesianGrid::new(
            BoundingBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 4.0, 5.0)),
            [3, 4, 5],
        )
        .unwrap();
        for (expected, index) in GridIndexIter::new([3, 4, 5]).enumerate() {
            let id = grid.linear_index(index).unwrap();
            assert_eq!(id, expected);
            assert_eq!(grid.grid_index(id).unwrap(), index);
        }
        assert!(grid.linear_index([3, 0, 0]).is_err());
        assert!(grid.grid_index(60).is_err());
    }

    #[test]
    fn point_lookup_policies() {
        let grid = grid_10x10();
        assert_eq!(grid.point_to_grid_index(&Point2::new(0.0, 9.99)).unwrap(), [0, 9]);
        assert_eq!(grid.point_to_grid_index(&Point2::new(10.0, 10.0)).unwrap(), [9, 9]);
        assert!(matches!(
            grid.point_to_grid_index(&Point2::new(-0.1, 5.0)),
            Err(FieldError::OutOfRange { .. })
        ));

        let clamping = CartesianGrid::with_params(
            grid.bounding_box(),
            [10, 10],
            CartesianGridParams::clamping(),
        )
        .unwrap();
        assert_eq!(clamping.point_to_grid_index(&Point2::new(-3.0, 50.0)).unwrap(), [0, 9]);
        assert!(clamping.point_to_grid_index(&Point2::new(f64::NAN, 0.0)).is_err());
    }

    #[test]
    fn linear_and_cubic_reproduce_linear_fields() {
        let mut grid = grid_10x10();
        linear_field(&mut grid);
        for p in [Point2::new(3.3, 4.7), Point2::new(0.1, 9.9), Point2::new(10.0, 0.0)] {
            let expected = 2.0 * p.x - p.y + 0.5;
            let v = grid.interpolate_scalar_field("f", &p, InterpolationMethod::Linear).unwrap();
            assert_relative_eq!(v, expected, epsilon = 1e-9);
        }
        let s = grid
            .sample_scalar_field("f", &Point2::new(4.2, 5.9), InterpolationMethod::Cubic)
            .unwrap();
        assert_eq!(s.method, InterpolationMethod::Cubic);
        assert_relative_eq!(s.value, 2.0 * 4.2 - 5.9 + 0.5, epsilon = 1e-9);

        let edge = grid
            .sample_scalar_field("f", &Point2::new(0.7, 5.0), InterpolationMethod::Spline)
            .unwrap();
        assert_eq!(edge.method, InterpolationMethod::Linear);
    }

    #[test]
    fn absent_field_or_outside_point_is_none() {
        let mut grid = grid_10x10();
        linear_field(&mut grid);
        let m = InterpolationMethod::Linear;
        assert!(grid.interpolate_scalar_field("missing", &Point2::new(1.0, 1.0), m).is_none());
        assert!(grid.interpolate_scalar_field("f", &Point2::new(11.0, 1.0), m).is_none());
        assert!(grid.interpolate_vector_field("f", &Point2::new(1.0, 1.0), m).is_none());
    }

    #[test]
    fn kinds_are_listed_and_enforced() {
        let mut grid = grid_10x10();
        grid.set_vector_at("v", [1, 1], Vector::<2>::new(1.0, 2.0)).unwrap();
        grid.set_tensor_field("t", 3, Tensor::<2>::identity()).unwrap();
        grid.set_scalar_field("s", 0, 1.0).unwrap();
        assert!(matches!(
            grid.set_scalar_field("v", 0, 1.0),
            Err(FieldError::KindMismatch { .. })
        ));
        assert!(matches!(
            grid.set_scalar_field("s", 100, 1.0),
            Err(FieldError::OutOfRange { .. })
        ));
        assert_eq!(grid.list_scalar_fields(), vec!["s"]);
        assert_eq!(grid.list_vector_fields(), vec!["v"]);
        assert_eq!(grid.list_tensor_fields(), vec!["t"]);
        assert_eq!(grid.get_tensor_field("t", 3), Some(Tensor::<2>::identity()));
        assert_eq!(grid.get_vector_at("v", [1, 1]), Some(Vector::<2>::new(1.0, 2.0)));

        assert!(grid.remove_field("v"));
        assert!(!grid.remove_field("v"));
        grid.clear_all_fields();
        assert!(grid.list_scalar_fields().is_empty());
    }

    #[test]
    fn region_query_includes_touching_cells() {
        let grid = grid_10x10();
        let region = BoundingBox::new(Point2::new(2.5, 2.5), Point2::new(4.0, 3.0));
        let mut found = grid.find_cells_in_region(&region);
        found.sort_unstable();
        let expected: Vec<_> = [[2, 2], [3, 2], [4, 2], [2, 3], [3, 3], [4, 3]]
            .into_iter()
            .map(|i| grid.linear_index(i).unwrap())
            .collect();
        let mut expected = expected;
        expected.sort_unstable();
        assert_eq!(found, expected);

        let outside = BoundingBox::new(Point2::new(20.0, 20.0), Point2::new(21.0, 21.0));
        assert!(grid.find_cells_in_region(&outside).is_empty());
        assert_eq!(grid.find_cells_in_region(&grid.bounding_box()).len(), 100);
    }

    #[test]
    fn nearest_cells() {
        let grid = grid_10x10();
        let found = grid.find_nearest_cells(&Point2::new(5.0, 5.5), 2);
        assert_eq!(found, vec![grid.linear_index([4, 5]).unwrap(), grid.linear_index([5, 5]).unwrap()]);
    }

    #[test]
    fn ordering_strategies_cover_every_cell() {
        for strategy in [
            PartitioningStrategy::None,
            PartitioningStrategy::Morton,
            PartitioningStrategy::Hilbert,
        ] {
            let grid = CartesianGrid::with_params(
                BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)),
                [5, 3],
                CartesianGridParams::default().with_partitioning(strategy),
            )
            .unwrap();
            let mut order = grid.ordered_cells();
            assert_eq!(order.len(), 15);
            order.sort_unstable();
            assert_eq!(order, (0..15).collect::<Vec<_>>());
        }
    }

    #[test]
    fn serialize_round_trip() {
        let mut grid = CartesianGrid::with_params(
            BoundingBox::new(Point2::new(-1.0, 0.0), Point2::new(3.0, 2.0)),
            [4, 2],
            CartesianGridParams::default().with_partitioning(PartitioningStrategy::Hilbert),
        )
        .unwrap();
        for id in 0..grid.cell_count() {
            grid.set_scalar_field("s", id, id as f64 * 1.5).unwrap();
            grid.set_vector_field("v", id, Vector::<2>::new(id as f64, -1.0)).unwrap();
        }
        let bytes = grid.serialize().unwrap();

        let mut other = grid_10x10();
        other.deserialize(&bytes).unwrap();
        assert_eq!(other.resolution(), [4, 2]);
        assert_eq!(other.bounding_box(), grid.bounding_box());
        assert_eq!(other.partitioning_strategy(), PartitioningStrategy::Hilbert);
        for id in 0..grid.cell_count() {
            assert_eq!(other.get_scalar_field("s", id), grid.get_scalar_field("s", id));
            assert_eq!(other.get_vector_field("v", id), grid.get_vector_field("v", id));
        }
    }

    #[test]
    fn failed_deserialize_leaves_mesh_untouched() {
        let mut grid = grid_10x10();
        grid.set_scalar_at("h", [1, 1], 3.0).unwrap();
        let mut bytes = grid.serialize().unwrap();
        bytes.truncate(bytes.len() - 3);

        let mut target = grid_10x10();
        target.set_scalar_at("keep", [0, 0], 1.0).unwrap();
        assert!(matches!(target.deserialize(&bytes), Err(FieldError::Serialization(_))));
        assert_eq!(target.get_scalar_at("keep", [0, 0]), Some(1.0));
        assert!(target.list_scalar_fields().contains(&"keep".to_string()));
    }

    #[test]
    fn optimize_keeps_results() {
        let mut grid = grid_10x10();
        linear_field(&mut grid);
        let p = Point2::new(6.1, 2.2);
        let before = grid.interpolate_scalar_field("f", &p, InterpolationMethod::Linear);
        grid.optimize();
        grid.optimize();
        assert_eq!(grid.interpolate_scalar_field("f", &p, InterpolationMethod::Linear), before);
        assert!(grid.memory_usage() > 0);
        grid.clear_cache();
        assert_eq!(grid.ordered_cells().len(), 100);
    }
}
