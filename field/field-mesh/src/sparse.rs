//! Sparse voxel grid backend.
//!
//! Voxel `c` is centred at `c * voxel_size`; only active voxels hold values.
//! Every grid owns a scalar value field (see [`SparseGridParams`]) whose fill
//! value is the background, so an inactive voxel reads as the background in
//! interpolation and boolean composition.

use std::mem::size_of;
use std::sync::OnceLock;

use field_types::{
    BoundingBox, CoordRange, FieldKind, InterpolationMethod, MeshType, PartitioningStrategy, Point,
    SparseCoord, Tensor, Vector, is_finite_point,
};
use hashbrown::HashSet;
use tracing::{debug, info, warn};

use crate::codec::{self, CodecError, Decoded, Header, Structure};
use crate::error::{FieldError, FieldResult};
use crate::interpolate::{self, Sample, Tap};
use crate::params::SparseGridParams;
use crate::store::{FieldElement, FieldStore, FieldValue, TensorValue};
use crate::traits::{BackgroundMesh, SparseGridMesh};

/// Relative tolerance when comparing voxel sizes of two grids.
const VOXEL_SIZE_TOLERANCE: f64 = 1e-12;

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn to_coord(v: f64) -> FieldResult<i32> {
    if v.is_finite() && v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX) {
        Ok(v as i32)
    } else {
        Err(FieldError::invalid_argument(format!(
            "voxel coordinate {v} does not fit in i32"
        )))
    }
}

/// A sparse grid of cubic voxels.
///
/// # Example
///
/// ```
/// use field_mesh::{BoundingBox, Point2, SparseCoord, SparseGrid, SparseGridMesh};
///
/// let mut grid = SparseGrid::new(
///     BoundingBox::new(Point2::new(-1.0, -1.0), Point2::new(1.0, 1.0)),
///     0.5,
/// )
/// .unwrap();
///
/// let written = grid
///     .fill_region(&BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(0.5, 0.5)), -1.0)
///     .unwrap();
/// assert_eq!(written, 4);
/// assert_eq!(grid.get_value(SparseCoord::new([1, 1])), Some(-1.0));
/// assert_eq!(grid.get_value_or_default(SparseCoord::new([5, 5]), 3.0), 3.0);
/// ```
#[derive(Debug, Clone)]
pub struct SparseGrid<const D: usize> {
    domain: BoundingBox<D>,
    voxel_size: f64,
    params: SparseGridParams,
    active: HashSet<SparseCoord<D>>,
    fields: FieldStore<SparseCoord<D>, D>,
    extent: OnceLock<Option<BoundingBox<D>>>,
}

impl<const D: usize> SparseGrid<D> {
    /// Creates an empty grid with default parameters.
    ///
    /// `domain` is the region the grid is meant to cover and is reported by
    /// [`BackgroundMesh::bounding_box`]; voxels may be activated outside it.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::InvalidArgument`] unless `voxel_size` is finite
    /// and positive and `domain` is finite.
    pub fn new(domain: BoundingBox<D>, voxel_size: f64) -> FieldResult<Self> {
        Self::with_params(domain, voxel_size, SparseGridParams::default())
    }

    /// Creates an empty grid with explicit parameters.
    ///
    /// # Errors
    ///
    /// As for [`SparseGrid::new`], plus a non-finite background.
    pub fn with_params(domain: BoundingBox<D>, voxel_size: f64, params: SparseGridParams) -> FieldResult<Self> {
        if !voxel_size.is_finite() || voxel_size <= 0.0 {
            return Err(FieldError::invalid_argument(format!(
                "voxel size must be finite and positive, got {voxel_size}"
            )));
        }
        if !is_finite_point(domain.min()) || !is_finite_point(domain.max()) {
            return Err(FieldError::invalid_argument("sparse grid domain must be finite"));
        }
        if !params.background.is_finite() {
            return Err(FieldError::invalid_argument(format!(
                "background must be finite, got {}",
                params.background
            )));
        }
        let mut fields: FieldStore<SparseCoord<D>, D> = FieldStore::new();
        fields.ensure(&params.value_field, params.background, std::iter::empty())?;
        Ok(Self {
            domain,
            voxel_size,
            params,
            active: HashSet::new(),
            fields,
            extent: OnceLock::new(),
        })
    }

    /// Construction parameters.
    #[must_use]
    pub const fn params(&self) -> &SparseGridParams {
        &self.params
    }

    /// Name of the level-set value field.
    #[must_use]
    pub fn value_field(&self) -> &str {
        &self.params.value_field
    }

    /// Writes a scalar to a voxel, activating it.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::KindMismatch`] if `name` holds another kind.
    pub fn set_scalar_field(&mut self, name: &str, coord: SparseCoord<D>, value: f64) -> FieldResult<()> {
        self.set_voxel(name, coord, value)
    }

    /// Scalar at an active voxel.
    #[must_use]
    pub fn get_scalar_field(&self, name: &str, coord: SparseCoord<D>) -> Option<f64> {
        self.fields.get(name, &coord)
    }

    /// Writes a vector to a voxel, activating it.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::KindMismatch`] if `name` holds another kind.
    pub fn set_vector_field(&mut self, name: &str, coord: SparseCoord<D>, value: Vector<D>) -> FieldResult<()> {
        self.set_voxel(name, coord, value)
    }

    /// Vector at an active voxel.
    #[must_use]
    pub fn get_vector_field(&self, name: &str, coord: SparseCoord<D>) -> Option<Vector<D>> {
        self.fields.get(name, &coord)
    }

    /// Writes a tensor to a voxel, activating it.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::KindMismatch`] if `name` holds another kind.
    pub fn set_tensor_field(&mut self, name: &str, coord: SparseCoord<D>, value: Tensor<D>) -> FieldResult<()> {
        self.set_voxel(name, coord, TensorValue(value))
    }

    /// Tensor at an active voxel.
    #[must_use]
    pub fn get_tensor_field(&self, name: &str, coord: SparseCoord<D>) -> Option<Tensor<D>> {
        self.fields.get::<TensorValue<D>>(name, &coord).map(|t| t.0)
    }

    fn set_voxel<V: FieldElement<D>>(&mut self, name: &str, coord: SparseCoord<D>, value: V) -> FieldResult<()> {
        if let Some(found) = self.fields.kind(name).filter(|&k| k != V::KIND) {
            return Err(FieldError::KindMismatch {
                name: name.to_string(),
                expected: V::KIND,
                found,
            });
        }
        self.activate(coord);
        self.fields.set(name, coord, value, self.active.iter().copied())
    }

    fn activate(&mut self, coord: SparseCoord<D>) -> bool {
        let added = self.active.insert(coord);
        if added {
            self.fields.insert_address(coord);
            self.invalidate();
        }
        added
    }

    fn deactivate(&mut self, coord: SparseCoord<D>) -> bool {
        let removed = self.active.remove(&coord);
        if removed {
            self.fields.remove_address(&coord);
            self.invalidate();
        }
        removed
    }

    fn invalidate(&mut self) {
        self.extent.take();
    }

    fn value_at(&self, coord: SparseCoord<D>) -> f64 {
        self.fields
            .get(&self.params.value_field, &coord)
            .unwrap_or(self.params.background)
    }

    #[allow(clippy::float_cmp)]
    fn is_background(&self, value: f64) -> bool {
        value == self.params.background
    }

    /// Writes the value field at an active voxel.
    fn write_value(&mut self, coord: SparseCoord<D>, value: f64) {
        if let Err(err) = self
            .fields
            .put(&self.params.value_field, coord, FieldValue::Scalar(value))
        {
            warn!(%err, "value field write rejected");
        }
    }

    /// Recreates the value field if it was dropped.
    fn restore_value_field(&mut self) {
        if !self.fields.contains(&self.params.value_field) {
            let background = self.params.background;
            if let Err(err) = self
                .fields
                .ensure(&self.params.value_field, background, self.active.iter().copied())
            {
                warn!(%err, "value field could not be restored");
            }
        }
    }

    fn check_compatible(&self, other: &dyn SparseGridMesh<D>) -> FieldResult<()> {
        let (a, b) = (self.voxel_size, other.voxel_size());
        if (a - b).abs() > VOXEL_SIZE_TOLERANCE * a.max(b) {
            return Err(FieldError::invalid_argument(format!(
                "voxel sizes differ: {a} and {b}"
            )));
        }
        Ok(())
    }

    fn compute_extent(&self) -> Option<BoundingBox<D>> {
        let mut coords = self.active.iter();
        let first = coords.next()?;
        let (mut lo, mut hi) = (first.0, first.0);
        for c in coords {
            for axis in 0..D {
                lo[axis] = lo[axis].min(c[axis]);
                hi[axis] = hi[axis].max(c[axis]);
            }
        }
        let h = self.voxel_size;
        let min = Point::from(Vector::from_fn(|axis, _| (f64::from(lo[axis]) - 0.5) * h));
        let max = Point::from(Vector::from_fn(|axis, _| (f64::from(hi[axis]) + 0.5) * h));
        Some(BoundingBox::new(min, max))
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
        let t: [f64; D] = std::array::from_fn(|axis| point[axis] / self.voxel_size);
        interpolate::sample_lattice(method, &t, None, |address| {
            let mut coord = [0i32; D];
            for (c, a) in coord.iter_mut().zip(address) {
                *c = i32::try_from(a).ok()?;
            }
            Some(match column.get(&SparseCoord(coord)) {
                Some(&value) => Tap::regular(value),
                None => Tap::irregular(fill),
            })
        })
    }

    fn sorted_coordinates(&self) -> Vec<SparseCoord<D>> {
        let mut coords: Vec<_> = self.active.iter().copied().collect();
        coords.sort_unstable();
        coords
    }

    pub(crate) fn decode(bytes: &[u8], mut params: SparseGridParams) -> FieldResult<Self> {
        let Decoded {
            header,
            fields,
            structure,
        } = codec::decode::<D>(bytes, MeshType::SparseGrid)?;
        let Structure::Sparse {
            voxel_size,
            background,
            value_field,
            coords: stored,
        } = structure
        else {
            return Err(CodecError::invalid("expected a sparse grid structure").into());
        };
        params.background = background;
        params.value_field = value_field;
        let coords = stored
            .into_iter()
            .map(|c| {
                <[i32; D]>::try_from(c.as_slice())
                    .map(SparseCoord)
                    .map_err(|_| CodecError::invalid(format!("voxel coordinate with {} components", c.len())))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if coords.len() as u64 != header.address_count {
            return Err(CodecError::invalid(format!(
                "header declares {} voxels, found {}",
                header.address_count,
                coords.len()
            ))
            .into());
        }
        if coords.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CodecError::invalid("voxel coordinates are not strictly ascending").into());
        }

        let mut grid = Self::with_params(header.bounds, voxel_size, params)
            .map_err(|e| CodecError::invalid(e.to_string()))?;
        grid.fields = codec::assign_fields(fields, &coords)?;
        match grid.fields.kind(&grid.params.value_field) {
            None | Some(FieldKind::Scalar) => {}
            Some(kind) => {
                return Err(CodecError::invalid(format!(
                    "value field '{}' is a {kind} field",
                    grid.params.value_field
                ))
                .into());
            }
        }
        grid.active = coords.into_iter().collect();
        grid.restore_value_field();
        Ok(grid)
    }
}

impl<const D: usize> BackgroundMesh<D> for SparseGrid<D> {
    fn mesh_type(&self) -> MeshType {
        MeshType::SparseGrid
    }

    fn bounding_box(&self) -> BoundingBox<D> {
        self.domain
    }

    fn contains_point(&self, point: &Point<D>) -> bool {
        self.active_bounds().is_some_and(|b| b.contains(point))
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

    /// Removing the value field resets it to the background instead.
    fn remove_field(&mut self, name: &str) -> bool {
        let removed = self.fields.remove(name);
        self.restore_value_field();
        removed
    }

    fn clear_all_fields(&mut self) {
        self.fields.clear();
        self.restore_value_field();
    }

    fn serialize(&self) -> FieldResult<Vec<u8>> {
        let coords = self.sorted_coordinates();
        let header = Header {
            mesh_type: MeshType::SparseGrid,
            partitioning: PartitioningStrategy::None,
            bounds: self.domain,
            address_count: coords.len() as u64,
        };
        let structure = Structure::Sparse {
            voxel_size: self.voxel_size,
            background: self.params.background,
            value_field: self.params.value_field.clone(),
            coords: coords.iter().map(|c| c.0.to_vec()).collect(),
        };
        codec::encode(&header, &self.fields, &coords, structure)
    }

    fn deserialize(&mut self, bytes: &[u8]) -> FieldResult<()> {
        *self = Self::decode(bytes, self.params.clone())?;
        Ok(())
    }

    fn memory_usage(&self) -> usize {
        size_of::<Self>()
            + self.active.capacity() * (size_of::<SparseCoord<D>>() + 1)
            + self.fields.memory_usage()
    }

    fn optimize(&mut self) {
        self.active.shrink_to_fit();
        self.fields.shrink_to_fit();
        self.extent.get_or_init(|| self.compute_extent());
    }
}

impl<const D: usize> SparseGridMesh<D> for SparseGrid<D> {
    fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    fn background(&self) -> f64 {
        self.params.background
    }

    fn active_voxel_count(&self) -> usize {
        self.active.len()
    }

    fn active_bounds(&self) -> Option<BoundingBox<D>> {
        *self.extent.get_or_init(|| self.compute_extent())
    }

    fn world_to_index(&self, point: &Point<D>) -> FieldResult<SparseCoord<D>> {
        let mut coord = [0i32; D];
        for (axis, c) in coord.iter_mut().enumerate() {
            *c = to_coord((point[axis] / self.voxel_size - 0.5).ceil())?;
        }
        Ok(SparseCoord(coord))
    }

    fn index_to_world(&self, coord: SparseCoord<D>) -> Point<D> {
        Point::from(Vector::from_fn(|axis, _| f64::from(coord[axis]) * self.voxel_size))
    }

    fn is_active(&self, coord: SparseCoord<D>) -> bool {
        self.active.contains(&coord)
    }

    fn set_active(&mut self, coord: SparseCoord<D>, active: bool) {
        if active {
            self.activate(coord);
        } else {
            self.deactivate(coord);
        }
    }

    fn active_coordinates(&self) -> Vec<SparseCoord<D>> {
        self.sorted_coordinates()
    }

    fn set_value(&mut self, coord: SparseCoord<D>, value: f64) {
        self.activate(coord);
        self.write_value(coord, value);
    }

    fn get_value(&self, coord: SparseCoord<D>) -> Option<f64> {
        self.fields.get(&self.params.value_field, &coord)
    }

    fn fill_region(&mut self, region: &BoundingBox<D>, value: f64) -> FieldResult<usize> {
        let mut lo = [0i32; D];
        let mut hi = [0i32; D];
        for axis in 0..D {
            lo[axis] = to_coord((region.min()[axis] / self.voxel_size).ceil())?;
            hi[axis] = to_coord((region.max()[axis] / self.voxel_size).floor())?;
        }
        let range = CoordRange::new(lo, hi);
        let written = usize::try_from(range.volume())
            .map_err(|_| FieldError::invalid_argument("region covers too many voxels"))?;
        for coord in range {
            self.set_value(coord, value);
        }
        debug!(voxels = written, active = self.active.len(), "region filled");
        Ok(written)
    }

    fn clear_region(&mut self, region: &BoundingBox<D>) -> usize {
        let doomed: Vec<_> = self
            .active
            .iter()
            .copied()
            .filter(|&c| region.contains(&self.index_to_world(c)))
            .collect();
        for &coord in &doomed {
            self.deactivate(coord);
        }
        debug!(voxels = doomed.len(), active = self.active.len(), "region cleared");
        doomed.len()
    }

    fn union_with(&mut self, other: &dyn SparseGridMesh<D>) -> FieldResult<()> {
        self.check_compatible(other)?;
        let (ours, theirs) = (self.params.background, other.background());
        for coord in self.sorted_coordinates() {
            let b = other.get_value(coord).unwrap_or(theirs);
            let a = self.value_at(coord);
            self.write_value(coord, a.min(b));
        }
        let mut added = 0;
        for coord in other.active_coordinates() {
            if self.activate(coord) {
                let b = other.get_value(coord).unwrap_or(theirs);
                self.write_value(coord, ours.min(b));
                added += 1;
            }
        }
        info!(added, active = self.active.len(), "union applied");
        Ok(())
    }

    fn intersect_with(&mut self, other: &dyn SparseGridMesh<D>) -> FieldResult<()> {
        self.check_compatible(other)?;
        let theirs = other.background();
        let mut coords = self.sorted_coordinates();
        coords.extend(other.active_coordinates().into_iter().filter(|c| !self.active.contains(c)));
        let (mut kept, mut removed) = (0, 0);
        for coord in coords {
            let a = self.value_at(coord);
            let b = other.get_value(coord).unwrap_or(theirs);
            let r = a.max(b);
            if self.is_background(r) {
                removed += usize::from(self.deactivate(coord));
            } else {
                self.activate(coord);
                self.write_value(coord, r);
                kept += 1;
            }
        }
        info!(kept, removed, active = self.active.len(), "intersection applied");
        Ok(())
    }

    fn difference_with(&mut self, other: &dyn SparseGridMesh<D>) -> FieldResult<()> {
        self.check_compatible(other)?;
        let theirs = other.background();
        let mut removed = 0;
        for coord in self.sorted_coordinates() {
            let b = other.get_value(coord);
            let r = self.value_at(coord).max(-b.unwrap_or(theirs));
            if b.is_some() && r >= 0.0 {
                self.deactivate(coord);
                removed += 1;
            } else {
                self.write_value(coord, r);
            }
        }
        info!(removed, active = self.active.len(), "difference applied");
        Ok(())
    }
}
