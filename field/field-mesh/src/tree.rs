//! Adaptive quadtree / octree backend.
//!
//! Cells live in an arena indexed by [`CellId`]. The root is cell 0; refining
//! a leaf appends its `2^D` children, coarsening frees their slots. Freed ids
//! are never handed out again, so a stale id reads as unknown rather than
//! aliasing a newer cell.
//!
//! Field values are stored for leaves only. An interior cell reads as the
//! volume-weighted average of the leaves below it, which is how a refined
//! neighbour contributes to an interpolation stencil.

use std::mem::size_of;
use std::sync::OnceLock;

use field_types::{
    BoundingBox, FieldKind, InterpolationMethod, MeshType, PartitioningStrategy, Point, PointExt,
    Tensor, Vector, is_finite_point,
};
use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::codec::{self, CodecError, Decoded, Header, Structure, TreeSlot};
use crate::curve;
use crate::error::{FieldError, FieldResult};
use crate::interpolate::{self, Sample, Tap};
use crate::linalg;
use crate::params::{AdaptiveTreeParams, RefinementCriterion};
use crate::query;
use crate::store::{FieldElement, FieldStore, FieldValue, TensorValue};
use crate::traits::{AdaptiveMesh, BackgroundMesh, CellBasedMesh, CellId};

/// Deepest supported refinement level.
pub const MAX_TREE_DEPTH: usize = 24;

/// Largest dimension for which a tree can be built (`2^D` children).
const MAX_TREE_DIMENSION: usize = 8;

const ROOT: CellId = 0;

#[derive(Debug, Clone)]
struct Cell<const D: usize> {
    level: u32,
    /// Position in the `2^level` lattice of this level.
    coords: [u32; D],
    bounds: BoundingBox<D>,
    parent: Option<CellId>,
    children: Vec<CellId>,
}

impl<const D: usize> Cell<D> {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

fn leaf_ids<const D: usize>(cells: &[Option<Cell<D>>]) -> impl Iterator<Item = CellId> + '_ {
    cells
        .iter()
        .enumerate()
        .filter_map(|(id, cell)| cell.as_ref().filter(|c| c.is_leaf()).map(|_| id))
}

fn check_bounds<const D: usize>(bounds: &BoundingBox<D>) -> FieldResult<()> {
    if !is_finite_point(bounds.min()) || !is_finite_point(bounds.max()) || bounds.is_degenerate() {
        return Err(FieldError::invalid_argument(
            "tree bounds must be finite with positive extent on every axis",
        ));
    }
    Ok(())
}

/// An adaptive tree over a box: a quadtree for `D = 2`, an octree for
/// `D = 3`.
///
/// Every refinement splits a leaf into `2^D` equal children (child `k` takes
/// the upper half along axis `a` when bit `a` of `k` is set).
///
/// # Example
///
/// ```
/// use field_mesh::{AdaptiveMesh, AdaptiveTree, BoundingBox, CellBasedMesh, Point2};
///
/// let mut tree = AdaptiveTree::new(
///     BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)),
///     4,
/// )
/// .unwrap();
/// let root = tree.ordered_cells()[0];
///
/// let children = tree.refine_cell(root).unwrap();
/// assert_eq!(tree.cell_count(), 4);
/// assert!(children.iter().all(|&c| tree.get_parent(c) == Some(root)));
/// assert!(!tree.is_leaf(root));
/// ```
#[derive(Debug, Clone)]
pub struct AdaptiveTree<const D: usize> {
    bounds: BoundingBox<D>,
    max_depth: u32,
    params: AdaptiveTreeParams,
    cells: Vec<Option<Cell<D>>>,
    leaf_count: usize,
    fields: FieldStore<CellId, D>,
    leaves: OnceLock<Vec<CellId>>,
}

impl<const D: usize> AdaptiveTree<D> {
    /// Creates a tree with a single root leaf and default parameters.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::InvalidArgument`] for bounds with zero extent,
    /// `max_depth` above [`MAX_TREE_DEPTH`], or an unsupported dimension.
    pub fn new(bounds: BoundingBox<D>, max_depth: usize) -> FieldResult<Self> {
        Self::with_params(bounds, max_depth, AdaptiveTreeParams::default())
    }

    /// Creates a tree with explicit parameters.
    ///
    /// # Errors
    ///
    /// As for [`AdaptiveTree::new`].
    pub fn with_params(
        bounds: BoundingBox<D>,
        max_depth: usize,
        params: AdaptiveTreeParams,
    ) -> FieldResult<Self> {
        if D == 0 || D > MAX_TREE_DIMENSION {
            return Err(FieldError::invalid_argument(format!(
                "trees support dimensions 1 to {MAX_TREE_DIMENSION}, got {D}"
            )));
        }
        check_bounds(&bounds)?;
        if max_depth > MAX_TREE_DEPTH {
            return Err(FieldError::invalid_argument(format!(
                "max depth {max_depth} exceeds {MAX_TREE_DEPTH}"
            )));
        }
        let root = Cell {
            level: 0,
            coords: [0; D],
            bounds,
            parent: None,
            children: Vec::new(),
        };
        Ok(Self {
            bounds,
            // Checked against MAX_TREE_DEPTH above.
            max_depth: u32::try_from(max_depth).unwrap_or(u32::MAX),
            params,
            cells: vec![Some(root)],
            leaf_count: 1,
            fields: FieldStore::new(),
            leaves: OnceLock::new(),
        })
    }

    /// Construction parameters.
    #[must_use]
    pub const fn params(&self) -> &AdaptiveTreeParams {
        &self.params
    }

    /// Id of the root cell.
    #[must_use]
    pub const fn root(&self) -> CellId {
        ROOT
    }

    fn live(&self, id: CellId) -> Option<&Cell<D>> {
        self.cells.get(id).and_then(Option::as_ref)
    }

    fn cell(&self, id: CellId) -> FieldResult<&Cell<D>> {
        self.live(id)
            .ok_or_else(|| FieldError::out_of_range(format!("cell {id} does not exist")))
    }

    fn bounds_at(&self, level: u32, coords: [u32; D]) -> BoundingBox<D> {
        let n = f64::from(1u32 << level);
        let origin = self.bounds.min();
        let top = self.bounds.max();
        let extent = self.bounds.extent();
        let mut min = *origin;
        let mut max = *origin;
        for axis in 0..D {
            let h = extent[axis] / n;
            min[axis] = origin[axis] + f64::from(coords[axis]) * h;
            max[axis] = if coords[axis] + 1 == 1u32 << level {
                top[axis]
            } else {
                origin[axis] + f64::from(coords[axis] + 1) * h
            };
        }
        BoundingBox::new(min, max)
    }

    /// Leaf containing an in-bounds point.
    fn leaf_at(&self, point: &Point<D>) -> Option<CellId> {
        if !self.bounds.contains(point) {
            return None;
        }
        let mut id = ROOT;
        loop {
            let cell = self.live(id)?;
            if cell.is_leaf() {
                return Some(id);
            }
            let center = cell.bounds.center();
            let orthant = (0..D)
                .filter(|&axis| point[axis] >= center[axis])
                .fold(0usize, |k, axis| k | (1 << axis));
            id = *cell.children.get(orthant)?;
        }
    }

    /// Deepest cell on the path to lattice position `address` at `level`:
    /// the cell at that position, or the coarser leaf covering it.
    fn node_at(&self, level: u32, address: [i64; D]) -> Option<CellId> {
        let side = 1i64 << level;
        if address.iter().any(|&c| c < 0 || c >= side) {
            return None;
        }
        let mut id = ROOT;
        for depth in 0..level {
            let cell = self.live(id)?;
            if cell.is_leaf() {
                break;
            }
            let shift = level - depth - 1;
            let orthant = (0..D)
                .filter(|&axis| (address[axis] >> shift) & 1 == 1)
                .fold(0usize, |k, axis| k | (1 << axis));
            id = *cell.children.get(orthant)?;
        }
        Some(id)
    }

    /// Value of a cell: its own for a leaf, the volume-weighted average of
    /// its leaves otherwise.
    fn value_of<V: FieldElement<D>>(&self, column: &HashMap<CellId, V>, fill: V, id: CellId) -> V {
        let Some(cell) = self.live(id) else {
            return fill;
        };
        if cell.is_leaf() {
            return column.get(&id).copied().unwrap_or(fill);
        }
        #[allow(clippy::cast_precision_loss)]
        let weight = 1.0 / cell.children.len() as f64;
        cell.children.iter().fold(V::zero(), |acc, &child| {
            acc.add_scaled(self.value_of(column, fill, child), weight)
        })
    }

    fn leaves_in_region(&self, region: &BoundingBox<D>) -> Vec<CellId> {
        let mut found = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            let Some(cell) = self.live(id) else {
                continue;
            };
            if !cell.bounds.intersects(region) {
                continue;
            }
            if cell.is_leaf() {
                found.push(id);
            } else {
                stack.extend_from_slice(&cell.children);
            }
        }
        found.sort_unstable();
        found
    }

    fn sample<V: FieldElement<D>>(
        &self,
        name: &str,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<Sample<V>> {
        let column = self.fields.column::<V>(name)?;
        let fill = self.fields.fill::<V>(name)?;
        let leaf = self.leaf_at(point)?;
        let cell = self.live(leaf)?;

        if method == InterpolationMethod::Nearest {
            // Any closer leaf center lies within this radius of the point.
            let radius = cell.bounds.center().distance_to(point);
            let probe = BoundingBox::new(
                Point::from(point.coords.add_scalar(-radius)),
                Point::from(point.coords.add_scalar(radius)),
            );
            let candidates = self
                .leaves_in_region(&probe)
                .into_iter()
                .filter_map(|id| self.live(id).map(|c| (id, c.bounds.center())));
            let nearest = query::nearest(candidates, point).unwrap_or(leaf);
            return Some(Sample {
                value: column.get(&nearest).copied().unwrap_or(fill),
                method,
            });
        }

        let level = cell.level;
        let side = f64::from(1u32 << level);
        let mut t = [0.0; D];
        for (axis, t) in t.iter_mut().enumerate() {
            let h = self.bounds.extent()[axis] / side;
            *t = (point[axis] - self.bounds.min()[axis]) / h - 0.5;
        }
        let extent = [1i64 << level; D];
        interpolate::sample_lattice(method, &t, Some(extent), |address| {
            let id = self.node_at(level, address)?;
            let node = self.live(id)?;
            let value = self.value_of(column, fill, id);
            Some(if node.level == level && node.is_leaf() {
                Tap::regular(value)
            } else {
                Tap::irregular(value)
            })
        })
    }

    fn sample_value(
        &self,
        name: &str,
        kind: FieldKind,
        point: &Point<D>,
        method: InterpolationMethod,
    ) -> Option<FieldValue<D>> {
        match kind {
            FieldKind::Scalar => self
                .sample::<f64>(name, point, method)
                .map(|s| FieldElement::<D>::into_value(s.value)),
            FieldKind::Vector => self
                .sample::<Vector<D>>(name, point, method)
                .map(|s| FieldElement::<D>::into_value(s.value)),
            FieldKind::Tensor => self
                .sample::<TensorValue<D>>(name, point, method)
                .map(|s| s.value.into_value()),
        }
    }

    fn set_leaf<V: FieldElement<D>>(&mut self, name: &str, id: CellId, value: V) -> FieldResult<()> {
        if !self.cell(id)?.is_leaf() {
            return Err(FieldError::invalid_operation(format!(
                "cell {id} is not a leaf and holds no field values"
            )));
        }
        self.fields.set(name, id, value, leaf_ids(&self.cells))
    }

    fn invalidate(&mut self) {
        if self.leaves.take().is_some() {
            debug!(mesh = %self.mesh_type(), "leaf order cache cleared");
        }
    }

    fn curve_order(&self) -> Vec<CellId> {
        let ids: Vec<CellId> = leaf_ids(&self.cells).collect();
        if self.params.partitioning == PartitioningStrategy::None {
            return ids;
        }
        let depth = ids
            .iter()
            .filter_map(|&id| self.live(id).map(|c| c.level))
            .max()
            .unwrap_or(0);
        let entries = ids
            .iter()
            .filter_map(|&id| {
                self.live(id)
                    .map(|c| (id, c.coords.map(|x| u64::from(x) << (depth - c.level))))
            })
            .collect();
        curve::order_ids(self.params.partitioning, entries, depth)
    }

    fn refine(&mut self, id: CellId) -> FieldResult<Vec<CellId>> {
        let cell = self.cell(id)?;
        if !cell.is_leaf() {
            return Err(FieldError::invalid_operation(format!("cell {id} is already refined")));
        }
        if cell.level >= self.max_depth {
            return Err(FieldError::invalid_operation(format!(
                "cell {id} is at max depth {}",
                self.max_depth
            )));
        }

        let level = cell.level + 1;
        let parent_coords = cell.coords;
        let specs: Vec<([u32; D], BoundingBox<D>)> = (0..1usize << D)
            .map(|k| {
                let mut coords = parent_coords;
                for (axis, c) in coords.iter_mut().enumerate() {
                    *c = *c * 2 + u32::from(k & (1 << axis) != 0);
                }
                (coords, self.bounds_at(level, coords))
            })
            .collect();

        // Values are sampled on the unrefined tree before anything changes.
        let method = self.params.refine_method;
        let propagated: Vec<(String, Vec<FieldValue<D>>)> = self
            .fields
            .iter()
            .map(|(name, field)| {
                let fallback = field.get(&id).unwrap_or_else(|| field.fill());
                let values = specs
                    .iter()
                    .map(|(_, b)| {
                        self.sample_value(name, field.kind(), &b.center(), method)
                            .unwrap_or(fallback)
                    })
                    .collect();
                (name.to_string(), values)
            })
            .collect();

        let first = self.cells.len();
        for (coords, bounds) in specs {
            self.cells.push(Some(Cell {
                level,
                coords,
                bounds,
                parent: Some(id),
                children: Vec::new(),
            }));
        }
        let children: Vec<CellId> = (first..self.cells.len()).collect();
        if let Some(Some(cell)) = self.cells.get_mut(id) {
            cell.children.clone_from(&children);
        }

        self.fields.remove_address(&id);
        for &child in &children {
            self.fields.insert_address(child);
        }
        for (name, values) in propagated {
            for (&child, value) in children.iter().zip(values) {
                self.fields.put(&name, child, value)?;
            }
        }
        self.leaf_count += children.len() - 1;
        self.invalidate();
        debug!(cell = id, level, leaves = self.leaf_count, "cell refined");
        Ok(children)
    }

    fn coarsen_check(&self, id: CellId) -> FieldResult<&Cell<D>> {
        let cell = self.cell(id)?;
        if cell.is_leaf() {
            return Err(FieldError::invalid_operation(format!("cell {id} is a leaf")));
        }
        if cell.parent.is_none() {
            return Err(FieldError::invalid_operation("the root cell cannot be coarsened"));
        }
        if let Some(&child) = cell
            .children
            .iter()
            .find(|&&c| self.live(c).is_some_and(|c| !c.is_leaf()))
        {
            return Err(FieldError::invalid_operation(format!(
                "child {child} of cell {id} is refined; coarsen it first"
            )));
        }
        Ok(cell)
    }

    fn coarsen(&mut self, id: CellId) -> FieldResult<()> {
        let cell = self.coarsen_check(id)?;
        let children = cell.children.clone();

        let volumes: Vec<f64> = children
            .iter()
            .map(|&c| self.live(c).map_or(0.0, |c| c.bounds.volume()))
            .collect();
        let total: f64 = volumes.iter().sum();
        #[allow(clippy::cast_precision_loss)]
        let weights: Vec<f64> = if total > 0.0 {
            volumes.iter().map(|v| v / total).collect()
        } else {
            vec![1.0 / children.len() as f64; children.len()]
        };

        let averaged: Vec<(String, FieldValue<D>)> = self
            .fields
            .iter()
            .map(|(name, field)| {
                let items: Vec<(FieldValue<D>, f64)> = children
                    .iter()
                    .zip(&weights)
                    .map(|(c, &w)| (field.get(c).unwrap_or_else(|| field.fill()), w))
                    .collect();
                let value = FieldValue::weighted_sum(&items).unwrap_or_else(|| field.fill());
                (name.to_string(), value)
            })
            .collect();

        for &child in &children {
            self.fields.remove_address(&child);
            self.cells[child] = None;
        }
        if let Some(Some(cell)) = self.cells.get_mut(id) {
            cell.children.clear();
        }
        self.fields.insert_address(id);
        for (name, value) in averaged {
            self.fields.put(&name, id, value)?;
        }
        self.leaf_count -= children.len() - 1;
        self.invalidate();
        debug!(cell = id, leaves = self.leaf_count, "cell coarsened");
        Ok(())
    }

    /// Refinement indicator of a leaf for one field.
    fn indicator(&self, name: &str, id: CellId) -> f64 {
        let Some(cell) = self.live(id) else {
            return 0.0;
        };
        let Some(value) = self.fields.value(name, &id).map(|v| v.scalar_view()) else {
            return 0.0;
        };
        match self.params.criterion {
            RefinementCriterion::Magnitude => value.abs(),
            RefinementCriterion::Gradient => {
                let center = cell.bounds.center();
                let samples: Vec<(Point<D>, f64)> = self
                    .leaves_in_region(&cell.bounds)
                    .into_iter()
                    .filter(|&n| n != id)
                    .filter_map(|n| {
                        let c = self.live(n)?.bounds.center();
                        let v = self.fields.value(name, &n)?.scalar_view();
                        Some((c, v))
                    })
                    .collect();
                if samples.is_empty() {
                    return 0.0;
                }
                match linalg::least_squares_gradient(&center, value, &samples) {
                    Ok(gradient) => gradient.norm() * cell.bounds.extent().max(),
                    Err(err) => {
                        warn!(cell = id, field = name, %err, "gradient fit failed, using neighbour differences");
                        samples.iter().map(|(_, v)| (v - value).abs()).fold(0.0, f64::max)
                    }
                }
            }
        }
    }

    pub(crate) fn decode(bytes: &[u8], mut params: AdaptiveTreeParams) -> FieldResult<Self> {
        let Decoded {
            header,
            fields,
            structure,
        } = codec::decode::<D>(bytes, MeshType::tree_for_dimension(D))?;
        let Structure::Tree { max_depth, slots } = structure else {
            return Err(CodecError::invalid("expected a tree structure").into());
        };
        let max_depth = max_depth as usize;
        let count = slots.len();
        let mut table: Vec<Option<(Option<CellId>, Vec<CellId>)>> = Vec::with_capacity(count);
        for slot in slots {
            let Some(slot) = slot else {
                table.push(None);
                continue;
            };
            if !slot.children.is_empty() && slot.children.len() != 1 << D {
                return Err(CodecError::invalid(format!("cell with {} children", slot.children.len())).into());
            }
            let parent = slot.parent.map(|p| to_id(p, count)).transpose()?;
            let children = slot
                .children
                .into_iter()
                .map(|c| to_id(c, count))
                .collect::<Result<Vec<_>, _>>()?;
            table.push(Some((parent, children)));
        }

        params.partitioning = header.partitioning;
        let mut tree = Self::with_params(header.bounds, max_depth, params)
            .map_err(|e| CodecError::invalid(e.to_string()))?;
        tree.cells = rebuild_arena(&tree, &table)?;
        tree.leaf_count = leaf_ids(&tree.cells).count();
        if tree.leaf_count as u64 != header.address_count {
            return Err(CodecError::invalid(format!(
                "header declares {} leaves, tree has {}",
                header.address_count, tree.leaf_count
            ))
            .into());
        }
        let order = tree.ordered_cells();
        tree.fields = codec::assign_fields(fields, &order)?;
        Ok(tree)
    }
}

fn to_id(raw: u64, slots: usize) -> Result<CellId, CodecError> {
    usize::try_from(raw)
        .ok()
        .filter(|&id| id < slots)
        .ok_or_else(|| CodecError::invalid(format!("cell id {raw} out of range")))
}

type SlotTable = [Option<(Option<CellId>, Vec<CellId>)>];

/// Rebuilds cells from the adjacency table, deriving levels, lattice
/// positions and bounds from the root down.
fn rebuild_arena<const D: usize>(
    tree: &AdaptiveTree<D>,
    table: &SlotTable,
) -> Result<Vec<Option<Cell<D>>>, CodecError> {
    match table.first() {
        Some(Some((None, _))) => {}
        _ => return Err(CodecError::invalid("slot 0 must hold the root")),
    }

    let mut cells: Vec<Option<Cell<D>>> = vec![None; table.len()];
    cells[ROOT] = Some(Cell {
        level: 0,
        coords: [0; D],
        bounds: tree.bounds,
        parent: None,
        children: Vec::new(),
    });
    let mut visited = 1usize;
    let mut stack = vec![ROOT];
    while let Some(id) = stack.pop() {
        let Some((_, children)) = &table[id] else {
            return Err(CodecError::invalid(format!("cell {id} missing")));
        };
        let (level, coords) = match &cells[id] {
            Some(cell) => (cell.level, cell.coords),
            None => return Err(CodecError::invalid(format!("cell {id} unreachable"))),
        };
        if !children.is_empty() && level >= tree.max_depth {
            return Err(CodecError::invalid(format!("cell {id} refined past max depth")));
        }
        for (k, &child) in children.iter().enumerate() {
            match &table[child] {
                Some((Some(parent), _)) if *parent == id => {}
                _ => return Err(CodecError::invalid(format!("child {child} does not name parent {id}"))),
            }
            if cells[child].is_some() {
                return Err(CodecError::invalid(format!("cell {child} reached twice")));
            }
            let mut child_coords = coords;
            for (axis, c) in child_coords.iter_mut().enumerate() {
                *c = *c * 2 + u32::from(k & (1 << axis) != 0);
            }
            cells[child] = Some(Cell {
                level: level + 1,
                coords: child_coords,
                bounds: tree.bounds_at(level + 1, child_coords),
                parent: Some(id),
                children: Vec::new(),
            });
            visited += 1;
            stack.push(child);
        }
        if let Some(cell) = cells[id].as_mut() {
            cell.children.clone_from(children);
        }
    }

    let present = table.iter().filter(|slot| slot.is_some()).count();
    if visited != present {
        return Err(CodecError::invalid(format!(
            "{} cells are not reachable from the root",
            present - visited
        )));
    }
    Ok(cells)
}

impl<const D: usize> BackgroundMesh<D> for AdaptiveTree<D> {
    fn mesh_type(&self) -> MeshType {
        MeshType::tree_for_dimension(D)
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
            mesh_type: self.mesh_type(),
            partitioning: self.params.partitioning,
            bounds: self.bounds,
            address_count: self.leaf_count as u64,
        };
        let slots = self
            .cells
            .iter()
            .map(|slot| {
                slot.as_ref().map(|cell| TreeSlot {
                    parent: cell.parent.map(|p| p as u64),
                    children: cell.children.iter().map(|&c| c as u64).collect(),
                })
            })
            .collect();
        let structure = Structure::Tree {
            max_depth: self.max_depth,
            slots,
        };
        codec::encode(&header, &self.fields, &order, structure)
    }

    fn deserialize(&mut self, bytes: &[u8]) -> FieldResult<()> {
        *self = Self::decode(bytes, self.params.clone())?;
        Ok(())
    }

    fn memory_usage(&self) -> usize {
        let arena = self.cells.capacity() * size_of::<Option<Cell<D>>>();
        let children: usize = self
            .cells
            .iter()
            .flatten()
            .map(|c| c.children.capacity() * size_of::<CellId>())
            .sum();
        size_of::<Self>()
            + arena
            + children
            + self.fields.memory_usage()
            + self.leaves.get().map_or(0, |l| l.capacity() * size_of::<CellId>())
    }

    fn optimize(&mut self) {
        self.fields.shrink_to_fit();
        self.cells.shrink_to_fit();
        self.leaves.get_or_init(|| self.curve_order());
    }
}

impl<const D: usize> CellBasedMesh<D> for AdaptiveTree<D> {
    fn cell_count(&self) -> usize {
        self.leaf_count
    }

    fn max_depth(&self) -> usize {
        self.max_depth as usize
    }

    fn partitioning_strategy(&self) -> PartitioningStrategy {
        self.params.partitioning
    }

    fn ordered_cells(&self) -> Vec<CellId> {
        self.leaves.get_or_init(|| self.curve_order()).clone()
    }

    fn find_cells_in_region(&self, region: &BoundingBox<D>) -> Vec<CellId> {
        self.leaves_in_region(region)
    }

    fn find_nearest_cells(&self, point: &Point<D>, k: usize) -> Vec<CellId> {
        let candidates = leaf_ids(&self.cells)
            .filter_map(|id| self.live(id).map(|c| (id, c.bounds.center())));
        query::k_nearest(candidates, point, k)
    }

    fn cell_bounds(&self, id: CellId) -> FieldResult<BoundingBox<D>> {
        self.cell(id).map(|c| c.bounds)
    }

    fn cell_level(&self, id: CellId) -> FieldResult<usize> {
        self.cell(id).map(|c| c.level as usize)
    }

    fn set_scalar_field(&mut self, name: &str, id: CellId, value: f64) -> FieldResult<()> {
        self.set_leaf(name, id, value)
    }

    fn get_scalar_field(&self, name: &str, id: CellId) -> Option<f64> {
        self.fields.get(name, &id)
    }

    fn set_vector_field(&mut self, name: &str, id: CellId, value: Vector<D>) -> FieldResult<()> {
        self.set_leaf(name, id, value)
    }

    fn get_vector_field(&self, name: &str, id: CellId) -> Option<Vector<D>> {
        self.fields.get(name, &id)
    }

    fn set_tensor_field(&mut self, name: &str, id: CellId, value: Tensor<D>) -> FieldResult<()> {
        self.set_leaf(name, id, TensorValue(value))
    }

    fn get_tensor_field(&self, name: &str, id: CellId) -> Option<Tensor<D>> {
        self.fields.get::<TensorValue<D>>(name, &id).map(|t| t.0)
    }

    fn clear_cache(&mut self) {
        self.invalidate();
    }
}

impl<const D: usize> AdaptiveMesh<D> for AdaptiveTree<D> {
    fn refine_cell(&mut self, id: CellId) -> FieldResult<Vec<CellId>> {
        self.refine(id)
    }

    fn refine_region(&mut self, region: &BoundingBox<D>, max_level: usize) -> FieldResult<usize> {
        let cap = max_level.min(self.max_depth as usize);
        let mut refined = 0;
        loop {
            let candidates: Vec<CellId> = self
                .leaves_in_region(region)
                .into_iter()
                .filter(|&id| self.live(id).is_some_and(|c| (c.level as usize) < cap))
                .collect();
            if candidates.is_empty() {
                break;
            }
            for id in candidates {
                self.refine(id)?;
                refined += 1;
            }
        }
        Ok(refined)
    }

    fn coarsen_cell(&mut self, id: CellId) -> FieldResult<()> {
        self.coarsen(id)
    }

    fn adapt_to_field(&mut self, name: &str, threshold: f64, max_level: usize) -> FieldResult<usize> {
        if !threshold.is_finite() {
            return Err(FieldError::invalid_argument(format!(
                "threshold must be finite, got {threshold}"
            )));
        }
        if !self.fields.contains(name) {
            return Err(FieldError::out_of_range(format!("field '{name}' not found")));
        }

        let cap = max_level.min(self.max_depth as usize);
        let mut refined = 0;
        let mut pass = 0;
        loop {
            let candidates: Vec<CellId> = leaf_ids(&self.cells)
                .filter(|&id| self.live(id).is_some_and(|c| (c.level as usize) < cap))
                .filter(|&id| self.indicator(name, id) > threshold)
                .collect();
            if candidates.is_empty() {
                break;
            }
            pass += 1;
            for &id in &candidates {
                self.refine(id)?;
            }
            refined += candidates.len();
            info!(
                field = name,
                pass,
                refined = candidates.len(),
                leaves = self.leaf_count,
                "adaptation pass complete"
            );
        }
        Ok(refined)
    }

    fn can_refine_cell(&self, id: CellId) -> bool {
        self.live(id)
            .is_some_and(|c| c.is_leaf() && c.level < self.max_depth)
    }

    fn can_coarsen_cell(&self, id: CellId) -> bool {
        self.coarsen_check(id).is_ok()
    }

    fn get_children(&self, id: CellId) -> Vec<CellId> {
        self.live(id).map(|c| c.children.clone()).unwrap_or_default()
    }

    fn get_parent(&self, id: CellId) -> Option<CellId> {
        self.live(id)?.parent
    }

    fn is_leaf(&self, id: CellId) -> bool {
        self.live(id).is_some_and(Cell::is_leaf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use field_types::{Point2, Point3};

    fn unit_tree(max_depth: usize) -> AdaptiveTree<2> {
        AdaptiveTree::new(
            BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)),
            max_depth,
        )
        .unwrap()
    }

    fn uniform(level: usize) -> AdaptiveTree<2> {
        let mut tree = unit_tree(4);
        let all = tree.bounding_box();
        tree.refine_region(&all, level).unwrap();
        tree
    }

    fn f(p: &Point2) -> f64 {
        3.0 * p.x - 2.0 * p.y + 1.0
    }

    fn fill_linear(tree: &mut AdaptiveTree<2>) {
        for id in tree.ordered_cells() {
            let c = tree.cell_center(id).unwrap();
            tree.set_scalar_field("f", id, f(&c)).unwrap();
        }
    }

    #[test]
    fn refine_root_scenario() {
        let mut tree = unit_tree(4);
        let root = tree.root();
        let children = tree.refine_cell(root).unwrap();
        assert_eq!(tree.cell_count(), 4);
        assert_eq!(children.len(), 4);
        for &child in &children {
            assert_eq!(tree.get_parent(child), Some(root));
            assert_eq!(tree.cell_level(child).unwrap(), 1);
            assert!(tree.is_leaf(child));
        }
        assert!(!tree.is_leaf(root));
        assert_eq!(tree.get_children(root), children);
        assert_eq!(*tree.cell_bounds(children[3]).unwrap().min(), Point2::new(0.5, 0.5));
        assert_eq!(tree.mesh_type(), MeshType::QuadTree);
    }

    #[test]
    fn refine_preconditions() {
        let mut tree = unit_tree(1);
        let root = tree.root();
        let children = tree.refine_cell(root).unwrap();
        assert!(matches!(
            tree.refine_cell(root),
            Err(FieldError::InvalidOperation { .. })
        ));
        assert!(!tree.can_refine_cell(children[0]));
        assert!(matches!(
            tree.refine_cell(children[0]),
            Err(FieldError::InvalidOperation { .. })
        ));
        assert!(matches!(tree.refine_cell(99), Err(FieldError::OutOfRange { .. })));
    }

    #[test]
    fn refine_propagates_linear_fields_exactly() {
        let mut tree = uniform(2);
        fill_linear(&mut tree);
        let target = tree.find_cells_in_region(&BoundingBox::from_point(Point2::new(0.3, 0.6)))[0];
        let children = tree.refine_cell(target).unwrap();
        for child in children {
            let c = tree.cell_center(child).unwrap();
            assert_relative_eq!(tree.get_scalar_field("f", child).unwrap(), f(&c), epsilon = 1e-12);
        }
        assert_eq!(tree.get_scalar_field("f", target), None);
    }

    #[test]
    fn coarsen_averages_children() {
        let mut tree = unit_tree(3);
        let root = tree.root();
        let children = tree.refine_cell(root).unwrap();
        let grandchildren = tree.refine_cell(children[1]).unwrap();
        for &g in &grandchildren {
            tree.set_scalar_field("v", g, 4.0).unwrap();
        }
        tree.set_vector_field("w", grandchildren[0], Vector::<2>::new(4.0, 0.0)).unwrap();
        assert_eq!(tree.cell_count(), 7);

        assert!(tree.can_coarsen_cell(children[1]));
        tree.coarsen_cell(children[1]).unwrap();
        assert_eq!(tree.cell_count(), 4);
        assert!(tree.is_leaf(children[1]));
        assert_relative_eq!(tree.get_scalar_field("v", children[1]).unwrap(), 4.0);
        assert_eq!(tree.get_vector_field("w", children[1]), Some(Vector::<2>::new(1.0, 0.0)));
        for g in grandchildren {
            assert!(tree.cell_bounds(g).is_err());
            assert_eq!(tree.get_parent(g), None);
        }
    }

    #[test]
    fn coarsen_preconditions() {
        let mut tree = unit_tree(3);
        let root = tree.root();
        let children = tree.refine_cell(root).unwrap();
        tree.refine_cell(children[0]).unwrap();

        assert!(matches!(tree.coarsen_cell(root), Err(FieldError::InvalidOperation { .. })));
        assert!(matches!(
            tree.coarsen_cell(children[2]),
            Err(FieldError::InvalidOperation { .. })
        ));
        assert!(!tree.can_coarsen_cell(root));
        assert!(!tree.can_coarsen_cell(1234));
        assert_eq!(tree.cell_count(), 7);
    }

    #[test]
    fn ids_are_not_reused() {
        let mut tree = unit_tree(3);
        let root = tree.root();
        let children = tree.refine_cell(root).unwrap();
        let first = tree.refine_cell(children[0]).unwrap();
        tree.coarsen_cell(children[0]).unwrap();
        let second = tree.refine_cell(children[0]).unwrap();
        assert!(first.iter().all(|id| !second.contains(id)));
    }

    #[test]
    fn interior_cells_hold_no_values() {
        let mut tree = unit_tree(2);
        let root = tree.root();
        tree.refine_cell(root).unwrap();
        assert!(matches!(
            tree.set_scalar_field("h", root, 1.0),
            Err(FieldError::InvalidOperation { .. })
        ));
        assert_eq!(tree.get_scalar_field("h", root), None);
    }

    #[test]
    fn nearest_uses_closest_leaf_center() {
        let mut tree = unit_tree(3);
        let root = tree.root();
        let children = tree.refine_cell(root).unwrap();
        let small = tree.refine_cell(children[1]).unwrap();
        for (i, id) in tree.ordered_cells().into_iter().enumerate() {
            tree.set_scalar_field("id", id, i as f64).unwrap();
        }
        // Inside the large lower-left leaf but closer to a small leaf center.
        let p = Point2::new(0.49, 0.2);
        let nearest = tree.find_nearest_cells(&p, 1)[0];
        assert!(small.contains(&nearest));
        let v = tree.interpolate_scalar_field("id", &p, InterpolationMethod::Nearest).unwrap();
        assert_eq!(Some(v), tree.get_scalar_field("id", nearest));
    }

    #[test]
    fn linear_reads_coarse_and_refined_neighbours() {
        let mut tree = uniform(1);
        let cells = tree.ordered_cells();
        for &id in &cells {
            tree.set_scalar_field("c", id, 2.0).unwrap();
        }
        tree.refine_cell(cells[1]).unwrap();
        let v = tree
            .interpolate_scalar_field("c", &Point2::new(0.5, 0.5), InterpolationMethod::Linear)
            .unwrap();
        assert_relative_eq!(v, 2.0, epsilon = 1e-12);

        let s = tree
            .sample_scalar_field("c", &Point2::new(0.3, 0.3), InterpolationMethod::Cubic)
            .unwrap();
        assert_eq!(s.method, InterpolationMethod::Linear);
    }

    #[test]
    fn cubic_on_regular_neighbourhood() {
        let mut tree = uniform(3);
        fill_linear(&mut tree);
        let p = Point2::new(0.45, 0.52);
        let s = tree.sample_scalar_field("f", &p, InterpolationMethod::Cubic).unwrap();
        assert_eq!(s.method, InterpolationMethod::Cubic);
        assert_relative_eq!(s.value, f(&p), epsilon = 1e-10);
    }

    #[test]
    fn region_query_returns_leaves() {
        let tree = uniform(2);
        let region = BoundingBox::new(Point2::new(0.1, 0.1), Point2::new(0.2, 0.2));
        let found = tree.find_cells_in_region(&region);
        assert_eq!(found.len(), 1);
        assert!(tree.is_leaf(found[0]));
        assert_eq!(tree.find_cells_in_region(&tree.bounding_box()).len(), 16);
    }

    #[test]
    fn adapt_on_magnitude() {
        let mut tree = AdaptiveTree::with_params(
            BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)),
            5,
            AdaptiveTreeParams::magnitude_driven().with_refine_method(InterpolationMethod::Nearest),
        )
        .unwrap();
        let root = tree.root();
        let children = tree.refine_cell(root).unwrap();
        for &c in &children {
            tree.set_scalar_field("e", c, 0.0).unwrap();
        }
        tree.set_scalar_field("e", children[1], 10.0).unwrap();

        let refined = tree.adapt_to_field("e", 5.0, 3).unwrap();
        assert_eq!(refined, 5);
        assert_eq!(tree.cell_count(), 19);
        assert!(tree
            .ordered_cells()
            .iter()
            .all(|&id| tree.cell_level(id).unwrap() <= 3));
    }

    #[test]
    fn adapt_on_gradient() {
        let mut tree = uniform(2);
        for id in tree.ordered_cells() {
            let c = tree.cell_center(id).unwrap();
            tree.set_scalar_field("x", id, c.x).unwrap();
        }
        let mut quiet = tree.clone();
        assert_eq!(quiet.adapt_to_field("x", 0.3, 3).unwrap(), 0);
        assert_eq!(tree.adapt_to_field("x", 0.2, 3).unwrap(), 16);
        assert_eq!(tree.cell_count(), 64);
    }

    #[test]
    fn adapt_rejects_bad_input() {
        let mut tree = unit_tree(2);
        assert!(matches!(
            tree.adapt_to_field("nope", 1.0, 2),
            Err(FieldError::OutOfRange { .. })
        ));
        tree.set_scalar_field("h", tree.root(), 1.0).unwrap();
        assert!(matches!(
            tree.adapt_to_field("h", f64::NAN, 2),
            Err(FieldError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn construction_limits() {
        let bounds = BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0));
        assert!(AdaptiveTree::new(bounds, MAX_TREE_DEPTH).is_ok());
        assert!(AdaptiveTree::new(bounds, MAX_TREE_DEPTH + 1).is_err());
        let flat = BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(0.0, 1.0));
        assert!(AdaptiveTree::new(flat, 2).is_err());
    }

    #[test]
    fn octree_serialize_round_trip() {
        let mut tree = AdaptiveTree::with_params(
            BoundingBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 2.0, 2.0)),
            3,
            AdaptiveTreeParams::hilbert_ordered(),
        )
        .unwrap();
        let root = tree.root();
        let children = tree.refine_cell(root).unwrap();
        let deeper = tree.refine_cell(children[5]).unwrap();
        tree.refine_cell(deeper[2]).unwrap();
        tree.coarsen_cell(deeper[2]).unwrap();
        for (i, id) in tree.ordered_cells().into_iter().enumerate() {
            tree.set_scalar_field("s", id, i as f64).unwrap();
            tree.set_tensor_field("t", id, Tensor::<3>::identity() * i as f64).unwrap();
        }

        let bytes = tree.serialize().unwrap();
        let restored = AdaptiveTree::<3>::decode(&bytes, AdaptiveTreeParams::default()).unwrap();
        assert_eq!(restored.mesh_type(), MeshType::OctTree);
        assert_eq!(restored.cell_count(), tree.cell_count());
        assert_eq!(restored.ordered_cells(), tree.ordered_cells());
        for id in tree.ordered_cells() {
            assert_eq!(restored.get_scalar_field("s", id), tree.get_scalar_field("s", id));
            assert_eq!(restored.get_tensor_field("t", id), tree.get_tensor_field("t", id));
            assert_eq!(restored.get_parent(id), tree.get_parent(id));
            assert_eq!(restored.cell_bounds(id).unwrap(), tree.cell_bounds(id).unwrap());
        }
    }

    #[test]
    fn decode_rejects_mismatched_kind() {
        let tree = unit_tree(2);
        let bytes = tree.serialize().unwrap();
        assert!(matches!(
            AdaptiveTree::<3>::decode(&bytes, AdaptiveTreeParams::default()),
            Err(FieldError::Serialization(_))
        ));
    }

    #[test]
    fn decode_checks_the_slot_table() {
        let tree = unit_tree(2);
        let header = Header {
            mesh_type: MeshType::QuadTree,
            partitioning: PartitioningStrategy::None,
            bounds: tree.bounding_box(),
            address_count: 4,
        };
        let encode = |slots: Vec<Option<TreeSlot>>| {
            let structure = Structure::Tree { max_depth: 2, slots };
            codec::encode(&header, &tree.fields, &[], structure).unwrap()
        };
        let root = |children: Vec<u64>| Some(TreeSlot { parent: None, children });
        let leaf = |parent: u64| Some(TreeSlot { parent: Some(parent), children: Vec::new() });

        let good = encode(vec![root(vec![1, 2, 3, 4]), leaf(0), leaf(0), leaf(0), leaf(0)]);
        assert_eq!(AdaptiveTree::<2>::decode(&good, AdaptiveTreeParams::default()).unwrap().cell_count(), 4);

        let partial = encode(vec![root(vec![1, 2]), leaf(0), leaf(0)]);
        let wrong_parent = encode(vec![root(vec![1, 2, 3, 4]), leaf(0), leaf(2), leaf(0), leaf(0)]);
        let dangling = encode(vec![root(vec![1, 2, 3, 9]), leaf(0), leaf(0), leaf(0), leaf(0)]);
        for bytes in [partial, wrong_parent, dangling] {
            assert!(matches!(
                AdaptiveTree::<2>::decode(&bytes, AdaptiveTreeParams::default()),
                Err(FieldError::Serialization(_))
            ));
        }
    }

    #[test]
    fn leaf_orders_are_permutations() {
        for strategy in [PartitioningStrategy::Morton, PartitioningStrategy::Hilbert] {
            let mut tree = AdaptiveTree::with_params(
                BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)),
                4,
                AdaptiveTreeParams::default().with_partitioning(strategy),
            )
            .unwrap();
            let root = tree.root();
            let children = tree.refine_cell(root).unwrap();
            tree.refine_cell(children[2]).unwrap();
            let mut order = tree.ordered_cells();
            assert_eq!(order.len(), 7);
            order.sort_unstable();
            let mut leaves: Vec<_> = leaf_ids(&tree.cells).collect();
            leaves.sort_unstable();
            assert_eq!(order, leaves);
        }
    }
}
