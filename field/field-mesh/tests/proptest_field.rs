//! Property-based tests for the field mesh backends.
//!
//! Run with: cargo test -p field-mesh --test proptest_field

#![allow(clippy::unwrap_used, clippy::float_cmp)]

use field_mesh::{
    AdaptiveMesh, AdaptiveTree, AdaptiveTreeParams, BackgroundMesh, BoundingBox, CartesianGrid, CartesianGridParams,
    CellBasedMesh, InterpolationMethod, PartitioningStrategy, Point2, Point3, SparseCoord, SparseGrid,
    SparseGridMesh, SparseGridParams, StructuredMesh,
};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_strategy() -> impl Strategy<Value = PartitioningStrategy> {
    prop_oneof![
        Just(PartitioningStrategy::None),
        Just(PartitioningStrategy::Morton),
        Just(PartitioningStrategy::Hilbert),
    ]
}

/// Voxels with level-set-like values in a small window around the origin.
fn arb_voxels() -> impl Strategy<Value = Vec<([i32; 2], f64)>> {
    prop::collection::vec((prop::array::uniform2(-6..6i32), -2.0..2.0f64), 0..40)
}

fn sparse_from(voxels: &[([i32; 2], f64)]) -> SparseGrid<2> {
    sparse_with(voxels, 2.5)
}

fn sparse_with(voxels: &[([i32; 2], f64)], background: f64) -> SparseGrid<2> {
    let mut grid = SparseGrid::with_params(
        BoundingBox::new(Point2::new(-4.0, -4.0), Point2::new(4.0, 4.0)),
        0.5,
        SparseGridParams::level_set(background),
    )
    .unwrap();
    for &(coord, value) in voxels {
        grid.set_value(SparseCoord::new(coord), value);
    }
    grid
}

/// Backgrounds of either sign, including the plain default of zero.
fn arb_background() -> impl Strategy<Value = f64> {
    prop_oneof![Just(0.0), Just(2.5), -3.0..3.0f64]
}

/// Every coordinate active in either grid.
fn combined_coordinates(a: &SparseGrid<2>, b: &SparseGrid<2>) -> Vec<SparseCoord<2>> {
    let mut coords = a.active_coordinates();
    coords.extend(b.active_coordinates());
    coords.sort_unstable();
    coords.dedup();
    coords
}

fn snapshot(grid: &SparseGrid<2>) -> Vec<(SparseCoord<2>, Option<f64>)> {
    grid.active_coordinates()
        .into_iter()
        .map(|c| (c, grid.get_value(c)))
        .collect()
}

fn unit_tree() -> AdaptiveTree<2> {
    AdaptiveTree::new(BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)), 6).unwrap()
}

/// Refines leaves picked by `choices` (taken modulo the current leaf count).
fn grow(tree: &mut AdaptiveTree<2>, choices: &[usize]) {
    for &pick in choices {
        let leaves: Vec<_> = tree
            .ordered_cells()
            .into_iter()
            .filter(|&id| tree.can_refine_cell(id))
            .collect();
        if leaves.is_empty() {
            return;
        }
        tree.refine_cell(leaves[pick % leaves.len()]).unwrap();
    }
}

// =============================================================================
// Property Tests: Structured grids
// =============================================================================

proptest! {
    /// Grid index and linear index are inverse bijections.
    #[test]
    fn grid_index_bijection(resolution in prop::array::uniform3(1usize..7)) {
        let grid = CartesianGrid::new(
            BoundingBox::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)),
            resolution,
        )
        .unwrap();
        let mut seen = vec![false; grid.cell_count()];
        for id in 0..grid.cell_count() {
            let index = grid.grid_index(id).unwrap();
            prop_assert_eq!(grid.linear_index(index).unwrap(), id);
            prop_assert!(!seen[id]);
            seen[id] = true;
        }
        prop_assert!(grid.grid_index(grid.cell_count()).is_err());
    }

    /// Structured containment matches the bounding box.
    #[test]
    fn containment_matches_bounds(x in -1.0..3.0f64, y in -1.0..3.0f64) {
        let grid = CartesianGrid::new(
            BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(2.0, 2.0)),
            [3, 5],
        )
        .unwrap();
        let p = Point2::new(x, y);
        let inside = (0.0..=2.0).contains(&x) && (0.0..=2.0).contains(&y);
        prop_assert_eq!(grid.contains_point(&p), inside);
        prop_assert_eq!(
            grid.interpolate_scalar_field("missing", &p, InterpolationMethod::Linear),
            None
        );
    }

    /// Serialization reproduces every cell value, whatever the cell order.
    #[test]
    fn cartesian_round_trip(
        resolution in prop::array::uniform2(1usize..9),
        strategy in arb_strategy(),
        seed in 0.0..10.0f64,
    ) {
        let mut grid = CartesianGrid::with_params(
            BoundingBox::new(Point2::new(-1.0, -1.0), Point2::new(1.0, 1.0)),
            resolution,
            CartesianGridParams::default().with_partitioning(strategy),
        )
        .unwrap();
        for id in 0..grid.cell_count() {
            grid.set_scalar_field("s", id, seed + id as f64).unwrap();
        }
        let mut restored = CartesianGrid::new(grid.bounding_box(), [1, 1]).unwrap();
        restored.deserialize(&grid.serialize().unwrap()).unwrap();
        prop_assert_eq!(restored.resolution(), resolution);
        prop_assert_eq!(restored.partitioning_strategy(), strategy);
        for id in 0..grid.cell_count() {
            prop_assert_eq!(restored.get_scalar_field("s", id), grid.get_scalar_field("s", id));
        }
    }
}

// =============================================================================
// Property Tests: Adaptive trees
// =============================================================================

proptest! {
    /// Refining a leaf of a linear field keeps the field exact at the new
    /// leaf centers.
    #[test]
    fn refine_preserves_linear_fields(
        a in -3.0..3.0f64,
        b in -3.0..3.0f64,
        c in -3.0..3.0f64,
        picks in prop::collection::vec(0usize..64, 1..6),
    ) {
        let f = |p: &Point2| a * p.x + b * p.y + c;
        let mut tree = unit_tree();
        let whole = tree.bounding_box();
        tree.refine_region(&whole, 2).unwrap();
        for id in tree.ordered_cells() {
            let center = tree.cell_center(id).unwrap();
            tree.set_scalar_field("f", id, f(&center)).unwrap();
        }
        for pick in picks {
            // Level-2 leaves see a regular neighbourhood, possibly with
            // refined neighbours that average back to the same plane.
            let leaves: Vec<_> = tree
                .ordered_cells()
                .into_iter()
                .filter(|&id| tree.cell_level(id).unwrap() == 2)
                .collect();
            let target = leaves[pick % leaves.len()];
            for child in tree.refine_cell(target).unwrap() {
                let center = tree.cell_center(child).unwrap();
                let value = tree.get_scalar_field("f", child).unwrap();
                prop_assert!((value - f(&center)).abs() < 1e-9);
            }
        }
    }

    /// Coarsening children that share a value restores that value.
    #[test]
    fn coarsen_of_uniform_children(value in -100.0..100.0f64, pick in 0usize..4) {
        let mut tree = unit_tree();
        let children = tree.refine_cell(tree.root()).unwrap();
        let parent = children[pick];
        for child in tree.refine_cell(parent).unwrap() {
            tree.set_scalar_field("v", child, value).unwrap();
        }
        tree.coarsen_cell(parent).unwrap();
        let restored = tree.get_scalar_field("v", parent).unwrap();
        prop_assert!((restored - value).abs() <= 1e-12 * value.abs().max(1.0));
    }

    /// Leaf count, shape and values survive serialization.
    #[test]
    fn tree_round_trip(picks in prop::collection::vec(0usize..64, 0..12), strategy in arb_strategy()) {
        let mut tree = AdaptiveTree::with_params(
            BoundingBox::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)),
            6,
            AdaptiveTreeParams::default().with_partitioning(strategy),
        )
        .unwrap();
        grow(&mut tree, &picks);
        for (i, id) in tree.ordered_cells().into_iter().enumerate() {
            tree.set_scalar_field("i", id, i as f64).unwrap();
        }

        let mut restored = unit_tree();
        restored.deserialize(&tree.serialize().unwrap()).unwrap();
        prop_assert_eq!(restored.cell_count(), tree.cell_count());
        prop_assert_eq!(restored.ordered_cells(), tree.ordered_cells());
        for id in tree.ordered_cells() {
            prop_assert_eq!(restored.get_scalar_field("i", id), tree.get_scalar_field("i", id));
            prop_assert_eq!(restored.cell_level(id).unwrap(), tree.cell_level(id).unwrap());
            prop_assert_eq!(restored.get_parent(id), tree.get_parent(id));
        }
    }

    /// Leaves tile the root: their volumes sum to the root volume.
    #[test]
    fn leaves_partition_the_root(picks in prop::collection::vec(0usize..64, 0..16)) {
        let mut tree = unit_tree();
        grow(&mut tree, &picks);
        let total: f64 = tree
            .ordered_cells()
            .into_iter()
            .map(|id| tree.cell_bounds(id).unwrap().volume())
            .sum();
        prop_assert!((total - 1.0).abs() < 1e-12);
        prop_assert_eq!(tree.cell_count(), 1 + 3 * picks.len());
    }
}

// =============================================================================
// Property Tests: Sparse composition
// =============================================================================

proptest! {
    /// Union gives the same voxels and values in either order.
    #[test]
    fn union_is_commutative(left in arb_voxels(), right in arb_voxels()) {
        let mut ab = sparse_from(&left);
        ab.union_with(&sparse_from(&right)).unwrap();
        let mut ba = sparse_from(&right);
        ba.union_with(&sparse_from(&left)).unwrap();
        prop_assert_eq!(snapshot(&ab), snapshot(&ba));
    }

    /// Union and intersection with a copy of itself change nothing.
    #[test]
    fn self_composition_is_idempotent(voxels in arb_voxels()) {
        let grid = sparse_from(&voxels);

        let mut union = grid.clone();
        union.union_with(&grid).unwrap();
        prop_assert_eq!(snapshot(&union), snapshot(&grid));

        let mut intersection = grid.clone();
        intersection.intersect_with(&grid).unwrap();
        prop_assert_eq!(snapshot(&intersection), snapshot(&grid));
    }

    /// Subtracting a copy of itself leaves nothing active.
    #[test]
    fn self_difference_is_empty(voxels in arb_voxels()) {
        let grid = sparse_from(&voxels);
        let mut diff = grid.clone();
        diff.difference_with(&grid).unwrap();
        prop_assert_eq!(diff.active_voxel_count(), 0);
        prop_assert!(diff.active_bounds().is_none());
    }

    /// Composed values follow the level-set formulas voxel by voxel, with an
    /// inactive operand reading as its background.
    #[test]
    fn composition_values_follow_level_set_formulas(
        left in arb_voxels(),
        right in arb_voxels(),
        bg_a in arb_background(),
        bg_b in arb_background(),
    ) {
        let a = sparse_with(&left, bg_a);
        let b = sparse_with(&right, bg_b);
        let va = |c| a.get_value_or_default(c, bg_a);
        let vb = |c| b.get_value_or_default(c, bg_b);
        let coords = combined_coordinates(&a, &b);

        let mut union = a.clone();
        union.union_with(&b).unwrap();
        prop_assert_eq!(union.active_coordinates(), coords.clone());
        for &c in &coords {
            prop_assert_eq!(union.get_value(c), Some(va(c).min(vb(c))));
        }

        let mut intersection = a.clone();
        intersection.intersect_with(&b).unwrap();
        for &c in &coords {
            let expected = va(c).max(vb(c));
            prop_assert_eq!(intersection.get_value_or_default(c, bg_a), expected);
            prop_assert_eq!(intersection.is_active(c), expected != bg_a);
        }
        prop_assert!(intersection.active_coordinates().iter().all(|c| coords.contains(c)));

        let mut difference = a.clone();
        difference.difference_with(&b).unwrap();
        for c in a.active_coordinates() {
            let expected = va(c).max(-vb(c));
            if b.is_active(c) && expected >= 0.0 {
                prop_assert!(!difference.is_active(c));
            } else {
                prop_assert_eq!(difference.get_value(c), Some(expected));
            }
        }
        prop_assert!(difference.active_coordinates().iter().all(|c| a.is_active(*c)));
    }

    /// Sparse grids round-trip their voxels and values.
    #[test]
    fn sparse_round_trip(voxels in arb_voxels()) {
        let grid = sparse_from(&voxels);
        let mut restored = SparseGrid::new(grid.bounding_box(), 1.0).unwrap();
        restored.deserialize(&grid.serialize().unwrap()).unwrap();
        prop_assert_eq!(snapshot(&restored), snapshot(&grid));
        prop_assert_eq!(restored.background(), grid.background());
    }
}
