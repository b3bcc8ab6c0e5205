//! Nearest-cell selection shared by the cell-based backends.

use std::cmp::Ordering;

use field_types::{Point, PointExt};

use crate::traits::CellId;

fn by_distance_then_id(a: &(f64, CellId), b: &(f64, CellId)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

/// The `k` candidates whose centers are closest to `point`, nearest first,
/// ties broken by ascending id.
pub(crate) fn k_nearest<const D: usize>(
    candidates: impl IntoIterator<Item = (CellId, Point<D>)>,
    point: &Point<D>,
    k: usize,
) -> Vec<CellId> {
    if k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(f64, CellId)> = candidates
        .into_iter()
        .map(|(id, center)| (center.squared_distance_to(point), id))
        .collect();

    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, by_distance_then_id);
        scored.truncate(k);
    }
    scored.sort_unstable_by(by_distance_then_id);
    scored.into_iter().map(|(_, id)| id).collect()
}

/// The candidate closest to `point`, ties broken by ascending id.
pub(crate) fn nearest<const D: usize>(
    candidates: impl IntoIterator<Item = (CellId, Point<D>)>,
    point: &Point<D>,
) -> Option<CellId> {
    candidates
        .into_iter()
        .map(|(id, center)| (center.squared_distance_to(point), id))
        .min_by(by_distance_then_id)
        .map(|(_, id)| id)
}
