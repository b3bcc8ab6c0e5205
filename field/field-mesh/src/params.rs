//! Construction parameters for the mesh backends.

use field_types::{InterpolationMethod, PartitioningStrategy};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What a structured grid does with a point outside its bounding box when
/// converting it to a grid index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OutOfBoundsPolicy {
    /// Fail with [`FieldError::OutOfRange`](crate::FieldError::OutOfRange).
    #[default]
    Fail,
    /// Clamp the point into the grid.
    Clamp,
}

/// Indicator used by [`AdaptiveMesh::adapt_to_field`](crate::AdaptiveMesh::adapt_to_field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RefinementCriterion {
    /// Estimated change of the field across the cell: the least-squares
    /// gradient norm times the largest cell extent.
    #[default]
    Gradient,
    /// Norm of the field value in the cell.
    Magnitude,
}

/// Parameters for [`CartesianGrid`](crate::CartesianGrid).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CartesianGridParams {
    /// Handling of out-of-bounds points in `point_to_grid_index`.
    /// Default: [`OutOfBoundsPolicy::Fail`]
    pub out_of_bounds: OutOfBoundsPolicy,

    /// Cell enumeration order. Default: [`PartitioningStrategy::None`]
    pub partitioning: PartitioningStrategy,
}

impl CartesianGridParams {
    /// Params that clamp out-of-bounds points instead of failing.
    #[must_use]
    pub fn clamping() -> Self {
        Self {
            out_of_bounds: OutOfBoundsPolicy::Clamp,
            ..Default::default()
        }
    }

    /// Set the out-of-bounds policy.
    #[must_use]
    pub const fn with_out_of_bounds(mut self, policy: OutOfBoundsPolicy) -> Self {
        self.out_of_bounds = policy;
        self
    }

    /// Set the partitioning strategy.
    #[must_use]
    pub const fn with_partitioning(mut self, strategy: PartitioningStrategy) -> Self {
        self.partitioning = strategy;
        self
    }
}

/// Parameters for [`AdaptiveTree`](crate::AdaptiveTree).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdaptiveTreeParams {
    /// Method used to carry field values from a parent to its new children.
    /// Default: [`InterpolationMethod::Linear`]
    pub refine_method: InterpolationMethod,

    /// Indicator compared against the threshold in `adapt_to_field`.
    /// Default: [`RefinementCriterion::Gradient`]
    pub criterion: RefinementCriterion,

    /// Leaf enumeration order. Default: [`PartitioningStrategy::None`]
    pub partitioning: PartitioningStrategy,
}

impl Default for AdaptiveTreeParams {
    fn default() -> Self {
        Self {
            refine_method: InterpolationMethod::Linear,
            criterion: RefinementCriterion::Gradient,
            partitioning: PartitioningStrategy::None,
        }
    }
}

impl AdaptiveTreeParams {
    /// Params that refine on field magnitude rather than gradient.
    #[must_use]
    pub fn magnitude_driven() -> Self {
        Self {
            criterion: RefinementCriterion::Magnitude,
            ..Default::default()
        }
    }

    /// Params that keep leaves in Hilbert order for locality.
    #[must_use]
    pub fn hilbert_ordered() -> Self {
        Self {
            partitioning: PartitioningStrategy::Hilbert,
            ..Default::default()
        }
    }

    /// Set the method used to propagate values on refinement.
    #[must_use]
    pub const fn with_refine_method(mut self, method: InterpolationMethod) -> Self {
        self.refine_method = method;
        self
    }

    /// Set the refinement criterion.
    #[must_use]
    pub const fn with_criterion(mut self, criterion: RefinementCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set the partitioning strategy.
    #[must_use]
    pub const fn with_partitioning(mut self, strategy: PartitioningStrategy) -> Self {
        self.partitioning = strategy;
        self
    }
}

/// Parameters for [`SparseGrid`](crate::SparseGrid).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SparseGridParams {
    /// Value implied at inactive voxels. Default: 0.0
    pub background: f64,

    /// Name of the scalar field read and written by `set_value`,
    /// `get_value` and boolean composition. Default: `"value"`
    pub value_field: String,
}

impl Default for SparseGridParams {
    fn default() -> Self {
        Self {
            background: 0.0,
            value_field: "value".to_string(),
        }
    }
}

impl SparseGridParams {
    /// Params for a narrow-band level set: inactive voxels read as
    /// `half_width` (outside the surface).
    #[must_use]
    pub fn level_set(half_width: f64) -> Self {
        Self {
            background: half_width.abs(),
            ..Default::default()
        }
    }

    /// Set the background value.
    #[must_use]
    pub const fn with_background(mut self, background: f64) -> Self {
        self.background = background;
        self
    }

    /// Set the name of the level-set field.
    #[must_use]
    pub fn with_value_field(mut self, name: impl Into<String>) -> Self {
        self.value_field = name.into();
        self
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let grid = CartesianGridParams::default();
        assert_eq!(grid.out_of_bounds, OutOfBoundsPolicy::Fail);
        assert_eq!(grid.partitioning, PartitioningStrategy::None);

        let tree = AdaptiveTreeParams::default();
        assert_eq!(tree.refine_method, InterpolationMethod::Linear);
        assert_eq!(tree.criterion, RefinementCriterion::Gradient);

        let sparse = SparseGridParams::default();
        assert_eq!(sparse.background, 0.0);
        assert_eq!(sparse.value_field, "value");
    }

    #[test]
    fn test_presets() {
        assert_eq!(CartesianGridParams::clamping().out_of_bounds, OutOfBoundsPolicy::Clamp);
        assert_eq!(
            AdaptiveTreeParams::magnitude_driven().criterion,
            RefinementCriterion::Magnitude
        );
        assert_eq!(
            AdaptiveTreeParams::hilbert_ordered().partitioning,
            PartitioningStrategy::Hilbert
        );
        assert_eq!(SparseGridParams::level_set(-3.0).background, 3.0);
    }

    #[test]
    fn test_builder() {
        let params = AdaptiveTreeParams::default()
            .with_refine_method(InterpolationMethod::Nearest)
            .with_criterion(RefinementCriterion::Magnitude)
            .with_partitioning(PartitioningStrategy::Morton);
        assert_eq!(params.refine_method, InterpolationMethod::Nearest);
        assert_eq!(params.criterion, RefinementCriterion::Magnitude);
        assert_eq!(params.partitioning, PartitioningStrategy::Morton);

        let sparse = SparseGridParams::default()
            .with_background(2.5)
            .with_value_field("sdf");
        assert_eq!(sparse.background, 2.5);
        assert_eq!(sparse.value_field, "sdf");
    }
}
