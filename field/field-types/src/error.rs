//! Error types for geometric value construction.

use thiserror::Error;

/// Errors raised when constructing geometric values from raw coordinates.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum GeometryError {
    /// A box was given a minimum corner above its maximum corner.
    #[error("invalid bounds on axis {axis}: min {min} > max {max}")]
    InvalidBounds {
        /// Axis on which the ordering is violated.
        axis: usize,
        /// Minimum coordinate supplied.
        min: f64,
        /// Maximum coordinate supplied.
        max: f64,
    },

    /// A coordinate is NaN or infinite.
    #[error("non-finite coordinate on axis {axis}")]
    NonFinite {
        /// Axis holding the non-finite value.
        axis: usize,
    },
}
