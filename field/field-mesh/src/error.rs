//! Error types for field mesh operations.
//!
//! Expected outcomes of a well-formed query (point outside the mesh, absent
//! field) are reported as `None` by the query itself. The variants here cover
//! violated preconditions, which abort only the offending call and leave the
//! mesh as it was.

use std::path::PathBuf;

use field_types::{FieldKind, GeometryError};
use thiserror::Error;

use crate::codec::CodecError;

/// Result type for field mesh operations.
pub type FieldResult<T> = Result<T, FieldError>;

/// Errors that can occur during field mesh operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FieldError {
    /// Malformed construction or call parameter.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the argument.
        message: String,
    },

    /// An address or name that must exist does not.
    #[error("out of range: {message}")]
    OutOfRange {
        /// Which address or name was missing.
        message: String,
    },

    /// A structural mutation whose preconditions do not hold.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation was refused.
        message: String,
    },

    /// A field exists under the name but holds a different kind of value.
    #[error("field '{name}' holds {found} values, not {expected}")]
    KindMismatch {
        /// Field name.
        name: String,
        /// Kind requested by the caller.
        expected: FieldKind,
        /// Kind stored in the mesh.
        found: FieldKind,
    },

    /// A small linear system had no unique solution.
    #[error("singular system: {message}")]
    Singular {
        /// Which system was degenerate.
        message: String,
    },

    /// Encoded mesh data could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),

    /// Bounding box construction failed.
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// File not found.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    /// I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FieldError {
    /// Create an `InvalidArgument` error with the given message.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an `OutOfRange` error with the given message.
    #[must_use]
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    /// Create an `InvalidOperation` error with the given message.
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create a `Singular` error with the given message.
    #[must_use]
    pub fn singular(message: impl Into<String>) -> Self {
        Self::Singular {
            message: message.into(),
        }
    }
}
