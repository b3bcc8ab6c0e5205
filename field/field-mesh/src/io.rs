//! Durable file persistence.
//!
//! Writes go to a temporary file in the target directory which is flushed,
//! synced and then renamed over the target, so a failed save leaves any
//! existing file intact.

use std::fs;
use std::io::Write;
use std::path::Path;

use field_types::MeshType;
use tempfile::NamedTempFile;
use tracing::info;

use crate::codec::{self, CodecError};
use crate::error::{FieldError, FieldResult};
use crate::factory::AnyMesh;
use crate::params::{AdaptiveTreeParams, CartesianGridParams, SparseGridParams};
use crate::{AdaptiveTree, CartesianGrid, SparseGrid};

/// Writes `bytes` to `path` through a temporary file and an atomic rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> FieldResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| FieldError::Io(e.error))?;
    info!(path = %path.display(), bytes = bytes.len(), "mesh saved");
    Ok(())
}

/// Reads a whole file, mapping a missing file to [`FieldError::FileNotFound`].
pub(crate) fn read_file(path: &Path) -> FieldResult<Vec<u8>> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FieldError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            FieldError::Io(e)
        }
    })?;
    info!(path = %path.display(), bytes = bytes.len(), "mesh loaded");
    Ok(bytes)
}

/// Loads a mesh file of any backend.
///
/// The backend is read from the file header.
///
/// # Errors
///
/// Returns [`FieldError::FileNotFound`] for a missing file and
/// [`FieldError::Serialization`] if the file is corrupt or encodes a mesh of
/// another dimension.
///
/// # Example
///
/// ```
/// use field_mesh::{BackgroundMesh, BoundingBox, MeshType, Point2, create_sparse_grid, load_mesh};
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("grid.fmsh");
///
/// let grid = create_sparse_grid(
///     BoundingBox::new(Point2::new(-1.0, -1.0), Point2::new(1.0, 1.0)),
///     0.25,
/// )
/// .unwrap();
/// grid.save_to_file(&path).unwrap();
///
/// let loaded = load_mesh::<2>(&path).unwrap();
/// assert_eq!(loaded.mesh_type(), MeshType::SparseGrid);
/// ```
pub fn load_mesh<const D: usize>(path: impl AsRef<Path>) -> FieldResult<AnyMesh<D>> {
    let bytes = read_file(path.as_ref())?;
    decode_any(&bytes)
}

/// Decodes a mesh of any backend from bytes.
///
/// # Errors
///
/// Returns [`FieldError::Serialization`] for corrupt input or a dimension
/// other than `D`.
pub fn decode_any<const D: usize>(bytes: &[u8]) -> FieldResult<AnyMesh<D>> {
    let (mesh_type, dim) = codec::peek_mesh_type(bytes)?;
    if dim != D {
        return Err(CodecError::DimensionMismatch {
            expected: D,
            found: dim,
        }
        .into());
    }
    Ok(match mesh_type {
        MeshType::CartesianGrid => {
            AnyMesh::Cartesian(CartesianGrid::decode(bytes, CartesianGridParams::default())?)
        }
        MeshType::QuadTree | MeshType::OctTree => {
            AnyMesh::Adaptive(AdaptiveTree::decode(bytes, AdaptiveTreeParams::default())?)
        }
        MeshType::SparseGrid => AnyMesh::Sparse(SparseGrid::decode(bytes, SparseGridParams::default())?),
    })
}
