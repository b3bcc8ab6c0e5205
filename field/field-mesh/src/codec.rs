//! Binary encoding of meshes and their fields.
//!
//! # Layout
//!
//! ```text
//! [u8; 4]  - Magic "FMSH"
//! u16      - Format version (little-endian)
//! u8       - Mesh type code
//! u8       - Dimension
//! ...      - bincode payload: header, field blocks, backend structure
//! ```
//!
//! The fixed preamble lets [`peek_mesh_type`] pick a backend without touching
//! the payload. Field blocks hold one value per address in the mesh's
//! address order, flattened into components (tensors row-major). Blocks
//! stored as `f32` are widened on read.

use std::hash::Hash;

use field_types::{BoundingBox, ElementType, FieldKind, MeshType, PartitioningStrategy, Point};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FieldResult;
use crate::store::{FieldStore, FieldValue};

/// Leading bytes of every encoded mesh.
pub const MAGIC: [u8; 4] = *b"FMSH";

/// Current format version.
pub const VERSION: u16 = 1;

/// Bytes before the bincode payload.
pub const PREAMBLE_SIZE: usize = 8;

/// Errors raised while decoding a byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The stream does not start with [`MAGIC`].
    #[error("invalid magic bytes {found:?}")]
    InvalidMagic {
        /// First bytes of the stream.
        found: [u8; 4],
    },

    /// The format version is not understood.
    #[error("unsupported format version {version}")]
    UnsupportedVersion {
        /// Version found in the preamble.
        version: u16,
    },

    /// The stream encodes a different backend.
    #[error("stream holds a {found}, expected a {expected}")]
    MeshTypeMismatch {
        /// Backend of the receiving mesh.
        expected: MeshType,
        /// Backend recorded in the stream.
        found: MeshType,
    },

    /// The stream encodes a different dimension.
    #[error("stream is {found}-dimensional, expected {expected}")]
    DimensionMismatch {
        /// Dimension of the receiving mesh.
        expected: usize,
        /// Dimension recorded in the stream.
        found: usize,
    },

    /// An enumeration code is not recognised.
    #[error("unknown {what} code {code}")]
    UnknownCode {
        /// Which enumeration was being decoded.
        what: &'static str,
        /// The offending code.
        code: u8,
    },

    /// The stream is shorter than the preamble.
    #[error("truncated stream: {found} bytes, preamble needs {needed}")]
    Truncated {
        /// Bytes present.
        found: usize,
        /// Bytes required.
        needed: usize,
    },

    /// The payload could not be encoded or decoded.
    #[error("malformed payload: {message}")]
    Payload {
        /// Message from the encoder.
        message: String,
    },

    /// Structurally inconsistent content.
    #[error("invalid content: {message}")]
    Invalid {
        /// What was inconsistent.
        message: String,
    },

    /// Bytes remain after the mesh was fully decoded.
    #[error("{count} trailing bytes after mesh data")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },
}

impl CodecError {
    /// Create an `Invalid` error with the given message.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        Self::Payload {
            message: err.to_string(),
        }
    }
}

/// The bincode payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MeshFile {
    pub header: FileHeader,
    pub fields: Vec<FieldBlock>,
    pub structure: Structure,
}

/// Header as stored: enumeration codes and unchecked bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FileHeader {
    pub element: u8,
    pub partitioning: u8,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub address_count: u64,
}

/// One field: fill value and one value per address, flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FieldBlock {
    pub name: String,
    pub kind: u8,
    pub fill: Components,
    pub values: Components,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Components {
    F64(Vec<f64>),
    F32(Vec<f32>),
}

impl Components {
    fn into_f64(self) -> Vec<f64> {
        match self {
            Self::F64(values) => values,
            Self::F32(values) => values.into_iter().map(f64::from).collect(),
        }
    }
}

/// Backend-specific structural data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Structure {
    Cartesian {
        resolution: Vec<u64>,
        layout: u8,
    },
    Tree {
        max_depth: u32,
        /// Arena slots in id order; `None` for ids freed by coarsening.
        slots: Vec<Option<TreeSlot>>,
    },
    Sparse {
        voxel_size: f64,
        background: f64,
        value_field: String,
        /// Active voxels, strictly ascending.
        coords: Vec<Vec<i32>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TreeSlot {
    pub parent: Option<u64>,
    pub children: Vec<u64>,
}

/// Decoded and validated header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Header<const D: usize> {
    pub mesh_type: MeshType,
    pub partitioning: PartitioningStrategy,
    pub bounds: BoundingBox<D>,
    pub address_count: u64,
}

impl<const D: usize> Header<D> {
    fn to_file(self) -> FileHeader {
        FileHeader {
            element: ElementType::F64.code(),
            partitioning: self.partitioning.code(),
            min: self.bounds.min().coords.iter().copied().collect(),
            max: self.bounds.max().coords.iter().copied().collect(),
            address_count: self.address_count,
        }
    }

    fn from_file(mesh_type: MeshType, file: &FileHeader) -> Result<Self, CodecError> {
        ElementType::from_code(file.element).ok_or(CodecError::UnknownCode {
            what: "element type",
            code: file.element,
        })?;
        let partitioning = PartitioningStrategy::from_code(file.partitioning).ok_or(CodecError::UnknownCode {
            what: "partitioning strategy",
            code: file.partitioning,
        })?;
        let min = point_from(&file.min)?;
        let max = point_from(&file.max)?;
        let bounds = BoundingBox::try_new(min, max).map_err(|e| CodecError::invalid(e.to_string()))?;
        Ok(Self {
            mesh_type,
            partitioning,
            bounds,
            address_count: file.address_count,
        })
    }
}

fn point_from<const D: usize>(coords: &[f64]) -> Result<Point<D>, CodecError> {
    if coords.len() != D {
        return Err(CodecError::invalid(format!(
            "bounding box corner has {} coordinates, expected {D}",
            coords.len()
        )));
    }
    let mut p = Point::origin();
    for (axis, &c) in coords.iter().enumerate() {
        p[axis] = c;
    }
    Ok(p)
}

/// Field block decoded before the addresses it belongs to are known.
#[derive(Debug, Clone)]
pub(crate) struct RawField<const D: usize> {
    pub name: String,
    pub fill: FieldValue<D>,
    pub values: Vec<FieldValue<D>>,
}

impl FieldBlock {
    fn into_raw<const D: usize>(self) -> Result<RawField<D>, CodecError> {
        let kind = FieldKind::from_code(self.kind).ok_or(CodecError::UnknownCode {
            what: "field kind",
            code: self.kind,
        })?;
        let width = kind.components(D);
        let bad_width = || CodecError::invalid(format!("field '{}' has a ragged value block", self.name));

        let fill = FieldValue::from_components(kind, &self.fill.into_f64()).ok_or_else(bad_width)?;
        let flat = self.values.into_f64();
        if flat.len() % width != 0 {
            return Err(bad_width());
        }
        let values = flat
            .chunks_exact(width)
            .map(|chunk| FieldValue::from_components(kind, chunk).ok_or_else(bad_width))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RawField {
            name: self.name,
            fill,
            values,
        })
    }
}

/// Builds one block per field of `store`, with values in `order`.
///
/// Addresses in `order` missing from a field are written as its fill value.
fn field_blocks<K, const D: usize>(store: &FieldStore<K, D>, order: &[K]) -> Vec<FieldBlock>
where
    K: Copy + Eq + Hash,
{
    store
        .iter()
        .map(|(name, field)| {
            let mut fill = Vec::new();
            field.fill().write_components(&mut fill);
            let mut values = Vec::with_capacity(order.len() * fill.len());
            for key in order {
                field.get(key).unwrap_or_else(|| field.fill()).write_components(&mut values);
            }
            FieldBlock {
                name: name.to_string(),
                kind: field.kind().code(),
                fill: Components::F64(fill),
                values: Components::F64(values),
            }
        })
        .collect()
}

/// Reads the backend kind and dimension of an encoded mesh without decoding
/// the payload.
///
/// # Errors
///
/// Returns a [`CodecError`] if the leading bytes are not a valid preamble.
pub fn peek_mesh_type(bytes: &[u8]) -> Result<(MeshType, usize), CodecError> {
    let Some(preamble) = bytes.get(..PREAMBLE_SIZE) else {
        return Err(CodecError::Truncated {
            found: bytes.len(),
            needed: PREAMBLE_SIZE,
        });
    };
    let found = [preamble[0], preamble[1], preamble[2], preamble[3]];
    if found != MAGIC {
        return Err(CodecError::InvalidMagic { found });
    }
    let version = u16::from_le_bytes([preamble[4], preamble[5]]);
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion { version });
    }
    let mesh_type = MeshType::from_code(preamble[6]).ok_or(CodecError::UnknownCode {
        what: "mesh type",
        code: preamble[6],
    })?;
    Ok((mesh_type, usize::from(preamble[7])))
}

fn write_preamble(out: &mut Vec<u8>, mesh_type: MeshType, dim: usize) -> Result<(), CodecError> {
    let dim = u8::try_from(dim).map_err(|_| CodecError::invalid(format!("dimension {dim} not representable")))?;
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.push(mesh_type.code());
    out.push(dim);
    Ok(())
}

/// Encodes a mesh: its header, every field of `store` in `order`, and the
/// backend structure.
pub(crate) fn encode<K, const D: usize>(
    header: &Header<D>,
    store: &FieldStore<K, D>,
    order: &[K],
    structure: Structure,
) -> FieldResult<Vec<u8>>
where
    K: Copy + Eq + Hash,
{
    let file = MeshFile {
        header: header.to_file(),
        fields: field_blocks(store, order),
        structure,
    };
    let mut out = Vec::new();
    write_preamble(&mut out, header.mesh_type, D)?;
    bincode::serialize_into(&mut out, &file).map_err(CodecError::from)?;
    Ok(out)
}

/// A decoded stream, checked against the receiving backend.
#[derive(Debug)]
pub(crate) struct Decoded<const D: usize> {
    pub header: Header<D>,
    pub fields: Vec<RawField<D>>,
    pub structure: Structure,
}

/// Decodes a stream produced by [`encode`] for a mesh of type `expected`.
pub(crate) fn decode<const D: usize>(bytes: &[u8], expected: MeshType) -> Result<Decoded<D>, CodecError> {
    let (mesh_type, dim) = peek_mesh_type(bytes)?;
    if mesh_type != expected {
        return Err(CodecError::MeshTypeMismatch {
            expected,
            found: mesh_type,
        });
    }
    if dim != D {
        return Err(CodecError::DimensionMismatch {
            expected: D,
            found: dim,
        });
    }

    let mut payload = &bytes[PREAMBLE_SIZE..];
    let file: MeshFile = bincode::deserialize_from(&mut payload)?;
    if !payload.is_empty() {
        return Err(CodecError::TrailingBytes { count: payload.len() });
    }

    let header = Header::from_file(mesh_type, &file.header)?;
    let fields = file
        .fields
        .into_iter()
        .map(FieldBlock::into_raw)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Decoded {
        header,
        fields,
        structure: file.structure,
    })
}

/// Rebuilds a store by pairing each field's values with `order`.
pub(crate) fn assign_fields<K, const D: usize>(
    raw: Vec<RawField<D>>,
    order: &[K],
) -> FieldResult<FieldStore<K, D>>
where
    K: Copy + Eq + Hash,
{
    let mut store = FieldStore::new();
    for field in raw {
        if field.values.len() != order.len() {
            return Err(CodecError::invalid(format!(
                "field '{}' has {} values for {} addresses",
                field.name,
                field.values.len(),
                order.len()
            ))
            .into());
        }
        if store.contains(&field.name) {
            return Err(CodecError::invalid(format!("duplicate field '{}'", field.name)).into());
        }
        store.insert_field(&field.name, field.fill, order.iter().copied().zip(field.values))?;
    }
    Ok(store)
}
