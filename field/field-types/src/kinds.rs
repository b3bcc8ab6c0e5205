//! Enumerations shared by every mesh backend.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The kind of background mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MeshType {
    /// Dense regular grid.
    CartesianGrid,
    /// Two-dimensional adaptive tree.
    QuadTree,
    /// Three-dimensional (or higher) adaptive tree.
    OctTree,
    /// Sparse voxel grid.
    SparseGrid,
}

impl MeshType {
    /// The adaptive tree kind for a dimension.
    #[must_use]
    pub const fn tree_for_dimension(dim: usize) -> Self {
        if dim == 2 { Self::QuadTree } else { Self::OctTree }
    }

    /// Returns `true` for the cell-based kinds (grid and trees).
    #[must_use]
    pub const fn is_cell_based(self) -> bool {
        !matches!(self, Self::SparseGrid)
    }

    /// Stable one-byte code used by the binary encoding.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::CartesianGrid => 0,
            Self::QuadTree => 1,
            Self::OctTree => 2,
            Self::SparseGrid => 3,
        }
    }

    /// Inverse of [`MeshType::code`].
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::CartesianGrid),
            1 => Some(Self::QuadTree),
            2 => Some(Self::OctTree),
            3 => Some(Self::SparseGrid),
            _ => None,
        }
    }
}

impl fmt::Display for MeshType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CartesianGrid => "cartesian grid",
            Self::QuadTree => "quadtree",
            Self::OctTree => "octree",
            Self::SparseGrid => "sparse grid",
        };
        f.write_str(name)
    }
}

/// Reconstruction order used when sampling a field at an arbitrary point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InterpolationMethod {
    /// Value of the closest address.
    Nearest,
    /// Multilinear blend of the `2^D` surrounding addresses.
    #[default]
    Linear,
    /// Catmull-Rom reconstruction over a `4^D` stencil.
    Cubic,
    /// Natural cubic spline through a `4^D` stencil; passes through stored values.
    Spline,
}

impl InterpolationMethod {
    /// Number of addresses the method needs along each axis.
    #[must_use]
    pub const fn stencil_width(self) -> usize {
        match self {
            Self::Nearest => 1,
            Self::Linear => 2,
            Self::Cubic | Self::Spline => 4,
        }
    }
}

/// Ordering applied when enumerating cells.
///
/// The strategy decides the order in which cell-based meshes enumerate their
/// cells and hence the order in which field values are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PartitioningStrategy {
    /// Ascending cell id.
    #[default]
    None,
    /// Hilbert curve order.
    Hilbert,
    /// Morton (Z-order) curve order.
    Morton,
}

impl PartitioningStrategy {
    /// Stable one-byte code used by the binary encoding.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Hilbert => 1,
            Self::Morton => 2,
        }
    }

    /// Inverse of [`PartitioningStrategy::code`].
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Hilbert),
            2 => Some(Self::Morton),
            _ => None,
        }
    }
}

/// Shape of the values a field stores at each address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FieldKind {
    /// One number per address.
    Scalar,
    /// `D` numbers per address.
    Vector,
    /// `D x D` numbers per address.
    Tensor,
}

impl FieldKind {
    /// Number of numeric components per value in dimension `dim`.
    ///
    /// # Example
    ///
    /// ```
    /// use field_types::FieldKind;
    ///
    /// assert_eq!(FieldKind::Scalar.components(3), 1);
    /// assert_eq!(FieldKind::Vector.components(3), 3);
    /// assert_eq!(FieldKind::Tensor.components(3), 9);
    /// ```
    #[must_use]
    pub const fn components(self, dim: usize) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vector => dim,
            Self::Tensor => dim * dim,
        }
    }

    /// Stable one-byte code used by the binary encoding.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Scalar => 0,
            Self::Vector => 1,
            Self::Tensor => 2,
        }
    }

    /// Inverse of [`FieldKind::code`].
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Scalar),
            1 => Some(Self::Vector),
            2 => Some(Self::Tensor),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scalar => "scalar",
            Self::Vector => "vector",
            Self::Tensor => "tensor",
        };
        f.write_str(name)
    }
}

/// Numeric type of serialized field components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ElementType {
    /// 32-bit IEEE float.
    F32,
    /// 64-bit IEEE float.
    #[default]
    F64,
}

impl ElementType {
    /// Size of one component in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Stable one-byte code used by the binary encoding.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Inverse of [`ElementType::code`].
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            4 => Some(Self::F32),
            8 => Some(Self::F64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_type_codes_round_trip() {
        for t in [
            MeshType::CartesianGrid,
            MeshType::QuadTree,
            MeshType::OctTree,
            MeshType::SparseGrid,
        ] {
            assert_eq!(MeshType::from_code(t.code()), Some(t));
        }
        assert_eq!(MeshType::from_code(42), None);
    }

    #[test]
    fn tree_kind_follows_dimension() {
        assert_eq!(MeshType::tree_for_dimension(2), MeshType::QuadTree);
        assert_eq!(MeshType::tree_for_dimension(3), MeshType::OctTree);
        assert!(!MeshType::SparseGrid.is_cell_based());
    }

    #[test]
    fn default_interpolation_is_linear() {
        assert_eq!(InterpolationMethod::default(), InterpolationMethod::Linear);
        assert_eq!(InterpolationMethod::Spline.stencil_width(), 4);
    }

    #[test]
    fn element_type_codes() {
        assert_eq!(ElementType::from_code(ElementType::F32.code()), Some(ElementType::F32));
        assert_eq!(ElementType::F64.size(), 8);
        assert_eq!(ElementType::from_code(0), None);
    }

    #[test]
    fn partitioning_codes() {
        for s in [
            PartitioningStrategy::None,
            PartitioningStrategy::Hilbert,
            PartitioningStrategy::Morton,
        ] {
            assert_eq!(PartitioningStrategy::from_code(s.code()), Some(s));
        }
    }
}
