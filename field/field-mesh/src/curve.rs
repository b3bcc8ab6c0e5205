//! Space-filling curve keys for cell ordering.
//!
//! Cells are ordered by a key computed from integer lattice coordinates at a
//! common resolution of `bits` bits per axis. Morton keys interleave the
//! coordinate bits with axis 0 in the lowest position; Hilbert keys use
//! Skilling's transpose construction ("Programming the Hilbert curve", 2004).
//! Keys are `u128`, so at most `128 / D` bits per axis are used.

use field_types::PartitioningStrategy;

/// Largest per-axis bit count representable for dimension `D`.
const fn max_bits<const D: usize>() -> u32 {
    if D == 0 {
        0
    } else {
        // D >= 1 so the quotient fits in u32.
        (128 / D) as u32
    }
}

/// Bits needed to address `extent` positions on one axis.
pub(crate) fn bits_for(extent: u64) -> u32 {
    if extent <= 1 {
        0
    } else {
        u64::BITS - (extent - 1).leading_zeros()
    }
}

/// Morton (Z-order) key.
pub(crate) fn morton_key<const D: usize>(coords: [u64; D], bits: u32) -> u128 {
    let bits = bits.min(max_bits::<D>());
    let mut key = 0u128;
    for bit in (0..bits).rev() {
        for axis in (0..D).rev() {
            key = (key << 1) | u128::from((coords[axis] >> bit) & 1);
        }
    }
    key
}

/// Hilbert key.
pub(crate) fn hilbert_key<const D: usize>(coords: [u64; D], bits: u32) -> u128 {
    let bits = bits.min(max_bits::<D>());
    if bits == 0 || D == 0 {
        return 0;
    }

    let mut x = coords;
    let m = 1u64 << (bits - 1);

    // Inverse undo excess work.
    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..D {
            if x[i] & q == 0 {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            } else {
                x[0] ^= p;
            }
        }
        q >>= 1;
    }

    // Gray encode.
    for i in 1..D {
        x[i] ^= x[i - 1];
    }
    let mut t = 0;
    let mut q = m;
    while q > 1 {
        if x[D - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for xi in &mut x {
        *xi ^= t;
    }

    // Transpose to a single key, axis 0 most significant within a level.
    let mut key = 0u128;
    for bit in (0..bits).rev() {
        for xi in &x {
            key = (key << 1) | u128::from((xi >> bit) & 1);
        }
    }
    key
}

/// Sorts `(id, coords)` entries by the curve key of `strategy`, ties and
/// [`PartitioningStrategy::None`] by ascending id.
pub(crate) fn order_ids<const D: usize>(
    strategy: PartitioningStrategy,
    mut entries: Vec<(usize, [u64; D])>,
    bits: u32,
) -> Vec<usize> {
    match strategy {
        PartitioningStrategy::None => entries.sort_unstable_by_key(|(id, _)| *id),
        PartitioningStrategy::Morton => {
            entries.sort_by_cached_key(|(id, coords)| (morton_key(*coords, bits), *id));
        }
        PartitioningStrategy::Hilbert => {
            entries.sort_by_cached_key(|(id, coords)| (hilbert_key(*coords, bits), *id));
        }
    }
    entries.into_iter().map(|(id, _)| id).collect()
}
