//! Per-mesh field storage.
//!
//! A [`FieldStore`] maps field names to typed value columns keyed by an
//! address: a linear cell index, a tree cell id or a sparse coordinate. Every
//! field holds a value for every address the owning mesh currently has; the
//! owning mesh keeps that invariant through [`FieldStore::insert_address`]
//! and [`FieldStore::remove_address`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::mem::size_of;

use field_types::{FieldKind, Tensor, Vector};
use hashbrown::HashMap;
use tracing::debug;

use crate::error::{FieldError, FieldResult};

/// A single field value of any kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FieldValue<const D: usize> {
    Scalar(f64),
    Vector(Vector<D>),
    Tensor(Tensor<D>),
}

impl<const D: usize> FieldValue<D> {
    pub(crate) const fn kind(&self) -> FieldKind {
        match self {
            Self::Scalar(_) => FieldKind::Scalar,
            Self::Vector(_) => FieldKind::Vector,
            Self::Tensor(_) => FieldKind::Tensor,
        }
    }

    /// The value itself for scalars, the (Frobenius) norm otherwise.
    pub(crate) fn scalar_view(&self) -> f64 {
        match self {
            Self::Scalar(v) => *v,
            Self::Vector(v) => v.norm(),
            Self::Tensor(t) => t.norm(),
        }
    }

    /// Appends the components in storage order (tensors row-major).
    pub(crate) fn write_components(&self, out: &mut Vec<f64>) {
        match self {
            Self::Scalar(v) => out.push(*v),
            Self::Vector(v) => out.extend(v.iter().copied()),
            Self::Tensor(t) => {
                for row in 0..D {
                    for col in 0..D {
                        out.push(t[(row, col)]);
                    }
                }
            }
        }
    }

    /// Inverse of [`FieldValue::write_components`].
    pub(crate) fn from_components(kind: FieldKind, components: &[f64]) -> Option<Self> {
        if components.len() != kind.components(D) {
            return None;
        }
        Some(match kind {
            FieldKind::Scalar => Self::Scalar(components[0]),
            FieldKind::Vector => Self::Vector(Vector::from_fn(|i, _| components[i])),
            FieldKind::Tensor => Self::Tensor(Tensor::from_fn(|r, c| components[r * D + c])),
        })
    }

    /// Weighted sum of values of one kind; `None` for an empty or mixed set.
    pub(crate) fn weighted_sum(items: &[(Self, f64)]) -> Option<Self> {
        let (first, _) = items.first()?;
        match first {
            Self::Scalar(_) => blend_values::<f64, D>(items).map(Self::Scalar),
            Self::Vector(_) => blend_values::<Vector<D>, D>(items).map(Self::Vector),
            Self::Tensor(_) => blend_values::<TensorValue<D>, D>(items).map(|t| Self::Tensor(t.0)),
        }
    }
}

fn blend_values<V: FieldElement<D>, const D: usize>(items: &[(FieldValue<D>, f64)]) -> Option<V> {
    items.iter().try_fold(V::zero(), |acc, (value, weight)| {
        V::from_value(*value).map(|v| acc.add_scaled(v, *weight))
    })
}

/// A value type that can live in a field column.
///
/// Implemented for `f64` (scalar), [`Vector<D>`] and [`TensorValue<D>`].
pub(crate) trait FieldElement<const D: usize>: Copy + Debug + PartialEq + Send + Sync + 'static {
    const KIND: FieldKind;

    fn zero() -> Self;

    /// `self + other * weight`.
    #[must_use]
    fn add_scaled(self, other: Self, weight: f64) -> Self;

    fn into_value(self) -> FieldValue<D>;

    fn from_value(value: FieldValue<D>) -> Option<Self>;

    fn column<K>(values: &FieldValues<K, D>) -> Option<&HashMap<K, Self>>;

    fn column_mut<K>(values: &mut FieldValues<K, D>) -> Option<&mut HashMap<K, Self>>;

    fn new_column<K>(values: HashMap<K, Self>) -> FieldValues<K, D>;
}

impl<const D: usize> FieldElement<D> for f64 {
    const KIND: FieldKind = FieldKind::Scalar;

    fn zero() -> Self {
        0.0
    }

    fn add_scaled(self, other: Self, weight: f64) -> Self {
        other.mul_add(weight, self)
    }

    fn into_value(self) -> FieldValue<D> {
        FieldValue::Scalar(self)
    }

    fn from_value(value: FieldValue<D>) -> Option<Self> {
        match value {
            FieldValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    fn column<K>(values: &FieldValues<K, D>) -> Option<&HashMap<K, Self>> {
        match values {
            FieldValues::Scalar(column) => Some(column),
            _ => None,
        }
    }

    fn column_mut<K>(values: &mut FieldValues<K, D>) -> Option<&mut HashMap<K, Self>> {
        match values {
            FieldValues::Scalar(column) => Some(column),
            _ => None,
        }
    }

    fn new_column<K>(values: HashMap<K, Self>) -> FieldValues<K, D> {
        FieldValues::Scalar(values)
    }
}

impl<const D: usize> FieldElement<D> for Vector<D> {
    const KIND: FieldKind = FieldKind::Vector;

    fn zero() -> Self {
        Self::zeros()
    }

    fn add_scaled(self, other: Self, weight: f64) -> Self {
        self + other * weight
    }

    fn into_value(self) -> FieldValue<D> {
        FieldValue::Vector(self)
    }

    fn from_value(value: FieldValue<D>) -> Option<Self> {
        match value {
            FieldValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    fn column<K>(values: &FieldValues<K, D>) -> Option<&HashMap<K, Self>> {
        match values {
            FieldValues::Vector(column) => Some(column),
            _ => None,
        }
    }

    fn column_mut<K>(values: &mut FieldValues<K, D>) -> Option<&mut HashMap<K, Self>> {
        match values {
            FieldValues::Vector(column) => Some(column),
            _ => None,
        }
    }

    fn new_column<K>(values: HashMap<K, Self>) -> FieldValues<K, D> {
        FieldValues::Vector(values)
    }
}

/// Column element for tensor fields.
///
/// `Vector<1>` and `Tensor<1>` are the same `nalgebra` type, so tensors get
/// their own element type to keep the two kinds apart.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TensorValue<const D: usize>(pub(crate) Tensor<D>);

impl<const D: usize> FieldElement<D> for TensorValue<D> {
    const KIND: FieldKind = FieldKind::Tensor;

    fn zero() -> Self {
        Self(Tensor::zeros())
    }

    fn add_scaled(self, other: Self, weight: f64) -> Self {
        Self(self.0 + other.0 * weight)
    }

    fn into_value(self) -> FieldValue<D> {
        FieldValue::Tensor(self.0)
    }

    fn from_value(value: FieldValue<D>) -> Option<Self> {
        match value {
            FieldValue::Tensor(t) => Some(Self(t)),
            _ => None,
        }
    }

    fn column<K>(values: &FieldValues<K, D>) -> Option<&HashMap<K, Self>> {
        match values {
            FieldValues::Tensor(column) => Some(column),
            _ => None,
        }
    }

    fn column_mut<K>(values: &mut FieldValues<K, D>) -> Option<&mut HashMap<K, Self>> {
        match values {
            FieldValues::Tensor(column) => Some(column),
            _ => None,
        }
    }

    fn new_column<K>(values: HashMap<K, Self>) -> FieldValues<K, D> {
        FieldValues::Tensor(values)
    }
}

/// Typed value column of one field.
#[derive(Debug, Clone)]
pub(crate) enum FieldValues<K, const D: usize> {
    Scalar(HashMap<K, f64>),
    Vector(HashMap<K, Vector<D>>),
    Tensor(HashMap<K, TensorValue<D>>),
}

impl<K: Copy + Eq + Hash, const D: usize> FieldValues<K, D> {
    fn capacity_bytes(&self) -> usize {
        match self {
            Self::Scalar(c) => c.capacity() * (size_of::<K>() + size_of::<f64>() + 1),
            Self::Vector(c) => c.capacity() * (size_of::<K>() + size_of::<Vector<D>>() + 1),
            Self::Tensor(c) => c.capacity() * (size_of::<K>() + size_of::<TensorValue<D>>() + 1),
        }
    }

    fn get(&self, key: &K) -> Option<FieldValue<D>> {
        match self {
            Self::Scalar(c) => c.get(key).copied().map(FieldValue::Scalar),
            Self::Vector(c) => c.get(key).copied().map(FieldValue::Vector),
            Self::Tensor(c) => c.get(key).map(|t| FieldValue::Tensor(t.0)),
        }
    }

    /// Inserts a value of matching kind; returns `false` on a kind mismatch.
    fn insert(&mut self, key: K, value: FieldValue<D>) -> bool {
        match (self, value) {
            (Self::Scalar(c), FieldValue::Scalar(v)) => {
                c.insert(key, v);
            }
            (Self::Vector(c), FieldValue::Vector(v)) => {
                c.insert(key, v);
            }
            (Self::Tensor(c), FieldValue::Tensor(v)) => {
                c.insert(key, TensorValue(v));
            }
            _ => return false,
        }
        true
    }

    fn remove(&mut self, key: &K) {
        match self {
            Self::Scalar(c) => {
                c.remove(key);
            }
            Self::Vector(c) => {
                c.remove(key);
            }
            Self::Tensor(c) => {
                c.remove(key);
            }
        }
    }

    fn shrink_to_fit(&mut self) {
        match self {
            Self::Scalar(c) => c.shrink_to_fit(),
            Self::Vector(c) => c.shrink_to_fit(),
            Self::Tensor(c) => c.shrink_to_fit(),
        }
    }
}

/// One named field: its values and the value given to new addresses.
#[derive(Debug, Clone)]
pub(crate) struct Field<K, const D: usize> {
    values: FieldValues<K, D>,
    fill: FieldValue<D>,
}

impl<K: Copy + Eq + Hash, const D: usize> Field<K, D> {
    pub(crate) fn kind(&self) -> FieldKind {
        self.fill.kind()
    }

    pub(crate) const fn fill(&self) -> FieldValue<D> {
        self.fill
    }

    pub(crate) fn get(&self, key: &K) -> Option<FieldValue<D>> {
        self.values.get(key)
    }
}

/// Named field columns over the addresses of one mesh.
#[derive(Debug, Clone)]
pub(crate) struct FieldStore<K, const D: usize> {
    fields: BTreeMap<String, Field<K, D>>,
}

impl<K, const D: usize> Default for FieldStore<K, D> {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash, const D: usize> FieldStore<K, D> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.fields.len()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub(crate) fn kind(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).map(Field::kind)
    }

    /// Field names of one kind, in ascending order.
    pub(crate) fn names_of_kind(&self, kind: FieldKind) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, field)| field.kind() == kind)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Field<K, D>)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    /// Typed column access; `None` if the field is absent or of another kind.
    pub(crate) fn column<V: FieldElement<D>>(&self, name: &str) -> Option<&HashMap<K, V>> {
        V::column(&self.fields.get(name)?.values)
    }

    /// Typed fill value of a field.
    pub(crate) fn fill<V: FieldElement<D>>(&self, name: &str) -> Option<V> {
        V::from_value(self.fields.get(name)?.fill)
    }

    /// Untyped value of a field at an address.
    pub(crate) fn value(&self, name: &str, key: &K) -> Option<FieldValue<D>> {
        self.fields.get(name)?.get(key)
    }

    pub(crate) fn get<V: FieldElement<D>>(&self, name: &str, key: &K) -> Option<V> {
        self.column::<V>(name)?.get(key).copied()
    }

    /// Creates a field holding `fill` at every address, unless it already
    /// exists with the same kind.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::KindMismatch`] if a field of another kind exists
    /// under `name`.
    pub(crate) fn ensure<V: FieldElement<D>>(
        &mut self,
        name: &str,
        fill: V,
        addresses: impl IntoIterator<Item = K>,
    ) -> FieldResult<()> {
        if let Some(existing) = self.fields.get(name) {
            return if existing.kind() == V::KIND {
                Ok(())
            } else {
                Err(FieldError::KindMismatch {
                    name: name.to_string(),
                    expected: V::KIND,
                    found: existing.kind(),
                })
            };
        }

        let column: HashMap<K, V> = addresses.into_iter().map(|key| (key, fill)).collect();
        let kind = V::KIND;
        debug!(field = name, %kind, addresses = column.len(), "field created");
        self.fields.insert(
            name.to_string(),
            Field {
                values: V::new_column(column),
                fill: fill.into_value(),
            },
        );
        Ok(())
    }

    /// Writes a value at an existing address, creating the field with a zero
    /// fill on first write.
    ///
    /// The caller is responsible for `key` being a live address.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::KindMismatch`] if a field of another kind exists
    /// under `name`.
    pub(crate) fn set<V: FieldElement<D>>(
        &mut self,
        name: &str,
        key: K,
        value: V,
        addresses: impl IntoIterator<Item = K>,
    ) -> FieldResult<()> {
        self.ensure(name, V::zero(), addresses)?;
        let column = self
            .fields
            .get_mut(name)
            .and_then(|field| V::column_mut(&mut field.values))
            .ok_or_else(|| FieldError::out_of_range(format!("field '{name}' not found")))?;
        column.insert(key, value);
        Ok(())
    }

    /// Writes an untyped value into an existing field.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::OutOfRange`] for an unknown field and
    /// [`FieldError::KindMismatch`] if the value kind differs.
    pub(crate) fn put(&mut self, name: &str, key: K, value: FieldValue<D>) -> FieldResult<()> {
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| FieldError::out_of_range(format!("field '{name}' not found")))?;
        if field.values.insert(key, value) {
            Ok(())
        } else {
            Err(FieldError::KindMismatch {
                name: name.to_string(),
                expected: value.kind(),
                found: field.kind(),
            })
        }
    }

    /// Adds an untyped field with the given fill and explicit values.
    ///
    /// Used when rebuilding a store from encoded data.
    pub(crate) fn insert_field(
        &mut self,
        name: &str,
        fill: FieldValue<D>,
        values: impl IntoIterator<Item = (K, FieldValue<D>)>,
    ) -> FieldResult<()> {
        let empty = match fill {
            FieldValue::Scalar(_) => FieldValues::Scalar(HashMap::new()),
            FieldValue::Vector(_) => FieldValues::Vector(HashMap::new()),
            FieldValue::Tensor(_) => FieldValues::Tensor(HashMap::new()),
        };
        self.fields.insert(
            name.to_string(),
            Field {
                values: empty,
                fill,
            },
        );
        for (key, value) in values {
            self.put(name, key, value)?;
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let removed = self.fields.remove(name).is_some();
        if removed {
            debug!(field = name, "field removed");
        }
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.fields.clear();
    }

    /// Gives a new address the fill value of every field.
    pub(crate) fn insert_address(&mut self, key: K) {
        for field in self.fields.values_mut() {
            let fill = field.fill;
            field.values.insert(key, fill);
        }
    }

    /// Removes an address from every field.
    pub(crate) fn remove_address(&mut self, key: &K) {
        for field in self.fields.values_mut() {
            field.values.remove(key);
        }
    }

    pub(crate) fn shrink_to_fit(&mut self) {
        for field in self.fields.values_mut() {
            field.values.shrink_to_fit();
        }
    }

    /// Approximate heap bytes held by the store.
    pub(crate) fn memory_usage(&self) -> usize {
        self.fields
            .iter()
            .map(|(name, field)| {
                name.capacity() + size_of::<Field<K, D>>() + field.values.capacity_bytes()
            })
            .sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn store_with_addresses() -> FieldStore<usize, 2> {
        let mut store = FieldStore::new();
        store.set("h", 1, 3.5_f64, 0..4).unwrap();
        store
    }

    #[test]
    fn first_write_fills_every_address() {
        let store = store_with_addresses();
        assert_eq!(store.get::<f64>("h", &1), Some(3.5));
        assert_eq!(store.get::<f64>("h", &0), Some(0.0));
        assert_eq!(store.get::<f64>("h", &3), Some(0.0));
        assert_eq!(store.get::<f64>("h", &4), None);
    }

    #[test]
    fn kind_mismatch_is_reported() {
        let mut store = store_with_addresses();
        let err = store
            .set("h", 0, Vector::<2>::new(1.0, 2.0), 0..4)
            .unwrap_err();
        assert!(matches!(
            err,
            FieldError::KindMismatch {
                expected: FieldKind::Vector,
                found: FieldKind::Scalar,
                ..
            }
        ));
        assert_eq!(store.get::<Vector<2>>("h", &0), None);
    }

    #[test]
    fn names_are_listed_by_kind() {
        let mut store = store_with_addresses();
        store.set("v", 0, Vector::<2>::new(1.0, 0.0), 0..4).unwrap();
        store.set("t", 0, TensorValue(Tensor::<2>::identity()), 0..4).unwrap();
        store.set("a", 0, 1.0_f64, 0..4).unwrap();
        assert_eq!(store.names_of_kind(FieldKind::Scalar), vec!["a", "h"]);
        assert_eq!(store.names_of_kind(FieldKind::Vector), vec!["v"]);
        assert_eq!(store.names_of_kind(FieldKind::Tensor), vec!["t"]);
    }

    #[test]
    fn address_lifecycle_touches_every_field() {
        let mut store = store_with_addresses();
        store.ensure("bg", 9.0_f64, 0..4).unwrap();
        store.insert_address(10);
        assert_eq!(store.get::<f64>("h", &10), Some(0.0));
        assert_eq!(store.get::<f64>("bg", &10), Some(9.0));

        store.remove_address(&1);
        assert_eq!(store.get::<f64>("h", &1), None);
        assert_eq!(store.get::<f64>("bg", &1), None);
    }

    #[test]
    fn weighted_sum_of_vectors() {
        let items = [
            (FieldValue::<2>::Vector(Vector::<2>::new(1.0, 0.0)), 0.25),
            (FieldValue::Vector(Vector::<2>::new(0.0, 4.0)), 0.75),
        ];
        assert_eq!(
            FieldValue::weighted_sum(&items),
            Some(FieldValue::Vector(Vector::<2>::new(0.25, 3.0)))
        );
        let mixed = [
            (FieldValue::<2>::Scalar(1.0), 0.5),
            (FieldValue::Vector(Vector::<2>::zeros()), 0.5),
        ];
        assert_eq!(FieldValue::weighted_sum(&mixed), None);
    }

    #[test]
    fn scalar_view_uses_norms() {
        assert_eq!(FieldValue::<2>::Scalar(-2.0).scalar_view(), -2.0);
        assert_eq!(FieldValue::Vector(Vector::<2>::new(3.0, 4.0)).scalar_view(), 5.0);
        assert_eq!(FieldValue::Tensor(Tensor::<2>::identity() * 2.0).scalar_view(), 8.0_f64.sqrt());
    }

    #[test]
    fn components_round_trip_tensor() {
        let t = Tensor::<2>::new(1.0, 2.0, 3.0, 4.0);
        let mut out = Vec::new();
        FieldValue::Tensor(t).write_components(&mut out);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            FieldValue::<2>::from_components(FieldKind::Tensor, &out),
            Some(FieldValue::Tensor(t))
        );
        assert_eq!(FieldValue::<2>::from_components(FieldKind::Vector, &out), None);
    }

    #[test]
    fn put_rejects_unknown_and_mismatched() {
        let mut store = store_with_addresses();
        assert!(matches!(
            store.put("missing", 0, FieldValue::Scalar(1.0)),
            Err(FieldError::OutOfRange { .. })
        ));
        assert!(matches!(
            store.put("h", 0, FieldValue::Vector(Vector::<2>::zeros())),
            Err(FieldError::KindMismatch { .. })
        ));
    }

    #[test]
    fn remove_and_clear() {
        let mut store = store_with_addresses();
        assert!(store.remove("h"));
        assert!(!store.remove("h"));
        store.set("x", 0, 1.0_f64, 0..2).unwrap();
        assert!(store.memory_usage() > 0);
        store.clear();
        assert_eq!(store.len(), 0);
    }
}
