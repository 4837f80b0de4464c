//! Value-segregation maps.
//!
//! A value-segregated component routes entities into categories by *value* as
//! well as by type. Each such component type owns a [`SegregationMap`] from
//! value to a private virtual-type id; the virtual id is set as an extra bit in
//! the category signature.
//!
//! - Equal values always map to the same virtual bit.
//! - Unseen values allocate a fresh bit from the [`TypeRegistry`] pool.
//! - [`SegregationMaps::release_all`] hands every bit back to the pool (used by
//!   a full store clear).

use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;

use crate::engine::component::{Component, Storage, StorageKind};
use crate::engine::registry::TypeRegistry;
use crate::engine::table::{ErasedTable, Table};
use crate::engine::types::{RowIdx, TypeIdx};

/// Type-erased value map of one segregated component type.
pub trait ErasedSegregationMap: Send + Sync {
    /// Virtual id of `value`, allocating one owned by `owner` when unseen.
    fn virtual_for(&mut self, owner: TypeIdx, value: &dyn Any, registry: &TypeRegistry) -> TypeIdx;

    /// Virtual id of `value` without allocating.
    fn lookup(&self, value: &dyn Any) -> Option<TypeIdx>;

    /// Virtual id of the value stored at `row` of `table`.
    fn virtual_for_row(&mut self, owner: TypeIdx, table: &dyn ErasedTable, row: RowIdx, registry: &TypeRegistry) -> TypeIdx;

    /// Number of distinct values seen.
    fn len(&self) -> usize;

    /// Returns `true` if no value was seen yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every value and releases its virtual id.
    fn release_all(&mut self, registry: &TypeRegistry);
}

/// Value map for segregated component `T`.
pub struct SegregationMap<T> {
    values: HashMap<T, TypeIdx>,
}

impl<T: Hash + Eq> Default for SegregationMap<T> {
    fn default() -> Self {
        Self { values: HashMap::new() }
    }
}

impl<T: Hash + Eq> SegregationMap<T> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> SegregationMap<T>
where
    T: Component + Hash + Eq + Clone,
{
    fn resolve(&mut self, owner: TypeIdx, value: &T, registry: &TypeRegistry) -> TypeIdx {
        if let Some(&id) = self.values.get(value) {
            return id;
        }
        let id = registry.alloc_virtual(owner);
        tracing::debug!(owner, virtual_id = id, "allocated virtual type");
        self.values.insert(value.clone(), id);
        id
    }
}

impl<T> ErasedSegregationMap for SegregationMap<T>
where
    T: Component + Hash + Eq + Clone,
{
    fn virtual_for(&mut self, owner: TypeIdx, value: &dyn Any, registry: &TypeRegistry) -> TypeIdx {
        let value = value
            .downcast_ref::<T>()
            .unwrap_or_else(|| panic!("segregation map of `{}` received a foreign value", std::any::type_name::<T>()));
        self.resolve(owner, value, registry)
    }

    fn lookup(&self, value: &dyn Any) -> Option<TypeIdx> {
        self.values.get(value.downcast_ref::<T>()?).copied()
    }

    fn virtual_for_row(&mut self, owner: TypeIdx, table: &dyn ErasedTable, row: RowIdx, registry: &TypeRegistry) -> TypeIdx {
        let table = table
            .as_any()
            .downcast_ref::<Table<T>>()
            .unwrap_or_else(|| panic!("segregation map of `{}` received a foreign table", std::any::type_name::<T>()));
        self.resolve(owner, &table.as_slice()[row], registry)
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn release_all(&mut self, registry: &TypeRegistry) {
        for (_, id) in self.values.drain() {
            registry.release_virtual(id);
        }
    }
}

/// Per-store collection of segregation maps, keyed by component id.
#[derive(Default)]
pub struct SegregationMaps {
    maps: HashMap<TypeIdx, Box<dyn ErasedSegregationMap>>,
}

impl SegregationMaps {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    fn map_for(&mut self, registry: &TypeRegistry, owner: TypeIdx) -> &mut Box<dyn ErasedSegregationMap> {
        self.maps.entry(owner).or_insert_with(|| registry.make_segregation_map(owner))
    }

    /// Virtual id for `value`, or `None` if `T` is not segregated.
    pub fn virtual_for<T: Component>(&mut self, registry: &TypeRegistry, value: &T) -> Option<TypeIdx> {
        if <T::Storage as StorageKind>::KIND != Storage::Segregated {
            return None;
        }
        let owner = registry.component::<T>();
        Some(self.map_for(registry, owner).virtual_for(owner, value, registry))
    }

    /// Virtual id already assigned to `value`, without allocating.
    pub fn lookup<T: Component>(&self, registry: &TypeRegistry, value: &T) -> Option<TypeIdx> {
        let owner = registry.id_of::<T>()?;
        self.maps.get(&owner)?.lookup(value)
    }

    /// Virtual id of the value at `row` of `table`, whose component id is `owner`.
    pub fn virtual_for_row(&mut self, registry: &TypeRegistry, owner: TypeIdx, table: &dyn ErasedTable, row: RowIdx) -> TypeIdx {
        self.map_for(registry, owner).virtual_for_row(owner, table, row, registry)
    }

    /// Number of distinct values seen for component `owner`.
    pub fn distinct_values(&self, owner: TypeIdx) -> usize {
        self.maps.get(&owner).map_or(0, |map| map.len())
    }

    /// Releases every virtual id back to the registry pool.
    pub fn release_all(&mut self, registry: &TypeRegistry) {
        for map in self.maps.values_mut() {
            map.release_all(registry);
        }
        self.maps.clear();
    }
}
