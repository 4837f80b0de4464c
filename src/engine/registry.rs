//! # Type Registry
//!
//! Assigns every component type, resource type and virtual type a compact
//! [`TypeIdx`] drawn from one shared counter.
//!
//! ## Purpose
//! The registry is the store's reflection collaborator. For each component type
//! it remembers the type name, the [`Storage`] kind, a table factory and (for
//! value-segregated types) a segregation-map factory. Categories call these
//! factories lazily the first time a signature containing the type appears.
//!
//! ## Design
//! - The registry is an explicit object, usually shared as `Arc<TypeRegistry>`
//!   between every [`Store`] and scheduling [`Context`] of a process.
//! - Registration is lazy: [`TypeRegistry::component`] registers on first use.
//! - Resource ids and component ids are the same id for the same Rust type, so
//!   "read component `T`" and "read resource `T`" conflict as expected.
//! - Virtual types are pooled. Ids released with
//!   [`TypeRegistry::release_virtual`] are handed out again before the counter
//!   grows, keeping signatures short in long-running processes.
//!
//! ## Concurrency
//! State lives behind a `parking_lot::RwLock`; lookups of already registered
//! types take the read lock only.
//!
//! [`Store`]: crate::engine::store::Store
//! [`Context`]: crate::scheduler::context::Context

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::mem::size_of;

use parking_lot::RwLock;

use crate::engine::component::{Component, Storage, StorageKind};
use crate::engine::segregation::ErasedSegregationMap;
use crate::engine::table::{ErasedTable, Table};
use crate::engine::types::TypeIdx;

type TableFactory = fn() -> Box<dyn ErasedTable>;
type SegregationFactory = fn() -> Option<Box<dyn ErasedSegregationMap>>;

fn new_table<T: Component>() -> Box<dyn ErasedTable> {
    Box::new(Table::<T>::new())
}

/// Metadata of a registered component type.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    /// Registry id.
    pub id: TypeIdx,
    /// Rust type name.
    pub name: &'static str,
    /// Storage kind declared by the component.
    pub storage: Storage,
    table_factory: Option<TableFactory>,
    segregation_factory: SegregationFactory,
}

impl std::fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("storage", &self.storage)
            .finish()
    }
}

impl TypeInfo {
    /// Returns `true` if categories holding this type own a table for it.
    #[inline]
    pub fn has_table(&self) -> bool {
        self.table_factory.is_some()
    }
}

#[derive(Clone, Copy, Debug)]
enum TypeSlot {
    Component(TypeInfo),
    Resource { name: &'static str },
    Virtual { owner: TypeIdx },
    Released,
}

#[derive(Default)]
struct RegistryInner {
    by_type: HashMap<TypeId, TypeIdx>,
    by_name: HashMap<&'static str, TypeIdx>,
    slots: Vec<TypeSlot>,
    free_virtual: Vec<TypeIdx>,
}

impl RegistryInner {
    fn push_slot(&mut self, slot: TypeSlot) -> TypeIdx {
        let id = self.slots.len() as TypeIdx;
        self.slots.push(slot);
        id
    }
}

/// Process-wide id assignment for component, resource and virtual types.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of component type `T`, registering it on first use.
    ///
    /// ## Panics
    /// - If a `Tag` component is not zero-sized.
    /// - If the declared storage kind and the segregation hook disagree.
    pub fn component<T: Component>(&self) -> TypeIdx {
        let type_id = TypeId::of::<T>();
        {
            let inner = self.inner.read();
            if let Some(&id) = inner.by_type.get(&type_id) {
                if matches!(inner.slots[id as usize], TypeSlot::Component(_)) {
                    return id;
                }
            }
        }

        let storage = <T::Storage as StorageKind>::KIND;
        if storage == Storage::Tag {
            assert_eq!(size_of::<T>(), 0, "tag component `{}` must be zero-sized", type_name::<T>());
        }
        assert_eq!(
            storage == Storage::Segregated,
            T::segregation_map().is_some(),
            "component `{}` must provide a segregation map exactly when its storage is Segregated",
            type_name::<T>()
        );

        let mut inner = self.inner.write();
        let info = |id| TypeInfo {
            id,
            name: type_name::<T>(),
            storage,
            table_factory: (storage != Storage::Tag).then_some(new_table::<T> as TableFactory),
            segregation_factory: T::segregation_map,
        };
        match inner.by_type.get(&type_id).copied() {
            Some(id) => {
                if let TypeSlot::Resource { .. } = inner.slots[id as usize] {
                    inner.slots[id as usize] = TypeSlot::Component(info(id));
                }
                id
            }
            None => {
                let id = inner.slots.len() as TypeIdx;
                inner.push_slot(TypeSlot::Component(info(id)));
                inner.by_type.insert(type_id, id);
                inner.by_name.insert(type_name::<T>(), id);
                tracing::trace!(id, name = type_name::<T>(), ?storage, "registered component type");
                id
            }
        }
    }

    /// Id of resource type `T`, registering it on first use.
    ///
    /// Returns the component id when `T` is also a component.
    pub fn resource<T: 'static>(&self) -> TypeIdx {
        let type_id = TypeId::of::<T>();
        if let Some(&id) = self.inner.read().by_type.get(&type_id) {
            return id;
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.by_type.get(&type_id) {
            return id;
        }
        let id = inner.push_slot(TypeSlot::Resource { name: type_name::<T>() });
        inner.by_type.insert(type_id, id);
        inner.by_name.insert(type_name::<T>(), id);
        id
    }

    /// Id of `T` if it was registered in any role.
    pub fn id_of<T: 'static>(&self) -> Option<TypeIdx> {
        self.inner.read().by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Id of the registered type with the given Rust type name.
    pub fn id_by_name(&self, name: &str) -> Option<TypeIdx> {
        self.inner.read().by_name.get(name).copied()
    }

    /// Component metadata of `id`, if `id` is a registered component.
    pub fn info(&self, id: TypeIdx) -> Option<TypeInfo> {
        match self.inner.read().slots.get(id as usize) {
            Some(TypeSlot::Component(info)) => Some(*info),
            _ => None,
        }
    }

    /// Component type that owns virtual type `id`, if `id` is virtual.
    pub fn virtual_owner(&self, id: TypeIdx) -> Option<TypeIdx> {
        match self.inner.read().slots.get(id as usize) {
            Some(TypeSlot::Virtual { owner }) => Some(*owner),
            _ => None,
        }
    }

    /// Human-readable name of any id, for diagnostics.
    pub fn name_of(&self, id: TypeIdx) -> String {
        match self.inner.read().slots.get(id as usize) {
            Some(TypeSlot::Component(info)) => info.name.to_string(),
            Some(TypeSlot::Resource { name }) => (*name).to_string(),
            Some(TypeSlot::Virtual { owner }) => format!("virtual#{id}(owner {owner})"),
            Some(TypeSlot::Released) => format!("released#{id}"),
            None => format!("unknown#{id}"),
        }
    }

    /// Creates an empty table for component `id`.
    ///
    /// ## Panics
    /// If `id` is not a component with table storage.
    pub fn make_table(&self, id: TypeIdx) -> Box<dyn ErasedTable> {
        let factory = self
            .info(id)
            .and_then(|info| info.table_factory)
            .unwrap_or_else(|| panic!("type id {id} has no table storage"));
        factory()
    }

    /// Creates an empty segregation map for component `id`.
    ///
    /// ## Panics
    /// If `id` is not a value-segregated component.
    pub fn make_segregation_map(&self, id: TypeIdx) -> Box<dyn ErasedSegregationMap> {
        self.info(id)
            .and_then(|info| (info.segregation_factory)())
            .unwrap_or_else(|| panic!("type id {id} is not value-segregated"))
    }

    /// Allocates a virtual type owned by component `owner`.
    pub fn alloc_virtual(&self, owner: TypeIdx) -> TypeIdx {
        let mut inner = self.inner.write();
        match inner.free_virtual.pop() {
            Some(id) => {
                inner.slots[id as usize] = TypeSlot::Virtual { owner };
                id
            }
            None => inner.push_slot(TypeSlot::Virtual { owner }),
        }
    }

    /// Returns a virtual type to the pool.
    pub fn release_virtual(&self, id: TypeIdx) {
        let mut inner = self.inner.write();
        debug_assert!(matches!(inner.slots.get(id as usize), Some(TypeSlot::Virtual { .. })));
        inner.slots[id as usize] = TypeSlot::Released;
        inner.free_virtual.push(id);
    }

    /// Number of ids handed out so far, including pooled virtual ids.
    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    /// Returns `true` if nothing was registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
