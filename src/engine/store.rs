//! The category store: entity creation, component attach/remove and erase.
//!
//! This module owns every [`Category`], the [`Directory`] and the per-store
//! [`SegregationMaps`]. It is the only place where rows move between
//! categories.
//!
//! ## Structural operations
//!
//! Every structural operation follows the same shape:
//!
//! 1. compute the destination signature (type bit plus any implied
//!    virtual-type bit),
//! 2. find or create the destination category,
//! 3. move the row, which swap-erases it from the source,
//! 4. repoint the directory for the moved entity **and** for the entity that
//!    was swapped into the vacated source row.
//!
//! Misuse (unknown entity, double attach, remove of an absent type) panics: it
//! is a contract violation that would otherwise corrupt the directory.
//!
//! ## Concurrency model
//!
//! [`Store`] wraps its state in an `UnsafeCell` so that tasks holding disjoint
//! reservations can open views on the same store at once. Safe methods taking
//! `&mut self` need no further discipline. Views created inside scheduler tasks
//! go through crate-private unchecked accessors; the task's declared resources
//! (a read on the whole store for every view, a write for structural views)
//! make those accesses exclusive where required.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::access::{CapabilitySet, ReadOnly};
use crate::engine::category::Category;
use crate::engine::component::{push_component, Bundle, BundleColumns, Component, Stored};
use crate::engine::directory::{Directory, Entity, Location};
use crate::engine::error::InvariantViolation;
use crate::engine::query::{EditView, View};
use crate::engine::registry::TypeRegistry;
use crate::engine::segregation::SegregationMaps;
use crate::engine::types::{CategoryId, RowIdx, Signature};

/// Mutable state behind a [`Store`].
pub struct StoreData {
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) categories: Vec<Category>,
    pub(crate) by_signature: HashMap<Signature, CategoryId>,
    pub(crate) directory: Directory,
    pub(crate) segregation: SegregationMaps,
}

#[inline]
fn pair_mut(categories: &mut [Category], a: CategoryId, b: CategoryId) -> (&mut Category, &mut Category) {
    assert_ne!(a, b, "a row cannot migrate into its own category");
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    let (head, tail) = categories.split_at_mut(high as usize);
    let left = &mut head[low as usize];
    let right = &mut tail[0];
    if a < b { (left, right) } else { (right, left) }
}

impl StoreData {
    pub(crate) fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            categories: Vec::new(),
            by_signature: HashMap::new(),
            directory: Directory::new(),
            segregation: SegregationMaps::new(),
        }
    }

    /// Category with exactly `signature`, created on first use.
    pub(crate) fn category_for(&mut self, signature: &Signature) -> CategoryId {
        if let Some(&id) = self.by_signature.get(signature) {
            return id;
        }
        let id = self.categories.len() as CategoryId;
        self.categories.push(Category::new(id, signature.clone(), &self.registry));
        self.by_signature.insert(signature.clone(), id);
        tracing::debug!(category = id, ?signature, "created category");
        id
    }

    pub(crate) fn create<B: Bundle>(&mut self, bundle: B) -> Entity {
        let registry = Arc::clone(&self.registry);
        let mut signature = Signature::new();
        B::type_signature(&registry, &mut signature);
        assert_eq!(signature.len(), B::LEN, "bundle lists the same component type twice");
        bundle.segregate(&registry, &mut self.segregation, &mut signature);

        let category = self.category_for(&signature);
        let target = &mut self.categories[category as usize];
        bundle.push_into(&registry, target);
        let row = target.len();
        let entity = self.directory.allocate(Location { category, row });
        target.push_id(entity);
        entity
    }

    pub(crate) fn create_n<C: BundleColumns>(&mut self, columns: C) -> Vec<Entity> {
        columns.into_rows().into_iter().map(|row| self.create(row)).collect()
    }

    /// Moves `entity` from its current location into category `dest`.
    fn migrate(&mut self, entity: Entity, from: Location, dest: CategoryId) -> RowIdx {
        let (source, target) = pair_mut(&mut self.categories, from.category, dest);
        let (row, swapped) = source.migrate_row_to(from.row, target);
        self.directory.set(entity, Location { category: dest, row });
        if let Some(moved) = swapped {
            self.directory.set(moved, from);
        }
        row
    }

    pub(crate) fn attach<T: Component>(&mut self, entity: Entity, value: T) {
        let registry = Arc::clone(&self.registry);
        let from = self.directory.locate(entity);
        let ty = registry.component::<T>();
        let current = self.categories[from.category as usize].signature();
        assert!(
            !current.has(ty),
            "attach: {entity:?} already has `{}`",
            std::any::type_name::<T>()
        );

        let mut signature = current.with(ty);
        if let Some(bit) = self.segregation.virtual_for::<T>(&registry, &value) {
            signature.set(bit);
        }
        let dest = self.category_for(&signature);
        self.migrate(entity, from, dest);
        push_component(value, ty, &mut self.categories[dest as usize]);
    }

    pub(crate) fn remove<T: Component>(&mut self, entity: Entity) {
        let registry = Arc::clone(&self.registry);
        let from = self.directory.locate(entity);
        let ty = registry.component::<T>();
        let current = self.categories[from.category as usize].signature();
        assert!(
            current.has(ty),
            "remove: {entity:?} has no `{}`",
            std::any::type_name::<T>()
        );

        let mut signature = current.without(ty);
        for bit in current.iter() {
            if registry.virtual_owner(bit) == Some(ty) {
                signature.clear(bit);
            }
        }
        let dest = self.category_for(&signature);
        self.migrate(entity, from, dest);
    }

    pub(crate) fn erase(&mut self, entity: Entity) {
        let at = self.directory.locate(entity);
        if let Some(moved) = self.categories[at.category as usize].swap_erase(at.row) {
            self.directory.set(moved, at);
        }
        self.directory.release(entity);
    }

    /// Takes over a fully populated category whose signature is new to the store.
    ///
    /// Member ids are allocated here; the returned ids are in row order.
    pub(crate) fn adopt(&mut self, mut category: Category, rows: usize) -> Vec<Entity> {
        assert!(
            !self.by_signature.contains_key(category.signature()),
            "adopt: signature {:?} already has a category",
            category.signature()
        );
        let id = self.categories.len() as CategoryId;
        category.set_id(id);
        let ids: Vec<Entity> = (0..rows).map(|row| self.directory.allocate(Location { category: id, row })).collect();
        category.ids_mut().extend_from_slice(&ids);
        self.by_signature.insert(category.signature().clone(), id);
        self.categories.push(category);
        ids
    }

    /// Re-points the directory at every member of `category`.
    pub(crate) fn reindex(&mut self, category: CategoryId) {
        let members = &self.categories[category as usize];
        for (row, &entity) in members.ids().iter().enumerate() {
            self.directory.set(entity, Location { category, row });
        }
    }

    pub(crate) fn clear(&mut self) {
        self.categories.clear();
        self.by_signature.clear();
        self.directory.clear();
        self.segregation.release_all(&self.registry);
    }

    pub(crate) fn reclaim_empty_categories(&mut self) -> usize {
        let before = self.categories.len();
        let old = std::mem::take(&mut self.categories);
        self.by_signature.clear();
        for mut category in old.into_iter().filter(|c| !c.is_empty()) {
            let id = self.categories.len() as CategoryId;
            let moved = category.id() != id;
            category.set_id(id);
            self.by_signature.insert(category.signature().clone(), id);
            self.categories.push(category);
            if moved {
                self.reindex(id);
            }
        }
        let reclaimed = before - self.categories.len();
        tracing::debug!(reclaimed, "reclaimed empty categories");
        reclaimed
    }

    #[inline]
    pub(crate) fn exists(&self, entity: Entity) -> bool {
        self.directory.contains(entity)
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.directory.len()
    }

    pub(crate) fn get<T: Component>(&self, entity: Entity) -> Option<&T>
    where
        T::Storage: Stored,
    {
        let at = self.directory.get(entity)?;
        let ty = self.registry.id_of::<T>()?;
        let category = &self.categories[at.category as usize];
        category.signature().has(ty).then(|| &category.typed_table::<T>(ty).as_slice()[at.row])
    }

    pub(crate) fn validate(&self) -> Result<(), InvariantViolation> {
        for (entity, at) in self.directory.iter() {
            let found = self.categories.get(at.category as usize).and_then(|c| c.ids().get(at.row).copied());
            if found != Some(entity) {
                return Err(InvariantViolation::DirectoryMismatch {
                    entity,
                    category: at.category,
                    row: at.row,
                    found,
                });
            }
        }
        let mut stored = 0;
        for category in &self.categories {
            stored += category.len();
            for (_, table) in category.tables() {
                if table.len() != category.len() {
                    return Err(InvariantViolation::RowCountMismatch {
                        category: category.id(),
                        table: table.element_name(),
                        rows: table.len(),
                        ids: category.len(),
                    });
                }
            }
            for (row, &entity) in category.ids().iter().enumerate() {
                let expected = Location { category: category.id(), row };
                if self.directory.get(entity) != Some(expected) {
                    return Err(InvariantViolation::Orphan { entity, category: category.id(), row });
                }
            }
        }
        if stored != self.directory.len() {
            return Err(InvariantViolation::PopulationMismatch { directory: self.directory.len(), stored });
        }
        Ok(())
    }
}

/// In-memory entity/component store.
///
/// ## Example
/// ```ignore
/// let registry = Arc::new(TypeRegistry::new());
/// let mut store = Store::new(registry);
/// let e = store.create((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 0.0 }));
/// store.attach(e, Health(10));
/// assert_eq!(store.view::<(Read<Position>,)>().query::<&Position>().with::<Health>().count(), 1);
/// ```
pub struct Store {
    data: UnsafeCell<StoreData>,
}

// SAFETY: shared access is read-only on the safe surface; concurrent mutation
// only happens through task views whose reservations exclude conflicting tasks.
unsafe impl Sync for Store {}

impl Store {
    /// Creates an empty store bound to `registry`.
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { data: UnsafeCell::new(StoreData::new(registry)) }
    }

    #[inline]
    pub(crate) fn data(&self) -> &StoreData {
        // SAFETY: see the type-level comment; `&self` paths only read.
        unsafe { &*self.data.get() }
    }

    #[inline]
    pub(crate) fn data_mut(&mut self) -> &mut StoreData {
        self.data.get_mut()
    }

    /// Shared state for a view opened inside a task.
    ///
    /// # Safety
    /// The calling task must hold at least a read reservation on the store.
    #[inline]
    pub(crate) unsafe fn data_unchecked(&self) -> &StoreData {
        unsafe { &*self.data.get() }
    }

    /// Exclusive state for a structural view opened inside a task.
    ///
    /// # Safety
    /// The calling task must hold a write reservation on the store.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub(crate) unsafe fn data_mut_unchecked(&self) -> &mut StoreData {
        unsafe { &mut *self.data.get() }
    }

    /// Registry shared with this store.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.data().registry
    }

    /// Creates one entity holding every component of `bundle`.
    pub fn create<B: Bundle>(&mut self, bundle: B) -> Entity {
        self.data_mut().create(bundle)
    }

    /// Creates one entity per row of equally long component arrays.
    pub fn create_n<C: BundleColumns>(&mut self, columns: C) -> Vec<Entity> {
        self.data_mut().create_n(columns)
    }

    /// Adds a component; panics if `entity` is dead or already has `T`.
    pub fn attach<T: Component>(&mut self, entity: Entity, value: T) {
        self.data_mut().attach(entity, value)
    }

    /// Removes component `T`; panics if `entity` is dead or lacks `T`.
    pub fn remove<T: Component>(&mut self, entity: Entity) {
        self.data_mut().remove::<T>(entity)
    }

    /// Deletes `entity` and all its components; panics if it is dead.
    pub fn erase(&mut self, entity: Entity) {
        self.data_mut().erase(entity)
    }

    /// Deletes every entity in `entities`.
    pub fn erase_many(&mut self, entities: &[Entity]) {
        let data = self.data_mut();
        for &entity in entities {
            data.erase(entity);
        }
    }

    /// Deletes everything and releases all virtual types back to the registry.
    pub fn clear(&mut self) {
        self.data_mut().clear()
    }

    /// Drops empty categories; returns how many were dropped.
    pub fn reclaim_empty_categories(&mut self) -> usize {
        self.data_mut().reclaim_empty_categories()
    }

    /// Returns `true` if `entity` is alive.
    pub fn exists(&self, entity: Entity) -> bool {
        self.data().exists(entity)
    }

    /// Number of live entities.
    pub fn size(&self) -> usize {
        self.data().size()
    }

    /// Returns `true` if `entity` is alive and has component `T`.
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        let data = self.data();
        match (data.directory.get(entity), data.registry.id_of::<T>()) {
            (Some(at), Some(ty)) => data.categories[at.category as usize].signature().has(ty),
            _ => false,
        }
    }

    /// Component `T` of `entity`, if present.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T>
    where
        T::Storage: Stored,
    {
        self.data().get(entity)
    }

    /// Signature of the category holding `entity`.
    pub fn signature_of(&self, entity: Entity) -> Option<&Signature> {
        let data = self.data();
        let at = data.directory.get(entity)?;
        Some(data.categories[at.category as usize].signature())
    }

    /// Number of categories, including empty ones not yet reclaimed.
    pub fn category_count(&self) -> usize {
        self.data().categories.len()
    }

    /// Every category in arena order.
    pub fn categories(&self) -> &[Category] {
        &self.data().categories
    }

    /// Category with exactly `signature`, if it exists.
    pub fn category_by_signature(&self, signature: &Signature) -> Option<&Category> {
        let data = self.data();
        data.by_signature.get(signature).map(|&id| &data.categories[id as usize])
    }

    /// Location of `entity`.
    pub fn locate(&self, entity: Entity) -> Option<Location> {
        self.data().directory.get(entity)
    }

    /// Number of distinct values seen for segregated component `T`.
    pub fn distinct_values<T: Component>(&self) -> usize {
        let data = self.data();
        data.registry.id_of::<T>().map_or(0, |ty| data.segregation.distinct_values(ty))
    }

    /// Audits the directory against every category.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        self.data().validate()
    }

    /// Read-only view over the capability set `C`.
    pub fn view<C: CapabilitySet + ReadOnly>(&self) -> View<'_, C> {
        View::new(self.data())
    }

    /// View over `C`, which may include write capabilities.
    pub fn view_mut<C: CapabilitySet>(&mut self) -> View<'_, C> {
        View::new(self.data_mut())
    }

    /// Structural view over `C`.
    pub fn edit<C: CapabilitySet>(&mut self) -> EditView<'_, C> {
        EditView::new(self.data_mut())
    }
}
