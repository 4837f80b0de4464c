//! Categories: one per distinct signature.
//!
//! ## Purpose
//! A [`Category`] owns every entity whose signature equals its own. It keeps
//! one [`ErasedTable`] per concrete (table-backed) type bit and a dense list of
//! member ids; the position of an id in that list is the row index into every
//! table.
//!
//! ## Invariants
//! - `ids[row]` and `table.row(row)` describe the same entity for every table.
//! - Every table has exactly `ids.len()` rows once an operation completes.
//! - Virtual-type bits and tag bits appear in the signature but own no table.
//!
//! ## Row relocation
//! Every operation that vacates a row fills it with the last row. The methods
//! here report the entity swapped into the vacated slot; updating the directory
//! for it is the caller's job.

use std::any::type_name;

use crate::engine::component::Component;
use crate::engine::directory::Entity;
use crate::engine::registry::TypeRegistry;
use crate::engine::table::{ErasedTable, Table};
use crate::engine::types::{CategoryId, RowIdx, Signature, TypeIdx};

/// Entities sharing one exact signature, plus their tables.
pub struct Category {
    id: CategoryId,
    signature: Signature,
    tables: Vec<Option<Box<dyn ErasedTable>>>,
    table_ids: Vec<TypeIdx>,
    ids: Vec<Entity>,
}

impl std::fmt::Debug for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Category")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("rows", &self.ids.len())
            .finish()
    }
}

impl Category {
    /// Creates an empty category, allocating a table for each table-backed bit.
    pub(crate) fn new(id: CategoryId, signature: Signature, registry: &TypeRegistry) -> Self {
        let mut tables: Vec<Option<Box<dyn ErasedTable>>> = Vec::new();
        let mut table_ids = Vec::new();
        for ty in signature.iter() {
            let Some(info) = registry.info(ty) else { continue };
            if !info.has_table() {
                continue;
            }
            let slot = ty as usize;
            if tables.len() <= slot {
                tables.resize_with(slot + 1, || None);
            }
            tables[slot] = Some(registry.make_table(ty));
            table_ids.push(ty);
        }
        Self { id, signature, tables, table_ids, ids: Vec::new() }
    }

    /// Arena index of this category.
    #[inline]
    pub fn id(&self) -> CategoryId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: CategoryId) {
        self.id = id;
    }

    pub(crate) fn set_signature(&mut self, signature: Signature) {
        self.signature = signature;
    }

    /// Signature shared by every member.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Member ids in row order.
    #[inline]
    pub fn ids(&self) -> &[Entity] {
        &self.ids
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the category has no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids of types that own a table here, ascending.
    #[inline]
    pub fn table_ids(&self) -> &[TypeIdx] {
        &self.table_ids
    }

    /// Table of type `ty`, if this category owns one.
    #[inline]
    pub fn table(&self, ty: TypeIdx) -> Option<&dyn ErasedTable> {
        self.tables.get(ty as usize)?.as_deref()
    }

    #[inline]
    pub(crate) fn table_mut(&mut self, ty: TypeIdx) -> Option<&mut dyn ErasedTable> {
        match self.tables.get_mut(ty as usize) {
            Some(Some(table)) => Some(table.as_mut()),
            _ => None,
        }
    }

    /// Typed table of component `T` with id `ty`.
    ///
    /// ## Panics
    /// If the category owns no table for `ty` or it holds another type.
    pub fn typed_table<T: Component>(&self, ty: TypeIdx) -> &Table<T> {
        self.table(ty)
            .and_then(|table| table.as_any().downcast_ref::<Table<T>>())
            .unwrap_or_else(|| panic!("category {} has no table for `{}`", self.id, type_name::<T>()))
    }

    pub(crate) fn typed_table_mut<T: Component>(&mut self, ty: TypeIdx) -> &mut Table<T> {
        let id = self.id;
        self.table_mut(ty)
            .and_then(|table| table.as_any_mut().downcast_mut::<Table<T>>())
            .unwrap_or_else(|| panic!("category {id} has no table for `{}`", type_name::<T>()))
    }

    /// Appends a member id; its values must already be pushed to every table.
    pub(crate) fn push_id(&mut self, entity: Entity) -> RowIdx {
        self.ids.push(entity);
        self.ids.len() - 1
    }

    /// Swap-erases `row` from every table and the id list.
    ///
    /// Returns the entity now occupying `row`, if any.
    pub(crate) fn swap_erase(&mut self, row: RowIdx) -> Option<Entity> {
        for &ty in &self.table_ids {
            if let Some(table) = self.tables[ty as usize].as_mut() {
                table.swap_erase(row);
            }
        }
        self.ids.swap_remove(row);
        self.ids.get(row).copied()
    }

    /// Moves `row` into `dest`.
    ///
    /// Values of types present in both categories move; values of types absent
    /// from `dest` are dropped. Returns the new row in `dest` and the entity
    /// swapped into `row` here, if any.
    pub(crate) fn migrate_row_to(&mut self, row: RowIdx, dest: &mut Category) -> (RowIdx, Option<Entity>) {
        for &ty in &self.table_ids {
            let Some(source) = self.tables[ty as usize].as_mut() else { continue };
            match dest.table_mut(ty) {
                Some(target) => source.move_row_to(row, target),
                None => source.swap_erase(row),
            }
        }
        let entity = self.ids.swap_remove(row);
        let new_row = dest.push_id(entity);
        (new_row, self.ids.get(row).copied())
    }

    /// Applies a row permutation (`new[i] = old[permutation[i]]`) to every table and the ids.
    pub(crate) fn reorder(&mut self, permutation: &[usize]) {
        for &ty in &self.table_ids {
            if let Some(table) = self.tables[ty as usize].as_mut() {
                table.reorder(permutation);
            }
        }
        let old = std::mem::take(&mut self.ids);
        self.ids = permutation.iter().map(|&from| old[from]).collect();
    }

    /// Replays a list of adjacent swaps on every table and the ids.
    pub(crate) fn swap_adjacent(&mut self, swaps: &[usize]) {
        for &ty in &self.table_ids {
            if let Some(table) = self.tables[ty as usize].as_mut() {
                table.swap_adjacent(swaps);
            }
        }
        for &i in swaps {
            self.ids.swap(i, i + 1);
        }
    }

    /// Iterates over every owned table.
    pub fn tables(&self) -> impl Iterator<Item = (TypeIdx, &dyn ErasedTable)> + '_ {
        self.table_ids.iter().filter_map(|&ty| Some((ty, self.table(ty)?)))
    }

    pub(crate) fn ids_mut(&mut self) -> &mut Vec<Entity> {
        &mut self.ids
    }
}
