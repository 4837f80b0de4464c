//! Store snapshots.
//!
//! A snapshot is an `rmp-serde` envelope listing every non-empty category by
//! the type names of its signature, with one encoded byte blob per table.
//! Element encoding is delegated to the [`Codec`] a component declares through
//! [`Component::codec`]; types without a codec are left out of the snapshot.
//!
//! ## Entity references
//! Entities are numbered compactly in arena order (category, then row),
//! starting at 1; 0 stands for "no live entity". Before a table is encoded its
//! `Entity` fields are rewritten into that numbering through
//! [`Component::for_each_id_field`], and restored afterwards. On load the
//! numbering is mapped onto the freshly allocated handles.
//!
//! ## Value segregation
//! Virtual-type bits are not stored. They are recomputed on load from the
//! first row of each category, since every row of a category shares the value.
//!
//! ## Example
//! ```ignore
//! let bytes = store.serialize()?;
//! let restored = Store::deserialize(Arc::clone(store.registry()), &bytes)?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::engine::category::Category;
use crate::engine::component::{Component, Storage};
use crate::engine::directory::{Entity, Location};
use crate::engine::error::{SnapshotError, SnapshotResult};
use crate::engine::registry::TypeRegistry;
use crate::engine::store::{Store, StoreData};
use crate::engine::table::ErasedTable;
use crate::engine::types::{CategoryId, Signature};

const FORMAT_VERSION: u32 = 1;

/// Element codec of one component type.
pub struct Codec<T> {
    encode: fn(&[T]) -> SnapshotResult<Vec<u8>>,
    decode: fn(&[u8]) -> SnapshotResult<Vec<T>>,
}

impl<T> Clone for Codec<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Codec<T> {}

impl<T> Codec<T> {
    /// Codec from explicit encode/decode functions.
    pub fn new(encode: fn(&[T]) -> SnapshotResult<Vec<u8>>, decode: fn(&[u8]) -> SnapshotResult<Vec<T>>) -> Self {
        Self { encode, decode }
    }

    /// Encodes a run of rows.
    pub fn encode(&self, rows: &[T]) -> SnapshotResult<Vec<u8>> {
        (self.encode)(rows)
    }

    /// Decodes a run of rows.
    pub fn decode(&self, bytes: &[u8]) -> SnapshotResult<Vec<T>> {
        (self.decode)(bytes)
    }
}

fn encode_serde<T: Serialize>(rows: &[T]) -> SnapshotResult<Vec<u8>> {
    Ok(rmp_serde::to_vec(rows)?)
}

fn decode_serde<T: DeserializeOwned>(bytes: &[u8]) -> SnapshotResult<Vec<T>> {
    Ok(rmp_serde::from_slice(bytes)?)
}

impl<T: Serialize + DeserializeOwned> Codec<T> {
    /// MessagePack codec through `serde`.
    pub fn serde() -> Self {
        Self::new(encode_serde::<T>, decode_serde::<T>)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    categories: Vec<CategoryRecord>,
}

#[derive(Serialize, Deserialize)]
struct CategoryRecord {
    types: Vec<String>,
    rows: u32,
    tables: Vec<TableRecord>,
}

#[derive(Serialize, Deserialize)]
struct TableRecord {
    ty: String,
    bytes: Vec<u8>,
}

/// Rewrites every id field of `table` in place, remembering the originals.
fn compact_ids(
    table: &mut dyn ErasedTable,
    numbering: &HashMap<Entity, u64>,
) -> Vec<Entity> {
    let len = table.len();
    let mut originals = Vec::new();
    table.for_each_id_field(0..len, &mut |id| {
        originals.push(*id);
        *id = Entity::from_bits(numbering.get(id).copied().unwrap_or(0));
    });
    originals
}

fn restore_ids(table: &mut dyn ErasedTable, originals: &[Entity]) {
    let len = table.len();
    let mut next = originals.iter();
    table.for_each_id_field(0..len, &mut |id| {
        if let Some(&original) = next.next() {
            *id = original;
        }
    });
}

fn row_count(len: usize) -> SnapshotResult<u32> {
    u32::try_from(len).map_err(|_| SnapshotError::TooManyRows(len))
}

impl StoreData {
    fn snapshot(&mut self) -> SnapshotResult<Vec<u8>> {
        let mut numbering = HashMap::new();
        for category in &self.categories {
            for &entity in category.ids() {
                let next = numbering.len() as u64 + 1;
                numbering.insert(entity, next);
            }
        }

        let registry = Arc::clone(&self.registry);
        let mut records = Vec::new();
        for category in self.categories.iter_mut().filter(|c| !c.is_empty()) {
            let rows = row_count(category.len())?;
            let mut types = Vec::new();
            for ty in category.signature().iter() {
                let Some(info) = registry.info(ty) else { continue };
                if info.has_table() && !category.table(ty).is_some_and(|t| t.has_codec()) {
                    tracing::debug!(component = info.name, "no codec, left out of snapshot");
                    continue;
                }
                types.push(info.name.to_string());
            }

            let mut tables = Vec::new();
            for ty in category.table_ids().to_vec() {
                let Some(table) = category.table_mut(ty) else { continue };
                if !table.has_codec() {
                    continue;
                }
                let originals = compact_ids(table, &numbering);
                let encoded = table.serialize_range(0..table.len());
                restore_ids(table, &originals);
                tables.push(TableRecord { ty: table.element_name().to_string(), bytes: encoded? });
            }

            records.push(CategoryRecord { types, rows, tables });
        }

        let envelope = Envelope { version: FORMAT_VERSION, categories: records };
        let bytes = rmp_serde::to_vec(&envelope)?;
        tracing::debug!(categories = envelope.categories.len(), entities = numbering.len(), bytes = bytes.len(), "wrote snapshot");
        Ok(bytes)
    }

    fn restore(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        let envelope: Envelope = rmp_serde::from_slice(bytes)?;
        if envelope.version != FORMAT_VERSION {
            return Err(SnapshotError::Corrupt(format!("unsupported snapshot version {}", envelope.version)));
        }
        let registry = Arc::clone(&self.registry);
        let resolve = |name: &str| registry.id_by_name(name).ok_or_else(|| SnapshotError::UnknownType(name.to_string()));

        let mut handles: Vec<Entity> = Vec::new();
        for record in envelope.categories {
            let rows = record.rows as usize;
            let mut signature = Signature::new();
            for name in &record.types {
                signature.set(resolve(name)?);
            }
            let mut staging = Category::new(0, signature.clone(), &registry);

            for table in &record.tables {
                let ty = resolve(&table.ty)?;
                let target = staging
                    .table_mut(ty)
                    .ok_or_else(|| SnapshotError::Corrupt(format!("table `{}` outside its category signature", table.ty)))?;
                let appended = target.deserialize_append(&table.bytes)?;
                if appended != rows {
                    return Err(SnapshotError::Corrupt(format!(
                        "table `{}` holds {appended} rows, category holds {rows}",
                        table.ty
                    )));
                }
            }
            if let Some(ty) = staging.table_ids().iter().copied().find(|&ty| staging.table(ty).is_some_and(|t| t.len() != rows)) {
                return Err(SnapshotError::Corrupt(format!("no data for table `{}`", registry.name_of(ty))));
            }

            if rows > 0 {
                for ty in signature.iter() {
                    if registry.info(ty).is_some_and(|info| info.storage == Storage::Segregated) {
                        let table = staging.table(ty).ok_or_else(|| SnapshotError::MissingCodec(registry.name_of(ty)))?;
                        let bit = self.segregation.virtual_for_row(&registry, ty, table, 0);
                        let mut full = staging.signature().clone();
                        full.set(bit);
                        staging.set_signature(full);
                    }
                }
            }
            // Records collapse into one category when codec-less types were left out.
            let ids = match self.by_signature.get(staging.signature()).copied() {
                Some(existing) => self.append_rows(existing, &record.tables, rows)?,
                None => self.adopt(staging, rows),
            };
            handles.extend(ids);
        }

        for category in &mut self.categories {
            let len = category.len();
            for ty in category.table_ids().to_vec() {
                if let Some(table) = category.table_mut(ty) {
                    table.for_each_id_field(0..len, &mut |id| {
                        let compact = id.to_bits() as usize;
                        *id = compact.checked_sub(1).and_then(|at| handles.get(at).copied()).unwrap_or(Entity::INVALID);
                    });
                }
            }
        }
        tracing::debug!(entities = handles.len(), categories = self.categories.len(), "restored snapshot");
        Ok(())
    }
}

impl StoreData {
    fn append_rows(&mut self, id: CategoryId, tables: &[TableRecord], rows: usize) -> SnapshotResult<Vec<Entity>> {
        let registry = Arc::clone(&self.registry);
        let category = &mut self.categories[id as usize];
        let base = category.len();
        for table in tables {
            let ty = registry.id_by_name(&table.ty).ok_or_else(|| SnapshotError::UnknownType(table.ty.clone()))?;
            if let Some(target) = category.table_mut(ty) {
                target.deserialize_append(&table.bytes)?;
            }
        }
        let ids: Vec<Entity> = (0..rows).map(|row| self.directory.allocate(Location { category: id, row: base + row })).collect();
        self.categories[id as usize].ids_mut().extend_from_slice(&ids);
        Ok(ids)
    }
}

impl Store {
    /// Encodes every entity whose components carry a codec.
    ///
    /// Takes `&mut self` because id fields are rewritten in place while a
    /// table is encoded.
    pub fn serialize(&mut self) -> SnapshotResult<Vec<u8>> {
        self.data_mut().snapshot()
    }

    /// Builds a new store from a snapshot.
    ///
    /// Every component type named by the snapshot must already be registered
    /// in `registry`. Entity handles are fresh; references between entities
    /// are preserved.
    pub fn deserialize(registry: Arc<TypeRegistry>, bytes: &[u8]) -> SnapshotResult<Store> {
        let mut store = Store::new(registry);
        store.data_mut().restore(bytes)?;
        Ok(store)
    }

    /// Registers `T` so snapshots naming it can be loaded.
    pub fn register<T: Component>(&self) {
        self.registry().component::<T>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_counts_beyond_u32_are_rejected() {
        assert_eq!(row_count(7).unwrap(), 7);
        assert_eq!(row_count(u32::MAX as usize).unwrap(), u32::MAX);
        if let Ok(len) = usize::try_from(u64::from(u32::MAX) + 1) {
            assert!(matches!(row_count(len), Err(SnapshotError::TooManyRows(n)) if n == len));
        }
    }
}
