//! Dense single-type component tables and their type-erased interface.
//!
//! A [`Table<T>`] is a contiguous `Vec<T>` holding one value per row of the
//! category that owns it. Nothing outside the table knows `T`; categories and
//! the store drive tables only through the fixed operation set of
//! [`ErasedTable`]:
//!
//! - `swap_erase` and `move_row_to` keep the table dense (the last row fills
//!   the vacated slot),
//! - `reorder` and `swap_adjacent` replay a sort computed elsewhere,
//! - `serialize_range` / `deserialize_append` delegate the element codec to the
//!   [`Codec`] registered for `T`,
//! - `for_each_id_field` exposes entity references stored inside values.
//!
//! Cross-table consistency (every table of a category having the same row
//! count as its id list) is the category's responsibility, never the table's.
//!
//! # Concurrent access
//!
//! Rows live in an `UnsafeCell` so that views running in different tasks can
//! hold `&mut T` to one table and `&U` to another inside the same category.
//! Structural operations take `&mut self`; element access from views goes
//! through [`Table::column_ptr`], whose callers must hold a task reservation
//! covering the component type.

use std::any::{type_name, Any};
use std::cell::UnsafeCell;
use std::ops::Range;

use crate::engine::component::Component;
use crate::engine::directory::Entity;
use crate::engine::error::{SnapshotError, SnapshotResult};
use crate::engine::snapshot::Codec;
use crate::engine::types::RowIdx;

/// Fixed operation set every component table exposes.
pub trait ErasedTable: Any + Send + Sync {
    /// Upcast for downcasting to the concrete table.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete table.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Name of the element type.
    fn element_name(&self) -> &'static str;

    /// Number of rows.
    fn len(&self) -> usize;

    /// Returns `true` if the table holds no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes `row` by moving the last row into it.
    fn swap_erase(&mut self, row: RowIdx);

    /// Appends `row` to `dest` (same element type), then swap-erases it here.
    fn move_row_to(&mut self, row: RowIdx, dest: &mut dyn ErasedTable);

    /// Rearranges rows so that new row `i` is old row `permutation[i]`.
    fn reorder(&mut self, permutation: &[usize]);

    /// Swaps rows `i` and `i + 1` for every `i` in `swaps`, in order.
    fn swap_adjacent(&mut self, swaps: &[usize]);

    /// Drops every row.
    fn clear(&mut self);

    /// Returns `true` if the element type carries a snapshot codec.
    fn has_codec(&self) -> bool;

    /// Encodes `range` with the element codec.
    fn serialize_range(&self, range: Range<RowIdx>) -> SnapshotResult<Vec<u8>>;

    /// Decodes rows and appends them; returns how many were appended.
    fn deserialize_append(&mut self, bytes: &[u8]) -> SnapshotResult<usize>;

    /// Visits every entity reference stored in the rows of `range`.
    fn for_each_id_field(&mut self, range: Range<RowIdx>, visit: &mut dyn FnMut(&mut Entity));
}

/// Dense storage for one component type.
pub struct Table<T: Component> {
    rows: UnsafeCell<Vec<T>>,
    codec: Option<Codec<T>>,
}

// SAFETY: shared access only hands out element pointers; the scheduler's
// resource reservations keep writers of a type exclusive.
unsafe impl<T: Component> Sync for Table<T> {}

impl<T: Component> Default for Table<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> Table<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { rows: UnsafeCell::new(Vec::new()), codec: T::codec() }
    }

    #[inline]
    fn rows(&self) -> &Vec<T> {
        // SAFETY: only the length and buffer pointer are read here; element
        // writers go through raw pointers and never resize.
        unsafe { &*self.rows.get() }
    }

    #[inline]
    fn rows_mut(&mut self) -> &mut Vec<T> {
        self.rows.get_mut()
    }

    /// Appends one row.
    #[inline]
    pub fn push(&mut self, value: T) {
        self.rows_mut().push(value);
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows().len()
    }

    /// Returns `true` if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row values as a slice.
    ///
    /// Only sound while no task holds write access to `T`; the store exposes it
    /// through exclusive or read-only paths.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        self.rows().as_slice()
    }

    /// Mutable row values.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.rows_mut().as_mut_slice()
    }

    /// Base pointer of the row buffer.
    ///
    /// # Safety
    /// The caller must hold a reservation covering `T` (write for mutation) and
    /// must not use the pointer across a structural change of the category.
    #[inline]
    pub(crate) unsafe fn column_ptr(&self) -> *mut T {
        self.rows().as_ptr() as *mut T
    }

    /// Removes and returns `row`, moving the last row into its place.
    #[inline]
    pub fn swap_take(&mut self, row: RowIdx) -> T {
        self.rows_mut().swap_remove(row)
    }
}

impl<T: Component> ErasedTable for Table<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn element_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn len(&self) -> usize {
        Table::len(self)
    }

    fn swap_erase(&mut self, row: RowIdx) {
        self.rows_mut().swap_remove(row);
    }

    fn move_row_to(&mut self, row: RowIdx, dest: &mut dyn ErasedTable) {
        let dest_name = dest.element_name();
        let Some(dest) = dest.as_any_mut().downcast_mut::<Table<T>>() else {
            panic!("move_row_to: table of `{}` cannot receive rows from `{}`", dest_name, type_name::<T>());
        };
        let value = self.rows_mut().swap_remove(row);
        dest.push(value);
    }

    fn reorder(&mut self, permutation: &[usize]) {
        let rows = self.rows_mut();
        assert_eq!(permutation.len(), rows.len(), "reorder: permutation length mismatch");
        let mut old: Vec<Option<T>> = std::mem::take(rows).into_iter().map(Some).collect();
        rows.extend(permutation.iter().map(|&from| {
            old[from].take().unwrap_or_else(|| panic!("reorder: row {from} used twice"))
        }));
    }

    fn swap_adjacent(&mut self, swaps: &[usize]) {
        let rows = self.rows_mut();
        for &i in swaps {
            rows.swap(i, i + 1);
        }
    }

    fn clear(&mut self) {
        self.rows_mut().clear();
    }

    fn has_codec(&self) -> bool {
        self.codec.is_some()
    }

    fn serialize_range(&self, range: Range<RowIdx>) -> SnapshotResult<Vec<u8>> {
        let codec = self.codec.ok_or_else(|| SnapshotError::MissingCodec(type_name::<T>().to_string()))?;
        let rows = self.rows();
        if range.end > rows.len() || range.start > range.end {
            return Err(SnapshotError::Corrupt(format!(
                "range {range:?} outside table `{}` of {} rows",
                type_name::<T>(),
                rows.len()
            )));
        }
        codec.encode(&rows[range])
    }

    fn deserialize_append(&mut self, bytes: &[u8]) -> SnapshotResult<usize> {
        let codec = self.codec.ok_or_else(|| SnapshotError::MissingCodec(type_name::<T>().to_string()))?;
        let decoded = codec.decode(bytes)?;
        let count = decoded.len();
        self.rows_mut().extend(decoded);
        Ok(count)
    }

    fn for_each_id_field(&mut self, range: Range<RowIdx>, visit: &mut dyn FnMut(&mut Entity)) {
        for value in &mut self.rows_mut()[range] {
            value.for_each_id_field(visit);
        }
    }
}
