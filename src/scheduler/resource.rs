//! Resource reservations and per-context resource storage.
//!
//! ## Admission counters
//! Every context tracks, per resource id, how many admitted tasks currently
//! read it and whether one writes it:
//!
//! | Request | Admitted when |
//! |---------|---------------|
//! | read `R` | no admitted task writes `R` |
//! | write `R` | no admitted task reads or writes `R` |
//!
//! A [`Reservation`] is taken atomically for the whole access set of a task
//! and released when the last holder drops it (the task itself, plus any
//! deferred parallel job it issued).
//!
//! ## Resource storage
//! [`ResourceMap`] holds one value per Rust type for tasks to borrow through
//! their scope. Cross-task exclusion comes from the reservation; within a task,
//! [`BorrowFlags`] applies the usual one-writer-or-many-readers rule at
//! runtime.

use std::any::{type_name, Any};
use std::cell::{RefCell, UnsafeCell};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::engine::types::{AccessSets, TypeIdx};
use crate::scheduler::pool::Shared;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Holders {
    pub readers: u32,
    pub writer: bool,
}

/// Per-resource read/write holder counts of one context.
#[derive(Default, Debug)]
pub(crate) struct ResourceCounters {
    held: HashMap<TypeIdx, Holders>,
}

impl ResourceCounters {
    /// Returns `true` if `access` can be reserved now.
    pub fn admits(&self, access: &AccessSets) -> bool {
        let free_of_writer = |id: TypeIdx| self.held.get(&id).map_or(true, |h| !h.writer);
        let untouched = |id: TypeIdx| self.held.get(&id).map_or(true, |h| !h.writer && h.readers == 0);
        access.read.iter().all(free_of_writer) && access.write.iter().all(untouched)
    }

    pub fn reserve(&mut self, access: &AccessSets) {
        for id in access.read.iter() {
            self.held.entry(id).or_default().readers += 1;
        }
        for id in access.write.iter() {
            let holders = self.held.entry(id).or_default();
            debug_assert!(!holders.writer && holders.readers == 0);
            holders.writer = true;
        }
    }

    pub fn release(&mut self, access: &AccessSets) {
        for id in access.read.iter() {
            if let Some(holders) = self.held.get_mut(&id) {
                holders.readers -= 1;
            }
        }
        for id in access.write.iter() {
            if let Some(holders) = self.held.get_mut(&id) {
                holders.writer = false;
            }
        }
        self.held.retain(|_, h| h.writer || h.readers > 0);
    }

    /// Currently held resources, ascending by id.
    pub fn held(&self) -> Vec<(TypeIdx, Holders)> {
        let mut held: Vec<_> = self.held.iter().map(|(&id, &h)| (id, h)).collect();
        held.sort_unstable_by_key(|&(id, _)| id);
        held
    }
}

/// Resources held by one admitted task; released on drop.
pub(crate) struct Reservation {
    counters: Arc<Mutex<ResourceCounters>>,
    access: AccessSets,
    shared: Arc<Shared>,
}

impl Reservation {
    /// Reserves `access`; the caller must have checked `admits` under the same lock.
    pub fn take(counters: &Arc<Mutex<ResourceCounters>>, guard: &mut ResourceCounters, access: AccessSets, shared: &Arc<Shared>) -> Self {
        guard.reserve(&access);
        Self { counters: Arc::clone(counters), access, shared: Arc::clone(shared) }
    }

    pub fn access(&self) -> &AccessSets {
        &self.access
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.counters.lock().release(&self.access);
        self.shared.notify();
    }
}

struct ResourceCell<T>(UnsafeCell<T>);

// SAFETY: values are only reached through task scopes whose reservations
// serialize writers against every other holder.
unsafe impl<T: Send + Sync> Sync for ResourceCell<T> {}

/// One value per resource id, owned by a context.
#[derive(Default)]
pub(crate) struct ResourceMap {
    cells: RwLock<HashMap<TypeIdx, Box<dyn Any + Send + Sync>>>,
}

impl ResourceMap {
    pub fn insert<T: Send + Sync + 'static>(&self, id: TypeIdx, value: T) -> Option<T> {
        let cell: Box<dyn Any + Send + Sync> = Box::new(ResourceCell(UnsafeCell::new(value)));
        let previous = self.cells.write().insert(id, cell)?;
        previous.downcast::<ResourceCell<T>>().ok().map(|cell| cell.0.into_inner())
    }

    pub fn take<T: Send + Sync + 'static>(&self, id: TypeIdx) -> Option<T> {
        let cell = self.cells.write().remove(&id)?;
        cell.downcast::<ResourceCell<T>>().ok().map(|cell| cell.0.into_inner())
    }

    pub fn contains(&self, id: TypeIdx) -> bool {
        self.cells.read().contains_key(&id)
    }

    /// Stable pointer to the value of `id`.
    ///
    /// The pointer stays valid until the value is replaced or taken, which the
    /// context only allows while no task runs.
    pub fn ptr<T: Send + Sync + 'static>(&self, id: TypeIdx) -> Option<*mut T> {
        let cells = self.cells.read();
        let cell = cells.get(&id)?.downcast_ref::<ResourceCell<T>>()?;
        Some(cell.0.get())
    }

    pub fn ids(&self) -> Vec<TypeIdx> {
        let mut ids: Vec<_> = self.cells.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Runtime borrow state of the resources one task touches.
///
/// Positive counts are shared borrows, `-1` is an exclusive borrow.
#[derive(Default)]
pub(crate) struct BorrowFlags {
    states: RefCell<HashMap<TypeIdx, isize>>,
}

impl BorrowFlags {
    fn acquire_read<T>(&self, id: TypeIdx) {
        let mut states = self.states.borrow_mut();
        let state = states.entry(id).or_insert(0);
        assert!(*state >= 0, "`{}` is already borrowed mutably by this task", type_name::<T>());
        *state += 1;
    }

    fn acquire_write<T>(&self, id: TypeIdx) {
        let mut states = self.states.borrow_mut();
        let state = states.entry(id).or_insert(0);
        assert!(*state == 0, "`{}` is already borrowed by this task", type_name::<T>());
        *state = -1;
    }

    fn release(&self, id: TypeIdx) {
        let mut states = self.states.borrow_mut();
        if let Some(state) = states.get_mut(&id) {
            *state = if *state > 0 { *state - 1 } else { 0 };
        }
    }
}

/// Shared borrow of a context resource, held for the guard's lifetime.
pub struct Res<'s, T> {
    value: &'s T,
    flags: &'s BorrowFlags,
    id: TypeIdx,
}

impl<'s, T> Res<'s, T> {
    /// # Safety
    /// `ptr` must stay valid for `'s` and the task must hold read access to `id`.
    pub(crate) unsafe fn new(ptr: *const T, flags: &'s BorrowFlags, id: TypeIdx) -> Self {
        flags.acquire_read::<T>(id);
        Self { value: unsafe { &*ptr }, flags, id }
    }
}

impl<T> Deref for Res<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> Drop for Res<'_, T> {
    fn drop(&mut self) {
        self.flags.release(self.id);
    }
}

/// Exclusive borrow of a context resource, held for the guard's lifetime.
pub struct ResMut<'s, T> {
    value: &'s mut T,
    flags: &'s BorrowFlags,
    id: TypeIdx,
}

impl<'s, T> ResMut<'s, T> {
    /// # Safety
    /// `ptr` must stay valid for `'s` and the task must hold write access to `id`.
    pub(crate) unsafe fn new(ptr: *mut T, flags: &'s BorrowFlags, id: TypeIdx) -> Self {
        flags.acquire_write::<T>(id);
        Self { value: unsafe { &mut *ptr }, flags, id }
    }
}

impl<T> Deref for ResMut<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> DerefMut for ResMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<T> Drop for ResMut<'_, T> {
    fn drop(&mut self) {
        self.flags.release(self.id);
    }
}
