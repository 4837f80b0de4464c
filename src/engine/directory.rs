//! Entity handles and the entity directory.
//!
//! An [`Entity`] packs a slot index and a generation into one `u64`:
//!
//! ```text
//! | generation (32) | index (32) |
//! ```
//!
//! The [`Directory`] is the single authoritative map from a live entity to its
//! `(category, row)` [`Location`]. Slot indices are handed out by a monotonic
//! counter starting at 1 and recycled through a freelist once released; the
//! generation of a slot is bumped on release, so a stale handle never resolves
//! to the entity that reused its slot. Index 0 is never handed out, which keeps
//! [`Entity::INVALID`] distinct from every real handle.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::types::{CategoryId, RowIdx};

const INDEX_BITS: u32 = 32;
const INDEX_MASK: u64 = (1u64 << INDEX_BITS) - 1;

/// Opaque handle to an entity.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(u64);

impl Entity {
    /// Handle that never refers to a live entity.
    pub const INVALID: Entity = Entity(0);

    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Entity(((generation as u64) << INDEX_BITS) | index as u64)
    }

    /// Slot index of this handle.
    #[inline]
    pub const fn index(self) -> u32 {
        (self.0 & INDEX_MASK) as u32
    }

    /// Generation of this handle.
    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> INDEX_BITS) as u32
    }

    /// Raw packed value.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Rebuilds a handle from [`Entity::to_bits`].
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Entity(bits)
    }

    /// Returns `false` for [`Entity::INVALID`] and any handle with slot 0.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index() != 0
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Entity({}v{})", self.index(), self.generation())
        } else {
            f.write_str("Entity(invalid)")
        }
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::INVALID
    }
}

/// Position of an entity inside the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    /// Category holding the entity.
    pub category: CategoryId,
    /// Row inside that category.
    pub row: RowIdx,
}

#[derive(Clone, Copy, Debug, Default)]
struct Slot {
    generation: u32,
    location: Option<Location>,
}

/// Map from live entity to its [`Location`].
#[derive(Debug)]
pub struct Directory {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    /// Creates an empty directory; slot 0 is reserved.
    pub fn new() -> Self {
        Self { slots: vec![Slot::default()], free: Vec::new(), live: 0 }
    }

    /// Allocates a handle and records its location.
    pub fn allocate(&mut self, location: Location) -> Entity {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.slots.len();
                assert!(index as u64 <= INDEX_MASK, "entity index space exhausted");
                self.slots.push(Slot::default());
                index as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.location = Some(location);
        self.live += 1;
        Entity::new(index, slot.generation)
    }

    /// Location of `entity`, or `None` if it is not alive.
    #[inline]
    pub fn get(&self, entity: Entity) -> Option<Location> {
        let slot = self.slots.get(entity.index() as usize)?;
        if slot.generation != entity.generation() || !entity.is_valid() {
            return None;
        }
        slot.location
    }

    /// Location of `entity`; panics if it is not alive.
    #[inline]
    pub fn locate(&self, entity: Entity) -> Location {
        match self.get(entity) {
            Some(location) => location,
            None => panic!("{entity:?} does not exist in this store"),
        }
    }

    /// Returns `true` if `entity` is alive.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// Repoints a live entity at a new location.
    #[inline]
    pub fn set(&mut self, entity: Entity, location: Location) {
        debug_assert!(self.contains(entity), "relocating dead {entity:?}");
        self.slots[entity.index() as usize].location = Some(location);
    }

    /// Ends the lifetime of `entity` and recycles its slot.
    pub fn release(&mut self, entity: Entity) {
        let slot = &mut self.slots[entity.index() as usize];
        debug_assert_eq!(slot.generation, entity.generation());
        slot.location = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(entity.index());
        self.live -= 1;
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no entity is alive.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Releases every live entity.
    pub fn clear(&mut self) {
        for index in 1..self.slots.len() {
            let slot = &mut self.slots[index];
            if slot.location.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.live = 0;
    }

    /// Iterates over every live entity and its location.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, Location)> + '_ {
        self.slots.iter().enumerate().skip(1).filter_map(|(index, slot)| {
            slot.location.map(|location| (Entity::new(index as u32, slot.generation), location))
        })
    }
}
