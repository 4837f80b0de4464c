//! Core identifiers, signatures and access sets.
//!
//! This module defines the **small shared vocabulary** used by every other part
//! of the crate: numeric type ids, category ids, the resizable [`Signature`]
//! bitset and the [`AccessSets`] pair that tasks use to declare what they touch.
//!
//! ## Type id space
//!
//! Every component type, every user resource type and every *virtual type*
//! (the value-grouping bits handed out by value-segregated components) draws
//! its id from the same counter in the [`TypeRegistry`]. A single id therefore
//! means the same thing in three places:
//!
//! - a bit in a category [`Signature`],
//! - a slot in a category's table list,
//! - a resource id in a task's [`AccessSets`].
//!
//! ## Signatures
//!
//! Signatures grow on demand and are kept **normalized**: trailing zero words
//! are trimmed after every mutation, so two signatures describing the same set
//! compare and hash equal regardless of how they were built. Signature equality
//! is category identity.
//!
//! [`TypeRegistry`]: crate::engine::registry::TypeRegistry

use std::fmt;

/// Identifier shared by component types, resource types and virtual types.
pub type TypeIdx = u32;

/// Index of a category inside the store's category arena.
pub type CategoryId = u32;

/// Row index inside a category.
pub type RowIdx = usize;

/// Default number of indices claimed per parallel-for chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

const WORD_BITS: usize = 64;

/// Resizable bitset of type ids.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    words: Vec<u64>,
}

impl Signature {
    /// Creates an empty signature.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a signature from a list of type ids.
    pub fn from_ids(ids: &[TypeIdx]) -> Self {
        let mut signature = Self::new();
        for &id in ids {
            signature.set(id);
        }
        signature
    }

    /// Sets the bit for `id`, growing the word list if needed.
    pub fn set(&mut self, id: TypeIdx) {
        let (word, bit) = split(id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << bit;
    }

    /// Clears the bit for `id`.
    pub fn clear(&mut self, id: TypeIdx) {
        let (word, bit) = split(id);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1u64 << bit);
        }
        self.normalize();
    }

    /// Returns a copy with `id` set.
    pub fn with(&self, id: TypeIdx) -> Self {
        let mut out = self.clone();
        out.set(id);
        out
    }

    /// Returns a copy with `id` cleared.
    pub fn without(&self, id: TypeIdx) -> Self {
        let mut out = self.clone();
        out.clear(id);
        out
    }

    /// Returns `true` if `id` is present.
    #[inline]
    pub fn has(&self, id: TypeIdx) -> bool {
        let (word, bit) = split(id);
        self.words.get(word).is_some_and(|w| (w >> bit) & 1 == 1)
    }

    /// Returns `true` if every bit of `other` is also set here.
    pub fn contains_all(&self, other: &Signature) -> bool {
        other.words.iter().enumerate().all(|(i, &b)| {
            let a = self.words.get(i).copied().unwrap_or(0);
            a & b == b
        })
    }

    /// Returns `true` if no bit is set in both signatures.
    pub fn is_disjoint(&self, other: &Signature) -> bool {
        self.words.iter().zip(other.words.iter()).all(|(a, b)| a & b == 0)
    }

    /// Merges every bit of `other` into this signature.
    pub fn union_with(&mut self, other: &Signature) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
    }

    /// Removes every bit of `other` from this signature.
    pub fn subtract(&mut self, other: &Signature) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a &= !b;
        }
        self.normalize();
    }

    /// Returns `true` if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Number of set bits.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterates over all set ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = TypeIdx> + '_ {
        self.words.iter().enumerate().flat_map(|(word_index, &word)| {
            let base = word_index * WORD_BITS;
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some((base + tz) as TypeIdx)
            })
        })
    }

    fn normalize(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

#[inline]
fn split(id: TypeIdx) -> (usize, usize) {
    let id = id as usize;
    (id / WORD_BITS, id % WORD_BITS)
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<TypeIdx> for Signature {
    fn from_iter<I: IntoIterator<Item = TypeIdx>>(iter: I) -> Self {
        let mut signature = Signature::new();
        for id in iter {
            signature.set(id);
        }
        signature
    }
}

/// Access mode of a declared resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Shared access.
    Read,
    /// Exclusive access.
    Write,
}

/// Read and write resource sets declared by a task.
///
/// A resource declared both read and write is treated as write only; see
/// [`AccessSets::normalize`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessSets {
    /// Resources read.
    pub read: Signature,
    /// Resources written.
    pub write: Signature,
}

impl AccessSets {
    /// Creates an empty access declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares shared access on `id`.
    pub fn add_read(&mut self, id: TypeIdx) {
        if !self.write.has(id) {
            self.read.set(id);
        }
    }

    /// Declares exclusive access on `id`.
    pub fn add_write(&mut self, id: TypeIdx) {
        self.read.clear(id);
        self.write.set(id);
    }

    /// Declares `id` with the given mode.
    pub fn add(&mut self, id: TypeIdx, mode: AccessMode) {
        match mode {
            AccessMode::Read => self.add_read(id),
            AccessMode::Write => self.add_write(id),
        }
    }

    /// Merges another declaration into this one.
    pub fn merge(&mut self, other: &AccessSets) {
        self.read.union_with(&other.read);
        self.write.union_with(&other.write);
        self.normalize();
    }

    /// Drops read bits that are already covered by a write.
    pub fn normalize(&mut self) {
        self.read.subtract(&self.write);
    }

    /// Returns `true` if `id` may be read under this declaration.
    #[inline]
    pub fn allows_read(&self, id: TypeIdx) -> bool {
        self.read.has(id) || self.write.has(id)
    }

    /// Returns `true` if `id` may be written under this declaration.
    #[inline]
    pub fn allows_write(&self, id: TypeIdx) -> bool {
        self.write.has(id)
    }

    /// Returns `true` if both declarations cannot run at the same time.
    pub fn conflicts_with(&self, other: &AccessSets) -> bool {
        // W∩W, W∩R, R∩W
        !self.write.is_disjoint(&other.write)
            || !self.write.is_disjoint(&other.read)
            || !self.read.is_disjoint(&other.write)
    }

    /// Returns `true` if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }
}
