//! # Components and Bundles
//!
//! A component is a plain data fragment attached to an entity. Every component
//! type implements [`Component`] and declares a **storage kind**:
//!
//! | Kind | Table | Fetchable | Mutable through a view |
//! |------|-------|-----------|------------------------|
//! | [`Dense`] | yes | yes | yes |
//! | [`Tag`] | no (signature bit only) | no | no |
//! | [`Segregated`] | yes | yes | no |
//!
//! Value-segregated components additionally group entities by *value*: equal
//! values share one virtual-type bit in the category signature. Changing such a
//! value in place would desynchronize that grouping, so the type system refuses
//! `Write<T>` capabilities and `&mut T` fetches for them. The only legal change
//! is remove-then-attach with the new value.
//!
//! The [`component!`](crate::component) macro covers the common declarations.
//!
//! ## Bundles
//! Tuples of components implement [`Bundle`] and are used to create entities in
//! one step; tuples of `Vec`s implement [`BundleColumns`] for bulk creation.

use crate::engine::category::Category;
use crate::engine::directory::Entity;
use crate::engine::registry::TypeRegistry;
use crate::engine::segregation::{ErasedSegregationMap, SegregationMaps};
use crate::engine::snapshot::Codec;
use crate::engine::types::{Signature, TypeIdx};

/// Runtime view of a storage kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
    /// Dense table, freely mutable.
    Dense,
    /// Zero-sized marker with no table.
    Tag,
    /// Dense table plus value grouping; read-only through views.
    Segregated,
}

/// Type-level storage kind of a component.
pub trait StorageKind: 'static {
    /// Runtime mirror of the kind.
    const KIND: Storage;
}

/// Kinds that own a table and can therefore be fetched by reference.
pub trait Stored: StorageKind {}

/// Kinds whose values may be changed in place.
pub trait Mutable: Stored {}

/// Ordinary table-backed storage.
pub enum Dense {}
/// Presence-only storage.
pub enum Tag {}
/// Table-backed storage grouped by value.
pub enum Segregated {}

impl StorageKind for Dense {
    const KIND: Storage = Storage::Dense;
}
impl StorageKind for Tag {
    const KIND: Storage = Storage::Tag;
}
impl StorageKind for Segregated {
    const KIND: Storage = Storage::Segregated;
}
impl Stored for Dense {}
impl Stored for Segregated {}
impl Mutable for Dense {}

/// A data fragment that can be attached to entities.
pub trait Component: Send + Sync + Sized + 'static {
    /// How values of this type are stored.
    type Storage: StorageKind;

    /// Element codec used by snapshots; `None` excludes the type from them.
    fn codec() -> Option<Codec<Self>> {
        None
    }

    /// Visits every [`Entity`] stored inside the value.
    ///
    /// Snapshots use this to rewrite cross-entity references.
    fn for_each_id_field(&mut self, _visit: &mut dyn FnMut(&mut Entity)) {}

    /// Segregation map factory; must be `Some` exactly for [`Segregated`] types.
    fn segregation_map() -> Option<Box<dyn ErasedSegregationMap>> {
        None
    }
}

/// Declares [`Component`] impls for common cases.
///
/// ```ignore
/// component!(Position, Velocity);        // dense
/// component!(serde Health);              // dense, included in snapshots
/// component!(tag Frozen);                // zero-sized marker
/// component!(segregated Team);           // grouped by value
/// component!(segregated serde Faction);  // grouped by value, in snapshots
/// ```
#[macro_export]
macro_rules! component {
    (tag $($t:ty),+ $(,)?) => {
        $(impl $crate::engine::component::Component for $t {
            type Storage = $crate::engine::component::Tag;
        })+
    };
    (segregated serde $($t:ty),+ $(,)?) => {
        $(impl $crate::engine::component::Component for $t {
            type Storage = $crate::engine::component::Segregated;
            fn codec() -> Option<$crate::engine::snapshot::Codec<Self>> {
                Some($crate::engine::snapshot::Codec::serde())
            }
            fn segregation_map() -> Option<Box<dyn $crate::engine::segregation::ErasedSegregationMap>> {
                Some(Box::new($crate::engine::segregation::SegregationMap::<$t>::new()))
            }
        })+
    };
    (segregated $($t:ty),+ $(,)?) => {
        $(impl $crate::engine::component::Component for $t {
            type Storage = $crate::engine::component::Segregated;
            fn segregation_map() -> Option<Box<dyn $crate::engine::segregation::ErasedSegregationMap>> {
                Some(Box::new($crate::engine::segregation::SegregationMap::<$t>::new()))
            }
        })+
    };
    (serde $($t:ty),+ $(,)?) => {
        $(impl $crate::engine::component::Component for $t {
            type Storage = $crate::engine::component::Dense;
            fn codec() -> Option<$crate::engine::snapshot::Codec<Self>> {
                Some($crate::engine::snapshot::Codec::serde())
            }
        })+
    };
    ($($t:ty),+ $(,)?) => {
        $(impl $crate::engine::component::Component for $t {
            type Storage = $crate::engine::component::Dense;
        })+
    };
}

/// Appends one component value to its table in `category`.
pub(crate) fn push_component<T: Component>(value: T, id: TypeIdx, category: &mut Category) {
    if <T::Storage as StorageKind>::KIND == Storage::Tag {
        return;
    }
    category.typed_table_mut::<T>(id).push(value);
}

/// A fixed set of component values used to create one entity.
pub trait Bundle: Send + 'static {
    /// Number of components in the bundle.
    const LEN: usize;

    /// Sets the type bit of every component.
    fn type_signature(registry: &TypeRegistry, signature: &mut Signature);

    /// Sets the virtual-type bit of every value-segregated component.
    fn segregate(&self, registry: &TypeRegistry, maps: &mut SegregationMaps, signature: &mut Signature);

    /// Appends every value to its table in `category`.
    fn push_into(self, registry: &TypeRegistry, category: &mut Category);
}

/// Parallel component arrays used for bulk creation.
pub trait BundleColumns {
    /// Row type produced by zipping the arrays.
    type Row: Bundle;

    /// Splits the arrays into rows; panics if lengths differ.
    fn into_rows(self) -> Vec<Self::Row>;
}

/// A set of component types, used by query filters.
pub trait ComponentSet {
    /// Sets the type bit of every member.
    fn add_to(registry: &TypeRegistry, signature: &mut Signature);
}

impl Bundle for () {
    const LEN: usize = 0;
    fn type_signature(_: &TypeRegistry, _: &mut Signature) {}
    fn segregate(&self, _: &TypeRegistry, _: &mut SegregationMaps, _: &mut Signature) {}
    fn push_into(self, _: &TypeRegistry, _: &mut Category) {}
}

impl ComponentSet for () {
    fn add_to(_: &TypeRegistry, _: &mut Signature) {}
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_tuples {
    ($(($t:ident, $v:ident, $i:tt)),+) => {
        impl<$($t: Component),+> Bundle for ($($t,)+) {
            const LEN: usize = count!($($t)+);

            fn type_signature(registry: &TypeRegistry, signature: &mut Signature) {
                $(signature.set(registry.component::<$t>());)+
            }

            fn segregate(&self, registry: &TypeRegistry, maps: &mut SegregationMaps, signature: &mut Signature) {
                $(
                    if let Some(bit) = maps.virtual_for::<$t>(registry, &self.$i) {
                        signature.set(bit);
                    }
                )+
            }

            fn push_into(self, registry: &TypeRegistry, category: &mut Category) {
                $(push_component(self.$i, registry.component::<$t>(), category);)+
            }
        }

        impl<$($t: Component),+> BundleColumns for ($(Vec<$t>,)+) {
            type Row = ($($t,)+);

            fn into_rows(self) -> Vec<Self::Row> {
                let len = self.0.len();
                $(assert_eq!(self.$i.len(), len, "bulk creation arrays must share one length");)+
                $(let mut $v = self.$i.into_iter();)+
                (0..len).filter_map(|_| Some(($($v.next()?,)+))).collect()
            }
        }

        impl<$($t: Component),+> ComponentSet for ($($t,)+) {
            fn add_to(registry: &TypeRegistry, signature: &mut Signature) {
                $(signature.set(registry.component::<$t>());)+
            }
        }
    };
}

impl_tuples!((A, a, 0));
impl_tuples!((A, a, 0), (B, b, 1));
impl_tuples!((A, a, 0), (B, b, 1), (C, c, 2));
impl_tuples!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3));
impl_tuples!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4));
impl_tuples!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4), (F, f, 5));
impl_tuples!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4), (F, f, 5), (G, g, 6));
impl_tuples!((A, a, 0), (B, b, 1), (C, c, 2), (D, d, 3), (E, e, 4), (F, f, 5), (G, g, 6), (H, h, 7));
