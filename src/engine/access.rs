//! Compile-time capability sets for views.
//!
//! A view is parameterized by a tuple of capabilities such as
//! `(Read<Position>, Write<Velocity>)`. Each fetch a query performs turns into a
//! *request* (`&T` requests [`ReadRequest<T>`], `&mut T` requests
//! [`WriteRequest<T>`]) and the compiler has to prove that some slot of the
//! capability tuple grants it:
//!
//! - [`Grants`] says which single capability satisfies which request
//!   (`Read<T>` grants reads of `T`, `Write<T>` grants reads and writes of `T`).
//! - [`Permits`] lifts that to a capability tuple; the [`Slot`] index is
//!   inferred and never spelled out by callers.
//! - [`PermitsAll`] walks a tree of requests (tuples of requests nest).
//!
//! Reading a type outside the set, or writing a type declared `Read`, leaves
//! no matching impl and fails to compile. `Write<T>` itself only implements
//! [`Capability`] when `T`'s storage is [`Mutable`], which rules out in-place
//! mutation of value-segregated components.
//!
//! A set must not list the same type twice; doing so makes the slot ambiguous.

use std::marker::PhantomData;

use crate::engine::component::{Component, Mutable};
use crate::engine::registry::TypeRegistry;
use crate::engine::types::AccessSets;

/// Capability to read component `T`.
///
/// Queries may only fetch what the view's capabilities grant:
///
/// ```
/// use kinetic::prelude::*;
///
/// struct Position(f32);
/// struct Velocity(f32);
/// component!(Position, Velocity);
///
/// let mut store = Store::new(Arc::new(TypeRegistry::new()));
/// store.create((Position(0.0), Velocity(1.0)));
/// let mut view = store.view::<(Read<Position>, Read<Velocity>)>();
/// view.query::<(&Position, &Velocity)>().for_each(|(p, v)| assert!(p.0 < v.0));
/// ```
///
/// Fetching a type the view does not list is rejected:
///
/// ```compile_fail
/// use kinetic::prelude::*;
///
/// struct Position(f32);
/// struct Velocity(f32);
/// component!(Position, Velocity);
///
/// let mut store = Store::new(Arc::new(TypeRegistry::new()));
/// store.create((Position(0.0), Velocity(1.0)));
/// let mut view = store.view::<Read<Position>>();
/// view.query::<(&Position, &Velocity)>().for_each(|(p, v)| assert!(p.0 < v.0));
/// ```
///
/// So is writing through a `Read` capability:
///
/// ```compile_fail
/// use kinetic::prelude::*;
///
/// struct Position(f32);
/// component!(Position);
///
/// let mut store = Store::new(Arc::new(TypeRegistry::new()));
/// store.create((Position(0.0),));
/// let mut view = store.view_mut::<Read<Position>>();
/// view.query::<&mut Position>().for_each(|p| p.0 += 1.0);
/// ```
pub struct Read<T>(PhantomData<fn() -> T>);

/// Capability to read and write component `T`.
///
/// ```
/// use kinetic::prelude::*;
///
/// struct Position(f32);
/// component!(Position);
///
/// let mut store = Store::new(Arc::new(TypeRegistry::new()));
/// store.create((Position(0.0),));
/// let mut view = store.view_mut::<Write<Position>>();
/// view.query::<&mut Position>().for_each(|p| p.0 += 1.0);
/// ```
///
/// Value-segregated components have no `Write` capability:
///
/// ```compile_fail
/// use kinetic::prelude::*;
///
/// #[derive(Clone, PartialEq, Eq, Hash)]
/// struct Team(u8);
/// component!(segregated Team);
///
/// let mut store = Store::new(Arc::new(TypeRegistry::new()));
/// store.create((Team(1),));
/// let mut view = store.view_mut::<Write<Team>>();
/// view.query::<&mut Team>().for_each(|t| t.0 = 2);
/// ```
///
/// and cannot be fetched by `&mut` even when only read access is declared:
///
/// ```compile_fail
/// use kinetic::prelude::*;
///
/// #[derive(Clone, PartialEq, Eq, Hash)]
/// struct Team(u8);
/// component!(segregated Team);
///
/// let mut store = Store::new(Arc::new(TypeRegistry::new()));
/// store.create((Team(1),));
/// let mut view = store.view_mut::<Read<Team>>();
/// view.query::<&mut Team>().for_each(|t| t.0 = 2);
/// ```
///
/// Reading them stays allowed:
///
/// ```
/// use kinetic::prelude::*;
///
/// #[derive(Clone, PartialEq, Eq, Hash)]
/// struct Team(u8);
/// component!(segregated Team);
///
/// let mut store = Store::new(Arc::new(TypeRegistry::new()));
/// store.create((Team(1),));
/// let mut view = store.view::<Read<Team>>();
/// assert_eq!(view.query::<&Team>().gather(|t| t.0), vec![1]);
/// ```
pub struct Write<T>(PhantomData<fn() -> T>);

/// Request to read `T`.
pub struct ReadRequest<T>(PhantomData<fn() -> T>);

/// Request to write `T`.
pub struct WriteRequest<T>(PhantomData<fn() -> T>);

/// Request that needs no capability (entity ids).
pub struct Unrestricted;

/// Position of the granting capability inside a capability tuple.
pub struct Slot<const N: usize>;

/// A single capability.
pub trait Capability {
    /// Adds this capability's resource to `access`.
    fn declare(registry: &TypeRegistry, access: &mut AccessSets);
}

impl<T: Component> Capability for Read<T> {
    fn declare(registry: &TypeRegistry, access: &mut AccessSets) {
        access.add_read(registry.component::<T>());
    }
}

impl<T: Component> Capability for Write<T>
where
    T::Storage: Mutable,
{
    fn declare(registry: &TypeRegistry, access: &mut AccessSets) {
        access.add_write(registry.component::<T>());
    }
}

/// A set of capabilities a view is parameterized by.
pub trait CapabilitySet: 'static {
    /// Adds every capability's resource to `access`.
    fn declare(registry: &TypeRegistry, access: &mut AccessSets);
}

/// Marker for capability sets without any write.
pub trait ReadOnly {}

impl<T: 'static> ReadOnly for Read<T> {}

/// Single capability grants single request.
pub trait Grants<R> {}

impl<T> Grants<ReadRequest<T>> for Read<T> {}
impl<T> Grants<ReadRequest<T>> for Write<T> {}
impl<T> Grants<WriteRequest<T>> for Write<T> {}

/// Capability set grants request `R` through the capability at index `I`.
pub trait Permits<R, I> {}

impl<R, T> Permits<R, Slot<0>> for Read<T> where Read<T>: Grants<R> {}
impl<R, T> Permits<R, Slot<0>> for Write<T> where Write<T>: Grants<R> {}

/// Capability set grants every request in the tree `R`.
pub trait PermitsAll<R, I> {}

impl<C, T, I> PermitsAll<ReadRequest<T>, I> for C where C: Permits<ReadRequest<T>, I> {}
impl<C, T, I> PermitsAll<WriteRequest<T>, I> for C where C: Permits<WriteRequest<T>, I> {}
impl<C> PermitsAll<Unrestricted, ()> for C {}

impl<T: Component> CapabilitySet for Read<T> {
    fn declare(registry: &TypeRegistry, access: &mut AccessSets) {
        <Self as Capability>::declare(registry, access);
    }
}

impl<T: Component> CapabilitySet for Write<T>
where
    T::Storage: Mutable,
{
    fn declare(registry: &TypeRegistry, access: &mut AccessSets) {
        <Self as Capability>::declare(registry, access);
    }
}

impl CapabilitySet for () {
    fn declare(_: &TypeRegistry, _: &mut AccessSets) {}
}

impl ReadOnly for () {}

macro_rules! impl_capability_tuple {
    ($($c:ident),+) => {
        impl<$($c: Capability + 'static),+> CapabilitySet for ($($c,)+) {
            fn declare(registry: &TypeRegistry, access: &mut AccessSets) {
                $(<$c as Capability>::declare(registry, access);)+
            }
        }

        impl<$($c: ReadOnly),+> ReadOnly for ($($c,)+) {}
    };
}

impl_capability_tuple!(C0);
impl_capability_tuple!(C0, C1);
impl_capability_tuple!(C0, C1, C2);
impl_capability_tuple!(C0, C1, C2, C3);
impl_capability_tuple!(C0, C1, C2, C3, C4);
impl_capability_tuple!(C0, C1, C2, C3, C4, C5);
impl_capability_tuple!(C0, C1, C2, C3, C4, C5, C6);
impl_capability_tuple!(C0, C1, C2, C3, C4, C5, C6, C7);

macro_rules! impl_permits {
    ($slot:literal, $cap:ident, ($($all:ident),+)) => {
        impl<R, $($all),+> Permits<R, Slot<$slot>> for ($($all,)+) where $cap: Grants<R> {}
    };
}

impl_permits!(0, C0, (C0));

impl_permits!(0, C0, (C0, C1));
impl_permits!(1, C1, (C0, C1));

impl_permits!(0, C0, (C0, C1, C2));
impl_permits!(1, C1, (C0, C1, C2));
impl_permits!(2, C2, (C0, C1, C2));

impl_permits!(0, C0, (C0, C1, C2, C3));
impl_permits!(1, C1, (C0, C1, C2, C3));
impl_permits!(2, C2, (C0, C1, C2, C3));
impl_permits!(3, C3, (C0, C1, C2, C3));

impl_permits!(0, C0, (C0, C1, C2, C3, C4));
impl_permits!(1, C1, (C0, C1, C2, C3, C4));
impl_permits!(2, C2, (C0, C1, C2, C3, C4));
impl_permits!(3, C3, (C0, C1, C2, C3, C4));
impl_permits!(4, C4, (C0, C1, C2, C3, C4));

impl_permits!(0, C0, (C0, C1, C2, C3, C4, C5));
impl_permits!(1, C1, (C0, C1, C2, C3, C4, C5));
impl_permits!(2, C2, (C0, C1, C2, C3, C4, C5));
impl_permits!(3, C3, (C0, C1, C2, C3, C4, C5));
impl_permits!(4, C4, (C0, C1, C2, C3, C4, C5));
impl_permits!(5, C5, (C0, C1, C2, C3, C4, C5));

impl_permits!(0, C0, (C0, C1, C2, C3, C4, C5, C6));
impl_permits!(1, C1, (C0, C1, C2, C3, C4, C5, C6));
impl_permits!(2, C2, (C0, C1, C2, C3, C4, C5, C6));
impl_permits!(3, C3, (C0, C1, C2, C3, C4, C5, C6));
impl_permits!(4, C4, (C0, C1, C2, C3, C4, C5, C6));
impl_permits!(5, C5, (C0, C1, C2, C3, C4, C5, C6));
impl_permits!(6, C6, (C0, C1, C2, C3, C4, C5, C6));

impl_permits!(0, C0, (C0, C1, C2, C3, C4, C5, C6, C7));
impl_permits!(1, C1, (C0, C1, C2, C3, C4, C5, C6, C7));
impl_permits!(2, C2, (C0, C1, C2, C3, C4, C5, C6, C7));
impl_permits!(3, C3, (C0, C1, C2, C3, C4, C5, C6, C7));
impl_permits!(4, C4, (C0, C1, C2, C3, C4, C5, C6, C7));
impl_permits!(5, C5, (C0, C1, C2, C3, C4, C5, C6, C7));
impl_permits!(6, C6, (C0, C1, C2, C3, C4, C5, C6, C7));
impl_permits!(7, C7, (C0, C1, C2, C3, C4, C5, C6, C7));

macro_rules! impl_permits_all {
    ($(($r:ident, $i:ident)),+) => {
        impl<C, $($r, $i),+> PermitsAll<($($r,)+), ($($i,)+)> for C
        where
            $(C: PermitsAll<$r, $i>,)+
        {}
    };
}

impl_permits_all!((R0, I0));
impl_permits_all!((R0, I0), (R1, I1));
impl_permits_all!((R0, I0), (R1, I1), (R2, I2));
impl_permits_all!((R0, I0), (R1, I1), (R2, I2), (R3, I3));
impl_permits_all!((R0, I0), (R1, I1), (R2, I2), (R3, I3), (R4, I4));
impl_permits_all!((R0, I0), (R1, I1), (R2, I2), (R3, I3), (R4, I4), (R5, I5));
impl_permits_all!((R0, I0), (R1, I1), (R2, I2), (R3, I3), (R4, I4), (R5, I5), (R6, I6));
impl_permits_all!((R0, I0), (R1, I1), (R2, I2), (R3, I3), (R4, I4), (R5, I5), (R6, I6), (R7, I7));
