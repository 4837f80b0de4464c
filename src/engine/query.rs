//! Views and queries.
//!
//! A [`View`] is a capability-restricted accessor over a store; an
//! [`EditView`] additionally allows structural changes (create, attach,
//! remove, erase, sort). Both are parameterized by a capability set `C` from
//! [`access`](crate::engine::access), and every query they open is checked
//! against `C` at compile time.
//!
//! ## Queries
//! `view.query::<Q>()` starts a query fetching `Q` per row, where `Q` is
//! `&T`, `&mut T`, [`Entity`] or a tuple of those. Filters narrow the matching
//! categories:
//!
//! * [`Query::with`] / [`Query::with_all`]: the category must hold the types,
//! * [`Query::without`] / [`Query::without_any`]: the category must not,
//! * [`Query::with_value`]: the category must hold a given segregated value.
//!
//! A category matches when its signature is a superset of the include set and
//! disjoint from the exclude set. Traversal resolves raw column pointers once
//! per category and then walks rows.
//!
//! ## Example
//! ```ignore
//! let mut view = store.view_mut::<(Read<Velocity>, Write<Position>)>();
//! view.query::<(&mut Position, &Velocity)>()
//!     .without::<Frozen>()
//!     .for_each(|(p, v)| { p.x += v.x; p.y += v.y; });
//! ```
//!
//! ## Safety
//! Items are produced from raw column pointers. Soundness rests on:
//! * each query borrowing its view mutably, so queries never overlap,
//! * a fetch never naming the same type twice when one of them writes
//!   (checked when the query is built),
//! * the scheduler granting write reservations exclusively.

use std::marker::PhantomData;
use std::ops::Range;

use rayon::prelude::*;

use crate::engine::access::{CapabilitySet, Permits, PermitsAll, ReadRequest, Unrestricted, WriteRequest};
use crate::engine::category::Category;
use crate::engine::component::{Bundle, BundleColumns, Component, ComponentSet, Mutable, Stored};
use crate::engine::directory::Entity;
use crate::engine::registry::TypeRegistry;
use crate::engine::store::StoreData;
use crate::engine::types::{CategoryId, RowIdx, Signature, TypeIdx};
use crate::scheduler::task::TaskScope;

/// Raw base pointer of one column, resolved per category.
pub struct Column<T>(*mut T);

impl<T> Clone for Column<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Column<T> {}

// SAFETY: columns are only dereferenced under the aliasing rules described in
// the module documentation.
unsafe impl<T: Send + Sync> Send for Column<T> {}
unsafe impl<T: Send + Sync> Sync for Column<T> {}

/// Types touched by a fetch, collected while building a query.
#[derive(Default, Debug)]
pub struct FetchAccess {
    /// Types every matching category must hold.
    pub include: Signature,
    reads: Vec<TypeIdx>,
    writes: Vec<TypeIdx>,
}

impl FetchAccess {
    /// Records a shared fetch of `ty`.
    pub fn read(&mut self, ty: TypeIdx) {
        self.include.set(ty);
        self.reads.push(ty);
    }

    /// Records an exclusive fetch of `ty`.
    pub fn write(&mut self, ty: TypeIdx) {
        self.include.set(ty);
        self.writes.push(ty);
    }

    fn assert_no_alias(&self, registry: &TypeRegistry) {
        for (i, &ty) in self.writes.iter().enumerate() {
            if self.writes[i + 1..].contains(&ty) || self.reads.contains(&ty) {
                panic!("query fetches `{}` mutably more than once", registry.name_of(ty));
            }
        }
    }
}

/// Something a query can produce per row.
///
/// # Safety
/// `item` must only produce references into the columns returned by
/// `columns`, and `declare` must report every written type as a write.
pub unsafe trait Fetch {
    /// Value produced per row.
    type Item<'a>;
    /// Per-query cached type ids.
    type State: Copy + Send + Sync + 'static;
    /// Per-category resolved column pointers.
    type Columns: Copy + Send + Sync;
    /// Capability request tree checked against the view.
    type Request;

    /// Resolves type ids.
    fn init(registry: &TypeRegistry) -> Self::State;

    /// Reports the touched types.
    fn declare(state: &Self::State, access: &mut FetchAccess);

    /// Resolves column pointers of a matching category.
    ///
    /// # Safety
    /// `category` must hold every type reported by `declare`.
    unsafe fn columns(state: &Self::State, category: &Category) -> Self::Columns;

    /// Produces the item at `row`.
    ///
    /// # Safety
    /// `row` must be in bounds and the aliasing rules of the module must hold.
    unsafe fn item<'a>(columns: &Self::Columns, row: RowIdx) -> Self::Item<'a>;
}

unsafe impl<'r, T: Component> Fetch for &'r T
where
    T::Storage: Stored,
{
    type Item<'a> = &'a T;
    type State = TypeIdx;
    type Columns = Column<T>;
    type Request = ReadRequest<T>;

    fn init(registry: &TypeRegistry) -> TypeIdx {
        registry.component::<T>()
    }

    fn declare(state: &TypeIdx, access: &mut FetchAccess) {
        access.read(*state);
    }

    unsafe fn columns(state: &TypeIdx, category: &Category) -> Column<T> {
        Column(unsafe { category.typed_table::<T>(*state).column_ptr() })
    }

    unsafe fn item<'a>(columns: &Column<T>, row: RowIdx) -> &'a T {
        unsafe { &*columns.0.add(row) }
    }
}

unsafe impl<'r, T: Component> Fetch for &'r mut T
where
    T::Storage: Mutable,
{
    type Item<'a> = &'a mut T;
    type State = TypeIdx;
    type Columns = Column<T>;
    type Request = WriteRequest<T>;

    fn init(registry: &TypeRegistry) -> TypeIdx {
        registry.component::<T>()
    }

    fn declare(state: &TypeIdx, access: &mut FetchAccess) {
        access.write(*state);
    }

    unsafe fn columns(state: &TypeIdx, category: &Category) -> Column<T> {
        Column(unsafe { category.typed_table::<T>(*state).column_ptr() })
    }

    unsafe fn item<'a>(columns: &Column<T>, row: RowIdx) -> &'a mut T {
        unsafe { &mut *columns.0.add(row) }
    }
}

unsafe impl Fetch for Entity {
    type Item<'a> = Entity;
    type State = ();
    type Columns = Column<Entity>;
    type Request = Unrestricted;

    fn init(_: &TypeRegistry) {}

    fn declare(_: &(), _: &mut FetchAccess) {}

    unsafe fn columns(_: &(), category: &Category) -> Column<Entity> {
        Column(category.ids().as_ptr() as *mut Entity)
    }

    unsafe fn item<'a>(columns: &Column<Entity>, row: RowIdx) -> Self::Item<'a> {
        unsafe { *columns.0.add(row) }
    }
}

macro_rules! impl_fetch_tuple {
    ($(($f:ident, $i:tt)),+) => {
        unsafe impl<$($f: Fetch),+> Fetch for ($($f,)+) {
            type Item<'a> = ($($f::Item<'a>,)+);
            type State = ($($f::State,)+);
            type Columns = ($($f::Columns,)+);
            type Request = ($($f::Request,)+);

            fn init(registry: &TypeRegistry) -> Self::State {
                ($($f::init(registry),)+)
            }

            fn declare(state: &Self::State, access: &mut FetchAccess) {
                $($f::declare(&state.$i, access);)+
            }

            unsafe fn columns(state: &Self::State, category: &Category) -> Self::Columns {
                unsafe { ($($f::columns(&state.$i, category),)+) }
            }

            unsafe fn item<'a>(columns: &Self::Columns, row: RowIdx) -> Self::Item<'a> {
                unsafe { ($($f::item(&columns.$i, row),)+) }
            }
        }
    };
}

impl_fetch_tuple!((A, 0));
impl_fetch_tuple!((A, 0), (B, 1));
impl_fetch_tuple!((A, 0), (B, 1), (C, 2));
impl_fetch_tuple!((A, 0), (B, 1), (C, 2), (D, 3));
impl_fetch_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_fetch_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
impl_fetch_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
impl_fetch_tuple!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));

/// Query under construction over a view with capabilities `C`.
pub struct Query<'v, C, Q: Fetch> {
    data: &'v StoreData,
    state: Q::State,
    include: Signature,
    exclude: Signature,
    matches_nothing: bool,
    _caps: PhantomData<fn() -> C>,
}

impl<'v, C: CapabilitySet, Q: Fetch> Query<'v, C, Q> {
    fn new(data: &'v StoreData) -> Self {
        let state = Q::init(&data.registry);
        let mut access = FetchAccess::default();
        Q::declare(&state, &mut access);
        access.assert_no_alias(&data.registry);
        Self {
            data,
            state,
            include: access.include,
            exclude: Signature::new(),
            matches_nothing: false,
            _caps: PhantomData,
        }
    }

    /// Requires component `T` without fetching it.
    pub fn with<T: Component>(mut self) -> Self {
        self.include.set(self.data.registry.component::<T>());
        self
    }

    /// Requires every component of `S`.
    pub fn with_all<S: ComponentSet>(mut self) -> Self {
        S::add_to(&self.data.registry, &mut self.include);
        self
    }

    /// Rejects categories holding `T`.
    pub fn without<T: Component>(mut self) -> Self {
        self.exclude.set(self.data.registry.component::<T>());
        self
    }

    /// Rejects categories holding any component of `S`.
    pub fn without_any<S: ComponentSet>(mut self) -> Self {
        S::add_to(&self.data.registry, &mut self.exclude);
        self
    }

    /// Requires the value-segregated component `T` to equal `value`.
    pub fn with_value<T: Component>(mut self, value: &T) -> Self {
        self.include.set(self.data.registry.component::<T>());
        match self.data.segregation.lookup(&self.data.registry, value) {
            Some(bit) => self.include.set(bit),
            None => self.matches_nothing = true,
        }
        self
    }

    fn matching(&self) -> impl Iterator<Item = &'v Category> + '_ {
        let data: &'v StoreData = self.data;
        data.categories.iter().filter(move |category| {
            !self.matches_nothing
                && !category.is_empty()
                && category.signature().contains_all(&self.include)
                && category.signature().is_disjoint(&self.exclude)
        })
    }

    /// Number of matching entities.
    pub fn count(self) -> usize {
        self.matching().map(Category::len).sum()
    }

    /// Ids of every matching entity.
    pub fn ids(self) -> Vec<Entity> {
        self.matching().flat_map(|category| category.ids().iter().copied()).collect()
    }

    /// Calls `f` once per matching row.
    pub fn for_each<I, F>(self, mut f: F)
    where
        C: PermitsAll<Q::Request, I>,
        F: FnMut(Q::Item<'v>),
    {
        for category in self.matching() {
            // SAFETY: `matching` only yields categories holding every fetched type.
            let columns = unsafe { Q::columns(&self.state, category) };
            for row in 0..category.len() {
                f(unsafe { Q::item(&columns, row) });
            }
        }
    }

    /// Calls `f` for the rows whose global index falls in `window`.
    ///
    /// Rows are numbered across matching categories in arena order. Returns
    /// the next window of the same length, wrapping to the start once the end
    /// is passed, so a sweep can be spread over several frames. The store must
    /// not change structurally between the calls of one sweep.
    pub fn for_each_partial<I, F>(self, window: Range<usize>, mut f: F) -> Range<usize>
    where
        C: PermitsAll<Q::Request, I>,
        F: FnMut(Q::Item<'v>),
    {
        let width = window.end.saturating_sub(window.start);
        let mut offset = 0;
        for category in self.matching() {
            let span = offset..offset + category.len();
            offset = span.end;
            let start = window.start.max(span.start);
            let end = window.end.min(span.end);
            if start >= end {
                continue;
            }
            let columns = unsafe { Q::columns(&self.state, category) };
            for row in (start - span.start)..(end - span.start) {
                f(unsafe { Q::item(&columns, row) });
            }
        }
        if window.end >= offset {
            0..width
        } else {
            window.end..window.end + width
        }
    }

    /// Ids of matching rows for which `predicate` holds.
    pub fn ids_if<I, F>(self, mut predicate: F) -> Vec<Entity>
    where
        C: PermitsAll<Q::Request, I>,
        F: FnMut(Q::Item<'v>) -> bool,
    {
        let mut out = Vec::new();
        for category in self.matching() {
            let columns = unsafe { Q::columns(&self.state, category) };
            for (row, &entity) in category.ids().iter().enumerate() {
                if predicate(unsafe { Q::item(&columns, row) }) {
                    out.push(entity);
                }
            }
        }
        out
    }

    /// Maps every matching row through `f` and collects the results.
    pub fn gather<I, R, F>(self, mut f: F) -> Vec<R>
    where
        C: PermitsAll<Q::Request, I>,
        F: FnMut(Q::Item<'v>) -> R,
    {
        let mut out = Vec::with_capacity(self.matching().map(Category::len).sum());
        self.for_each(|item| out.push(f(item)));
        out
    }

    /// Calls `f` once per matching row from the issuing thread and idle workers.
    ///
    /// Each category's rows are cut into chunks of the scheduler's default
    /// chunk size and handed out as one parallel-for job under `scope`'s task.
    /// Returns when every row has been visited.
    pub fn for_each_parallel<I, F>(self, scope: &TaskScope<'_>, f: F)
    where
        C: PermitsAll<Q::Request, I>,
        F: Fn(Q::Item<'v>) + Send + Sync,
    {
        let chunk = scope.default_chunk_size().max(1);
        let mut work: Vec<(Q::Columns, Range<RowIdx>)> = Vec::new();
        for category in self.matching() {
            let columns = unsafe { Q::columns(&self.state, category) };
            let mut start = 0;
            while start < category.len() {
                let end = (start + chunk).min(category.len());
                work.push((columns, start..end));
                start = end;
            }
        }
        let work = &work;
        let f = &f;
        scope.parallel().for_each_chunk(0..work.len(), 1, &|chunks: Range<usize>| {
            for (columns, rows) in &work[chunks] {
                for row in rows.clone() {
                    f(unsafe { Q::item(columns, row) });
                }
            }
        });
    }
}

fn component_ref<'a, T: Component>(data: &'a StoreData, entity: Entity) -> Option<(TypeIdx, &'a Category, RowIdx)> {
    let at = data.directory.get(entity)?;
    let ty = data.registry.id_of::<T>()?;
    let category = &data.categories[at.category as usize];
    category.signature().has(ty).then_some((ty, category, at.row))
}

/// Non-structural view with capabilities `C`.
pub struct View<'s, C> {
    data: &'s StoreData,
    _caps: PhantomData<fn() -> C>,
}

impl<'s, C: CapabilitySet> View<'s, C> {
    pub(crate) fn new(data: &'s StoreData) -> Self {
        Self { data, _caps: PhantomData }
    }

    /// Starts a query fetching `Q` per row.
    pub fn query<Q: Fetch>(&mut self) -> Query<'_, C, Q> {
        Query::new(self.data)
    }

    /// Returns `true` if `entity` is alive.
    pub fn exists(&self, entity: Entity) -> bool {
        self.data.exists(entity)
    }

    /// Number of live entities.
    pub fn size(&self) -> usize {
        self.data.size()
    }

    /// Component `T` of `entity`, if present.
    pub fn get<T, I>(&self, entity: Entity) -> Option<&T>
    where
        T: Component,
        T::Storage: Stored,
        C: Permits<ReadRequest<T>, I>,
    {
        self.data.get(entity)
    }

    /// Mutable component `T` of `entity`, if present.
    pub fn get_mut<T, I>(&mut self, entity: Entity) -> Option<&mut T>
    where
        T: Component,
        T::Storage: Mutable,
        C: Permits<WriteRequest<T>, I>,
    {
        let (ty, category, row) = component_ref::<T>(self.data, entity)?;
        // SAFETY: `&mut self` excludes other queries of this view and `C` grants write on `T`.
        Some(unsafe { &mut *category.typed_table::<T>(ty).column_ptr().add(row) })
    }
}

/// Structural view with capabilities `C`.
pub struct EditView<'s, C> {
    data: &'s mut StoreData,
    _caps: PhantomData<fn() -> C>,
}

impl<'s, C: CapabilitySet> EditView<'s, C> {
    pub(crate) fn new(data: &'s mut StoreData) -> Self {
        Self { data, _caps: PhantomData }
    }

    /// Starts a query fetching `Q` per row.
    pub fn query<Q: Fetch>(&mut self) -> Query<'_, C, Q> {
        Query::new(self.data)
    }

    /// Creates one entity.
    pub fn create<B: Bundle>(&mut self, bundle: B) -> Entity {
        self.data.create(bundle)
    }

    /// Creates one entity per row of equally long arrays.
    pub fn create_n<B: BundleColumns>(&mut self, columns: B) -> Vec<Entity> {
        self.data.create_n(columns)
    }

    /// Adds component `T` to `entity`.
    pub fn attach<T: Component>(&mut self, entity: Entity, value: T) {
        self.data.attach(entity, value)
    }

    /// Removes component `T` from `entity`.
    pub fn remove<T: Component>(&mut self, entity: Entity) {
        self.data.remove::<T>(entity)
    }

    /// Deletes `entity`.
    pub fn erase(&mut self, entity: Entity) {
        self.data.erase(entity)
    }

    /// Deletes every entity in `entities`.
    pub fn erase_many(&mut self, entities: &[Entity]) {
        for &entity in entities {
            self.data.erase(entity);
        }
    }

    /// Returns `true` if `entity` is alive.
    pub fn exists(&self, entity: Entity) -> bool {
        self.data.exists(entity)
    }

    /// Number of live entities.
    pub fn size(&self) -> usize {
        self.data.size()
    }

    /// Component `T` of `entity`, if present.
    pub fn get<T, I>(&self, entity: Entity) -> Option<&T>
    where
        T: Component,
        T::Storage: Stored,
        C: Permits<ReadRequest<T>, I>,
    {
        self.data.get(entity)
    }

    /// Mutable component `T` of `entity`, if present.
    pub fn get_mut<T, I>(&mut self, entity: Entity) -> Option<&mut T>
    where
        T: Component,
        T::Storage: Mutable,
        C: Permits<WriteRequest<T>, I>,
    {
        let at = self.data.directory.get(entity)?;
        let ty = self.data.registry.id_of::<T>()?;
        let category = &mut self.data.categories[at.category as usize];
        if !category.signature().has(ty) {
            return None;
        }
        Some(&mut category.typed_table_mut::<T>(ty).as_mut_slice()[at.row])
    }

    fn categories_with(&self, ty: TypeIdx) -> Vec<CategoryId> {
        self.data
            .categories
            .iter()
            .filter(|category| category.len() > 1 && category.signature().has(ty))
            .map(Category::id)
            .collect()
    }

    /// Sorts the rows of every category holding `T` by `key`.
    ///
    /// Rows only move inside their category; the directory follows.
    pub fn sort_by<T, K, I, F>(&mut self, key: F)
    where
        T: Component,
        T::Storage: Stored,
        C: Permits<ReadRequest<T>, I>,
        K: Ord + Send + Sync,
        F: Fn(&T) -> K + Sync,
    {
        let ty = self.data.registry.component::<T>();
        for id in self.categories_with(ty) {
            let category = &mut self.data.categories[id as usize];
            let keys: Vec<K> = category.typed_table::<T>(ty).as_slice().par_iter().map(&key).collect();
            let mut permutation: Vec<usize> = (0..keys.len()).collect();
            permutation.par_sort_by(|&a, &b| keys[a].cmp(&keys[b]));
            if permutation.iter().enumerate().all(|(i, &p)| i == p) {
                continue;
            }
            category.reorder(&permutation);
            self.data.reindex(id);
        }
    }

    /// Runs one bubble-sort pass by `key` over every category holding `T`.
    ///
    /// The pass is recorded as adjacent swaps and replayed on every table, so a
    /// long sort can be spread over frames. Returns the number of swaps made;
    /// zero means every category is sorted.
    pub fn sort_step_by<T, K, I, F>(&mut self, key: F) -> usize
    where
        T: Component,
        T::Storage: Stored,
        C: Permits<ReadRequest<T>, I>,
        K: PartialOrd,
        F: Fn(&T) -> K,
    {
        let ty = self.data.registry.component::<T>();
        let mut total = 0;
        for id in self.categories_with(ty) {
            let category = &mut self.data.categories[id as usize];
            let mut keys: Vec<K> = category.typed_table::<T>(ty).as_slice().iter().map(&key).collect();
            let mut swaps = Vec::new();
            for i in 0..keys.len() - 1 {
                if keys[i] > keys[i + 1] {
                    keys.swap(i, i + 1);
                    swaps.push(i);
                }
            }
            if swaps.is_empty() {
                continue;
            }
            total += swaps.len();
            category.swap_adjacent(&swaps);
            self.data.reindex(id);
        }
        total
    }
}
