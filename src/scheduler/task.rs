//! Tasks, task tokens and task scopes.
//!
//! ## Declaring a task
//! [`Context::add_task`] returns a [`TaskToken`]. The token collects the
//! task's resource declarations and barrier relationships and submits the task
//! when it is dropped:
//!
//! ```ignore
//! let mut integrate = context.add_task("integrate", |scope| { /* ... */ });
//! integrate.reads::<Velocity>().writes::<Position>();
//! let mut collide = context.add_task("collide", |scope| { /* ... */ });
//! collide.depends_on(&mut integrate);
//! ```
//!
//! A task is admitted once every barrier it waits on is open and its
//! declared resources are free (see [`resource`](crate::scheduler::resource)).
//!
//! ## Running
//! The body receives a [`TaskScope`], which gives checked access to context
//! resources, parallel-for and nested task submission. Touching a resource the
//! task never declared panics.

use std::any::{type_name, TypeId};
use std::sync::Arc;

use crate::engine::access::CapabilitySet;
use crate::engine::store::{Store, StoreData};
use crate::engine::types::{AccessSets, TypeIdx};
use crate::scheduler::barrier::Barrier;
use crate::scheduler::context::Context;
use crate::scheduler::parallel::Parallel;
use crate::scheduler::resource::{BorrowFlags, Res, ResMut, Reservation};

pub(crate) type TaskBody = Box<dyn for<'s> FnOnce(&TaskScope<'s>) + Send>;

/// A submitted unit of work.
pub(crate) struct Task {
    pub id: u64,
    pub name: Arc<str>,
    pub body: TaskBody,
    pub access: AccessSets,
    pub waits: Vec<Barrier>,
    pub signals: Vec<Barrier>,
    completion: Option<Barrier>,
}

impl Task {
    pub fn new(id: u64, name: Arc<str>, body: TaskBody) -> Self {
        Self { id, name, body, access: AccessSets::new(), waits: Vec::new(), signals: Vec::new(), completion: None }
    }
}

/// Something a task can be ordered against.
pub trait Dependency {
    /// Barrier that opens once this dependency is satisfied.
    fn completion_barrier(&mut self) -> Barrier;

    /// Makes this dependency wait until `prerequisite` has finished.
    fn wait_for(&mut self, prerequisite: &mut TaskToken<'_>);
}

impl Dependency for &mut TaskToken<'_> {
    fn completion_barrier(&mut self) -> Barrier {
        self.completion()
    }

    fn wait_for(&mut self, prerequisite: &mut TaskToken<'_>) {
        let done = prerequisite.completion();
        self.task_mut().waits.push(done);
    }
}

impl Dependency for &Barrier {
    fn completion_barrier(&mut self) -> Barrier {
        (*self).clone()
    }

    fn wait_for(&mut self, prerequisite: &mut TaskToken<'_>) {
        self.acquire();
        prerequisite.task_mut().signals.push((*self).clone());
    }
}

impl Dependency for Barrier {
    fn completion_barrier(&mut self) -> Barrier {
        self.clone()
    }

    fn wait_for(&mut self, prerequisite: &mut TaskToken<'_>) {
        self.acquire();
        prerequisite.task_mut().signals.push(self.clone());
    }
}

/// Handle of a task under construction; submits the task on drop.
pub struct TaskToken<'c> {
    context: &'c Context,
    task: Option<Task>,
}

impl<'c> TaskToken<'c> {
    pub(crate) fn new(context: &'c Context, task: Task) -> Self {
        Self { context, task: Some(task) }
    }

    fn task_mut(&mut self) -> &mut Task {
        match self.task.as_mut() {
            Some(task) => task,
            None => unreachable!("task token used after submission"),
        }
    }

    fn task(&self) -> &Task {
        match self.task.as_ref() {
            Some(task) => task,
            None => unreachable!("task token used after submission"),
        }
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.task().name
    }

    /// Resources declared so far.
    pub fn access(&self) -> &AccessSets {
        &self.task().access
    }

    /// Declares a read of resource (or component) `T`.
    pub fn reads<T: 'static>(&mut self) -> &mut Self {
        let id = self.context.registry().resource::<T>();
        self.task_mut().access.add_read(id);
        self
    }

    /// Declares a write of resource (or component) `T`.
    pub fn writes<T: 'static>(&mut self) -> &mut Self {
        let id = self.context.registry().resource::<T>();
        self.task_mut().access.add_write(id);
        self
    }

    /// Declares every capability of `C`.
    pub fn declares<C: CapabilitySet>(&mut self) -> &mut Self {
        let mut access = AccessSets::new();
        C::declare(self.context.registry(), &mut access);
        self.task_mut().access.merge(&access);
        self
    }

    /// Delays this task until `dependency` is satisfied.
    pub fn depends_on<D: Dependency>(&mut self, mut dependency: D) -> &mut Self {
        let barrier = dependency.completion_barrier();
        self.task_mut().waits.push(barrier);
        self
    }

    /// Makes `dependent` wait for this task.
    ///
    /// For a barrier, this task holds the barrier closed until it finishes.
    pub fn required_for<D: Dependency>(&mut self, mut dependent: D) -> &mut Self {
        dependent.wait_for(self);
        self
    }

    /// Barrier that opens when this task (and its deferred work) has finished.
    pub fn completion(&mut self) -> Barrier {
        let task = self.task_mut();
        if let Some(done) = &task.completion {
            return done.clone();
        }
        let done = Barrier::new(format!("{} done", task.name));
        done.acquire();
        task.signals.push(done.clone());
        task.completion = Some(done.clone());
        done
    }

    /// Creates a task that runs after this one.
    pub fn then<F>(&mut self, name: impl Into<Arc<str>>, body: F) -> TaskToken<'c>
    where
        F: FnOnce(&TaskScope<'_>) + Send + 'static,
    {
        let mut next = self.context.add_task(name, body);
        next.depends_on(&mut *self);
        next
    }
}

impl Drop for TaskToken<'_> {
    fn drop(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.access.normalize();
            self.context.submit(task);
        }
    }
}

/// What a running task can reach.
pub struct TaskScope<'s> {
    context: &'s Context,
    name: &'s Arc<str>,
    reservation: &'s Arc<Reservation>,
    signals: &'s [Barrier],
    borrows: BorrowFlags,
}

impl<'s> TaskScope<'s> {
    pub(crate) fn new(context: &'s Context, name: &'s Arc<str>, reservation: &'s Arc<Reservation>, signals: &'s [Barrier]) -> Self {
        Self { context, name, reservation, signals, borrows: BorrowFlags::default() }
    }

    /// Name of the running task.
    pub fn name(&self) -> &str {
        self.name
    }

    /// Context the task runs in.
    pub fn context(&self) -> &'s Context {
        self.context
    }

    /// Resources the task holds.
    pub fn access(&self) -> &AccessSets {
        self.reservation.access()
    }

    /// Rows per chunk used by parallel query traversal.
    pub fn default_chunk_size(&self) -> usize {
        self.context.shared().chunk_size()
    }

    /// Submits a task from inside this one.
    pub fn add_task<F>(&self, name: impl Into<Arc<str>>, body: F) -> TaskToken<'s>
    where
        F: FnOnce(&TaskScope<'_>) + Send + 'static,
    {
        self.context.add_task(name, body)
    }

    /// Parallel-for entry points.
    pub fn parallel(&self) -> Parallel<'_> {
        Parallel {
            shared: self.context.shared(),
            task: self.name,
            reservation: self.reservation,
            signals: self.signals,
        }
    }

    fn resource_ptr<T: Send + Sync + 'static>(&self, write: bool) -> (*mut T, TypeIdx) {
        let declared = self.context.registry().id_of::<T>().filter(|&id| {
            if write {
                self.access().allows_write(id)
            } else {
                self.access().allows_read(id)
            }
        });
        let Some(id) = declared else {
            panic!(
                "task `{}` {} `{}` without declaring it",
                self.name,
                if write { "writes" } else { "reads" },
                type_name::<T>()
            );
        };
        match self.context.resources().ptr::<T>(id) {
            Some(ptr) => (ptr, id),
            None => panic!("context {} has no resource `{}`", self.context.id(), type_name::<T>()),
        }
    }

    /// Shared borrow of context resource `T`; the task must declare a read or write of it.
    ///
    /// ## Panics
    /// If `T` is undeclared, missing, already borrowed mutably by this task, or
    /// is the [`Store`] (open store views through view tasks instead).
    pub fn resource<T: Send + Sync + 'static>(&self) -> Res<'_, T> {
        assert!(
            TypeId::of::<T>() != TypeId::of::<Store>(),
            "task `{}`: open store views through add_view_task or add_edit_task",
            self.name
        );
        let (ptr, id) = self.resource_ptr::<T>(false);
        // SAFETY: the reservation covers a read of `id`; the context keeps the value in place while tasks run.
        unsafe { Res::new(ptr, &self.borrows, id) }
    }

    /// Exclusive borrow of context resource `T`; the task must declare a write of it.
    ///
    /// ## Panics
    /// If `T` is undeclared, missing, or already borrowed by this task.
    pub fn resource_mut<T: Send + Sync + 'static>(&self) -> ResMut<'_, T> {
        let (ptr, id) = self.resource_ptr::<T>(true);
        // SAFETY: the reservation covers a write of `id`.
        unsafe { ResMut::new(ptr, &self.borrows, id) }
    }

    /// Store state for the one view a view task opens.
    pub(crate) fn store_data(&self) -> &StoreData {
        let (ptr, _) = self.resource_ptr::<Store>(false);
        // SAFETY: the task holds a read on the store plus the capabilities of its view.
        unsafe { (*ptr).data_unchecked() }
    }

    /// Store state for the one structural view an edit task opens.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn store_data_mut(&self) -> &mut StoreData {
        let (ptr, _) = self.resource_ptr::<Store>(true);
        // SAFETY: the task holds the store exclusively.
        unsafe { (*ptr).data_mut_unchecked() }
    }
}
