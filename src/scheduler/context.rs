//! Scheduling contexts.
//!
//! A [`Context`] owns a ready queue, the resource admission counters of the
//! tasks it admits and a set of resources those tasks borrow. Workers of the
//! scheduler that created a context scan it for admissible tasks.
//!
//! ## Store tasks
//! A [`Store`] placed into the context with [`Context::set_resource`] is
//! reached through view tasks, which derive their resources from a capability
//! set:
//!
//! | Constructor | Store resource | Component resources |
//! |-------------|----------------|---------------------|
//! | [`Context::add_view_task`] | read | reads and writes of `C` |
//! | [`Context::add_edit_task`] | write | reads and writes of `C` |
//!
//! Views over disjoint component types therefore run concurrently, while a
//! structural edit excludes every other view of the store.

use std::any::{type_name, Any};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::engine::access::CapabilitySet;
use crate::engine::query::{EditView, View};
use crate::engine::registry::TypeRegistry;
use crate::engine::store::Store;
use crate::engine::types::Signature;
use crate::scheduler::barrier::Barrier;
use crate::scheduler::pool::Shared;
use crate::scheduler::resource::{Reservation, ResourceCounters, ResourceMap};
use crate::scheduler::task::{Task, TaskScope, TaskToken};

/// Ready queue, admission counters and resources of one scheduling domain.
pub struct Context {
    id: usize,
    registry: Arc<TypeRegistry>,
    shared: Arc<Shared>,
    queue: Mutex<Vec<Task>>,
    counters: Arc<Mutex<ResourceCounters>>,
    running: Mutex<Vec<(u64, Arc<str>)>>,
    resources: ResourceMap,
    next_task: AtomicU64,
}

impl Context {
    pub(crate) fn new(id: usize, registry: Arc<TypeRegistry>, shared: Arc<Shared>) -> Self {
        Self {
            id,
            registry,
            shared,
            queue: Mutex::new(Vec::new()),
            counters: Arc::new(Mutex::new(ResourceCounters::default())),
            running: Mutex::new(Vec::new()),
            resources: ResourceMap::default(),
            next_task: AtomicU64::new(0),
        }
    }

    /// Context index within its scheduler.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Registry resource ids are drawn from.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    /// Tasks submitted but not yet admitted.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Creates a task; it is submitted when the returned token drops.
    pub fn add_task<F>(&self, name: impl Into<Arc<str>>, body: F) -> TaskToken<'_>
    where
        F: FnOnce(&TaskScope<'_>) + Send + 'static,
    {
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);
        TaskToken::new(self, Task::new(id, name.into(), Box::new(body)))
    }

    /// Creates a task that receives a view over the context's [`Store`].
    pub fn add_view_task<C, F>(&self, name: impl Into<Arc<str>>, body: F) -> TaskToken<'_>
    where
        C: CapabilitySet,
        F: FnOnce(View<'_, C>, &TaskScope<'_>) + Send + 'static,
    {
        let mut token = self.add_task(name, move |scope: &TaskScope<'_>| body(View::new(scope.store_data()), scope));
        token.reads::<Store>().declares::<C>();
        token
    }

    /// Creates a task that receives a structural view over the context's [`Store`].
    pub fn add_edit_task<C, F>(&self, name: impl Into<Arc<str>>, body: F) -> TaskToken<'_>
    where
        C: CapabilitySet,
        F: FnOnce(EditView<'_, C>, &TaskScope<'_>) + Send + 'static,
    {
        let mut token = self.add_task(name, move |scope: &TaskScope<'_>| body(EditView::new(scope.store_data_mut()), scope));
        token.writes::<Store>().declares::<C>();
        token
    }

    fn assert_idle(&self, operation: &str) {
        assert!(!self.shared.frame_active(), "{operation}: resources of context {} cannot change during a frame", self.id);
    }

    /// Places `value` as resource `T`, returning the previous value.
    ///
    /// ## Panics
    /// During a frame, or for a [`Store`] bound to another registry.
    pub fn set_resource<T: Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.assert_idle("set_resource");
        if let Some(store) = (&value as &dyn Any).downcast_ref::<Store>() {
            assert!(Arc::ptr_eq(store.registry(), &self.registry), "store and context must share one type registry");
        }
        let id = self.registry.resource::<T>();
        tracing::debug!(context = self.id, resource = type_name::<T>(), "resource set");
        self.resources.insert(id, value)
    }

    /// Removes and returns resource `T`.
    pub fn take_resource<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.assert_idle("take_resource");
        let id = self.registry.id_of::<T>()?;
        self.resources.take(id)
    }

    /// Runs `f` on resource `T` outside of any frame.
    pub fn with_resource<T: Send + Sync + 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.assert_idle("with_resource");
        let id = self.registry.id_of::<T>()?;
        let ptr = self.resources.ptr::<T>(id)?;
        // SAFETY: no frame is active, so no task holds the value.
        Some(f(unsafe { &mut *ptr }))
    }

    /// Returns `true` if resource `T` is present.
    pub fn has_resource<T: 'static>(&self) -> bool {
        self.registry.id_of::<T>().is_some_and(|id| self.resources.contains(id))
    }

    pub(crate) fn submit(&self, task: Task) {
        tracing::trace!(task = %task.name, context = self.id, "task submitted");
        self.queue.lock().push(task);
        self.shared.task_submitted();
    }

    /// Removes the first admissible task from the queue and reserves its resources.
    pub(crate) fn try_admit(&self) -> Option<(Task, Arc<Reservation>)> {
        let mut queue = self.queue.lock();
        let mut counters = self.counters.lock();
        let index = queue
            .iter()
            .position(|task| task.waits.iter().all(Barrier::is_open) && counters.admits(&task.access))?;
        let task = queue.remove(index);
        let reservation = Reservation::take(&self.counters, &mut counters, task.access.clone(), &self.shared);
        Some((task, Arc::new(reservation)))
    }

    pub(crate) fn run(&self, task: Task, reservation: Arc<Reservation>) {
        let Task { id, name, body, signals, .. } = task;
        self.running.lock().push((id, Arc::clone(&name)));
        tracing::debug!(task = %name, context = self.id, "task started");
        let started = Instant::now();

        let outcome = {
            let scope = TaskScope::new(self, &name, &reservation, &signals);
            catch_unwind(AssertUnwindSafe(|| body(&scope)))
        };

        self.running.lock().retain(|&(running, _)| running != id);
        drop(reservation);
        for signal in &signals {
            signal.release();
        }
        match outcome {
            Ok(()) => tracing::debug!(task = %name, elapsed_us = started.elapsed().as_micros() as u64, "task finished"),
            Err(payload) => {
                tracing::error!(task = %name, "task panicked");
                self.shared.store_panic(payload);
            }
        }
        self.shared.task_finished();
    }

    fn names(&self, access: &Signature) -> Vec<String> {
        access.iter().map(|id| self.registry.name_of(id)).collect()
    }

    pub(crate) fn dump(&self) -> ContextDump {
        let queue = self.queue.lock();
        let counters = self.counters.lock();
        let queued = queue
            .iter()
            .map(|task| TaskDump {
                name: task.name.to_string(),
                reads: self.names(&task.access.read),
                writes: self.names(&task.access.write),
                waits: task.waits.iter().map(|b| (b.name().to_string(), b.count())).collect(),
                admissible: task.waits.iter().all(Barrier::is_open) && counters.admits(&task.access),
            })
            .collect();
        let held = counters
            .held()
            .into_iter()
            .map(|(id, holders)| HeldDump { resource: self.registry.name_of(id), readers: holders.readers, writer: holders.writer })
            .collect();
        ContextDump {
            id: self.id,
            queued,
            running: self.running.lock().iter().map(|(_, name)| name.to_string()).collect(),
            held,
            resources: self.resources.ids().into_iter().map(|id| self.registry.name_of(id)).collect(),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.id).field("queued", &self.queued()).finish()
    }
}

/// Diagnostic state of one queued task.
#[derive(Clone, Debug)]
pub struct TaskDump {
    /// Task name.
    pub name: String,
    /// Resources read.
    pub reads: Vec<String>,
    /// Resources written.
    pub writes: Vec<String>,
    /// Barriers waited on, with their counts.
    pub waits: Vec<(String, i32)>,
    /// Whether the task could be admitted at the time of the dump.
    pub admissible: bool,
}

/// Holders of one reserved resource.
#[derive(Clone, Debug)]
pub struct HeldDump {
    /// Resource name.
    pub resource: String,
    /// Admitted readers.
    pub readers: u32,
    /// Whether an admitted task writes it.
    pub writer: bool,
}

/// Diagnostic state of one context.
#[derive(Clone, Debug)]
pub struct ContextDump {
    /// Context index.
    pub id: usize,
    /// Tasks waiting for admission.
    pub queued: Vec<TaskDump>,
    /// Names of running tasks.
    pub running: Vec<String>,
    /// Reserved resources.
    pub held: Vec<HeldDump>,
    /// Resources stored in the context.
    pub resources: Vec<String>,
}

impl fmt::Display for ContextDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  context {}: {} queued, {} running", self.id, self.queued.len(), self.running.len())?;
        for name in &self.running {
            writeln!(f, "    running `{name}`")?;
        }
        for task in &self.queued {
            write!(f, "    queued `{}`", task.name)?;
            if !task.reads.is_empty() {
                write!(f, " reads {:?}", task.reads)?;
            }
            if !task.writes.is_empty() {
                write!(f, " writes {:?}", task.writes)?;
            }
            for (barrier, count) in &task.waits {
                write!(f, " waits `{barrier}`={count}")?;
            }
            writeln!(f, "{}", if task.admissible { " [admissible]" } else { " [blocked]" })?;
        }
        for held in &self.held {
            writeln!(
                f,
                "    held `{}`: {} reader(s){}",
                held.resource,
                held.readers,
                if held.writer { ", 1 writer" } else { "" }
            )?;
        }
        Ok(())
    }
}
