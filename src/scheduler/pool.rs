//! Worker pool and frame control.
//!
//! ## Execution model
//! A fixed set of worker threads and the thread that owns the frame share one
//! ready queue per [`Context`]. Each thread repeats:
//!
//! 1. help with a published parallel-for job, if any has unclaimed chunks,
//! 2. otherwise, while a frame is active, admit the first queued task whose
//!    barriers are open and whose resources are free, and run it,
//! 3. otherwise sleep until something changes.
//!
//! Anything that can make another task admissible (submission, task
//! completion, a released reservation, a new parallel job, frame start)
//! bumps a wake epoch and notifies sleepers. A thread reads the epoch before
//! scanning and only sleeps while it is unchanged, so no wakeup is lost.
//!
//! ## Frames
//! [`Scheduler::start_frame`] opens admission. [`Scheduler::wait_until_complete`]
//! turns the calling thread into an extra worker until every submitted task and
//! deferred job has finished, then closes the frame. A task body that panicked
//! is re-raised there, after the frame has otherwise drained.

use std::any::Any;
use std::fmt;
use std::panic::resume_unwind;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::engine::registry::TypeRegistry;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::context::{Context, ContextDump};
use crate::scheduler::parallel::ParallelJob;
use crate::scheduler::watchdog::Watchdog;

struct Signal {
    epoch: u64,
    running: bool,
}

/// State shared by the scheduler, its workers and every context.
pub(crate) struct Shared {
    contexts: RwLock<Vec<Arc<Context>>>,
    jobs: Mutex<Vec<Arc<ParallelJob>>>,
    signal: Mutex<Signal>,
    wake: Condvar,
    pending: AtomicUsize,
    frame_active: AtomicBool,
    frames_started: AtomicU64,
    frames_completed: AtomicU64,
    panic: Mutex<Option<Box<dyn Any + Send>>>,
    chunk_size: usize,
}

impl Shared {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            contexts: RwLock::new(Vec::new()),
            jobs: Mutex::new(Vec::new()),
            signal: Mutex::new(Signal { epoch: 0, running: true }),
            wake: Condvar::new(),
            pending: AtomicUsize::new(0),
            frame_active: AtomicBool::new(false),
            frames_started: AtomicU64::new(0),
            frames_completed: AtomicU64::new(0),
            panic: Mutex::new(None),
            chunk_size: config.default_chunk_size,
        }
    }

    /// Wakes every sleeping thread.
    pub fn notify(&self) {
        let mut signal = self.signal.lock();
        signal.epoch = signal.epoch.wrapping_add(1);
        self.wake.notify_all();
    }

    fn epoch(&self) -> (u64, bool) {
        let signal = self.signal.lock();
        (signal.epoch, signal.running)
    }

    fn sleep_unless_changed(&self, epoch: u64) {
        let mut signal = self.signal.lock();
        while signal.epoch == epoch && signal.running {
            self.wake.wait(&mut signal);
        }
    }

    fn shut_down(&self) {
        let mut signal = self.signal.lock();
        signal.running = false;
        signal.epoch = signal.epoch.wrapping_add(1);
        self.wake.notify_all();
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn frame_active(&self) -> bool {
        self.frame_active.load(Ordering::Acquire)
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Counts one submitted task.
    pub fn task_submitted(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.notify();
    }

    /// Counts one finished task.
    pub fn task_finished(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0);
        self.notify();
    }

    pub fn begin_deferred(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end_deferred(&self) {
        self.task_finished();
    }

    pub fn store_panic(&self, payload: Box<dyn Any + Send>) {
        self.panic.lock().get_or_insert(payload);
    }

    /// Makes a parallel job visible to every thread.
    pub fn publish(&self, job: Arc<ParallelJob>) {
        self.jobs.lock().push(job);
        self.notify();
    }

    /// Removes a finished job from the shared list.
    pub fn retire(&self, job: &Arc<ParallelJob>) {
        self.jobs.lock().retain(|other| !Arc::ptr_eq(other, job));
    }

    fn next_job(&self) -> Option<Arc<ParallelJob>> {
        let mut jobs = self.jobs.lock();
        jobs.retain(|job| job.has_work() || !job.is_done());
        jobs.iter().find(|job| job.has_work()).cloned()
    }

    pub fn register(&self, context: Arc<Context>) {
        self.contexts.write().push(context);
    }

    /// Runs one unit of work; returns `false` if nothing was runnable.
    fn run_one(&self) -> bool {
        if let Some(job) = self.next_job() {
            if job.work_one() {
                return true;
            }
        }
        if !self.frame_active() {
            return false;
        }
        let contexts: Vec<Arc<Context>> = self.contexts.read().clone();
        for context in contexts {
            if let Some((task, reservation)) = context.try_admit() {
                context.run(task, reservation);
                return true;
            }
        }
        false
    }

    fn worker_loop(self: Arc<Self>, index: usize) {
        tracing::trace!(worker = index, "worker started");
        loop {
            let (epoch, running) = self.epoch();
            if !running {
                break;
            }
            if !self.run_one() {
                self.sleep_unless_changed(epoch);
            }
        }
        tracing::trace!(worker = index, "worker stopped");
    }

    pub fn dump(&self) -> SchedulerDump {
        SchedulerDump {
            frame: self.frames_started.load(Ordering::Acquire),
            frame_active: self.frame_active(),
            frames_completed: self.frames_completed(),
            pending: self.pending(),
            parallel_jobs: self.jobs.lock().iter().map(|job| (job.name().to_string(), job.remaining())).collect(),
            contexts: self.contexts.read().iter().map(|context| context.dump()).collect(),
        }
    }
}

/// Fixed worker pool running the tasks of every context it created.
///
/// ## Example
/// ```ignore
/// let scheduler = Scheduler::with_workers(4);
/// let context = scheduler.make_context(Arc::clone(&registry));
/// context.add_task("integrate", |scope| { /* ... */ }).writes::<Position>();
/// scheduler.start_frame();
/// scheduler.wait_until_complete();
/// ```
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    watchdog: Option<Watchdog>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Starts the worker threads (and the watchdog, if configured).
    pub fn new(config: SchedulerConfig) -> Self {
        let shared = Arc::new(Shared::new(&config));
        let workers = (0..config.worker_count.max(1))
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("{}-{index}", config.thread_name))
                    .spawn(move || shared.worker_loop(index))
                    .unwrap_or_else(|err| panic!("failed to spawn scheduler worker: {err}"))
            })
            .collect();
        let watchdog = config.watchdog_interval.map(|interval| Watchdog::start(Arc::clone(&shared), interval));
        tracing::debug!(workers = config.worker_count, chunk = config.default_chunk_size, "scheduler started");
        Self { shared, workers, watchdog, config }
    }

    /// Default configuration with `workers` worker threads.
    pub fn with_workers(workers: usize) -> Self {
        Self::new(SchedulerConfig::default().with_workers(workers))
    }

    /// Configuration the scheduler was started with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Number of background workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Creates a scheduling context whose resource ids come from `registry`.
    pub fn make_context(&self, registry: Arc<TypeRegistry>) -> Arc<Context> {
        let id = self.shared.contexts.read().len();
        let context = Arc::new(Context::new(id, registry, Arc::clone(&self.shared)));
        self.shared.register(Arc::clone(&context));
        tracing::debug!(context = id, "created context");
        context
    }

    /// Opens a frame: submitted tasks become admissible and workers wake.
    ///
    /// ## Panics
    /// If the previous frame has not completed.
    pub fn start_frame(&self) {
        let was_active = self.shared.frame_active.swap(true, Ordering::AcqRel);
        assert!(!was_active, "start_frame: previous frame still running");
        let frame = self.shared.frames_started.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(frame, pending = self.shared.pending(), "frame started");
        self.shared.notify();
    }

    /// Runs tasks on the calling thread until the frame has drained.
    ///
    /// ## Panics
    /// If no frame is active, or re-raises the first panic of a task body.
    pub fn wait_until_complete(&self) {
        assert!(self.shared.frame_active(), "wait_until_complete: no frame started");
        loop {
            let (epoch, _) = self.shared.epoch();
            if self.shared.pending() == 0 {
                break;
            }
            if !self.shared.run_one() {
                self.shared.sleep_unless_changed(epoch);
            }
        }
        self.shared.frame_active.store(false, Ordering::Release);
        let completed = self.shared.frames_completed.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(frame = completed, "frame complete");
        if let Some(payload) = self.shared.panic.lock().take() {
            resume_unwind(payload);
        }
    }

    /// Convenience for [`start_frame`](Self::start_frame) then
    /// [`wait_until_complete`](Self::wait_until_complete).
    pub fn run_frame(&self) {
        self.start_frame();
        self.wait_until_complete();
    }

    /// Frames completed so far.
    pub fn frames_completed(&self) -> u64 {
        self.shared.frames_completed()
    }

    /// Submitted tasks (and deferred jobs) not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    /// Snapshot of pending tasks, barriers and resource holders; also logged at `info`.
    pub fn dump(&self) -> SchedulerDump {
        let dump = self.shared.dump();
        tracing::info!("{dump}");
        dump
    }
}

/// Message carried by a panic payload, if it is a string.
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop();
        }
        self.shared.shut_down();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if let Err(payload) = worker.join() {
                tracing::warn!(thread = %name, reason = panic_reason(payload.as_ref()), "scheduler thread exited with a panic");
            }
        }
        self.shared.contexts.write().clear();
        self.shared.jobs.lock().clear();
        tracing::debug!("scheduler stopped");
    }
}

/// Diagnostic state of a scheduler at one instant.
#[derive(Clone, Debug)]
pub struct SchedulerDump {
    /// Frames started so far.
    pub frame: u64,
    /// Whether a frame is open.
    pub frame_active: bool,
    /// Frames completed so far.
    pub frames_completed: u64,
    /// Submitted tasks and deferred jobs not yet finished.
    pub pending: usize,
    /// Published parallel jobs with their unfinished chunk counts.
    pub parallel_jobs: Vec<(String, usize)>,
    /// Per-context state.
    pub contexts: Vec<ContextDump>,
}

impl fmt::Display for SchedulerDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "scheduler: frame {} ({}), {} completed, {} pending",
            self.frame,
            if self.frame_active { "active" } else { "idle" },
            self.frames_completed,
            self.pending
        )?;
        for (name, remaining) in &self.parallel_jobs {
            writeln!(f, "  parallel job `{name}`: {remaining} chunks left")?;
        }
        for context in &self.contexts {
            write!(f, "{context}")?;
        }
        Ok(())
    }
}
