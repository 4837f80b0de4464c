//! Parallel-for engine.
//!
//! A [`ParallelJob`] covers a half-open index range cut into fixed-size
//! chunks. A shared atomic cursor hands chunks to whichever thread asks next:
//! the issuing task's thread and any idle worker. A remaining-chunk counter is
//! decremented after each chunk; the thread that brings it to zero runs the
//! job's cleanup exactly once, guarded by an exchange flag.
//!
//! ## Blocking and deferred jobs
//! [`Parallel::for_each`] and [`Parallel::for_each_chunk`] block: the issuing
//! thread works on its own job and returns once every chunk has finished, so
//! the operation may borrow from the caller's stack. Jobs are published to
//! other threads with their lifetime erased; soundness relies on the issuing
//! thread not returning before `remaining` reaches zero, and on a claimed
//! chunk being the only way to reach the operation.
//!
//! [`Parallel::for_each_deferred`] returns immediately with a [`Barrier`]. The
//! job keeps the issuing task's reservation alive and holds the task's
//! completion barriers, so dependents of the task wait for the deferred work
//! as well.

use std::any::Any;
use std::ops::Range;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::scheduler::barrier::Barrier;
use crate::scheduler::pool::Shared;
use crate::scheduler::resource::Reservation;

type ChunkOp = dyn Fn(Range<usize>) + Sync;
type Cleanup = Box<dyn FnOnce() + Send>;

#[derive(Clone, Copy)]
struct OpPtr(*const ChunkOp);

// SAFETY: the pointee is `Sync`, and it outlives every dereference (see module docs).
unsafe impl Send for OpPtr {}
unsafe impl Sync for OpPtr {}

/// One parallel-for job shared between the issuing thread and workers.
pub(crate) struct ParallelJob {
    name: Arc<str>,
    op: OpPtr,
    _owned: Option<Box<dyn Fn(Range<usize>) + Send + Sync>>,
    end: usize,
    chunk: usize,
    cursor: AtomicUsize,
    remaining: AtomicUsize,
    finished: AtomicBool,
    cleanup: Mutex<Option<Cleanup>>,
    panic: Mutex<Option<Box<dyn Any + Send>>>,
    panic_sink: Option<Arc<Shared>>,
}

impl ParallelJob {
    fn chunk_count(range: &Range<usize>, chunk: usize) -> usize {
        range.len().div_ceil(chunk)
    }

    /// Job over a borrowed operation.
    ///
    /// # Safety
    /// `op` must outlive every chunk of the job; the issuer must call
    /// [`ParallelJob::wait`] before `op` goes out of scope.
    unsafe fn borrowed<'a>(name: Arc<str>, range: Range<usize>, chunk: usize, op: &'a (dyn Fn(Range<usize>) + Sync + 'a)) -> Self {
        // SAFETY: lifetime erasure; upheld by the caller.
        let op: &'static ChunkOp = unsafe { std::mem::transmute::<&'a (dyn Fn(Range<usize>) + Sync + 'a), &'static ChunkOp>(op) };
        Self::with_op(name, range, chunk, OpPtr(op), None, None, None)
    }

    fn owned(
        name: Arc<str>,
        range: Range<usize>,
        chunk: usize,
        op: Box<dyn Fn(Range<usize>) + Send + Sync>,
        cleanup: Cleanup,
        panic_sink: Arc<Shared>,
    ) -> Self {
        let ptr: *const ChunkOp = &*op as &ChunkOp;
        Self::with_op(name, range, chunk, OpPtr(ptr), Some(op), Some(cleanup), Some(panic_sink))
    }

    fn with_op(
        name: Arc<str>,
        range: Range<usize>,
        chunk: usize,
        op: OpPtr,
        owned: Option<Box<dyn Fn(Range<usize>) + Send + Sync>>,
        cleanup: Option<Cleanup>,
        panic_sink: Option<Arc<Shared>>,
    ) -> Self {
        assert!(chunk > 0, "parallel-for chunk size must be positive");
        Self {
            name,
            op,
            _owned: owned,
            remaining: AtomicUsize::new(Self::chunk_count(&range, chunk)),
            end: range.end,
            chunk,
            cursor: AtomicUsize::new(range.start),
            finished: AtomicBool::new(false),
            cleanup: Mutex::new(cleanup),
            panic: Mutex::new(None),
            panic_sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` while unclaimed chunks remain.
    pub fn has_work(&self) -> bool {
        self.cursor.load(Ordering::Acquire) < self.end
    }

    /// Returns `true` once every chunk has finished.
    pub fn is_done(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Chunks not yet finished.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Claims and runs one chunk; returns `false` if none was left.
    pub fn work_one(&self) -> bool {
        let Some(chunk) = self.claim() else { return false };
        // SAFETY: a chunk was claimed, so the issuer is still waiting on this job.
        let op = unsafe { &*self.op.0 };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| op(chunk))) {
            self.panic.lock().get_or_insert(payload);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
        true
    }

    /// Advances the cursor by one chunk, clamped at `end`.
    fn claim(&self) -> Option<Range<usize>> {
        let mut start = self.cursor.load(Ordering::Acquire);
        loop {
            if start >= self.end {
                return None;
            }
            let stop = start.saturating_add(self.chunk).min(self.end);
            match self.cursor.compare_exchange_weak(start, stop, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Some(start..stop),
                Err(current) => start = current,
            }
        }
    }

    fn finish(&self) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        if let (Some(sink), Some(payload)) = (&self.panic_sink, self.take_panic()) {
            sink.store_panic(payload);
        }
        if let Some(cleanup) = self.cleanup.lock().take() {
            cleanup();
        }
    }

    /// Runs chunks until none is left, then waits for chunks claimed elsewhere.
    fn wait(&self) {
        while self.work_one() {}
        let mut spins = 0u32;
        while !self.is_done() {
            spins += 1;
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic.lock().take()
    }
}

/// Parallel-for entry points of one task.
pub struct Parallel<'s> {
    pub(crate) shared: &'s Arc<Shared>,
    pub(crate) task: &'s Arc<str>,
    pub(crate) reservation: &'s Arc<Reservation>,
    pub(crate) signals: &'s [Barrier],
}

impl Parallel<'_> {
    /// Calls `op` with every chunk of `range`; returns when all have finished.
    ///
    /// A panic in `op` is re-raised here after the remaining chunks complete.
    pub fn for_each_chunk(&self, range: Range<usize>, chunk: usize, op: &(dyn Fn(Range<usize>) + Sync)) {
        if range.is_empty() {
            return;
        }
        // SAFETY: `wait` below does not return before every chunk has finished.
        let job = Arc::new(unsafe { ParallelJob::borrowed(Arc::clone(self.task), range, chunk, op) });
        self.shared.publish(Arc::clone(&job));
        job.wait();
        self.shared.retire(&job);
        if let Some(payload) = job.take_panic() {
            resume_unwind(payload);
        }
    }

    /// Calls `op` with every index of `range`; returns when all have been visited.
    pub fn for_each(&self, range: Range<usize>, chunk: usize, op: impl Fn(usize) + Sync) {
        self.for_each_chunk(range, chunk, &|indices: Range<usize>| indices.for_each(&op));
    }

    /// Publishes a parallel-for over `range` and returns without waiting.
    ///
    /// The returned barrier opens once every index has been visited. Until
    /// then the issuing task's resources stay reserved and its dependents stay
    /// blocked. A panic in `op` is reported by the frame's
    /// `wait_until_complete`.
    pub fn for_each_deferred(&self, range: Range<usize>, chunk: usize, op: impl Fn(usize) + Send + Sync + 'static) -> Barrier {
        let done = Barrier::new(format!("{} (deferred)", self.task));
        if range.is_empty() {
            return done;
        }
        done.acquire();
        for signal in self.signals {
            signal.acquire();
        }

        let reservation = Arc::clone(self.reservation);
        let signals = self.signals.to_vec();
        let barrier = done.clone();
        let shared = Arc::clone(self.shared);
        shared.begin_deferred();
        let cleanup: Cleanup = Box::new(move || {
            drop(reservation);
            barrier.release();
            for signal in &signals {
                signal.release();
            }
            shared.end_deferred();
        });
        let op: Box<dyn Fn(Range<usize>) + Send + Sync> = Box::new(move |indices: Range<usize>| indices.for_each(&op));
        let job = ParallelJob::owned(Arc::clone(self.task), range, chunk, op, cleanup, Arc::clone(self.shared));
        self.shared.publish(Arc::new(job));
        done
    }
}
