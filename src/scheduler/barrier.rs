//! Barriers: shared counters gating task admission.
//!
//! A [`Barrier`] is open when its count is zero. Every task that signals a
//! barrier raises the count by one when the relationship is registered and
//! lowers it when the task (including any deferred parallel work it issued)
//! completes. Tasks waiting on the barrier are admitted only while it is open.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

struct BarrierInner {
    name: Arc<str>,
    count: AtomicI32,
}

/// Shared reference count; open at zero. Clones share the counter.
#[derive(Clone)]
pub struct Barrier {
    inner: Arc<BarrierInner>,
}

impl Barrier {
    /// Creates an open barrier.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { inner: Arc::new(BarrierInner { name: name.into(), count: AtomicI32::new(0) }) }
    }

    /// Diagnostic name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Outstanding signalers.
    pub fn count(&self) -> i32 {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Returns `true` if no signaler is outstanding.
    pub fn is_open(&self) -> bool {
        self.count() == 0
    }

    /// Returns `true` if both handles share one counter.
    pub fn same_as(&self, other: &Barrier) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn acquire(&self) {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        let previous = self.inner.count.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "barrier `{}` released more often than acquired", self.name());
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Barrier({} = {})", self.name(), self.count())
    }
}
