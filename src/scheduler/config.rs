//! Scheduler configuration.

use std::time::Duration;

use crate::engine::types::DEFAULT_CHUNK_SIZE;

/// Settings for a [`Scheduler`](crate::scheduler::Scheduler).
///
/// ## Defaults
/// | Field | Value |
/// |-------|-------|
/// | `worker_count` | available parallelism minus one, at least 1 |
/// | `watchdog_interval` | 1 second |
/// | `default_chunk_size` | 256 |
/// | `thread_name` | `"kinetic-worker"` |
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of background worker threads; the frame owner is extra.
    pub worker_count: usize,
    /// Sampling interval of the stall watchdog; `None` disables it.
    pub watchdog_interval: Option<Duration>,
    /// Rows per chunk for parallel query traversal.
    pub default_chunk_size: usize,
    /// Name prefix of worker threads.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(2, |n| n.get());
        Self {
            worker_count: cores.saturating_sub(1).max(1),
            watchdog_interval: Some(Duration::from_secs(1)),
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            thread_name: "kinetic-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Sets the worker count (clamped to at least 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    /// Sets or disables the watchdog interval.
    pub fn with_watchdog(mut self, interval: Option<Duration>) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Sets the parallel traversal chunk size (clamped to at least 1).
    pub fn with_chunk_size(mut self, rows: usize) -> Self {
        self.default_chunk_size = rows.max(1);
        self
    }

    /// Sets the worker thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
