//! # Scheduler Module
//!
//! Resource-aware task scheduling:
//! - tasks with declared read/write resources and barrier relationships,
//! - per-context ready queues with atomic admission,
//! - a fixed worker pool driven frame by frame,
//! - a chunked parallel-for engine shared by tasks and workers,
//! - a stall watchdog.
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod config;
pub mod barrier;
pub mod resource;
pub mod task;
pub mod context;
pub mod parallel;
pub mod pool;
mod watchdog;

pub use pool::Scheduler;
