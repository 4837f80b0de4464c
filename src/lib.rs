//! # Kinetic
//!
//! In-memory entity/component store plus a resource-aware task scheduler for
//! real-time simulations.
//!
//! ## Design Goals
//! - Archetype (category) storage keyed by exact signature, for dense iteration
//! - Value-segregated components that partition entities by value
//! - Views whose capability sets are checked at compile time
//! - Tasks that declare resources instead of taking locks
//! - Parallel CPU execution through a shared chunked parallel-for
//!
//! ## Overview
//! ```ignore
//! use kinetic::prelude::*;
//!
//! let registry = Arc::new(TypeRegistry::new());
//! let mut store = Store::new(Arc::clone(&registry));
//! store.create((Position { x: 0.0, y: 0.0 }, Velocity { x: 1.0, y: 0.0 }));
//!
//! let scheduler = Scheduler::with_workers(4);
//! let context = scheduler.make_context(Arc::clone(&registry));
//! context.set_resource(store);
//! context.add_view_task::<(Read<Velocity>, Write<Position>), _>("integrate", |mut view, _| {
//!     view.query::<(&mut Position, &Velocity)>().for_each(|(p, v)| p.x += v.x);
//! });
//! scheduler.run_frame();
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;
pub mod scheduler;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::access::{CapabilitySet, Read, ReadOnly, Write};
pub use engine::component::{Bundle, BundleColumns, Component, ComponentSet, Dense, Segregated, Storage, Tag};
pub use engine::directory::{Entity, Location};
pub use engine::error::{InvariantViolation, SnapshotError, SnapshotResult};
pub use engine::query::{EditView, Fetch, Query, View};
pub use engine::registry::TypeRegistry;
pub use engine::snapshot::Codec;
pub use engine::store::Store;
pub use engine::types::{AccessSets, Signature, TypeIdx};

pub use scheduler::barrier::Barrier;
pub use scheduler::config::SchedulerConfig;
pub use scheduler::context::Context;
pub use scheduler::pool::{Scheduler, SchedulerDump};
pub use scheduler::task::{Dependency, TaskScope, TaskToken};

/// Convenient imports for everyday use.
///
/// ```rust
/// use kinetic::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::component;
    pub use crate::{
        Barrier, Component, Context, EditView, Entity, Read, Scheduler, SchedulerConfig, Store, TaskScope, TypeRegistry, View,
        Write,
    };
}
