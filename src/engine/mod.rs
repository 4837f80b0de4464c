//! # Engine Module
//!
//! The category store and everything it is built from:
//! - type ids, signatures and access sets (`types`),
//! - the shared type registry and virtual-type pool (`registry`),
//! - components, storage kinds and bundles (`component`),
//! - type-erased tables, categories and the entity directory,
//! - value segregation,
//! - the store itself, capability-checked views and queries,
//! - snapshots and error types.
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod directory;
pub mod registry;
pub mod component;
pub mod table;
pub mod segregation;
pub mod category;
pub mod store;
pub mod access;
pub mod query;
pub mod snapshot;
