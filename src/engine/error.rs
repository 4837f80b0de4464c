//! Error types surfaced by the store.
//!
//! Most misuse of the store is a **programmer error** (operating on a dead
//! entity, attaching a component twice, removing an absent one, touching a
//! resource a task never declared). Those conditions panic with a descriptive
//! message, because continuing would corrupt the directory/category lockstep.
//!
//! Two situations are recoverable and get typed errors here:
//!
//! * [`SnapshotError`]: encoding or decoding a store snapshot.
//! * [`InvariantViolation`]: returned by [`Store::validate`], which audits the
//!   directory and every category and is mainly used by tests and debug tooling.
//!
//! [`Store::validate`]: crate::engine::store::Store::validate

use thiserror::Error;

use crate::engine::directory::Entity;
use crate::engine::types::{CategoryId, RowIdx};

/// Failure while writing or reading a store snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The element codec or the snapshot envelope failed to encode.
    #[error("failed to encode snapshot data: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The element codec or the snapshot envelope failed to decode.
    #[error("failed to decode snapshot data: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// The snapshot names a type the registry has never seen.
    #[error("snapshot references unregistered type `{0}`")]
    UnknownType(String),

    /// A table was asked to encode or decode but its type carries no codec.
    #[error("type `{0}` has no serialization codec")]
    MissingCodec(String),

    /// A category holds more rows than the snapshot format can count.
    #[error("category of {0} rows is too large for a snapshot")]
    TooManyRows(usize),

    /// Row counts or indices inside the snapshot do not line up.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Convenience alias for snapshot results.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// A broken store invariant found by [`Store::validate`].
///
/// [`Store::validate`]: crate::engine::store::Store::validate
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The directory points at a row that holds a different entity.
    #[error("directory maps {entity:?} to category {category} row {row}, which holds {found:?}")]
    DirectoryMismatch {
        /// Entity whose directory entry is wrong.
        entity: Entity,
        /// Category named by the directory.
        category: CategoryId,
        /// Row named by the directory.
        row: RowIdx,
        /// Entity actually stored there, if the row exists.
        found: Option<Entity>,
    },

    /// A table's row count differs from its category's id list.
    #[error("table `{table}` in category {category} has {rows} rows but the category lists {ids} ids")]
    RowCountMismatch {
        /// Offending category.
        category: CategoryId,
        /// Element type name of the table.
        table: &'static str,
        /// Rows held by the table.
        rows: usize,
        /// Ids held by the category.
        ids: usize,
    },

    /// A category stores an entity the directory does not place there.
    #[error("{entity:?} is stored in category {category} row {row} but the directory disagrees")]
    Orphan {
        /// Entity found in the category.
        entity: Entity,
        /// Category holding it.
        category: CategoryId,
        /// Row holding it.
        row: RowIdx,
    },

    /// The directory and the categories disagree on the population.
    #[error("directory tracks {directory} live entities but categories hold {stored}")]
    PopulationMismatch {
        /// Live entries in the directory.
        directory: usize,
        /// Total ids across categories.
        stored: usize,
    },
}
