//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type shared by the aggregate, the ports and the handlers.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An event was applied out of order or was already applied.
    #[error("invalid version on aggregate {aggregate_id}: expected {expected}, got {actual}")]
    InvalidVersion {
        /// The aggregate the event was applied to.
        aggregate_id: Uuid,
        /// The version the aggregate required.
        expected: i64,
        /// The version carried by the event or snapshot.
        actual: i64,
    },

    /// Optimistic concurrency conflict: another writer moved the aggregate
    /// past the version this unit of work loaded.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected stored version {expected}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The base version the writer expected to find.
        expected: i64,
    },

    /// A persistence error (connectivity, constraint violation, bad row).
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A payload could not be converted into the shape the domain expects.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The bus rejected or could not accept a batch of integration events.
    #[error("publish error: {0}")]
    Publish(String),

    /// A commit notification could not be received or decoded.
    #[error("notification error: {0}")]
    Notification(String),

    /// A unit of work failed and rolling it back failed as well.
    #[error("rollback failed: {rollback} (original error: {cause})")]
    RollbackFailed {
        /// The error that caused the rollback.
        cause: Box<DomainError>,
        /// The error returned by the rollback itself.
        rollback: Box<DomainError>,
    },
}

impl DomainError {
    /// Returns `true` for the lost-race outcome of an optimistic write.
    #[must_use]
    pub fn is_concurrency_conflict(&self) -> bool {
        match self {
            Self::ConcurrencyConflict { .. } => true,
            Self::RollbackFailed { cause, .. } => cause.is_concurrency_conflict(),
            _ => false,
        }
    }
}
