//! Snapshot records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Serialized aggregate state at a specific version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<S> {
    /// Aggregate the snapshot belongs to.
    pub aggregate_id: Uuid,
    /// Version of the last event folded into the snapshot.
    pub version: i64,
    /// Serialized aggregate state.
    pub payload: S,
}
