//! Durable transaction records and the relay checkpoint.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The durable effect of one handled command, stamped by the store with a
/// global sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identifier, shared by all events of the batch.
    pub id: Uuid,
    /// Aggregate the transaction wrote to.
    pub aggregate_id: Uuid,
    /// Store-assigned position in the total order of transactions.
    pub sequence_id: i64,
}

impl Transaction {
    /// Creates a new transaction record.
    #[must_use]
    pub fn new(id: Uuid, aggregate_id: Uuid, sequence_id: i64) -> Self {
        Self {
            id,
            aggregate_id,
            sequence_id,
        }
    }
}

/// Checkpoint of the outbox relay: the last sequence whose integration events
/// have been published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Last fully relayed transaction sequence.
    pub last_sequence_id: i64,
}

impl Subscription {
    /// Creates a checkpoint at `last_sequence_id`.
    #[must_use]
    pub fn new(last_sequence_id: i64) -> Self {
        Self { last_sequence_id }
    }

    /// Returns `true` when the transaction at `sequence_id` has already been
    /// relayed.
    #[must_use]
    pub fn covers(&self, sequence_id: i64) -> bool {
        self.last_sequence_id >= sequence_id
    }
}

/// Sequence range `(first, last]` of transactions the relay has not yet
/// handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    /// Exclusive lower bound (the current checkpoint).
    pub after: i64,
    /// Inclusive upper bound (the notified transaction).
    pub up_to: i64,
}

impl SequenceRange {
    /// Returns `true` when the range contains no sequence numbers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.after >= self.up_to
    }

    /// Returns `true` if `sequence_id` falls inside the range.
    #[must_use]
    pub fn contains(&self, sequence_id: i64) -> bool {
        sequence_id > self.after && sequence_id <= self.up_to
    }
}
