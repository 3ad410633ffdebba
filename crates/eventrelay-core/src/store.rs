//! Event store port.
//!
//! Every operation runs inside an explicit unit of work (`Tx`) obtained from
//! [`EventStore::begin`]. Dropping a `Tx` without committing must discard its
//! staged writes, so cancelling a handler leaves the store untouched.

use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateState};
use crate::error::DomainError;
use crate::event::Event;
use crate::snapshot::Snapshot;
use crate::transaction::Subscription;

/// Persistence port for event streams, snapshots, the transaction log and
/// the relay checkpoint.
#[async_trait]
pub trait EventStore<A: AggregateState>: Send + Sync {
    /// Unit-of-work handle.
    type Tx: Send;

    /// Opens a unit of work.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Persistence` if the store is unreachable.
    async fn begin(&self) -> Result<Self::Tx, DomainError>;

    /// Makes every write staged in `tx` durable.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Persistence` if the commit fails; no write is
    /// durable in that case.
    async fn commit(&self, tx: Self::Tx) -> Result<(), DomainError>;

    /// Discards every write staged in `tx`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Persistence` if the rollback fails.
    async fn rollback(&self, tx: Self::Tx) -> Result<(), DomainError>;

    /// Returns the latest snapshot of `aggregate_id`, restricted to versions
    /// strictly below `before_version` when given.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Persistence` or `DomainError::Conversion` on
    /// read or decode failure.
    async fn get_snapshot(
        &self,
        aggregate_id: Uuid,
        before_version: Option<i64>,
        tx: &mut Self::Tx,
    ) -> Result<Option<Snapshot<A::Snapshot>>, DomainError>;

    /// Returns events of `aggregate_id` with `from_version <= version`, and
    /// `version <= to_version` when given, ordered by version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Persistence` or `DomainError::Conversion` on
    /// read or decode failure.
    async fn get_events(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
        to_version: Option<i64>,
        tx: &mut Self::Tx,
    ) -> Result<Vec<Event<A::Payload>>, DomainError>;

    /// Returns events of `aggregate_id` whose transaction sequence lies in
    /// `(after_sequence, up_to_sequence]`, ordered by version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Persistence` or `DomainError::Conversion` on
    /// read or decode failure.
    async fn get_unhandled_events(
        &self,
        aggregate_id: Uuid,
        after_sequence: i64,
        up_to_sequence: i64,
        tx: &mut Self::Tx,
    ) -> Result<Vec<Event<A::Payload>>, DomainError>;

    /// Atomically persists the pending changes of `aggregate` under
    /// `transaction_id`.
    ///
    /// Creates the version row when `base_version` is 0, otherwise moves it
    /// from `base_version` to `version` and fails if the stored value is no
    /// longer `base_version`. Stores `snapshot` when the aggregate reports a
    /// snapshot is due. Appends the transaction record, which receives the
    /// next global sequence number.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` when another writer got
    /// there first, or `DomainError::Persistence` on any other failure.
    async fn update_or_create_aggregate(
        &self,
        transaction_id: Uuid,
        aggregate: &Aggregate<A>,
        snapshot: A::Snapshot,
        tx: &mut Self::Tx,
    ) -> Result<(), DomainError>;

    /// Locks the relay checkpoint for the rest of `tx`. Returns `None` when
    /// another unit of work already holds it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Persistence` on read failure.
    async fn get_subscription(&self, tx: &mut Self::Tx)
    -> Result<Option<Subscription>, DomainError>;

    /// Overwrites the relay checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Persistence` on write failure.
    async fn update_subscription(
        &self,
        subscription: Subscription,
        tx: &mut Self::Tx,
    ) -> Result<(), DomainError>;
}

/// Finishes a unit of work: commits on success, rolls back on failure.
///
/// A failed rollback is reported together with the error that caused it.
///
/// # Errors
///
/// Returns the original error, the commit error, or
/// `DomainError::RollbackFailed`.
pub async fn settle<A, S, T>(
    store: &S,
    tx: S::Tx,
    result: Result<T, DomainError>,
) -> Result<T, DomainError>
where
    A: AggregateState,
    S: EventStore<A> + ?Sized,
{
    match result {
        Ok(value) => {
            store.commit(tx).await?;
            Ok(value)
        }
        Err(cause) => match store.rollback(tx).await {
            Ok(()) => Err(cause),
            Err(rollback) => Err(DomainError::RollbackFailed {
                cause: Box::new(cause),
                rollback: Box::new(rollback),
            }),
        },
    }
}
