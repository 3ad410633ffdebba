//! In-memory `EventStore` with unit-of-work semantics.
//!
//! Writes are staged on the [`InMemoryTx`] and only become visible on
//! commit. Updating an aggregate claims its version row until the unit of
//! work ends, and reading the checkpoint locks it the same way
//! `FOR UPDATE SKIP LOCKED` does. Dropping a transaction releases both.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventrelay_core::aggregate::{Aggregate, AggregateState};
use eventrelay_core::error::DomainError;
use eventrelay_core::event::Event;
use eventrelay_core::snapshot::Snapshot;
use eventrelay_core::store::EventStore;
use eventrelay_core::transaction::{Subscription, Transaction};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Store operations that a test can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// `begin`
    Begin,
    /// `commit`
    Commit,
    /// `rollback`
    Rollback,
    /// `get_snapshot`
    GetSnapshot,
    /// `get_events`
    GetEvents,
    /// `get_unhandled_events`
    GetUnhandledEvents,
    /// `update_or_create_aggregate`
    UpdateOrCreateAggregate,
    /// `get_subscription`
    GetSubscription,
    /// `update_subscription`
    UpdateSubscription,
}

struct Committed<A: AggregateState> {
    versions: HashMap<Uuid, i64>,
    events: Vec<Event<A::Payload>>,
    snapshots: Vec<Snapshot<A::Snapshot>>,
    transactions: Vec<Transaction>,
    claimed: HashSet<Uuid>,
}

impl<A: AggregateState> Default for Committed<A> {
    fn default() -> Self {
        Self {
            versions: HashMap::new(),
            events: Vec::new(),
            snapshots: Vec::new(),
            transactions: Vec::new(),
            claimed: HashSet::new(),
        }
    }
}

impl<A: AggregateState> Committed<A> {
    fn record_transaction(&mut self, id: Uuid, aggregate_id: Uuid) -> Transaction {
        let sequence_id = self.transactions.last().map_or(1, |t| t.sequence_id + 1);
        let transaction = Transaction::new(id, aggregate_id, sequence_id);
        self.transactions.push(transaction);
        transaction
    }

    fn sequence_of(&self, transaction_id: Uuid) -> Option<i64> {
        self.transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .map(|t| t.sequence_id)
    }
}

/// Unit of work of the [`InMemoryEventStore`].
pub struct InMemoryTx<A: AggregateState> {
    committed: Arc<Mutex<Committed<A>>>,
    claims: Vec<Uuid>,
    versions: Vec<(Uuid, i64, i64)>,
    events: Vec<Event<A::Payload>>,
    snapshots: Vec<Snapshot<A::Snapshot>>,
    transactions: Vec<(Uuid, Uuid)>,
    subscription_guard: Option<OwnedMutexGuard<Subscription>>,
    subscription: Option<Subscription>,
}

impl<A: AggregateState> Drop for InMemoryTx<A> {
    fn drop(&mut self) {
        if self.claims.is_empty() {
            return;
        }
        if let Ok(mut committed) = self.committed.lock() {
            for id in &self.claims {
                committed.claimed.remove(id);
            }
        }
    }
}

/// An `EventStore` backed by process memory.
///
/// Construct one per test through [`InMemoryEventStore::builder`].
pub struct InMemoryEventStore<A: AggregateState> {
    committed: Arc<Mutex<Committed<A>>>,
    subscription: Arc<AsyncMutex<Subscription>>,
    failures: HashSet<StoreOperation>,
    yield_after_reads: bool,
}

impl<A: AggregateState> Default for InMemoryEventStore<A> {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<A: AggregateState> InMemoryEventStore<A> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts building a store with seeded state.
    #[must_use]
    pub fn builder() -> InMemoryEventStoreBuilder<A> {
        InMemoryEventStoreBuilder {
            committed: Committed::default(),
            checkpoint: 0,
            failures: HashSet::new(),
            yield_after_reads: false,
        }
    }

    /// Returns the committed events of `aggregate_id` ordered by version.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self, aggregate_id: Uuid) -> Vec<Event<A::Payload>> {
        let committed = self.committed.lock().unwrap();
        let mut events: Vec<_> = committed
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        events
    }

    /// Returns the committed snapshots of `aggregate_id` ordered by version.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn snapshots(&self, aggregate_id: Uuid) -> Vec<Snapshot<A::Snapshot>> {
        let committed = self.committed.lock().unwrap();
        let mut snapshots: Vec<_> = committed
            .snapshots
            .iter()
            .filter(|s| s.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.version);
        snapshots
    }

    /// Returns the committed transaction log in sequence order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.committed.lock().unwrap().transactions.clone()
    }

    /// Returns the committed version of `aggregate_id`, if it exists.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn version(&self, aggregate_id: Uuid) -> Option<i64> {
        self.committed
            .lock()
            .unwrap()
            .versions
            .get(&aggregate_id)
            .copied()
    }

    /// Returns `true` while any open unit of work holds a version claim.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn has_open_claims(&self) -> bool {
        !self.committed.lock().unwrap().claimed.is_empty()
    }

    /// Returns the committed checkpoint, waiting for any holder of the lock.
    pub async fn checkpoint(&self) -> Subscription {
        *self.subscription.lock().await
    }

    fn check(&self, operation: StoreOperation) -> Result<(), DomainError> {
        if self.failures.contains(&operation) {
            return Err(DomainError::Persistence(format!(
                "injected failure in {operation:?}"
            )));
        }
        Ok(())
    }

    async fn pause_after_read(&self) {
        if self.yield_after_reads {
            tokio::task::yield_now().await;
        }
    }
}

/// Builder for [`InMemoryEventStore`].
pub struct InMemoryEventStoreBuilder<A: AggregateState> {
    committed: Committed<A>,
    checkpoint: i64,
    failures: HashSet<StoreOperation>,
    yield_after_reads: bool,
}

impl<A: AggregateState> InMemoryEventStoreBuilder<A> {
    /// Seeds committed history. Events sharing a transaction id form one
    /// transaction; transactions receive sequence numbers in first-seen
    /// order.
    #[must_use]
    pub fn with_events(mut self, events: Vec<Event<A::Payload>>) -> Self {
        for event in events {
            if self.committed.sequence_of(event.transaction_id).is_none() {
                self.committed
                    .record_transaction(event.transaction_id, event.aggregate_id);
            }
            let version = self
                .committed
                .versions
                .entry(event.aggregate_id)
                .or_insert(0);
            *version = (*version).max(event.version);
            self.committed.events.push(event);
        }
        self
    }

    /// Seeds a committed snapshot.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: Snapshot<A::Snapshot>) -> Self {
        self.committed.snapshots.push(snapshot);
        self
    }

    /// Seeds the relay checkpoint.
    #[must_use]
    pub fn with_checkpoint(mut self, last_sequence_id: i64) -> Self {
        self.checkpoint = last_sequence_id;
        self
    }

    /// Makes `operation` fail with a persistence error.
    #[must_use]
    pub fn failing_on(mut self, operation: StoreOperation) -> Self {
        self.failures.insert(operation);
        self
    }

    /// Yields to the scheduler after every read so that concurrent units of
    /// work joined on one task interleave their loads.
    #[must_use]
    pub fn yielding_after_reads(mut self) -> Self {
        self.yield_after_reads = true;
        self
    }

    /// Builds the store.
    #[must_use]
    pub fn build(self) -> InMemoryEventStore<A> {
        InMemoryEventStore {
            committed: Arc::new(Mutex::new(self.committed)),
            subscription: Arc::new(AsyncMutex::new(Subscription::new(self.checkpoint))),
            failures: self.failures,
            yield_after_reads: self.yield_after_reads,
        }
    }
}

#[async_trait]
impl<A: AggregateState> EventStore<A> for InMemoryEventStore<A> {
    type Tx = InMemoryTx<A>;

    async fn begin(&self) -> Result<InMemoryTx<A>, DomainError> {
        self.check(StoreOperation::Begin)?;
        Ok(InMemoryTx {
            committed: Arc::clone(&self.committed),
            claims: Vec::new(),
            versions: Vec::new(),
            events: Vec::new(),
            snapshots: Vec::new(),
            transactions: Vec::new(),
            subscription_guard: None,
            subscription: None,
        })
    }

    async fn commit(&self, mut tx: InMemoryTx<A>) -> Result<(), DomainError> {
        self.check(StoreOperation::Commit)?;
        let mut committed = self.committed.lock().unwrap();
        for &(aggregate_id, base, _) in &tx.versions {
            let stored = committed.versions.get(&aggregate_id).copied();
            if stored.unwrap_or(0) != base {
                return Err(DomainError::ConcurrencyConflict {
                    aggregate_id,
                    expected: base,
                });
            }
        }
        for (aggregate_id, _, next) in tx.versions.drain(..) {
            committed.versions.insert(aggregate_id, next);
        }
        committed.events.append(&mut tx.events);
        committed.snapshots.append(&mut tx.snapshots);
        for (id, aggregate_id) in tx.transactions.drain(..) {
            committed.record_transaction(id, aggregate_id);
        }
        if let (Some(subscription), Some(guard)) =
            (tx.subscription.take(), tx.subscription_guard.as_mut())
        {
            **guard = subscription;
        }
        Ok(())
    }

    async fn rollback(&self, tx: InMemoryTx<A>) -> Result<(), DomainError> {
        drop(tx);
        self.check(StoreOperation::Rollback)
    }

    async fn get_snapshot(
        &self,
        aggregate_id: Uuid,
        before_version: Option<i64>,
        _tx: &mut InMemoryTx<A>,
    ) -> Result<Option<Snapshot<A::Snapshot>>, DomainError> {
        self.check(StoreOperation::GetSnapshot)?;
        let snapshot = {
            let committed = self.committed.lock().unwrap();
            committed
                .snapshots
                .iter()
                .filter(|s| s.aggregate_id == aggregate_id)
                .filter(|s| before_version.is_none_or(|before| s.version < before))
                .max_by_key(|s| s.version)
                .cloned()
        };
        self.pause_after_read().await;
        Ok(snapshot)
    }

    async fn get_events(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
        to_version: Option<i64>,
        _tx: &mut InMemoryTx<A>,
    ) -> Result<Vec<Event<A::Payload>>, DomainError> {
        self.check(StoreOperation::GetEvents)?;
        let mut events: Vec<_> = {
            let committed = self.committed.lock().unwrap();
            committed
                .events
                .iter()
                .filter(|e| e.aggregate_id == aggregate_id && e.version >= from_version)
                .filter(|e| to_version.is_none_or(|to| e.version <= to))
                .cloned()
                .collect()
        };
        events.sort_by_key(|e| e.version);
        self.pause_after_read().await;
        Ok(events)
    }

    async fn get_unhandled_events(
        &self,
        aggregate_id: Uuid,
        after_sequence: i64,
        up_to_sequence: i64,
        _tx: &mut InMemoryTx<A>,
    ) -> Result<Vec<Event<A::Payload>>, DomainError> {
        self.check(StoreOperation::GetUnhandledEvents)?;
        let mut events: Vec<_> = {
            let committed = self.committed.lock().unwrap();
            committed
                .events
                .iter()
                .filter(|e| e.aggregate_id == aggregate_id)
                .filter(|e| {
                    committed
                        .sequence_of(e.transaction_id)
                        .is_some_and(|seq| seq > after_sequence && seq <= up_to_sequence)
                })
                .cloned()
                .collect()
        };
        events.sort_by_key(|e| e.version);
        self.pause_after_read().await;
        Ok(events)
    }

    async fn update_or_create_aggregate(
        &self,
        transaction_id: Uuid,
        aggregate: &Aggregate<A>,
        snapshot: A::Snapshot,
        tx: &mut InMemoryTx<A>,
    ) -> Result<(), DomainError> {
        self.check(StoreOperation::UpdateOrCreateAggregate)?;
        let aggregate_id = aggregate.id();
        let base = aggregate.base_version();
        {
            let mut committed = self.committed.lock().unwrap();
            let holds_claim = tx.claims.contains(&aggregate_id);
            let stored = committed.versions.get(&aggregate_id).copied();
            let in_sync = stored.unwrap_or(0) == base;
            if !in_sync || (!holds_claim && committed.claimed.contains(&aggregate_id)) {
                return Err(DomainError::ConcurrencyConflict {
                    aggregate_id,
                    expected: base,
                });
            }
            if !holds_claim {
                committed.claimed.insert(aggregate_id);
                tx.claims.push(aggregate_id);
            }
        }
        tx.versions.push((aggregate_id, base, aggregate.version()));
        if aggregate.snapshot_due() {
            tx.snapshots.push(Snapshot {
                aggregate_id,
                version: aggregate.version(),
                payload: snapshot,
            });
        }
        tx.events.extend(aggregate.changes().iter().cloned());
        tx.transactions.push((transaction_id, aggregate_id));
        Ok(())
    }

    async fn get_subscription(
        &self,
        tx: &mut InMemoryTx<A>,
    ) -> Result<Option<Subscription>, DomainError> {
        self.check(StoreOperation::GetSubscription)?;
        if let Some(guard) = &tx.subscription_guard {
            return Ok(Some(**guard));
        }
        match Arc::clone(&self.subscription).try_lock_owned() {
            Ok(guard) => {
                let current = *guard;
                tx.subscription_guard = Some(guard);
                Ok(Some(current))
            }
            Err(_) => Ok(None),
        }
    }

    async fn update_subscription(
        &self,
        subscription: Subscription,
        tx: &mut InMemoryTx<A>,
    ) -> Result<(), DomainError> {
        self.check(StoreOperation::UpdateSubscription)?;
        if tx.subscription_guard.is_none() {
            let guard = Arc::clone(&self.subscription)
                .try_lock_owned()
                .map_err(|_| DomainError::Persistence("checkpoint is locked".into()))?;
            tx.subscription_guard = Some(guard);
        }
        tx.subscription = Some(subscription);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use eventrelay_core::store::settle;

    use super::*;
    use crate::user::{TestUser, UserEvent, new_user, user_event};

    fn signed_up(id: Uuid, versions: std::ops::RangeInclusive<i64>) -> Vec<Event<UserEvent>> {
        versions
            .map(|v| {
                let payload = if v == 1 {
                    UserEvent::CredentialsCreated {
                        email: "ada@example.com".into(),
                    }
                } else {
                    UserEvent::UserAuthenticated {
                        device: format!("device-{v}"),
                    }
                };
                user_event(id, Uuid::new_v4(), v, payload)
            })
            .collect()
    }

    fn login(id: Uuid, version: i64) -> Event<UserEvent> {
        user_event(id, Uuid::nil(), version, UserEvent::UserAuthenticated {
            device: "tablet".into(),
        })
    }

    #[tokio::test]
    async fn test_only_one_of_two_writers_at_the_same_base_version_succeeds() {
        // Arrange
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_events(signed_up(id, 1..=3))
            .build();
        let mut first_tx = store.begin().await.unwrap();
        let mut second_tx = store.begin().await.unwrap();
        let mut first = new_user(id);
        let mut second = new_user(id);
        first
            .build(&store.get_events(id, 1, None, &mut first_tx).await.unwrap())
            .unwrap();
        second
            .build(&store.get_events(id, 1, None, &mut second_tx).await.unwrap())
            .unwrap();
        first.apply_change(login(id, 4)).unwrap();
        second.apply_change(login(id, 4)).unwrap();

        // Act
        let first_result = store
            .update_or_create_aggregate(Uuid::new_v4(), &first, first.snapshot(), &mut first_tx)
            .await;
        let second_result = store
            .update_or_create_aggregate(Uuid::new_v4(), &second, second.snapshot(), &mut second_tx)
            .await;
        store.commit(first_tx).await.unwrap();
        drop(second_tx);

        // Assert
        assert!(first_result.is_ok());
        assert!(matches!(
            second_result,
            Err(DomainError::ConcurrencyConflict { expected: 3, .. })
        ));
        assert_eq!(store.version(id), Some(4));
        assert_eq!(store.events(id).len(), 4);
    }

    #[tokio::test]
    async fn test_creating_an_existing_aggregate_conflicts() {
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_events(signed_up(id, 1..=1))
            .build();
        let mut fresh = new_user(id);
        fresh.apply_change(login(id, 1)).unwrap();
        let mut tx = store.begin().await.unwrap();

        let result = store
            .update_or_create_aggregate(Uuid::new_v4(), &fresh, fresh.snapshot(), &mut tx)
            .await;

        assert!(matches!(result, Err(DomainError::ConcurrencyConflict { expected: 0, .. })));
    }

    #[tokio::test]
    async fn test_new_store_starts_empty_with_zero_checkpoint() {
        let store = InMemoryEventStore::<TestUser>::new();

        assert!(store.transactions().is_empty());
        assert!(store.events(Uuid::new_v4()).is_empty());
        assert!(!store.has_open_claims());
        assert_eq!(store.checkpoint().await, Subscription::new(0));
    }

    #[tokio::test]
    async fn test_aggregate_stored_at_version_zero_accepts_its_first_events() {
        // Arrange
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::new();
        let untouched = new_user(id);
        let mut tx = store.begin().await.unwrap();
        store
            .update_or_create_aggregate(Uuid::new_v4(), &untouched, untouched.snapshot(), &mut tx)
            .await
            .unwrap();
        store.commit(tx).await.unwrap();
        let mut user = new_user(id);
        user.apply_changes(signed_up(id, 1..=1)).unwrap();

        // Act
        let mut tx = store.begin().await.unwrap();
        let result = store
            .update_or_create_aggregate(Uuid::new_v4(), &user, user.snapshot(), &mut tx)
            .await;
        store.commit(tx).await.unwrap();

        // Assert
        assert!(result.is_ok());
        assert_eq!(store.version(id), Some(1));
        assert_eq!(store.transactions().len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes_and_releases_claims() {
        // Arrange
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::new();
        let mut user = new_user(id);
        user.apply_change(user_event(id, Uuid::nil(), 1, UserEvent::CredentialsCreated {
            email: "ada@example.com".into(),
        }))
        .unwrap();
        let mut tx = store.begin().await.unwrap();
        store
            .update_or_create_aggregate(Uuid::new_v4(), &user, user.snapshot(), &mut tx)
            .await
            .unwrap();
        assert!(store.has_open_claims());

        // Act
        drop(tx);

        // Assert
        assert!(!store.has_open_claims());
        assert!(store.events(id).is_empty());
        assert!(store.transactions().is_empty());
        assert_eq!(store.version(id), None);
    }

    #[tokio::test]
    async fn test_commit_assigns_sequence_and_writes_due_snapshot() {
        // Arrange
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_events(signed_up(id, 1..=4))
            .build();
        let mut tx = store.begin().await.unwrap();
        let mut user = new_user(id);
        user.build(&store.get_events(id, 1, None, &mut tx).await.unwrap())
            .unwrap();
        user.apply_changes(vec![login(id, 5), login(id, 6)]).unwrap();
        let transaction_id = Uuid::new_v4();

        // Act
        store
            .update_or_create_aggregate(transaction_id, &user, user.snapshot(), &mut tx)
            .await
            .unwrap();
        settle::<TestUser, _, _>(&store, tx, Ok(())).await.unwrap();

        // Assert
        let last = *store.transactions().last().unwrap();
        assert_eq!(last.id, transaction_id);
        assert_eq!(last.sequence_id, 5);
        let snapshots = store.snapshots(id);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].version, 6);
        assert_eq!(snapshots[0].payload.login_count, 5);
    }

    #[tokio::test]
    async fn test_get_snapshot_honours_exclusive_upper_bound() {
        let id = Uuid::new_v4();
        let snapshot_at = |version| Snapshot {
            aggregate_id: id,
            version,
            payload: new_user(id).snapshot(),
        };
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_snapshot(snapshot_at(5))
            .with_snapshot(snapshot_at(10))
            .build();
        let mut tx = store.begin().await.unwrap();

        let latest = store.get_snapshot(id, None, &mut tx).await.unwrap();
        let before_ten = store.get_snapshot(id, Some(10), &mut tx).await.unwrap();
        let before_five = store.get_snapshot(id, Some(5), &mut tx).await.unwrap();

        assert_eq!(latest.map(|s| s.version), Some(10));
        assert_eq!(before_ten.map(|s| s.version), Some(5));
        assert!(before_five.is_none());
    }

    #[tokio::test]
    async fn test_get_unhandled_events_selects_half_open_sequence_range() {
        // Arrange
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut history = signed_up(id, 1..=2);
        history.extend(signed_up(other, 1..=1));
        history.extend(signed_up(id, 3..=4));
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_events(history)
            .build();
        let mut tx = store.begin().await.unwrap();

        // Act
        let events = store.get_unhandled_events(id, 2, 5, &mut tx).await.unwrap();
        let none = store.get_unhandled_events(id, 5, 5, &mut tx).await.unwrap();

        // Assert
        let versions: Vec<i64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![3, 4]);
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_is_skipped_while_another_unit_of_work_holds_it() {
        // Arrange
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_checkpoint(7)
            .build();
        let mut holder = store.begin().await.unwrap();
        let mut contender = store.begin().await.unwrap();

        // Act
        let held = store.get_subscription(&mut holder).await.unwrap();
        let skipped = store.get_subscription(&mut contender).await.unwrap();
        store
            .update_subscription(Subscription::new(9), &mut holder)
            .await
            .unwrap();
        store.commit(holder).await.unwrap();
        let after = store.get_subscription(&mut contender).await.unwrap();

        // Assert
        assert_eq!(held, Some(Subscription::new(7)));
        assert_eq!(skipped, None);
        assert_eq!(after, Some(Subscription::new(9)));
    }

    #[tokio::test]
    async fn test_rolled_back_checkpoint_update_is_discarded() {
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_checkpoint(3)
            .build();
        let mut tx = store.begin().await.unwrap();
        store.get_subscription(&mut tx).await.unwrap();
        store
            .update_subscription(Subscription::new(8), &mut tx)
            .await
            .unwrap();

        store.rollback(tx).await.unwrap();

        assert_eq!(store.checkpoint().await, Subscription::new(3));
    }

    #[tokio::test]
    async fn test_failing_rollback_is_reported_with_its_cause() {
        let store = InMemoryEventStore::<TestUser>::builder()
            .failing_on(StoreOperation::Rollback)
            .build();
        let tx = store.begin().await.unwrap();

        let result: Result<(), DomainError> =
            settle::<TestUser, _, _>(&store, tx, Err(DomainError::Publish("broker down".into())))
                .await;

        match result {
            Err(DomainError::RollbackFailed { cause, rollback }) => {
                assert!(matches!(*cause, DomainError::Publish(_)));
                assert!(matches!(*rollback, DomainError::Persistence(_)));
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
    }
}
