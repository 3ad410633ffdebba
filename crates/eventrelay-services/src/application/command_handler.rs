//! Command handler: the write path.
//!
//! Loads the aggregate from its latest snapshot plus the events after it,
//! applies the command's events at the next versions, and persists events,
//! snapshot, transaction record and projection in one unit of work.

use eventrelay_core::aggregate::{Aggregate, AggregateState};
use eventrelay_core::clock::Clock;
use eventrelay_core::command::Command;
use eventrelay_core::error::DomainError;
use eventrelay_core::event::Event;
use eventrelay_core::ports::ProjectionStore;
use eventrelay_core::store::{EventStore, settle};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a successfully handled command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    /// The aggregate the command was applied to.
    pub aggregate_id: Uuid,
    /// The transaction the new events were committed under.
    pub transaction_id: Uuid,
    /// The aggregate version after the command.
    pub version: i64,
}

/// Handles `command` against `aggregate`, a freshly constructed aggregate of
/// the target id.
///
/// Exactly one transaction, its events and at most one snapshot become
/// durable, or nothing does.
///
/// # Errors
///
/// Returns the first failing step's error: `InvalidVersion` or `Conversion`
/// from the aggregate, `ConcurrencyConflict` when another writer committed
/// first, `Persistence` from the stores. A failed rollback is reported as
/// `RollbackFailed` carrying both errors.
pub async fn handle_command<A, S>(
    command: &Command<A::Payload>,
    aggregate: &mut Aggregate<A>,
    store: &S,
    projections: &dyn ProjectionStore<A::Projection>,
    clock: &dyn Clock,
) -> Result<CommandOutcome, DomainError>
where
    A: AggregateState,
    S: EventStore<A> + ?Sized,
{
    let mut tx = store.begin().await?;
    let result = apply_and_persist(command, aggregate, store, projections, clock, &mut tx).await;
    let outcome = settle::<A, S, _>(store, tx, result).await;

    match &outcome {
        Ok(done) => info!(
            aggregate_id = %done.aggregate_id,
            transaction_id = %done.transaction_id,
            version = done.version,
            command_type = %command.command_type,
            "command handled"
        ),
        Err(e) => warn!(
            aggregate_id = %aggregate.id(),
            command_type = %command.command_type,
            error = %e,
            "command failed"
        ),
    }
    outcome
}

async fn apply_and_persist<A, S>(
    command: &Command<A::Payload>,
    aggregate: &mut Aggregate<A>,
    store: &S,
    projections: &dyn ProjectionStore<A::Projection>,
    clock: &dyn Clock,
    tx: &mut S::Tx,
) -> Result<CommandOutcome, DomainError>
where
    A: AggregateState,
    S: EventStore<A> + ?Sized,
{
    let aggregate_id = aggregate.id();

    if let Some(snapshot) = store.get_snapshot(aggregate_id, None, tx).await? {
        aggregate.build_from_snapshot(snapshot.version, snapshot.payload)?;
    }
    let history = store
        .get_events(aggregate_id, aggregate.version() + 1, None, tx)
        .await?;
    aggregate.build(&history)?;
    debug!(
        %aggregate_id,
        version = aggregate.version(),
        replayed = history.len(),
        "aggregate loaded"
    );

    let transaction_id = Uuid::new_v4();
    let created_at = clock.now();
    let base = aggregate.version();
    let changes = (1..)
        .zip(&command.events)
        .map(|(offset, command_event)| Event {
            aggregate_id,
            transaction_id,
            command_type: command.command_type.clone(),
            version: base + offset,
            event_type: command_event.event_type.clone(),
            payload: command_event.payload.clone(),
            created_at,
        })
        .collect();
    aggregate.apply_changes(changes)?;

    store
        .update_or_create_aggregate(transaction_id, aggregate, aggregate.snapshot(), tx)
        .await?;
    projections.save(&aggregate.projection()).await?;

    Ok(CommandOutcome {
        aggregate_id,
        transaction_id,
        version: aggregate.version(),
    })
}

#[cfg(test)]
mod tests {
    use eventrelay_core::snapshot::Snapshot;
    use eventrelay_test_support::{
        FailingProjectionStore, FixedClock, InMemoryEventStore, RecordingProjectionStore,
        StoreOperation, TestUser, UserEvent, UserProjection, UserSnapshot, fixed_time,
        login_command, new_user, signup_command, user_event,
    };

    use super::*;

    fn history(id: Uuid, last_version: i64) -> Vec<Event<UserEvent>> {
        (1..=last_version)
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

    #[tokio::test]
    async fn test_fresh_aggregate_persists_events_transaction_and_projection() {
        // Arrange
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::new();
        let projections = RecordingProjectionStore::<UserProjection>::new();
        let mut aggregate = new_user(id);

        // Act
        let outcome = handle_command(
            &signup_command("ada@example.com"),
            &mut aggregate,
            &store,
            &projections,
            &FixedClock::default(),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(outcome.version, 2);
        let events = store.events(id);
        assert_eq!(events.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2]);
        assert!(events.iter().all(|e| e.transaction_id == outcome.transaction_id));
        assert!(events.iter().all(|e| e.command_type == "user.sign_up"));
        assert!(events.iter().all(|e| e.created_at == fixed_time()));
        assert_eq!(store.transactions().len(), 1);
        assert_eq!(store.transactions()[0].id, outcome.transaction_id);
        assert_eq!(store.transactions()[0].aggregate_id, id);
        assert_eq!(store.version(id), Some(2));
        let saved = projections.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].version, 2);
        assert!(saved[0].confirmed);
    }

    #[tokio::test]
    async fn test_existing_history_is_replayed_before_new_versions() {
        // Arrange
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_events(history(id, 2))
            .build();
        let projections = RecordingProjectionStore::<UserProjection>::new();
        let mut aggregate = new_user(id);

        // Act
        let outcome = handle_command(
            &login_command("laptop"),
            &mut aggregate,
            &store,
            &projections,
            &FixedClock::default(),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(outcome.version, 3);
        assert_eq!(aggregate.base_version(), 2);
        assert_eq!(aggregate.changes().len(), 1);
        assert_eq!(store.version(id), Some(3));
        assert_eq!(projections.saved()[0].login_count, 2);
    }

    #[tokio::test]
    async fn test_latest_snapshot_bounds_replay() {
        // Arrange
        let id = Uuid::new_v4();
        let snapshot = Snapshot {
            aggregate_id: id,
            version: 5,
            payload: UserSnapshot {
                email: Some("ada@example.com".into()),
                confirmed: true,
                login_count: 4,
                last_device: None,
            },
        };
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_events(history(id, 6))
            .with_snapshot(snapshot)
            .build();
        let projections = RecordingProjectionStore::<UserProjection>::new();
        let mut aggregate = new_user(id);

        // Act
        handle_command(
            &login_command("laptop"),
            &mut aggregate,
            &store,
            &projections,
            &FixedClock::default(),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(aggregate.version(), 7);
        assert_eq!(aggregate.base_version(), 6);
        assert!(aggregate.state().confirmed);
        assert_eq!(aggregate.state().login_count, 6);
    }

    #[tokio::test]
    async fn test_crossing_the_cap_writes_a_snapshot() {
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_events(history(id, 4))
            .build();
        let projections = RecordingProjectionStore::<UserProjection>::new();
        let command = Command::from_payloads(
            "user.sign_in",
            vec![
                UserEvent::UserAuthenticated {
                    device: "a".into(),
                },
                UserEvent::UserAuthenticated {
                    device: "b".into(),
                },
            ],
        );

        handle_command(
            &command,
            &mut new_user(id),
            &store,
            &projections,
            &FixedClock::default(),
        )
        .await
        .unwrap();

        let snapshots = store.snapshots(id);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].version, 6);
        assert_eq!(snapshots[0].payload.last_device.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_empty_command_records_a_transaction_without_events() {
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_events(history(id, 1))
            .build();
        let projections = RecordingProjectionStore::<UserProjection>::new();

        let outcome = handle_command(
            &Command::new("user.touch", Vec::new()),
            &mut new_user(id),
            &store,
            &projections,
            &FixedClock::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.version, 1);
        assert_eq!(store.events(id).len(), 1);
        assert_eq!(store.transactions().len(), 2);
        assert!(store.snapshots(id).is_empty());
    }

    #[tokio::test]
    async fn test_empty_command_on_fresh_aggregate_leaves_it_writable() {
        // Arrange
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::new();
        let projections = RecordingProjectionStore::<UserProjection>::new();
        let touched = handle_command(
            &Command::new("user.touch", Vec::new()),
            &mut new_user(id),
            &store,
            &projections,
            &FixedClock::default(),
        )
        .await
        .unwrap();

        // Act
        let signed_up = handle_command(
            &signup_command("ada@example.com"),
            &mut new_user(id),
            &store,
            &projections,
            &FixedClock::default(),
        )
        .await;

        // Assert
        assert_eq!(touched.version, 0);
        assert_eq!(signed_up.unwrap().version, 2);
        assert_eq!(store.version(id), Some(2));
        assert_eq!(store.events(id).len(), 2);
        assert_eq!(store.transactions().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_commands_at_same_base_version_yield_one_conflict() {
        // Arrange
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::builder()
            .with_events(history(id, 3))
            .yielding_after_reads()
            .build();
        let projections = RecordingProjectionStore::<UserProjection>::new();
        let clock = FixedClock::default();
        let mut first = new_user(id);
        let mut second = new_user(id);
        let first_command = login_command("laptop");
        let second_command = login_command("phone");

        // Act
        let (first_result, second_result) = tokio::join!(
            handle_command(&first_command, &mut first, &store, &projections, &clock),
            handle_command(&second_command, &mut second, &store, &projections, &clock),
        );

        // Assert
        let results = [first_result, second_result];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| r.as_ref().is_err_and(DomainError::is_concurrency_conflict))
                .count(),
            1
        );
        assert_eq!(store.version(id), Some(4));
        assert_eq!(store.events(id).len(), 4);
        assert_eq!(store.transactions().len(), 4);
        assert!(!store.has_open_claims());
    }

    #[tokio::test]
    async fn test_projection_failure_rolls_back_everything() {
        // Arrange
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::new();

        // Act
        let result = handle_command(
            &signup_command("ada@example.com"),
            &mut new_user(id),
            &store,
            &FailingProjectionStore,
            &FixedClock::default(),
        )
        .await;

        // Assert
        assert!(matches!(result, Err(DomainError::Persistence(_))));
        assert!(store.events(id).is_empty());
        assert!(store.transactions().is_empty());
        assert_eq!(store.version(id), None);
        assert!(!store.has_open_claims());
    }

    #[tokio::test]
    async fn test_invalid_domain_transition_aborts_before_persisting() {
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::new();
        let projections = RecordingProjectionStore::<UserProjection>::new();
        let command = Command::from_payloads("user.confirm", vec![UserEvent::EmailConfirmed]);

        let result = handle_command(
            &command,
            &mut new_user(id),
            &store,
            &projections,
            &FixedClock::default(),
        )
        .await;

        assert!(matches!(result, Err(DomainError::Conversion(_))));
        assert!(store.transactions().is_empty());
        assert!(projections.saved().is_empty());
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_original_cause() {
        let id = Uuid::new_v4();
        let store = InMemoryEventStore::<TestUser>::builder()
            .failing_on(StoreOperation::Rollback)
            .build();

        let result = handle_command(
            &signup_command("ada@example.com"),
            &mut new_user(id),
            &store,
            &FailingProjectionStore,
            &FixedClock::default(),
        )
        .await;

        match result {
            Err(DomainError::RollbackFailed { cause, .. }) => {
                assert!(cause.to_string().contains("document store unavailable"));
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_begin_failure_is_returned_directly() {
        let store = InMemoryEventStore::<TestUser>::builder()
            .failing_on(StoreOperation::Begin)
            .failing_on(StoreOperation::Rollback)
            .build();
        let projections = RecordingProjectionStore::<UserProjection>::new();

        let result = handle_command(
            &signup_command("ada@example.com"),
            &mut new_user(Uuid::new_v4()),
            &store,
            &projections,
            &FixedClock::default(),
        )
        .await;

        assert!(matches!(result, Err(DomainError::Persistence(_))));
    }
}
