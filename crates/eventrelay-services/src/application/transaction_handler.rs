//! Transaction handler: the outbox relay.
//!
//! For each commit notification the relay locks the checkpoint, collects
//! every event of the notified aggregate whose transaction lies between the
//! checkpoint and the notified sequence, rebuilds the aggregate up to just
//! before the first of them, publishes their integration events and moves
//! the checkpoint, all in one unit of work. Any failure leaves the
//! checkpoint where it was so the same range is relayed again later.

use eventrelay_core::aggregate::{Aggregate, AggregateState};
use eventrelay_core::error::DomainError;
use eventrelay_core::ports::Publisher;
use eventrelay_core::store::{EventStore, settle};
use eventrelay_core::transaction::{SequenceRange, Subscription, Transaction};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::event_handler::handle_events;

/// Factory for the aggregate a notification refers to.
pub type AggregateProvider<A> = dyn Fn(Uuid) -> Aggregate<A> + Send + Sync;

/// What a relay round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The range was relayed and the checkpoint moved to `checkpoint`.
    Relayed {
        /// Number of integration events published.
        published: usize,
        /// The new checkpoint.
        checkpoint: i64,
    },
    /// The checkpoint already covers the notified transaction.
    AlreadyRelayed {
        /// The current checkpoint.
        checkpoint: i64,
    },
    /// Another relay holds the checkpoint; it will be retried on the next
    /// notification.
    CheckpointLocked,
}

impl RelayOutcome {
    /// Returns `true` if the round moved the checkpoint.
    #[must_use]
    pub fn advanced(&self) -> bool {
        matches!(self, Self::Relayed { .. })
    }
}

/// Relays the integration events of every unhandled transaction of
/// `transaction.aggregate_id` up to and including `transaction`.
///
/// # Errors
///
/// Returns the failing step's error after rolling back; the checkpoint is
/// unchanged in that case. A failed rollback is reported as
/// `RollbackFailed` carrying both errors.
pub async fn handle_transaction<A, S>(
    transaction: &Transaction,
    provider: &AggregateProvider<A>,
    store: &S,
    publisher: &dyn Publisher<A::Integration>,
) -> Result<RelayOutcome, DomainError>
where
    A: AggregateState,
    S: EventStore<A> + ?Sized,
{
    let mut tx = store.begin().await.inspect_err(|e| {
        error!(transaction_id = %transaction.id, error = %e, "failed to begin relay transaction");
    })?;
    let result = relay(transaction, provider, store, publisher, &mut tx).await;

    let outcome = match result {
        Ok(outcome) if !outcome.advanced() => {
            store.rollback(tx).await?;
            Ok(outcome)
        }
        other => settle::<A, S, _>(store, tx, other).await,
    };
    match &outcome {
        Ok(RelayOutcome::Relayed {
            published,
            checkpoint,
        }) => info!(
            transaction_id = %transaction.id,
            aggregate_id = %transaction.aggregate_id,
            published,
            checkpoint,
            "transaction relayed"
        ),
        Ok(RelayOutcome::AlreadyRelayed { checkpoint }) => debug!(
            transaction_id = %transaction.id,
            sequence_id = transaction.sequence_id,
            checkpoint,
            "transaction already relayed"
        ),
        Ok(RelayOutcome::CheckpointLocked) => warn!(
            transaction_id = %transaction.id,
            "checkpoint locked by another relay, skipping"
        ),
        Err(e) => error!(
            transaction_id = %transaction.id,
            sequence_id = transaction.sequence_id,
            error = %e,
            "relay failed, checkpoint unchanged"
        ),
    }
    outcome
}

async fn relay<A, S>(
    transaction: &Transaction,
    provider: &AggregateProvider<A>,
    store: &S,
    publisher: &dyn Publisher<A::Integration>,
    tx: &mut S::Tx,
) -> Result<RelayOutcome, DomainError>
where
    A: AggregateState,
    S: EventStore<A> + ?Sized,
{
    let aggregate_id = transaction.aggregate_id;

    let Some(subscription) = store.get_subscription(tx).await.inspect_err(|e| {
        error!(error = %e, "failed to read checkpoint");
    })?
    else {
        return Ok(RelayOutcome::CheckpointLocked);
    };
    let range = SequenceRange {
        after: subscription.last_sequence_id,
        up_to: transaction.sequence_id,
    };
    if range.is_empty() {
        return Ok(RelayOutcome::AlreadyRelayed {
            checkpoint: subscription.last_sequence_id,
        });
    }

    let unhandled = store
        .get_unhandled_events(aggregate_id, range.after, range.up_to, tx)
        .await
        .inspect_err(|e| error!(%aggregate_id, error = %e, "failed to load unhandled events"))?;

    let published = match unhandled.first().map(|e| e.version) {
        None => 0,
        Some(first_version) => {
            let mut aggregate = provider(aggregate_id);
            rebuild_before(&mut aggregate, first_version, store, tx).await?;
            debug!(
                %aggregate_id,
                version = aggregate.version(),
                unhandled = unhandled.len(),
                "aggregate rebuilt for relay"
            );
            handle_events(&mut aggregate, unhandled, publisher)
                .await
                .inspect_err(|e| error!(%aggregate_id, error = %e, "failed to handle events"))?
        }
    };

    store
        .update_subscription(Subscription::new(range.up_to), tx)
        .await
        .inspect_err(|e| error!(error = %e, "failed to update checkpoint"))?;
    Ok(RelayOutcome::Relayed {
        published,
        checkpoint: range.up_to,
    })
}

/// Brings `aggregate` to version `first_version - 1` from the latest snapshot
/// below `first_version` and the history after it.
async fn rebuild_before<A, S>(
    aggregate: &mut Aggregate<A>,
    first_version: i64,
    store: &S,
    tx: &mut S::Tx,
) -> Result<(), DomainError>
where
    A: AggregateState,
    S: EventStore<A> + ?Sized,
{
    let aggregate_id = aggregate.id();
    let snapshot = store
        .get_snapshot(aggregate_id, Some(first_version), tx)
        .await
        .inspect_err(|e| error!(%aggregate_id, error = %e, "failed to load snapshot"))?;
    if let Some(snapshot) = snapshot {
        aggregate
            .build_from_snapshot(snapshot.version, snapshot.payload)
            .inspect_err(|e| error!(%aggregate_id, error = %e, "failed to apply snapshot"))?;
    }

    if aggregate.version() + 1 < first_version {
        let history = store
            .get_events(aggregate_id, aggregate.version() + 1, Some(first_version - 1), tx)
            .await
            .inspect_err(|e| error!(%aggregate_id, error = %e, "failed to load history"))?;
        aggregate
            .build(&history)
            .inspect_err(|e| error!(%aggregate_id, error = %e, "failed to replay history"))?;
    }
    Ok(())
}
