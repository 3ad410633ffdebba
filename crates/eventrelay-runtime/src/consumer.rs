//! Transaction consumer: feeds commit notifications to the relay.

use std::sync::Arc;

use async_trait::async_trait;
use eventrelay_core::aggregate::AggregateState;
use eventrelay_core::error::DomainError;
use eventrelay_core::ports::{NotificationSource, Publisher};
use eventrelay_core::store::EventStore;
use eventrelay_core::transaction::Transaction;
use eventrelay_services::application::transaction_handler::{
    AggregateProvider, RelayOutcome, handle_transaction,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Counters of one consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Rounds that moved the checkpoint.
    pub relayed: usize,
    /// Rounds that found nothing to do or the checkpoint locked.
    pub skipped: usize,
    /// Notifications that could not be received or relayed.
    pub failed: usize,
}

/// Relays every transaction a [`NotificationSource`] yields.
///
/// A failed round is logged and counted; it never stops the consumer. The
/// range it left behind is picked up by a later notification.
pub struct TransactionConsumer<A: AggregateState, S> {
    store: Arc<S>,
    publisher: Arc<dyn Publisher<A::Integration>>,
    provider: Arc<AggregateProvider<A>>,
}

impl<A: AggregateState, S> Clone for TransactionConsumer<A, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            publisher: Arc::clone(&self.publisher),
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<A, S> TransactionConsumer<A, S>
where
    A: AggregateState,
    S: EventStore<A> + 'static,
{
    /// Creates a consumer over `store`, publishing through `publisher`.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        publisher: Arc<dyn Publisher<A::Integration>>,
        provider: Arc<AggregateProvider<A>>,
    ) -> Self {
        Self {
            store,
            publisher,
            provider,
        }
    }

    /// Relays one notified transaction, returning `None` on failure.
    pub async fn dispatch(&self, transaction: &Transaction) -> Option<RelayOutcome> {
        match handle_transaction(
            transaction,
            &*self.provider,
            &*self.store,
            &*self.publisher,
        )
        .await
        {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(
                    transaction_id = %transaction.id,
                    aggregate_id = %transaction.aggregate_id,
                    sequence_id = transaction.sequence_id,
                    error = %e,
                    "relay round failed"
                );
                None
            }
        }
    }

    /// Consumes `source` until it closes or `stop` turns `true`.
    ///
    /// The stop signal is only observed between rounds, so a relay that has
    /// started runs to completion.
    pub async fn run<N>(&self, source: &mut N, mut stop: watch::Receiver<bool>) -> ConsumerReport
    where
        N: NotificationSource + ?Sized,
    {
        let mut report = ConsumerReport::default();
        loop {
            if *stop.borrow() {
                break;
            }
            let next = tokio::select! {
                biased;
                _ = stop.changed() => break,
                next = source.next() => next,
            };
            match next {
                Ok(Some(transaction)) => match self.dispatch(&transaction).await {
                    Some(outcome) if outcome.advanced() => report.relayed += 1,
                    Some(outcome) => {
                        debug!(?outcome, sequence_id = transaction.sequence_id, "nothing relayed");
                        report.skipped += 1;
                    }
                    None => report.failed += 1,
                },
                Ok(None) => {
                    info!("notification source closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to receive notification");
                    report.failed += 1;
                }
            }
        }
        info!(
            relayed = report.relayed,
            skipped = report.skipped,
            failed = report.failed,
            "consumer stopped"
        );
        report
    }
}

/// In-process notification source backed by a channel.
///
/// Useful where commits are observed in the same process, and in tests.
#[derive(Debug)]
pub struct ChannelNotifications {
    receiver: mpsc::Receiver<Transaction>,
}

impl ChannelNotifications {
    /// Creates a bounded channel and returns its sending half with the source.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<Transaction>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (sender, Self { receiver })
    }
}

#[async_trait]
impl NotificationSource for ChannelNotifications {
    async fn next(&mut self) -> Result<Option<Transaction>, DomainError> {
        Ok(self.receiver.recv().await)
    }
}
