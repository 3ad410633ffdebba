//! Outbound ports: read-model projections, the integration bus and the
//! commit notification stream.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::IntegrationEvent;
use crate::transaction::Transaction;

/// Read-model store that receives the projection of each handled command.
#[async_trait]
pub trait ProjectionStore<P>: Send + Sync {
    /// Upserts `projection`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Persistence` if the projection cannot be saved.
    async fn save(&self, projection: &P) -> Result<(), DomainError>;
}

/// Integration bus for consumer-facing events.
#[async_trait]
pub trait Publisher<K>: Send + Sync {
    /// Publishes one batch, all of which must be accepted for the call to
    /// succeed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Publish` if any event of the batch is rejected.
    async fn publish(&self, events: &[IntegrationEvent<K>]) -> Result<(), DomainError>;
}

/// Stream of commit notifications, one per durable transaction.
///
/// Notifications may be lost or duplicated; receivers must tolerate both.
#[async_trait]
pub trait NotificationSource: Send {
    /// Waits for the next notification. Returns `None` once the stream is
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Notification` if a notification cannot be
    /// received or decoded.
    async fn next(&mut self) -> Result<Option<Transaction>, DomainError>;
}
