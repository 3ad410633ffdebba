//! `LISTEN`-based commit notification source.

use async_trait::async_trait;
use eventrelay_core::error::DomainError;
use eventrelay_core::ports::NotificationSource;
use eventrelay_core::transaction::Transaction;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::info;

use crate::notification::TransactionNotification;

/// Receives the notifications [`crate::pg_event_store::PgEventStore`] sends
/// for every committed transaction.
///
/// The underlying listener reconnects on its own after a dropped connection;
/// notifications sent while disconnected are lost and recovered by the
/// relay's range query on the next one.
pub struct PgTransactionListener {
    listener: PgListener,
}

impl PgTransactionListener {
    /// Connects a dedicated listener connection and subscribes to `channel`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Notification` if the connection or the
    /// `LISTEN` fails.
    pub async fn connect(pool: &PgPool, channel: &str) -> Result<Self, DomainError> {
        let mut listener = PgListener::connect_with(pool)
            .await
            .map_err(|e| DomainError::Notification(format!("failed to connect listener: {e}")))?;
        listener
            .listen(channel)
            .await
            .map_err(|e| DomainError::Notification(format!("failed to listen on {channel}: {e}")))?;
        info!(channel, "listening for committed transactions");
        Ok(Self { listener })
    }
}

#[async_trait]
impl NotificationSource for PgTransactionListener {
    async fn next(&mut self) -> Result<Option<Transaction>, DomainError> {
        let notification = self
            .listener
            .recv()
            .await
            .map_err(|e| DomainError::Notification(format!("failed to receive notification: {e}")))?;
        TransactionNotification::decode(notification.payload()).map(Some)
    }
}
