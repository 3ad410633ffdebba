//! Wire format of commit notifications.

use eventrelay_core::error::DomainError;
use eventrelay_core::transaction::Transaction;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON payload sent with `pg_notify` when a transaction row is written.
///
/// The sequence id travels as text so consumers in any language can read it
/// without losing 64-bit precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionNotification {
    /// Transaction identifier.
    pub id: Uuid,
    /// Aggregate the transaction wrote to.
    pub aggregate_id: Uuid,
    /// Global sequence number, as decimal text.
    pub sequence_id: String,
}

impl From<&Transaction> for TransactionNotification {
    fn from(transaction: &Transaction) -> Self {
        Self {
            id: transaction.id,
            aggregate_id: transaction.aggregate_id,
            sequence_id: transaction.sequence_id.to_string(),
        }
    }
}

impl TransactionNotification {
    /// Encodes the notification as its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Notification` if serialization fails.
    pub fn encode(&self) -> Result<String, DomainError> {
        serde_json::to_string(self).map_err(|e| DomainError::Notification(e.to_string()))
    }

    /// Decodes a JSON payload into the transaction it announces.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Notification` if the payload is not valid JSON,
    /// misses a field, or carries a non-numeric sequence id.
    pub fn decode(payload: &str) -> Result<Transaction, DomainError> {
        let notification: Self = serde_json::from_str(payload)
            .map_err(|e| DomainError::Notification(format!("malformed payload: {e}")))?;
        let sequence_id = notification.sequence_id.parse::<i64>().map_err(|e| {
            DomainError::Notification(format!(
                "invalid sequence id {:?}: {e}",
                notification.sequence_id
            ))
        })?;
        Ok(Transaction::new(
            notification.id,
            notification.aggregate_id,
            sequence_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reads_sequence_id_from_text() {
        // Arrange
        let id = Uuid::new_v4();
        let aggregate_id = Uuid::new_v4();
        let payload = format!(r#"{{"id":"{id}","aggregate_id":"{aggregate_id}","sequence_id":"42"}}"#);

        // Act
        let transaction = TransactionNotification::decode(&payload).unwrap();

        // Assert
        assert_eq!(transaction, Transaction::new(id, aggregate_id, 42));
    }

    #[test]
    fn test_encode_writes_sequence_id_as_text() {
        let transaction = Transaction::new(Uuid::new_v4(), Uuid::new_v4(), 7);

        let payload = TransactionNotification::from(&transaction).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["sequence_id"], "7");
        assert_eq!(value["aggregate_id"], transaction.aggregate_id.to_string());
    }

    #[test]
    fn test_decode_rejects_non_numeric_sequence_id() {
        let payload = format!(
            r#"{{"id":"{}","aggregate_id":"{}","sequence_id":"abc"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );

        let result = TransactionNotification::decode(&payload);

        assert!(matches!(result, Err(DomainError::Notification(_))));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let result = TransactionNotification::decode(r#"{"id":"not-a-uuid"}"#);

        assert!(matches!(result, Err(DomainError::Notification(_))));
    }
}
