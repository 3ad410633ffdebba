//! Domain and integration event types.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trait implemented by the domain payload of an event stream.
///
/// Payloads are usually an enum with one variant per event type the aggregate
/// understands; `event_type` names the variant for routing and storage.
pub trait EventPayload:
    Serialize + DeserializeOwned + Clone + Send + Sync + std::fmt::Debug + 'static
{
    /// Returns the event type name (used for storage and integration routing).
    fn event_type(&self) -> &'static str;
}

/// An immutable, versioned fact in one aggregate's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P> {
    /// Aggregate/stream this event belongs to.
    pub aggregate_id: Uuid,
    /// Transaction that made this event durable.
    pub transaction_id: Uuid,
    /// Type of the command that produced this event.
    pub command_type: String,
    /// Position in the aggregate stream, starting at 1 with no gaps.
    pub version: i64,
    /// Domain event type name.
    pub event_type: String,
    /// Domain payload.
    pub payload: P,
    /// Timestamp of event creation.
    pub created_at: DateTime<Utc>,
}

/// Consumer-facing event derived from a domain event and the aggregate state
/// right after that event was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent<K> {
    /// Identifier of the aggregate the event describes.
    pub id: Uuid,
    /// Type of the domain event this integration event was derived from.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Integration payload.
    pub payload: K,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_event_serializes_type_field() {
        // Arrange
        let id = Uuid::new_v4();
        let event = IntegrationEvent {
            id,
            event_type: "user.signed_up".to_owned(),
            payload: serde_json::json!({"email": "a@b.c"}),
        };

        // Act
        let value = serde_json::to_value(&event).unwrap();

        // Assert
        assert_eq!(value["type"], "user.signed_up");
        assert_eq!(value["id"], id.to_string());
        assert_eq!(value["payload"]["email"], "a@b.c");
    }
}
