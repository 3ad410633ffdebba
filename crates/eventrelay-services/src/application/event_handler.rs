//! Event handler: turns committed domain events into integration events.

use eventrelay_core::aggregate::{Aggregate, AggregateState};
use eventrelay_core::error::DomainError;
use eventrelay_core::event::Event;
use eventrelay_core::ports::Publisher;
use tracing::debug;

/// Applies `events` onto `aggregate` one by one, derives the integration
/// event of each from the state right after it, and publishes the batch in a
/// single call. Returns the number of published events.
///
/// Nothing is published unless every event applies and converts.
///
/// # Errors
///
/// Returns the first `apply_change` or conversion error, or the publisher's
/// error untouched.
pub async fn handle_events<A: AggregateState>(
    aggregate: &mut Aggregate<A>,
    events: Vec<Event<A::Payload>>,
    publisher: &dyn Publisher<A::Integration>,
) -> Result<usize, DomainError> {
    let mut integration_events = Vec::with_capacity(events.len());
    for event in events {
        let event_type = event.event_type.clone();
        aggregate.apply_change(event)?;
        integration_events.push(aggregate.integration_event(&event_type)?);
    }
    if integration_events.is_empty() {
        return Ok(0);
    }

    publisher.publish(&integration_events).await?;
    debug!(
        aggregate_id = %aggregate.id(),
        count = integration_events.len(),
        "published integration events"
    );
    Ok(integration_events.len())
}

#[cfg(test)]
mod tests {
    use eventrelay_test_support::{
        FailingPublisher, RecordingPublisher, UserEvent, UserIntegration, new_user, user_event,
    };
    use uuid::Uuid;

    use super::*;

    fn sign_up_events(id: Uuid) -> Vec<Event<UserEvent>> {
        let tx = Uuid::new_v4();
        vec![
            user_event(id, tx, 1, UserEvent::CredentialsCreated {
                email: "ada@example.com".into(),
            }),
            user_event(id, tx, 2, UserEvent::EmailConfirmed),
        ]
    }

    #[tokio::test]
    async fn test_publishes_one_batch_in_event_order() {
        // Arrange
        let id = Uuid::new_v4();
        let mut aggregate = new_user(id);
        let publisher = RecordingPublisher::<UserIntegration>::new();

        // Act
        let count = handle_events(&mut aggregate, sign_up_events(id), &publisher)
            .await
            .unwrap();

        // Assert
        assert_eq!(count, 2);
        let batches = publisher.batches();
        assert_eq!(batches.len(), 1);
        let types: Vec<&str> = batches[0].iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["user.credentials_created", "user.email_confirmed"]);
        assert!(!batches[0][0].payload.confirmed);
        assert!(batches[0][1].payload.confirmed);
        assert!(batches[0].iter().all(|e| e.id == id));
    }

    #[tokio::test]
    async fn test_conversion_failure_publishes_nothing() {
        // Arrange
        let id = Uuid::new_v4();
        let mut aggregate = new_user(id);
        let publisher = RecordingPublisher::<UserIntegration>::new();
        let events = vec![user_event(id, Uuid::new_v4(), 1, UserEvent::UserAuthenticated {
            device: "phone".into(),
        })];

        // Act
        let result = handle_events(&mut aggregate, events, &publisher).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Conversion(_))));
        assert!(publisher.batches().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_event_publishes_nothing() {
        let id = Uuid::new_v4();
        let mut aggregate = new_user(id);
        let publisher = RecordingPublisher::<UserIntegration>::new();
        let mut events = sign_up_events(id);
        events.reverse();

        let result = handle_events(&mut aggregate, events, &publisher).await;

        assert!(matches!(result, Err(DomainError::InvalidVersion { .. })));
        assert!(publisher.batches().is_empty());
    }

    #[tokio::test]
    async fn test_publisher_error_is_surfaced_untouched() {
        let id = Uuid::new_v4();
        let mut aggregate = new_user(id);

        let result = handle_events(&mut aggregate, sign_up_events(id), &FailingPublisher).await;

        assert!(matches!(result, Err(DomainError::Publish(_))));
    }
}
