//! Command abstractions.

use crate::event::EventPayload;

/// One domain event a command intends to append.
#[derive(Debug, Clone)]
pub struct CommandEvent<P> {
    /// Domain event type name.
    pub event_type: String,
    /// Domain payload.
    pub payload: P,
}

impl<P: EventPayload> CommandEvent<P> {
    /// Wraps `payload`, taking the event type from the payload itself.
    #[must_use]
    pub fn new(payload: P) -> Self {
        Self {
            event_type: payload.event_type().to_owned(),
            payload,
        }
    }
}

/// A request to append an ordered batch of events to one aggregate.
///
/// Commands carry no version information; versions are assigned when the
/// command is applied to the current aggregate state.
#[derive(Debug, Clone)]
pub struct Command<P> {
    /// The type name for this command (for logging/routing).
    pub command_type: String,
    /// The events to append, in order.
    pub events: Vec<CommandEvent<P>>,
}

impl<P: EventPayload> Command<P> {
    /// Creates a command of `command_type` carrying `events`.
    #[must_use]
    pub fn new(command_type: impl Into<String>, events: Vec<CommandEvent<P>>) -> Self {
        Self {
            command_type: command_type.into(),
            events,
        }
    }

    /// Creates a command from bare payloads.
    #[must_use]
    pub fn from_payloads(command_type: impl Into<String>, payloads: Vec<P>) -> Self {
        Self::new(
            command_type,
            payloads.into_iter().map(CommandEvent::new).collect(),
        )
    }
}
