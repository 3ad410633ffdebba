//! Sample user aggregate used to exercise the generic machinery.

use eventrelay_core::aggregate::{Aggregate, AggregateState};
use eventrelay_core::command::Command;
use eventrelay_core::error::DomainError;
use eventrelay_core::event::{Event, EventPayload};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::fixed_time;

/// Events understood by [`TestUser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum UserEvent {
    /// A user signed up with an email address.
    CredentialsCreated {
        /// Sign-up email.
        email: String,
    },
    /// The email address was confirmed.
    EmailConfirmed,
    /// The user signed in from a device.
    UserAuthenticated {
        /// Device identifier.
        device: String,
    },
}

impl EventPayload for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::CredentialsCreated { .. } => "user.credentials_created",
            Self::EmailConfirmed => "user.email_confirmed",
            Self::UserAuthenticated { .. } => "user.authenticated",
        }
    }
}

/// Snapshot of [`TestUser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// Sign-up email, if any.
    pub email: Option<String>,
    /// Whether the email was confirmed.
    pub confirmed: bool,
    /// Number of sign-ins.
    pub login_count: u32,
    /// Device of the latest sign-in.
    pub last_device: Option<String>,
}

/// Read-model document of [`TestUser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProjection {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Aggregate version the projection reflects.
    pub version: i64,
    /// Sign-up email, if any.
    pub email: Option<String>,
    /// Whether the email was confirmed.
    pub confirmed: bool,
    /// Number of sign-ins.
    pub login_count: u32,
}

/// Integration payload published for [`TestUser`] events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIntegration {
    /// Sign-up email.
    pub email: String,
    /// Whether the email was confirmed.
    pub confirmed: bool,
    /// Device of the latest sign-in, if any.
    pub last_device: Option<String>,
}

/// A small user state machine: sign up, confirm, sign in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TestUser {
    /// Sign-up email, if any.
    pub email: Option<String>,
    /// Whether the email was confirmed.
    pub confirmed: bool,
    /// Number of sign-ins.
    pub login_count: u32,
    /// Device of the latest sign-in.
    pub last_device: Option<String>,
}

impl AggregateState for TestUser {
    type Payload = UserEvent;
    type Snapshot = UserSnapshot;
    type Projection = UserProjection;
    type Integration = UserIntegration;

    fn apply(&mut self, event: &Event<UserEvent>) -> Result<(), DomainError> {
        match &event.payload {
            UserEvent::CredentialsCreated { email } => {
                self.email = Some(email.clone());
            }
            UserEvent::EmailConfirmed => {
                if self.email.is_none() {
                    return Err(DomainError::Conversion(format!(
                        "user {} confirmed an email it never registered",
                        event.aggregate_id
                    )));
                }
                self.confirmed = true;
            }
            UserEvent::UserAuthenticated { device } => {
                self.login_count += 1;
                self.last_device = Some(device.clone());
            }
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: UserSnapshot) -> Result<(), DomainError> {
        self.email = snapshot.email;
        self.confirmed = snapshot.confirmed;
        self.login_count = snapshot.login_count;
        self.last_device = snapshot.last_device;
        Ok(())
    }

    fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            email: self.email.clone(),
            confirmed: self.confirmed,
            login_count: self.login_count,
            last_device: self.last_device.clone(),
        }
    }

    fn projection(&self, aggregate_id: Uuid, version: i64) -> UserProjection {
        UserProjection {
            id: aggregate_id,
            version,
            email: self.email.clone(),
            confirmed: self.confirmed,
            login_count: self.login_count,
        }
    }

    fn integration_payload(&self, event_type: &str) -> Result<UserIntegration, DomainError> {
        let known = matches!(
            event_type,
            "user.credentials_created" | "user.email_confirmed" | "user.authenticated"
        );
        match (&self.email, known) {
            (Some(email), true) => Ok(UserIntegration {
                email: email.clone(),
                confirmed: self.confirmed,
                last_device: self.last_device.clone(),
            }),
            (None, true) => Err(DomainError::Conversion(format!(
                "{event_type} has no integration form for an unregistered user"
            ))),
            (_, false) => Err(DomainError::Conversion(format!(
                "unknown user event type {event_type}"
            ))),
        }
    }
}

/// Snapshot cadence used by the user fixtures.
pub const USER_SNAPSHOT_CAP: i64 = 5;

/// Returns an empty user aggregate with the fixture snapshot cadence.
#[must_use]
pub fn new_user(id: Uuid) -> Aggregate<TestUser> {
    Aggregate::new(id, USER_SNAPSHOT_CAP)
}

/// Builds a stored user event with the fixed fixture timestamp.
#[must_use]
pub fn user_event(
    aggregate_id: Uuid,
    transaction_id: Uuid,
    version: i64,
    payload: UserEvent,
) -> Event<UserEvent> {
    Event {
        aggregate_id,
        transaction_id,
        command_type: "user.fixture".to_owned(),
        version,
        event_type: payload.event_type().to_owned(),
        payload,
        created_at: fixed_time(),
    }
}

/// A sign-up command: credentials followed by email confirmation.
#[must_use]
pub fn signup_command(email: &str) -> Command<UserEvent> {
    Command::from_payloads(
        "user.sign_up",
        vec![
            UserEvent::CredentialsCreated {
                email: email.to_owned(),
            },
            UserEvent::EmailConfirmed,
        ],
    )
}

/// A sign-in command for `device`.
#[must_use]
pub fn login_command(device: &str) -> Command<UserEvent> {
    Command::from_payloads(
        "user.sign_in",
        vec![UserEvent::UserAuthenticated {
            device: device.to_owned(),
        }],
    )
}
