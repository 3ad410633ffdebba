//! Aggregate root abstraction.
//!
//! An [`Aggregate`] wraps a domain-specific [`AggregateState`] and tracks the
//! two versions the write and read paths reason about:
//!
//! - `version`: the highest event applied in memory, including pending work;
//! - `base_version`: the version as of the last durable load (snapshot plus
//!   replayed history). The store uses it for the insert-vs-update decision,
//!   the optimistic-concurrency predicate and the snapshot cadence test.

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{Event, EventPayload, IntegrationEvent};

/// Domain-specific state folded from an event stream.
///
/// `apply` is the transition table of the state machine: implementations
/// match on the payload variant and mutate themselves accordingly.
pub trait AggregateState: Default + Send + Sync + 'static {
    /// Tagged union of the events this state understands.
    type Payload: EventPayload;
    /// Serialized checkpoint of the state.
    type Snapshot: Serialize + DeserializeOwned + Clone + Send + Sync + std::fmt::Debug + 'static;
    /// Read-model document saved on every handled command.
    type Projection: Serialize + Clone + Send + Sync + std::fmt::Debug + 'static;
    /// Payload of the integration events published by the relay.
    type Integration: Serialize + Clone + Send + Sync + std::fmt::Debug + 'static;

    /// Applies one event to the state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Conversion` if the event cannot be applied to the
    /// current state.
    fn apply(&mut self, event: &Event<Self::Payload>) -> Result<(), DomainError>;

    /// Replaces the state with a previously taken snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Conversion` if the snapshot is unusable.
    fn apply_snapshot(&mut self, snapshot: Self::Snapshot) -> Result<(), DomainError>;

    /// Returns a snapshot of the current state.
    fn snapshot(&self) -> Self::Snapshot;

    /// Returns the read-model projection of the current state.
    fn projection(&self, aggregate_id: Uuid, version: i64) -> Self::Projection;

    /// Returns the integration payload describing the current state after an
    /// event of `event_type`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Conversion` if no representation exists for
    /// `event_type`.
    fn integration_payload(&self, event_type: &str) -> Result<Self::Integration, DomainError>;
}

/// In-memory replay and mutation state machine for one entity's stream.
///
/// Constructed per operation and dropped afterwards; nothing else observes it,
/// so a failed operation needs no compensation.
#[derive(Debug)]
pub struct Aggregate<A: AggregateState> {
    id: Uuid,
    cap: i64,
    version: i64,
    base_version: i64,
    changes: Vec<Event<A::Payload>>,
    state: A,
}

impl<A: AggregateState> Aggregate<A> {
    /// Creates an empty aggregate at version 0 that requests a snapshot every
    /// `cap` versions. A non-positive `cap` disables snapshots.
    #[must_use]
    pub fn new(id: Uuid, cap: i64) -> Self {
        Self {
            id,
            cap,
            version: 0,
            base_version: 0,
            changes: Vec::new(),
            state: A::default(),
        }
    }

    /// Returns the aggregate identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the snapshot cadence.
    #[must_use]
    pub fn cap(&self) -> i64 {
        self.cap
    }

    /// Returns the highest applied event version.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns the version as of the last durable load.
    #[must_use]
    pub fn base_version(&self) -> i64 {
        self.base_version
    }

    /// Returns events applied through `apply_change` that are not durable yet.
    #[must_use]
    pub fn changes(&self) -> &[Event<A::Payload>] {
        &self.changes
    }

    /// Returns the domain state.
    #[must_use]
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Replays durable history. Versions must strictly increase; on success
    /// both `version` and `base_version` move to the last replayed event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidVersion` if an event is not newer than the
    /// current version, or any error raised by the state's `apply`.
    pub fn build(&mut self, events: &[Event<A::Payload>]) -> Result<(), DomainError> {
        for event in events {
            if event.version <= self.version {
                return Err(self.invalid_version(event.version));
            }
            self.state.apply(event)?;
            self.version = event.version;
            self.base_version = event.version;
        }
        Ok(())
    }

    /// Restores state from a snapshot taken at `version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidVersion` if `version` is not newer than the
    /// current version, or any error raised by the state's `apply_snapshot`.
    pub fn build_from_snapshot(
        &mut self,
        version: i64,
        snapshot: A::Snapshot,
    ) -> Result<(), DomainError> {
        if version <= self.version {
            return Err(self.invalid_version(version));
        }
        self.state.apply_snapshot(snapshot)?;
        self.version = version;
        self.base_version = version;
        Ok(())
    }

    /// Applies one new event. The event must be exactly the next version; on
    /// success it is recorded in `changes` and `base_version` is untouched.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidVersion` if the event is not contiguous
    /// with the in-memory state, or any error raised by the state's `apply`.
    pub fn apply_change(&mut self, event: Event<A::Payload>) -> Result<(), DomainError> {
        if event.version != self.version + 1 {
            return Err(self.invalid_version(event.version));
        }
        self.state.apply(&event)?;
        self.version = event.version;
        self.changes.push(event);
        Ok(())
    }

    /// Applies events in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by `apply_change`.
    pub fn apply_changes(&mut self, events: Vec<Event<A::Payload>>) -> Result<(), DomainError> {
        for event in events {
            self.apply_change(event)?;
        }
        Ok(())
    }

    /// Returns `true` when persisting the pending changes crosses a multiple
    /// of `cap`, i.e. `version / cap > base_version / cap`.
    #[must_use]
    pub fn snapshot_due(&self) -> bool {
        self.cap > 0 && self.version / self.cap > self.base_version / self.cap
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> A::Snapshot {
        self.state.snapshot()
    }

    /// Returns the read-model projection of the current state.
    #[must_use]
    pub fn projection(&self) -> A::Projection {
        self.state.projection(self.id, self.version)
    }

    /// Returns the integration event for `event_type` built from the current
    /// state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Conversion` if the state cannot represent
    /// `event_type`.
    pub fn integration_event(
        &self,
        event_type: &str,
    ) -> Result<IntegrationEvent<A::Integration>, DomainError> {
        Ok(IntegrationEvent {
            id: self.id,
            event_type: event_type.to_owned(),
            payload: self.state.integration_payload(event_type)?,
        })
    }

    fn invalid_version(&self, actual: i64) -> DomainError {
        DomainError::InvalidVersion {
            aggregate_id: self.id,
            expected: self.version + 1,
            actual,
        }
    }
}
