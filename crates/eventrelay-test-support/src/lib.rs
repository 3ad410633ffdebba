//! In-memory stores, test doubles and fixtures for eventrelay.

mod clock;
mod doubles;
mod store;
mod user;

pub use clock::{FixedClock, fixed_time};
pub use doubles::{
    FailingProjectionStore, FailingPublisher, RecordingProjectionStore, RecordingPublisher,
};
pub use store::{InMemoryEventStore, InMemoryEventStoreBuilder, InMemoryTx, StoreOperation};
pub use user::{
    TestUser, USER_SNAPSHOT_CAP, UserEvent, UserIntegration, UserProjection, UserSnapshot,
    login_command, new_user, signup_command, user_event,
};
