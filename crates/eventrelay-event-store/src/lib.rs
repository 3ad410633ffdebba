//! Eventrelay Event Store — `PostgreSQL` persistence.
//!
//! Provides the `EventStore` implementation over the `es` schema and the
//! `LISTEN`-based source of commit notifications that drives the relay.

pub mod listener;
pub mod notification;
pub mod pg_event_store;
pub mod schema;
