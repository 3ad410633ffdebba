//! Eventrelay Core — event-sourcing abstractions.
//!
//! This crate defines the aggregate state machine, the event and transaction
//! records, and the ports the handlers talk to. It contains no
//! infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod ports;
pub mod snapshot;
pub mod store;
pub mod transaction;
