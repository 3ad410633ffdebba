//! Eventrelay Runtime — process lifecycle for the outbox relay.
//!
//! Reads configuration from the environment, installs the tracing
//! subscriber, and runs the transaction consumer behind a graceful-shutdown
//! window.

pub mod bootstrap;
pub mod config;
pub mod consumer;
pub mod endpoint;
pub mod error;
pub mod telemetry;
