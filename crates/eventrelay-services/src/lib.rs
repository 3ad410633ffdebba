//! Eventrelay Services — the write path and the outbox relay.
//!
//! The command handler appends new events under optimistic concurrency; the
//! transaction handler and event handler turn durable transactions into
//! published integration events.

pub mod application;
