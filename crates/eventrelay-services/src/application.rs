//! Application-level orchestrators.

pub mod command_handler;
pub mod event_handler;
pub mod transaction_handler;
