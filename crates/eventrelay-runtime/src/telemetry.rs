//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::error::RuntimeError;

/// Builds the log filter from `RUST_LOG`, defaulting to `info`.
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global JSON subscriber.
///
/// # Errors
///
/// Returns `RuntimeError::Config` if a global subscriber is already set.
pub fn init_tracing() -> Result<(), RuntimeError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .try_init()
        .map_err(|e| RuntimeError::Config(format!("failed to install tracing subscriber: {e}")))
}
