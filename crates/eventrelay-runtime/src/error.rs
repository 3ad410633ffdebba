//! Eventrelay Runtime — error types.

use std::time::Duration;

use eventrelay_core::error::DomainError;
use thiserror::Error;

/// Startup and lifecycle errors of the relay process.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection, pool or schema error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The notification source could not be set up.
    #[error("relay error: {0}")]
    Relay(#[from] DomainError),

    /// The in-flight relay did not finish within the shutdown window.
    #[error("graceful shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// The consumer task panicked or was cancelled.
    #[error("consumer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_timeout_message_names_the_window() {
        let err = RuntimeError::ShutdownTimeout(Duration::from_secs(5));

        assert_eq!(err.to_string(), "graceful shutdown timed out after 5s");
    }

    #[test]
    fn test_domain_errors_convert_into_relay_errors() {
        let err: RuntimeError = DomainError::Notification("listen failed".into()).into();

        assert!(matches!(err, RuntimeError::Relay(DomainError::Notification(_))));
    }
}
