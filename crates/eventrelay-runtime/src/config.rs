//! Relay configuration read from the environment.

use std::time::Duration;

use eventrelay_event_store::schema::DEFAULT_NOTIFY_CHANNEL;

use crate::error::RuntimeError;

/// Snapshot cadence used when `EVENTRELAY_SNAPSHOT_CAP` is unset.
pub const DEFAULT_SNAPSHOT_CAP: i64 = 50;
/// Graceful-shutdown window used when `EVENTRELAY_SHUTDOWN_TIMEOUT_SECS` is unset.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Pool size used when `EVENTRELAY_MAX_CONNECTIONS` is unset.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Settings of one relay process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// `LISTEN` channel commits are announced on.
    pub notify_channel: String,
    /// Snapshot cadence of the aggregates the relay rebuilds, see
    /// [`crate::bootstrap::capped_provider`].
    pub snapshot_cap: i64,
    /// How long shutdown waits for the in-flight relay.
    pub shutdown_timeout: Duration,
    /// Upper bound of the connection pool.
    pub max_connections: u32,
}

impl RelayConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Config` if `DATABASE_URL` is missing or a
    /// numeric setting does not parse.
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Config` if `DATABASE_URL` is missing or a
    /// numeric setting does not parse or is out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RuntimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| RuntimeError::Config("DATABASE_URL must be set".into()))?;
        let notify_channel = lookup("EVENTRELAY_NOTIFY_CHANNEL")
            .filter(|channel| !channel.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_NOTIFY_CHANNEL.to_owned());

        let snapshot_cap =
            parse_or(&lookup, "EVENTRELAY_SNAPSHOT_CAP", DEFAULT_SNAPSHOT_CAP)?;
        if snapshot_cap <= 0 {
            return Err(RuntimeError::Config(format!(
                "EVENTRELAY_SNAPSHOT_CAP must be positive, got {snapshot_cap}"
            )));
        }
        let shutdown_secs = parse_or(
            &lookup,
            "EVENTRELAY_SHUTDOWN_TIMEOUT_SECS",
            DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
        )?;
        let max_connections =
            parse_or(&lookup, "EVENTRELAY_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        if max_connections == 0 {
            return Err(RuntimeError::Config(
                "EVENTRELAY_MAX_CONNECTIONS must be at least 1".into(),
            ));
        }

        Ok(Self {
            database_url,
            notify_channel,
            snapshot_cap,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            max_connections,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, RuntimeError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RuntimeError::Config(format!("{key} is invalid ({raw:?}): {e}"))),
    }
}
