//! Event store database schema.

/// Default channel commit notifications are sent on.
pub const DEFAULT_NOTIFY_CHANNEL: &str = "es_transactions";

/// SQL creating the `es` schema: aggregate version rows, events, snapshots,
/// the transaction log and the relay checkpoint.
pub const CREATE_EVENT_STORE_SCHEMA: &str =
    include_str!("../../../migrations/20260115100000_event_store.sql");

/// Applies [`CREATE_EVENT_STORE_SCHEMA`]. Safe to run on every start.
///
/// # Errors
///
/// Returns a `sqlx::Error` if any statement fails.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(CREATE_EVENT_STORE_SCHEMA)
        .execute(pool)
        .await
        .map(|_| ())
}
