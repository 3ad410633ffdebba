//! Wiring of the Postgres-backed relay.

use std::future::Future;
use std::sync::Arc;

use eventrelay_core::aggregate::{Aggregate, AggregateState};
use eventrelay_core::ports::Publisher;
use eventrelay_event_store::listener::PgTransactionListener;
use eventrelay_event_store::pg_event_store::PgEventStore;
use eventrelay_event_store::schema;
use eventrelay_services::application::transaction_handler::AggregateProvider;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::consumer::{ConsumerReport, TransactionConsumer};
use crate::endpoint::Endpoint;
use crate::error::RuntimeError;

/// Opens the connection pool and creates the event store schema.
///
/// # Errors
///
/// Returns `RuntimeError::Database` if the database is unreachable or the
/// schema cannot be created.
pub async fn connect(config: &RelayConfig) -> Result<PgPool, RuntimeError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    schema::migrate(&pool).await?;
    info!(max_connections = config.max_connections, "connected to event store");
    Ok(pool)
}

/// Builds the provider of empty aggregates that snapshot every
/// `snapshot_cap` versions.
///
/// Write paths should load their aggregates through the same provider so the
/// cadence the relay rebuilds with matches the one snapshots were taken at.
#[must_use]
pub fn capped_provider<A: AggregateState>(snapshot_cap: i64) -> Arc<AggregateProvider<A>> {
    Arc::new(move |id| Aggregate::new(id, snapshot_cap))
}

/// Relays the commits announced on `config.notify_channel` until `shutdown`
/// resolves. Aggregates are rebuilt with `config.snapshot_cap`.
///
/// # Errors
///
/// Returns `RuntimeError::Relay` if the listener cannot subscribe, or the
/// errors of [`Endpoint::serve`].
pub async fn run_relay<A, F>(
    pool: PgPool,
    config: &RelayConfig,
    publisher: Arc<dyn Publisher<A::Integration>>,
    shutdown: F,
) -> Result<ConsumerReport, RuntimeError>
where
    A: AggregateState,
    F: Future<Output = ()> + Send,
{
    let listener = PgTransactionListener::connect(&pool, &config.notify_channel).await?;
    let store = Arc::new(PgEventStore::with_notify_channel(
        pool,
        config.notify_channel.clone(),
    ));
    let provider = capped_provider::<A>(config.snapshot_cap);
    debug!(snapshot_cap = config.snapshot_cap, "relay provider configured");
    let consumer = TransactionConsumer::new(store, publisher, provider);
    Endpoint::new(consumer, listener)
        .serve(shutdown, config.shutdown_timeout)
        .await
}
