//! `PostgreSQL` implementation of the `EventStore` trait.
//!
//! Tables live in the `es` schema (see [`crate::schema`]). Optimistic
//! concurrency is enforced on `es.aggregates` by an upsert whose update only
//! applies `WHERE version = base`; a missing row counts as version 0. Each
//! transaction row is announced with `pg_notify`, which Postgres delivers only
//! on commit.

use async_trait::async_trait;
use eventrelay_core::aggregate::{Aggregate, AggregateState};
use eventrelay_core::error::DomainError;
use eventrelay_core::event::{Event, EventPayload};
use eventrelay_core::snapshot::Snapshot;
use eventrelay_core::store::EventStore;
use eventrelay_core::transaction::{Subscription, Transaction};
use serde::de::DeserializeOwned;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;
use uuid::Uuid;

use crate::notification::TransactionNotification;
use crate::schema::DEFAULT_NOTIFY_CHANNEL;

const EVENT_COLUMNS: &str =
    "e.aggregate_id, e.transaction_id, e.command_type, e.version, e.event_type, e.payload, e.created_at";

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    notify_channel: String,
}

impl PgEventStore {
    /// Creates a store that announces commits on the default channel.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_notify_channel(pool, DEFAULT_NOTIFY_CHANNEL)
    }

    /// Creates a store that announces commits on `channel`.
    #[must_use]
    pub fn with_notify_channel(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            notify_channel: channel.into(),
        }
    }

    /// Returns the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the channel commits are announced on.
    #[must_use]
    pub fn notify_channel(&self) -> &str {
        &self.notify_channel
    }
}

fn persistence(e: sqlx::Error) -> DomainError {
    DomainError::Persistence(e.to_string())
}

fn conflict_or_persistence(e: sqlx::Error, aggregate_id: Uuid, expected: i64) -> DomainError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => DomainError::ConcurrencyConflict {
            aggregate_id,
            expected,
        },
        _ => persistence(e),
    }
}

fn decode_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, DomainError> {
    serde_json::from_value(value).map_err(|e| DomainError::Conversion(e.to_string()))
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(value).map_err(|e| DomainError::Conversion(e.to_string()))
}

fn decode_event<P: EventPayload>(row: &PgRow) -> Result<Event<P>, DomainError> {
    let payload: Json<serde_json::Value> = row.try_get("payload").map_err(persistence)?;
    Ok(Event {
        aggregate_id: row.try_get("aggregate_id").map_err(persistence)?,
        transaction_id: row.try_get("transaction_id").map_err(persistence)?,
        command_type: row.try_get("command_type").map_err(persistence)?,
        version: row.try_get("version").map_err(persistence)?,
        event_type: row.try_get("event_type").map_err(persistence)?,
        payload: decode_json(payload.0)?,
        created_at: row.try_get("created_at").map_err(persistence)?,
    })
}

fn decode_events<P: EventPayload>(rows: &[PgRow]) -> Result<Vec<Event<P>>, DomainError> {
    rows.iter().map(decode_event).collect()
}

#[async_trait]
impl<A: AggregateState> EventStore<A> for PgEventStore {
    type Tx = sqlx::Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, DomainError> {
        self.pool.begin().await.map_err(persistence)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), DomainError> {
        tx.commit().await.map_err(persistence)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), DomainError> {
        tx.rollback().await.map_err(persistence)
    }

    async fn get_snapshot(
        &self,
        aggregate_id: Uuid,
        before_version: Option<i64>,
        tx: &mut Self::Tx,
    ) -> Result<Option<Snapshot<A::Snapshot>>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT version, payload FROM es.snapshots
            WHERE aggregate_id = $1 AND ($2::BIGINT IS NULL OR version < $2)
            ORDER BY version DESC
            LIMIT 1
            ",
        )
        .bind(aggregate_id)
        .bind(before_version)
        .fetch_optional(&mut **tx)
        .await
        .map_err(persistence)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: Json<serde_json::Value> = row.try_get("payload").map_err(persistence)?;
        Ok(Some(Snapshot {
            aggregate_id,
            version: row.try_get("version").map_err(persistence)?,
            payload: decode_json(payload.0)?,
        }))
    }

    async fn get_events(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
        to_version: Option<i64>,
        tx: &mut Self::Tx,
    ) -> Result<Vec<Event<A::Payload>>, DomainError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {EVENT_COLUMNS} FROM es.events AS e
            WHERE e.aggregate_id = $1 AND e.version >= $2 AND ($3::BIGINT IS NULL OR e.version <= $3)
            ORDER BY e.version
            "
        ))
        .bind(aggregate_id)
        .bind(from_version)
        .bind(to_version)
        .fetch_all(&mut **tx)
        .await
        .map_err(persistence)?;
        decode_events(&rows)
    }

    async fn get_unhandled_events(
        &self,
        aggregate_id: Uuid,
        after_sequence: i64,
        up_to_sequence: i64,
        tx: &mut Self::Tx,
    ) -> Result<Vec<Event<A::Payload>>, DomainError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {EVENT_COLUMNS} FROM es.events AS e
            JOIN es.transactions AS t ON t.id = e.transaction_id
            WHERE e.aggregate_id = $1 AND t.sequence_id > $2 AND t.sequence_id <= $3
            ORDER BY e.version
            "
        ))
        .bind(aggregate_id)
        .bind(after_sequence)
        .bind(up_to_sequence)
        .fetch_all(&mut **tx)
        .await
        .map_err(persistence)?;
        decode_events(&rows)
    }

    async fn update_or_create_aggregate(
        &self,
        transaction_id: Uuid,
        aggregate: &Aggregate<A>,
        snapshot: A::Snapshot,
        tx: &mut Self::Tx,
    ) -> Result<(), DomainError> {
        let aggregate_id = aggregate.id();
        let base = aggregate.base_version();
        let next = aggregate.version();

        // A row left at version 0 by an empty command is updated like any other.
        let written = sqlx::query(
            r"
            INSERT INTO es.aggregates AS a (id, version)
            SELECT $1::UUID, $2::BIGINT WHERE $3::BIGINT = 0
            ON CONFLICT (id) DO UPDATE SET version = EXCLUDED.version
            WHERE a.version = $3
            ",
        )
        .bind(aggregate_id)
        .bind(next)
        .bind(base)
        .execute(&mut **tx)
        .await
        .map_err(|e| conflict_or_persistence(e, aggregate_id, base))?;
        if written.rows_affected() == 0 {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: base,
            });
        }

        if aggregate.snapshot_due() {
            sqlx::query(
                "INSERT INTO es.snapshots (aggregate_id, version, payload) VALUES ($1, $2, $3)",
            )
            .bind(aggregate_id)
            .bind(next)
            .bind(Json(encode_json(&snapshot)?))
            .execute(&mut **tx)
            .await
            .map_err(persistence)?;
            debug!(%aggregate_id, version = next, "snapshot stored");
        }

        if !aggregate.changes().is_empty() {
            let rows = aggregate
                .changes()
                .iter()
                .map(|event| Ok((event, encode_json(&event.payload)?)))
                .collect::<Result<Vec<_>, DomainError>>()?;
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO es.events \
                 (aggregate_id, version, transaction_id, command_type, event_type, payload, created_at) ",
            );
            qb.push_values(rows, |mut b, (event, payload)| {
                b.push_bind(event.aggregate_id)
                    .push_bind(event.version)
                    .push_bind(event.transaction_id)
                    .push_bind(event.command_type.clone())
                    .push_bind(event.event_type.clone())
                    .push_bind(Json(payload))
                    .push_bind(event.created_at);
            });
            qb.build()
                .execute(&mut **tx)
                .await
                .map_err(|e| conflict_or_persistence(e, aggregate_id, base))?;
        }

        let sequence_id: i64 = sqlx::query_scalar(
            "INSERT INTO es.transactions (id, aggregate_id) VALUES ($1, $2) RETURNING sequence_id",
        )
        .bind(transaction_id)
        .bind(aggregate_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(persistence)?;

        let payload =
            TransactionNotification::from(&Transaction::new(transaction_id, aggregate_id, sequence_id))
                .encode()?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.notify_channel)
            .bind(payload)
            .execute(&mut **tx)
            .await
            .map_err(persistence)?;

        debug!(
            %aggregate_id,
            %transaction_id,
            sequence_id,
            base_version = base,
            version = next,
            "aggregate persisted"
        );
        Ok(())
    }

    async fn get_subscription(
        &self,
        tx: &mut Self::Tx,
    ) -> Result<Option<Subscription>, DomainError> {
        let last: Option<i64> = sqlx::query_scalar(
            "SELECT last_sequence_id FROM es.subscription WHERE id = 1 FOR UPDATE SKIP LOCKED",
        )
        .fetch_optional(&mut **tx)
        .await
        .map_err(persistence)?;
        Ok(last.map(Subscription::new))
    }

    async fn update_subscription(
        &self,
        subscription: Subscription,
        tx: &mut Self::Tx,
    ) -> Result<(), DomainError> {
        let updated = sqlx::query("UPDATE es.subscription SET last_sequence_id = $1 WHERE id = 1")
            .bind(subscription.last_sequence_id)
            .execute(&mut **tx)
            .await
            .map_err(persistence)?;
        if updated.rows_affected() == 0 {
            return Err(DomainError::Persistence("checkpoint row is missing".into()));
        }
        Ok(())
    }
}
