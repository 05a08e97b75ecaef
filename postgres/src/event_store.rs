//! `PostgreSQL` implementation of the core `EventStore` trait.
//!
//! Events live in a single `events` table keyed by `(stream_id, version)`;
//! the unique constraint on that pair is the last line of defense against
//! concurrent writers, underneath the optimistic `expected_version` check
//! and the service layer's per-stream locks.

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use stagepass_core::event::SerializedEvent;
use stagepass_core::event_store::{EventStore, EventStoreError};
use stagepass_core::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;

/// Production event store backed by `PostgreSQL`.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Connect to the database and build a pooled store.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the connection fails.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool (shared with the retry queue).
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the event store tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS events (
                id BIGSERIAL PRIMARY KEY,
                stream_id TEXT NOT NULL,
                version BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                event_data BYTEA NOT NULL,
                metadata JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (stream_id, version)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS snapshots (
                stream_id TEXT PRIMARY KEY,
                version BIGINT NOT NULL,
                state BYTEA NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    fn row_to_event(row: &PgRow) -> SerializedEvent {
        SerializedEvent {
            event_type: row.get("event_type"),
            data: row.get("event_data"),
            metadata: row.get("metadata"),
        }
    }
}

impl EventStore for PostgresEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            // Serialize writers on the stream for the duration of the
            // transaction; the UNIQUE (stream_id, version) constraint
            // backstops it
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(stream_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            let current: i64 = sqlx::query_scalar(
                r"
                SELECT COALESCE(MAX(version), 0)
                FROM events
                WHERE stream_id = $1
                ",
            )
            .bind(stream_id.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            #[allow(clippy::cast_sign_loss)] // version column is never negative
            let current_version = Version::new(current as u64);

            if let Some(expected) = expected_version {
                if expected != current_version {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual: current_version,
                    });
                }
            }

            let mut version = current;
            for event in &events {
                version += 1;
                sqlx::query(
                    r"
                    INSERT INTO events (stream_id, version, event_type, event_data, metadata)
                    VALUES ($1, $2, $3, $4, $5)
                    ",
                )
                .bind(stream_id.as_str())
                .bind(version)
                .bind(&event.event_type)
                .bind(&event.data)
                .bind(&event.metadata)
                .execute(&mut *tx)
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;
            }

            tx.commit()
                .await
                .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            #[allow(clippy::cast_sign_loss)] // monotonically increasing from 0
            Ok(Version::new(version as u64))
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // versions stay far below i64::MAX
            let from = from_version.map_or(0, |v| v.value() as i64);

            let rows = sqlx::query(
                r"
                SELECT event_type, event_data, metadata
                FROM events
                WHERE stream_id = $1 AND version > $2
                ORDER BY version ASC
                ",
            )
            .bind(stream_id.as_str())
            .bind(from)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            Ok(rows.iter().map(Self::row_to_event).collect())
        })
    }

    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            #[allow(clippy::cast_possible_wrap)] // versions stay far below i64::MAX
            let version = version.value() as i64;

            sqlx::query(
                r"
                INSERT INTO snapshots (stream_id, version, state)
                VALUES ($1, $2, $3)
                ON CONFLICT (stream_id)
                DO UPDATE SET version = $2, state = $3, created_at = NOW()
                ",
            )
            .bind(stream_id.as_str())
            .bind(version)
            .bind(&state)
            .execute(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            Ok(())
        })
    }

    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(Version, Vec<u8>)>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT version, state
                FROM snapshots
                WHERE stream_id = $1
                ",
            )
            .bind(stream_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

            Ok(row.map(|row| {
                let version: i64 = row.get("version");
                #[allow(clippy::cast_sign_loss)] // version column is never negative
                let version = Version::new(version as u64);
                (version, row.get("state"))
            }))
        })
    }
}
