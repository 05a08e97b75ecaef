//! Retry queue for failed external-ledger submissions.
//!
//! When a mint, transfer, or burn submission to the blockchain
//! collaborator fails, the local ticket stays authoritative and the
//! submission is parked here for the reconciler to retry. Entries carry
//! failure metadata for incident investigation and manual resolution.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use stagepass_core::event_store::EventStoreError;

/// Kind of external submission being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    /// Initial NFT mint for a ticket
    Mint,
    /// Ownership transfer on the external ledger
    Transfer,
    /// Burn after refund/cancel/void
    Burn,
}

impl SubmissionKind {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mint => "mint",
            Self::Transfer => "transfer",
            Self::Burn => "burn",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the string doesn't match a known kind.
    pub fn parse(s: &str) -> Result<Self, EventStoreError> {
        match s {
            "mint" => Ok(Self::Mint),
            "transfer" => Ok(Self::Transfer),
            "burn" => Ok(Self::Burn),
            _ => Err(EventStoreError::DatabaseError(format!(
                "Invalid submission kind: {s}"
            ))),
        }
    }
}

/// Status of a queued submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    /// Waiting for the reconciler to retry
    Pending,
    /// A retry is in flight
    Retrying,
    /// The submission eventually succeeded
    Resolved,
    /// Permanently given up (requires manual intervention)
    Discarded,
}

impl SubmissionStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse from the database representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, EventStoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(EventStoreError::DatabaseError(format!(
                "Invalid submission status: {s}"
            ))),
        }
    }
}

/// A queued external submission awaiting retry.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    /// Unique identifier for this queue entry
    pub id: i64,

    /// The ticket the submission belongs to
    pub ticket_id: String,

    /// What kind of submission failed
    pub kind: SubmissionKind,

    /// Serialized submission payload (mint metadata, target wallet, ...)
    pub payload: serde_json::Value,

    /// Error message from the last failure
    pub error_message: String,

    /// Number of times the submission has been attempted
    pub retry_count: i32,

    /// When this submission first failed
    pub first_failed_at: DateTime<Utc>,

    /// When this submission most recently failed
    pub last_failed_at: DateTime<Utc>,

    /// Current status
    pub status: SubmissionStatus,

    /// Notes recorded when resolving or discarding
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-backed retry queue for external-ledger submissions.
pub struct MintRetryQueue {
    pool: PgPool,
}

impl MintRetryQueue {
    /// Create a queue with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the queue table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS mint_retry_queue (
                id BIGSERIAL PRIMARY KEY,
                ticket_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload JSONB NOT NULL,
                error_message TEXT NOT NULL,
                retry_count INT NOT NULL DEFAULT 0,
                first_failed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_failed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                status TEXT NOT NULL DEFAULT 'pending',
                resolution_notes TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Park a failed submission for retry.
    ///
    /// Returns the unique ID of the created entry.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the insert fails.
    pub async fn add_entry(
        &self,
        ticket_id: &str,
        kind: SubmissionKind,
        payload: &serde_json::Value,
        error_message: &str,
        retry_count: i32,
    ) -> Result<i64, EventStoreError> {
        let id: (i64,) = sqlx::query_as(
            r"
            INSERT INTO mint_retry_queue (ticket_id, kind, payload, error_message, retry_count)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(ticket_id)
        .bind(kind.as_str())
        .bind(payload)
        .bind(error_message)
        .bind(retry_count)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        tracing::warn!(
            queue_id = id.0,
            ticket_id = ticket_id,
            kind = kind.as_str(),
            error = error_message,
            retry_count = retry_count,
            "external submission queued for retry"
        );

        metrics::counter!("reconciler.retry_queue.added", "kind" => kind.as_str()).increment(1);

        Ok(id.0)
    }

    /// List pending submissions, oldest first (FIFO processing).
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<PendingSubmission>, EventStoreError> {
        #[allow(clippy::cast_possible_wrap)] // limit is a reasonable size
        let rows = sqlx::query(
            r"
            SELECT id, ticket_id, kind, payload, error_message, retry_count,
                   first_failed_at, last_failed_at, status, resolution_notes
            FROM mint_retry_queue
            WHERE status = 'pending'
            ORDER BY first_failed_at ASC
            LIMIT $1
            ",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_submission).collect()
    }

    /// Record another failed attempt for an entry.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the update fails.
    pub async fn record_attempt(&self, id: i64, error_message: &str) -> Result<(), EventStoreError> {
        sqlx::query(
            r"
            UPDATE mint_retry_queue
            SET retry_count = retry_count + 1,
                error_message = $1,
                last_failed_at = NOW(),
                status = 'pending'
            WHERE id = $2
            ",
        )
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Mark an entry as resolved after a successful retry.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, notes: Option<&str>) -> Result<(), EventStoreError> {
        sqlx::query(
            r"
            UPDATE mint_retry_queue
            SET status = 'resolved', resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        tracing::info!(queue_id = id, "retry queue entry resolved");
        metrics::counter!("reconciler.retry_queue.resolved").increment(1);

        Ok(())
    }

    /// Permanently give up on an entry.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), EventStoreError> {
        sqlx::query(
            r"
            UPDATE mint_retry_queue
            SET status = 'discarded', resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        tracing::warn!(queue_id = id, reason = reason, "retry queue entry discarded");
        metrics::counter!("reconciler.retry_queue.discarded").increment(1);

        Ok(())
    }

    /// Count of pending entries, for monitoring and health checks.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, EventStoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM mint_retry_queue
            WHERE status = 'pending'
            ",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    fn row_to_submission(row: &sqlx::postgres::PgRow) -> Result<PendingSubmission, EventStoreError> {
        let kind_str: String = row.get("kind");
        let status_str: String = row.get("status");

        Ok(PendingSubmission {
            id: row.get("id"),
            ticket_id: row.get("ticket_id"),
            kind: SubmissionKind::parse(&kind_str)?,
            payload: row.get("payload"),
            error_message: row.get("error_message"),
            retry_count: row.get("retry_count"),
            first_failed_at: row.get("first_failed_at"),
            last_failed_at: row.get("last_failed_at"),
            status: SubmissionStatus::parse(&status_str)?,
            resolution_notes: row.get("resolution_notes"),
        })
    }
}
