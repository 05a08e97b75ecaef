//! Event store trait and related types for event sourcing.
//!
//! The `EventStore` trait is deliberately minimal: append events to a
//! stream with optimistic concurrency, load events for state
//! reconstruction, and save/load state snapshots.
//!
//! # Implementations
//!
//! - `PostgresEventStore` (in `stagepass-postgres`): production store
//! - `InMemoryEventStore` (in `stagepass-testing`): fast, deterministic
//!   testing
//!
//! # Dyn Compatibility
//!
//! This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` to enable trait-object usage (`Arc<dyn EventStore>`), which
//! the effect system requires.

use crate::event::SerializedEvent;
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Type alias for snapshot data: `(Version, Vec<u8>)`
type SnapshotData = (Version, Vec<u8>);

/// Errors that can occur during event store operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: expected version doesn't match
    /// current version. Another process has modified the stream
    /// concurrently.
    #[error("Concurrency conflict: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream ID where the conflict occurred.
        stream_id: StreamId,
        /// The version we expected the stream to be at.
        expected: Version,
        /// The actual current version of the stream.
        actual: Version,
    },

    /// Stream not found in the event store.
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    /// Database connection error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Event store abstraction for storing and retrieving event streams.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to be safely shared across the
/// service layer and background tasks.
pub trait EventStore: Send + Sync {
    /// Append events to a stream with optimistic concurrency control.
    ///
    /// `expected_version` of `Some(v)` asserts the stream is currently at
    /// version `v`; `None` appends unconditionally. Returns the new
    /// version after appending.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: version mismatch (concurrent modification)
    /// - `DatabaseError`: connection or query failed
    /// - `SerializationError`: failed to serialize events
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>>;

    /// Load events from a stream, ordered oldest first.
    ///
    /// `from_version` of `Some(v)` loads events after that version
    /// (exclusive, pass a snapshot's version to replay the tail); `None`
    /// loads the full stream. A missing stream yields an empty vector,
    /// not an error, new streams start empty.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: connection or query failed
    /// - `SerializationError`: failed to deserialize events
    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>;

    /// Save a snapshot of aggregate state at a given version.
    ///
    /// Snapshots allow rebuilding aggregate state without replaying all
    /// events; they are an optimization and always optional.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: connection or query failed
    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>>;

    /// Load the latest snapshot for a stream.
    ///
    /// Returns `Some((version, state))` if a snapshot exists; to fully
    /// reconstruct state, replay events from that version onwards.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: connection or query failed
    /// - `SerializationError`: failed to deserialize snapshot
    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SnapshotData>, EventStoreError>> + Send + '_>>;
}
