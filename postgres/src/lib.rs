//! `PostgreSQL` persistence for the Stagepass engine.
//!
//! This crate provides the production implementations of the storage
//! concerns the engine abstracts behind traits:
//!
//! - [`PostgresEventStore`]: the `EventStore` implementation backing all
//!   aggregate streams (the shared relational store every request handler
//!   contends on)
//! - [`MintRetryQueue`]: persistent queue of failed external-ledger
//!   submissions, drained by the reconciler
//!
//! # Example
//!
//! ```ignore
//! use stagepass_postgres::PostgresEventStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresEventStore::connect("postgres://localhost/stagepass", 10).await?;
//!     store.ensure_schema().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

mod event_store;
mod mint_retry_queue;

pub use event_store::PostgresEventStore;
pub use mint_retry_queue::{MintRetryQueue, PendingSubmission, SubmissionKind, SubmissionStatus};
