//! Event bus abstraction for cross-aggregate communication.
//!
//! Events flow from the event store (source of truth) through the event
//! bus to enable coordination between aggregates and downstream consumers
//! such as the reconciler.
//!
//! # Key Principles
//!
//! - **Store first**: events are persisted to the event store before
//!   publishing
//! - **At-least-once delivery**: events may be delivered multiple times
//! - **Idempotency**: subscribers must handle duplicate events
//! - **Ordered within a stream**: events from the same aggregate keep
//!   their order

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize an event
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Generic error for other failures
    #[error("Event bus error: {0}")]
    Other(String),
}

/// Stream of events from subscriptions.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` to
/// enable trait-object usage (`Arc<dyn EventBus>`).
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// Events are published with at-least-once semantics; subscribers
    /// must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish fails.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of events.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription
    /// fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
