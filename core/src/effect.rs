//! Side-effect descriptions.
//!
//! Effects describe side effects to be performed by the runtime. They are
//! values (not execution), composable, and returned from reducers. The
//! [`crate::executor::EffectExecutor`] turns them into actual I/O.

use crate::event::SerializedEvent;
use crate::event_bus::{EventBus, EventBusError};
use crate::event_store::{EventStore, EventStoreError};
use crate::stream::{StreamId, Version};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with the result of an effect, producing an optional
/// follow-up action to feed back into the reducer.
type Callback<T, Action> = Box<dyn FnOnce(T) -> Option<Action> + Send>;

/// An event-store operation described as data.
#[allow(missing_docs)]
pub enum EventStoreOperation<Action> {
    /// Append events to a stream with optimistic concurrency control.
    AppendEvents {
        event_store: Arc<dyn EventStore>,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
        on_success: Callback<Version, Action>,
        on_error: Callback<EventStoreError, Action>,
    },
}

/// An event-bus operation described as data.
#[allow(missing_docs)]
pub enum EventBusOperation<Action> {
    /// Publish an event to a topic.
    Publish {
        event_bus: Arc<dyn EventBus>,
        topic: String,
        event: SerializedEvent,
        on_success: Callback<(), Action>,
        on_error: Callback<EventBusError, Action>,
    },
}

/// Effect type: describes a side effect to be executed.
///
/// Effects are NOT executed immediately. They are descriptions of what
/// should happen, returned from reducers and executed by the runtime.
///
/// # Type Parameters
///
/// - `Action`: the action type that effects can produce (feedback loop)
pub enum Effect<Action> {
    /// No-op effect
    None,

    /// Run effects in parallel
    Parallel(Vec<Effect<Action>>),

    /// Run effects sequentially
    Sequential(Vec<Effect<Action>>),

    /// Delayed action (for timeouts, reservation and transfer expiry)
    Delay {
        /// How long to wait
        duration: Duration,
        /// Action to dispatch after delay
        action: Box<Action>,
    },

    /// Arbitrary async computation.
    ///
    /// Returns `Option<Action>`: if `Some`, the action is fed back into
    /// the reducer.
    Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

    /// Event-store operation (append with optimistic concurrency)
    EventStore(EventStoreOperation<Action>),

    /// Event-bus publish operation
    PublishEvent(EventBusOperation<Action>),
}

// Manual Debug implementation since Future and callbacks don't implement Debug
impl<Action> std::fmt::Debug for Effect<Action>
where
    Action: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::None => write!(f, "Effect::None"),
            Effect::Parallel(effects) => f.debug_tuple("Effect::Parallel").field(effects).finish(),
            Effect::Sequential(effects) => {
                f.debug_tuple("Effect::Sequential").field(effects).finish()
            }
            Effect::Delay { duration, action } => f
                .debug_struct("Effect::Delay")
                .field("duration", duration)
                .field("action", action)
                .finish(),
            Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            Effect::EventStore(EventStoreOperation::AppendEvents {
                stream_id, events, ..
            }) => f
                .debug_struct("Effect::EventStore::AppendEvents")
                .field("stream_id", stream_id)
                .field("events", &events.len())
                .finish(),
            Effect::PublishEvent(EventBusOperation::Publish { topic, event, .. }) => f
                .debug_struct("Effect::PublishEvent")
                .field("topic", topic)
                .field("event", event)
                .finish(),
        }
    }
}

impl<Action> Effect<Action> {
    /// Combine effects to run in parallel
    #[must_use]
    pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Parallel(effects)
    }

    /// Chain effects to run sequentially
    #[must_use]
    pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Sequential(effects)
    }
}
