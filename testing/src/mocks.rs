//! Mock implementations of environment traits.
//!
//! Fast, deterministic, in-memory stand-ins for the production event
//! store, event bus, and clock.

use chrono::{DateTime, Duration, Utc};
use stagepass_core::environment::Clock;
use stagepass_core::event::SerializedEvent;
use stagepass_core::event_bus::{EventBus, EventBusError, EventStream};
use stagepass_core::event_store::{EventStore, EventStoreError};
use stagepass_core::stream::{StreamId, Version};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Fixed clock for deterministic tests.
///
/// Always returns the configured time; tests can advance it to exercise
/// sale windows, scan heuristics, and expiry logic.
#[derive(Clone, Debug)]
pub struct FixedClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

#[allow(clippy::expect_used)] // Test utility: a poisoned lock is a test bug
impl FixedClock {
    /// Create a clock frozen at the given time.
    #[must_use]
    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(Mutex::new(time)),
        }
    }

    /// Move the clock to a new absolute time.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.time.lock().expect("clock lock poisoned") = time;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, by: Duration) {
        let mut time = self.time.lock().expect("clock lock poisoned");
        *time += by;
    }
}

#[allow(clippy::expect_used)] // Test utility: a poisoned lock is a test bug
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().expect("clock lock poisoned")
    }
}

/// In-memory event store for tests.
///
/// Supports the full [`EventStore`] contract including optimistic
/// concurrency and snapshots.
#[derive(Default)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<StreamId, Vec<SerializedEvent>>>,
    snapshots: Mutex<HashMap<StreamId, (Version, Vec<u8>)>>,
}

#[allow(clippy::expect_used)] // Test utility: a poisoned lock is a test bug
impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events currently stored for a stream.
    #[must_use]
    pub fn stream_len(&self, stream_id: &StreamId) -> usize {
        self.streams
            .lock()
            .expect("store lock poisoned")
            .get(stream_id)
            .map_or(0, Vec::len)
    }

    /// Event type names stored for a stream, in append order.
    #[must_use]
    pub fn event_types(&self, stream_id: &StreamId) -> Vec<String> {
        self.streams
            .lock()
            .expect("store lock poisoned")
            .get(stream_id)
            .map_or_else(Vec::new, |events| {
                events.iter().map(|e| e.event_type.clone()).collect()
            })
    }
}

#[allow(clippy::expect_used)] // Test utility: a poisoned lock is a test bug
impl EventStore for InMemoryEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Version, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut streams = self.streams.lock().expect("store lock poisoned");
            let stream = streams.entry(stream_id.clone()).or_default();
            let current = Version::new(stream.len() as u64);

            if let Some(expected) = expected_version {
                if expected != current {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual: current,
                    });
                }
            }

            let count = events.len() as u64;
            stream.extend(events);
            Ok(current.advance(count))
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SerializedEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let streams = self.streams.lock().expect("store lock poisoned");
            let events = streams.get(&stream_id).cloned().unwrap_or_default();
            let skip = from_version.map_or(0, |v| v.value() as usize);
            Ok(events.into_iter().skip(skip).collect())
        })
    }

    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.snapshots
                .lock()
                .expect("store lock poisoned")
                .insert(stream_id, (version, state));
            Ok(())
        })
    }

    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<(Version, Vec<u8>)>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            Ok(self
                .snapshots
                .lock()
                .expect("store lock poisoned")
                .get(&stream_id)
                .cloned())
        })
    }
}

/// In-memory event bus for tests.
///
/// Records every published event for assertions and forwards events to
/// live subscribers.
#[derive(Default)]
pub struct InMemoryEventBus {
    published: Mutex<Vec<(String, SerializedEvent)>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<SerializedEvent>>>>,
}

#[allow(clippy::expect_used)] // Test utility: a poisoned lock is a test bug
impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far, as (topic, event) pairs.
    #[must_use]
    pub fn published(&self) -> Vec<(String, SerializedEvent)> {
        self.published.lock().expect("bus lock poisoned").clone()
    }

    /// Events published to a single topic.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<SerializedEvent> {
        self.published
            .lock()
            .expect("bus lock poisoned")
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[allow(clippy::expect_used)] // Test utility: a poisoned lock is a test bug
impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();
        Box::pin(async move {
            self.published
                .lock()
                .expect("bus lock poisoned")
                .push((topic.clone(), event.clone()));

            let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
            if let Some(senders) = subscribers.get_mut(&topic) {
                // Drop subscribers whose receivers are gone
                senders.retain(|sender| sender.send(event.clone()).is_ok());
            }

            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
        Box::pin(async move {
            let (sender, mut receiver) = mpsc::unbounded_channel();
            {
                let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
                for topic in topics {
                    subscribers.entry(topic).or_default().push(sender.clone());
                }
            }

            let stream = async_stream::stream! {
                while let Some(event) = receiver.recv().await {
                    yield Ok(event);
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn event(event_type: &str) -> SerializedEvent {
        SerializedEvent::new(event_type.to_string(), vec![1, 2, 3], None)
    }

    #[tokio::test]
    async fn append_and_load_roundtrip() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("test-1");

        let v1 = store
            .append_events(stream.clone(), Some(Version::new(0)), vec![event("A.v1")])
            .await
            .unwrap();
        assert_eq!(v1, Version::new(1));

        let loaded = store.load_events(stream, None).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].event_type, "A.v1");
    }

    #[tokio::test]
    async fn append_detects_concurrency_conflict() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("test-1");

        store
            .append_events(stream.clone(), None, vec![event("A.v1")])
            .await
            .unwrap();

        let result = store
            .append_events(stream, Some(Version::new(0)), vec![event("B.v1")])
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn bus_records_and_delivers() {
        use futures::StreamExt;

        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["tickets"]).await.unwrap();

        bus.publish("tickets", &event("TicketIssued.v1"))
            .await
            .unwrap();

        assert_eq!(bus.published_on("tickets").len(), 1);
        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.event_type, "TicketIssued.v1");
    }

    #[test]
    fn fixed_clock_advances() {
        let start = Utc::now();
        let clock = FixedClock::at(start);
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), start + Duration::seconds(30));
    }
}
