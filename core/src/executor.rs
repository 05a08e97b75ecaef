//! Effect execution.
//!
//! The executor turns [`Effect`] values into actual I/O: it awaits
//! futures, performs event-store appends and event-bus publishes, and
//! spawns delayed actions. Follow-up actions produced by callbacks are
//! pushed onto a feedback channel owned by the dispatching service, which
//! routes them back through the reducer.
//!
//! Delays are spawned, never awaited inline, so a five-minute reservation
//! expiry does not block the request that created it.

use crate::effect::{Effect, EventBusOperation, EventStoreOperation};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc::UnboundedSender;

/// Executes effects, feeding produced actions back through a channel.
pub struct EffectExecutor<Action> {
    feedback: UnboundedSender<Action>,
}

impl<Action> Clone for EffectExecutor<Action> {
    fn clone(&self) -> Self {
        Self {
            feedback: self.feedback.clone(),
        }
    }
}

impl<Action: Send + 'static> EffectExecutor<Action> {
    /// Create an executor that sends follow-up actions to `feedback`.
    #[must_use]
    pub const fn new(feedback: UnboundedSender<Action>) -> Self {
        Self { feedback }
    }

    /// Execute a batch of effects in order.
    pub async fn run_all(&self, effects: impl IntoIterator<Item = Effect<Action>>) {
        for effect in effects {
            self.run(effect).await;
        }
    }

    /// Execute a single effect.
    ///
    /// Store and bus operations are awaited so callers observe persisted
    /// state when this returns. `Delay` effects are spawned onto the
    /// runtime and resolve through the feedback channel.
    pub fn run<'a>(&'a self, effect: Effect<Action>) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match effect {
                Effect::None => {}

                Effect::Parallel(effects) => {
                    futures::future::join_all(effects.into_iter().map(|e| self.run(e))).await;
                }

                Effect::Sequential(effects) => {
                    for e in effects {
                        self.run(e).await;
                    }
                }

                Effect::Delay { duration, action } => {
                    let feedback = self.feedback.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(duration).await;
                        // Receiver gone means the service is shutting down
                        let _ = feedback.send(*action);
                    });
                }

                Effect::Future(future) => {
                    if let Some(action) = future.await {
                        let _ = self.feedback.send(action);
                    }
                }

                Effect::EventStore(EventStoreOperation::AppendEvents {
                    event_store,
                    stream_id,
                    expected_version,
                    events,
                    on_success,
                    on_error,
                }) => {
                    match event_store
                        .append_events(stream_id.clone(), expected_version, events)
                        .await
                    {
                        Ok(version) => {
                            if let Some(action) = on_success(version) {
                                let _ = self.feedback.send(action);
                            }
                        }
                        Err(error) => {
                            tracing::error!(
                                stream_id = %stream_id,
                                error = %error,
                                "event append failed"
                            );
                            if let Some(action) = on_error(error) {
                                let _ = self.feedback.send(action);
                            }
                        }
                    }
                }

                Effect::PublishEvent(EventBusOperation::Publish {
                    event_bus,
                    topic,
                    event,
                    on_success,
                    on_error,
                }) => match event_bus.publish(&topic, &event).await {
                    Ok(()) => {
                        if let Some(action) = on_success(()) {
                            let _ = self.feedback.send(action);
                        }
                    }
                    Err(error) => {
                        tracing::error!(topic = %topic, error = %error, "event publish failed");
                        if let Some(action) = on_error(error) {
                            let _ = self.feedback.send(action);
                        }
                    }
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, PartialEq)]
    enum TestAction {
        Done(i32),
    }

    #[tokio::test]
    async fn future_effect_feeds_back_action() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = EffectExecutor::new(tx);

        executor
            .run(Effect::Future(Box::pin(async {
                Some(TestAction::Done(7))
            })))
            .await;

        assert_eq!(rx.recv().await, Some(TestAction::Done(7)));
    }

    #[tokio::test]
    async fn delay_effect_resolves_through_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = EffectExecutor::new(tx);

        executor
            .run(Effect::Delay {
                duration: Duration::from_millis(5),
                action: Box::new(TestAction::Done(1)),
            })
            .await;

        assert_eq!(rx.recv().await, Some(TestAction::Done(1)));
    }
}
