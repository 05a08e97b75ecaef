//! Declarative macros for ergonomic effect construction.
//!
//! These macros reduce boilerplate when creating `Effect` variants for
//! event sourcing and event bus operations.

/// Create an `Effect::EventStore` with `AppendEvents` operation
///
/// # Example
///
/// ```rust,ignore
/// use stagepass_core::append_events;
///
/// append_events! {
///     store: env.event_store,
///     stream: env.stream_id.as_str(),
///     expected_version: None,
///     events: vec![serialized_event],
///     on_success: |_version| None,
///     on_error: |error| Some(LedgerAction::Rejected { error: error.into() })
/// }
/// ```
#[macro_export]
macro_rules! append_events {
    (
        store: $store:expr,
        stream: $stream:expr,
        expected_version: $expected:expr,
        events: $events:expr,
        on_success: |$success_param:ident| $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::EventStore($crate::effect::EventStoreOperation::AppendEvents {
            event_store: ::std::sync::Arc::clone(&$store),
            stream_id: $crate::stream::StreamId::new($stream),
            expected_version: $expected,
            events: $events,
            on_success: ::std::boxed::Box::new(move |$success_param| $success_body),
            on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
        })
    };
}

/// Create an `Effect::PublishEvent` operation
///
/// # Example
///
/// ```rust,ignore
/// use stagepass_core::publish_event;
///
/// publish_event! {
///     bus: env.event_bus,
///     topic: "tickets",
///     event: serialized_event,
///     on_success: || None,
///     on_error: |error| Some(TicketAction::Rejected { error: error.into() })
/// }
/// ```
#[macro_export]
macro_rules! publish_event {
    (
        bus: $bus:expr,
        topic: $topic:expr,
        event: $event:expr,
        on_success: || $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::PublishEvent($crate::effect::EventBusOperation::Publish {
            event_bus: ::std::sync::Arc::clone(&$bus),
            topic: $topic.to_string(),
            event: $event,
            on_success: ::std::boxed::Box::new(move |()| $success_body),
            on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
        })
    };
}

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust,ignore
/// use stagepass_core::async_effect;
///
/// async_effect! {
///     let asset = gateway.submit_mint(ticket_id, metadata).await;
///     Some(ReconcilerAction::MintConfirmed { ticket_id, asset })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(::std::boxed::Box::pin(async move { $($body)* }))
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use stagepass_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(300),
///     action: LedgerAction::ExpireReservation { reservation_id }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}
