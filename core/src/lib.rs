//! # Stagepass Core
//!
//! Core traits and types for the Stagepass ticket inventory and lifecycle
//! engine.
//!
//! This crate provides the fundamental abstractions for building the
//! event-driven aggregates the engine is composed of:
//!
//! - **State**: domain state for an aggregate
//! - **Action**: all possible inputs to a reducer (commands and events)
//! - **Reducer**: pure function `(State, Action, Environment) → Effects`
//! - **Effect**: side-effect descriptions (not execution)
//! - **Environment**: injected dependencies via traits
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell
//! - Unidirectional data flow
//! - Explicit effects (no hidden I/O)
//! - Dependency injection via environment
//!
//! Events are the source of truth: aggregates rebuild state by replaying
//! their event stream, and every mutation is an event appended through an
//! [`event_store::EventStore`] and published on an [`event_bus::EventBus`].

pub mod effect;
mod effect_macros;
pub mod environment;
pub mod event;
pub mod event_bus;
pub mod event_store;
pub mod executor;
pub mod reducer;
pub mod stream;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};
