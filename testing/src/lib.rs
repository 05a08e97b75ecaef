//! # Stagepass Testing
//!
//! Testing utilities for the Stagepass engine:
//!
//! - [`ReducerTest`]: fluent Given-When-Then harness for reducers
//! - [`mocks`]: in-memory event store and bus, fixed clock
//!
//! ## Example
//!
//! ```ignore
//! use stagepass_testing::{ReducerTest, mocks::FixedClock};
//!
//! ReducerTest::new(LedgerReducer::new())
//!     .with_env(test_environment())
//!     .given_state(LedgerState::new())
//!     .when_action(LedgerAction::Reserve { .. })
//!     .then_state(|state| assert_eq!(state.holds.len(), 1))
//!     .run();
//! ```

pub mod mocks;
mod reducer_test;

pub use reducer_test::{ReducerTest, assertions};
