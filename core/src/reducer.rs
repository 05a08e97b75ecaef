//! The core trait for business logic.
//!
//! Reducers are pure functions: `(State, Action, Environment) → Effects`.
//! They contain all business logic and are deterministic and testable;
//! the only way they touch the outside world is by returning [`Effect`]
//! descriptions for the runtime to execute.

use crate::effect::Effect;
use smallvec::SmallVec;

/// The Reducer trait: core abstraction for aggregate business logic.
///
/// # Type Parameters
///
/// - `State`: the domain state this reducer operates on
/// - `Action`: the action type this reducer processes (commands and events)
/// - `Environment`: the injected dependencies this reducer needs
///
/// # Example
///
/// ```ignore
/// impl Reducer for LedgerReducer {
///     type State = LedgerState;
///     type Action = LedgerAction;
///     type Environment = LedgerEnvironment;
///
///     fn reduce(
///         &self,
///         state: &mut LedgerState,
///         action: LedgerAction,
///         env: &LedgerEnvironment,
///     ) -> SmallVec<[Effect<LedgerAction>; 4]> {
///         match action {
///             LedgerAction::Reserve { .. } => {
///                 // validate, apply event, describe persistence effects
///                 smallvec![]
///             }
///             _ => smallvec![],
///         }
///     }
/// }
/// ```
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The environment type with injected dependencies
    type Environment;

    /// Reduce an action into state changes and effects.
    ///
    /// This is a pure function that:
    /// 1. Validates the action
    /// 2. Updates state in place
    /// 3. Returns effect descriptions to be executed
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]>;
}
