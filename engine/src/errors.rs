//! Error taxonomy for the engine.
//!
//! Every operation returns a structured failure, never a bare boolean.
//! [`EngineError`] carries enough detail to render a precise message;
//! [`ErrorKind`] maps each variant onto the coarse taxonomy callers
//! branch on (validation, eligibility, conflict, not-found, external
//! dependency, consistency).

use crate::pricing::RuleCode;
use crate::types::{TicketStatus, TicketTypeId, TicketTypeStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or out-of-range input
    Validation,
    /// Business-rule rejection with failed rule codes
    Eligibility,
    /// Inventory exhausted, duplicate identifier, or invalid state
    /// transition
    Conflict,
    /// Referenced entity does not exist
    NotFound,
    /// A collaborator was unavailable or timed out
    ExternalDependency,
    /// Reconciler-detected drift between local and external records
    Consistency,
}

/// Structured engine failure.
///
/// Rule violations and conflicts are returned to the immediate caller
/// and never retried automatically; lock contention surfaces here as a
/// conflict rather than a silent retry loop.
#[derive(Error, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EngineError {
    /// Malformed or out-of-range input
    #[error("validation failed: {0}")]
    Validation(String),

    /// One or more eligibility rules rejected the purchase
    #[error("eligibility check failed ({} rule(s))", rules.len())]
    Eligibility {
        /// Every failed rule, collected without short-circuiting
        rules: Vec<RuleCode>,
    },

    /// A decrement would make a counter negative or break the sum
    /// invariant
    #[error("insufficient inventory for type {ticket_type}: requested {requested}, available {available}")]
    InsufficientInventory {
        /// The contended ticket type
        ticket_type: TicketTypeId,
        /// Units requested
        requested: u32,
        /// Units actually available
        available: u32,
    },

    /// The ticket type is not in a sellable state
    #[error("ticket type {ticket_type} is {status}, expected active")]
    InvalidTypeState {
        /// The ticket type
        ticket_type: TicketTypeId,
        /// Its current status
        status: TicketTypeStatus,
    },

    /// Identifier generation collided
    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    /// Requested transition is outside the valid-transition table
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: TicketStatus,
        /// Requested status
        to: TicketStatus,
    },

    /// The ticket type does not belong to the expected event scope
    #[error("type mismatch: {detail}")]
    TypeMismatch {
        /// What was out of scope
        detail: String,
    },

    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("ticket", "ticket type", "transfer", ...)
        entity: String,
        /// The missing identifier
        id: String,
    },

    /// A stream lock could not be acquired within the bounded wait
    #[error("lock contention on {0}")]
    LockContention(String),

    /// A collaborator was unavailable or timed out
    #[error("external dependency failed: {0}")]
    ExternalDependency(String),

    /// Reconciler-detected drift
    #[error("consistency drift: {0}")]
    Consistency(String),
}

impl EngineError {
    /// The coarse taxonomy bucket this failure belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Eligibility { .. } => ErrorKind::Eligibility,
            Self::InsufficientInventory { .. }
            | Self::InvalidTypeState { .. }
            | Self::DuplicateIdentifier(_)
            | Self::InvalidTransition { .. }
            | Self::TypeMismatch { .. }
            | Self::LockContention(_) => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ExternalDependency(_) => ErrorKind::ExternalDependency,
            Self::Consistency(_) => ErrorKind::Consistency,
        }
    }

    /// Convenience constructor for not-found failures.
    #[must_use]
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_taxonomy() {
        assert_eq!(
            EngineError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            EngineError::InsufficientInventory {
                ticket_type: TicketTypeId::new(),
                requested: 2,
                available: 1,
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            EngineError::InvalidTransition {
                from: TicketStatus::Used,
                to: TicketStatus::Sold,
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            EngineError::not_found("ticket", "abc").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            EngineError::LockContention("tickets-1".into()).kind(),
            ErrorKind::Conflict
        );
    }
}
