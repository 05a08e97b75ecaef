//! Unified event envelope for the engine's aggregates.
//!
//! Every persisted event is one aggregate's action wrapped in
//! [`EngineEvent`], serialized with bincode inside a
//! [`SerializedEvent`]. Replay deserializes the envelope and routes the
//! inner action back through the owning reducer.

use crate::aggregates::{EntryAction, InventoryAction, ReconcilerAction, TicketAction};
use serde::{Deserialize, Serialize};
use stagepass_core::event::SerializedEvent;

/// Envelope over all aggregate events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Inventory ledger event
    Inventory(InventoryAction),
    /// Ticket lifecycle event
    Ticket(TicketAction),
    /// Entry validation event
    Entry(EntryAction),
    /// Reconciler event
    Reconciler(ReconcilerAction),
}

impl EngineEvent {
    /// The versioned event type name of the wrapped action.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Inventory(action) => action.event_type(),
            Self::Ticket(action) => action.event_type(),
            Self::Entry(action) => action.event_type(),
            Self::Reconciler(action) => action.event_type(),
        }
    }

    /// Serialize into the event-store wire format.
    ///
    /// # Errors
    ///
    /// Returns a message if bincode serialization fails.
    pub fn serialize(&self) -> Result<SerializedEvent, String> {
        let data = bincode::serialize(self).map_err(|e| e.to_string())?;
        Ok(SerializedEvent::new(
            self.event_type().to_string(),
            data,
            None,
        ))
    }

    /// Deserialize from the event-store wire format.
    ///
    /// # Errors
    ///
    /// Returns a message if bincode deserialization fails.
    pub fn deserialize(event: &SerializedEvent) -> Result<Self, String> {
        bincode::deserialize(&event.data).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::EngineError;

    #[test]
    fn envelope_roundtrip() {
        let event = EngineEvent::Inventory(InventoryAction::Rejected {
            error: EngineError::Validation("x".to_string()),
        });
        let serialized = event.serialize().unwrap();
        assert_eq!(serialized.event_type, "Rejected.v1");

        let decoded = EngineEvent::deserialize(&serialized).unwrap();
        assert!(matches!(
            decoded,
            EngineEvent::Inventory(InventoryAction::Rejected { .. })
        ));
    }
}
