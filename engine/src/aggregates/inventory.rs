//! Inventory Ledger aggregate.
//!
//! Per-type inventory counters with atomic adjustments. This aggregate is
//! CRITICAL for preventing overselling in high-concurrency scenarios (the
//! "last unit" problem): every adjustment re-derives availability as
//! `total - sold - reserved` and re-evaluates the Active/SoldOut pair.
//!
//! **Concurrency strategy**: the service layer serializes all commands
//! for one ticket type behind its stream lock; availability is checked
//! against `reserved + sold`, never `sold` alone, so a concurrent
//! request for the last unit cannot double-book.

use crate::errors::EngineError;
use crate::events::EngineEvent;
use crate::types::{
    CustomerId, InventoryState, ReservationHold, ReservationId, TicketType, TicketTypeId,
    TicketTypeStatus,
};
use chrono::{DateTime, Utc};
use stagepass_core::{
    SmallVec, append_events, delay, effect::Effect, environment::Clock, event_bus::EventBus,
    event_store::EventStore, publish_event, reducer::Reducer, smallvec, stream::StreamId,
};
use stagepass_macros::Action;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Event-bus topic for inventory events.
pub const INVENTORY_TOPIC: &str = "inventory";

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the Inventory Ledger aggregate.
#[derive(Action, Clone, Debug, Serialize, Deserialize)]
pub enum InventoryAction {
    // Commands
    /// Register a new ticket type with its capacity and pricing
    #[command]
    RegisterType {
        /// The fully configured type
        ticket_type: TicketType,
    },

    /// Hold units against a type prior to purchase completion
    #[command]
    Reserve {
        /// Reservation identifier
        reservation_id: ReservationId,
        /// Type to hold against
        ticket_type_id: TicketTypeId,
        /// Customer the hold is for
        customer_id: CustomerId,
        /// Units to hold
        quantity: u32,
        /// When the hold lapses
        expires_at: DateTime<Utc>,
    },

    /// Convert a hold into a confirmed sale
    #[command]
    CommitSale {
        /// Type the hold was taken against
        ticket_type_id: TicketTypeId,
        /// The hold to convert
        reservation_id: ReservationId,
    },

    /// Return a hold to the available pool (idempotent)
    #[command]
    ReleaseReservation {
        /// Type the hold was taken against
        ticket_type_id: TicketTypeId,
        /// The hold to release
        reservation_id: ReservationId,
    },

    /// Expire a hold whose timeout lapsed
    #[command]
    ExpireReservation {
        /// Type the hold was taken against
        ticket_type_id: TicketTypeId,
        /// The hold to expire
        reservation_id: ReservationId,
    },

    /// Return sold units to the available pool (refund/cancel rebalance)
    #[command]
    Release {
        /// Type to credit
        ticket_type_id: TicketTypeId,
        /// Units to credit back
        quantity: u32,
        /// Customer whose lifetime count is reduced, if known
        customer_id: Option<CustomerId>,
    },

    /// Manually pause, resume, or retire a type
    #[command]
    SetTypeStatus {
        /// Type to change
        ticket_type_id: TicketTypeId,
        /// Requested status (Active, Paused, or Retired)
        status: TicketTypeStatus,
    },

    /// Release every lapsed hold for a type
    #[command]
    SweepExpired {
        /// Type to sweep
        ticket_type_id: TicketTypeId,
    },

    // Events
    /// A ticket type was registered
    #[event]
    TypeRegistered {
        /// The registered type
        ticket_type: TicketType,
        /// When it was registered
        registered_at: DateTime<Utc>,
    },

    /// Units were reserved
    #[event]
    InventoryReserved {
        /// Reservation identifier
        reservation_id: ReservationId,
        /// Type held against
        ticket_type_id: TicketTypeId,
        /// Customer the hold is for
        customer_id: CustomerId,
        /// Units held
        quantity: u32,
        /// When the hold lapses
        expires_at: DateTime<Utc>,
        /// When the hold was taken
        reserved_at: DateTime<Utc>,
    },

    /// A hold was converted into a sale
    #[event]
    SaleCommitted {
        /// Reservation identifier
        reservation_id: ReservationId,
        /// Type sold against
        ticket_type_id: TicketTypeId,
        /// Purchasing customer
        customer_id: CustomerId,
        /// Units sold
        quantity: u32,
        /// When the sale was committed
        committed_at: DateTime<Utc>,
    },

    /// A hold was returned to the available pool
    #[event]
    ReservationReleased {
        /// Reservation identifier
        reservation_id: ReservationId,
        /// Type credited
        ticket_type_id: TicketTypeId,
        /// Units credited back
        quantity: u32,
        /// Whether the release was expiry-driven
        expired: bool,
        /// When it was released
        released_at: DateTime<Utc>,
    },

    /// Sold units were returned to the available pool
    #[event]
    InventoryReleased {
        /// Type credited
        ticket_type_id: TicketTypeId,
        /// Units credited back
        quantity: u32,
        /// Customer whose lifetime count was reduced, if known
        customer_id: Option<CustomerId>,
        /// When it was released
        released_at: DateTime<Utc>,
    },

    /// A type's status changed
    #[event]
    TypeStatusChanged {
        /// The type
        ticket_type_id: TicketTypeId,
        /// New status
        status: TicketTypeStatus,
        /// When it changed
        changed_at: DateTime<Utc>,
    },

    /// A command was rejected (state-only; never persisted)
    #[event]
    Rejected {
        /// Why the command was rejected
        error: EngineError,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the Inventory Ledger aggregate
#[derive(Clone)]
pub struct InventoryEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Event store for persistence
    pub event_store: Arc<dyn EventStore>,
    /// Event bus for publishing
    pub event_bus: Arc<dyn EventBus>,
    /// Stream ID for this aggregate instance
    pub stream_id: StreamId,
}

impl InventoryEnvironment {
    /// Creates a new `InventoryEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        stream_id: StreamId,
    ) -> Self {
        Self {
            clock,
            event_store,
            event_bus,
            stream_id,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the Inventory Ledger aggregate.
#[derive(Clone, Copy, Debug, Default)]
pub struct InventoryReducer;

impl InventoryReducer {
    /// Creates a new `InventoryReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Persistence + publish effects for a batch of events.
    fn create_effects(
        events: Vec<InventoryAction>,
        env: &InventoryEnvironment,
    ) -> SmallVec<[Effect<InventoryAction>; 4]> {
        let mut serialized = Vec::with_capacity(events.len());
        for event in events {
            match EngineEvent::Inventory(event).serialize() {
                Ok(s) => serialized.push(s),
                Err(error) => {
                    tracing::error!(error = %error, "failed to serialize inventory event");
                    return SmallVec::new();
                }
            }
        }

        let mut effects: SmallVec<[Effect<InventoryAction>; 4]> = smallvec![append_events! {
            store: env.event_store,
            stream: env.stream_id.as_str(),
            expected_version: None,
            events: serialized.clone(),
            on_success: |_version| None,
            on_error: |error| Some(InventoryAction::Rejected {
                error: EngineError::ExternalDependency(error.to_string())
            })
        }];
        for event in serialized {
            effects.push(publish_event! {
                bus: env.event_bus,
                topic: INVENTORY_TOPIC,
                event: event,
                on_success: || None,
                on_error: |error| Some(InventoryAction::Rejected {
                    error: EngineError::ExternalDependency(error.to_string())
                })
            });
        }
        effects
    }

    fn reject(
        state: &mut InventoryState,
        error: EngineError,
    ) -> SmallVec<[Effect<InventoryAction>; 4]> {
        Self::apply_event(state, &InventoryAction::Rejected { error });
        SmallVec::new()
    }

    /// Collects release events for every lapsed hold of a type.
    fn expire_due_holds(
        state: &InventoryState,
        ticket_type_id: &TicketTypeId,
        now: DateTime<Utc>,
    ) -> Vec<InventoryAction> {
        state
            .holds
            .values()
            .filter(|hold| hold.ticket_type_id == *ticket_type_id && hold.expires_at <= now)
            .map(|hold| InventoryAction::ReservationReleased {
                reservation_id: hold.reservation_id,
                ticket_type_id: hold.ticket_type_id,
                quantity: hold.quantity,
                expired: true,
                released_at: now,
            })
            .collect()
    }

    fn validate_register(
        state: &InventoryState,
        ticket_type: &TicketType,
    ) -> Result<(), EngineError> {
        if state.types.contains_key(&ticket_type.id) {
            return Err(EngineError::DuplicateIdentifier(ticket_type.id.to_string()));
        }
        if ticket_type.total == 0 {
            return Err(EngineError::Validation(
                "total quantity must be greater than zero".to_string(),
            ));
        }
        if ticket_type.sold != 0 || ticket_type.reserved != 0 {
            return Err(EngineError::Validation(
                "a new type must start with zero sold and reserved counts".to_string(),
            ));
        }
        if ticket_type.min_per_order == 0 || ticket_type.min_per_order > ticket_type.max_per_order
        {
            return Err(EngineError::Validation(
                "per-order bounds are inverted".to_string(),
            ));
        }
        if ticket_type.fees.platform_fee_bps > crate::types::PLATFORM_FEE_CAP_BPS {
            return Err(EngineError::Validation(
                "platform fee exceeds the cap".to_string(),
            ));
        }
        Ok(())
    }

    /// CRITICAL: the availability check behind every reservation. Runs
    /// against `total - sold - reserved` so concurrent holds count.
    fn validate_reserve(
        state: &InventoryState,
        ticket_type_id: &TicketTypeId,
        quantity: u32,
    ) -> Result<(), EngineError> {
        if quantity == 0 {
            return Err(EngineError::Validation(
                "quantity must be greater than zero".to_string(),
            ));
        }

        let Some(ticket_type) = state.get_type(ticket_type_id) else {
            return Err(EngineError::not_found("ticket type", ticket_type_id));
        };

        if ticket_type.status != TicketTypeStatus::Active {
            return Err(EngineError::InvalidTypeState {
                ticket_type: *ticket_type_id,
                status: ticket_type.status,
            });
        }

        if !ticket_type.has_capacity(quantity) {
            return Err(EngineError::InsufficientInventory {
                ticket_type: *ticket_type_id,
                requested: quantity,
                available: ticket_type.available(),
            });
        }

        Ok(())
    }

    /// Applies an event to state.
    fn apply_event(state: &mut InventoryState, action: &InventoryAction) {
        match action {
            InventoryAction::TypeRegistered { ticket_type, .. } => {
                state
                    .types
                    .insert(ticket_type.id, ticket_type.clone());
                state.last_error = None;
            }

            InventoryAction::InventoryReserved {
                reservation_id,
                ticket_type_id,
                customer_id,
                quantity,
                expires_at,
                reserved_at,
            } => {
                if let Some(ticket_type) = state.types.get_mut(ticket_type_id) {
                    ticket_type.reserved += quantity;
                    ticket_type.reevaluate_status();
                }
                state.holds.insert(
                    *reservation_id,
                    ReservationHold {
                        reservation_id: *reservation_id,
                        ticket_type_id: *ticket_type_id,
                        customer_id: *customer_id,
                        quantity: *quantity,
                        expires_at: *expires_at,
                        created_at: *reserved_at,
                    },
                );
                state.last_error = None;
            }

            InventoryAction::SaleCommitted {
                reservation_id,
                ticket_type_id,
                customer_id,
                quantity,
                ..
            } => {
                if let Some(ticket_type) = state.types.get_mut(ticket_type_id) {
                    ticket_type.reserved = ticket_type.reserved.saturating_sub(*quantity);
                    ticket_type.sold += quantity;
                    ticket_type.reevaluate_status();
                }
                *state
                    .purchases
                    .entry((*ticket_type_id, *customer_id))
                    .or_insert(0) += quantity;
                state.holds.remove(reservation_id);
                state.last_error = None;
            }

            InventoryAction::ReservationReleased {
                reservation_id,
                ticket_type_id,
                quantity,
                ..
            } => {
                if let Some(ticket_type) = state.types.get_mut(ticket_type_id) {
                    ticket_type.reserved = ticket_type.reserved.saturating_sub(*quantity);
                    ticket_type.reevaluate_status();
                }
                state.holds.remove(reservation_id);
                state.last_error = None;
            }

            InventoryAction::InventoryReleased {
                ticket_type_id,
                quantity,
                customer_id,
                ..
            } => {
                if let Some(ticket_type) = state.types.get_mut(ticket_type_id) {
                    ticket_type.sold = ticket_type.sold.saturating_sub(*quantity);
                    ticket_type.reevaluate_status();
                }
                if let Some(customer) = customer_id {
                    if let Some(count) = state.purchases.get_mut(&(*ticket_type_id, *customer)) {
                        *count = count.saturating_sub(*quantity);
                    }
                }
                state.last_error = None;
            }

            InventoryAction::TypeStatusChanged {
                ticket_type_id,
                status,
                ..
            } => {
                if let Some(ticket_type) = state.types.get_mut(ticket_type_id) {
                    ticket_type.status = *status;
                }
                state.last_error = None;
            }

            InventoryAction::Rejected { error } => {
                state.last_error = Some(error.clone());
            }

            // Commands don't modify state
            InventoryAction::RegisterType { .. }
            | InventoryAction::Reserve { .. }
            | InventoryAction::CommitSale { .. }
            | InventoryAction::ReleaseReservation { .. }
            | InventoryAction::ExpireReservation { .. }
            | InventoryAction::Release { .. }
            | InventoryAction::SetTypeStatus { .. }
            | InventoryAction::SweepExpired { .. } => {}
        }
    }
}

impl Reducer for InventoryReducer {
    type State = InventoryState;
    type Action = InventoryAction;
    type Environment = InventoryEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per ledger operation
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Commands ==========
            InventoryAction::RegisterType { ticket_type } => {
                if let Err(error) = Self::validate_register(state, &ticket_type) {
                    return Self::reject(state, error);
                }

                let event = InventoryAction::TypeRegistered {
                    ticket_type,
                    registered_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            InventoryAction::Reserve {
                reservation_id,
                ticket_type_id,
                customer_id,
                quantity,
                expires_at,
            } => {
                let now = env.clock.now();

                // Lazily release lapsed holds before judging availability
                let mut events = Self::expire_due_holds(state, &ticket_type_id, now);
                for event in &events {
                    Self::apply_event(state, event);
                }

                if let Err(error) = Self::validate_reserve(state, &ticket_type_id, quantity) {
                    tracing::warn!(
                        ticket_type = %ticket_type_id,
                        quantity,
                        error = %error,
                        "reservation rejected"
                    );
                    // Keep the lazily released holds persisted even when
                    // the reservation itself is rejected
                    let effects = if events.is_empty() {
                        SmallVec::new()
                    } else {
                        Self::create_effects(events, env)
                    };
                    Self::apply_event(state, &InventoryAction::Rejected { error });
                    return effects;
                }

                let event = InventoryAction::InventoryReserved {
                    reservation_id,
                    ticket_type_id,
                    customer_id,
                    quantity,
                    expires_at,
                    reserved_at: now,
                };
                Self::apply_event(state, &event);
                events.push(event);

                let mut effects = Self::create_effects(events, env);

                let timeout = (expires_at - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                effects.push(delay! {
                    duration: timeout,
                    action: InventoryAction::ExpireReservation {
                        ticket_type_id,
                        reservation_id,
                    }
                });
                effects
            }

            InventoryAction::CommitSale {
                ticket_type_id,
                reservation_id,
            } => {
                let Some(hold) = state.holds.get(&reservation_id).cloned() else {
                    return Self::reject(
                        state,
                        EngineError::not_found("reservation", reservation_id),
                    );
                };
                if hold.ticket_type_id != ticket_type_id {
                    return Self::reject(
                        state,
                        EngineError::TypeMismatch {
                            detail: format!(
                                "reservation {reservation_id} belongs to type {}",
                                hold.ticket_type_id
                            ),
                        },
                    );
                }

                let event = InventoryAction::SaleCommitted {
                    reservation_id,
                    ticket_type_id,
                    customer_id: hold.customer_id,
                    quantity: hold.quantity,
                    committed_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            InventoryAction::ReleaseReservation {
                ticket_type_id,
                reservation_id,
            }
            | InventoryAction::ExpireReservation {
                ticket_type_id,
                reservation_id,
            } => {
                // Idempotent: an unknown (already released) hold is a no-op,
                // so a double release can never double-credit availability
                let Some(hold) = state.holds.get(&reservation_id).cloned() else {
                    return SmallVec::new();
                };
                if hold.ticket_type_id != ticket_type_id {
                    return SmallVec::new();
                }

                let event = InventoryAction::ReservationReleased {
                    reservation_id,
                    ticket_type_id,
                    quantity: hold.quantity,
                    expired: env.clock.now() >= hold.expires_at,
                    released_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            InventoryAction::Release {
                ticket_type_id,
                quantity,
                customer_id,
            } => {
                let Some(ticket_type) = state.get_type(&ticket_type_id) else {
                    return Self::reject(
                        state,
                        EngineError::not_found("ticket type", ticket_type_id),
                    );
                };
                if quantity == 0 || quantity > ticket_type.sold {
                    return Self::reject(
                        state,
                        EngineError::Validation(format!(
                            "cannot release {quantity} of {} sold units",
                            ticket_type.sold
                        )),
                    );
                }

                let event = InventoryAction::InventoryReleased {
                    ticket_type_id,
                    quantity,
                    customer_id,
                    released_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            InventoryAction::SetTypeStatus {
                ticket_type_id,
                status,
            } => {
                let Some(ticket_type) = state.get_type(&ticket_type_id) else {
                    return Self::reject(
                        state,
                        EngineError::not_found("ticket type", ticket_type_id),
                    );
                };
                if ticket_type.status == TicketTypeStatus::Retired {
                    return Self::reject(
                        state,
                        EngineError::InvalidTypeState {
                            ticket_type: ticket_type_id,
                            status: TicketTypeStatus::Retired,
                        },
                    );
                }
                if status == TicketTypeStatus::SoldOut {
                    return Self::reject(
                        state,
                        EngineError::Validation(
                            "sold-out is derived from counters, not set manually".to_string(),
                        ),
                    );
                }

                let event = InventoryAction::TypeStatusChanged {
                    ticket_type_id,
                    status,
                    changed_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            InventoryAction::SweepExpired { ticket_type_id } => {
                let events = Self::expire_due_holds(state, &ticket_type_id, env.clock.now());
                if events.is_empty() {
                    return SmallVec::new();
                }
                for event in &events {
                    Self::apply_event(state, event);
                }
                Self::create_effects(events, env)
            }

            // ========== Events (from event store replay) ==========
            event => {
                Self::apply_event(state, &event);
                SmallVec::new()
            }
        }
    }
}
