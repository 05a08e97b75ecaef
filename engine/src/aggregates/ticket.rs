//! Ticket aggregate: issuance and the ownership/transfer state machine.
//!
//! Issuance assigns each ticket a per-(event, type) sequential number, a
//! time-salted barcode, and a tamper-detection hash, and opens the first
//! entry of the append-only ownership chain, all in one reduction, so
//! the ticket row and its ownership record are atomic.
//!
//! Transfers run through a request lifecycle: policy checks up front,
//! optional approval, and a completion step that reassigns the owner,
//! bumps the transfer counter, flips the status to `Transferred`, closes
//! the prior ownership interval, and opens the next, strictly in that
//! order, within one reduction.

use crate::errors::EngineError;
use crate::events::EngineEvent;
use crate::types::{
    AcquisitionKind, CustomerId, EventId, Money, OwnershipRecord, SeatAttributes, Ticket,
    TicketId, TicketState, TicketStatus, TicketTypeId, TransferId, TransferKind, TransferRequest,
    TransferRequestStatus, ValidityWindow,
};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use stagepass_core::{
    SmallVec, append_events, delay, effect::Effect, environment::Clock, event_bus::EventBus,
    event_store::EventStore, publish_event, reducer::Reducer, smallvec, stream::StreamId,
};
use stagepass_macros::Action;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Event-bus topic for ticket lifecycle events.
pub const TICKETS_TOPIC: &str = "tickets";

/// Issuance retries before giving up on a barcode collision.
const BARCODE_ATTEMPTS: u32 = 5;

// ============================================================================
// Issuance input
// ============================================================================

/// Everything issuance needs to mint one ticket record.
///
/// Inventory must already be decremented for this unit; the service
/// layer enforces that precondition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssueSpec {
    /// Type being issued against
    pub ticket_type_id: TicketTypeId,
    /// Event the ticket admits to
    pub event_id: EventId,
    /// Initial owner
    pub owner: CustomerId,
    /// Original purchaser
    pub purchaser: CustomerId,
    /// Base price paid
    pub price_paid: Money,
    /// Fees paid
    pub fees_paid: Money,
    /// Seat attributes, if assigned seating
    pub seat: Option<SeatAttributes>,
    /// Validity and entry windows
    pub validity: ValidityWindow,
    /// Latest refund time, if refunds are allowed
    pub refund_deadline: Option<DateTime<Utc>>,
    /// Transfer policy snapshot from the type
    pub transferable: bool,
    /// Maximum completed transfers
    pub max_transfers: u32,
    /// Resale price ceiling in basis points of the purchase price
    pub resale_price_cap_bps: u16,
    /// How the first owner acquired the ticket
    pub acquisition: AcquisitionKind,
    /// Source transaction reference
    pub source_ref: Option<String>,
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the Ticket aggregate.
#[derive(Action, Clone, Debug, Serialize, Deserialize)]
pub enum TicketAction {
    // Commands
    /// Issue one ticket (inventory already decremented for this unit)
    #[command]
    IssueTicket {
        /// Issuance input
        spec: IssueSpec,
    },

    /// Start an ownership transfer
    #[command]
    InitiateTransfer {
        /// Ticket to transfer
        ticket_id: TicketId,
        /// Current owner giving up the ticket
        from: CustomerId,
        /// Receiving customer
        to: CustomerId,
        /// Resale or gift
        kind: TransferKind,
        /// Agreed price for resales
        price: Option<Money>,
    },

    /// Approve a pending transfer; re-runs the completion logic
    #[command]
    ApproveTransfer {
        /// Request to approve
        transfer_id: TransferId,
        /// Approving actor
        approver: String,
    },

    /// Reject a pending transfer; the ticket is untouched
    #[command]
    RejectTransfer {
        /// Request to reject
        transfer_id: TransferId,
        /// Why it was rejected
        reason: String,
    },

    /// Withdraw a pending transfer
    #[command]
    CancelTransfer {
        /// Request to cancel
        transfer_id: TransferId,
    },

    /// Expire a pending transfer whose deadline lapsed
    #[command]
    ExpireTransfer {
        /// Event scope, for feedback routing
        event_id: EventId,
        /// Request to expire
        transfer_id: TransferId,
    },

    /// Expire every lapsed pending transfer
    #[command]
    SweepExpiredTransfers,

    /// Apply the terminal used transition after entry
    #[command]
    MarkUsed {
        /// Consumed ticket
        ticket_id: TicketId,
    },

    /// Refund a ticket within its refund window
    #[command]
    Refund {
        /// Ticket to refund
        ticket_id: TicketId,
    },

    /// Cancel a ticket (organizer action)
    #[command]
    CancelTicket {
        /// Ticket to cancel
        ticket_id: TicketId,
    },

    /// Administratively void a ticket
    #[command]
    VoidTicket {
        /// Ticket to void
        ticket_id: TicketId,
    },

    /// Record an admitted scan against the ticket's counters
    #[command]
    RecordScan {
        /// Scanned ticket
        ticket_id: TicketId,
        /// Scan time
        at: DateTime<Utc>,
    },

    /// Bind the external NFT asset id once the mint is confirmed
    #[command]
    RecordMintAsset {
        /// Minted ticket
        ticket_id: TicketId,
        /// External asset identifier
        asset_id: String,
    },

    // Events
    /// A ticket was issued with its initial ownership record
    #[event]
    TicketIssued {
        /// The issued ticket
        ticket: Ticket,
        /// Its first ownership record
        record: OwnershipRecord,
    },

    /// A transfer request was created
    #[event]
    TransferRequested {
        /// The request as created
        request: TransferRequest,
    },

    /// A transfer completed: owner reassigned, chain extended
    #[event]
    TransferCompleted {
        /// The request
        transfer_id: TransferId,
        /// The ticket
        ticket_id: TicketId,
        /// Previous owner
        from: CustomerId,
        /// New owner
        to: CustomerId,
        /// Price paid, for the ownership record
        price: Option<Money>,
        /// Completion time
        completed_at: DateTime<Utc>,
    },

    /// A pending transfer was rejected
    #[event]
    TransferRejected {
        /// The request
        transfer_id: TransferId,
        /// Why
        reason: String,
        /// When
        rejected_at: DateTime<Utc>,
    },

    /// A pending transfer was withdrawn
    #[event]
    TransferCancelled {
        /// The request
        transfer_id: TransferId,
        /// When
        cancelled_at: DateTime<Utc>,
    },

    /// A pending transfer lapsed
    #[event]
    TransferExpired {
        /// The request
        transfer_id: TransferId,
        /// When
        expired_at: DateTime<Utc>,
    },

    /// A ticket moved through the status table
    #[event]
    StatusChanged {
        /// The ticket
        ticket_id: TicketId,
        /// Status before
        from: TicketStatus,
        /// Status after
        to: TicketStatus,
        /// When
        changed_at: DateTime<Utc>,
    },

    /// An admitted scan was counted
    #[event]
    ScanCounted {
        /// The ticket
        ticket_id: TicketId,
        /// Scan time
        at: DateTime<Utc>,
    },

    /// The external asset id was bound
    #[event]
    MintAssetRecorded {
        /// The ticket
        ticket_id: TicketId,
        /// External asset identifier
        asset_id: String,
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

/// Transfer policy enforced by the state machine.
#[derive(Clone, Debug)]
pub struct TransferPolicy {
    /// Whether resales need explicit approval before completing
    pub approval_required_for_resale: bool,
    /// How long a pending request stays open
    pub request_ttl: Duration,
    /// Transfers must complete this long before the event starts
    pub deadline_before_event: Duration,
    /// Flat transfer fee, recorded for audit purposes
    pub transfer_fee: Money,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            approval_required_for_resale: false,
            request_ttl: Duration::hours(48),
            deadline_before_event: Duration::zero(),
            transfer_fee: Money::ZERO,
        }
    }
}

/// Environment dependencies for the Ticket aggregate
#[derive(Clone)]
pub struct TicketEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Event store for persistence
    pub event_store: Arc<dyn EventStore>,
    /// Event bus for publishing
    pub event_bus: Arc<dyn EventBus>,
    /// Stream ID for this aggregate instance
    pub stream_id: StreamId,
    /// Transfer policy
    pub policy: TransferPolicy,
}

impl TicketEnvironment {
    /// Creates a new `TicketEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        stream_id: StreamId,
        policy: TransferPolicy,
    ) -> Self {
        Self {
            clock,
            event_store,
            event_bus,
            stream_id,
            policy,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the Ticket aggregate.
#[derive(Clone, Copy, Debug, Default)]
pub struct TicketReducer;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl TicketReducer {
    /// Creates a new `TicketReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn create_effects(
        events: Vec<TicketAction>,
        env: &TicketEnvironment,
    ) -> SmallVec<[Effect<TicketAction>; 4]> {
        let mut serialized = Vec::with_capacity(events.len());
        for event in events {
            match EngineEvent::Ticket(event).serialize() {
                Ok(s) => serialized.push(s),
                Err(error) => {
                    tracing::error!(error = %error, "failed to serialize ticket event");
                    return SmallVec::new();
                }
            }
        }

        let mut effects: SmallVec<[Effect<TicketAction>; 4]> = smallvec![append_events! {
            store: env.event_store,
            stream: env.stream_id.as_str(),
            expected_version: None,
            events: serialized.clone(),
            on_success: |_version| None,
            on_error: |error| Some(TicketAction::Rejected {
                error: EngineError::ExternalDependency(error.to_string())
            })
        }];
        for event in serialized {
            effects.push(publish_event! {
                bus: env.event_bus,
                topic: TICKETS_TOPIC,
                event: event,
                on_success: || None,
                on_error: |error| Some(TicketAction::Rejected {
                    error: EngineError::ExternalDependency(error.to_string())
                })
            });
        }
        effects
    }

    fn reject(state: &mut TicketState, error: EngineError) -> SmallVec<[Effect<TicketAction>; 4]> {
        Self::apply_event(state, &TicketAction::Rejected { error });
        SmallVec::new()
    }

    /// Checks the transition table and builds the status-change event.
    fn transition(
        state: &TicketState,
        ticket_id: TicketId,
        to: TicketStatus,
        now: DateTime<Utc>,
    ) -> Result<TicketAction, EngineError> {
        let Some(ticket) = state.get(&ticket_id) else {
            return Err(EngineError::not_found("ticket", ticket_id));
        };
        if !ticket.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: ticket.status,
                to,
            });
        }
        Ok(TicketAction::StatusChanged {
            ticket_id,
            from: ticket.status,
            to,
            changed_at: now,
        })
    }

    /// Generates a barcode no other ticket in this stream uses.
    ///
    /// The barcode is a salted digest of the ticket identity; a collision
    /// retries with a fresh salt and eventually surfaces as
    /// `DuplicateIdentifier`.
    fn generate_barcode(
        state: &TicketState,
        ticket_id: TicketId,
        issued_at: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        for _ in 0..BARCODE_ATTEMPTS {
            let salt: u64 = rand::random();
            let mut hasher = Sha256::new();
            hasher.update(ticket_id.to_string().as_bytes());
            hasher.update(issued_at.timestamp_millis().to_le_bytes());
            hasher.update(salt.to_le_bytes());
            let barcode = hex(hasher.finalize().as_slice());
            if !state.barcodes.contains(&barcode) {
                return Ok(barcode);
            }
        }
        Err(EngineError::DuplicateIdentifier(format!(
            "barcode generation for ticket {ticket_id}"
        )))
    }

    /// Tamper-detection hash over (id, number, barcode).
    fn verification_hash(ticket_id: TicketId, number: &str, barcode: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(ticket_id.to_string().as_bytes());
        hasher.update(number.as_bytes());
        hasher.update(barcode.as_bytes());
        hex(hasher.finalize().as_slice())
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_initiate_transfer(
        state: &TicketState,
        policy: &TransferPolicy,
        ticket_id: TicketId,
        from: CustomerId,
        to: CustomerId,
        kind: TransferKind,
        price: Option<Money>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if from == to {
            return Err(EngineError::Validation(
                "cannot transfer a ticket to its current owner".to_string(),
            ));
        }

        let Some(ticket) = state.get(&ticket_id) else {
            return Err(EngineError::not_found("ticket", ticket_id));
        };

        if ticket.owner != from {
            return Err(EngineError::Validation(format!(
                "{from} does not own ticket {ticket_id}"
            )));
        }
        if !ticket.status.can_transition_to(TicketStatus::Transferred) {
            return Err(EngineError::InvalidTransition {
                from: ticket.status,
                to: TicketStatus::Transferred,
            });
        }
        if !ticket.transferable {
            return Err(EngineError::Validation(
                "ticket is not transferable".to_string(),
            ));
        }
        if ticket.transfer_count >= ticket.max_transfers {
            return Err(EngineError::Validation(format!(
                "transfer limit of {} reached",
                ticket.max_transfers
            )));
        }
        if now > ticket.validity.event_starts_at - policy.deadline_before_event {
            return Err(EngineError::Validation(
                "transfer deadline has passed".to_string(),
            ));
        }
        if kind == TransferKind::Resale {
            let cap = ticket.price_paid.scale_bps(ticket.resale_price_cap_bps);
            if price.is_some_and(|p| p > cap) {
                return Err(EngineError::Validation(format!(
                    "resale price exceeds the {cap} cap"
                )));
            }
        }
        if state.pending_transfer_for(&ticket_id).is_some() {
            return Err(EngineError::Validation(format!(
                "a transfer is already pending for ticket {ticket_id}"
            )));
        }

        Ok(())
    }

    /// Applies an event to state.
    #[allow(clippy::too_many_lines)] // One arm per lifecycle event
    fn apply_event(state: &mut TicketState, action: &TicketAction) {
        match action {
            TicketAction::TicketIssued { ticket, record } => {
                let entry = state
                    .sequences
                    .entry((ticket.event_id, ticket.ticket_type_id))
                    .or_insert(0);
                *entry = (*entry).max(sequence_of(&ticket.number).unwrap_or(*entry + 1));
                state.barcodes.insert(ticket.barcode.clone());
                state
                    .ownership
                    .entry(ticket.id)
                    .or_default()
                    .push(record.clone());
                state.last_issued = Some(ticket.id);
                state.tickets.insert(ticket.id, ticket.clone());
                state.last_error = None;
            }

            TicketAction::TransferRequested { request } => {
                state.transfers.insert(request.id, request.clone());
                state.last_transfer = Some(request.id);
                state.last_error = None;
            }

            TicketAction::TransferCompleted {
                transfer_id,
                ticket_id,
                from,
                to,
                price,
                completed_at,
            } => {
                if let Some(request) = state.transfers.get_mut(transfer_id) {
                    request.status = TransferRequestStatus::Completed;
                }

                // Close the old interval before opening the new one
                if let Some(chain) = state.ownership.get_mut(ticket_id) {
                    if let Some(current) = chain.iter_mut().find(|r| r.is_current_owner) {
                        current.owned_until = Some(*completed_at);
                        current.is_current_owner = false;
                    }
                    chain.push(OwnershipRecord {
                        ticket_id: *ticket_id,
                        owner: *to,
                        acquisition: AcquisitionKind::Transfer,
                        owned_from: *completed_at,
                        owned_until: None,
                        price_paid: *price,
                        source_ref: Some(transfer_id.to_string()),
                        is_current_owner: true,
                    });
                }

                if let Some(ticket) = state.tickets.get_mut(ticket_id) {
                    debug_assert_eq!(ticket.owner, *from);
                    ticket.owner = *to;
                    ticket.transfer_count += 1;
                    ticket.status = TicketStatus::Transferred;
                }

                state.last_transfer = Some(*transfer_id);
                state.last_error = None;
            }

            TicketAction::TransferRejected { transfer_id, .. } => {
                if let Some(request) = state.transfers.get_mut(transfer_id) {
                    request.status = TransferRequestStatus::Rejected;
                }
                state.last_transfer = Some(*transfer_id);
                state.last_error = None;
            }

            TicketAction::TransferCancelled { transfer_id, .. } => {
                if let Some(request) = state.transfers.get_mut(transfer_id) {
                    request.status = TransferRequestStatus::Cancelled;
                }
                state.last_transfer = Some(*transfer_id);
                state.last_error = None;
            }

            TicketAction::TransferExpired { transfer_id, .. } => {
                if let Some(request) = state.transfers.get_mut(transfer_id) {
                    request.status = TransferRequestStatus::Expired;
                }
                state.last_error = None;
            }

            TicketAction::StatusChanged { ticket_id, to, .. } => {
                if let Some(ticket) = state.tickets.get_mut(ticket_id) {
                    ticket.status = *to;
                }
                state.last_error = None;
            }

            TicketAction::ScanCounted { ticket_id, at } => {
                if let Some(ticket) = state.tickets.get_mut(ticket_id) {
                    ticket.scan_count += 1;
                    if ticket.first_scanned_at.is_none() {
                        ticket.first_scanned_at = Some(*at);
                    }
                    ticket.last_scanned_at = Some(*at);
                }
                state.last_error = None;
            }

            TicketAction::MintAssetRecorded {
                ticket_id,
                asset_id,
            } => {
                if let Some(ticket) = state.tickets.get_mut(ticket_id) {
                    ticket.nft_asset = Some(asset_id.clone());
                }
                state.last_error = None;
            }

            TicketAction::Rejected { error } => {
                state.last_error = Some(error.clone());
            }

            // Commands don't modify state
            TicketAction::IssueTicket { .. }
            | TicketAction::InitiateTransfer { .. }
            | TicketAction::ApproveTransfer { .. }
            | TicketAction::RejectTransfer { .. }
            | TicketAction::CancelTransfer { .. }
            | TicketAction::ExpireTransfer { .. }
            | TicketAction::SweepExpiredTransfers
            | TicketAction::MarkUsed { .. }
            | TicketAction::Refund { .. }
            | TicketAction::CancelTicket { .. }
            | TicketAction::VoidTicket { .. }
            | TicketAction::RecordScan { .. }
            | TicketAction::RecordMintAsset { .. } => {}
        }
    }

    /// Builds the completion event after validating the receiving side
    /// still holds: owner unchanged, table transition legal.
    fn complete_transfer(
        state: &TicketState,
        request: &TransferRequest,
        now: DateTime<Utc>,
    ) -> Result<TicketAction, EngineError> {
        let Some(ticket) = state.get(&request.ticket_id) else {
            return Err(EngineError::not_found("ticket", request.ticket_id));
        };
        if ticket.owner != request.from {
            return Err(EngineError::Validation(format!(
                "ticket {} changed hands while the transfer was pending",
                request.ticket_id
            )));
        }
        if !ticket.status.can_transition_to(TicketStatus::Transferred) {
            return Err(EngineError::InvalidTransition {
                from: ticket.status,
                to: TicketStatus::Transferred,
            });
        }

        Ok(TicketAction::TransferCompleted {
            transfer_id: request.id,
            ticket_id: request.ticket_id,
            from: request.from,
            to: request.to,
            price: request.price,
            completed_at: now,
        })
    }
}

/// Parses the sequential part back out of a ticket number.
fn sequence_of(number: &str) -> Option<u32> {
    number.rsplit('-').next()?.parse().ok()
}

impl Reducer for TicketReducer {
    type State = TicketState;
    type Action = TicketAction;
    type Environment = TicketEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per lifecycle operation
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Commands ==========
            TicketAction::IssueTicket { spec } => {
                let now = env.clock.now();
                let ticket_id = TicketId::new();

                let sequence = state
                    .sequences
                    .get(&(spec.event_id, spec.ticket_type_id))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                let number = format!(
                    "{}-{}-{sequence:06}",
                    spec.event_id.short(),
                    spec.ticket_type_id.short()
                );

                let barcode = match Self::generate_barcode(state, ticket_id, now) {
                    Ok(barcode) => barcode,
                    Err(error) => return Self::reject(state, error),
                };
                let verification_hash = Self::verification_hash(ticket_id, &number, &barcode);

                let ticket = Ticket {
                    id: ticket_id,
                    ticket_type_id: spec.ticket_type_id,
                    event_id: spec.event_id,
                    owner: spec.owner,
                    original_purchaser: spec.purchaser,
                    number,
                    barcode,
                    verification_hash,
                    seat: spec.seat,
                    price_paid: spec.price_paid,
                    fees_paid: spec.fees_paid,
                    status: TicketStatus::Sold,
                    validity: spec.validity,
                    refund_deadline: spec.refund_deadline,
                    scan_count: 0,
                    first_scanned_at: None,
                    last_scanned_at: None,
                    transfer_count: 0,
                    transferable: spec.transferable,
                    max_transfers: spec.max_transfers,
                    resale_price_cap_bps: spec.resale_price_cap_bps,
                    nft_asset: None,
                    issued_at: now,
                };
                let record = OwnershipRecord {
                    ticket_id,
                    owner: spec.owner,
                    acquisition: spec.acquisition,
                    owned_from: now,
                    owned_until: None,
                    price_paid: Some(spec.price_paid),
                    source_ref: spec.source_ref,
                    is_current_owner: true,
                };

                let event = TicketAction::TicketIssued { ticket, record };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            TicketAction::InitiateTransfer {
                ticket_id,
                from,
                to,
                kind,
                price,
            } => {
                let now = env.clock.now();
                if let Err(error) = Self::validate_initiate_transfer(
                    state, &env.policy, ticket_id, from, to, kind, price, now,
                ) {
                    tracing::warn!(ticket = %ticket_id, error = %error, "transfer rejected");
                    return Self::reject(state, error);
                }

                let requires_approval =
                    kind == TransferKind::Resale && env.policy.approval_required_for_resale;
                let request = TransferRequest {
                    id: TransferId::new(),
                    ticket_id,
                    from,
                    to,
                    initiated_by: from,
                    kind,
                    price,
                    requires_approval,
                    status: TransferRequestStatus::Pending,
                    created_at: now,
                    expires_at: now + env.policy.request_ttl,
                };

                tracing::info!(
                    ticket = %ticket_id,
                    transfer = %request.id,
                    requires_approval,
                    fee = %env.policy.transfer_fee,
                    "transfer initiated"
                );

                if requires_approval {
                    // Stop here; approval re-runs the completion logic
                    let event_id = state.get(&ticket_id).map(|t| t.event_id);
                    let transfer_id = request.id;
                    let ttl = env
                        .policy
                        .request_ttl
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO);
                    let event = TicketAction::TransferRequested { request };
                    Self::apply_event(state, &event);
                    let mut effects = Self::create_effects(vec![event], env);
                    if let Some(event_id) = event_id {
                        effects.push(delay! {
                            duration: ttl,
                            action: TicketAction::ExpireTransfer { event_id, transfer_id }
                        });
                    }
                    return effects;
                }

                // Synchronous completion within one reduction
                let requested = TicketAction::TransferRequested {
                    request: request.clone(),
                };
                Self::apply_event(state, &requested);
                match Self::complete_transfer(state, &request, now) {
                    Ok(completed) => {
                        Self::apply_event(state, &completed);
                        Self::create_effects(vec![requested, completed], env)
                    }
                    Err(error) => Self::reject(state, error),
                }
            }

            TicketAction::ApproveTransfer {
                transfer_id,
                approver,
            } => {
                let now = env.clock.now();
                let Some(request) = state.transfers.get(&transfer_id).cloned() else {
                    return Self::reject(state, EngineError::not_found("transfer", transfer_id));
                };
                if request.status != TransferRequestStatus::Pending {
                    return Self::reject(
                        state,
                        EngineError::Validation(format!(
                            "transfer {transfer_id} is not pending"
                        )),
                    );
                }
                if now >= request.expires_at {
                    // Lazy expiry on access
                    let event = TicketAction::TransferExpired {
                        transfer_id,
                        expired_at: now,
                    };
                    Self::apply_event(state, &event);
                    let effects = Self::create_effects(vec![event], env);
                    Self::apply_event(
                        state,
                        &TicketAction::Rejected {
                            error: EngineError::Validation(format!(
                                "transfer {transfer_id} expired"
                            )),
                        },
                    );
                    return effects;
                }

                tracing::info!(transfer = %transfer_id, approver = %approver, "transfer approved");

                match Self::complete_transfer(state, &request, now) {
                    Ok(completed) => {
                        Self::apply_event(state, &completed);
                        Self::create_effects(vec![completed], env)
                    }
                    Err(error) => {
                        // The ticket moved on; close the request instead of
                        // leaving it approvable forever
                        let event = TicketAction::TransferRejected {
                            transfer_id,
                            reason: error.to_string(),
                            rejected_at: now,
                        };
                        Self::apply_event(state, &event);
                        let effects = Self::create_effects(vec![event], env);
                        Self::apply_event(state, &TicketAction::Rejected { error });
                        effects
                    }
                }
            }

            TicketAction::RejectTransfer {
                transfer_id,
                reason,
            } => {
                let Some(request) = state.transfers.get(&transfer_id) else {
                    return Self::reject(state, EngineError::not_found("transfer", transfer_id));
                };
                if request.status != TransferRequestStatus::Pending {
                    return Self::reject(
                        state,
                        EngineError::Validation(format!(
                            "transfer {transfer_id} is not pending"
                        )),
                    );
                }

                let event = TicketAction::TransferRejected {
                    transfer_id,
                    reason,
                    rejected_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            TicketAction::CancelTransfer { transfer_id } => {
                let Some(request) = state.transfers.get(&transfer_id) else {
                    return Self::reject(state, EngineError::not_found("transfer", transfer_id));
                };
                if request.status != TransferRequestStatus::Pending {
                    return Self::reject(
                        state,
                        EngineError::Validation(format!(
                            "transfer {transfer_id} is not pending"
                        )),
                    );
                }

                let event = TicketAction::TransferCancelled {
                    transfer_id,
                    cancelled_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            TicketAction::ExpireTransfer { transfer_id, .. } => {
                let now = env.clock.now();
                let due = state
                    .transfers
                    .get(&transfer_id)
                    .is_some_and(|r| {
                        r.status == TransferRequestStatus::Pending && now >= r.expires_at
                    });
                if !due {
                    return SmallVec::new();
                }

                let event = TicketAction::TransferExpired {
                    transfer_id,
                    expired_at: now,
                };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            TicketAction::SweepExpiredTransfers => {
                let now = env.clock.now();
                let events: Vec<TicketAction> = state
                    .transfers
                    .values()
                    .filter(|r| r.status == TransferRequestStatus::Pending && now >= r.expires_at)
                    .map(|r| TicketAction::TransferExpired {
                        transfer_id: r.id,
                        expired_at: now,
                    })
                    .collect();
                if events.is_empty() {
                    return SmallVec::new();
                }
                for event in &events {
                    Self::apply_event(state, event);
                }
                Self::create_effects(events, env)
            }

            TicketAction::MarkUsed { ticket_id } => {
                match Self::transition(state, ticket_id, TicketStatus::Used, env.clock.now()) {
                    Ok(event) => {
                        Self::apply_event(state, &event);
                        Self::create_effects(vec![event], env)
                    }
                    Err(error) => Self::reject(state, error),
                }
            }

            TicketAction::Refund { ticket_id } => {
                let now = env.clock.now();
                let Some(ticket) = state.get(&ticket_id) else {
                    return Self::reject(state, EngineError::not_found("ticket", ticket_id));
                };
                match ticket.refund_deadline {
                    Some(deadline) if now <= deadline => {}
                    Some(_) => {
                        return Self::reject(
                            state,
                            EngineError::Validation("refund window has closed".to_string()),
                        );
                    }
                    None => {
                        return Self::reject(
                            state,
                            EngineError::Validation(
                                "refunds are not allowed for this ticket".to_string(),
                            ),
                        );
                    }
                }

                match Self::transition(state, ticket_id, TicketStatus::Refunded, now) {
                    Ok(event) => {
                        Self::apply_event(state, &event);
                        Self::create_effects(vec![event], env)
                    }
                    Err(error) => Self::reject(state, error),
                }
            }

            TicketAction::CancelTicket { ticket_id } => {
                match Self::transition(state, ticket_id, TicketStatus::Cancelled, env.clock.now())
                {
                    Ok(event) => {
                        Self::apply_event(state, &event);
                        Self::create_effects(vec![event], env)
                    }
                    Err(error) => Self::reject(state, error),
                }
            }

            TicketAction::VoidTicket { ticket_id } => {
                match Self::transition(state, ticket_id, TicketStatus::Void, env.clock.now()) {
                    Ok(event) => {
                        Self::apply_event(state, &event);
                        Self::create_effects(vec![event], env)
                    }
                    Err(error) => Self::reject(state, error),
                }
            }

            TicketAction::RecordScan { ticket_id, at } => {
                let Some(ticket) = state.get(&ticket_id) else {
                    return Self::reject(state, EngineError::not_found("ticket", ticket_id));
                };
                if !ticket.status.is_scannable() {
                    return Self::reject(
                        state,
                        EngineError::Validation(format!(
                            "ticket {ticket_id} is {} and cannot be scanned",
                            ticket.status
                        )),
                    );
                }

                let event = TicketAction::ScanCounted { ticket_id, at };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            TicketAction::RecordMintAsset {
                ticket_id,
                asset_id,
            } => {
                if state.get(&ticket_id).is_none() {
                    return Self::reject(state, EngineError::not_found("ticket", ticket_id));
                }
                if asset_id.is_empty() {
                    return Self::reject(
                        state,
                        EngineError::Validation("asset id must not be empty".to_string()),
                    );
                }

                let event = TicketAction::MintAssetRecorded {
                    ticket_id,
                    asset_id,
                };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            // ========== Events (from event store replay) ==========
            event => {
                Self::apply_event(state, &event);
                SmallVec::new()
            }
        }
    }
}
