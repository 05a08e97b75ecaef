//! Blockchain Consistency Reconciler aggregate.
//!
//! Maintains one [`ExternalLedgerRecord`] per ticket once a mint is
//! requested, drives the `pending → minting → minted →
//! (transferred | burned)` state machine, and periodically compares the
//! local store against the last externally-observed state. Mismatches
//! become [`Discrepancy`] records, recorded and alertable, never
//! silently auto-healed, because resolution requires judgment about
//! which source is authoritative.
//!
//! External submissions run as effects; the reducer never holds the
//! stream lock across a gateway call, and reconciliation reads are
//! lock-free snapshots supplied by the service layer.

use crate::collaborators::{MintGateway, MintMetadata};
use crate::errors::EngineError;
use crate::events::EngineEvent;
use crate::types::{
    CustomerId, Discrepancy, ExternalLedgerRecord, LocalTicketView, ReconcilerState, SyncState,
    TicketId, TicketStatus,
};
use chrono::{DateTime, Utc};
use stagepass_core::{
    SmallVec, append_events, async_effect, effect::Effect, environment::Clock,
    event_bus::EventBus, event_store::EventStore, publish_event, reducer::Reducer, smallvec,
    stream::StreamId,
};
use stagepass_macros::Action;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Event-bus topic for reconciler events.
pub const LEDGER_TOPIC: &str = "external-ledger";

/// Kind of external operation, for failure bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalOpKind {
    /// Initial mint
    Mint,
    /// Ownership mirror
    Transfer,
    /// Burn
    Burn,
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the Reconciler aggregate.
#[derive(Action, Clone, Debug, Serialize, Deserialize)]
pub enum ReconcilerAction {
    // Commands
    /// Request an NFT mint for a freshly issued ticket
    #[command]
    RequestMint {
        /// Ticket to mirror
        ticket_id: TicketId,
        /// Metadata for the minted asset
        metadata: MintMetadata,
    },

    /// Mirror a completed local transfer to the external ledger
    #[command]
    RequestTransferSync {
        /// Transferred ticket
        ticket_id: TicketId,
        /// New local owner
        new_owner: CustomerId,
        /// Destination wallet on the external ledger
        wallet: String,
    },

    /// Burn the external asset after a local terminal transition
    #[command]
    RequestBurn {
        /// Ticket whose asset should burn
        ticket_id: TicketId,
    },

    /// Manually park a record in the error state
    #[command]
    MarkError {
        /// The ticket
        ticket_id: TicketId,
        /// Non-empty failure detail
        detail: String,
    },

    /// Compare a snapshot of local tickets against external records
    #[command]
    Reconcile {
        /// Lock-free snapshot of local ownership/status
        observations: Vec<LocalTicketView>,
    },

    // Events
    /// A mint submission went in flight
    #[event]
    MintStarted {
        /// The ticket
        ticket_id: TicketId,
        /// When
        started_at: DateTime<Utc>,
    },

    /// The external ledger confirmed a mint
    #[event]
    MintConfirmed {
        /// The ticket
        ticket_id: TicketId,
        /// Event scope, for routing the asset binding
        event_id: crate::types::EventId,
        /// Owner the external ledger minted to
        owner: CustomerId,
        /// Asset identifier on the external ledger
        asset_id: String,
        /// Confirmation time
        confirmed_at: DateTime<Utc>,
    },

    /// The external ledger confirmed an ownership mirror
    #[event]
    TransferSyncConfirmed {
        /// The ticket
        ticket_id: TicketId,
        /// Owner now recorded externally
        new_owner: CustomerId,
        /// Confirmation time
        confirmed_at: DateTime<Utc>,
    },

    /// The external ledger confirmed a burn
    #[event]
    BurnConfirmed {
        /// The ticket
        ticket_id: TicketId,
        /// Confirmation time
        confirmed_at: DateTime<Utc>,
    },

    /// An external submission failed; queued for retry
    #[event]
    SubmissionFailed {
        /// The ticket
        ticket_id: TicketId,
        /// Which operation failed
        kind: ExternalOpKind,
        /// Failure detail (always non-empty)
        detail: String,
        /// When
        failed_at: DateTime<Utc>,
    },

    /// Local and external state diverged
    #[event]
    DiscrepancyDetected {
        /// The divergence
        discrepancy: Discrepancy,
    },

    /// Local and external state matched for a ticket
    #[event]
    VerificationPassed {
        /// The ticket
        ticket_id: TicketId,
        /// When
        verified_at: DateTime<Utc>,
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

/// Environment dependencies for the Reconciler aggregate
#[derive(Clone)]
pub struct ReconcilerEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Event store for persistence
    pub event_store: Arc<dyn EventStore>,
    /// Event bus for publishing
    pub event_bus: Arc<dyn EventBus>,
    /// Stream ID for this aggregate instance
    pub stream_id: StreamId,
    /// Blockchain/minting collaborator
    pub gateway: Arc<dyn MintGateway>,
}

impl ReconcilerEnvironment {
    /// Creates a new `ReconcilerEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        stream_id: StreamId,
        gateway: Arc<dyn MintGateway>,
    ) -> Self {
        Self {
            clock,
            event_store,
            event_bus,
            stream_id,
            gateway,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the Reconciler aggregate.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReconcilerReducer;

impl ReconcilerReducer {
    /// Creates a new `ReconcilerReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn create_effects(
        events: Vec<ReconcilerAction>,
        env: &ReconcilerEnvironment,
    ) -> SmallVec<[Effect<ReconcilerAction>; 4]> {
        let mut serialized = Vec::with_capacity(events.len());
        for event in events {
            match EngineEvent::Reconciler(event).serialize() {
                Ok(s) => serialized.push(s),
                Err(error) => {
                    tracing::error!(error = %error, "failed to serialize reconciler event");
                    return SmallVec::new();
                }
            }
        }

        let mut effects: SmallVec<[Effect<ReconcilerAction>; 4]> = smallvec![append_events! {
            store: env.event_store,
            stream: env.stream_id.as_str(),
            expected_version: None,
            events: serialized.clone(),
            on_success: |_version| None,
            on_error: |error| Some(ReconcilerAction::Rejected {
                error: EngineError::ExternalDependency(error.to_string())
            })
        }];
        for event in serialized {
            effects.push(publish_event! {
                bus: env.event_bus,
                topic: LEDGER_TOPIC,
                event: event,
                on_success: || None,
                on_error: |error| Some(ReconcilerAction::Rejected {
                    error: EngineError::ExternalDependency(error.to_string())
                })
            });
        }
        effects
    }

    fn reject(
        state: &mut ReconcilerState,
        error: EngineError,
    ) -> SmallVec<[Effect<ReconcilerAction>; 4]> {
        Self::apply_event(state, &ReconcilerAction::Rejected { error });
        SmallVec::new()
    }

    /// Compares one local observation against its external record,
    /// producing either a discrepancy or a verification event.
    fn compare(
        state: &ReconcilerState,
        view: &LocalTicketView,
        now: DateTime<Utc>,
    ) -> Option<ReconcilerAction> {
        let record = state.record(&view.ticket_id);

        let discrepancy = |expected: String, observed: String| {
            if state.has_discrepancy(&view.ticket_id, &expected, &observed) {
                None
            } else {
                Some(ReconcilerAction::DiscrepancyDetected {
                    discrepancy: Discrepancy {
                        ticket_id: view.ticket_id,
                        expected,
                        observed,
                        detected_at: now,
                    },
                })
            }
        };

        let Some(record) = record else {
            // A ticket that claims a mint must have an external record
            if view.minted {
                return discrepancy(
                    "minted asset".to_string(),
                    "no external record".to_string(),
                );
            }
            return None;
        };

        // Terminal local states should be mirrored as burns
        let locally_revoked = matches!(
            view.status,
            TicketStatus::Refunded | TicketStatus::Cancelled | TicketStatus::Void
        );
        if locally_revoked && !record.state.is_terminal() {
            return discrepancy(
                format!("burned after local {}", view.status),
                format!("externally {}", record.state.label()),
            );
        }

        // Ownership drift: the external side lags a completed transfer
        if let Some(observed_owner) = record.observed_owner {
            if observed_owner != view.owner {
                return discrepancy(
                    format!("owner {}", view.owner),
                    format!("owner {observed_owner}"),
                );
            }
        }

        if matches!(record.state, SyncState::Error { .. }) {
            // Already tracked through the retry queue; nothing new to record
            return None;
        }

        Some(ReconcilerAction::VerificationPassed {
            ticket_id: view.ticket_id,
            verified_at: now,
        })
    }

    /// Applies an event to state.
    fn apply_event(state: &mut ReconcilerState, action: &ReconcilerAction) {
        match action {
            ReconcilerAction::MintStarted {
                ticket_id,
                started_at,
            } => {
                let record =
                    state
                        .records
                        .entry(*ticket_id)
                        .or_insert_with(|| ExternalLedgerRecord {
                            ticket_id: *ticket_id,
                            state: SyncState::Pending,
                            asset_id: None,
                            observed_owner: None,
                            last_verified_at: None,
                            retry_count: 0,
                            updated_at: *started_at,
                        });
                record.state = SyncState::Minting;
                record.updated_at = *started_at;
                state.last_error = None;
            }

            ReconcilerAction::MintConfirmed {
                ticket_id,
                owner,
                asset_id,
                confirmed_at,
                ..
            } => {
                if let Some(record) = state.records.get_mut(ticket_id) {
                    record.state = SyncState::Minted;
                    record.asset_id = Some(asset_id.clone());
                    record.observed_owner = Some(*owner);
                    record.updated_at = *confirmed_at;
                }
                state.last_error = None;
            }

            ReconcilerAction::TransferSyncConfirmed {
                ticket_id,
                new_owner,
                confirmed_at,
            } => {
                if let Some(record) = state.records.get_mut(ticket_id) {
                    record.state = SyncState::Transferred;
                    record.observed_owner = Some(*new_owner);
                    record.updated_at = *confirmed_at;
                }
                state.last_error = None;
            }

            ReconcilerAction::BurnConfirmed {
                ticket_id,
                confirmed_at,
            } => {
                if let Some(record) = state.records.get_mut(ticket_id) {
                    record.state = SyncState::Burned;
                    record.updated_at = *confirmed_at;
                }
                state.last_error = None;
            }

            ReconcilerAction::SubmissionFailed {
                ticket_id,
                detail,
                failed_at,
                ..
            } => {
                if let Some(record) = state.records.get_mut(ticket_id) {
                    record.state = SyncState::Error {
                        detail: detail.clone(),
                    };
                    record.retry_count += 1;
                    record.updated_at = *failed_at;
                }
                state.last_error = None;
            }

            ReconcilerAction::DiscrepancyDetected { discrepancy } => {
                state.discrepancies.push(discrepancy.clone());
                state.last_error = None;
            }

            ReconcilerAction::VerificationPassed {
                ticket_id,
                verified_at,
            } => {
                if let Some(record) = state.records.get_mut(ticket_id) {
                    record.last_verified_at = Some(*verified_at);
                }
                state.last_error = None;
            }

            ReconcilerAction::Rejected { error } => {
                state.last_error = Some(error.clone());
            }

            // Commands don't modify state
            ReconcilerAction::RequestMint { .. }
            | ReconcilerAction::RequestTransferSync { .. }
            | ReconcilerAction::RequestBurn { .. }
            | ReconcilerAction::MarkError { .. }
            | ReconcilerAction::Reconcile { .. } => {}
        }
    }
}

impl Reducer for ReconcilerReducer {
    type State = ReconcilerState;
    type Action = ReconcilerAction;
    type Environment = ReconcilerEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per external operation
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            ReconcilerAction::RequestMint {
                ticket_id,
                metadata,
            } => {
                let now = env.clock.now();
                match state.record(&ticket_id).map(|r| &r.state) {
                    None | Some(SyncState::Pending | SyncState::Error { .. }) => {}
                    Some(other) => {
                        return Self::reject(
                            state,
                            EngineError::Validation(format!(
                                "ticket {ticket_id} is already {}",
                                other.label()
                            )),
                        );
                    }
                }

                let event = ReconcilerAction::MintStarted {
                    ticket_id,
                    started_at: now,
                };
                Self::apply_event(state, &event);

                let mut effects = Self::create_effects(vec![event], env);
                let gateway = Arc::clone(&env.gateway);
                let event_id = metadata.event_id;
                let owner = metadata.owner;
                effects.push(async_effect! {
                    match gateway.submit_mint(ticket_id, metadata).await {
                        Ok(asset_id) => Some(ReconcilerAction::MintConfirmed {
                            ticket_id,
                            event_id,
                            owner,
                            asset_id,
                            confirmed_at: Utc::now(),
                        }),
                        Err(detail) => Some(ReconcilerAction::SubmissionFailed {
                            ticket_id,
                            kind: ExternalOpKind::Mint,
                            detail,
                            failed_at: Utc::now(),
                        }),
                    }
                });
                effects
            }

            ReconcilerAction::RequestTransferSync {
                ticket_id,
                new_owner,
                wallet,
            } => {
                let Some(record) = state.record(&ticket_id) else {
                    return Self::reject(
                        state,
                        EngineError::not_found("external record", ticket_id),
                    );
                };
                if !matches!(record.state, SyncState::Minted | SyncState::Transferred) {
                    return Self::reject(
                        state,
                        EngineError::Consistency(format!(
                            "cannot mirror a transfer while externally {}",
                            record.state.label()
                        )),
                    );
                }

                let gateway = Arc::clone(&env.gateway);
                smallvec![async_effect! {
                    match gateway.submit_transfer(ticket_id, wallet).await {
                        Ok(()) => Some(ReconcilerAction::TransferSyncConfirmed {
                            ticket_id,
                            new_owner,
                            confirmed_at: Utc::now(),
                        }),
                        Err(detail) => Some(ReconcilerAction::SubmissionFailed {
                            ticket_id,
                            kind: ExternalOpKind::Transfer,
                            detail,
                            failed_at: Utc::now(),
                        }),
                    }
                }]
            }

            ReconcilerAction::RequestBurn { ticket_id } => {
                let Some(record) = state.record(&ticket_id) else {
                    return Self::reject(
                        state,
                        EngineError::not_found("external record", ticket_id),
                    );
                };
                if record.state.is_terminal() {
                    return SmallVec::new();
                }

                let gateway = Arc::clone(&env.gateway);
                smallvec![async_effect! {
                    match gateway.submit_burn(ticket_id).await {
                        Ok(()) => Some(ReconcilerAction::BurnConfirmed {
                            ticket_id,
                            confirmed_at: Utc::now(),
                        }),
                        Err(detail) => Some(ReconcilerAction::SubmissionFailed {
                            ticket_id,
                            kind: ExternalOpKind::Burn,
                            detail,
                            failed_at: Utc::now(),
                        }),
                    }
                }]
            }

            ReconcilerAction::MarkError { ticket_id, detail } => {
                if detail.trim().is_empty() {
                    return Self::reject(
                        state,
                        EngineError::Validation(
                            "error detail must not be empty".to_string(),
                        ),
                    );
                }
                let Some(record) = state.record(&ticket_id) else {
                    return Self::reject(
                        state,
                        EngineError::not_found("external record", ticket_id),
                    );
                };
                if record.state.is_terminal() {
                    return Self::reject(
                        state,
                        EngineError::Validation(format!(
                            "record for {ticket_id} is terminal"
                        )),
                    );
                }

                let event = ReconcilerAction::SubmissionFailed {
                    ticket_id,
                    kind: ExternalOpKind::Mint,
                    detail,
                    failed_at: env.clock.now(),
                };
                Self::apply_event(state, &event);
                Self::create_effects(vec![event], env)
            }

            ReconcilerAction::Reconcile { observations } => {
                let now = env.clock.now();
                let mut events = Vec::new();
                for view in &observations {
                    if let Some(event) = Self::compare(state, view, now) {
                        Self::apply_event(state, &event);
                        events.push(event);
                    }
                }

                let found = events
                    .iter()
                    .filter(|e| matches!(e, ReconcilerAction::DiscrepancyDetected { .. }))
                    .count();
                if found > 0 {
                    tracing::warn!(discrepancies = found, "reconciliation found drift");
                }

                if events.is_empty() {
                    return SmallVec::new();
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collaborators::InProcessMintGateway;
    use crate::types::EventId;
    use stagepass_testing::mocks::{FixedClock, InMemoryEventBus, InMemoryEventStore};

    fn test_env(clock: FixedClock, gateway: Arc<InProcessMintGateway>) -> ReconcilerEnvironment {
        ReconcilerEnvironment::new(
            Arc::new(clock),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            StreamId::new("external-ledger-test"),
            gateway,
        )
    }

    fn metadata() -> MintMetadata {
        MintMetadata {
            name: "GA ticket".to_string(),
            event_id: EventId::new(),
            ticket_number: "E-T-000001".to_string(),
            owner: CustomerId::new(),
        }
    }

    fn minted_state(
        ticket_id: TicketId,
        owner: CustomerId,
        clock: &FixedClock,
    ) -> ReconcilerState {
        let mut state = ReconcilerState::new();
        let reducer = ReconcilerReducer::new();
        let env = test_env(clock.clone(), Arc::new(InProcessMintGateway::new()));
        reducer.reduce(
            &mut state,
            ReconcilerAction::MintStarted {
                ticket_id,
                started_at: clock.now(),
            },
            &env,
        );
        reducer.reduce(
            &mut state,
            ReconcilerAction::MintConfirmed {
                ticket_id,
                event_id: EventId::new(),
                owner,
                asset_id: format!("asset-{ticket_id}"),
                confirmed_at: clock.now(),
            },
            &env,
        );
        // External side last observed this owner
        reducer.reduce(
            &mut state,
            ReconcilerAction::TransferSyncConfirmed {
                ticket_id,
                new_owner: owner,
                confirmed_at: clock.now(),
            },
            &env,
        );
        state
    }

    #[test]
    fn mint_walks_pending_minting_minted() {
        let clock = FixedClock::at(Utc::now());
        let mut state = ReconcilerState::new();
        let reducer = ReconcilerReducer::new();
        let env = test_env(clock.clone(), Arc::new(InProcessMintGateway::new()));
        let ticket_id = TicketId::new();

        let effects = reducer.reduce(
            &mut state,
            ReconcilerAction::RequestMint {
                ticket_id,
                metadata: metadata(),
            },
            &env,
        );
        assert_eq!(state.record(&ticket_id).unwrap().state, SyncState::Minting);
        // append + publish + gateway future
        assert_eq!(effects.len(), 3);

        reducer.reduce(
            &mut state,
            ReconcilerAction::MintConfirmed {
                ticket_id,
                event_id: EventId::new(),
                owner: CustomerId::new(),
                asset_id: "asset-1".to_string(),
                confirmed_at: clock.now(),
            },
            &env,
        );
        let record = state.record(&ticket_id).unwrap();
        assert_eq!(record.state, SyncState::Minted);
        // Minted requires a non-null asset id
        assert!(record.asset_id.is_some());
    }

    #[test]
    fn failed_submission_parks_in_error_with_detail() {
        let clock = FixedClock::at(Utc::now());
        let mut state = ReconcilerState::new();
        let reducer = ReconcilerReducer::new();
        let env = test_env(clock.clone(), Arc::new(InProcessMintGateway::new()));
        let ticket_id = TicketId::new();

        reducer.reduce(
            &mut state,
            ReconcilerAction::MintStarted {
                ticket_id,
                started_at: clock.now(),
            },
            &env,
        );
        reducer.reduce(
            &mut state,
            ReconcilerAction::SubmissionFailed {
                ticket_id,
                kind: ExternalOpKind::Mint,
                detail: "rpc timeout".to_string(),
                failed_at: clock.now(),
            },
            &env,
        );

        let record = state.record(&ticket_id).unwrap();
        assert!(matches!(record.state, SyncState::Error { ref detail } if detail == "rpc timeout"));
        assert_eq!(record.retry_count, 1);

        // Error is retryable: a new mint request is accepted
        let effects = reducer.reduce(
            &mut state,
            ReconcilerAction::RequestMint {
                ticket_id,
                metadata: metadata(),
            },
            &env,
        );
        assert!(!effects.is_empty());
        assert_eq!(state.record(&ticket_id).unwrap().state, SyncState::Minting);
    }

    #[test]
    fn mark_error_requires_detail() {
        let clock = FixedClock::at(Utc::now());
        let mut state = ReconcilerState::new();
        let reducer = ReconcilerReducer::new();
        let env = test_env(clock.clone(), Arc::new(InProcessMintGateway::new()));

        reducer.reduce(
            &mut state,
            ReconcilerAction::MarkError {
                ticket_id: TicketId::new(),
                detail: "  ".to_string(),
            },
            &env,
        );
        assert!(matches!(state.last_error, Some(EngineError::Validation(_))));
    }

    #[test]
    fn drift_produces_exactly_one_discrepancy() {
        let clock = FixedClock::at(Utc::now());
        let ticket_id = TicketId::new();
        let external_owner = CustomerId::new();
        let local_owner = CustomerId::new(); // DB changed without external sync
        let mut state = minted_state(ticket_id, external_owner, &clock);
        let reducer = ReconcilerReducer::new();
        let env = test_env(clock.clone(), Arc::new(InProcessMintGateway::new()));

        let observations = vec![LocalTicketView {
            ticket_id,
            owner: local_owner,
            status: TicketStatus::Transferred,
            minted: true,
        }];

        reducer.reduce(
            &mut state,
            ReconcilerAction::Reconcile {
                observations: observations.clone(),
            },
            &env,
        );
        assert_eq!(state.discrepancies.len(), 1);
        assert_eq!(state.discrepancies[0].ticket_id, ticket_id);

        // A second pass over the same drift does not duplicate the record
        reducer.reduce(
            &mut state,
            ReconcilerAction::Reconcile { observations },
            &env,
        );
        assert_eq!(state.discrepancies.len(), 1);
    }

    #[test]
    fn matching_states_verify_cleanly() {
        let clock = FixedClock::at(Utc::now());
        let ticket_id = TicketId::new();
        let owner = CustomerId::new();
        let mut state = minted_state(ticket_id, owner, &clock);
        let reducer = ReconcilerReducer::new();
        let env = test_env(clock.clone(), Arc::new(InProcessMintGateway::new()));

        reducer.reduce(
            &mut state,
            ReconcilerAction::Reconcile {
                observations: vec![LocalTicketView {
                    ticket_id,
                    owner,
                    status: TicketStatus::Transferred,
                    minted: true,
                }],
            },
            &env,
        );
        assert!(state.discrepancies.is_empty());
        assert!(state.record(&ticket_id).unwrap().last_verified_at.is_some());
    }

    #[test]
    fn locally_revoked_ticket_expects_a_burn() {
        let clock = FixedClock::at(Utc::now());
        let ticket_id = TicketId::new();
        let owner = CustomerId::new();
        let mut state = minted_state(ticket_id, owner, &clock);
        let reducer = ReconcilerReducer::new();
        let env = test_env(clock.clone(), Arc::new(InProcessMintGateway::new()));

        reducer.reduce(
            &mut state,
            ReconcilerAction::Reconcile {
                observations: vec![LocalTicketView {
                    ticket_id,
                    owner,
                    status: TicketStatus::Refunded,
                    minted: true,
                }],
            },
            &env,
        );
        assert_eq!(state.discrepancies.len(), 1);
        assert!(state.discrepancies[0].expected.contains("burned"));
    }

    #[test]
    fn unminted_ticket_without_record_is_fine() {
        let clock = FixedClock::at(Utc::now());
        let mut state = ReconcilerState::new();
        let reducer = ReconcilerReducer::new();
        let env = test_env(clock.clone(), Arc::new(InProcessMintGateway::new()));

        reducer.reduce(
            &mut state,
            ReconcilerAction::Reconcile {
                observations: vec![LocalTicketView {
                    ticket_id: TicketId::new(),
                    owner: CustomerId::new(),
                    status: TicketStatus::Sold,
                    minted: false,
                }],
            },
            &env,
        );
        assert!(state.discrepancies.is_empty());
    }
}
