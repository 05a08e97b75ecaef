//! Entry Validation aggregate.
//!
//! Evaluates a ticket presented at a venue checkpoint: status and window
//! checks first, then the duplicate/rapid-rescan heuristics against this
//! aggregate's own scan history. Every attempt, admitted or not,
//! appends exactly one immutable [`ScanRecord`].
//!
//! Heuristics: a rescan within seconds of the previous scan is flagged
//! `RapidScan` (confidence penalty, not a rejection); a rescan beyond
//! the re-entry grace window after the *first* scan is rejected as
//! `Used`; a rescan inside the grace window is admitted flagged
//! `RecentReentry`. The confidence score is informational, not gating.

use crate::errors::EngineError;
use crate::events::EngineEvent;
use crate::types::{
    FraudFlag, ScanId, ScanOutcome, ScanRecord, ScanVerdict, TicketId, TicketStatus, TicketView,
    EntryState,
};
use chrono::{DateTime, Duration, Utc};
use stagepass_core::{
    SmallVec, append_events, effect::Effect, environment::Clock, event_bus::EventBus,
    event_store::EventStore, publish_event, reducer::Reducer, smallvec, stream::StreamId,
};
use stagepass_macros::Action;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Event-bus topic for scan events.
pub const ENTRY_TOPIC: &str = "entry";

/// Confidence penalty for a rapid rescan.
const RAPID_SCAN_PENALTY: f32 = 0.2;
/// Confidence penalty for a grace-window re-entry.
const REENTRY_PENALTY: f32 = 0.3;

// ============================================================================
// Heuristics configuration
// ============================================================================

/// Tunable windows for the duplicate-scan heuristics.
#[derive(Clone, Copy, Debug)]
pub struct ScanHeuristics {
    /// Rescans within this window of the last scan are flagged rapid
    pub rapid_scan_window: Duration,
    /// Rescans within this window of the *first* scan are still admitted
    pub reentry_grace: Duration,
}

impl Default for ScanHeuristics {
    fn default() -> Self {
        Self {
            rapid_scan_window: Duration::seconds(30),
            reentry_grace: Duration::minutes(5),
        }
    }
}

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Actions for the Entry Validation aggregate.
#[derive(Action, Clone, Debug, Serialize, Deserialize)]
pub enum EntryAction {
    // Commands
    /// Validate a ticket presented at a checkpoint.
    ///
    /// The service layer resolves the ticket snapshot before dispatching;
    /// `None` means the ticket does not exist.
    #[command]
    ValidateEntry {
        /// Ticket identifier as presented
        ticket_id: TicketId,
        /// Resolved snapshot, if the ticket exists
        ticket: Option<TicketView>,
        /// Gate/checkpoint location
        location: String,
        /// Validator device or operator
        validator: String,
    },

    // Events
    /// One validation attempt was logged
    #[event]
    ScanRecorded {
        /// The immutable scan record
        record: ScanRecord,
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

/// Environment dependencies for the Entry Validation aggregate
#[derive(Clone)]
pub struct EntryEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Event store for persistence
    pub event_store: Arc<dyn EventStore>,
    /// Event bus for publishing
    pub event_bus: Arc<dyn EventBus>,
    /// Stream ID for this aggregate instance
    pub stream_id: StreamId,
    /// Heuristic windows
    pub heuristics: ScanHeuristics,
}

impl EntryEnvironment {
    /// Creates a new `EntryEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        stream_id: StreamId,
        heuristics: ScanHeuristics,
    ) -> Self {
        Self {
            clock,
            event_store,
            event_bus,
            stream_id,
            heuristics,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the Entry Validation aggregate.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntryReducer;

impl EntryReducer {
    /// Creates a new `EntryReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn create_effects(
        event: EntryAction,
        env: &EntryEnvironment,
    ) -> SmallVec<[Effect<EntryAction>; 4]> {
        let serialized = match EngineEvent::Entry(event).serialize() {
            Ok(s) => s,
            Err(error) => {
                tracing::error!(error = %error, "failed to serialize scan event");
                return SmallVec::new();
            }
        };

        smallvec![
            append_events! {
                store: env.event_store,
                stream: env.stream_id.as_str(),
                expected_version: None,
                events: vec![serialized.clone()],
                on_success: |_version| None,
                on_error: |error| Some(EntryAction::Rejected {
                    error: EngineError::ExternalDependency(error.to_string())
                })
            },
            publish_event! {
                bus: env.event_bus,
                topic: ENTRY_TOPIC,
                event: serialized,
                on_success: || None,
                on_error: |error| Some(EntryAction::Rejected {
                    error: EngineError::ExternalDependency(error.to_string())
                })
            }
        ]
    }

    /// Runs the ordered checks and heuristics for one attempt.
    fn evaluate(
        state: &EntryState,
        heuristics: &ScanHeuristics,
        ticket_id: TicketId,
        ticket: Option<&TicketView>,
        now: DateTime<Utc>,
    ) -> ScanVerdict {
        let mut flags = Vec::new();
        let mut confidence = 1.0_f32;

        let rejected = |outcome: ScanOutcome, mark_used: bool| ScanVerdict {
            valid: false,
            outcome,
            entry_allowed: false,
            flags: Vec::new(),
            confidence: 1.0,
            mark_used,
        };

        let Some(ticket) = ticket else {
            return rejected(ScanOutcome::NotFound, false);
        };

        if ticket.status == TicketStatus::Used {
            return rejected(ScanOutcome::Used, false);
        }
        if !ticket.status.is_scannable() {
            return rejected(ScanOutcome::WrongStatus, false);
        }
        if now < ticket.validity.valid_from {
            return rejected(ScanOutcome::NotYetValid, false);
        }
        if now > ticket.validity.valid_until {
            return rejected(ScanOutcome::ValidityExpired, false);
        }
        if now < ticket.validity.entry_opens_at || now > ticket.validity.entry_closes_at {
            return rejected(ScanOutcome::OutsideEntryWindow, false);
        }

        // Duplicate-scan heuristics against this aggregate's own history
        if let Some(first) = state.first_admitted_scan(&ticket_id) {
            if now - first > heuristics.reentry_grace {
                // Single-entry enforcement: the grace window has closed,
                // the ticket is consumed
                return rejected(ScanOutcome::Used, true);
            }

            let last = state.last_admitted_scan(&ticket_id).unwrap_or(first);
            if now - last <= heuristics.rapid_scan_window {
                flags.push(FraudFlag::RapidScan);
                confidence -= RAPID_SCAN_PENALTY;
            } else {
                flags.push(FraudFlag::RecentReentry);
                confidence -= REENTRY_PENALTY;
            }
        }

        ScanVerdict {
            valid: true,
            outcome: ScanOutcome::Admitted,
            entry_allowed: true,
            flags,
            confidence,
            mark_used: false,
        }
    }

    /// Applies an event to state.
    fn apply_event(state: &mut EntryState, action: &EntryAction) {
        match action {
            EntryAction::ScanRecorded { record } => {
                state
                    .history
                    .entry(record.ticket_id)
                    .or_default()
                    .push(record.clone());
                state.last_error = None;
            }

            EntryAction::Rejected { error } => {
                state.last_error = Some(error.clone());
            }

            EntryAction::ValidateEntry { .. } => {}
        }
    }
}

impl Reducer for EntryReducer {
    type State = EntryState;
    type Action = EntryAction;
    type Environment = EntryEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            EntryAction::ValidateEntry {
                ticket_id,
                ticket,
                location,
                validator,
            } => {
                let now = env.clock.now();
                let verdict = Self::evaluate(
                    state,
                    &env.heuristics,
                    ticket_id,
                    ticket.as_ref(),
                    now,
                );

                tracing::info!(
                    ticket = %ticket_id,
                    location = %location,
                    outcome = %verdict.outcome,
                    flags = ?verdict.flags,
                    "entry validation"
                );

                let record = ScanRecord {
                    id: ScanId::new(),
                    ticket_id,
                    location,
                    validator,
                    admitted: verdict.entry_allowed,
                    outcome: verdict.outcome,
                    flags: verdict.flags.clone(),
                    confidence: verdict.confidence,
                    scanned_at: now,
                };

                let event = EntryAction::ScanRecorded { record };
                Self::apply_event(state, &event);
                state.last_verdict = Some(verdict);
                Self::create_effects(event, env)
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
    use crate::types::ValidityWindow;
    use stagepass_testing::mocks::{FixedClock, InMemoryEventBus, InMemoryEventStore};

    fn test_env(clock: FixedClock) -> EntryEnvironment {
        EntryEnvironment::new(
            Arc::new(clock),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            StreamId::new("entry-test"),
            ScanHeuristics::default(),
        )
    }

    /// A ticket inside both its validity and entry windows at `now`.
    fn live_view(now: DateTime<Utc>) -> TicketView {
        TicketView {
            id: TicketId::new(),
            status: TicketStatus::Sold,
            validity: ValidityWindow {
                valid_from: now - Duration::days(7),
                valid_until: now + Duration::hours(4),
                event_starts_at: now,
                entry_opens_at: now - Duration::hours(1),
                entry_closes_at: now + Duration::hours(4),
            },
            scan_count: 0,
        }
    }

    fn validate(
        state: &mut EntryState,
        env: &EntryEnvironment,
        view: Option<TicketView>,
        ticket_id: TicketId,
    ) -> ScanVerdict {
        let reducer = EntryReducer::new();
        reducer.reduce(
            state,
            EntryAction::ValidateEntry {
                ticket_id,
                ticket: view,
                location: "gate-a".to_string(),
                validator: "scanner-1".to_string(),
            },
            env,
        );
        state.last_verdict.clone().unwrap()
    }

    #[test]
    fn clean_first_scan_is_admitted() {
        let clock = FixedClock::at(Utc::now());
        let env = test_env(clock.clone());
        let mut state = EntryState::new();
        let view = live_view(clock.now());
        let ticket_id = view.id;

        let verdict = validate(&mut state, &env, Some(view), ticket_id);
        assert!(verdict.valid);
        assert!(verdict.entry_allowed);
        assert_eq!(verdict.outcome, ScanOutcome::Admitted);
        assert!(verdict.flags.is_empty());
        assert!((verdict.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(state.history[&ticket_id].len(), 1);
    }

    #[test]
    fn rescan_within_ten_seconds_is_flagged_rapid() {
        let clock = FixedClock::at(Utc::now());
        let env = test_env(clock.clone());
        let mut state = EntryState::new();
        let view = live_view(clock.now());
        let ticket_id = view.id;

        validate(&mut state, &env, Some(view.clone()), ticket_id);
        clock.advance(Duration::seconds(10));

        let verdict = validate(&mut state, &env, Some(view), ticket_id);
        assert!(verdict.valid);
        assert_eq!(verdict.flags, vec![FraudFlag::RapidScan]);
        assert!(verdict.confidence < 1.0);
    }

    #[test]
    fn rescan_after_twenty_minutes_is_rejected_as_used() {
        let clock = FixedClock::at(Utc::now());
        let env = test_env(clock.clone());
        let mut state = EntryState::new();
        let view = live_view(clock.now());
        let ticket_id = view.id;

        validate(&mut state, &env, Some(view.clone()), ticket_id);
        clock.advance(Duration::minutes(20));

        let verdict = validate(&mut state, &env, Some(view), ticket_id);
        assert!(!verdict.valid);
        assert_eq!(verdict.outcome, ScanOutcome::Used);
        assert!(verdict.mark_used);
        // Both attempts are on record
        assert_eq!(state.history[&ticket_id].len(), 2);
    }

    #[test]
    fn reentry_within_grace_is_admitted_with_flag() {
        let clock = FixedClock::at(Utc::now());
        let env = test_env(clock.clone());
        let mut state = EntryState::new();
        let view = live_view(clock.now());
        let ticket_id = view.id;

        validate(&mut state, &env, Some(view.clone()), ticket_id);
        clock.advance(Duration::minutes(2));

        let verdict = validate(&mut state, &env, Some(view), ticket_id);
        assert!(verdict.valid);
        assert_eq!(verdict.flags, vec![FraudFlag::RecentReentry]);
    }

    #[test]
    fn missing_ticket_is_recorded_and_rejected() {
        let clock = FixedClock::at(Utc::now());
        let env = test_env(clock.clone());
        let mut state = EntryState::new();
        let ticket_id = TicketId::new();

        let verdict = validate(&mut state, &env, None, ticket_id);
        assert!(!verdict.valid);
        assert_eq!(verdict.outcome, ScanOutcome::NotFound);
        // Even failed attempts append a record
        assert_eq!(state.history[&ticket_id].len(), 1);
    }

    #[test]
    fn refunded_ticket_is_wrong_status() {
        let clock = FixedClock::at(Utc::now());
        let env = test_env(clock.clone());
        let mut state = EntryState::new();
        let mut view = live_view(clock.now());
        view.status = TicketStatus::Refunded;
        let ticket_id = view.id;

        let verdict = validate(&mut state, &env, Some(view), ticket_id);
        assert_eq!(verdict.outcome, ScanOutcome::WrongStatus);
    }

    #[test]
    fn outside_entry_window_is_rejected() {
        let clock = FixedClock::at(Utc::now());
        let env = test_env(clock.clone());
        let mut state = EntryState::new();
        let mut view = live_view(clock.now());
        view.validity.entry_opens_at = clock.now() + Duration::hours(2);
        let ticket_id = view.id;

        let verdict = validate(&mut state, &env, Some(view), ticket_id);
        assert_eq!(verdict.outcome, ScanOutcome::OutsideEntryWindow);
    }
}
