//! State-machine properties: every (status, target) pair outside the
//! valid-transition table is rejected with `InvalidTransition` and
//! leaves the ticket unchanged.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{Duration, Utc};
use proptest::prelude::*;
use stagepass_core::environment::Clock;
use stagepass_core::reducer::Reducer;
use stagepass_core::stream::StreamId;
use stagepass_engine::EngineError;
use stagepass_engine::aggregates::ticket::{TicketEnvironment, TicketReducer, TransferPolicy};
use stagepass_engine::aggregates::TicketAction;
use stagepass_engine::types::{
    AcquisitionKind, CustomerId, EventId, Money, OwnershipRecord, Ticket, TicketId, TicketState,
    TicketStatus, TicketTypeId, TransferKind, ValidityWindow,
};
use stagepass_testing::mocks::{FixedClock, InMemoryEventBus, InMemoryEventStore};
use std::sync::Arc;

const ALL_STATUSES: [TicketStatus; 9] = [
    TicketStatus::Available,
    TicketStatus::Reserved,
    TicketStatus::Sold,
    TicketStatus::Transferred,
    TicketStatus::Used,
    TicketStatus::Refunded,
    TicketStatus::Cancelled,
    TicketStatus::Expired,
    TicketStatus::Void,
];

/// Targets reachable through public commands.
const COMMAND_TARGETS: [TicketStatus; 5] = [
    TicketStatus::Used,
    TicketStatus::Refunded,
    TicketStatus::Cancelled,
    TicketStatus::Void,
    TicketStatus::Transferred,
];

fn test_env(clock: FixedClock) -> TicketEnvironment {
    TicketEnvironment::new(
        Arc::new(clock),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        StreamId::new("tickets-prop"),
        TransferPolicy::default(),
    )
}

/// Injects a ticket in the given status, configured so only the
/// transition table can reject the attempted command.
fn state_with_ticket(status: TicketStatus, owner: CustomerId, env: &TicketEnvironment) -> (TicketState, TicketId) {
    let now = env.clock.now();
    let ticket_id = TicketId::new();
    let starts = now + Duration::days(7);
    let ticket = Ticket {
        id: ticket_id,
        ticket_type_id: TicketTypeId::new(),
        event_id: EventId::new(),
        owner,
        original_purchaser: owner,
        number: "EV-TY-000001".to_string(),
        barcode: "b".repeat(64),
        verification_hash: "v".repeat(64),
        seat: None,
        price_paid: Money::from_dollars(100),
        fees_paid: Money::ZERO,
        status,
        validity: ValidityWindow::for_event(now, starts, starts + Duration::hours(3)),
        refund_deadline: Some(starts),
        scan_count: 0,
        first_scanned_at: None,
        last_scanned_at: None,
        transfer_count: 0,
        transferable: true,
        max_transfers: 10,
        resale_price_cap_bps: stagepass_engine::types::RESALE_PRICE_CAP_BPS,
        nft_asset: None,
        issued_at: now,
    };

    let mut state = TicketState::new();
    state.ownership.entry(ticket_id).or_default().push(OwnershipRecord {
        ticket_id,
        owner,
        acquisition: AcquisitionKind::Purchase,
        owned_from: now,
        owned_until: None,
        price_paid: Some(ticket.price_paid),
        source_ref: None,
        is_current_owner: true,
    });
    state.tickets.insert(ticket_id, ticket);
    (state, ticket_id)
}

fn command_for(target: TicketStatus, ticket_id: TicketId, owner: CustomerId) -> TicketAction {
    match target {
        TicketStatus::Used => TicketAction::MarkUsed { ticket_id },
        TicketStatus::Refunded => TicketAction::Refund { ticket_id },
        TicketStatus::Cancelled => TicketAction::CancelTicket { ticket_id },
        TicketStatus::Void => TicketAction::VoidTicket { ticket_id },
        _ => TicketAction::InitiateTransfer {
            ticket_id,
            from: owner,
            to: CustomerId::new(),
            kind: TransferKind::Gift,
            price: None,
        },
    }
}

proptest! {
    /// Invalid pairs are rejected before any mutation; valid pairs land
    /// on the target status.
    #[test]
    fn transition_attempts_respect_the_table(
        from in prop::sample::select(ALL_STATUSES.to_vec()),
        target in prop::sample::select(COMMAND_TARGETS.to_vec()),
    ) {
        let clock = FixedClock::at(Utc::now());
        let env = test_env(clock);
        let owner = CustomerId::new();
        let (mut state, ticket_id) = state_with_ticket(from, owner, &env);
        let before = state.tickets[&ticket_id].clone();

        let reducer = TicketReducer::new();
        reducer.reduce(&mut state, command_for(target, ticket_id, owner), &env);

        if from.can_transition_to(target) {
            prop_assert!(state.last_error.is_none());
            prop_assert_eq!(state.tickets[&ticket_id].status, target);
        } else {
            let is_invalid_transition = matches!(
                state.last_error,
                Some(EngineError::InvalidTransition { .. })
            );
            prop_assert!(is_invalid_transition);
            // The ticket is untouched
            let after = &state.tickets[&ticket_id];
            prop_assert_eq!(after.status, before.status);
            prop_assert_eq!(after.owner, before.owner);
            prop_assert_eq!(after.transfer_count, before.transfer_count);
        }
    }

    /// Terminal statuses have no outgoing transitions at all.
    #[test]
    fn terminal_statuses_reject_everything(
        from in prop::sample::select(
            vec![
                TicketStatus::Used,
                TicketStatus::Refunded,
                TicketStatus::Cancelled,
                TicketStatus::Expired,
                TicketStatus::Void,
            ]
        ),
        target in prop::sample::select(ALL_STATUSES.to_vec()),
    ) {
        prop_assert!(from.is_terminal());
        prop_assert!(!from.can_transition_to(target));
    }
}
