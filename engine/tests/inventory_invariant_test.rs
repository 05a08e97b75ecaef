//! Ledger invariant: for every ticket type, at all times,
//! `sold + reserved <= total` and `available == total - sold - reserved`,
//! across arbitrary interleavings of reserve/commit/release operations.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{Duration, Utc};
use proptest::prelude::*;
use stagepass_core::environment::Clock;
use stagepass_core::reducer::Reducer;
use stagepass_core::stream::StreamId;
use stagepass_engine::aggregates::inventory::{InventoryEnvironment, InventoryReducer};
use stagepass_engine::aggregates::InventoryAction;
use stagepass_engine::types::{
    CustomerId, EventId, InventoryState, Money, OrgId, ReservationId, SaleWindow, TicketType,
    TicketTypeId,
};
use stagepass_testing::mocks::{FixedClock, InMemoryEventBus, InMemoryEventStore};
use std::sync::Arc;

#[derive(Clone, Copy, Debug)]
enum Op {
    Reserve(u32),
    CommitOldest,
    ReleaseOldest,
    /// Release a hold that was already released (idempotency probe)
    ReleaseStale,
    Refund(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..4).prop_map(Op::Reserve),
        Just(Op::CommitOldest),
        Just(Op::ReleaseOldest),
        Just(Op::ReleaseStale),
        (1u32..3).prop_map(Op::Refund),
    ]
}

fn test_env(clock: FixedClock) -> InventoryEnvironment {
    InventoryEnvironment::new(
        Arc::new(clock),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        StreamId::new("inventory-prop"),
    )
}

fn ga_type(total: u32) -> TicketType {
    let now = Utc::now();
    TicketType::new(
        TicketTypeId::new(),
        OrgId::new(),
        EventId::new(),
        "GA",
        Money::from_dollars(25),
        total,
        SaleWindow {
            opens_at: now - Duration::hours(1),
            closes_at: now + Duration::days(30),
            early_access_from: None,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sum_invariant_holds_across_op_sequences(
        total in 1u32..20,
        ops in proptest::collection::vec(op_strategy(), 1..60),
    ) {
        let clock = FixedClock::at(Utc::now());
        let env = test_env(clock.clone());
        let reducer = InventoryReducer::new();
        let mut state = InventoryState::new();
        let ticket_type = ga_type(total);
        let type_id = ticket_type.id;
        let customer = CustomerId::new();

        reducer.reduce(&mut state, InventoryAction::RegisterType { ticket_type }, &env);

        let mut active: Vec<ReservationId> = Vec::new();
        let mut released: Vec<ReservationId> = Vec::new();
        let expires_at = clock.now() + Duration::minutes(10);

        for op in ops {
            match op {
                Op::Reserve(quantity) => {
                    let reservation_id = ReservationId::new();
                    reducer.reduce(&mut state, InventoryAction::Reserve {
                        reservation_id,
                        ticket_type_id: type_id,
                        customer_id: customer,
                        quantity,
                        expires_at,
                    }, &env);
                    if state.holds.contains_key(&reservation_id) {
                        active.push(reservation_id);
                    }
                }
                Op::CommitOldest => {
                    if let Some(reservation_id) = active.first().copied() {
                        reducer.reduce(&mut state, InventoryAction::CommitSale {
                            ticket_type_id: type_id,
                            reservation_id,
                        }, &env);
                        active.remove(0);
                        released.push(reservation_id);
                    }
                }
                Op::ReleaseOldest => {
                    if let Some(reservation_id) = active.first().copied() {
                        reducer.reduce(&mut state, InventoryAction::ReleaseReservation {
                            ticket_type_id: type_id,
                            reservation_id,
                        }, &env);
                        active.remove(0);
                        released.push(reservation_id);
                    }
                }
                Op::ReleaseStale => {
                    if let Some(reservation_id) = released.first().copied() {
                        // Must be a no-op: never double-credits available
                        reducer.reduce(&mut state, InventoryAction::ReleaseReservation {
                            ticket_type_id: type_id,
                            reservation_id,
                        }, &env);
                    }
                }
                Op::Refund(quantity) => {
                    reducer.reduce(&mut state, InventoryAction::Release {
                        ticket_type_id: type_id,
                        quantity,
                        customer_id: Some(customer),
                    }, &env);
                }
            }

            let tt = state.get_type(&type_id).expect("type exists");
            prop_assert!(tt.sold + tt.reserved <= tt.total);
            prop_assert_eq!(tt.available(), tt.total - tt.sold - tt.reserved);
            prop_assert_eq!(
                tt.sold + tt.reserved + tt.available(),
                tt.total,
                "sum invariant broken: sold={} reserved={} available={} total={}",
                tt.sold, tt.reserved, tt.available(), tt.total
            );

            // Reserved always equals the sum of live holds
            let held: u32 = state.holds.values().map(|h| h.quantity).sum();
            prop_assert_eq!(tt.reserved, held);
        }
    }
}
