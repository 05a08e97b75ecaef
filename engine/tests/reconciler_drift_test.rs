//! Reconciler drift detection: a local ownership change with no
//! corresponding external-ledger update yields exactly one discrepancy
//! on the next pass, and discrepancies are recorded, never auto-healed.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{Duration, Utc};
use stagepass_core::environment::SystemClock;
use stagepass_engine::collaborators::{
    EventInfo, InProcessMintGateway, StaticEventDirectory, TablePromoResolver, TracingAuditSink,
};
use stagepass_engine::config::EngineConfig;
use stagepass_engine::types::{
    CustomerId, EventId, Money, OrgId, SaleWindow, SyncState, TicketId, TicketType, TicketTypeId,
    TransferKind, VenueId,
};
use stagepass_engine::{Collaborators, Engine, PurchaseRequest};
use stagepass_testing::mocks::{InMemoryEventBus, InMemoryEventStore};
use std::collections::HashMap;
use std::sync::Arc;

struct Harness {
    engine: Arc<Engine>,
    gateway: Arc<InProcessMintGateway>,
    event_id: EventId,
    alice: CustomerId,
    ticket_id: TicketId,
}

/// An engine with one purchased, mint-confirmed ticket.
async fn minted_harness() -> Harness {
    let now = Utc::now();
    let event_id = EventId::new();

    let directory = Arc::new(StaticEventDirectory::new());
    directory.put_event(EventInfo {
        id: event_id,
        venue_id: VenueId::new(),
        name: "Drift Test".to_string(),
        starts_at: now + Duration::days(7),
        ends_at: now + Duration::days(7) + Duration::hours(3),
    });

    let gateway = Arc::new(InProcessMintGateway::new());
    let engine = Engine::in_process(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(SystemClock),
        Collaborators {
            directory,
            promos: Arc::new(TablePromoResolver::new()),
            gateway: gateway.clone(),
            audit: Arc::new(TracingAuditSink),
        },
        EngineConfig::default(),
    );

    let ticket_type = TicketType::new(
        TicketTypeId::new(),
        OrgId::new(),
        event_id,
        "GA",
        Money::from_dollars(60),
        20,
        SaleWindow {
            opens_at: now - Duration::hours(1),
            closes_at: now + Duration::days(6),
            early_access_from: None,
        },
    );
    let ticket_type = engine
        .register_ticket_type(ticket_type)
        .await
        .expect("register");

    let alice = CustomerId::new();
    let outcome = engine
        .purchase(PurchaseRequest {
            event_id,
            ticket_type_id: ticket_type.id,
            customer: alice,
            quantity: 1,
            promo_code: None,
            attributes: HashMap::new(),
            early_access: false,
            seat: None,
        })
        .await
        .expect("purchase");
    let ticket_id = outcome.tickets[0].id;

    // Wait until the mint confirmation has been applied
    for _ in 0..100 {
        let ticket = engine
            .tickets
            .ticket(event_id, ticket_id)
            .await
            .expect("load ticket");
        if ticket.is_some_and(|t| t.nft_asset.is_some()) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    Harness {
        engine,
        gateway,
        event_id,
        alice,
        ticket_id,
    }
}

#[tokio::test]
async fn matched_state_produces_no_discrepancies() {
    let h = minted_harness().await;
    let discrepancies = h.engine.reconcile_now().await.expect("reconcile");
    assert!(discrepancies.is_empty());

    let state = h.engine.reconciler.state().await.expect("state");
    let record = state.record(&h.ticket_id).expect("record exists");
    assert_eq!(record.state, SyncState::Minted);
    assert!(record.last_verified_at.is_some());
}

#[tokio::test]
async fn unmirrored_ownership_change_is_detected_once() {
    let h = minted_harness().await;
    let bob = CustomerId::new();

    // Inject a DB-only ownership change: complete the transfer directly
    // against the ticket aggregate, bypassing the external mirror
    h.engine
        .tickets
        .initiate_transfer(
            h.event_id,
            h.ticket_id,
            h.alice,
            bob,
            TransferKind::Gift,
            None,
        )
        .await
        .expect("local transfer");

    let first_pass = h.engine.reconcile_now().await.expect("first pass");
    let about_ticket: Vec<_> = first_pass
        .iter()
        .filter(|d| d.ticket_id == h.ticket_id)
        .collect();
    assert_eq!(about_ticket.len(), 1, "exactly one discrepancy expected");
    assert!(about_ticket[0].expected.contains(&bob.to_string()));

    // The drift is recorded, not auto-healed: the external record still
    // shows the stale owner, and a second pass does not duplicate it
    let second_pass = h.engine.reconcile_now().await.expect("second pass");
    assert_eq!(
        second_pass
            .iter()
            .filter(|d| d.ticket_id == h.ticket_id)
            .count(),
        1
    );

    let state = h.engine.reconciler.state().await.expect("state");
    let record = state.record(&h.ticket_id).expect("record exists");
    assert_eq!(record.observed_owner, Some(h.alice));
}

#[tokio::test]
async fn failed_mint_leaves_local_ticket_authoritative() {
    let now = Utc::now();
    let event_id = EventId::new();

    let directory = Arc::new(StaticEventDirectory::new());
    directory.put_event(EventInfo {
        id: event_id,
        venue_id: VenueId::new(),
        name: "Gateway Down".to_string(),
        starts_at: now + Duration::days(7),
        ends_at: now + Duration::days(7) + Duration::hours(3),
    });

    let gateway = Arc::new(InProcessMintGateway::new());
    gateway.set_failing(true);
    let engine = Engine::in_process(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(SystemClock),
        Collaborators {
            directory,
            promos: Arc::new(TablePromoResolver::new()),
            gateway: gateway.clone(),
            audit: Arc::new(TracingAuditSink),
        },
        EngineConfig::default(),
    );

    let ticket_type = TicketType::new(
        TicketTypeId::new(),
        OrgId::new(),
        event_id,
        "GA",
        Money::from_dollars(60),
        20,
        SaleWindow {
            opens_at: now - Duration::hours(1),
            closes_at: now + Duration::days(6),
            early_access_from: None,
        },
    );
    let ticket_type = engine
        .register_ticket_type(ticket_type)
        .await
        .expect("register");

    // The purchase succeeds even though every mint submission fails
    let outcome = engine
        .purchase(PurchaseRequest {
            event_id,
            ticket_type_id: ticket_type.id,
            customer: CustomerId::new(),
            quantity: 1,
            promo_code: None,
            attributes: HashMap::new(),
            early_access: false,
            seat: None,
        })
        .await
        .expect("purchase must not roll back on mint failure");
    assert_eq!(outcome.batch.successful, 1);

    // The mirror parks in the error state for retry
    let ticket_id = outcome.tickets[0].id;
    let mut errored = false;
    for _ in 0..100 {
        let state = engine.reconciler.state().await.expect("state");
        if let Some(record) = state.record(&ticket_id) {
            if matches!(record.state, SyncState::Error { .. }) {
                errored = true;
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(errored, "failed submission should park in the error state");

    // Recovery: the gateway comes back and a retry succeeds
    gateway.set_failing(false);
    let ticket = engine
        .tickets
        .ticket(event_id, ticket_id)
        .await
        .expect("load")
        .expect("exists");
    engine
        .reconciler
        .request_mint(
            ticket_id,
            stagepass_engine::collaborators::MintMetadata {
                name: "retry".to_string(),
                event_id,
                ticket_number: ticket.number,
                owner: ticket.owner,
            },
        )
        .await
        .expect("retry accepted");

    let mut minted = false;
    for _ in 0..100 {
        let state = engine.reconciler.state().await.expect("state");
        if state.record(&ticket_id).is_some_and(|r| r.state == SyncState::Minted) {
            minted = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(minted, "retry should reach the minted state");
}
