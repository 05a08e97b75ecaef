//! The gate-scanning scenario: a ticket scanned twice within seconds is
//! admitted with a rapid-scan flag; scanned again twenty minutes after
//! the first scan it is rejected as used, terminally.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{Duration, Utc};
use stagepass_core::environment::Clock;
use stagepass_engine::collaborators::{
    EventInfo, InProcessMintGateway, StaticEventDirectory, TablePromoResolver, TracingAuditSink,
};
use stagepass_engine::config::EngineConfig;
use stagepass_engine::types::{
    CustomerId, EventId, FraudFlag, Money, OrgId, SaleWindow, ScanOutcome, TicketId,
    TicketStatus, TicketType, TicketTypeId, VenueId,
};
use stagepass_engine::{Collaborators, Engine, PurchaseRequest};
use stagepass_testing::mocks::{FixedClock, InMemoryEventBus, InMemoryEventStore};
use std::collections::HashMap;
use std::sync::Arc;

struct Gate {
    engine: Arc<Engine>,
    clock: FixedClock,
    event_id: EventId,
    ticket_id: TicketId,
}

/// An engine with one sold ticket whose entry window is already open.
async fn at_the_gate() -> Gate {
    let clock = FixedClock::at(Utc::now());
    let now = clock.now();
    let event_id = EventId::new();

    let directory = Arc::new(StaticEventDirectory::new());
    directory.put_event(EventInfo {
        id: event_id,
        venue_id: VenueId::new(),
        name: "Doors Open".to_string(),
        // Doors opened half an hour ago
        starts_at: now + Duration::minutes(30),
        ends_at: now + Duration::hours(4),
    });

    let engine = Engine::in_process(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(clock.clone()),
        Collaborators {
            directory,
            promos: Arc::new(TablePromoResolver::new()),
            gateway: Arc::new(InProcessMintGateway::new()),
            audit: Arc::new(TracingAuditSink),
        },
        EngineConfig::default(),
    );

    let ticket_type = TicketType::new(
        TicketTypeId::new(),
        OrgId::new(),
        event_id,
        "GA",
        Money::from_dollars(40),
        50,
        SaleWindow {
            opens_at: now - Duration::days(1),
            closes_at: now + Duration::hours(1),
            early_access_from: None,
        },
    );
    let ticket_type = engine
        .register_ticket_type(ticket_type)
        .await
        .expect("register");

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
        .expect("purchase");

    Gate {
        engine,
        clock,
        event_id,
        ticket_id: outcome.tickets[0].id,
    }
}

#[tokio::test]
async fn rapid_rescan_is_flagged_not_rejected() {
    let gate = at_the_gate().await;

    let first = gate
        .engine
        .validate_entry(gate.event_id, gate.ticket_id, "gate-a", "scanner-1")
        .await
        .expect("first scan");
    assert!(first.valid);
    assert!(first.entry_allowed);
    assert!(first.flags.is_empty());

    gate.clock.advance(Duration::seconds(10));
    let second = gate
        .engine
        .validate_entry(gate.event_id, gate.ticket_id, "gate-a", "scanner-1")
        .await
        .expect("second scan");
    assert!(second.valid);
    assert_eq!(second.flags, vec![FraudFlag::RapidScan]);
    assert!(second.confidence < 1.0);
}

#[tokio::test]
async fn rescan_beyond_grace_is_terminal_used() {
    let gate = at_the_gate().await;

    let first_scan_at = gate.clock.now();
    gate.engine
        .validate_entry(gate.event_id, gate.ticket_id, "gate-a", "scanner-1")
        .await
        .expect("first scan");

    // Twenty minutes after the first scan
    gate.clock.set(first_scan_at + Duration::minutes(20));
    let verdict = gate
        .engine
        .validate_entry(gate.event_id, gate.ticket_id, "gate-a", "scanner-1")
        .await
        .expect("late rescan");
    assert!(!verdict.valid);
    assert!(!verdict.entry_allowed);
    assert_eq!(verdict.outcome, ScanOutcome::Used);

    // Single-entry enforcement applied the terminal transition
    let ticket = gate
        .engine
        .tickets
        .ticket(gate.event_id, gate.ticket_id)
        .await
        .expect("load")
        .expect("ticket exists");
    assert_eq!(ticket.status, TicketStatus::Used);
    assert_eq!(ticket.scan_count, 1);

    // And stays rejected from here on
    let again = gate
        .engine
        .validate_entry(gate.event_id, gate.ticket_id, "gate-b", "scanner-2")
        .await
        .expect("post-terminal scan");
    assert_eq!(again.outcome, ScanOutcome::Used);
}

#[tokio::test]
async fn reentry_within_grace_is_admitted_with_flag() {
    let gate = at_the_gate().await;

    gate.engine
        .validate_entry(gate.event_id, gate.ticket_id, "gate-a", "scanner-1")
        .await
        .expect("first scan");

    gate.clock.advance(Duration::minutes(2));
    let verdict = gate
        .engine
        .validate_entry(gate.event_id, gate.ticket_id, "gate-a", "scanner-1")
        .await
        .expect("re-entry");
    assert!(verdict.valid);
    assert_eq!(verdict.flags, vec![FraudFlag::RecentReentry]);

    let ticket = gate
        .engine
        .tickets
        .ticket(gate.event_id, gate.ticket_id)
        .await
        .expect("load")
        .expect("ticket exists");
    assert_eq!(ticket.scan_count, 2);
}

#[tokio::test]
async fn unknown_ticket_is_rejected_and_logged() {
    let gate = at_the_gate().await;

    let verdict = gate
        .engine
        .validate_entry(gate.event_id, TicketId::new(), "gate-a", "scanner-1")
        .await
        .expect("scan of unknown ticket");
    assert!(!verdict.valid);
    assert_eq!(verdict.outcome, ScanOutcome::NotFound);
}
