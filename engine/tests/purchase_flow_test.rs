//! End-to-end purchase flow through the engine facade: eligibility,
//! pricing, inventory movement, issuance identity, ownership chain, and
//! external mirroring.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{Duration, Utc};
use stagepass_core::environment::SystemClock;
use stagepass_engine::collaborators::{
    EventInfo, InProcessMintGateway, StaticEventDirectory, TablePromoResolver, TracingAuditSink,
};
use stagepass_engine::config::EngineConfig;
use stagepass_engine::pricing::RuleCode;
use stagepass_engine::types::{
    CustomerId, EventId, FeeSchedule, GroupDiscount, Money, OrgId, SaleWindow, TicketId,
    TicketStatus, TicketType, TicketTypeId, TransferKind, VenueId,
};
use stagepass_engine::{Collaborators, Engine, EngineError, ErrorKind, PurchaseRequest};
use stagepass_testing::mocks::{InMemoryEventBus, InMemoryEventStore};
use std::collections::HashMap;
use std::sync::Arc;

struct Harness {
    engine: Arc<Engine>,
    gateway: Arc<InProcessMintGateway>,
    event_id: EventId,
}

fn harness() -> Harness {
    let now = Utc::now();
    let event_id = EventId::new();

    let directory = Arc::new(StaticEventDirectory::new());
    directory.put_event(EventInfo {
        id: event_id,
        venue_id: VenueId::new(),
        name: "Test Event".to_string(),
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

    Harness {
        engine,
        gateway,
        event_id,
    }
}

/// The worked pricing example: unit 100.00 × 10, 5.00 fees/ticket,
/// 8% tax, 10% group discount at 10 units.
fn worked_example_type(event_id: EventId) -> TicketType {
    let now = Utc::now();
    let mut tt = TicketType::new(
        TicketTypeId::new(),
        OrgId::new(),
        event_id,
        "GA",
        Money::from_dollars(100),
        100,
        SaleWindow {
            opens_at: now - Duration::hours(1),
            closes_at: now + Duration::days(6),
            early_access_from: None,
        },
    );
    tt.fees = FeeSchedule {
        service_fee: Money::from_dollars(5),
        ..FeeSchedule::default()
    };
    tt.tax_bps = 800;
    tt.group_discount = Some(GroupDiscount {
        min_quantity: 10,
        discount_bps: 1000,
    });
    tt
}

fn request(event_id: EventId, type_id: TicketTypeId, customer: CustomerId, qty: u32) -> PurchaseRequest {
    PurchaseRequest {
        event_id,
        ticket_type_id: type_id,
        customer,
        quantity: qty,
        promo_code: None,
        attributes: HashMap::new(),
        early_access: false,
        seat: None,
    }
}

async fn wait_for_asset(harness: &Harness, ticket_id: TicketId) -> bool {
    for _ in 0..100 {
        let ticket = harness
            .engine
            .tickets
            .ticket(harness.event_id, ticket_id)
            .await
            .expect("load ticket");
        if ticket.is_some_and(|t| t.nft_asset.is_some()) {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn purchase_issues_tickets_and_moves_inventory() {
    let h = harness();
    let tt = h
        .engine
        .register_ticket_type(worked_example_type(h.event_id))
        .await
        .expect("register");
    let alice = CustomerId::new();

    let outcome = h
        .engine
        .purchase(request(h.event_id, tt.id, alice, 10))
        .await
        .expect("purchase");

    // Worked pricing example
    assert_eq!(outcome.quote.base, Money::from_dollars(1000));
    assert_eq!(outcome.quote.fees, Money::from_dollars(50));
    assert_eq!(outcome.quote.taxes, Money::from_dollars(80));
    assert_eq!(outcome.quote.discount, Money::from_dollars(100));
    assert_eq!(outcome.quote.total, Money::from_dollars(1030));

    // All units issued
    assert_eq!(outcome.batch.successful, 10);
    assert_eq!(outcome.batch.failed, 0);
    assert_eq!(outcome.tickets.len(), 10);

    // Inventory moved reserve -> sold
    let after = h
        .engine
        .inventory
        .ticket_type(tt.id)
        .await
        .expect("load")
        .expect("type exists");
    assert_eq!(after.sold, 10);
    assert_eq!(after.reserved, 0);
    assert_eq!(after.available(), 90);

    // Identity: unique numbers and barcodes, verifiable ownership
    let mut numbers: Vec<_> = outcome.tickets.iter().map(|t| t.number.clone()).collect();
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 10);

    for ticket in &outcome.tickets {
        assert_eq!(ticket.status, TicketStatus::Sold);
        assert_eq!(ticket.owner, alice);
        assert_eq!(ticket.barcode.len(), 64);
    }
}

#[tokio::test]
async fn mint_confirmation_binds_the_asset() {
    let h = harness();
    let tt = h
        .engine
        .register_ticket_type(worked_example_type(h.event_id))
        .await
        .expect("register");

    let outcome = h
        .engine
        .purchase(request(h.event_id, tt.id, CustomerId::new(), 1))
        .await
        .expect("purchase");
    let ticket_id = outcome.tickets[0].id;

    assert!(wait_for_asset(&h, ticket_id).await, "asset never bound");
    assert_eq!(h.gateway.submitted(), vec![ticket_id]);
}

#[tokio::test]
async fn ownership_chain_has_exactly_one_current_record() {
    let h = harness();
    let tt = h
        .engine
        .register_ticket_type(worked_example_type(h.event_id))
        .await
        .expect("register");
    let alice = CustomerId::new();
    let bob = CustomerId::new();

    let outcome = h
        .engine
        .purchase(request(h.event_id, tt.id, alice, 1))
        .await
        .expect("purchase");
    let ticket_id = outcome.tickets[0].id;
    assert!(wait_for_asset(&h, ticket_id).await);

    let transfer = h
        .engine
        .transfer(h.event_id, ticket_id, alice, bob, TransferKind::Gift, None)
        .await
        .expect("transfer");
    assert_eq!(transfer.ticket.owner, bob);
    assert_eq!(transfer.ticket.transfer_count, 1);

    // Chain: two records, exactly one current, matching the ticket owner
    let chain = h
        .engine
        .tickets
        .ownership_chain(h.event_id, ticket_id)
        .await
        .expect("chain");
    assert_eq!(chain.len(), 2);
    let current: Vec<_> = chain.iter().filter(|r| r.is_current_owner).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].owner, bob);

    // External mirror caught up: reconciliation stays clean
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let discrepancies = h.engine.reconcile_now().await.expect("reconcile");
    assert!(discrepancies.is_empty());
}

#[tokio::test]
async fn lifetime_cap_collects_the_failure() {
    let h = harness();
    let mut tt = worked_example_type(h.event_id);
    tt.per_customer_cap = Some(4);
    let tt = h.engine.register_ticket_type(tt).await.expect("register");
    let alice = CustomerId::new();

    h.engine
        .purchase(request(h.event_id, tt.id, alice, 3))
        .await
        .expect("first purchase under the cap");

    let error = h
        .engine
        .purchase(request(h.event_id, tt.id, alice, 2))
        .await
        .expect_err("cap exceeded");
    assert_eq!(error.kind(), ErrorKind::Eligibility);
    match error {
        EngineError::Eligibility { rules } => {
            assert!(rules.contains(&RuleCode::LifetimeCapExceeded));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn refund_reopens_inventory_and_is_terminal() {
    let h = harness();
    let tt = h
        .engine
        .register_ticket_type(worked_example_type(h.event_id))
        .await
        .expect("register");
    let alice = CustomerId::new();

    let outcome = h
        .engine
        .purchase(request(h.event_id, tt.id, alice, 2))
        .await
        .expect("purchase");
    let ticket_id = outcome.tickets[0].id;

    let refunded = h.engine.refund(h.event_id, ticket_id).await.expect("refund");
    assert_eq!(refunded.status, TicketStatus::Refunded);

    let after = h
        .engine
        .inventory
        .ticket_type(tt.id)
        .await
        .expect("load")
        .expect("type exists");
    assert_eq!(after.sold, 1);

    // Terminal: no further transitions
    let error = h
        .engine
        .transfer(
            h.event_id,
            ticket_id,
            alice,
            CustomerId::new(),
            TransferKind::Gift,
            None,
        )
        .await
        .expect_err("refunded tickets cannot transfer");
    assert_eq!(error.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn promo_discount_flows_into_the_total() {
    let h = harness();
    let promos = Arc::new(TablePromoResolver::new());
    promos.put("TENOFF", Money::from_dollars(10));

    // Rebuild an engine with the promo table wired in
    let directory = Arc::new(StaticEventDirectory::new());
    directory.put_event(EventInfo {
        id: h.event_id,
        venue_id: VenueId::new(),
        name: "Test Event".to_string(),
        starts_at: Utc::now() + Duration::days(7),
        ends_at: Utc::now() + Duration::days(7) + Duration::hours(3),
    });
    let engine = Engine::in_process(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(SystemClock),
        Collaborators {
            directory,
            promos,
            gateway: Arc::new(InProcessMintGateway::new()),
            audit: Arc::new(TracingAuditSink),
        },
        EngineConfig::default(),
    );
    let tt = engine
        .register_ticket_type(worked_example_type(h.event_id))
        .await
        .expect("register");

    let quote = engine
        .quote(tt.id, 1, Some("TENOFF"))
        .await
        .expect("quote");
    // 100 + 5 fees + 8 tax - 10 promo
    assert_eq!(quote.total, Money::from_dollars(103));
}

#[tokio::test]
async fn batch_issuance_is_capped() {
    let h = harness();
    let tt = h
        .engine
        .register_ticket_type(worked_example_type(h.event_id))
        .await
        .expect("register");

    let spec = stagepass_engine::aggregates::IssueSpec {
        ticket_type_id: tt.id,
        event_id: h.event_id,
        owner: CustomerId::new(),
        purchaser: CustomerId::new(),
        price_paid: tt.base_price,
        fees_paid: Money::ZERO,
        seat: None,
        validity: stagepass_engine::types::ValidityWindow::for_event(
            Utc::now(),
            Utc::now() + Duration::days(7),
            Utc::now() + Duration::days(7) + Duration::hours(3),
        ),
        refund_deadline: None,
        transferable: true,
        max_transfers: 3,
        resale_price_cap_bps: stagepass_engine::types::RESALE_PRICE_CAP_BPS,
        acquisition: stagepass_engine::types::AcquisitionKind::Comp,
        source_ref: None,
    };

    let error = h
        .engine
        .tickets
        .issue_batch(h.event_id, vec![spec; 16])
        .await
        .expect_err("16 units exceed the batch ceiling");
    assert!(matches!(error, EngineError::Validation(_)));
}
