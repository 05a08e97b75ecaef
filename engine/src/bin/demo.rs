//! End-to-end demo: register a type, purchase, transfer, and reconcile,
//! all against in-memory infrastructure.
//!
//! ```sh
//! cargo run -p stagepass-engine --bin demo
//! ```

use chrono::{Duration, Utc};
use stagepass_core::environment::SystemClock;
use stagepass_engine::collaborators::{
    EventInfo, InProcessMintGateway, StaticEventDirectory, TablePromoResolver, TracingAuditSink,
};
use stagepass_engine::config::EngineConfig;
use stagepass_engine::types::{
    EventId, Money, OrgId, SaleWindow, TicketType, TicketTypeId, TransferKind, VenueId,
    CustomerId, FeeSchedule, GroupDiscount,
};
use stagepass_engine::{Collaborators, Engine, PurchaseRequest};
use stagepass_testing::mocks::{InMemoryEventBus, InMemoryEventStore};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    stagepass_engine::metrics::register_business_metrics();

    let now = Utc::now();
    let event_id = EventId::new();
    let directory = Arc::new(StaticEventDirectory::new());
    directory.put_event(EventInfo {
        id: event_id,
        venue_id: VenueId::new(),
        name: "Midnight Frequencies".to_string(),
        starts_at: now + Duration::days(14),
        ends_at: now + Duration::days(14) + Duration::hours(4),
    });

    let promos = Arc::new(TablePromoResolver::new());
    promos.put("EARLYBIRD", Money::from_dollars(10));

    let gateway = Arc::new(InProcessMintGateway::new());

    let engine = Engine::in_process(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(SystemClock),
        Collaborators {
            directory,
            promos,
            gateway,
            audit: Arc::new(TracingAuditSink),
        },
        EngineConfig::default(),
    );

    // A GA tier: $100 + $5 fees, 8% tax, 10% off at 10 units
    let mut ticket_type = TicketType::new(
        TicketTypeId::new(),
        OrgId::new(),
        event_id,
        "General Admission",
        Money::from_dollars(100),
        500,
        SaleWindow {
            opens_at: now - Duration::hours(1),
            closes_at: now + Duration::days(13),
            early_access_from: None,
        },
    );
    ticket_type.fees = FeeSchedule {
        service_fee: Money::from_dollars(5),
        ..FeeSchedule::default()
    };
    ticket_type.tax_bps = 800;
    ticket_type.group_discount = Some(GroupDiscount {
        min_quantity: 10,
        discount_bps: 1000,
    });
    let ticket_type = engine.register_ticket_type(ticket_type).await?;
    tracing::info!(tier = %ticket_type.tier, available = ticket_type.available(), "type registered");

    // Purchase two tickets
    let alice = CustomerId::new();
    let outcome = engine
        .purchase(PurchaseRequest {
            event_id,
            ticket_type_id: ticket_type.id,
            customer: alice,
            quantity: 2,
            promo_code: Some("EARLYBIRD".to_string()),
            attributes: HashMap::new(),
            early_access: false,
            seat: None,
        })
        .await?;
    tracing::info!(
        total = %outcome.quote.total,
        issued = outcome.batch.successful,
        "purchase completed"
    );

    // Let the mint confirmations drain
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Gift one to Bob
    let bob = CustomerId::new();
    let ticket = &outcome.tickets[0];
    let transfer = engine
        .transfer(event_id, ticket.id, alice, bob, TransferKind::Gift, None)
        .await?;
    tracing::info!(
        ticket = %transfer.ticket.number,
        owner = %transfer.ticket.owner,
        "transferred"
    );

    // Reconcile: local and external should match
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let discrepancies = engine.reconcile_now().await?;
    tracing::info!(discrepancies = discrepancies.len(), "reconciliation pass");

    Ok(())
}
