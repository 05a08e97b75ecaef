//! Concurrency: the "last unit" problem.
//!
//! Two concurrent requests for the final available unit must resolve as
//! exactly one success and one conflict, never a double booking.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{Duration, Utc};
use stagepass_core::environment::SystemClock;
use stagepass_engine::ErrorKind;
use stagepass_engine::app::services::{InventoryService, StreamLocks};
use stagepass_engine::types::{
    CustomerId, EventId, Money, OrgId, SaleWindow, TicketType, TicketTypeId,
};
use stagepass_testing::mocks::{InMemoryEventBus, InMemoryEventStore};
use std::sync::Arc;

fn ga_type(total: u32) -> TicketType {
    let now = Utc::now();
    TicketType::new(
        TicketTypeId::new(),
        OrgId::new(),
        EventId::new(),
        "GA",
        Money::from_dollars(50),
        total,
        SaleWindow {
            opens_at: now - Duration::hours(1),
            closes_at: now + Duration::days(30),
            early_access_from: None,
        },
    )
}

fn service() -> Arc<InventoryService> {
    let locks = Arc::new(StreamLocks::new(std::time::Duration::from_secs(5)));
    let (service, rx) = InventoryService::new(
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(SystemClock),
        locks,
    );
    InventoryService::spawn_feedback_worker(Arc::clone(&service), rx);
    service
}

#[tokio::test]
async fn last_unit_yields_one_success_one_conflict() {
    let service = service();
    let ticket_type = ga_type(1);
    let type_id = ticket_type.id;
    service.register_type(ticket_type).await.expect("register");

    let expires = Utc::now() + Duration::minutes(5);
    let (first, second) = tokio::join!(
        service.reserve(type_id, CustomerId::new(), 1, expires),
        service.reserve(type_id, CustomerId::new(), 1, expires),
    );

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one reservation must win");

    let loser = if first.is_err() { first } else { second };
    let error = loser.expect_err("the other reservation must lose");
    assert_eq!(error.kind(), ErrorKind::Conflict);

    // The winning hold is the only decrement
    let tt = service
        .ticket_type(type_id)
        .await
        .expect("load")
        .expect("type exists");
    assert_eq!(tt.reserved, 1);
    assert_eq!(tt.sold, 0);
    assert_eq!(tt.available(), 0);
}

#[tokio::test]
async fn independent_types_do_not_contend() {
    let service = service();
    let type_a = ga_type(1);
    let type_b = ga_type(1);
    let (a, b) = (type_a.id, type_b.id);
    service.register_type(type_a).await.expect("register a");
    service.register_type(type_b).await.expect("register b");

    let expires = Utc::now() + Duration::minutes(5);
    let (ra, rb) = tokio::join!(
        service.reserve(a, CustomerId::new(), 1, expires),
        service.reserve(b, CustomerId::new(), 1, expires),
    );

    // Different types never contend for the same stream
    assert!(ra.is_ok());
    assert!(rb.is_ok());
}

#[tokio::test]
async fn released_hold_frees_the_unit_for_the_next_caller() {
    let service = service();
    let ticket_type = ga_type(1);
    let type_id = ticket_type.id;
    service.register_type(ticket_type).await.expect("register");

    let expires = Utc::now() + Duration::minutes(5);
    let hold = service
        .reserve(type_id, CustomerId::new(), 1, expires)
        .await
        .expect("first hold");

    // Sold out while held
    let denied = service
        .reserve(type_id, CustomerId::new(), 1, expires)
        .await;
    assert!(denied.is_err());

    service
        .release_reservation(type_id, hold.reservation_id)
        .await
        .expect("release");

    // Double release is a no-op, not a double credit
    service
        .release_reservation(type_id, hold.reservation_id)
        .await
        .expect("idempotent release");

    let tt = service
        .ticket_type(type_id)
        .await
        .expect("load")
        .expect("type exists");
    assert_eq!(tt.available(), 1);

    let regained = service
        .reserve(type_id, CustomerId::new(), 1, expires)
        .await;
    assert!(regained.is_ok());
}
