//! External collaborator interfaces.
//!
//! The engine consumes master data, promotions, blockchain minting, and
//! audit logging from collaborators it does not own. Each is abstracted
//! behind a trait so production adapters and test doubles are
//! interchangeable via the environment.

use crate::types::{CustomerId, EventId, Money, TicketId, TicketTypeId, VenueId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Event master data consumed read-only for eligibility context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Event identifier
    pub id: EventId,
    /// Venue the event runs at
    pub venue_id: VenueId,
    /// Display name
    pub name: String,
    /// Scheduled start
    pub starts_at: DateTime<Utc>,
    /// Scheduled end
    pub ends_at: DateTime<Utc>,
}

/// Venue master data consumed read-only for capacity context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VenueInfo {
    /// Venue identifier
    pub id: VenueId,
    /// Display name
    pub name: String,
    /// Total venue capacity
    pub capacity: u32,
}

/// Read-only event/venue master-data service.
#[async_trait]
pub trait EventDirectory: Send + Sync {
    /// Fetch an event by id.
    ///
    /// # Errors
    ///
    /// Returns a message when the directory is unavailable.
    async fn event(&self, id: EventId) -> Result<Option<EventInfo>, String>;

    /// Fetch a venue by id.
    ///
    /// # Errors
    ///
    /// Returns a message when the directory is unavailable.
    async fn venue(&self, id: VenueId) -> Result<Option<VenueInfo>, String>;
}

/// Promotions collaborator resolving promo codes into discounts.
#[async_trait]
pub trait PromoResolver: Send + Sync {
    /// Resolve a promo code for a type/quantity into a discount amount.
    /// `Ok(None)` means the code is unknown or not applicable.
    ///
    /// # Errors
    ///
    /// Returns a message when the promotions service is unavailable.
    async fn resolve(
        &self,
        code: &str,
        ticket_type: TicketTypeId,
        quantity: u32,
    ) -> Result<Option<Money>, String>;
}

/// Metadata submitted with a mint request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MintMetadata {
    /// Display name for the minted asset
    pub name: String,
    /// Event the ticket admits to
    pub event_id: EventId,
    /// Human-readable ticket number
    pub ticket_number: String,
    /// Current owner at mint time
    pub owner: CustomerId,
}

/// Blockchain/minting collaborator.
///
/// Key derivation, signing, and on-chain program logic live behind this
/// boundary; the engine only submits operations and awaits confirmation
/// through the reconciler.
#[async_trait]
pub trait MintGateway: Send + Sync {
    /// Submit a mint; resolves with the external asset identifier.
    ///
    /// # Errors
    ///
    /// Returns a message when submission fails or times out.
    async fn submit_mint(&self, ticket_id: TicketId, metadata: MintMetadata)
    -> Result<String, String>;

    /// Mirror an ownership change to the external ledger.
    ///
    /// # Errors
    ///
    /// Returns a message when submission fails or times out.
    async fn submit_transfer(
        &self,
        ticket_id: TicketId,
        new_owner_wallet: String,
    ) -> Result<(), String>;

    /// Burn the external asset after a local terminal transition.
    ///
    /// # Errors
    ///
    /// Returns a message when submission fails or times out.
    async fn submit_burn(&self, ticket_id: TicketId) -> Result<(), String>;
}

/// One audit log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Who performed the action
    pub actor: String,
    /// What was done ("ticket.issue", "transfer.complete", ...)
    pub action: String,
    /// Entity kind ("ticket", "ticket_type", ...)
    pub entity_kind: String,
    /// Entity identifier
    pub entity_id: String,
    /// State before, if captured
    pub before: Option<serde_json::Value>,
    /// State after, if captured
    pub after: Option<serde_json::Value>,
    /// When it happened
    pub at: DateTime<Utc>,
}

/// Fire-and-forget audit collaborator. The engine emits entries but does
/// not own log retention.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an entry. Failures are the sink's problem, not the
    /// caller's.
    async fn record(&self, entry: AuditEntry);
}

// ============================================================================
// In-process implementations (tests, demos, local development)
// ============================================================================

/// Static in-memory event directory.
#[derive(Default)]
pub struct StaticEventDirectory {
    events: Mutex<HashMap<EventId, EventInfo>>,
    venues: Mutex<HashMap<VenueId, VenueInfo>>,
}

#[allow(clippy::expect_used)] // a poisoned lock in a test double is a bug
impl StaticEventDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event.
    pub fn put_event(&self, event: EventInfo) {
        self.events
            .lock()
            .expect("directory lock poisoned")
            .insert(event.id, event);
    }

    /// Registers a venue.
    pub fn put_venue(&self, venue: VenueInfo) {
        self.venues
            .lock()
            .expect("directory lock poisoned")
            .insert(venue.id, venue);
    }
}

#[async_trait]
#[allow(clippy::expect_used)] // a poisoned lock in a test double is a bug
impl EventDirectory for StaticEventDirectory {
    async fn event(&self, id: EventId) -> Result<Option<EventInfo>, String> {
        Ok(self
            .events
            .lock()
            .expect("directory lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn venue(&self, id: VenueId) -> Result<Option<VenueInfo>, String> {
        Ok(self
            .venues
            .lock()
            .expect("directory lock poisoned")
            .get(&id)
            .cloned())
    }
}

/// Promo resolver backed by a static code table.
#[derive(Default)]
pub struct TablePromoResolver {
    codes: Mutex<HashMap<String, Money>>,
}

#[allow(clippy::expect_used)] // a poisoned lock in a test double is a bug
impl TablePromoResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a flat discount for a code.
    pub fn put(&self, code: impl Into<String>, discount: Money) {
        self.codes
            .lock()
            .expect("promo lock poisoned")
            .insert(code.into(), discount);
    }
}

#[async_trait]
#[allow(clippy::expect_used)] // a poisoned lock in a test double is a bug
impl PromoResolver for TablePromoResolver {
    async fn resolve(
        &self,
        code: &str,
        _ticket_type: TicketTypeId,
        _quantity: u32,
    ) -> Result<Option<Money>, String> {
        Ok(self
            .codes
            .lock()
            .expect("promo lock poisoned")
            .get(code)
            .copied())
    }
}

/// In-process mint gateway that fabricates asset ids, with a failure
/// switch for exercising the retry path.
#[derive(Default)]
pub struct InProcessMintGateway {
    failing: Mutex<bool>,
    submitted: Mutex<Vec<TicketId>>,
}

#[allow(clippy::expect_used)] // a poisoned lock in a test double is a bug
impl InProcessMintGateway {
    /// Creates a gateway that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent submissions fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().expect("gateway lock poisoned") = failing;
    }

    /// Tickets submitted so far.
    #[must_use]
    pub fn submitted(&self) -> Vec<TicketId> {
        self.submitted
            .lock()
            .expect("gateway lock poisoned")
            .clone()
    }

    fn check(&self, op: &str) -> Result<(), String> {
        if *self.failing.lock().expect("gateway lock poisoned") {
            Err(format!("{op} submission refused by gateway"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
#[allow(clippy::expect_used)] // a poisoned lock in a test double is a bug
impl MintGateway for InProcessMintGateway {
    async fn submit_mint(
        &self,
        ticket_id: TicketId,
        _metadata: MintMetadata,
    ) -> Result<String, String> {
        self.check("mint")?;
        self.submitted
            .lock()
            .expect("gateway lock poisoned")
            .push(ticket_id);
        Ok(format!("asset-{ticket_id}"))
    }

    async fn submit_transfer(
        &self,
        ticket_id: TicketId,
        _new_owner_wallet: String,
    ) -> Result<(), String> {
        self.check("transfer")?;
        self.submitted
            .lock()
            .expect("gateway lock poisoned")
            .push(ticket_id);
        Ok(())
    }

    async fn submit_burn(&self, ticket_id: TicketId) -> Result<(), String> {
        self.check("burn")?;
        self.submitted
            .lock()
            .expect("gateway lock poisoned")
            .push(ticket_id);
        Ok(())
    }
}

/// Audit sink that logs entries through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            actor = %entry.actor,
            action = %entry.action,
            entity_kind = %entry.entity_kind,
            entity_id = %entry.entity_id,
            "audit"
        );
    }
}
