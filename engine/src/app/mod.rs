//! Application wiring: the [`Engine`] facade over the aggregate
//! services, cross-aggregate flows (purchase, transfer, refund), and
//! the background sweeps and reconciliation cadence.

pub mod services;

use crate::aggregates::ticket::TransferPolicy;
use crate::aggregates::{IssueSpec, ScanHeuristics};
use crate::collaborators::{
    AuditEntry, AuditSink, EventDirectory, MintGateway, MintMetadata, PromoResolver,
};
use crate::config::{Config, EngineConfig};
use crate::errors::EngineError;
use crate::pricing::{
    self, PriceQuote, RestrictionContext, RestrictionRule, RuleCode, RuleOutcome,
};
use crate::types::{
    AcquisitionKind, BatchReport, CustomerId, Discrepancy, EventId, LocalTicketView, Money,
    ReservationId, ScanVerdict, SeatAttributes, Ticket, TicketTypeId, TicketType,
    TransferKind, ValidityWindow,
};
use chrono::Duration;
use services::{
    EntryService, InventoryService, LogRetrySink, ReconcilerService, RetrySink, StreamLocks,
    TicketService, TransferOutcome,
};
use stagepass_core::environment::Clock;
use stagepass_core::event_bus::EventBus;
use stagepass_core::event_store::EventStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;

/// External collaborators injected into the engine.
#[derive(Clone)]
pub struct Collaborators {
    /// Event/venue master data (read-only)
    pub directory: Arc<dyn EventDirectory>,
    /// Promo code resolution
    pub promos: Arc<dyn PromoResolver>,
    /// Blockchain/minting pipeline
    pub gateway: Arc<dyn MintGateway>,
    /// Fire-and-forget audit log
    pub audit: Arc<dyn AuditSink>,
}

/// A purchase attempt from an authenticated, tenant-scoped caller.
///
/// Payment capture happens outside this engine; calling
/// [`Engine::purchase`] asserts that payment for the quoted total has
/// been confirmed.
#[derive(Clone, Debug)]
pub struct PurchaseRequest {
    /// Event being purchased for
    pub event_id: EventId,
    /// Ticket type being purchased
    pub ticket_type_id: TicketTypeId,
    /// Purchasing customer
    pub customer: CustomerId,
    /// Units requested
    pub quantity: u32,
    /// Optional promo code
    pub promo_code: Option<String>,
    /// Customer attributes fed to restriction rules
    pub attributes: HashMap<String, String>,
    /// Whether the customer holds early access
    pub early_access: bool,
    /// Seat attributes stamped on each issued ticket
    pub seat: Option<SeatAttributes>,
}

/// Structured result of a completed purchase.
#[derive(Clone, Debug)]
pub struct PurchaseOutcome {
    /// The inventory hold that backed the purchase
    pub reservation_id: ReservationId,
    /// The computed price
    pub quote: PriceQuote,
    /// Issued tickets
    pub tickets: Vec<Ticket>,
    /// Per-unit issuance tally
    pub batch: BatchReport,
    /// Non-gating restriction warnings
    pub warnings: Vec<RuleCode>,
}

/// The ticket inventory and lifecycle engine.
///
/// Owns the aggregate services, their background workers, and the
/// cross-aggregate flows. All public operations return structured
/// results with explicit failure kinds.
pub struct Engine {
    /// Inventory ledger operations
    pub inventory: Arc<InventoryService>,
    /// Ticket issuance and lifecycle operations
    pub tickets: Arc<TicketService>,
    /// Entry validation operations
    pub entry: Arc<EntryService>,
    /// External-ledger reconciliation
    pub reconciler: Arc<ReconcilerService>,
    collaborators: Collaborators,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    restrictions: Vec<Arc<dyn RestrictionRule>>,
    registry: RwLock<HashMap<EventId, HashSet<TicketTypeId>>>,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Wires the engine over an event store and bus.
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
        config: EngineConfig,
        restrictions: Vec<Arc<dyn RestrictionRule>>,
        retry_sink: Arc<dyn RetrySink>,
    ) -> Arc<Self> {
        let locks = Arc::new(StreamLocks::new(config.lock_wait));

        let (inventory, inventory_rx) = InventoryService::new(
            Arc::clone(&event_store),
            Arc::clone(&event_bus),
            Arc::clone(&clock),
            Arc::clone(&locks),
        );
        let policy = TransferPolicy {
            approval_required_for_resale: config.approval_required_for_resale,
            request_ttl: config.transfer_request_ttl,
            deadline_before_event: config.transfer_deadline_before_event,
            transfer_fee: Money::ZERO,
        };
        let (tickets, tickets_rx) = TicketService::new(
            Arc::clone(&event_store),
            Arc::clone(&event_bus),
            Arc::clone(&clock),
            Arc::clone(&locks),
            policy,
        );
        let heuristics = ScanHeuristics {
            rapid_scan_window: config.rapid_scan_window,
            reentry_grace: config.reentry_grace,
        };
        let (entry, _entry_rx) = EntryService::new(
            Arc::clone(&event_store),
            Arc::clone(&event_bus),
            Arc::clone(&clock),
            Arc::clone(&locks),
            heuristics,
            Arc::clone(&tickets),
        );
        let (reconciler, reconciler_rx) = ReconcilerService::new(
            Arc::clone(&event_store),
            Arc::clone(&event_bus),
            Arc::clone(&clock),
            Arc::clone(&locks),
            Arc::clone(&collaborators.gateway),
        );

        let workers = vec![
            InventoryService::spawn_feedback_worker(Arc::clone(&inventory), inventory_rx),
            TicketService::spawn_feedback_worker(Arc::clone(&tickets), tickets_rx),
            ReconcilerService::spawn_feedback_worker(
                Arc::clone(&reconciler),
                reconciler_rx,
                Arc::clone(&tickets),
                retry_sink,
            ),
        ];

        Arc::new(Self {
            inventory,
            tickets,
            entry,
            reconciler,
            collaborators,
            config,
            clock,
            restrictions,
            registry: RwLock::new(HashMap::new()),
            workers,
        })
    }

    /// Wires the engine over an in-memory retry sink (tests, demos).
    #[must_use]
    pub fn in_process(
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Arc<Self> {
        Self::new(
            event_store,
            event_bus,
            clock,
            collaborators,
            config,
            Vec::new(),
            Arc::new(LogRetrySink),
        )
    }

    /// Background worker handles (feedback drains), for shutdown.
    #[must_use]
    pub fn workers(&self) -> &[JoinHandle<()>] {
        &self.workers
    }

    #[allow(clippy::expect_used)] // a poisoned registry is unrecoverable
    fn remember(&self, event_id: EventId, ticket_type_id: TicketTypeId) {
        self.registry
            .write()
            .expect("registry poisoned")
            .entry(event_id)
            .or_default()
            .insert(ticket_type_id);
    }

    #[allow(clippy::expect_used)] // a poisoned registry is unrecoverable
    fn known(&self) -> HashMap<EventId, HashSet<TicketTypeId>> {
        self.registry.read().expect("registry poisoned").clone()
    }

    /// Registers a ticket type and starts tracking its event.
    ///
    /// # Errors
    ///
    /// Propagates ledger rejections.
    pub async fn register_ticket_type(
        &self,
        ticket_type: TicketType,
    ) -> Result<TicketType, EngineError> {
        let event_id = ticket_type.event_id;
        let type_id = ticket_type.id;
        let registered = self.inventory.register_type(ticket_type).await?;
        self.remember(event_id, type_id);

        self.collaborators
            .audit
            .record(AuditEntry {
                actor: "engine".to_string(),
                action: "ticket_type.register".to_string(),
                entity_kind: "ticket_type".to_string(),
                entity_id: type_id.to_string(),
                before: None,
                after: serde_json::to_value(&registered).ok(),
                at: self.clock.now(),
            })
            .await;

        Ok(registered)
    }

    /// Quotes a purchase without touching inventory.
    ///
    /// # Errors
    ///
    /// Fails for unknown types and unavailable promo resolution.
    pub async fn quote(
        &self,
        ticket_type_id: TicketTypeId,
        quantity: u32,
        promo_code: Option<&str>,
    ) -> Result<PriceQuote, EngineError> {
        let ticket_type = self
            .inventory
            .ticket_type(ticket_type_id)
            .await?
            .ok_or_else(|| EngineError::not_found("ticket type", ticket_type_id))?;

        let promo = match promo_code {
            Some(code) => self
                .collaborators
                .promos
                .resolve(code, ticket_type_id, quantity)
                .await
                .map_err(EngineError::ExternalDependency)?,
            None => None,
        };

        pricing::compute_price(&ticket_type, quantity, promo)
    }

    /// Full purchase flow: eligibility gate, price, reserve, commit,
    /// issue, and mint submission.
    ///
    /// Issuance is partially-failure-tolerant: a failed unit never rolls
    /// back previously issued units; its inventory is released instead.
    /// A mint failure never rolls back the purchase; the local ticket
    /// is authoritative for entry while mirroring is pending.
    ///
    /// # Errors
    ///
    /// Fails with `Eligibility` (all failed rules collected),
    /// `InsufficientInventory`, `TypeMismatch`, or collaborator errors.
    #[allow(clippy::too_many_lines)] // The checkout flow reads top to bottom
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseOutcome, EngineError> {
        let now = self.clock.now();

        let ticket_type = self
            .inventory
            .ticket_type(request.ticket_type_id)
            .await?
            .ok_or_else(|| EngineError::not_found("ticket type", request.ticket_type_id))?;
        if ticket_type.event_id != request.event_id {
            return Err(EngineError::TypeMismatch {
                detail: format!(
                    "ticket type {} belongs to event {}",
                    ticket_type.id, ticket_type.event_id
                ),
            });
        }

        // Eligibility: collect the complete failure set
        let prior = self
            .inventory
            .prior_purchases(request.ticket_type_id, request.customer)
            .await?;
        let ctx = RestrictionContext {
            customer: request.customer,
            quantity: request.quantity,
            now,
            attributes: request.attributes.clone(),
        };
        let outcomes: Vec<RuleOutcome> = self
            .restrictions
            .iter()
            .map(|rule| rule.evaluate(&ctx))
            .collect();
        let report = pricing::check_eligibility(
            Some(&ticket_type),
            request.quantity,
            prior,
            now,
            request.early_access,
            outcomes,
        );
        let warnings = report.warnings.clone();
        if let Some(error) = report.into_error() {
            return Err(error);
        }

        // Price (promo resolved by the external collaborator)
        let promo = match request.promo_code.as_deref() {
            Some(code) => self
                .collaborators
                .promos
                .resolve(code, request.ticket_type_id, request.quantity)
                .await
                .map_err(EngineError::ExternalDependency)?,
            None => None,
        };
        let quote = pricing::compute_price(&ticket_type, request.quantity, promo)?;

        // Event context for validity windows
        let event_info = self
            .collaborators
            .directory
            .event(request.event_id)
            .await
            .map_err(EngineError::ExternalDependency)?
            .ok_or_else(|| EngineError::not_found("event", request.event_id))?;

        // Reserve, then commit once payment is confirmed (the caller's
        // precondition)
        let hold = self
            .inventory
            .reserve(
                request.ticket_type_id,
                request.customer,
                request.quantity,
                now + self.config.reservation_ttl,
            )
            .await?;
        self.inventory
            .commit_sale(request.ticket_type_id, hold.reservation_id)
            .await?;

        // Issue each unit independently
        let validity = ValidityWindow::for_event(now, event_info.starts_at, event_info.ends_at);
        let refund_deadline =
            Some(event_info.starts_at + Duration::seconds(ticket_type.refund_window_secs));
        let spec = IssueSpec {
            ticket_type_id: request.ticket_type_id,
            event_id: request.event_id,
            owner: request.customer,
            purchaser: request.customer,
            price_paid: ticket_type.base_price,
            fees_paid: ticket_type.fees.per_ticket_total(),
            seat: request.seat.clone(),
            validity,
            refund_deadline,
            transferable: ticket_type.transferable,
            max_transfers: ticket_type.max_transfers,
            resale_price_cap_bps: ticket_type.resale_price_cap_bps,
            acquisition: AcquisitionKind::Purchase,
            source_ref: Some(hold.reservation_id.to_string()),
        };
        let specs = vec![spec; request.quantity as usize];
        let (tickets, batch) = self.tickets.issue_batch(request.event_id, specs).await?;

        // Units that failed to issue release their inventory
        if batch.failed > 0 {
            tracing::warn!(
                failed = batch.failed,
                "partial issuance; releasing unissued inventory"
            );
            if let Err(error) = self
                .inventory
                .release(request.ticket_type_id, batch.failed, Some(request.customer))
                .await
            {
                tracing::error!(error = %error, "failed to release unissued inventory");
            }
        }

        // Mirror to the external ledger; failures queue for retry and
        // never roll back the local purchase
        for ticket in &tickets {
            let metadata = MintMetadata {
                name: format!("{} - {}", event_info.name, ticket_type.tier),
                event_id: request.event_id,
                ticket_number: ticket.number.clone(),
                owner: ticket.owner,
            };
            if let Err(error) = self.reconciler.request_mint(ticket.id, metadata).await {
                tracing::warn!(ticket = %ticket.id, error = %error, "mint submission deferred");
            }
        }

        self.collaborators
            .audit
            .record(AuditEntry {
                actor: request.customer.to_string(),
                action: "ticket.purchase".to_string(),
                entity_kind: "ticket_type".to_string(),
                entity_id: request.ticket_type_id.to_string(),
                before: None,
                after: serde_json::to_value(&batch).ok(),
                at: now,
            })
            .await;

        Ok(PurchaseOutcome {
            reservation_id: hold.reservation_id,
            quote,
            tickets,
            batch,
            warnings,
        })
    }

    /// Transfer flow: state-machine completion locally, then the
    /// dependent external mirror through the reconciler.
    ///
    /// # Errors
    ///
    /// Propagates policy and state-machine rejections.
    pub async fn transfer(
        &self,
        event_id: EventId,
        ticket_id: crate::types::TicketId,
        from: CustomerId,
        to: CustomerId,
        kind: TransferKind,
        price: Option<Money>,
    ) -> Result<TransferOutcome, EngineError> {
        let outcome = self
            .tickets
            .initiate_transfer(event_id, ticket_id, from, to, kind, price)
            .await?;

        if outcome.request.status == crate::types::TransferRequestStatus::Completed {
            // Dependent write: the external mirror is tracked, not
            // fire-and-forget; drift surfaces at reconciliation
            if let Err(error) = self
                .reconciler
                .request_transfer_sync(ticket_id, to, to.to_string())
                .await
            {
                tracing::warn!(ticket = %ticket_id, error = %error, "transfer mirror deferred");
            }
        }

        self.collaborators
            .audit
            .record(AuditEntry {
                actor: from.to_string(),
                action: "ticket.transfer".to_string(),
                entity_kind: "ticket".to_string(),
                entity_id: ticket_id.to_string(),
                before: None,
                after: serde_json::to_value(&outcome.request).ok(),
                at: self.clock.now(),
            })
            .await;

        Ok(outcome)
    }

    /// Refund flow: terminal transition, inventory credit, external
    /// burn.
    ///
    /// # Errors
    ///
    /// Rejects closed refund windows and invalid transitions.
    pub async fn refund(
        &self,
        event_id: EventId,
        ticket_id: crate::types::TicketId,
    ) -> Result<Ticket, EngineError> {
        let ticket = self.tickets.refund(event_id, ticket_id).await?;

        if let Err(error) = self
            .inventory
            .release(ticket.ticket_type_id, 1, Some(ticket.original_purchaser))
            .await
        {
            tracing::error!(error = %error, "failed to credit refunded inventory");
        }
        if ticket.nft_asset.is_some() {
            if let Err(error) = self.reconciler.request_burn(ticket_id).await {
                tracing::warn!(ticket = %ticket_id, error = %error, "burn submission deferred");
            }
        }

        Ok(ticket)
    }

    /// Entry validation at a venue checkpoint.
    ///
    /// # Errors
    ///
    /// Propagates lock contention or storage failures; a rejected scan
    /// is a successful call with `valid == false`.
    pub async fn validate_entry(
        &self,
        event_id: EventId,
        ticket_id: crate::types::TicketId,
        location: &str,
        validator: &str,
    ) -> Result<ScanVerdict, EngineError> {
        self.entry
            .validate_entry(event_id, ticket_id, location, validator)
            .await
    }

    /// One reconciliation pass over every known event's tickets.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn reconcile_now(&self) -> Result<Vec<Discrepancy>, EngineError> {
        let mut observations = Vec::new();
        for event_id in self.known().keys() {
            for ticket in self.tickets.tickets_for_event(*event_id).await? {
                observations.push(LocalTicketView {
                    ticket_id: ticket.id,
                    owner: ticket.owner,
                    status: ticket.status,
                    minted: ticket.nft_asset.is_some(),
                });
            }
        }
        self.reconciler.reconcile(observations).await
    }

    /// Spawns the periodic sweeps (reservation and transfer expiry) and
    /// the reconciliation cadence.
    pub fn start_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let sweeper = Arc::clone(self);
        let sweep = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweeper.config.sweep_interval);
            loop {
                interval.tick().await;
                for (event_id, types) in sweeper.known() {
                    for type_id in types {
                        if let Err(error) = sweeper.inventory.sweep_expired(type_id).await {
                            tracing::warn!(error = %error, "reservation sweep failed");
                        }
                    }
                    if let Err(error) = sweeper.tickets.sweep_expired_transfers(event_id).await {
                        tracing::warn!(error = %error, "transfer sweep failed");
                    }
                }
            }
        });

        let reconciling = Arc::clone(self);
        let reconcile = tokio::spawn(async move {
            let mut interval = tokio::time::interval(reconciling.config.reconcile_interval);
            loop {
                interval.tick().await;
                match reconciling.reconcile_now().await {
                    Ok(discrepancies) if !discrepancies.is_empty() => {
                        tracing::warn!(
                            total = discrepancies.len(),
                            "reconciliation pass found drift"
                        );
                    }
                    Ok(_) => {}
                    Err(error) => tracing::warn!(error = %error, "reconciliation pass failed"),
                }
            }
        });

        vec![sweep, reconcile]
    }
}

// ============================================================================
// Production wiring
// ============================================================================

/// Adapter parking failed submissions in the persistent Postgres queue.
pub struct PostgresRetrySink {
    queue: stagepass_postgres::MintRetryQueue,
}

impl PostgresRetrySink {
    /// Wraps a retry queue.
    #[must_use]
    pub const fn new(queue: stagepass_postgres::MintRetryQueue) -> Self {
        Self { queue }
    }
}

#[async_trait::async_trait]
impl RetrySink for PostgresRetrySink {
    async fn park(
        &self,
        ticket_id: crate::types::TicketId,
        kind: crate::aggregates::reconciler::ExternalOpKind,
        detail: &str,
    ) {
        use crate::aggregates::reconciler::ExternalOpKind;
        use stagepass_postgres::SubmissionKind;

        let kind = match kind {
            ExternalOpKind::Mint => SubmissionKind::Mint,
            ExternalOpKind::Transfer => SubmissionKind::Transfer,
            ExternalOpKind::Burn => SubmissionKind::Burn,
        };
        let payload = serde_json::json!({ "ticket_id": ticket_id.to_string() });
        if let Err(error) = self
            .queue
            .add_entry(&ticket_id.to_string(), kind, &payload, detail, 0)
            .await
        {
            tracing::error!(error = %error, "failed to park submission for retry");
        }
    }
}

impl Engine {
    /// Connects the engine to `PostgreSQL` per the configuration, with
    /// the persistent retry queue wired into the reconciler.
    ///
    /// # Errors
    ///
    /// Fails when the database is unreachable or the schema cannot be
    /// created.
    pub async fn connect_postgres(
        config: &Config,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
        restrictions: Vec<Arc<dyn RestrictionRule>>,
    ) -> Result<Arc<Self>, EngineError> {
        let store = stagepass_postgres::PostgresEventStore::connect(
            &config.postgres.url,
            config.postgres.max_connections,
        )
        .await
        .map_err(|e| EngineError::ExternalDependency(e.to_string()))?;
        store
            .ensure_schema()
            .await
            .map_err(|e| EngineError::ExternalDependency(e.to_string()))?;

        let queue = stagepass_postgres::MintRetryQueue::new(store.pool().clone());
        queue
            .ensure_schema()
            .await
            .map_err(|e| EngineError::ExternalDependency(e.to_string()))?;

        Ok(Self::new(
            Arc::new(store),
            event_bus,
            clock,
            collaborators,
            config.engine.clone(),
            restrictions,
            Arc::new(PostgresRetrySink::new(queue)),
        ))
    }
}
