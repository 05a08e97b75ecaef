//! Aggregate services: command handlers that persist and publish events.
//!
//! Each service owns the write path for one aggregate:
//!
//! 1. Acquire the per-stream lock with a bounded wait (contention that
//!    cannot be resolved in time surfaces as a conflict, never a silent
//!    retry loop)
//! 2. Load the stream and rebuild state
//! 3. Execute the reducer with the command
//! 4. Run the resulting effects (append to the store, publish, schedule
//!    delays)
//! 5. Return the structured result
//!
//! Delayed actions (reservation and transfer expiry, mint confirmations)
//! come back through a feedback channel drained by a per-service worker.

use crate::aggregates::entry::EntryEnvironment;
use crate::aggregates::inventory::InventoryEnvironment;
use crate::aggregates::reconciler::{ExternalOpKind, ReconcilerEnvironment};
use crate::aggregates::ticket::TicketEnvironment;
use crate::aggregates::{
    EntryAction, EntryReducer, InventoryAction, InventoryReducer, IssueSpec, ReconcilerAction,
    ReconcilerReducer, ScanHeuristics, TicketAction, TicketReducer, TransferPolicy,
};
use crate::collaborators::MintMetadata;
use crate::errors::EngineError;
use crate::events::EngineEvent;
use crate::types::{
    BatchReport, CustomerId, Discrepancy, EntryState, EventId, InventoryState, LocalTicketView,
    MAX_BATCH_ISSUE, Money, ReconcilerState, ReservationHold, ReservationId, ScanVerdict, Ticket,
    TicketId, TicketState, TicketType, TicketTypeId, TicketTypeStatus, TicketView,
    TransferRequest, TransferRequestStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use stagepass_core::environment::Clock;
use stagepass_core::event_bus::EventBus;
use stagepass_core::event_store::EventStore;
use stagepass_core::executor::EffectExecutor;
use stagepass_core::reducer::Reducer;
use stagepass_core::stream::StreamId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

// ============================================================================
// Stream locks
// ============================================================================

/// Per-stream exclusive locks with a bounded acquisition wait.
///
/// One lock per stream key serializes all writers to a ticket type (or
/// an event's tickets) for the duration of the read-modify-write, which
/// is what makes the sum invariant hold under concurrent purchases of
/// the last unit. Independent streams proceed fully in parallel.
pub struct StreamLocks {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    wait: Duration,
}

impl StreamLocks {
    /// Creates a lock table with the given bounded wait.
    #[must_use]
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
            wait,
        }
    }

    /// Acquires the lock for a stream key, or fails with
    /// [`EngineError::LockContention`] after the bounded wait.
    ///
    /// # Errors
    ///
    /// Returns `LockContention` when the wait expires.
    #[allow(clippy::expect_used)] // a poisoned lock table is unrecoverable
    pub async fn acquire(
        &self,
        key: &str,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, EngineError> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock table poisoned");
            Arc::clone(locks.entry(key.to_string()).or_default())
        };

        tokio::time::timeout(self.wait, lock.lock_owned())
            .await
            .map_err(|_| EngineError::LockContention(key.to_string()))
    }
}

fn infra(error: impl ToString) -> EngineError {
    EngineError::ExternalDependency(error.to_string())
}

// ============================================================================
// Inventory service
// ============================================================================

/// Write path for the Inventory Ledger aggregate. One stream per ticket
/// type.
pub struct InventoryService {
    event_store: Arc<dyn EventStore>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    locks: Arc<StreamLocks>,
    executor: EffectExecutor<InventoryAction>,
    reducer: InventoryReducer,
}

impl InventoryService {
    /// Creates the service and its feedback channel.
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        locks: Arc<StreamLocks>,
    ) -> (Arc<Self>, UnboundedReceiver<InventoryAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            event_store,
            event_bus,
            clock,
            locks,
            executor: EffectExecutor::new(tx),
            reducer: InventoryReducer::new(),
        });
        (service, rx)
    }

    /// Drains delayed actions (reservation expiry) back into the
    /// aggregate.
    pub fn spawn_feedback_worker(
        service: Arc<Self>,
        mut rx: UnboundedReceiver<InventoryAction>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(action) = rx.recv().await {
                let Some(type_id) = Self::routing_key(&action) else {
                    continue;
                };
                if let Err(error) = service.handle(type_id, action).await {
                    tracing::debug!(error = %error, "inventory feedback action dropped");
                }
            }
        })
    }

    const fn routing_key(action: &InventoryAction) -> Option<TicketTypeId> {
        match action {
            InventoryAction::Reserve { ticket_type_id, .. }
            | InventoryAction::CommitSale { ticket_type_id, .. }
            | InventoryAction::ReleaseReservation { ticket_type_id, .. }
            | InventoryAction::ExpireReservation { ticket_type_id, .. }
            | InventoryAction::Release { ticket_type_id, .. }
            | InventoryAction::SetTypeStatus { ticket_type_id, .. }
            | InventoryAction::SweepExpired { ticket_type_id } => Some(*ticket_type_id),
            _ => None,
        }
    }

    fn stream_for(ticket_type_id: &TicketTypeId) -> StreamId {
        StreamId::new(format!("ticket-type-{ticket_type_id}"))
    }

    fn environment(&self, stream_id: StreamId) -> InventoryEnvironment {
        InventoryEnvironment::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.event_store),
            Arc::clone(&self.event_bus),
            stream_id,
        )
    }

    async fn load(
        &self,
        stream_id: &StreamId,
        env: &InventoryEnvironment,
    ) -> Result<InventoryState, EngineError> {
        let events = self
            .event_store
            .load_events(stream_id.clone(), None)
            .await
            .map_err(infra)?;

        let mut state = InventoryState::new();
        for event in &events {
            if let EngineEvent::Inventory(action) =
                EngineEvent::deserialize(event).map_err(infra)?
            {
                self.reducer.reduce(&mut state, action, env);
            }
        }
        Ok(state)
    }

    /// Handles one command under the type's stream lock.
    ///
    /// # Errors
    ///
    /// Propagates the reducer's rejection, lock contention, or storage
    /// failures.
    pub async fn handle(
        &self,
        ticket_type_id: TicketTypeId,
        action: InventoryAction,
    ) -> Result<InventoryState, EngineError> {
        let stream_id = Self::stream_for(&ticket_type_id);
        let _guard = self.locks.acquire(stream_id.as_str()).await?;

        let env = self.environment(stream_id.clone());
        let mut state = self.load(&stream_id, &env).await?;

        let effects = self.reducer.reduce(&mut state, action, &env);
        self.executor.run_all(effects).await;

        match state.last_error.take() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }

    /// Registers a new ticket type.
    ///
    /// # Errors
    ///
    /// Rejects duplicates and malformed configurations.
    pub async fn register_type(&self, ticket_type: TicketType) -> Result<TicketType, EngineError> {
        let type_id = ticket_type.id;
        let state = self
            .handle(type_id, InventoryAction::RegisterType { ticket_type })
            .await?;
        state
            .get_type(&type_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("ticket type", type_id))
    }

    /// Reserves units, returning the created hold.
    ///
    /// # Errors
    ///
    /// Fails with `InsufficientInventory` or `InvalidTypeState` per the
    /// ledger contract.
    pub async fn reserve(
        &self,
        ticket_type_id: TicketTypeId,
        customer_id: CustomerId,
        quantity: u32,
        expires_at: DateTime<Utc>,
    ) -> Result<ReservationHold, EngineError> {
        let reservation_id = ReservationId::new();
        let state = self
            .handle(
                ticket_type_id,
                InventoryAction::Reserve {
                    reservation_id,
                    ticket_type_id,
                    customer_id,
                    quantity,
                    expires_at,
                },
            )
            .await?;
        metrics::counter!("stagepass_reservations_total", "outcome" => "reserved").increment(1);
        state
            .holds
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("reservation", reservation_id))
    }

    /// Converts a hold into a confirmed sale.
    ///
    /// # Errors
    ///
    /// Fails when the hold is unknown or scoped to a different type.
    pub async fn commit_sale(
        &self,
        ticket_type_id: TicketTypeId,
        reservation_id: ReservationId,
    ) -> Result<TicketType, EngineError> {
        let state = self
            .handle(
                ticket_type_id,
                InventoryAction::CommitSale {
                    ticket_type_id,
                    reservation_id,
                },
            )
            .await?;
        metrics::counter!("stagepass_reservations_total", "outcome" => "committed").increment(1);
        state
            .get_type(&ticket_type_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("ticket type", ticket_type_id))
    }

    /// Returns a hold to the available pool (idempotent).
    ///
    /// # Errors
    ///
    /// Propagates lock contention or storage failures only.
    pub async fn release_reservation(
        &self,
        ticket_type_id: TicketTypeId,
        reservation_id: ReservationId,
    ) -> Result<(), EngineError> {
        self.handle(
            ticket_type_id,
            InventoryAction::ReleaseReservation {
                ticket_type_id,
                reservation_id,
            },
        )
        .await?;
        metrics::counter!("stagepass_reservations_total", "outcome" => "released").increment(1);
        Ok(())
    }

    /// Returns sold units to the available pool after refund/cancel.
    ///
    /// # Errors
    ///
    /// Rejects amounts above the sold count.
    pub async fn release(
        &self,
        ticket_type_id: TicketTypeId,
        quantity: u32,
        customer_id: Option<CustomerId>,
    ) -> Result<TicketType, EngineError> {
        let state = self
            .handle(
                ticket_type_id,
                InventoryAction::Release {
                    ticket_type_id,
                    quantity,
                    customer_id,
                },
            )
            .await?;
        state
            .get_type(&ticket_type_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("ticket type", ticket_type_id))
    }

    /// Pauses, resumes, or retires a type.
    ///
    /// # Errors
    ///
    /// Rejects changes to retired types and manual sold-out.
    pub async fn set_type_status(
        &self,
        ticket_type_id: TicketTypeId,
        status: TicketTypeStatus,
    ) -> Result<TicketType, EngineError> {
        let state = self
            .handle(
                ticket_type_id,
                InventoryAction::SetTypeStatus {
                    ticket_type_id,
                    status,
                },
            )
            .await?;
        state
            .get_type(&ticket_type_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("ticket type", ticket_type_id))
    }

    /// Releases every lapsed hold for a type.
    ///
    /// # Errors
    ///
    /// Propagates lock contention or storage failures only.
    pub async fn sweep_expired(&self, ticket_type_id: TicketTypeId) -> Result<(), EngineError> {
        self.handle(ticket_type_id, InventoryAction::SweepExpired { ticket_type_id })
            .await?;
        Ok(())
    }

    /// Dirty read of a ticket type (no lock; eligibility checks
    /// re-validate under the lock at reserve time).
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn ticket_type(
        &self,
        ticket_type_id: TicketTypeId,
    ) -> Result<Option<TicketType>, EngineError> {
        let stream_id = Self::stream_for(&ticket_type_id);
        let env = self.environment(stream_id.clone());
        let state = self.load(&stream_id, &env).await?;
        Ok(state.get_type(&ticket_type_id).cloned())
    }

    /// Dirty read of a customer's lifetime purchase count for a type.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn prior_purchases(
        &self,
        ticket_type_id: TicketTypeId,
        customer_id: CustomerId,
    ) -> Result<u32, EngineError> {
        let stream_id = Self::stream_for(&ticket_type_id);
        let env = self.environment(stream_id.clone());
        let state = self.load(&stream_id, &env).await?;
        Ok(state.prior_purchases(&ticket_type_id, &customer_id))
    }
}

// ============================================================================
// Ticket service
// ============================================================================

/// Structured result of a transfer operation: the request plus the
/// updated ticket snapshot.
#[derive(Clone, Debug)]
pub struct TransferOutcome {
    /// The request after this operation
    pub request: TransferRequest,
    /// The ticket after this operation
    pub ticket: Ticket,
}

/// Write path for the Ticket aggregate. One stream per event, so ticket
/// numbering sequences and transfers within an event are linearized.
pub struct TicketService {
    event_store: Arc<dyn EventStore>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    locks: Arc<StreamLocks>,
    executor: EffectExecutor<TicketAction>,
    reducer: TicketReducer,
    policy: TransferPolicy,
}

impl TicketService {
    /// Creates the service and its feedback channel.
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        locks: Arc<StreamLocks>,
        policy: TransferPolicy,
    ) -> (Arc<Self>, UnboundedReceiver<TicketAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            event_store,
            event_bus,
            clock,
            locks,
            executor: EffectExecutor::new(tx),
            reducer: TicketReducer::new(),
            policy,
        });
        (service, rx)
    }

    /// Drains delayed actions (transfer expiry) back into the aggregate.
    pub fn spawn_feedback_worker(
        service: Arc<Self>,
        mut rx: UnboundedReceiver<TicketAction>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(action) = rx.recv().await {
                let TicketAction::ExpireTransfer { event_id, .. } = &action else {
                    continue;
                };
                let event_id = *event_id;
                if let Err(error) = service.handle(event_id, action).await {
                    tracing::debug!(error = %error, "ticket feedback action dropped");
                }
            }
        })
    }

    fn stream_for(event_id: &EventId) -> StreamId {
        StreamId::new(format!("tickets-{event_id}"))
    }

    fn environment(&self, stream_id: StreamId) -> TicketEnvironment {
        TicketEnvironment::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.event_store),
            Arc::clone(&self.event_bus),
            stream_id,
            self.policy.clone(),
        )
    }

    async fn load(
        &self,
        stream_id: &StreamId,
        env: &TicketEnvironment,
    ) -> Result<TicketState, EngineError> {
        let events = self
            .event_store
            .load_events(stream_id.clone(), None)
            .await
            .map_err(infra)?;

        let mut state = TicketState::new();
        for event in &events {
            if let EngineEvent::Ticket(action) = EngineEvent::deserialize(event).map_err(infra)? {
                self.reducer.reduce(&mut state, action, env);
            }
        }
        Ok(state)
    }

    /// Handles one command under the event's stream lock.
    ///
    /// # Errors
    ///
    /// Propagates the reducer's rejection, lock contention, or storage
    /// failures.
    pub async fn handle(
        &self,
        event_id: EventId,
        action: TicketAction,
    ) -> Result<TicketState, EngineError> {
        let stream_id = Self::stream_for(&event_id);
        let _guard = self.locks.acquire(stream_id.as_str()).await?;

        let env = self.environment(stream_id.clone());
        let mut state = self.load(&stream_id, &env).await?;

        let effects = self.reducer.reduce(&mut state, action, &env);
        self.executor.run_all(effects).await;

        match state.last_error.take() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }

    /// Issues one ticket. Inventory must already be decremented.
    ///
    /// # Errors
    ///
    /// Fails with `DuplicateIdentifier` on generation collisions.
    pub async fn issue(&self, event_id: EventId, spec: IssueSpec) -> Result<Ticket, EngineError> {
        let state = self
            .handle(event_id, TicketAction::IssueTicket { spec })
            .await?;
        let issued = state
            .last_issued
            .and_then(|id| state.get(&id).cloned())
            .ok_or_else(|| EngineError::not_found("ticket", "just issued"))?;
        metrics::counter!("stagepass_tickets_issued_total").increment(1);
        Ok(issued)
    }

    /// Bulk issuance: each unit succeeds or fails independently, and a
    /// failure never rolls back previously issued units; reserved
    /// inventory is consumed per unit.
    ///
    /// # Errors
    ///
    /// Rejects batches above [`MAX_BATCH_ISSUE`] up front; per-unit
    /// failures are reported in the batch report instead.
    pub async fn issue_batch(
        &self,
        event_id: EventId,
        specs: Vec<IssueSpec>,
    ) -> Result<(Vec<Ticket>, BatchReport), EngineError> {
        if specs.len() as u32 > MAX_BATCH_ISSUE {
            return Err(EngineError::Validation(format!(
                "batch of {} exceeds the {MAX_BATCH_ISSUE}-unit ceiling",
                specs.len()
            )));
        }

        let mut tickets = Vec::with_capacity(specs.len());
        let mut report = BatchReport::default();
        for spec in specs {
            report.processed += 1;
            match self.issue(event_id, spec).await {
                Ok(ticket) => {
                    report.successful += 1;
                    tickets.push(ticket);
                }
                Err(error) => {
                    report.failed += 1;
                    report.errors.push(error.to_string());
                }
            }
        }
        Ok((tickets, report))
    }

    /// Starts (and possibly completes) a transfer.
    ///
    /// # Errors
    ///
    /// Propagates policy and state-machine rejections.
    pub async fn initiate_transfer(
        &self,
        event_id: EventId,
        ticket_id: TicketId,
        from: CustomerId,
        to: CustomerId,
        kind: crate::types::TransferKind,
        price: Option<Money>,
    ) -> Result<TransferOutcome, EngineError> {
        let state = self
            .handle(
                event_id,
                TicketAction::InitiateTransfer {
                    ticket_id,
                    from,
                    to,
                    kind,
                    price,
                },
            )
            .await?;
        Self::transfer_outcome(&state, ticket_id)
    }

    /// Approves a pending transfer, re-running the completion logic.
    ///
    /// # Errors
    ///
    /// Rejects unknown, resolved, or lapsed requests.
    pub async fn approve_transfer(
        &self,
        event_id: EventId,
        transfer_id: crate::types::TransferId,
        approver: impl Into<String>,
    ) -> Result<TransferOutcome, EngineError> {
        let state = self
            .handle(
                event_id,
                TicketAction::ApproveTransfer {
                    transfer_id,
                    approver: approver.into(),
                },
            )
            .await?;
        let request = state
            .transfers
            .get(&transfer_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("transfer", transfer_id))?;
        Self::transfer_outcome(&state, request.ticket_id)
    }

    /// Rejects a pending transfer; the ticket is untouched.
    ///
    /// # Errors
    ///
    /// Rejects unknown or resolved requests.
    pub async fn reject_transfer(
        &self,
        event_id: EventId,
        transfer_id: crate::types::TransferId,
        reason: impl Into<String>,
    ) -> Result<TransferRequest, EngineError> {
        let state = self
            .handle(
                event_id,
                TicketAction::RejectTransfer {
                    transfer_id,
                    reason: reason.into(),
                },
            )
            .await?;
        metrics::counter!("stagepass_transfers_total", "status" => "rejected").increment(1);
        state
            .transfers
            .get(&transfer_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("transfer", transfer_id))
    }

    /// Withdraws a pending transfer.
    ///
    /// # Errors
    ///
    /// Rejects unknown or resolved requests.
    pub async fn cancel_transfer(
        &self,
        event_id: EventId,
        transfer_id: crate::types::TransferId,
    ) -> Result<TransferRequest, EngineError> {
        let state = self
            .handle(event_id, TicketAction::CancelTransfer { transfer_id })
            .await?;
        metrics::counter!("stagepass_transfers_total", "status" => "cancelled").increment(1);
        state
            .transfers
            .get(&transfer_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("transfer", transfer_id))
    }

    /// Applies the terminal used transition after admission.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidTransition` outside the table.
    pub async fn mark_used(
        &self,
        event_id: EventId,
        ticket_id: TicketId,
    ) -> Result<Ticket, EngineError> {
        let state = self
            .handle(event_id, TicketAction::MarkUsed { ticket_id })
            .await?;
        Self::snapshot(&state, ticket_id)
    }

    /// Refunds a ticket within its refund window.
    ///
    /// # Errors
    ///
    /// Rejects closed windows and invalid transitions.
    pub async fn refund(
        &self,
        event_id: EventId,
        ticket_id: TicketId,
    ) -> Result<Ticket, EngineError> {
        let state = self
            .handle(event_id, TicketAction::Refund { ticket_id })
            .await?;
        Self::snapshot(&state, ticket_id)
    }

    /// Cancels a ticket.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidTransition` outside the table.
    pub async fn cancel_ticket(
        &self,
        event_id: EventId,
        ticket_id: TicketId,
    ) -> Result<Ticket, EngineError> {
        let state = self
            .handle(event_id, TicketAction::CancelTicket { ticket_id })
            .await?;
        Self::snapshot(&state, ticket_id)
    }

    /// Voids a ticket.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidTransition` outside the table.
    pub async fn void_ticket(
        &self,
        event_id: EventId,
        ticket_id: TicketId,
    ) -> Result<Ticket, EngineError> {
        let state = self
            .handle(event_id, TicketAction::VoidTicket { ticket_id })
            .await?;
        Self::snapshot(&state, ticket_id)
    }

    /// Counts an admitted scan on the ticket.
    ///
    /// # Errors
    ///
    /// Rejects unscannable statuses.
    pub async fn record_scan(
        &self,
        event_id: EventId,
        ticket_id: TicketId,
    ) -> Result<Ticket, EngineError> {
        let at = self.clock.now();
        let state = self
            .handle(event_id, TicketAction::RecordScan { ticket_id, at })
            .await?;
        Self::snapshot(&state, ticket_id)
    }

    /// Binds the confirmed external asset id to the ticket.
    ///
    /// # Errors
    ///
    /// Rejects unknown tickets and empty asset ids.
    pub async fn record_mint_asset(
        &self,
        event_id: EventId,
        ticket_id: TicketId,
        asset_id: String,
    ) -> Result<(), EngineError> {
        self.handle(
            event_id,
            TicketAction::RecordMintAsset {
                ticket_id,
                asset_id,
            },
        )
        .await?;
        Ok(())
    }

    /// Expires every lapsed pending transfer for an event.
    ///
    /// # Errors
    ///
    /// Propagates lock contention or storage failures only.
    pub async fn sweep_expired_transfers(&self, event_id: EventId) -> Result<(), EngineError> {
        self.handle(event_id, TicketAction::SweepExpiredTransfers)
            .await?;
        Ok(())
    }

    /// Dirty read of one ticket.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn ticket(
        &self,
        event_id: EventId,
        ticket_id: TicketId,
    ) -> Result<Option<Ticket>, EngineError> {
        let stream_id = Self::stream_for(&event_id);
        let env = self.environment(stream_id.clone());
        let state = self.load(&stream_id, &env).await?;
        Ok(state.get(&ticket_id).cloned())
    }

    /// Dirty read of a ticket's complete ownership chain, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn ownership_chain(
        &self,
        event_id: EventId,
        ticket_id: TicketId,
    ) -> Result<Vec<crate::types::OwnershipRecord>, EngineError> {
        let stream_id = Self::stream_for(&event_id);
        let env = self.environment(stream_id.clone());
        let state = self.load(&stream_id, &env).await?;
        Ok(state.ownership.get(&ticket_id).cloned().unwrap_or_default())
    }

    /// Dirty read of every ticket for an event.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn tickets_for_event(&self, event_id: EventId) -> Result<Vec<Ticket>, EngineError> {
        let stream_id = Self::stream_for(&event_id);
        let env = self.environment(stream_id.clone());
        let state = self.load(&stream_id, &env).await?;
        Ok(state.tickets.values().cloned().collect())
    }

    fn snapshot(state: &TicketState, ticket_id: TicketId) -> Result<Ticket, EngineError> {
        state
            .get(&ticket_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("ticket", ticket_id))
    }

    fn transfer_outcome(
        state: &TicketState,
        ticket_id: TicketId,
    ) -> Result<TransferOutcome, EngineError> {
        let request = state
            .last_transfer
            .and_then(|id| state.transfers.get(&id))
            .cloned()
            .ok_or_else(|| EngineError::not_found("transfer", ticket_id))?;
        if request.status == TransferRequestStatus::Completed {
            metrics::counter!("stagepass_transfers_total", "status" => "completed").increment(1);
        }
        let ticket = Self::snapshot(state, ticket_id)?;
        Ok(TransferOutcome { request, ticket })
    }
}

// ============================================================================
// Entry service
// ============================================================================

/// Write path for the Entry Validation aggregate, coordinating with the
/// ticket aggregate for counters and the terminal used transition.
pub struct EntryService {
    event_store: Arc<dyn EventStore>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    locks: Arc<StreamLocks>,
    executor: EffectExecutor<EntryAction>,
    reducer: EntryReducer,
    heuristics: ScanHeuristics,
    tickets: Arc<TicketService>,
}

impl EntryService {
    /// Creates the service and its feedback channel.
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        locks: Arc<StreamLocks>,
        heuristics: ScanHeuristics,
        tickets: Arc<TicketService>,
    ) -> (Arc<Self>, UnboundedReceiver<EntryAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            event_store,
            event_bus,
            clock,
            locks,
            executor: EffectExecutor::new(tx),
            reducer: EntryReducer::new(),
            heuristics,
            tickets,
        });
        (service, rx)
    }

    fn stream_for(event_id: &EventId) -> StreamId {
        StreamId::new(format!("entry-{event_id}"))
    }

    fn environment(&self, stream_id: StreamId) -> EntryEnvironment {
        EntryEnvironment::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.event_store),
            Arc::clone(&self.event_bus),
            stream_id,
            self.heuristics,
        )
    }

    async fn load(
        &self,
        stream_id: &StreamId,
        env: &EntryEnvironment,
    ) -> Result<EntryState, EngineError> {
        let events = self
            .event_store
            .load_events(stream_id.clone(), None)
            .await
            .map_err(infra)?;

        let mut state = EntryState::new();
        for event in &events {
            if let EngineEvent::Entry(action) = EngineEvent::deserialize(event).map_err(infra)? {
                self.reducer.reduce(&mut state, action, env);
            }
        }
        Ok(state)
    }

    /// Validates a ticket at a checkpoint and applies the follow-up
    /// writes: scan counters on success, the terminal used transition
    /// when single-entry enforcement trips.
    ///
    /// # Errors
    ///
    /// Propagates lock contention or storage failures; a rejected scan
    /// is a successful call with `valid == false`.
    pub async fn validate_entry(
        &self,
        event_id: EventId,
        ticket_id: TicketId,
        location: impl Into<String>,
        validator: impl Into<String>,
    ) -> Result<ScanVerdict, EngineError> {
        let view = self
            .tickets
            .ticket(event_id, ticket_id)
            .await?
            .map(|ticket| TicketView::from(&ticket));

        let stream_id = Self::stream_for(&event_id);
        let verdict = {
            let _guard = self.locks.acquire(stream_id.as_str()).await?;
            let env = self.environment(stream_id.clone());
            let mut state = self.load(&stream_id, &env).await?;

            let effects = self.reducer.reduce(
                &mut state,
                EntryAction::ValidateEntry {
                    ticket_id,
                    ticket: view,
                    location: location.into(),
                    validator: validator.into(),
                },
                &env,
            );
            self.executor.run_all(effects).await;

            if let Some(error) = state.last_error.take() {
                return Err(error);
            }
            state
                .last_verdict
                .ok_or_else(|| infra("validation produced no verdict"))?
        };

        if verdict.entry_allowed {
            self.tickets.record_scan(event_id, ticket_id).await?;
        }
        if verdict.mark_used {
            if let Err(error) = self.tickets.mark_used(event_id, ticket_id).await {
                tracing::warn!(ticket = %ticket_id, error = %error, "used transition failed");
            }
        }

        metrics::counter!("stagepass_scans_total", "outcome" => verdict.outcome.to_string())
            .increment(1);
        Ok(verdict)
    }
}

// ============================================================================
// Reconciler service
// ============================================================================

/// Where failed external submissions are parked for retry.
#[async_trait]
pub trait RetrySink: Send + Sync {
    /// Record a failed submission for later retry.
    async fn park(&self, ticket_id: TicketId, kind: ExternalOpKind, detail: &str);
}

/// Retry sink that only logs; the default outside production.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogRetrySink;

#[async_trait]
impl RetrySink for LogRetrySink {
    async fn park(&self, ticket_id: TicketId, kind: ExternalOpKind, detail: &str) {
        tracing::warn!(ticket = %ticket_id, kind = ?kind, detail, "submission parked for retry");
    }
}

/// Write path for the Reconciler aggregate. A single stream mirrors the
/// external ledger.
pub struct ReconcilerService {
    event_store: Arc<dyn EventStore>,
    event_bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    locks: Arc<StreamLocks>,
    executor: EffectExecutor<ReconcilerAction>,
    reducer: ReconcilerReducer,
    gateway: Arc<dyn crate::collaborators::MintGateway>,
}

impl ReconcilerService {
    const STREAM: &'static str = "external-ledger";

    /// Creates the service and its feedback channel.
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        locks: Arc<StreamLocks>,
        gateway: Arc<dyn crate::collaborators::MintGateway>,
    ) -> (Arc<Self>, UnboundedReceiver<ReconcilerAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            event_store,
            event_bus,
            clock,
            locks,
            executor: EffectExecutor::new(tx),
            reducer: ReconcilerReducer::new(),
            gateway,
        });
        (service, rx)
    }

    /// Drains confirmations and failures from in-flight submissions:
    /// applies them to the aggregate, binds confirmed assets to their
    /// tickets, and parks failures in the retry sink.
    pub fn spawn_feedback_worker(
        service: Arc<Self>,
        mut rx: UnboundedReceiver<ReconcilerAction>,
        tickets: Arc<TicketService>,
        retry_sink: Arc<dyn RetrySink>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(action) = rx.recv().await {
                let follow_up = action.clone();
                if let Err(error) = service.handle(action).await {
                    tracing::debug!(error = %error, "reconciler feedback action dropped");
                    continue;
                }

                match follow_up {
                    ReconcilerAction::MintConfirmed {
                        ticket_id,
                        event_id,
                        asset_id,
                        ..
                    } => {
                        metrics::counter!("stagepass_mint_submissions_total", "result" => "confirmed")
                            .increment(1);
                        if let Err(error) = tickets
                            .record_mint_asset(event_id, ticket_id, asset_id)
                            .await
                        {
                            tracing::warn!(
                                ticket = %ticket_id,
                                error = %error,
                                "failed to bind confirmed asset"
                            );
                        }
                    }
                    ReconcilerAction::SubmissionFailed {
                        ticket_id,
                        kind,
                        detail,
                        ..
                    } => {
                        metrics::counter!("stagepass_mint_submissions_total", "result" => "failed")
                            .increment(1);
                        retry_sink.park(ticket_id, kind, &detail).await;
                    }
                    _ => {}
                }
            }
        })
    }

    fn environment(&self) -> ReconcilerEnvironment {
        ReconcilerEnvironment::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.event_store),
            Arc::clone(&self.event_bus),
            StreamId::new(Self::STREAM),
            Arc::clone(&self.gateway),
        )
    }

    /// Handles one command under the ledger stream lock.
    ///
    /// The gateway submission effects produced by the reducer run
    /// *after* the lock is released; the reconciler never holds a lock
    /// across an external network call.
    ///
    /// # Errors
    ///
    /// Propagates the reducer's rejection, lock contention, or storage
    /// failures.
    pub async fn handle(&self, action: ReconcilerAction) -> Result<ReconcilerState, EngineError> {
        let env = self.environment();
        let stream_id = StreamId::new(Self::STREAM);

        let (mut state, gateway_effects) = {
            let _guard = self.locks.acquire(Self::STREAM).await?;
            let mut state = self.load(&stream_id, &env).await?;
            let mut effects = self.reducer.reduce(&mut state, action, &env);

            // Persist and publish under the lock; defer collaborator
            // futures until it is released
            let mut deferred = Vec::new();
            let mut immediate = Vec::new();
            for effect in effects.drain(..) {
                match effect {
                    stagepass_core::effect::Effect::Future(f) => {
                        deferred.push(stagepass_core::effect::Effect::Future(f));
                    }
                    other => immediate.push(other),
                }
            }
            self.executor.run_all(immediate).await;
            (state, deferred)
        };

        self.executor.run_all(gateway_effects).await;

        match state.last_error.take() {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }

    async fn load(
        &self,
        stream_id: &StreamId,
        env: &ReconcilerEnvironment,
    ) -> Result<ReconcilerState, EngineError> {
        let events = self
            .event_store
            .load_events(stream_id.clone(), None)
            .await
            .map_err(infra)?;

        let mut state = ReconcilerState::new();
        for event in &events {
            if let EngineEvent::Reconciler(action) =
                EngineEvent::deserialize(event).map_err(infra)?
            {
                self.reducer.reduce(&mut state, action, env);
            }
        }
        Ok(state)
    }

    /// Requests a mint for a freshly issued ticket.
    ///
    /// # Errors
    ///
    /// Rejects tickets whose mirror is already past the mintable states.
    pub async fn request_mint(
        &self,
        ticket_id: TicketId,
        metadata: MintMetadata,
    ) -> Result<(), EngineError> {
        self.handle(ReconcilerAction::RequestMint {
            ticket_id,
            metadata,
        })
        .await?;
        Ok(())
    }

    /// Mirrors a completed local transfer to the external ledger.
    ///
    /// # Errors
    ///
    /// Fails with a consistency error when no minted record exists.
    pub async fn request_transfer_sync(
        &self,
        ticket_id: TicketId,
        new_owner: CustomerId,
        wallet: String,
    ) -> Result<(), EngineError> {
        self.handle(ReconcilerAction::RequestTransferSync {
            ticket_id,
            new_owner,
            wallet,
        })
        .await?;
        Ok(())
    }

    /// Burns the external asset after a local terminal transition.
    ///
    /// # Errors
    ///
    /// Fails when no external record exists.
    pub async fn request_burn(&self, ticket_id: TicketId) -> Result<(), EngineError> {
        self.handle(ReconcilerAction::RequestBurn { ticket_id })
            .await?;
        Ok(())
    }

    /// Runs one reconciliation pass over a snapshot of local tickets,
    /// returning all recorded discrepancies (old and new).
    ///
    /// # Errors
    ///
    /// Propagates lock contention or storage failures.
    pub async fn reconcile(
        &self,
        observations: Vec<LocalTicketView>,
    ) -> Result<Vec<Discrepancy>, EngineError> {
        let before = self.state().await?.discrepancies.len();
        let state = self
            .handle(ReconcilerAction::Reconcile { observations })
            .await?;
        let found = state.discrepancies.len().saturating_sub(before);
        if found > 0 {
            #[allow(clippy::cast_possible_truncation)]
            metrics::counter!("stagepass_reconciler_discrepancies_total")
                .increment(found as u64);
        }
        Ok(state.discrepancies)
    }

    /// Dirty read of the reconciler state.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn state(&self) -> Result<ReconcilerState, EngineError> {
        let env = self.environment();
        self.load(&StreamId::new(Self::STREAM), &env).await
    }
}
