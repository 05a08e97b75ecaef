//! Domain types for the ticket inventory and lifecycle engine.
//!
//! This module contains the value objects, entities, and aggregate state
//! types: ticket types with their inventory counters, individually owned
//! tickets, the append-only ownership chain, transfer requests, scan
//! records, and the external-ledger mirror used by the reconciler.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

use crate::errors::EngineError;

// ============================================================================
// Limits
// ============================================================================

/// Hard ceiling on units per order, regardless of per-type configuration.
pub const MAX_PURCHASE_PER_ORDER: u32 = 10;

/// Hard ceiling on units per bulk-issuance call.
pub const MAX_BATCH_ISSUE: u32 = 15;

/// Maximum platform fee, in basis points of the base price (10%).
pub const PLATFORM_FEE_CAP_BPS: u16 = 1000;

/// Default resale price ceiling: 110% of the original purchase price.
pub const RESALE_PRICE_CAP_BPS: u16 = 11_000;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an issuing organization
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgId(Uuid);

impl OrgId {
    /// Creates a new random `OrgId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short prefix used when composing ticket numbers.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_uppercase()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a venue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VenueId(Uuid);

impl VenueId {
    /// Creates a new random `VenueId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VenueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket type (one sellable tier of an event)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketTypeId(Uuid);

impl TicketTypeId {
    /// Creates a new random `TicketTypeId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketTypeId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Short prefix used when composing ticket numbers.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..4].to_uppercase()
    }
}

impl Default for TicketTypeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a customer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(Uuid);

impl CustomerId {
    /// Creates a new random `CustomerId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `CustomerId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for CustomerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a transfer request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Creates a new random `TransferId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a scan record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanId(Uuid);

impl ScanId {
    /// Creates a new random `ScanId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an inventory reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random `ReservationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from dollars
    ///
    /// # Panics
    ///
    /// Panics if the conversion would overflow (dollars * 100 > `u64::MAX`).
    #[must_use]
    #[allow(clippy::panic)]
    pub const fn from_dollars(dollars: u64) -> Self {
        match dollars.checked_mul(100) {
            Some(cents) => Self(cents),
            None => panic!("Money::from_dollars overflow"),
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two money amounts (returns None if result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Scales by basis points, rounding half-up.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // result is always <= self.0 * 6.5535
    pub const fn scale_bps(self, bps: u16) -> Self {
        Self(((self.0 as u128 * bps as u128 + 5_000) / 10_000) as u64)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Ticket Types (sellable tiers with inventory counters)
// ============================================================================

/// Fee configuration applied per ticket at purchase time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FeeSchedule {
    /// Service fee per ticket
    pub service_fee: Money,
    /// Payment processing fee per ticket
    pub processing_fee: Money,
    /// Facility fee per ticket
    pub facility_fee: Money,
    /// Platform fee in basis points of the base price (capped at
    /// [`PLATFORM_FEE_CAP_BPS`])
    pub platform_fee_bps: u16,
}

impl FeeSchedule {
    /// Sum of the flat per-ticket fees.
    #[must_use]
    pub const fn per_ticket_total(&self) -> Money {
        Money::from_cents(
            self.service_fee.cents() + self.processing_fee.cents() + self.facility_fee.cents(),
        )
    }
}

/// Group discount: a percentage off the base once an order reaches a
/// quantity threshold
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDiscount {
    /// Minimum quantity that triggers the discount
    pub min_quantity: u32,
    /// Discount in basis points of the base amount
    pub discount_bps: u16,
}

/// Sale window for a ticket type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    /// When public sales open
    pub opens_at: DateTime<Utc>,
    /// When sales close
    pub closes_at: DateTime<Utc>,
    /// Optional early-access window opening before the public one
    pub early_access_from: Option<DateTime<Utc>>,
}

impl SaleWindow {
    /// Whether sales are open at `now` for a buyer with or without
    /// early access.
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>, early_access: bool) -> bool {
        let open = match (early_access, self.early_access_from) {
            (true, Some(early)) => early,
            _ => self.opens_at,
        };
        now >= open && now <= self.closes_at
    }
}

/// Ticket type lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketTypeStatus {
    /// On sale (subject to the sale window)
    Active,
    /// No availability left; flips back to Active when capacity frees up
    SoldOut,
    /// Sales manually paused
    Paused,
    /// Soft-retired; never deleted once tickets exist against it
    Retired,
}

impl fmt::Display for TicketTypeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::SoldOut => "sold_out",
            Self::Paused => "paused",
            Self::Retired => "retired",
        };
        write!(f, "{s}")
    }
}

/// One sellable category of tickets for an event, with its own inventory
/// counters and pricing.
///
/// Invariant: `sold + reserved <= total` at all times; `available` is
/// always derived as `total - sold - reserved`, never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketType {
    /// Unique identifier
    pub id: TicketTypeId,
    /// Issuing organization
    pub org_id: OrgId,
    /// Event this tier belongs to
    pub event_id: EventId,
    /// Tier name (e.g. "General Admission", "VIP")
    pub tier: String,
    /// Base price per ticket
    pub base_price: Money,
    /// Per-ticket fee schedule
    pub fees: FeeSchedule,
    /// Sales tax in basis points of the base amount
    pub tax_bps: u16,
    /// Optional group discount
    pub group_discount: Option<GroupDiscount>,
    /// Total capacity
    pub total: u32,
    /// Confirmed sold count
    pub sold: u32,
    /// Currently reserved count (held, not yet confirmed)
    pub reserved: u32,
    /// Sale window
    pub sale_window: SaleWindow,
    /// Minimum units per order
    pub min_per_order: u32,
    /// Maximum units per order (capped at [`MAX_PURCHASE_PER_ORDER`])
    pub max_per_order: u32,
    /// Lifetime cap of units per customer (None = uncapped)
    pub per_customer_cap: Option<u32>,
    /// Whether tickets of this type may be transferred at all
    pub transferable: bool,
    /// Maximum completed transfers per ticket
    pub max_transfers: u32,
    /// Resale price ceiling in basis points of the purchase price
    pub resale_price_cap_bps: u16,
    /// Seconds after event start during which refunds are accepted
    pub refund_window_secs: i64,
    /// Current status
    pub status: TicketTypeStatus,
}

impl TicketType {
    /// Creates an active ticket type with default purchase bounds and
    /// transfer policy.
    #[must_use]
    pub fn new(
        id: TicketTypeId,
        org_id: OrgId,
        event_id: EventId,
        tier: impl Into<String>,
        base_price: Money,
        total: u32,
        sale_window: SaleWindow,
    ) -> Self {
        Self {
            id,
            org_id,
            event_id,
            tier: tier.into(),
            base_price,
            fees: FeeSchedule::default(),
            tax_bps: 0,
            group_discount: None,
            total,
            sold: 0,
            reserved: 0,
            sale_window,
            min_per_order: 1,
            max_per_order: MAX_PURCHASE_PER_ORDER,
            per_customer_cap: None,
            transferable: true,
            max_transfers: 5,
            resale_price_cap_bps: RESALE_PRICE_CAP_BPS,
            refund_window_secs: 0,
            status: TicketTypeStatus::Active,
        }
    }

    /// Returns the number of available units (derived, never stored)
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.total - self.sold - self.reserved
    }

    /// Checks if the requested quantity is available
    #[must_use]
    pub const fn has_capacity(&self, quantity: u32) -> bool {
        self.available() >= quantity
    }

    /// Re-evaluates the Active/SoldOut pair after a counter change.
    ///
    /// Manual states (Paused, Retired) are never overridden here.
    pub const fn reevaluate_status(&mut self) {
        match self.status {
            TicketTypeStatus::Active if self.available() == 0 => {
                self.status = TicketTypeStatus::SoldOut;
            }
            TicketTypeStatus::SoldOut if self.available() > 0 => {
                self.status = TicketTypeStatus::Active;
            }
            _ => {}
        }
    }
}

/// A temporary hold against inventory prior to purchase completion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationHold {
    /// Reservation identifier
    pub reservation_id: ReservationId,
    /// Ticket type held against
    pub ticket_type_id: TicketTypeId,
    /// Customer the hold is for
    pub customer_id: CustomerId,
    /// Units held
    pub quantity: u32,
    /// When the hold lapses and inventory returns to available
    pub expires_at: DateTime<Utc>,
    /// When the hold was created
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Tickets
// ============================================================================

/// Ticket lifecycle status.
///
/// `Used`, `Refunded`, `Cancelled`, `Expired`, and `Void` are terminal:
/// no outgoing transitions exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Issued but not yet assigned to a sale (held inventory)
    Available,
    /// Held pending purchase completion
    Reserved,
    /// Sold and valid for entry
    Sold,
    /// Sold, then transferred at least once
    Transferred,
    /// Consumed at a venue checkpoint (terminal)
    Used,
    /// Refunded (terminal)
    Refunded,
    /// Cancelled by the organizer (terminal)
    Cancelled,
    /// Reservation or validity lapsed (terminal)
    Expired,
    /// Administratively voided (terminal)
    Void,
}

impl TicketStatus {
    /// Whether this status has no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Used | Self::Refunded | Self::Cancelled | Self::Expired | Self::Void
        )
    }

    /// The valid-transition table. Any pair outside it is rejected with
    /// `InvalidTransition` before any mutation.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Available, Self::Reserved | Self::Sold)
                | (Self::Reserved, Self::Sold | Self::Available | Self::Expired)
                | (
                    Self::Sold,
                    Self::Transferred | Self::Used | Self::Refunded | Self::Cancelled
                )
                | (
                    Self::Transferred,
                    Self::Transferred | Self::Used | Self::Refunded | Self::Cancelled
                )
        )
    }

    /// Whether a ticket in this status can be presented at a checkpoint.
    #[must_use]
    pub const fn is_scannable(self) -> bool {
        matches!(self, Self::Sold | Self::Transferred)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Sold => "sold",
            Self::Transferred => "transferred",
            Self::Used => "used",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Void => "void",
        };
        write!(f, "{s}")
    }
}

/// Seat or access attributes printed on a ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatAttributes {
    /// Section name
    pub section: String,
    /// Row identifier, if numbered seating
    pub row: Option<String>,
    /// Seat number, if numbered seating
    pub seat: Option<String>,
}

/// Validity and entry windows for a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    /// When the ticket becomes valid
    pub valid_from: DateTime<Utc>,
    /// When the ticket stops being valid
    pub valid_until: DateTime<Utc>,
    /// Event start (anchor for entry windows and transfer deadlines)
    pub event_starts_at: DateTime<Utc>,
    /// Earliest admission time
    pub entry_opens_at: DateTime<Utc>,
    /// Latest admission time
    pub entry_closes_at: DateTime<Utc>,
}

impl ValidityWindow {
    /// Standard window for an event: valid from issuance until one hour
    /// after the event ends, with gates open from one hour before start.
    #[must_use]
    pub fn for_event(
        issued_at: DateTime<Utc>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            valid_from: issued_at,
            valid_until: ends_at + Duration::hours(1),
            event_starts_at: starts_at,
            entry_opens_at: starts_at - Duration::hours(1),
            entry_closes_at: ends_at + Duration::hours(1),
        }
    }
}

/// One individually identified, ownable, scannable unit sold against a
/// [`TicketType`]. Never physically deleted; terminal statuses carry the
/// tombstone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique identifier
    pub id: TicketId,
    /// Ticket type sold against
    pub ticket_type_id: TicketTypeId,
    /// Event admission is for
    pub event_id: EventId,
    /// Current owner
    pub owner: CustomerId,
    /// Original purchaser (never changes)
    pub original_purchaser: CustomerId,
    /// Human-readable ticket number, unique per (event, type)
    pub number: String,
    /// Scan barcode, derived from a time-salted hash of the ticket id
    pub barcode: String,
    /// Tamper-detection hash over (id, number, barcode)
    pub verification_hash: String,
    /// Seat attributes, if assigned seating
    pub seat: Option<SeatAttributes>,
    /// Base price paid
    pub price_paid: Money,
    /// Fees paid
    pub fees_paid: Money,
    /// Current lifecycle status
    pub status: TicketStatus,
    /// Validity and entry windows
    pub validity: ValidityWindow,
    /// Latest time a refund is accepted, if refunds are allowed
    pub refund_deadline: Option<DateTime<Utc>>,
    /// Number of admitted scans
    pub scan_count: u32,
    /// Timestamp of the first admitted scan
    pub first_scanned_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent admitted scan
    pub last_scanned_at: Option<DateTime<Utc>>,
    /// Number of completed transfers
    pub transfer_count: u32,
    /// Whether this ticket may be transferred
    pub transferable: bool,
    /// Maximum completed transfers
    pub max_transfers: u32,
    /// Resale price ceiling in basis points of `price_paid`
    pub resale_price_cap_bps: u16,
    /// External NFT asset reference, once minted
    pub nft_asset: Option<String>,
    /// When the ticket was issued
    pub issued_at: DateTime<Utc>,
}

/// Read-only ticket snapshot handed to the entry-validation engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketView {
    /// Ticket identifier
    pub id: TicketId,
    /// Current status
    pub status: TicketStatus,
    /// Validity and entry windows
    pub validity: ValidityWindow,
    /// Number of admitted scans
    pub scan_count: u32,
}

impl From<&Ticket> for TicketView {
    fn from(ticket: &Ticket) -> Self {
        Self {
            id: ticket.id,
            status: ticket.status,
            validity: ticket.validity,
            scan_count: ticket.scan_count,
        }
    }
}

// ============================================================================
// Ownership chain
// ============================================================================

/// How an owner came to hold a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionKind {
    /// Primary-market purchase
    Purchase,
    /// Secondary transfer (resale)
    Transfer,
    /// Gifted transfer
    Gift,
    /// Complimentary issuance
    Comp,
}

/// Append-only entry in a ticket's ownership chain.
///
/// Exactly one record per ticket has `is_current_owner = true` at any
/// time; completing a transfer closes the prior interval and opens the
/// next within the same reduction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    /// Ticket the record belongs to
    pub ticket_id: TicketId,
    /// The owner during this interval
    pub owner: CustomerId,
    /// How ownership was acquired
    pub acquisition: AcquisitionKind,
    /// Interval start
    pub owned_from: DateTime<Utc>,
    /// Interval end (None while current)
    pub owned_until: Option<DateTime<Utc>>,
    /// Price paid for this acquisition, if any
    pub price_paid: Option<Money>,
    /// Source transaction reference
    pub source_ref: Option<String>,
    /// Whether this is the current-owner record
    pub is_current_owner: bool,
}

// ============================================================================
// Transfers
// ============================================================================

/// Kind of ownership transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    /// Paid resale
    Resale,
    /// Free gift
    Gift,
}

/// Transfer request lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferRequestStatus {
    /// Awaiting approval
    Pending,
    /// Approved, completion in progress
    Accepted,
    /// Rejected by the approver
    Rejected,
    /// Ownership reassigned
    Completed,
    /// Withdrawn by the initiator
    Cancelled,
    /// Lapsed without resolution
    Expired,
}

/// A pending or resolved change of ownership
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Unique identifier
    pub id: TransferId,
    /// Ticket being transferred
    pub ticket_id: TicketId,
    /// Current owner giving up the ticket
    pub from: CustomerId,
    /// Receiving customer
    pub to: CustomerId,
    /// Who initiated the request
    pub initiated_by: CustomerId,
    /// Resale or gift
    pub kind: TransferKind,
    /// Agreed price for resales
    pub price: Option<Money>,
    /// Whether policy requires explicit approval
    pub requires_approval: bool,
    /// Current status
    pub status: TransferRequestStatus,
    /// When the request was created
    pub created_at: DateTime<Utc>,
    /// When a pending request lapses
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Entry validation
// ============================================================================

/// Outcome of an entry-validation attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanOutcome {
    /// Entry allowed
    Admitted,
    /// No such ticket
    NotFound,
    /// Status outside {Sold, Transferred}
    WrongStatus,
    /// Scanned before the validity window opened
    NotYetValid,
    /// Scanned after the validity window closed
    ValidityExpired,
    /// Scanned outside the entry window
    OutsideEntryWindow,
    /// Single-entry enforcement: already consumed
    Used,
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Admitted => "admitted",
            Self::NotFound => "not_found",
            Self::WrongStatus => "wrong_status",
            Self::NotYetValid => "not_yet_valid",
            Self::ValidityExpired => "validity_expired",
            Self::OutsideEntryWindow => "outside_entry_window",
            Self::Used => "used",
        };
        write!(f, "{s}")
    }
}

/// Fraud heuristics triggered by a scan
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FraudFlag {
    /// Rescan within seconds of the previous scan
    RapidScan,
    /// Re-entry within the grace window after the first scan
    RecentReentry,
}

/// Immutable log entry for one entry-validation attempt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Unique identifier
    pub id: ScanId,
    /// Ticket presented
    pub ticket_id: TicketId,
    /// Gate/checkpoint location
    pub location: String,
    /// Validator device or operator
    pub validator: String,
    /// Whether entry was allowed
    pub admitted: bool,
    /// Outcome code
    pub outcome: ScanOutcome,
    /// Triggered fraud heuristics
    pub flags: Vec<FraudFlag>,
    /// Confidence score: starts at 1.0, decremented per heuristic;
    /// informational, not gating
    pub confidence: f32,
    /// When the attempt happened
    pub scanned_at: DateTime<Utc>,
}

/// Structured result of an entry-validation attempt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanVerdict {
    /// Whether the ticket was valid for entry
    pub valid: bool,
    /// Outcome code
    pub outcome: ScanOutcome,
    /// Whether the gate should open
    pub entry_allowed: bool,
    /// Triggered fraud heuristics
    pub flags: Vec<FraudFlag>,
    /// Confidence score (informational)
    pub confidence: f32,
    /// The engine determined the ticket is now consumed; the owning
    /// service must apply the terminal `Used` transition
    pub mark_used: bool,
}

// ============================================================================
// External ledger (reconciler)
// ============================================================================

/// Synchronization state of a ticket's external NFT mirror
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Mint requested, not yet submitted
    Pending,
    /// Submission in flight
    Minting,
    /// Minted; requires a non-null asset id
    Minted,
    /// Ownership mirrored after a transfer; requires a non-null asset id
    Transferred,
    /// Burned after refund/cancel/void (terminal)
    Burned,
    /// Submission failed; detail is required and non-empty
    Error {
        /// What went wrong
        detail: String,
    },
}

impl SyncState {
    /// Whether this state requires a non-null external asset id.
    #[must_use]
    pub const fn requires_asset(&self) -> bool {
        matches!(self, Self::Minted | Self::Transferred)
    }

    /// Whether this state has no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Burned)
    }

    /// Short label for comparisons and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Minting => "minting",
            Self::Minted => "minted",
            Self::Transferred => "transferred",
            Self::Burned => "burned",
            Self::Error { .. } => "error",
        }
    }
}

/// Mirror of a ticket's ownership/state on the external ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalLedgerRecord {
    /// Ticket being mirrored
    pub ticket_id: TicketId,
    /// Synchronization state
    pub state: SyncState,
    /// External asset identifier (mint address or equivalent)
    pub asset_id: Option<String>,
    /// Owner last observed on the external side
    pub observed_owner: Option<CustomerId>,
    /// Last time local and external state were compared and matched
    pub last_verified_at: Option<DateTime<Utc>>,
    /// Failed submission attempts so far
    pub retry_count: u32,
    /// Last state change
    pub updated_at: DateTime<Utc>,
}

/// A detected divergence between local and external records.
///
/// Recorded, never auto-corrected: resolution requires human or
/// policy-driven judgment about which source is authoritative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// Ticket the divergence concerns
    pub ticket_id: TicketId,
    /// What the local store implies the external side should show
    pub expected: String,
    /// What the external side last showed
    pub observed: String,
    /// When the divergence was detected
    pub detected_at: DateTime<Utc>,
}

/// Snapshot of local ticket state fed into a reconciliation pass
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalTicketView {
    /// Ticket identifier
    pub ticket_id: TicketId,
    /// Current local owner
    pub owner: CustomerId,
    /// Current local status
    pub status: TicketStatus,
    /// Whether the local store believes a mint exists
    pub minted: bool,
}

// ============================================================================
// Batch issuance reporting
// ============================================================================

/// Running tally for a partially-failure-tolerant batch issuance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Units attempted
    pub processed: u32,
    /// Units issued
    pub successful: u32,
    /// Units that failed
    pub failed: u32,
    /// Captured error messages, one per failed unit
    pub errors: Vec<String>,
}

// ============================================================================
// Aggregate States
// ============================================================================

/// State for the Inventory Ledger aggregate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryState {
    /// Ticket types indexed by id
    pub types: HashMap<TicketTypeId, TicketType>,
    /// Active reservation holds indexed by reservation id
    pub holds: HashMap<ReservationId, ReservationHold>,
    /// Lifetime non-refunded purchase counts per (type, customer)
    pub purchases: HashMap<(TicketTypeId, CustomerId), u32>,
    /// Rejection from the most recent command, if any
    pub last_error: Option<EngineError>,
}

impl InventoryState {
    /// Creates a new empty `InventoryState`
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
            holds: HashMap::new(),
            purchases: HashMap::new(),
            last_error: None,
        }
    }

    /// Gets a ticket type by id
    #[must_use]
    pub fn get_type(&self, id: &TicketTypeId) -> Option<&TicketType> {
        self.types.get(id)
    }

    /// Lifetime non-refunded units a customer has purchased of a type
    #[must_use]
    pub fn prior_purchases(&self, type_id: &TicketTypeId, customer: &CustomerId) -> u32 {
        self.purchases
            .get(&(*type_id, *customer))
            .copied()
            .unwrap_or(0)
    }
}

impl Default for InventoryState {
    fn default() -> Self {
        Self::new()
    }
}

/// State for the Ticket aggregate (issuance + ownership/transfer machine)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TicketState {
    /// Tickets indexed by id
    pub tickets: HashMap<TicketId, Ticket>,
    /// Ownership chain per ticket, oldest first
    pub ownership: HashMap<TicketId, Vec<OwnershipRecord>>,
    /// Transfer requests indexed by id
    pub transfers: HashMap<TransferId, TransferRequest>,
    /// Monotonic ticket-number sequences per (event, type)
    pub sequences: HashMap<(EventId, TicketTypeId), u32>,
    /// Barcodes in use, for collision detection
    pub barcodes: HashSet<String>,
    /// Ticket issued by the most recent command, if any
    pub last_issued: Option<TicketId>,
    /// Transfer touched by the most recent command, if any
    pub last_transfer: Option<TransferId>,
    /// Rejection from the most recent command, if any
    pub last_error: Option<EngineError>,
}

impl TicketState {
    /// Creates a new empty `TicketState`
    #[must_use]
    pub fn new() -> Self {
        Self {
            tickets: HashMap::new(),
            ownership: HashMap::new(),
            transfers: HashMap::new(),
            sequences: HashMap::new(),
            barcodes: HashSet::new(),
            last_issued: None,
            last_transfer: None,
            last_error: None,
        }
    }

    /// Gets a ticket by id
    #[must_use]
    pub fn get(&self, id: &TicketId) -> Option<&Ticket> {
        self.tickets.get(id)
    }

    /// The current-owner record for a ticket
    #[must_use]
    pub fn current_owner_record(&self, id: &TicketId) -> Option<&OwnershipRecord> {
        self.ownership
            .get(id)
            .and_then(|chain| chain.iter().find(|r| r.is_current_owner))
    }

    /// Any pending transfer request for a ticket
    #[must_use]
    pub fn pending_transfer_for(&self, id: &TicketId) -> Option<&TransferRequest> {
        self.transfers
            .values()
            .find(|t| t.ticket_id == *id && t.status == TransferRequestStatus::Pending)
    }
}

impl Default for TicketState {
    fn default() -> Self {
        Self::new()
    }
}

/// State for the Entry Validation aggregate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntryState {
    /// Scan history per ticket, oldest first
    pub history: HashMap<TicketId, Vec<ScanRecord>>,
    /// Verdict from the most recent validation
    pub last_verdict: Option<ScanVerdict>,
    /// Rejection from the most recent command, if any
    pub last_error: Option<EngineError>,
}

impl EntryState {
    /// Creates a new empty `EntryState`
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: HashMap::new(),
            last_verdict: None,
            last_error: None,
        }
    }

    /// Timestamp of the first admitted scan of a ticket
    #[must_use]
    pub fn first_admitted_scan(&self, id: &TicketId) -> Option<DateTime<Utc>> {
        self.history
            .get(id)
            .and_then(|scans| scans.iter().find(|s| s.admitted).map(|s| s.scanned_at))
    }

    /// Timestamp of the most recent admitted scan of a ticket
    #[must_use]
    pub fn last_admitted_scan(&self, id: &TicketId) -> Option<DateTime<Utc>> {
        self.history.get(id).and_then(|scans| {
            scans
                .iter()
                .rev()
                .find(|s| s.admitted)
                .map(|s| s.scanned_at)
        })
    }
}

impl Default for EntryState {
    fn default() -> Self {
        Self::new()
    }
}

/// State for the Reconciler aggregate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcilerState {
    /// External-ledger records per ticket
    pub records: HashMap<TicketId, ExternalLedgerRecord>,
    /// Detected discrepancies, oldest first
    pub discrepancies: Vec<Discrepancy>,
    /// Rejection from the most recent command, if any
    pub last_error: Option<EngineError>,
}

impl ReconcilerState {
    /// Creates a new empty `ReconcilerState`
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            discrepancies: Vec::new(),
            last_error: None,
        }
    }

    /// Gets the external record for a ticket
    #[must_use]
    pub fn record(&self, id: &TicketId) -> Option<&ExternalLedgerRecord> {
        self.records.get(id)
    }

    /// Whether an identical open discrepancy is already recorded
    #[must_use]
    pub fn has_discrepancy(&self, ticket_id: &TicketId, expected: &str, observed: &str) -> bool {
        self.discrepancies
            .iter()
            .any(|d| d.ticket_id == *ticket_id && d.expected == expected && d.observed == observed)
    }
}

impl Default for ReconcilerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_is_derived() {
        let window = SaleWindow {
            opens_at: Utc::now(),
            closes_at: Utc::now() + Duration::days(30),
            early_access_from: None,
        };
        let mut tt = TicketType::new(
            TicketTypeId::new(),
            OrgId::new(),
            EventId::new(),
            "GA",
            Money::from_dollars(50),
            100,
            window,
        );
        assert_eq!(tt.available(), 100);

        tt.reserved = 10;
        tt.sold = 5;
        assert_eq!(tt.available(), 85);
        assert_eq!(tt.sold + tt.reserved + tt.available(), tt.total);
    }

    #[test]
    fn sold_out_flips_both_ways() {
        let window = SaleWindow {
            opens_at: Utc::now(),
            closes_at: Utc::now() + Duration::days(30),
            early_access_from: None,
        };
        let mut tt = TicketType::new(
            TicketTypeId::new(),
            OrgId::new(),
            EventId::new(),
            "GA",
            Money::from_dollars(50),
            2,
            window,
        );

        tt.sold = 2;
        tt.reevaluate_status();
        assert_eq!(tt.status, TicketTypeStatus::SoldOut);

        tt.sold = 1;
        tt.reevaluate_status();
        assert_eq!(tt.status, TicketTypeStatus::Active);
    }

    #[test]
    fn paused_is_not_overridden_by_reevaluation() {
        let window = SaleWindow {
            opens_at: Utc::now(),
            closes_at: Utc::now() + Duration::days(30),
            early_access_from: None,
        };
        let mut tt = TicketType::new(
            TicketTypeId::new(),
            OrgId::new(),
            EventId::new(),
            "GA",
            Money::from_dollars(50),
            10,
            window,
        );
        tt.status = TicketTypeStatus::Paused;
        tt.reevaluate_status();
        assert_eq!(tt.status, TicketTypeStatus::Paused);
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        use TicketStatus::*;
        let all = [
            Available, Reserved, Sold, Transferred, Used, Refunded, Cancelled, Expired, Void,
        ];
        for terminal in [Used, Refunded, Cancelled, Expired, Void] {
            for next in all {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} should be invalid"
                );
            }
        }
    }

    #[test]
    fn transferred_can_transfer_again() {
        assert!(TicketStatus::Transferred.can_transition_to(TicketStatus::Transferred));
        assert!(TicketStatus::Sold.can_transition_to(TicketStatus::Transferred));
        assert!(!TicketStatus::Available.can_transition_to(TicketStatus::Transferred));
    }

    #[test]
    fn money_scales_by_basis_points() {
        // 8% of $1000.00
        assert_eq!(
            Money::from_dollars(1000).scale_bps(800),
            Money::from_dollars(80)
        );
        // rounding: 33 cents at 10% -> 3.3 cents -> 3 cents
        assert_eq!(Money::from_cents(33).scale_bps(1000), Money::from_cents(3));
    }

    #[test]
    fn sale_window_honors_early_access() {
        let now = Utc::now();
        let window = SaleWindow {
            opens_at: now + Duration::hours(2),
            closes_at: now + Duration::days(7),
            early_access_from: Some(now - Duration::hours(1)),
        };

        assert!(!window.is_open(now, false));
        assert!(window.is_open(now, true));
        assert!(window.is_open(now + Duration::hours(3), false));
    }
}
