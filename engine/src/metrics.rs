//! Business metrics for the ticket lifecycle engine.
//!
//! Counters and gauges for the operations the engine owns. Exporter
//! wiring (Prometheus etc.) is a deployment concern and lives outside
//! this crate.
//!
//! ## Exported Metrics
//!
//! - `stagepass_tickets_issued_total`: tickets issued
//! - `stagepass_reservations_total{outcome}`: inventory holds by outcome
//! - `stagepass_transfers_total{status}`: transfer requests by terminal status
//! - `stagepass_scans_total{outcome}`: entry validations by outcome
//! - `stagepass_reconciler_discrepancies_total`: drift records
//! - `stagepass_mint_submissions_total{result}`: external mint submissions

use ::metrics::{describe_counter, describe_gauge};

/// Register descriptions for all business metrics.
///
/// Call once at application startup, before any metric is recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "stagepass_tickets_issued_total",
        "Total tickets issued across all events"
    );
    describe_counter!(
        "stagepass_reservations_total",
        "Inventory reservations by outcome (reserved, committed, released, expired)"
    );
    describe_counter!(
        "stagepass_transfers_total",
        "Transfer requests by terminal status (completed, rejected, cancelled, expired)"
    );
    describe_counter!(
        "stagepass_scans_total",
        "Entry validations by outcome (admitted, used, wrong_status, ...)"
    );
    describe_counter!(
        "stagepass_reconciler_discrepancies_total",
        "Discrepancies detected between local and external records"
    );
    describe_counter!(
        "stagepass_mint_submissions_total",
        "External mint submissions by result (confirmed, failed)"
    );
    describe_gauge!(
        "stagepass_active_holds",
        "Inventory holds currently outstanding"
    );
}
