//! Availability and pricing engine.
//!
//! Purchase eligibility is evaluated as an ordered rule set whose
//! failures are *collected*, not short-circuited, so callers can present
//! the complete error set. Price computation works in scaled integer
//! cents and rounds exactly once, at the final total.

use crate::errors::EngineError;
use crate::types::{CustomerId, Money, TicketType, TicketTypeId, TicketTypeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Rule codes and outcomes
// ============================================================================

/// Stable codes for eligibility rules, returned to callers on failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleCode {
    /// The ticket type does not exist
    TypeNotFound,
    /// The ticket type is not active
    TypeNotActive,
    /// Sales have not opened yet
    SaleNotStarted,
    /// Sales have closed
    SaleEnded,
    /// Below the per-order minimum
    BelowMinimumQuantity,
    /// Above the per-order maximum
    AboveMaximumQuantity,
    /// Requested more than is available
    InsufficientAvailability,
    /// Would exceed the customer's lifetime cap for the type
    LifetimeCapExceeded,
    /// A configured custom restriction rule failed or warned
    Restriction(String),
}

/// Outcome of one custom restriction rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOutcome {
    /// The rule is satisfied
    Pass,
    /// The rule rejects the purchase
    Fail(RuleCode),
    /// The rule passes with a warning (recorded, not gating)
    Warn(RuleCode),
}

/// Context handed to custom restriction rules.
#[derive(Clone, Debug)]
pub struct RestrictionContext {
    /// The purchasing customer
    pub customer: CustomerId,
    /// Units requested
    pub quantity: u32,
    /// Evaluation time
    pub now: DateTime<Utc>,
    /// Free-form customer attributes (age, region, membership, ...)
    pub attributes: HashMap<String, String>,
}

/// A pluggable purchase restriction.
///
/// Rule *categories* are fixed (age, location, membership, ...) but each
/// concrete rule body is an extension point: implementations read their
/// declarative bounds and emit pass/fail/warn independently of every
/// other rule.
pub trait RestrictionRule: Send + Sync {
    /// Stable code identifying this rule in failure lists.
    fn code(&self) -> &str;

    /// Evaluate the rule against a purchase attempt.
    fn evaluate(&self, ctx: &RestrictionContext) -> RuleOutcome;
}

/// Rejects buyers below a minimum age. A missing age attribute fails the
/// rule: age-restricted inventory cannot be sold unverified.
pub struct MinimumAgeRule {
    /// Minimum age in years
    pub minimum: u32,
}

impl RestrictionRule for MinimumAgeRule {
    fn code(&self) -> &str {
        "minimum-age"
    }

    fn evaluate(&self, ctx: &RestrictionContext) -> RuleOutcome {
        match ctx.attributes.get("age").and_then(|a| a.parse::<u32>().ok()) {
            Some(age) if age >= self.minimum => RuleOutcome::Pass,
            Some(_) => RuleOutcome::Fail(RuleCode::Restriction(self.code().to_string())),
            None => RuleOutcome::Fail(RuleCode::Restriction(format!(
                "{}:unverified",
                self.code()
            ))),
        }
    }
}

/// Restricts sales to a set of regions. A missing region attribute only
/// warns; geo data is best-effort.
pub struct AllowedRegionsRule {
    /// Region codes sales are limited to
    pub regions: Vec<String>,
}

impl RestrictionRule for AllowedRegionsRule {
    fn code(&self) -> &str {
        "allowed-regions"
    }

    fn evaluate(&self, ctx: &RestrictionContext) -> RuleOutcome {
        match ctx.attributes.get("region") {
            Some(region) if self.regions.iter().any(|r| r == region) => RuleOutcome::Pass,
            Some(_) => RuleOutcome::Fail(RuleCode::Restriction(self.code().to_string())),
            None => RuleOutcome::Warn(RuleCode::Restriction(format!(
                "{}:unknown-region",
                self.code()
            ))),
        }
    }
}

/// Requires a membership tier attribute to match.
pub struct MembershipTierRule {
    /// Required membership tier
    pub required: String,
}

impl RestrictionRule for MembershipTierRule {
    fn code(&self) -> &str {
        "membership-tier"
    }

    fn evaluate(&self, ctx: &RestrictionContext) -> RuleOutcome {
        match ctx.attributes.get("membership") {
            Some(tier) if *tier == self.required => RuleOutcome::Pass,
            _ => RuleOutcome::Fail(RuleCode::Restriction(self.code().to_string())),
        }
    }
}

// ============================================================================
// Eligibility
// ============================================================================

/// Complete result of an eligibility check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityReport {
    /// Whether the purchase may proceed
    pub eligible: bool,
    /// Every failed rule, in evaluation order
    pub failed: Vec<RuleCode>,
    /// Non-gating warnings
    pub warnings: Vec<RuleCode>,
}

impl EligibilityReport {
    /// Converts a failed report into the engine error carrying the rule
    /// codes; `None` if eligible.
    #[must_use]
    pub fn into_error(self) -> Option<EngineError> {
        if self.eligible {
            None
        } else {
            Some(EngineError::Eligibility { rules: self.failed })
        }
    }
}

/// Evaluates purchase eligibility for a requested quantity.
///
/// Rules run in order (type existence/status, sale window, quantity
/// bounds, availability, lifetime cap, custom restrictions) and every
/// failure is collected so the caller can present the complete set.
#[must_use]
pub fn check_eligibility(
    ticket_type: Option<&TicketType>,
    quantity: u32,
    prior_purchased: u32,
    now: DateTime<Utc>,
    early_access: bool,
    restriction_outcomes: impl IntoIterator<Item = RuleOutcome>,
) -> EligibilityReport {
    let mut failed = Vec::new();
    let mut warnings = Vec::new();

    let Some(tt) = ticket_type else {
        return EligibilityReport {
            eligible: false,
            failed: vec![RuleCode::TypeNotFound],
            warnings,
        };
    };

    if tt.status != TicketTypeStatus::Active {
        failed.push(RuleCode::TypeNotActive);
    }

    if !tt.sale_window.is_open(now, early_access) {
        if now < tt.sale_window.opens_at {
            failed.push(RuleCode::SaleNotStarted);
        } else {
            failed.push(RuleCode::SaleEnded);
        }
    }

    if quantity < tt.min_per_order {
        failed.push(RuleCode::BelowMinimumQuantity);
    }
    if quantity > tt.max_per_order.min(crate::types::MAX_PURCHASE_PER_ORDER) {
        failed.push(RuleCode::AboveMaximumQuantity);
    }

    if !tt.has_capacity(quantity) {
        failed.push(RuleCode::InsufficientAvailability);
    }

    if let Some(cap) = tt.per_customer_cap {
        if prior_purchased + quantity > cap {
            failed.push(RuleCode::LifetimeCapExceeded);
        }
    }

    for outcome in restriction_outcomes {
        match outcome {
            RuleOutcome::Pass => {}
            RuleOutcome::Fail(code) => failed.push(code),
            RuleOutcome::Warn(code) => warnings.push(code),
        }
    }

    EligibilityReport {
        eligible: failed.is_empty(),
        failed,
        warnings,
    }
}

// ============================================================================
// Pricing
// ============================================================================

/// One labelled line of a price breakdown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLine {
    /// Human-readable label
    pub label: String,
    /// Amount (display-rounded)
    pub amount: Money,
}

/// Computed price for a requested quantity.
///
/// `base`, `fees`, `taxes`, and `discount` are display-rounded line
/// items; `total` is computed from the unrounded scaled sum and rounded
/// exactly once, so it may differ from the naive sum of rounded lines by
/// at most one cent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Unit price × quantity
    pub base: Money,
    /// Flat per-ticket fees plus the platform fee
    pub fees: Money,
    /// Sales tax on the base amount
    pub taxes: Money,
    /// Group and promo discounts combined
    pub discount: Money,
    /// `base + fees + taxes - discount`, never negative
    pub total: Money,
    /// Itemized breakdown
    pub breakdown: Vec<PriceLine>,
}

// Intermediate math is carried in cents scaled by 10^4 so that basis-point
// lines stay exact until the single final rounding.
const SCALE: u128 = 10_000;

fn round_scaled(scaled: u128) -> Money {
    #[allow(clippy::cast_possible_truncation)] // money values stay far below u64::MAX cents
    Money::from_cents(((scaled + SCALE / 2) / SCALE) as u64)
}

/// Computes the total price for a quantity of a ticket type.
///
/// `base = unit × qty`; `fees = (service + processing + facility) × qty
/// + base × platform_bps`; `taxes = base × tax_bps`; `discount` applies
/// the group discount at its threshold plus any resolved promo amount.
/// The total is clamped at zero.
///
/// # Errors
///
/// Returns [`EngineError::Validation`] for a zero quantity or a platform
/// fee above the cap, and on arithmetic overflow.
pub fn compute_price(
    ticket_type: &TicketType,
    quantity: u32,
    promo_discount: Option<Money>,
) -> Result<PriceQuote, EngineError> {
    if quantity == 0 {
        return Err(EngineError::Validation(
            "quantity must be greater than zero".to_string(),
        ));
    }
    if ticket_type.fees.platform_fee_bps > crate::types::PLATFORM_FEE_CAP_BPS {
        return Err(EngineError::Validation(format!(
            "platform fee {}bps exceeds the {}bps cap",
            ticket_type.fees.platform_fee_bps,
            crate::types::PLATFORM_FEE_CAP_BPS
        )));
    }

    let base = ticket_type
        .base_price
        .checked_multiply(quantity)
        .ok_or_else(|| EngineError::Validation("price overflow".to_string()))?;
    let flat_fees = ticket_type
        .fees
        .per_ticket_total()
        .checked_multiply(quantity)
        .ok_or_else(|| EngineError::Validation("fee overflow".to_string()))?;

    let base_scaled = u128::from(base.cents()) * SCALE;
    let flat_fees_scaled = u128::from(flat_fees.cents()) * SCALE;
    let platform_fee_scaled =
        u128::from(base.cents()) * u128::from(ticket_type.fees.platform_fee_bps);
    let taxes_scaled = u128::from(base.cents()) * u128::from(ticket_type.tax_bps);

    let group_discount_scaled = ticket_type
        .group_discount
        .filter(|d| quantity >= d.min_quantity)
        .map_or(0u128, |d| {
            u128::from(base.cents()) * u128::from(d.discount_bps)
        });
    let promo_scaled = promo_discount.map_or(0u128, |p| u128::from(p.cents()) * SCALE);
    let discount_scaled = group_discount_scaled + promo_scaled;

    let gross_scaled = base_scaled + flat_fees_scaled + platform_fee_scaled + taxes_scaled;
    let total_scaled = gross_scaled.saturating_sub(discount_scaled);

    let fees = round_scaled(flat_fees_scaled + platform_fee_scaled);
    let taxes = round_scaled(taxes_scaled);
    let discount = round_scaled(discount_scaled);
    let total = round_scaled(total_scaled);

    let mut breakdown = vec![
        PriceLine {
            label: format!("{} x {quantity}", ticket_type.tier),
            amount: base,
        },
        PriceLine {
            label: "fees".to_string(),
            amount: fees,
        },
        PriceLine {
            label: "tax".to_string(),
            amount: taxes,
        },
    ];
    if !discount.is_zero() {
        breakdown.push(PriceLine {
            label: "discount".to_string(),
            amount: discount,
        });
    }

    Ok(PriceQuote {
        base,
        fees,
        taxes,
        discount,
        total,
        breakdown,
    })
}
