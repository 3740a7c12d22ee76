//! Investment plan catalog.
//!
//! Plans are immutable values behind `Arc`; an update swaps in a new value so
//! investments that already captured the old plan keep their terms.

use chrono::{DateTime, Utc, Weekday};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tierfolio_core::{Currency, EngineError, EngineResult, PlanId};
use tracing::info;
use uuid::Uuid;

/// How often a plan pays ROI and on which days
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "days", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutFrequency {
    /// Every 24 hours from the start instant
    Daily,
    /// On each listed weekday
    Weekly(Vec<Weekday>),
    /// On each listed day of month, clamped to the month's last day
    Monthly(Vec<u32>),
}

impl PayoutFrequency {
    fn validate(&self) -> EngineResult<()> {
        match self {
            PayoutFrequency::Daily => Ok(()),
            PayoutFrequency::Weekly(days) if days.is_empty() => Err(EngineError::invalid_field(
                "frequency_days",
                "weekly plans need at least one payout weekday",
            )),
            PayoutFrequency::Monthly(days) if days.is_empty() => Err(EngineError::invalid_field(
                "frequency_days",
                "monthly plans need at least one payout day",
            )),
            PayoutFrequency::Monthly(days) if days.iter().any(|d| *d == 0 || *d > 31) => Err(
                EngineError::invalid_field("frequency_days", "days of month must be within 1..=31"),
            ),
            _ => Ok(()),
        }
    }
}

/// Terms a user buys into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentPlan {
    pub id: PlanId,
    pub name: String,
    /// Principal in USDT
    pub amount: Decimal,
    /// ROI credited per payout period, USDT
    pub roi_amount: Decimal,
    /// Number of ROI payouts before the investment completes
    pub duration_times: u32,
    pub frequency: PayoutFrequency,
    /// Share of each ROI payout passed through to qualifying referrers
    pub boost_percent: Decimal,
    /// Breakdown window; the platform default applies when unset
    pub refund_timeline_days: Option<u32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Admin input for a new or replaced plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTerms {
    pub name: String,
    pub amount: Decimal,
    pub roi_amount: Decimal,
    pub duration_times: u32,
    pub frequency: PayoutFrequency,
    pub boost_percent: Decimal,
    pub refund_timeline_days: Option<u32>,
}

impl PlanTerms {
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::invalid_field("name", "plan name is required"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(EngineError::invalid_field("amount", "plan amount must be positive"));
        }
        if self.roi_amount <= Decimal::ZERO {
            return Err(EngineError::invalid_field("roi_amount", "ROI amount must be positive"));
        }
        // Credits are posted at USDT precision
        for (field, value) in [("amount", self.amount), ("roi_amount", self.roi_amount)] {
            if Currency::Usdt.round(value) != value {
                return Err(EngineError::invalid_field(
                    field,
                    format!("{} has more than {} decimal places", value, Currency::Usdt.scale()),
                ));
            }
        }
        if self.duration_times == 0 {
            return Err(EngineError::invalid_field(
                "duration_times",
                "a plan must pay at least once",
            ));
        }
        if self.boost_percent < Decimal::ZERO || self.boost_percent > Decimal::ONE_HUNDRED {
            return Err(EngineError::invalid_field(
                "boost_percent",
                "boost percent must be between 0 and 100",
            ));
        }
        self.frequency.validate()
    }
}

#[derive(Debug, Default)]
pub struct PlanCatalog {
    plans: DashMap<PlanId, Arc<InvestmentPlan>>,
}

impl PlanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, terms: PlanTerms, now: DateTime<Utc>) -> EngineResult<Arc<InvestmentPlan>> {
        terms.validate()?;
        let plan = Arc::new(Self::build(Uuid::new_v4(), terms, true, now));
        self.plans.insert(plan.id, Arc::clone(&plan));

        info!(plan = %plan.id, name = %plan.name, amount = %plan.amount, "Plan created");
        Ok(plan)
    }

    /// Replaces a plan's terms for future purchases only
    pub fn update(&self, id: PlanId, terms: PlanTerms, now: DateTime<Utc>) -> EngineResult<Arc<InvestmentPlan>> {
        terms.validate()?;
        let mut entry = self
            .plans
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(format!("plan {}", id)))?;
        let plan = Arc::new(Self::build(id, terms, entry.is_active, now));
        *entry = Arc::clone(&plan);

        info!(plan = %id, "Plan terms replaced");
        Ok(plan)
    }

    pub fn set_active(&self, id: PlanId, is_active: bool) -> EngineResult<()> {
        let mut entry = self
            .plans
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(format!("plan {}", id)))?;
        let mut plan = (**entry).clone();
        plan.is_active = is_active;
        *entry = Arc::new(plan);
        Ok(())
    }

    pub fn get(&self, id: PlanId) -> EngineResult<Arc<InvestmentPlan>> {
        self.plans
            .get(&id)
            .map(|p| Arc::clone(p.value()))
            .ok_or_else(|| EngineError::not_found(format!("plan {}", id)))
    }

    pub fn list_active(&self) -> Vec<Arc<InvestmentPlan>> {
        let mut plans: Vec<_> = self
            .plans
            .iter()
            .filter(|p| p.is_active)
            .map(|p| Arc::clone(p.value()))
            .collect();
        plans.sort_by(|a, b| a.amount.cmp(&b.amount));
        plans
    }

    fn build(id: PlanId, terms: PlanTerms, is_active: bool, now: DateTime<Utc>) -> InvestmentPlan {
        InvestmentPlan {
            id,
            name: terms.name,
            amount: terms.amount,
            roi_amount: terms.roi_amount,
            duration_times: terms.duration_times,
            frequency: terms.frequency,
            boost_percent: terms.boost_percent,
            refund_timeline_days: terms.refund_timeline_days,
            is_active,
            created_at: now,
        }
    }
}
