//! # Platform Settings
//!
//! Admin-controlled configuration consumed by every money-moving path. Settings are
//! published as immutable, numbered snapshots so a transaction can record exactly
//! which fee, rate and threshold values produced it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};

/// Referral counts that satisfy the salary qualification gate (either suffices)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredReferrals {
    pub free: u32,
    pub paid: u32,
}

impl Default for RequiredReferrals {
    fn default() -> Self {
        Self { free: 10, paid: 3 }
    }
}

/// One row of the progressive salary table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryLevel {
    /// 1-based level number
    pub level: u32,
    /// Downline turnover (USDT) needed within the level window
    pub turnover_required: Decimal,
    /// One-time salary credit (USDT) on reaching the target
    pub salary_amount: Decimal,
    /// Window length measured from the moment the level was entered
    pub timeline_days: u32,
}

/// Admin settings store contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    /// Percent of principal withheld on an early exit
    pub deduction_percent: Decimal,
    pub min_deposit_usdt: Decimal,
    pub min_withdrawal_usdt: Decimal,
    pub deposit_fee_percent: Decimal,
    pub withdrawal_fee_percent: Decimal,
    /// Confirmed on-chain deposits at or below this USDT amount credit without review
    pub auto_credit_threshold: Decimal,
    /// Direct referrals a user needs before boost income is paid to them
    pub min_referrals_required: u32,
    pub salary_levels: Vec<SalaryLevel>,
    pub qualification_time_limit_hours: u32,
    pub required_referrals: RequiredReferrals,
    /// INR per USDT
    pub currency_rate: Decimal,
    /// Breakdown window used when an investment carries none
    pub default_refund_timeline_days: u32,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            deduction_percent: Decimal::new(20, 0),
            min_deposit_usdt: Decimal::new(10, 0),
            min_withdrawal_usdt: Decimal::new(10, 0),
            deposit_fee_percent: Decimal::ZERO,
            withdrawal_fee_percent: Decimal::new(5, 0),
            auto_credit_threshold: Decimal::new(500, 0),
            min_referrals_required: 3,
            salary_levels: vec![
                SalaryLevel {
                    level: 1,
                    turnover_required: Decimal::new(5_000, 0),
                    salary_amount: Decimal::new(100, 0),
                    timeline_days: 30,
                },
                SalaryLevel {
                    level: 2,
                    turnover_required: Decimal::new(15_000, 0),
                    salary_amount: Decimal::new(300, 0),
                    timeline_days: 45,
                },
                SalaryLevel {
                    level: 3,
                    turnover_required: Decimal::new(50_000, 0),
                    salary_amount: Decimal::new(1_000, 0),
                    timeline_days: 60,
                },
            ],
            qualification_time_limit_hours: 72,
            required_referrals: RequiredReferrals::default(),
            currency_rate: Decimal::new(83, 0),
            default_refund_timeline_days: 30,
        }
    }
}

impl PlatformSettings {
    /// Validates the settings values
    pub fn validate(&self) -> EngineResult<()> {
        let percentages = [
            ("deduction_percent", self.deduction_percent),
            ("deposit_fee_percent", self.deposit_fee_percent),
            ("withdrawal_fee_percent", self.withdrawal_fee_percent),
        ];
        for (field, value) in percentages {
            if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
                return Err(EngineError::invalid_field(
                    field,
                    format!("{} must be between 0 and 100, got {}", field, value),
                ));
            }
        }

        if self.currency_rate <= Decimal::ZERO {
            return Err(EngineError::invalid_field(
                "currency_rate",
                "currency rate must be greater than 0",
            ));
        }

        if self.min_deposit_usdt < Decimal::ZERO || self.min_withdrawal_usdt < Decimal::ZERO {
            return Err(EngineError::validation("minimum amounts cannot be negative"));
        }

        if self.salary_levels.is_empty() {
            return Err(EngineError::invalid_field(
                "salary_levels",
                "at least one salary level is required",
            ));
        }

        for (index, level) in self.salary_levels.iter().enumerate() {
            if level.level as usize != index + 1 {
                return Err(EngineError::invalid_field(
                    "salary_levels",
                    format!("levels must be numbered 1..n, found {} at position {}", level.level, index + 1),
                ));
            }
            if level.turnover_required <= Decimal::ZERO
                || level.salary_amount <= Decimal::ZERO
                || level.timeline_days == 0
            {
                return Err(EngineError::invalid_field(
                    "salary_levels",
                    format!("level {} must have positive target, salary and timeline", level.level),
                ));
            }
        }

        Ok(())
    }

    pub fn salary_level(&self, level: u32) -> Option<&SalaryLevel> {
        self.salary_levels.get(level.checked_sub(1)? as usize)
    }
}

/// Immutable settings version
#[derive(Debug, Clone, Serialize)]
pub struct SettingsSnapshot {
    pub version: u64,
    pub settings: PlatformSettings,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreState {
    history: Vec<Arc<SettingsSnapshot>>,
    stale_reason: Option<String>,
}

/// Versioned settings store.
///
/// `current()` fails closed with `StaleConfiguration` while no snapshot exists or
/// after the rate feed reported a failure.
#[derive(Debug, Default)]
pub struct SettingsStore {
    state: RwLock<StoreState>,
}

impl SettingsStore {
    /// Creates a store seeded with a first snapshot (version 1)
    pub fn new(settings: PlatformSettings) -> EngineResult<Self> {
        let store = Self::default();
        store.publish(settings)?;
        Ok(store)
    }

    /// Returns the snapshot money-moving paths must use
    pub fn current(&self) -> EngineResult<Arc<SettingsSnapshot>> {
        let state = self.state.read();
        if let Some(reason) = &state.stale_reason {
            return Err(EngineError::StaleConfiguration(reason.clone()));
        }
        state
            .history
            .last()
            .cloned()
            .ok_or_else(|| EngineError::StaleConfiguration("no settings published".into()))
    }

    /// Latest snapshot regardless of staleness, for display-only reads
    pub fn latest(&self) -> Option<Arc<SettingsSnapshot>> {
        self.state.read().history.last().cloned()
    }

    /// Looks up a historical snapshot
    pub fn version(&self, version: u64) -> Option<Arc<SettingsSnapshot>> {
        let state = self.state.read();
        state
            .history
            .iter()
            .find(|snapshot| snapshot.version == version)
            .cloned()
    }

    /// Publishes a new settings version, clearing any stale flag
    pub fn publish(&self, settings: PlatformSettings) -> EngineResult<u64> {
        settings.validate()?;

        let mut state = self.state.write();
        let version = state.history.last().map(|s| s.version + 1).unwrap_or(1);
        state.history.push(Arc::new(SettingsSnapshot {
            version,
            settings,
            published_at: Utc::now(),
        }));
        state.stale_reason = None;

        info!(version, "Published platform settings");
        Ok(version)
    }

    /// Applies a fresh INR/USDT rate from the admin feed as a new version
    pub fn update_rate(&self, currency_rate: Decimal) -> EngineResult<u64> {
        let mut settings = self
            .latest()
            .map(|snapshot| snapshot.settings.clone())
            .ok_or_else(|| EngineError::StaleConfiguration("no settings published".into()))?;
        settings.currency_rate = currency_rate;
        self.publish(settings)
    }

    /// Records a failed rate/settings refresh; money paths fail until the next publish
    pub fn mark_stale<S: Into<String>>(&self, reason: S) {
        let reason = reason.into();
        warn!(%reason, "Platform settings marked stale");
        self.state.write().stale_reason = Some(reason);
    }
}
