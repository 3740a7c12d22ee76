//! Referral Boost Engine
//!
//! Passes a share of every ROI posting up to two levels of referrers. A referrer
//! earns only while their current direct referral count meets the platform
//! minimum; the check happens on each posting, never retroactively.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tierfolio_core::{
    percent_of, Currency, EngineError, EngineResult, InvestmentId, SettingsStore, TransactionId,
    TransactionType, UserId, WalletKey, WalletType,
};
use tracing::{debug, info};
use wallet_ledger::{PostRequest, WalletLedger};

use crate::referral::{ReferralGraph, MAX_DEPTH};
use crate::roi::RoiPosting;

/// One boost credit paid to a referrer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostRecord {
    pub beneficiary: UserId,
    pub source_user: UserId,
    pub investment_id: InvestmentId,
    pub period_index: u32,
    /// Distance between beneficiary and the investor
    pub level: u8,
    pub roi_amount: Decimal,
    pub boost_percent: Decimal,
    pub amount: Decimal,
    pub transaction_id: TransactionId,
    pub config_version: u64,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostSummary {
    pub user_id: UserId,
    pub qualified: bool,
    pub referral_count: u32,
    pub min_referrals_required: u32,
    pub total_earned: Decimal,
    pub postings: usize,
}

#[derive(Debug)]
pub struct BoostEngine {
    graph: Arc<ReferralGraph>,
    ledger: Arc<WalletLedger>,
    settings: Arc<SettingsStore>,
    history: DashMap<UserId, Vec<BoostRecord>>,
}

impl BoostEngine {
    pub fn new(graph: Arc<ReferralGraph>, ledger: Arc<WalletLedger>, settings: Arc<SettingsStore>) -> Self {
        Self {
            graph,
            ledger,
            settings,
            history: DashMap::new(),
        }
    }

    pub fn is_qualified(&self, user_id: &str, min_referrals_required: u32) -> bool {
        self.graph.referral_count(user_id) >= min_referrals_required
    }

    /// Pays boost income for one ROI posting.
    ///
    /// Each (investment, period, beneficiary) is posted at most once, so a retried
    /// posting only fills in the beneficiaries that failed before.
    pub async fn on_roi_posted(&self, posting: &RoiPosting) -> EngineResult<Vec<BoostRecord>> {
        if posting.boost_paused || posting.boost_percent <= Decimal::ZERO {
            debug!(investment = %posting.investment_id, period = posting.period_index, "Boost skipped");
            return Ok(Vec::new());
        }

        let snapshot = self.settings.current()?;
        let min_referrals = snapshot.settings.min_referrals_required;
        let amount = Currency::Usdt.round(percent_of(posting.roi_amount, posting.boost_percent));
        if amount <= Decimal::ZERO {
            return Ok(Vec::new());
        }

        let mut paid = Vec::new();
        for (beneficiary, level) in self.graph.upline(&posting.investor, MAX_DEPTH) {
            if !self.is_qualified(&beneficiary, min_referrals) {
                debug!(
                    beneficiary = %beneficiary,
                    referrals = self.graph.referral_count(&beneficiary),
                    min_referrals,
                    "Referrer not qualified for boost"
                );
                continue;
            }

            let result = self
                .ledger
                .post(
                    PostRequest::credit(
                        WalletKey::new(beneficiary.clone(), WalletType::Usdt),
                        TransactionType::BoostIncome,
                        amount,
                    )
                    .description(format!(
                        "Boost {}% of ROI from {} (level {})",
                        posting.boost_percent, posting.investor, level
                    ))
                    .reference(format!(
                        "boost:{}:{}:{}",
                        posting.investment_id, posting.period_index, beneficiary
                    ))
                    .config_version(snapshot.version),
                    posting.posted_at,
                )
                .await?;
            if result.replayed {
                continue;
            }

            let record = BoostRecord {
                beneficiary: beneficiary.clone(),
                source_user: posting.investor.clone(),
                investment_id: posting.investment_id,
                period_index: posting.period_index,
                level,
                roi_amount: posting.roi_amount,
                boost_percent: posting.boost_percent,
                amount,
                transaction_id: result.transaction.id,
                config_version: snapshot.version,
                posted_at: posting.posted_at,
            };
            self.history
                .entry(beneficiary.clone())
                .or_default()
                .push(record.clone());
            metrics::counter!("tierfolio_boost_credits_total", 1);
            info!(beneficiary = %beneficiary, investment = %posting.investment_id, %amount, level, "Boost credited");
            paid.push(record);
        }

        Ok(paid)
    }

    /// Boost credits received by a user, newest first
    pub fn history(&self, user_id: &str) -> Vec<BoostRecord> {
        let mut records = self
            .history
            .get(user_id)
            .map(|r| r.value().clone())
            .unwrap_or_default();
        records.reverse();
        records
    }

    pub fn summary(&self, user_id: &str) -> EngineResult<BoostSummary> {
        let min_referrals_required = self
            .settings
            .latest()
            .map(|s| s.settings.min_referrals_required)
            .ok_or_else(|| EngineError::StaleConfiguration("no settings published".into()))?;
        let (total_earned, postings) = self
            .history
            .get(user_id)
            .map(|r| (r.iter().map(|b| b.amount).sum::<Decimal>(), r.len()))
            .unwrap_or((Decimal::ZERO, 0));
        let referral_count = self.graph.referral_count(user_id);

        Ok(BoostSummary {
            user_id: user_id.to_string(),
            qualified: referral_count >= min_referrals_required,
            referral_count,
            min_referrals_required,
            total_earned,
            postings,
        })
    }
}
