//! ROI Accrual Scheduler
//!
//! Posts every due ROI period of every ACTIVE investment. Each period is
//! addressed by `(investment, period index)` and posted with a ledger reference
//! derived from that pair, so overlapping or repeated runs never double-credit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tierfolio_core::{
    Currency, EngineResult, InvestmentId, PlanId, TransactionType, UserId, WalletKey, WalletType,
};
use tracing::{debug, info, warn};
use wallet_ledger::{PostRequest, WalletLedger};

use crate::boost::BoostEngine;
use crate::breakdown::BreakdownStatus;
use crate::lifecycle::{Investment, InvestmentBook, InvestmentStatus};
use crate::schedule;

/// A single ROI period credited to an investor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiPosting {
    pub investment_id: InvestmentId,
    pub investor: UserId,
    pub plan_id: PlanId,
    pub period_index: u32,
    /// Full ROI for the period
    pub roi_amount: Decimal,
    pub credited_to_roi: Decimal,
    /// Share withheld into the BREAKDOWN wallet while a breakdown is pending
    pub escrowed: Decimal,
    pub boost_percent: Decimal,
    pub boost_paused: bool,
    pub posted_at: DateTime<Utc>,
}

/// What one accrual pass did for one investment
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccrualOutcome {
    pub postings: Vec<RoiPosting>,
    pub completed: bool,
}

/// Totals of one scheduler run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualStats {
    pub evaluated: usize,
    /// Periods posted in this run
    pub credited: usize,
    /// Investments with nothing due
    pub skipped: usize,
    pub failed: usize,
    pub completed: usize,
}

/// Display-only estimate of ROI including the unposted part of the current period
pub fn real_time_roi(investment: &Investment, now: DateTime<Utc>) -> Decimal {
    let earned = investment.roi_earned;
    let Some(start) = investment.start_date else {
        return earned;
    };
    if investment.status != InvestmentStatus::Active
        || investment.periods_credited >= investment.plan.duration_times
    {
        return earned;
    }
    let Some((opens, closes)) =
        schedule::period_bounds(start, &investment.plan.frequency, investment.periods_credited)
    else {
        return earned;
    };

    let length = (closes - opens).num_milliseconds();
    if length <= 0 {
        return earned;
    }
    let elapsed = (now - opens).num_milliseconds().clamp(0, length);
    let fraction = Decimal::from(elapsed) / Decimal::from(length);

    Currency::Usdt.round(earned + investment.plan.roi_amount * fraction)
}

pub struct RoiScheduler {
    book: Arc<InvestmentBook>,
    ledger: Arc<WalletLedger>,
    boost: Arc<BoostEngine>,
}

impl std::fmt::Debug for RoiScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoiScheduler")
            .field("investments", &self.book.len())
            .finish_non_exhaustive()
    }
}

impl RoiScheduler {
    pub fn new(book: Arc<InvestmentBook>, ledger: Arc<WalletLedger>, boost: Arc<BoostEngine>) -> Self {
        Self { book, ledger, boost }
    }

    /// Credits every period of one investment that is due at `now`.
    ///
    /// Counters only advance after the ROI, escrow and boost postings of a period
    /// all succeeded; a failure leaves the period to be retried in full.
    pub async fn accrue_investment(&self, investment_id: InvestmentId, now: DateTime<Utc>) -> EngineResult<AccrualOutcome> {
        let investment = self.book.get(investment_id)?;
        let mut guard = investment.lock().await;
        let mut outcome = AccrualOutcome::default();

        if guard.status != InvestmentStatus::Active {
            return Ok(outcome);
        }
        let Some(start) = guard.start_date else {
            return Ok(outcome);
        };

        let plan = guard.plan.clone();
        let due = schedule::due_count(start, &plan.frequency, now, plan.duration_times);

        while guard.periods_credited < due {
            let period_index = guard.periods_credited;
            let posted_at = schedule::due_date(start, &plan.frequency, period_index).unwrap_or(now);
            let posting = self.post_period(&mut guard, period_index, posted_at).await?;

            self.boost.on_roi_posted(&posting).await?;

            guard.roi_earned += plan.roi_amount;
            guard.periods_credited += 1;
            metrics::counter!("tierfolio_roi_credits_total", 1);
            outcome.postings.push(posting);
        }

        if guard.periods_credited >= plan.duration_times {
            guard.transition(InvestmentStatus::Completed)?;
            guard.end_date = schedule::due_date(start, &plan.frequency, plan.duration_times - 1);
            self.book.release_slot(&guard.user_id, plan.id, guard.id);
            outcome.completed = true;

            info!(
                investment = %guard.id,
                user = %guard.user_id,
                roi_earned = %guard.roi_earned,
                "Investment completed"
            );
        }

        Ok(outcome)
    }

    /// Posts one period. The split is decided by the breakdown request that was
    /// pending when the period fell due, not by the state at tick time.
    async fn post_period(
        &self,
        investment: &mut Investment,
        period_index: u32,
        posted_at: DateTime<Utc>,
    ) -> EngineResult<RoiPosting> {
        let roi_amount = investment.plan.roi_amount;
        // Some(true): request still pending, the withheld share stays on hold
        let escrow_held = investment
            .breakdown_open_at_mut(posted_at)
            .map(|request| request.status == BreakdownStatus::Pending);
        let wanted_roi = if escrow_held.is_some() {
            Currency::Usdt.round(roi_amount / Decimal::TWO)
        } else {
            roi_amount
        };

        let roi_posting = self
            .ledger
            .post(
                PostRequest::credit(
                    WalletKey::new(investment.user_id.clone(), WalletType::Roi),
                    TransactionType::RoiCredit,
                    wanted_roi,
                )
                .description(format!("ROI period {} of {}", period_index + 1, investment.plan.name))
                .reference(format!("roi:{}:{}", investment.id, period_index)),
                posted_at,
            )
            .await?;

        // A retried period keeps the split it was first posted with
        let credited_to_roi = roi_posting.transaction.amount;
        let escrowed = roi_amount - credited_to_roi;
        if escrowed > Decimal::ZERO {
            let wallet = WalletKey::new(investment.user_id.clone(), WalletType::Breakdown);
            let reference = format!("roi-escrow:{}:{}", investment.id, period_index);
            let request = PostRequest::credit(wallet.clone(), TransactionType::RoiCredit, escrowed)
                .description(format!("Escrowed ROI period {} pending breakdown", period_index + 1))
                .reference(reference.clone());

            if self.ledger.find_reference(&wallet, &reference).await.is_none() {
                if escrow_held == Some(true) {
                    let hold = self.ledger.record_pending_credit(request, posted_at).await?;
                    if let Some(open) = investment.breakdown_open_at_mut(posted_at) {
                        open.escrow_holds.push(hold.id);
                    }
                } else {
                    self.ledger.post(request, posted_at).await?;
                }
            }
        }

        debug!(
            investment = %investment.id,
            period = period_index,
            %credited_to_roi,
            %escrowed,
            replayed = roi_posting.replayed,
            "ROI period posted"
        );

        Ok(RoiPosting {
            investment_id: investment.id,
            investor: investment.user_id.clone(),
            plan_id: investment.plan.id,
            period_index,
            roi_amount,
            credited_to_roi,
            escrowed,
            boost_percent: investment.plan.boost_percent,
            boost_paused: escrowed > Decimal::ZERO,
            posted_at,
        })
    }

    /// Evaluates every investment independently; one failure never stops the batch
    pub async fn run(&self, now: DateTime<Utc>) -> AccrualStats {
        let mut stats = AccrualStats::default();

        for investment_id in self.book.ids() {
            stats.evaluated += 1;
            match self.accrue_investment(investment_id, now).await {
                Ok(outcome) if outcome.postings.is_empty() && !outcome.completed => stats.skipped += 1,
                Ok(outcome) => {
                    stats.credited += outcome.postings.len();
                    stats.completed += usize::from(outcome.completed);
                }
                Err(e) => {
                    stats.failed += 1;
                    metrics::counter!("tierfolio_roi_failures_total", 1);
                    warn!(investment = %investment_id, error = %e, "ROI accrual failed, retrying next tick");
                }
            }
        }

        debug!(?stats, "ROI accrual run finished");
        stats
    }
}
