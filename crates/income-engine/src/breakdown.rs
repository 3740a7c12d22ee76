//! Breakdown (early exit)
//!
//! Quotes and executes the early termination of an active investment. While a
//! request is pending, ROI keeps accruing split between the ROI wallet and the
//! BREAKDOWN escrow wallet, and boost income from the investment is paused.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tierfolio_core::{
    percent_of, BreakdownId, Clock, Currency, EngineError, EngineResult, InvestmentId,
    SettingsStore, Transaction, TransactionId, TransactionStatus, TransactionType, UserId,
    WalletKey, WalletType,
};
use tracing::info;
use uuid::Uuid;
use wallet_ledger::fees;
use wallet_ledger::{PostRequest, WalletLedger};

use crate::lifecycle::{Investment, InvestmentBook, InvestmentStatus};

/// The three figures of the early-exit formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownFigures {
    pub investment_after_deduction: Decimal,
    pub roi_penalty: Decimal,
    pub breakdown_amount: Decimal,
}

/// `max(0, amount × (100 − deduction) / 100 − roi × 0.5)`
pub fn breakdown_amount(
    investment_amount: Decimal,
    deduction_percent: Decimal,
    total_roi_credited: Decimal,
) -> BreakdownFigures {
    let investment_after_deduction =
        investment_amount * (Decimal::ONE_HUNDRED - deduction_percent) / Decimal::ONE_HUNDRED;
    let roi_penalty = total_roi_credited * Decimal::new(5, 1);
    let breakdown_amount = (investment_after_deduction - roi_penalty).max(Decimal::ZERO);

    BreakdownFigures {
        investment_after_deduction,
        roi_penalty,
        breakdown_amount,
    }
}

/// Calendar days (UTC) between the start date and today
pub fn days_since_start(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now.date_naive() - start.date_naive()).num_days()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakdownStatus {
    Pending,
    Cancelled,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRequest {
    pub id: BreakdownId,
    pub investment_id: InvestmentId,
    pub status: BreakdownStatus,
    /// Amount quoted at request time; approval recomputes it
    pub amount: Decimal,
    /// Wallet the payout lands in on approval
    pub payout_wallet: WalletType,
    pub config_version: u64,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// PENDING BREAKDOWN credits holding the withheld ROI share
    #[serde(default)]
    pub escrow_holds: Vec<TransactionId>,
}

impl BreakdownRequest {
    /// Whether the request was pending at `at`
    pub fn was_open_at(&self, at: DateTime<Utc>) -> bool {
        self.created_at <= at && self.closed_at.map_or(true, |closed| at < closed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakdownQuote {
    pub investment_id: InvestmentId,
    pub investment_amount: Decimal,
    pub deduction_percent: Decimal,
    pub total_roi_credited: Decimal,
    #[serde(flatten)]
    pub figures: BreakdownFigures,
    pub days_since_start: i64,
    pub refund_timeline_days: u32,
    pub window_open: bool,
    pub config_version: u64,
}

/// Result of an approved breakdown
#[derive(Debug, Clone, Serialize)]
pub struct BreakdownSettlement {
    pub request: BreakdownRequest,
    /// Absent when the formula yields zero
    pub payout: Option<Transaction>,
}

pub struct BreakdownDesk {
    book: Arc<InvestmentBook>,
    ledger: Arc<WalletLedger>,
    settings: Arc<SettingsStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for BreakdownDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakdownDesk").finish_non_exhaustive()
    }
}

impl BreakdownDesk {
    pub fn new(
        book: Arc<InvestmentBook>,
        ledger: Arc<WalletLedger>,
        settings: Arc<SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            book,
            ledger,
            settings,
            clock,
        }
    }

    fn quote_for(investment: &Investment, deduction_percent: Decimal, version: u64, now: DateTime<Utc>) -> BreakdownQuote {
        let days = investment
            .start_date
            .map(|start| days_since_start(start, now))
            .unwrap_or(0);
        let figures = breakdown_amount(investment.amount, deduction_percent, investment.roi_earned);

        BreakdownQuote {
            investment_id: investment.id,
            investment_amount: investment.amount,
            deduction_percent,
            total_roi_credited: investment.roi_earned,
            figures: BreakdownFigures {
                breakdown_amount: Currency::Usdt.round(figures.breakdown_amount),
                ..figures
            },
            days_since_start: days,
            refund_timeline_days: investment.refund_timeline_days,
            window_open: investment.status == InvestmentStatus::Active
                && days <= i64::from(investment.refund_timeline_days),
            config_version: version,
        }
    }

    pub async fn quote(&self, user_id: &str, investment_id: InvestmentId) -> EngineResult<BreakdownQuote> {
        let snapshot = self.settings.current()?;
        let investment = self.book.snapshot(investment_id).await?;
        investment.ensure_owner(user_id)?;

        Ok(Self::quote_for(
            &investment,
            snapshot.settings.deduction_percent,
            snapshot.version,
            self.clock.now(),
        ))
    }

    /// Opens a PENDING request inside the refund window
    pub async fn request(
        &self,
        user_id: &str,
        investment_id: InvestmentId,
        payout_wallet: WalletType,
    ) -> EngineResult<BreakdownRequest> {
        if !matches!(payout_wallet, WalletType::Usdt | WalletType::Inr | WalletType::Breakdown) {
            return Err(EngineError::invalid_field(
                "payout_wallet",
                format!("breakdown payouts cannot go to the {} wallet", payout_wallet),
            ));
        }
        let snapshot = self.settings.current()?;

        let investment = self.book.get(investment_id)?;
        let mut guard = investment.lock().await;
        guard.ensure_owner(user_id)?;

        if guard.status != InvestmentStatus::Active {
            return Err(EngineError::invalid_transition(
                format!("investment {}", investment_id),
                guard.status,
                InvestmentStatus::Cancelled,
            ));
        }
        if guard.pending_breakdown().is_some() {
            return Err(EngineError::breakdown_already_requested(investment_id));
        }

        let now = self.clock.now();
        let quote = Self::quote_for(&guard, snapshot.settings.deduction_percent, snapshot.version, now);
        if !quote.window_open {
            return Err(EngineError::WindowClosed {
                days_since_start: quote.days_since_start,
                refund_timeline_days: quote.refund_timeline_days,
            });
        }

        let request = BreakdownRequest {
            id: Uuid::new_v4(),
            investment_id,
            status: BreakdownStatus::Pending,
            amount: quote.figures.breakdown_amount,
            payout_wallet,
            config_version: snapshot.version,
            created_at: now,
            closed_at: None,
            escrow_holds: Vec::new(),
        };
        guard.breakdowns.push(request.clone());

        info!(
            investment = %investment_id,
            breakdown = %request.id,
            amount = %request.amount,
            "Breakdown requested, ROI split and boost paused"
        );
        Ok(request)
    }

    /// Withdraws the investor's own pending request
    pub async fn cancel(&self, user_id: &str, investment_id: InvestmentId) -> EngineResult<BreakdownRequest> {
        self.close_pending(Some(user_id), investment_id).await
    }

    /// Admin refusal of a pending request; same effect as a cancel
    pub async fn decline(&self, investment_id: InvestmentId) -> EngineResult<BreakdownRequest> {
        self.close_pending(None, investment_id).await
    }

    async fn close_pending(&self, owner: Option<&str>, investment_id: InvestmentId) -> EngineResult<BreakdownRequest> {
        let investment = self.book.get(investment_id)?;
        let mut guard = investment.lock().await;
        if let Some(user_id) = owner {
            guard.ensure_owner(user_id)?;
        }

        let now = self.clock.now();
        let pending = guard
            .pending_breakdown()
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("pending breakdown for investment {}", investment_id)))?;
        self.release_escrow(&guard.user_id, &pending, now).await?;

        let request = match guard.pending_breakdown_mut() {
            Some(request) => {
                request.status = BreakdownStatus::Cancelled;
                request.closed_at = Some(now);
                request.clone()
            }
            None => return Err(EngineError::not_found(format!("breakdown {}", pending.id))),
        };

        info!(investment = %investment_id, breakdown = %request.id, "Breakdown cancelled, full ROI resumes");
        Ok(request)
    }

    /// Pays the early-exit amount and cancels the investment.
    ///
    /// The amount is recomputed from the ROI credited so far and the current
    /// deduction percent, so ROI accrued while the request was pending is counted.
    pub async fn approve(&self, investment_id: InvestmentId) -> EngineResult<BreakdownSettlement> {
        let snapshot = self.settings.current()?;
        let investment = self.book.get(investment_id)?;
        let mut guard = investment.lock().await;

        let pending = guard
            .pending_breakdown()
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("pending breakdown for investment {}", investment_id)))?;
        let (request_id, payout_wallet) = (pending.id, pending.payout_wallet);
        if guard.status != InvestmentStatus::Active {
            return Err(EngineError::invalid_transition(
                format!("investment {}", investment_id),
                guard.status,
                InvestmentStatus::Cancelled,
            ));
        }

        let now = self.clock.now();
        self.release_escrow(&guard.user_id, &pending, now).await?;
        let figures = breakdown_amount(guard.amount, snapshot.settings.deduction_percent, guard.roi_earned);
        let amount = Currency::Usdt.round(figures.breakdown_amount);
        let wallet = WalletKey::new(guard.user_id.clone(), payout_wallet);
        let payout_amount = fees::convert(amount, Currency::Usdt, wallet.currency(), snapshot.settings.currency_rate)?;

        let payout = if payout_amount > Decimal::ZERO {
            let posting = self
                .ledger
                .post(
                    PostRequest::credit(wallet, TransactionType::Breakdown, payout_amount)
                        .description(format!(
                            "Breakdown of investment {} ({}% deduction, ROI penalty {})",
                            investment_id, snapshot.settings.deduction_percent, figures.roi_penalty
                        ))
                        .reference(format!("breakdown:{}", request_id))
                        .config_version(snapshot.version),
                    now,
                )
                .await?;
            Some(posting.transaction)
        } else {
            None
        };

        guard.transition(InvestmentStatus::Cancelled)?;
        guard.end_date = Some(now);
        let (user_id, plan_id) = (guard.user_id.clone(), guard.plan_id());
        let request = match guard.pending_breakdown_mut() {
            Some(request) => {
                request.status = BreakdownStatus::Approved;
                request.amount = amount;
                request.config_version = snapshot.version;
                request.closed_at = Some(now);
                request.clone()
            }
            None => return Err(EngineError::not_found(format!("breakdown {}", request_id))),
        };
        self.book.release_slot(&user_id, plan_id, investment_id);

        info!(
            investment = %investment_id,
            breakdown = %request_id,
            %amount,
            escrow_released = pending.escrow_holds.len(),
            deduction = %percent_of(guard.amount, snapshot.settings.deduction_percent),
            "Breakdown approved, investment cancelled"
        );
        Ok(BreakdownSettlement { request, payout })
    }

    /// Completes the held escrow credits once the request closes either way.
    ///
    /// Holds settled by an earlier, interrupted attempt are skipped.
    async fn release_escrow(&self, user_id: &UserId, request: &BreakdownRequest, now: DateTime<Utc>) -> EngineResult<()> {
        let wallet = WalletKey::new(user_id.clone(), WalletType::Breakdown);
        for hold in &request.escrow_holds {
            match self
                .ledger
                .settle(
                    &wallet,
                    *hold,
                    TransactionStatus::Completed,
                    format!("Escrowed ROI released, breakdown {}", request.id),
                    now,
                )
                .await
            {
                Ok(_) | Err(EngineError::AlreadyProcessed { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
