//! Income Engine
//!
//! Investment plans and their lifecycle, the ROI accrual scheduler, early-exit
//! breakdowns, referral boost income and progressive salary levels, wired together
//! behind [`IncomeEngine`].
//!
//! Core Features:
//! - Idempotent ROI crediting per (investment, period)
//! - 50/50 ROI escrow and boost pause while a breakdown is pending
//! - Depth-2 referral boost gated on current referral count
//! - Time-boxed salary qualification and level windows

pub mod boost;
pub mod breakdown;
pub mod lifecycle;
pub mod plans;
pub mod referral;
pub mod roi;
pub mod salary;
pub mod schedule;
pub mod views;

pub use boost::{BoostEngine, BoostRecord, BoostSummary};
pub use breakdown::{
    breakdown_amount, BreakdownDesk, BreakdownFigures, BreakdownQuote, BreakdownRequest,
    BreakdownSettlement, BreakdownStatus,
};
pub use lifecycle::{
    AuthKey, Investment, InvestmentBook, InvestmentStatus, LifecycleManager, PurchaseMethod,
};
pub use plans::{InvestmentPlan, PayoutFrequency, PlanCatalog, PlanTerms};
pub use referral::{Member, ReferralEdge, ReferralGraph};
pub use roi::{real_time_roi, AccrualStats, RoiPosting, RoiScheduler};
pub use salary::{SalaryEngine, SalaryPayout, SalaryProgress, SalaryState, SalaryStats};
pub use views::{InvestmentView, WalletOverview, WalletView};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tierfolio_core::{
    Clock, EngineError, EngineResult, InvestmentId, KycDirectory, PlanId, SettingsStore,
    Transaction, UserId, WalletType,
};
use tracing::{debug, info, info_span, Instrument};
use wallet_ledger::{Cashier, HistoryFilter, WalletLedger};

/// Counts from one scheduler tick
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub roi: AccrualStats,
    pub salary: SalaryStats,
    pub duration_ms: u64,
}

/// Facade over every engine component, shared by the scheduler and request handlers
pub struct IncomeEngine {
    settings: Arc<SettingsStore>,
    ledger: Arc<WalletLedger>,
    cashier: Arc<Cashier>,
    catalog: Arc<PlanCatalog>,
    book: Arc<InvestmentBook>,
    graph: Arc<ReferralGraph>,
    lifecycle: LifecycleManager,
    breakdowns: BreakdownDesk,
    scheduler: RoiScheduler,
    boost: Arc<BoostEngine>,
    salary: SalaryEngine,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for IncomeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomeEngine")
            .field("investments", &self.book.len())
            .field("cashier", &self.cashier)
            .finish_non_exhaustive()
    }
}

impl IncomeEngine {
    pub fn new(settings: Arc<SettingsStore>, kyc: Arc<dyn KycDirectory>, clock: Arc<dyn Clock>) -> Self {
        let ledger = Arc::new(WalletLedger::new());
        let catalog = Arc::new(PlanCatalog::new());
        let book = Arc::new(InvestmentBook::new());
        let graph = Arc::new(ReferralGraph::new());

        let cashier = Arc::new(Cashier::new(
            Arc::clone(&ledger),
            Arc::clone(&settings),
            kyc,
            Arc::clone(&clock),
        ));
        let lifecycle = LifecycleManager::new(
            Arc::clone(&catalog),
            Arc::clone(&book),
            Arc::clone(&ledger),
            Arc::clone(&settings),
            Arc::clone(&clock),
        );
        let breakdowns = BreakdownDesk::new(
            Arc::clone(&book),
            Arc::clone(&ledger),
            Arc::clone(&settings),
            Arc::clone(&clock),
        );
        let boost = Arc::new(BoostEngine::new(
            Arc::clone(&graph),
            Arc::clone(&ledger),
            Arc::clone(&settings),
        ));
        let scheduler = RoiScheduler::new(Arc::clone(&book), Arc::clone(&ledger), Arc::clone(&boost));
        let salary = SalaryEngine::new(Arc::clone(&graph), Arc::clone(&ledger), Arc::clone(&settings));

        Self {
            settings,
            ledger,
            cashier,
            catalog,
            book,
            graph,
            lifecycle,
            breakdowns,
            scheduler,
            boost,
            salary,
            clock,
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<WalletLedger> {
        &self.ledger
    }

    pub fn cashier(&self) -> &Arc<Cashier> {
        &self.cashier
    }

    pub fn catalog(&self) -> &Arc<PlanCatalog> {
        &self.catalog
    }

    pub fn graph(&self) -> &Arc<ReferralGraph> {
        &self.graph
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // Members and plans

    pub fn register_user(&self, user_id: &str, referrer: Option<&str>) -> EngineResult<Member> {
        self.graph.register(user_id, referrer, self.clock.now())
    }

    pub fn create_plan(&self, terms: PlanTerms) -> EngineResult<Arc<InvestmentPlan>> {
        self.catalog.create(terms, self.clock.now())
    }

    pub fn update_plan(&self, plan_id: PlanId, terms: PlanTerms) -> EngineResult<Arc<InvestmentPlan>> {
        self.catalog.update(plan_id, terms, self.clock.now())
    }

    pub fn set_plan_active(&self, plan_id: PlanId, is_active: bool) -> EngineResult<()> {
        self.catalog.set_active(plan_id, is_active)
    }

    pub fn issue_auth_key(&self, plan_id: PlanId) -> EngineResult<AuthKey> {
        self.lifecycle.issue_auth_key(plan_id)
    }

    // Investment lifecycle

    fn ensure_member(&self, user_id: &str) -> EngineResult<()> {
        if self.graph.member(user_id).is_none() {
            return Err(EngineError::not_found(format!("member {}", user_id)));
        }
        Ok(())
    }

    pub async fn purchase(&self, user_id: &str, plan_id: PlanId, method: PurchaseMethod) -> EngineResult<Investment> {
        self.ensure_member(user_id)?;
        let investment = self.lifecycle.purchase(user_id, plan_id, method).await?;
        if investment.status == InvestmentStatus::Active {
            self.on_activated(&investment);
        }
        Ok(investment)
    }

    pub async fn approve_investment(&self, investment_id: InvestmentId) -> EngineResult<Investment> {
        let investment = self.lifecycle.approve(investment_id).await?;
        self.on_activated(&investment);
        Ok(investment)
    }

    pub async fn reject_investment(&self, investment_id: InvestmentId) -> EngineResult<Investment> {
        self.lifecycle.reject(investment_id).await
    }

    /// An active investment makes its owner a paid referral and adds upline turnover
    fn on_activated(&self, investment: &Investment) {
        let at = investment.start_date.unwrap_or(investment.created_at);
        self.graph.mark_paid(&investment.user_id, at);
        self.salary
            .record_turnover(&investment.user_id, investment.id, investment.amount, at);
    }

    pub async fn investments(&self, user_id: &str) -> Vec<InvestmentView> {
        let now = self.clock.now();
        let mut views = Vec::new();
        for investment in self.book.for_user(user_id).await {
            let quote = self.breakdown_quote(user_id, investment.id).await.ok();
            views.push(InvestmentView::build(investment, now, quote));
        }
        views.sort_by(|a, b| b.investment.created_at.cmp(&a.investment.created_at));
        views
    }

    pub async fn investment(&self, user_id: &str, investment_id: InvestmentId) -> EngineResult<InvestmentView> {
        let investment = self.book.snapshot(investment_id).await?;
        investment.ensure_owner(user_id)?;
        let quote = self.breakdown_quote(user_id, investment_id).await.ok();
        Ok(InvestmentView::build(investment, self.clock.now(), quote))
    }

    // Breakdown

    pub async fn breakdown_quote(&self, user_id: &str, investment_id: InvestmentId) -> EngineResult<BreakdownQuote> {
        self.breakdowns.quote(user_id, investment_id).await
    }

    pub async fn request_breakdown(
        &self,
        user_id: &str,
        investment_id: InvestmentId,
        payout_wallet: WalletType,
    ) -> EngineResult<BreakdownRequest> {
        self.breakdowns.request(user_id, investment_id, payout_wallet).await
    }

    pub async fn cancel_breakdown(&self, user_id: &str, investment_id: InvestmentId) -> EngineResult<BreakdownRequest> {
        self.breakdowns.cancel(user_id, investment_id).await
    }

    pub async fn approve_breakdown(&self, investment_id: InvestmentId) -> EngineResult<BreakdownSettlement> {
        self.breakdowns.approve(investment_id).await
    }

    pub async fn decline_breakdown(&self, investment_id: InvestmentId) -> EngineResult<BreakdownRequest> {
        self.breakdowns.decline(investment_id).await
    }

    // Income queries

    pub fn boost_summary(&self, user_id: &str) -> EngineResult<BoostSummary> {
        self.boost.summary(user_id)
    }

    pub fn boost_history(&self, user_id: &str) -> Vec<BoostRecord> {
        self.boost.history(user_id)
    }

    /// Salary state as of the last evaluation; the scheduler tick advances it
    pub async fn salary_status(&self, user_id: &str) -> EngineResult<SalaryProgress> {
        self.ensure_member(user_id)?;
        Ok(self.salary.progress(user_id).await)
    }

    /// Advances one user's salary state immediately instead of waiting for the tick
    pub async fn evaluate_salary(&self, user_id: &str) -> EngineResult<SalaryProgress> {
        self.salary.evaluate(user_id, self.clock.now()).await
    }

    pub async fn salary_history(&self, user_id: &str) -> Vec<SalaryPayout> {
        self.salary.history(user_id).await
    }

    pub fn referrals(&self, user_id: &str) -> Vec<ReferralEdge> {
        self.graph.downline(user_id, referral::MAX_DEPTH)
    }

    // Wallets

    pub async fn wallets(&self, user_id: &UserId) -> EngineResult<WalletOverview> {
        let snapshot = self
            .settings
            .latest()
            .ok_or_else(|| EngineError::StaleConfiguration("no settings published".into()))?;
        let accounts = self.ledger.accounts(user_id).await;
        Ok(WalletOverview::build(user_id, accounts, &snapshot))
    }

    pub async fn history(&self, user_id: &UserId, filter: &HistoryFilter) -> Vec<Transaction> {
        self.ledger.history(user_id, filter).await
    }

    // Scheduler

    /// Runs ROI accrual then salary evaluation for the current instant
    pub async fn run_tick(&self) -> TickReport {
        let started_at = self.clock.now();
        let timer = Instant::now();

        let (roi, salary) = async {
            let roi = self.scheduler.run(started_at).await;
            let salary = self.salary.evaluate_all(started_at).await;
            (roi, salary)
        }
        .instrument(info_span!("income_tick", at = %started_at))
        .await;

        let duration_ms = timer.elapsed().as_millis() as u64;
        metrics::gauge!("tierfolio_tick_duration_ms", duration_ms as f64);

        let report = TickReport {
            started_at,
            roi,
            salary,
            duration_ms,
        };
        if roi.credited > 0 || roi.failed > 0 || salary.credited > 0 {
            info!(
                credited = roi.credited,
                failed = roi.failed,
                completed = roi.completed,
                salaries = salary.credited,
                duration_ms,
                "Income tick finished"
            );
        } else {
            debug!(evaluated = roi.evaluated, duration_ms, "Income tick finished, nothing due");
        }
        report
    }
}

/// Drives [`IncomeEngine::run_tick`] on a fixed interval until the task is aborted
pub fn spawn_scheduler(engine: Arc<IncomeEngine>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let report = engine.run_tick().await;
            debug!(
                evaluated = report.roi.evaluated,
                skipped = report.roi.skipped,
                "Scheduler tick complete"
            );
        }
    })
}
