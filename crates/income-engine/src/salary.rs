//! Progressive Salary Leveling Engine
//!
//! A user first has to pass a qualification gate within a fixed number of hours
//! of joining. Once qualified, each level has its own turnover target and window;
//! turnover is the investment volume of the user's first two downline levels
//! inside that window. Reaching a target pays the level's salary once and opens
//! the next level. Missing a window freezes the user at that level for good.
//!
//! Every transition is derived from recorded timestamps, so evaluating late
//! gives the same result as evaluating on time.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tierfolio_core::{
    EngineError, EngineResult, InvestmentId, PlatformSettings, SettingsStore, TransactionId,
    TransactionType, UserId, WalletKey, WalletType,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wallet_ledger::{PostRequest, WalletLedger};

use crate::referral::{Member, ReferralGraph, MAX_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "level", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalaryState {
    NotStarted,
    /// Inside the qualification window, gate not met yet
    Qualifying,
    /// Working toward the target of this level
    Level(u32),
    /// Missed the window of this level; no further progress
    Frozen(u32),
    /// Every level of the table has been paid
    Completed,
    /// Missed the qualification gate; permanent
    Disqualified,
}

impl SalaryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SalaryState::Frozen(_) | SalaryState::Completed | SalaryState::Disqualified
        )
    }
}

/// Investment volume attributed to the investor's upline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnoverEntry {
    pub investor: UserId,
    pub investment_id: InvestmentId,
    pub amount: Decimal,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryPayout {
    pub level: u32,
    pub amount: Decimal,
    pub turnover: Decimal,
    pub reached_at: DateTime<Utc>,
    pub transaction_id: TransactionId,
    pub config_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalaryProgress {
    pub user_id: UserId,
    pub state: SalaryState,
    pub qualification_deadline: Option<DateTime<Utc>>,
    pub qualified_at: Option<DateTime<Utc>>,
    pub disqualified_at: Option<DateTime<Utc>>,
    pub current_level: Option<u32>,
    pub level_started_at: Option<DateTime<Utc>>,
    pub level_deadline: Option<DateTime<Utc>>,
    pub turnover_achieved: Decimal,
    pub turnover_required: Option<Decimal>,
    pub frozen_at: Option<DateTime<Utc>>,
    pub payouts: Vec<SalaryPayout>,
    /// Investments already counted toward a paid level
    #[serde(skip)]
    consumed: HashSet<InvestmentId>,
}

impl SalaryProgress {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            state: SalaryState::NotStarted,
            qualification_deadline: None,
            qualified_at: None,
            disqualified_at: None,
            current_level: None,
            level_started_at: None,
            level_deadline: None,
            turnover_achieved: Decimal::ZERO,
            turnover_required: None,
            frozen_at: None,
            payouts: Vec::new(),
            consumed: HashSet::new(),
        }
    }

    fn enter_level(&mut self, level: u32, at: DateTime<Utc>) {
        self.state = SalaryState::Level(level);
        self.current_level = Some(level);
        self.level_started_at = Some(at);
        self.level_deadline = None;
        self.turnover_achieved = Decimal::ZERO;
        self.turnover_required = None;
    }
}

/// Totals of one evaluation pass over all members
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalaryStats {
    pub evaluated: usize,
    pub credited: usize,
    pub failed: usize,
}

/// Instant the `threshold`-th event happened, if it did
fn threshold_instant(times: &[DateTime<Utc>], threshold: u32, floor: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match threshold {
        0 => Some(floor),
        n => times.get(n as usize - 1).copied(),
    }
}

#[derive(Debug)]
pub struct SalaryEngine {
    graph: Arc<ReferralGraph>,
    ledger: Arc<WalletLedger>,
    settings: Arc<SettingsStore>,
    turnover: DashMap<UserId, Vec<TurnoverEntry>>,
    progress: DashMap<UserId, Arc<Mutex<SalaryProgress>>>,
}

impl SalaryEngine {
    pub fn new(graph: Arc<ReferralGraph>, ledger: Arc<WalletLedger>, settings: Arc<SettingsStore>) -> Self {
        Self {
            graph,
            ledger,
            settings,
            turnover: DashMap::new(),
            progress: DashMap::new(),
        }
    }

    /// Records an investment that became ACTIVE
    pub fn record_turnover(&self, investor: &str, investment_id: InvestmentId, amount: Decimal, at: DateTime<Utc>) {
        let mut entries = self.turnover.entry(investor.to_string()).or_default();
        if entries.iter().any(|e| e.investment_id == investment_id) {
            return;
        }
        entries.push(TurnoverEntry {
            investor: investor.to_string(),
            investment_id,
            amount,
            at,
        });
        debug!(investor = %investor, investment = %investment_id, %amount, "Turnover recorded");
    }

    fn cell(&self, user_id: &str) -> Arc<Mutex<SalaryProgress>> {
        self.progress
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SalaryProgress::new(user_id))))
            .clone()
    }

    /// Current progress without evaluating
    pub async fn progress(&self, user_id: &str) -> SalaryProgress {
        match self.progress.get(user_id).map(|cell| Arc::clone(cell.value())) {
            Some(cell) => cell.lock().await.clone(),
            None => SalaryProgress::new(user_id),
        }
    }

    pub async fn history(&self, user_id: &str) -> Vec<SalaryPayout> {
        self.progress(user_id).await.payouts
    }

    /// Unconsumed downline entries inside `[from, to]`, oldest first
    fn window_entries(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        consumed: &HashSet<InvestmentId>,
    ) -> Vec<TurnoverEntry> {
        let mut entries: Vec<TurnoverEntry> = self
            .graph
            .downline(user_id, MAX_DEPTH)
            .iter()
            .filter_map(|edge| self.turnover.get(&edge.referred_user_id))
            .flat_map(|list| list.value().clone())
            .filter(|e| e.at >= from && e.at <= to && !consumed.contains(&e.investment_id))
            .collect();
        entries.sort_by(|a, b| a.at.cmp(&b.at));
        entries
    }

    /// Advances a user's salary state as far as `now` allows
    pub async fn evaluate(&self, user_id: &str, now: DateTime<Utc>) -> EngineResult<SalaryProgress> {
        let member = self
            .graph
            .member(user_id)
            .ok_or_else(|| EngineError::not_found(format!("member {}", user_id)))?;
        let cell = self.cell(user_id);
        let mut progress = cell.lock().await;
        if progress.state.is_terminal() {
            return Ok(progress.clone());
        }

        let snapshot = self.settings.current()?;
        let settings = &snapshot.settings;

        if matches!(progress.state, SalaryState::NotStarted | SalaryState::Qualifying) {
            self.qualify(&mut progress, &member, settings, now);
        }

        while let SalaryState::Level(n) = progress.state {
            let Some(level) = settings.salary_level(n).cloned() else {
                progress.state = SalaryState::Completed;
                break;
            };
            let started = progress.level_started_at.unwrap_or(now);
            let deadline = started + Duration::days(i64::from(level.timeline_days));
            let entries = self.window_entries(user_id, started, now.min(deadline), &progress.consumed);

            let mut total = Decimal::ZERO;
            let mut counted = Vec::new();
            let mut reached_at = None;
            for entry in entries {
                total += entry.amount;
                counted.push(entry.investment_id);
                if total >= level.turnover_required {
                    reached_at = Some(entry.at);
                    break;
                }
            }
            progress.turnover_achieved = total;
            progress.turnover_required = Some(level.turnover_required);
            progress.level_deadline = Some(deadline);

            match reached_at {
                Some(at) => {
                    let posting = self
                        .ledger
                        .post(
                            PostRequest::credit(
                                WalletKey::new(user_id, WalletType::Salary),
                                TransactionType::SalaryCredit,
                                level.salary_amount,
                            )
                            .description(format!("Salary level {}", n))
                            .reference(format!("salary:{}:{}", user_id, n))
                            .config_version(snapshot.version),
                            now,
                        )
                        .await?;

                    progress.consumed.extend(counted);
                    progress.payouts.push(SalaryPayout {
                        level: n,
                        amount: level.salary_amount,
                        turnover: total,
                        reached_at: at,
                        transaction_id: posting.transaction.id,
                        config_version: snapshot.version,
                    });
                    metrics::counter!("tierfolio_salary_credits_total", 1);
                    info!(user = %user_id, level = n, amount = %level.salary_amount, "Salary level reached");

                    if settings.salary_level(n + 1).is_some() {
                        progress.enter_level(n + 1, at);
                    } else {
                        progress.state = SalaryState::Completed;
                    }
                }
                None if now > deadline => {
                    progress.state = SalaryState::Frozen(n);
                    progress.frozen_at = Some(deadline);
                    info!(user = %user_id, level = n, turnover = %total, "Salary level window missed, frozen");
                }
                None => break,
            }
        }

        Ok(progress.clone())
    }

    fn qualify(&self, progress: &mut SalaryProgress, member: &Member, settings: &PlatformSettings, now: DateTime<Utc>) {
        let deadline = member.joined_at + Duration::hours(i64::from(settings.qualification_time_limit_hours));
        progress.qualification_deadline = Some(deadline);

        let directs = self.graph.direct_referrals(&member.user_id);
        let mut joined: Vec<_> = directs
            .iter()
            .map(|m| m.joined_at)
            .filter(|at| *at <= deadline)
            .collect();
        let mut paid: Vec<_> = directs
            .iter()
            .filter_map(|m| m.paid_at)
            .filter(|at| *at <= deadline)
            .collect();
        joined.sort();
        paid.sort();

        let required = &settings.required_referrals;
        let qualified_at = [
            threshold_instant(&joined, required.free, member.joined_at),
            threshold_instant(&paid, required.paid, member.joined_at),
        ]
        .into_iter()
        .flatten()
        .min();

        match qualified_at {
            Some(at) if at <= now => {
                progress.qualified_at = Some(at);
                progress.enter_level(1, at);
                info!(user = %member.user_id, qualified_at = %at, "Salary qualification met");
            }
            _ if now > deadline => {
                progress.state = SalaryState::Disqualified;
                progress.disqualified_at = Some(deadline);
                info!(user = %member.user_id, "Salary qualification window missed, disqualified");
            }
            _ => progress.state = SalaryState::Qualifying,
        }
    }

    /// Evaluates every member independently
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> SalaryStats {
        let mut stats = SalaryStats::default();
        for user_id in self.graph.user_ids() {
            stats.evaluated += 1;
            let before = self.progress(&user_id).await.payouts.len();
            match self.evaluate(&user_id, now).await {
                Ok(progress) => stats.credited += progress.payouts.len().saturating_sub(before),
                Err(e) => {
                    stats.failed += 1;
                    warn!(user = %user_id, error = %e, "Salary evaluation failed, retrying next tick");
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tierfolio_core::{RequiredReferrals, SalaryLevel};
    use uuid::Uuid;

    fn settings() -> PlatformSettings {
        PlatformSettings {
            qualification_time_limit_hours: 72,
            required_referrals: RequiredReferrals { free: 3, paid: 2 },
            salary_levels: vec![
                SalaryLevel {
                    level: 1,
                    turnover_required: dec!(1000),
                    salary_amount: dec!(50),
                    timeline_days: 30,
                },
                SalaryLevel {
                    level: 2,
                    turnover_required: dec!(3000),
                    salary_amount: dec!(150),
                    timeline_days: 30,
                },
            ],
            ..PlatformSettings::default()
        }
    }

    fn engine() -> (SalaryEngine, Arc<ReferralGraph>, Arc<WalletLedger>) {
        let graph = Arc::new(ReferralGraph::new());
        let ledger = Arc::new(WalletLedger::new());
        let store = Arc::new(SettingsStore::new(settings()).unwrap());
        (
            SalaryEngine::new(Arc::clone(&graph), Arc::clone(&ledger), store),
            graph,
            ledger,
        )
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn salary_wallet(user: &str) -> WalletKey {
        WalletKey::new(user, WalletType::Salary)
    }

    #[tokio::test]
    async fn test_late_referral_disqualifies_permanently() {
        let (engine, graph, _ledger) = engine();
        graph.register("boss", None, t0()).unwrap();
        graph.register("r1", Some("boss"), t0() + Duration::hours(1)).unwrap();
        graph.register("r2", Some("boss"), t0() + Duration::hours(2)).unwrap();
        // Third referral lands one hour after the 72h gate
        graph.register("r3", Some("boss"), t0() + Duration::hours(73)).unwrap();

        let progress = engine.evaluate("boss", t0() + Duration::hours(74)).await.unwrap();
        assert_eq!(progress.state, SalaryState::Disqualified);

        for i in 0..5 {
            graph
                .register(&format!("late{}", i), Some("boss"), t0() + Duration::hours(80))
                .unwrap();
        }
        let progress = engine.evaluate("boss", t0() + Duration::days(10)).await.unwrap();
        assert_eq!(progress.state, SalaryState::Disqualified);
    }

    #[tokio::test]
    async fn test_paid_referrals_qualify() {
        let (engine, graph, _ledger) = engine();
        graph.register("boss", None, t0()).unwrap();
        graph.register("r1", Some("boss"), t0()).unwrap();
        graph.register("r2", Some("boss"), t0()).unwrap();
        graph.mark_paid("r1", t0() + Duration::hours(5));
        graph.mark_paid("r2", t0() + Duration::hours(10));

        let progress = engine.evaluate("boss", t0() + Duration::hours(20)).await.unwrap();
        assert_eq!(progress.state, SalaryState::Level(1));
        assert_eq!(progress.qualified_at, Some(t0() + Duration::hours(10)));
    }

    #[tokio::test]
    async fn test_levels_pay_once_and_reset_turnover() {
        let (engine, graph, ledger) = engine();
        graph.register("boss", None, t0()).unwrap();
        graph.register("r1", Some("boss"), t0()).unwrap();
        graph.register("r2", Some("boss"), t0()).unwrap();
        graph.register("r3", Some("boss"), t0()).unwrap();
        graph.register("g1", Some("r1"), t0()).unwrap();

        engine.record_turnover("r1", Uuid::new_v4(), dec!(600), t0() + Duration::days(1));
        engine.record_turnover("g1", Uuid::new_v4(), dec!(500), t0() + Duration::days(2));

        let progress = engine.evaluate("boss", t0() + Duration::days(3)).await.unwrap();
        assert_eq!(progress.state, SalaryState::Level(2));
        assert_eq!(progress.payouts.len(), 1);
        assert_eq!(ledger.balance(&salary_wallet("boss")).await, dec!(50));

        // Volume counted for level 1 does not carry into level 2
        let progress = engine.evaluate("boss", t0() + Duration::days(4)).await.unwrap();
        assert_eq!(progress.turnover_achieved, Decimal::ZERO);
        assert_eq!(ledger.balance(&salary_wallet("boss")).await, dec!(50));
    }

    #[tokio::test]
    async fn test_missed_window_freezes_level() {
        let (engine, graph, ledger) = engine();
        graph.register("boss", None, t0()).unwrap();
        for name in ["r1", "r2", "r3"] {
            graph.register(name, Some("boss"), t0()).unwrap();
        }
        engine.record_turnover("r1", Uuid::new_v4(), dec!(400), t0() + Duration::days(5));

        let progress = engine.evaluate("boss", t0() + Duration::days(31)).await.unwrap();
        assert_eq!(progress.state, SalaryState::Frozen(1));

        // Volume after the window cannot revive the level
        engine.record_turnover("r2", Uuid::new_v4(), dec!(5000), t0() + Duration::days(32));
        let progress = engine.evaluate("boss", t0() + Duration::days(33)).await.unwrap();
        assert_eq!(progress.state, SalaryState::Frozen(1));
        assert_eq!(ledger.balance(&salary_wallet("boss")).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_third_level_volume_is_ignored() {
        let (engine, graph, _ledger) = engine();
        graph.register("boss", None, t0()).unwrap();
        graph.register("r1", Some("boss"), t0()).unwrap();
        graph.register("r2", Some("boss"), t0()).unwrap();
        graph.register("r3", Some("boss"), t0()).unwrap();
        graph.register("g1", Some("r1"), t0()).unwrap();
        graph.register("gg1", Some("g1"), t0()).unwrap();

        engine.record_turnover("gg1", Uuid::new_v4(), dec!(5000), t0() + Duration::days(1));
        let progress = engine.evaluate("boss", t0() + Duration::days(2)).await.unwrap();
        assert_eq!(progress.state, SalaryState::Level(1));
        assert_eq!(progress.turnover_achieved, Decimal::ZERO);
    }
}
