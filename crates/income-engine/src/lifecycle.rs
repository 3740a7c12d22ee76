//! Investment Lifecycle Manager
//!
//! Owns the investment state machine from purchase to completion or cancellation.
//! Each investment sits behind its own async mutex; any operation that also touches
//! a wallet takes the investment lock first.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tierfolio_core::{
    Clock, Currency, EngineError, EngineResult, InvestmentId, PlanId, SettingsStore,
    TransactionId, TransactionType, UserId, WalletKey, WalletType,
};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;
use wallet_ledger::fees;
use wallet_ledger::{PostRequest, WalletLedger};

use crate::breakdown::{BreakdownRequest, BreakdownStatus};
use crate::plans::{InvestmentPlan, PlanCatalog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvestmentStatus {
    PendingApproval,
    Active,
    Completed,
    Rejected,
    Cancelled,
}

impl InvestmentStatus {
    pub fn can_transition_to(&self, next: InvestmentStatus) -> bool {
        use InvestmentStatus::*;
        matches!(
            (self, next),
            (PendingApproval, Active)
                | (PendingApproval, Rejected)
                | (Active, Completed)
                | (Active, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvestmentStatus::Completed | InvestmentStatus::Rejected | InvestmentStatus::Cancelled
        )
    }
}

/// How a purchase is paid for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseMethod {
    /// Paid outside the platform; an admin activates it
    AdminRequest,
    /// Debits the user's INR or USDT wallet immediately
    DirectWallet(Currency),
    /// One-time code issued by an admin for a specific plan
    AuthKey(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub user_id: UserId,
    /// Plan terms captured at purchase
    pub plan: InvestmentPlan,
    /// Principal, USDT
    pub amount: Decimal,
    pub status: InvestmentStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub roi_earned: Decimal,
    pub periods_credited: u32,
    pub refund_timeline_days: u32,
    pub purchase_method: PurchaseMethod,
    /// Ledger debit that funded a direct wallet purchase
    pub funding_transaction: Option<TransactionId>,
    pub config_version: u64,
    pub created_at: DateTime<Utc>,
    pub breakdowns: Vec<BreakdownRequest>,
}

impl Investment {
    pub fn plan_id(&self) -> PlanId {
        self.plan.id
    }

    pub fn pending_breakdown(&self) -> Option<&BreakdownRequest> {
        self.breakdowns
            .iter()
            .find(|b| b.status == BreakdownStatus::Pending)
    }

    pub fn pending_breakdown_mut(&mut self) -> Option<&mut BreakdownRequest> {
        self.breakdowns
            .iter_mut()
            .find(|b| b.status == BreakdownStatus::Pending)
    }

    /// The breakdown request that was pending at `at`, open or already closed
    pub fn breakdown_open_at_mut(&mut self, at: DateTime<Utc>) -> Option<&mut BreakdownRequest> {
        self.breakdowns.iter_mut().find(|b| b.was_open_at(at))
    }

    /// Applies a state change, rejecting moves the state machine does not allow
    pub fn transition(&mut self, next: InvestmentStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::invalid_transition(
                format!("investment {}", self.id),
                self.status,
                next,
            ));
        }
        debug!(investment = %self.id, from = ?self.status, to = ?next, "Investment transition");
        self.status = next;
        Ok(())
    }

    pub fn ensure_owner(&self, user_id: &str) -> EngineResult<()> {
        if self.user_id != user_id {
            // Other users' investments are reported as missing
            return Err(EngineError::not_found(format!("investment {}", self.id)));
        }
        Ok(())
    }
}

/// Storage for investments with the duplicate-purchase guard
#[derive(Debug, Default)]
pub struct InvestmentBook {
    investments: DashMap<InvestmentId, Arc<Mutex<Investment>>>,
    open_slots: DashMap<(UserId, PlanId), InvestmentId>,
    by_user: DashMap<UserId, Vec<InvestmentId>>,
}

impl InvestmentBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the (user, plan) slot for a new investment
    pub fn claim_slot(&self, user_id: &str, plan_id: PlanId, investment_id: InvestmentId) -> EngineResult<()> {
        match self.open_slots.entry((user_id.to_string(), plan_id)) {
            Entry::Occupied(_) => Err(EngineError::duplicate_purchase(user_id, plan_id)),
            Entry::Vacant(slot) => {
                slot.insert(investment_id);
                Ok(())
            }
        }
    }

    /// Frees the slot once the investment holding it reaches a terminal state
    pub fn release_slot(&self, user_id: &str, plan_id: PlanId, investment_id: InvestmentId) {
        self.open_slots
            .remove_if(&(user_id.to_string(), plan_id), |_, holder| *holder == investment_id);
    }

    pub fn insert(&self, investment: Investment) {
        self.by_user
            .entry(investment.user_id.clone())
            .or_default()
            .push(investment.id);
        self.investments
            .insert(investment.id, Arc::new(Mutex::new(investment)));
    }

    pub fn get(&self, id: InvestmentId) -> EngineResult<Arc<Mutex<Investment>>> {
        self.investments
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::not_found(format!("investment {}", id)))
    }

    pub async fn snapshot(&self, id: InvestmentId) -> EngineResult<Investment> {
        let investment = self.get(id)?;
        let guard = investment.lock().await;
        Ok(guard.clone())
    }

    pub fn ids(&self) -> Vec<InvestmentId> {
        self.investments.iter().map(|entry| *entry.key()).collect()
    }

    pub fn ids_for_user(&self, user_id: &str) -> Vec<InvestmentId> {
        self.by_user
            .get(user_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    pub async fn for_user(&self, user_id: &str) -> Vec<Investment> {
        let mut out = Vec::new();
        for id in self.ids_for_user(user_id) {
            if let Ok(investment) = self.snapshot(id).await {
                out.push(investment);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.investments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.investments.is_empty()
    }
}

/// One-time purchase code bound to a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthKey {
    pub code: String,
    pub plan_id: PlanId,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct AuthKeyVault {
    keys: DashMap<String, AuthKey>,
}

impl AuthKeyVault {
    pub fn issue(&self, plan_id: PlanId, at: DateTime<Utc>) -> AuthKey {
        let key = AuthKey {
            code: Uuid::new_v4().simple().to_string().to_uppercase(),
            plan_id,
            issued_at: at,
        };
        self.keys.insert(key.code.clone(), key.clone());
        info!(plan = %plan_id, "Auth key issued");
        key
    }

    /// Consumes the code; a used, unknown or mismatched code is rejected
    pub fn redeem(&self, code: &str, plan_id: PlanId) -> EngineResult<AuthKey> {
        self.keys
            .remove_if(code, |_, key| key.plan_id == plan_id)
            .map(|(_, key)| key)
            .ok_or(EngineError::InvalidAuthKey)
    }
}

pub struct LifecycleManager {
    catalog: Arc<PlanCatalog>,
    book: Arc<InvestmentBook>,
    ledger: Arc<WalletLedger>,
    settings: Arc<SettingsStore>,
    auth_keys: AuthKeyVault,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("investments", &self.book.len())
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    pub fn new(
        catalog: Arc<PlanCatalog>,
        book: Arc<InvestmentBook>,
        ledger: Arc<WalletLedger>,
        settings: Arc<SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            book,
            ledger,
            settings,
            auth_keys: AuthKeyVault::default(),
            clock,
        }
    }

    pub fn issue_auth_key(&self, plan_id: PlanId) -> EngineResult<AuthKey> {
        let plan = self.catalog.get(plan_id)?;
        Ok(self.auth_keys.issue(plan.id, self.clock.now()))
    }

    /// Buys a plan.
    ///
    /// Direct wallet purchases debit first and create the investment only once the
    /// debit succeeded; nothing is left behind when it fails.
    pub async fn purchase(&self, user_id: &str, plan_id: PlanId, method: PurchaseMethod) -> EngineResult<Investment> {
        let plan = self.catalog.get(plan_id)?;
        if !plan.is_active {
            return Err(EngineError::invalid_field("plan_id", format!("plan {} is not available", plan_id)));
        }
        let snapshot = self.settings.current()?;

        let id = Uuid::new_v4();
        self.book.claim_slot(user_id, plan.id, id)?;

        let funded = match &method {
            PurchaseMethod::AdminRequest => Ok((InvestmentStatus::PendingApproval, None)),
            PurchaseMethod::DirectWallet(currency) => {
                self.debit_wallet(user_id, &plan, *currency, id, snapshot.settings.currency_rate, snapshot.version)
                    .await
                    .map(|tx| (InvestmentStatus::Active, Some(tx)))
            }
            PurchaseMethod::AuthKey(code) => self
                .auth_keys
                .redeem(code, plan.id)
                .map(|_| (InvestmentStatus::Active, None)),
        };

        let (status, funding_transaction) = match funded {
            Ok(outcome) => outcome,
            Err(e) => {
                self.book.release_slot(user_id, plan.id, id);
                return Err(e);
            }
        };

        let now = self.clock.now();
        let investment = Investment {
            id,
            user_id: user_id.to_string(),
            amount: plan.amount,
            status,
            start_date: (status == InvestmentStatus::Active).then_some(now),
            end_date: None,
            roi_earned: Decimal::ZERO,
            periods_credited: 0,
            refund_timeline_days: plan
                .refund_timeline_days
                .unwrap_or(snapshot.settings.default_refund_timeline_days),
            purchase_method: method,
            funding_transaction,
            config_version: snapshot.version,
            created_at: now,
            breakdowns: Vec::new(),
            plan: (*plan).clone(),
        };
        self.book.insert(investment.clone());

        info!(
            investment = %id,
            user = %user_id,
            plan = %plan.id,
            status = ?status,
            amount = %investment.amount,
            "Investment created"
        );
        Ok(investment)
    }

    async fn debit_wallet(
        &self,
        user_id: &str,
        plan: &InvestmentPlan,
        currency: Currency,
        investment_id: InvestmentId,
        currency_rate: Decimal,
        config_version: u64,
    ) -> EngineResult<TransactionId> {
        let wallet_type = match currency {
            Currency::Inr => WalletType::Inr,
            Currency::Usdt => WalletType::Usdt,
        };
        let price = fees::convert(plan.amount, Currency::Usdt, currency, currency_rate)?;
        let posting = self
            .ledger
            .post(
                PostRequest::debit(WalletKey::new(user_id, wallet_type), TransactionType::PlanPurchase, price)
                    .description(format!("Purchase of plan {}", plan.name))
                    .reference(format!("purchase:{}", investment_id))
                    .config_version(config_version),
                self.clock.now(),
            )
            .await?;
        Ok(posting.transaction.id)
    }

    /// Admin activation of an ADMIN_REQUEST purchase
    pub async fn approve(&self, investment_id: InvestmentId) -> EngineResult<Investment> {
        let investment = self.book.get(investment_id)?;
        let mut guard = investment.lock().await;
        guard.transition(InvestmentStatus::Active)?;
        guard.start_date = Some(self.clock.now());

        info!(investment = %investment_id, user = %guard.user_id, "Investment activated");
        Ok(guard.clone())
    }

    pub async fn reject(&self, investment_id: InvestmentId) -> EngineResult<Investment> {
        let investment = self.book.get(investment_id)?;
        let mut guard = investment.lock().await;
        guard.transition(InvestmentStatus::Rejected)?;
        guard.end_date = Some(self.clock.now());
        self.book.release_slot(&guard.user_id, guard.plan_id(), guard.id);

        info!(investment = %investment_id, user = %guard.user_id, "Investment rejected");
        Ok(guard.clone())
    }
}
