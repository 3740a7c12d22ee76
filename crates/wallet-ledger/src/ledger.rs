//! Wallet Ledger - Append-only Multi-Wallet Bookkeeping
//!
//! Owns every (user, wallet type) balance and its transaction log. Each wallet sits
//! behind its own async mutex so all mutations of one wallet are serialized while
//! different wallets proceed in parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tierfolio_core::{
    Direction, EngineError, EngineResult, Transaction, TransactionId, TransactionStatus,
    TransactionType, UserId, WalletAccount, WalletKey, WalletType,
};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Parameters of a single ledger entry
#[derive(Debug, Clone)]
pub struct PostRequest {
    pub wallet: WalletKey,
    pub tx_type: TransactionType,
    pub direction: Direction,
    pub amount: Decimal,
    pub description: String,
    pub reference: Option<String>,
    pub config_version: Option<u64>,
}

impl PostRequest {
    pub fn credit(wallet: WalletKey, tx_type: TransactionType, amount: Decimal) -> Self {
        Self::new(wallet, tx_type, Direction::Credit, amount)
    }

    pub fn debit(wallet: WalletKey, tx_type: TransactionType, amount: Decimal) -> Self {
        Self::new(wallet, tx_type, Direction::Debit, amount)
    }

    fn new(wallet: WalletKey, tx_type: TransactionType, direction: Direction, amount: Decimal) -> Self {
        Self {
            wallet,
            tx_type,
            direction,
            amount,
            description: String::new(),
            reference: None,
            config_version: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Idempotency reference; a second post with the same reference is a replay
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn config_version(mut self, version: u64) -> Self {
        self.config_version = Some(version);
        self
    }
}

/// Outcome of a post
#[derive(Debug, Clone)]
pub struct Posting {
    pub transaction: Transaction,
    /// True when the reference was already posted and nothing changed
    pub replayed: bool,
}

/// Filters for transaction history queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub wallet_type: Option<WalletType>,
    pub tx_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    fn matches(&self, tx: &Transaction) -> bool {
        self.wallet_type.map_or(true, |t| tx.wallet.wallet_type == t)
            && self.tx_type.map_or(true, |t| tx.tx_type == t)
            && self.status.map_or(true, |s| tx.status == s)
            && self.from.map_or(true, |from| tx.created_at >= from)
            && self.to.map_or(true, |to| tx.created_at <= to)
    }
}

/// Funds held by a PENDING entry until it is settled
#[derive(Debug, Clone, Copy)]
struct Hold {
    direction: Direction,
    amount: Decimal,
    closed: bool,
}

#[derive(Debug)]
struct WalletState {
    account: WalletAccount,
    entries: Vec<Transaction>,
    references: HashMap<String, usize>,
    holds: HashMap<TransactionId, Hold>,
}

impl WalletState {
    fn new(key: &WalletKey) -> Self {
        Self {
            account: WalletAccount::empty(key),
            entries: Vec::new(),
            references: HashMap::new(),
            holds: HashMap::new(),
        }
    }

    fn replay(&self, reference: Option<&String>) -> Option<Transaction> {
        reference
            .and_then(|r| self.references.get(r))
            .map(|index| self.entries[*index].clone())
    }

    fn append(&mut self, tx: Transaction) -> Transaction {
        if let Some(reference) = &tx.reference {
            self.references.insert(reference.clone(), self.entries.len());
        }
        self.entries.push(tx.clone());
        tx
    }

    fn settled_sum(&self) -> Decimal {
        self.entries.iter().map(Transaction::settled_delta).sum()
    }
}

/// Normalizes an amount to the wallet's precision and rejects non-positive values
fn normalize_amount(key: &WalletKey, amount: Decimal) -> EngineResult<Decimal> {
    let rounded = key.currency().round(amount);
    if rounded <= Decimal::ZERO {
        return Err(EngineError::invalid_field(
            "amount",
            format!("amount must be positive at {} precision, got {}", key.currency(), amount),
        ));
    }
    Ok(rounded)
}

fn entry(
    request: &PostRequest,
    amount: Decimal,
    status: TransactionStatus,
    related_to: Option<TransactionId>,
    at: DateTime<Utc>,
) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        wallet: request.wallet.clone(),
        tx_type: request.tx_type,
        direction: request.direction,
        amount,
        currency: request.wallet.currency(),
        status,
        description: request.description.clone(),
        reference: request.reference.clone(),
        related_to,
        config_version: request.config_version,
        created_at: at,
    }
}

/// Generic ledger over every wallet type
#[derive(Debug, Default)]
pub struct WalletLedger {
    wallets: DashMap<WalletKey, Arc<Mutex<WalletState>>>,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lazily creates the wallet on first reference
    fn wallet(&self, key: &WalletKey) -> Arc<Mutex<WalletState>> {
        self.wallets
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(WalletState::new(key))))
            .clone()
    }

    fn existing(&self, key: &WalletKey) -> Option<Arc<Mutex<WalletState>>> {
        self.wallets.get(key).map(|w| w.clone())
    }

    /// Posts a COMPLETED credit or debit.
    ///
    /// Debits never take the spendable balance below zero; a replayed reference
    /// returns the original entry untouched.
    pub async fn post(&self, request: PostRequest, at: DateTime<Utc>) -> EngineResult<Posting> {
        let wallet = self.wallet(&request.wallet);
        let mut state = wallet.lock().await;

        if let Some(existing) = state.replay(request.reference.as_ref()) {
            debug!(reference = ?request.reference, wallet = %request.wallet, "Replayed ledger reference");
            return Ok(Posting {
                transaction: existing,
                replayed: true,
            });
        }

        let amount = normalize_amount(&request.wallet, request.amount)?;
        Self::apply_completed(&mut state, &request, amount)?;

        let tx = state.append(entry(&request, amount, TransactionStatus::Completed, None, at));
        metrics::counter!("tierfolio_ledger_postings_total", 1);
        info!(
            wallet = %request.wallet,
            tx_type = ?request.tx_type,
            direction = ?request.direction,
            %amount,
            "Ledger entry posted"
        );

        Ok(Posting {
            transaction: tx,
            replayed: false,
        })
    }

    fn apply_completed(state: &mut WalletState, request: &PostRequest, amount: Decimal) -> EngineResult<()> {
        match request.direction {
            Direction::Credit => {
                state.account.balance += amount;
            }
            Direction::Debit => {
                if amount > state.account.balance {
                    return Err(EngineError::InsufficientFunds {
                        required: amount,
                        available: state.account.balance,
                    });
                }
                state.account.balance -= amount;
            }
        }
        Ok(())
    }

    /// Moves `amount` from balance to pending balance and records a PENDING debit
    pub async fn reserve(&self, request: PostRequest, at: DateTime<Utc>) -> EngineResult<Transaction> {
        let wallet = self.wallet(&request.wallet);
        let mut state = wallet.lock().await;

        if state.account.locked {
            return Err(EngineError::WalletLocked(request.wallet.to_string()));
        }
        if let Some(existing) = state.replay(request.reference.as_ref()) {
            return Err(EngineError::AlreadyProcessed {
                reference: existing.reference.unwrap_or_default(),
            });
        }

        let amount = normalize_amount(&request.wallet, request.amount)?;
        if amount > state.account.balance {
            return Err(EngineError::InsufficientFunds {
                required: amount,
                available: state.account.balance,
            });
        }

        state.account.balance -= amount;
        state.account.pending_balance += amount;

        let request = PostRequest {
            direction: Direction::Debit,
            ..request
        };
        let tx = state.append(entry(&request, amount, TransactionStatus::Pending, None, at));
        state.holds.insert(
            tx.id,
            Hold {
                direction: Direction::Debit,
                amount,
                closed: false,
            },
        );

        info!(wallet = %request.wallet, %amount, reservation = %tx.id, "Funds reserved");
        Ok(tx)
    }

    /// Records a PENDING credit that does not affect the balance until completed
    pub async fn record_pending_credit(&self, request: PostRequest, at: DateTime<Utc>) -> EngineResult<Transaction> {
        let wallet = self.wallet(&request.wallet);
        let mut state = wallet.lock().await;

        if let Some(existing) = state.replay(request.reference.as_ref()) {
            return Err(EngineError::AlreadyProcessed {
                reference: existing.reference.unwrap_or_default(),
            });
        }

        let amount = normalize_amount(&request.wallet, request.amount)?;
        let request = PostRequest {
            direction: Direction::Credit,
            ..request
        };
        let tx = state.append(entry(&request, amount, TransactionStatus::Pending, None, at));
        state.holds.insert(
            tx.id,
            Hold {
                direction: Direction::Credit,
                amount,
                closed: false,
            },
        );

        debug!(wallet = %request.wallet, %amount, pending = %tx.id, "Pending credit recorded");
        Ok(tx)
    }

    /// Settles a PENDING entry exactly once.
    ///
    /// `Completed` finalizes a reserved debit or applies a pending credit;
    /// `Rejected`/`Failed` returns reserved funds or discards the pending credit.
    pub async fn settle(
        &self,
        key: &WalletKey,
        pending_id: TransactionId,
        outcome: TransactionStatus,
        description: impl Into<String>,
        at: DateTime<Utc>,
    ) -> EngineResult<Transaction> {
        if outcome == TransactionStatus::Pending {
            return Err(EngineError::validation("a pending entry cannot settle as pending"));
        }

        let wallet = self
            .existing(key)
            .ok_or_else(|| EngineError::not_found(format!("wallet {}", key)))?;
        let mut state = wallet.lock().await;

        let hold = *state
            .holds
            .get(&pending_id)
            .ok_or_else(|| EngineError::not_found(format!("pending entry {}", pending_id)))?;
        if hold.closed {
            return Err(EngineError::AlreadyProcessed {
                reference: pending_id.to_string(),
            });
        }

        let original = state
            .entries
            .iter()
            .find(|tx| tx.id == pending_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("pending entry {}", pending_id)))?;

        match (hold.direction, outcome) {
            (Direction::Debit, TransactionStatus::Completed) => {
                state.account.pending_balance -= hold.amount;
            }
            (Direction::Debit, _) => {
                state.account.pending_balance -= hold.amount;
                state.account.balance += hold.amount;
            }
            (Direction::Credit, TransactionStatus::Completed) => {
                state.account.balance += hold.amount;
            }
            (Direction::Credit, _) => {}
        }

        if let Some(h) = state.holds.get_mut(&pending_id) {
            h.closed = true;
        }

        let settlement = Transaction {
            id: Uuid::new_v4(),
            status: outcome,
            description: description.into(),
            reference: None,
            related_to: Some(pending_id),
            created_at: at,
            ..original
        };
        let tx = state.append(settlement);

        info!(wallet = %key, pending = %pending_id, outcome = ?outcome, "Pending entry settled");
        Ok(tx)
    }

    /// Moves value between two wallets of the same user under both locks.
    ///
    /// Locks are taken in key order so concurrent opposite transfers cannot deadlock.
    pub async fn transfer(
        &self,
        debit: PostRequest,
        credit: PostRequest,
        at: DateTime<Utc>,
    ) -> EngineResult<(Transaction, Transaction)> {
        if debit.wallet == credit.wallet {
            return Err(EngineError::validation("source and destination wallets must differ"));
        }

        let debit_amount = normalize_amount(&debit.wallet, debit.amount)?;
        let credit_amount = normalize_amount(&credit.wallet, credit.amount)?;

        let source = self.wallet(&debit.wallet);
        let target = self.wallet(&credit.wallet);
        let (mut source_state, mut target_state) = if debit.wallet < credit.wallet {
            let s = source.lock().await;
            let t = target.lock().await;
            (s, t)
        } else {
            let t = target.lock().await;
            let s = source.lock().await;
            (s, t)
        };

        if source_state.account.locked {
            return Err(EngineError::WalletLocked(debit.wallet.to_string()));
        }

        let debit = PostRequest {
            direction: Direction::Debit,
            ..debit
        };
        let credit = PostRequest {
            direction: Direction::Credit,
            ..credit
        };

        Self::apply_completed(&mut source_state, &debit, debit_amount)?;
        Self::apply_completed(&mut target_state, &credit, credit_amount)?;

        let out = source_state.append(entry(&debit, debit_amount, TransactionStatus::Completed, None, at));
        let inbound = target_state.append(entry(
            &credit,
            credit_amount,
            TransactionStatus::Completed,
            Some(out.id),
            at,
        ));

        info!(
            from = %debit.wallet,
            to = %credit.wallet,
            %debit_amount,
            %credit_amount,
            "Wallet transfer completed"
        );
        Ok((out, inbound))
    }

    /// Spendable balance
    pub async fn balance(&self, key: &WalletKey) -> Decimal {
        match self.existing(key) {
            Some(wallet) => wallet.lock().await.account.balance,
            None => Decimal::ZERO,
        }
    }

    pub async fn account(&self, key: &WalletKey) -> WalletAccount {
        match self.existing(key) {
            Some(wallet) => wallet.lock().await.account.clone(),
            None => WalletAccount::empty(key),
        }
    }

    /// All five wallet accounts of a user
    pub async fn accounts(&self, user_id: &str) -> Vec<WalletAccount> {
        let mut accounts = Vec::with_capacity(WalletType::ALL.len());
        for wallet_type in WalletType::ALL {
            accounts.push(self.account(&WalletKey::new(user_id, wallet_type)).await);
        }
        accounts
    }

    /// Admin lock toggle; blocks withdrawals and conversions out of the wallet
    pub async fn set_locked(&self, key: &WalletKey, locked: bool) {
        let wallet = self.wallet(key);
        wallet.lock().await.account.locked = locked;
        info!(wallet = %key, locked, "Wallet lock updated");
    }

    /// Sum of COMPLETED credits minus COMPLETED debits, recomputed from the log
    pub async fn recompute(&self, key: &WalletKey) -> Decimal {
        match self.existing(key) {
            Some(wallet) => wallet.lock().await.settled_sum(),
            None => Decimal::ZERO,
        }
    }

    /// Looks up an entry by its idempotency reference
    pub async fn find_reference(&self, key: &WalletKey, reference: &str) -> Option<Transaction> {
        let wallet = self.existing(key)?;
        let state = wallet.lock().await;
        state.replay(Some(&reference.to_string()))
    }

    /// Transaction history for a user across wallets, newest first
    pub async fn history(&self, user_id: &UserId, filter: &HistoryFilter) -> Vec<Transaction> {
        let mut out = Vec::new();
        for wallet_type in WalletType::ALL {
            if filter.wallet_type.map_or(false, |t| t != wallet_type) {
                continue;
            }
            if let Some(wallet) = self.existing(&WalletKey::new(user_id.clone(), wallet_type)) {
                let state = wallet.lock().await;
                out.extend(state.entries.iter().filter(|tx| filter.matches(tx)).cloned());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usdt(user: &str) -> WalletKey {
        WalletKey::new(user, WalletType::Usdt)
    }

    async fn funded(ledger: &WalletLedger, key: &WalletKey, amount: Decimal) {
        ledger
            .post(PostRequest::credit(key.clone(), TransactionType::Deposit, amount), Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_balance_equals_completed_sum() {
        let ledger = WalletLedger::new();
        let key = usdt("alice");
        funded(&ledger, &key, dec!(100)).await;
        ledger
            .post(PostRequest::debit(key.clone(), TransactionType::PlanPurchase, dec!(40)), Utc::now())
            .await
            .unwrap();

        assert_eq!(ledger.balance(&key).await, dec!(60));
        assert_eq!(ledger.recompute(&key).await, dec!(60));
    }

    #[tokio::test]
    async fn test_debit_cannot_overdraw() {
        let ledger = WalletLedger::new();
        let key = usdt("bob");
        funded(&ledger, &key, dec!(10)).await;

        let err = ledger
            .post(PostRequest::debit(key.clone(), TransactionType::PlanPurchase, dec!(10.5)), Utc::now())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            EngineError::InsufficientFunds {
                required: dec!(10.5),
                available: dec!(10)
            }
        );
        assert_eq!(ledger.balance(&key).await, dec!(10));
    }

    #[tokio::test]
    async fn test_reference_replay_posts_once() {
        let ledger = WalletLedger::new();
        let key = WalletKey::new("carol", WalletType::Roi);
        let request = PostRequest::credit(key.clone(), TransactionType::RoiCredit, dec!(5)).reference("roi:x:0");

        let first = ledger.post(request.clone(), Utc::now()).await.unwrap();
        let second = ledger.post(request, Utc::now()).await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.transaction.id, second.transaction.id);
        assert_eq!(ledger.balance(&key).await, dec!(5));
    }

    #[tokio::test]
    async fn test_inr_amounts_round_to_two_places() {
        let ledger = WalletLedger::new();
        let key = WalletKey::new("dave", WalletType::Inr);
        let posting = ledger
            .post(PostRequest::credit(key.clone(), TransactionType::Deposit, dec!(10.005)), Utc::now())
            .await
            .unwrap();
        assert_eq!(posting.transaction.amount, dec!(10.01));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amounts() {
        let ledger = WalletLedger::new();
        let err = ledger
            .post(PostRequest::credit(usdt("erin"), TransactionType::Deposit, dec!(0)), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_reserve_then_reject_restores_balance() {
        let ledger = WalletLedger::new();
        let key = usdt("frank");
        funded(&ledger, &key, dec!(50)).await;

        let hold = ledger
            .reserve(PostRequest::debit(key.clone(), TransactionType::Withdraw, dec!(20)), Utc::now())
            .await
            .unwrap();
        let account = ledger.account(&key).await;
        assert_eq!(account.balance, dec!(30));
        assert_eq!(account.pending_balance, dec!(20));
        assert_eq!(ledger.recompute(&key).await, account.settled());

        ledger
            .settle(&key, hold.id, TransactionStatus::Rejected, "rejected", Utc::now())
            .await
            .unwrap();
        let account = ledger.account(&key).await;
        assert_eq!(account.balance, dec!(50));
        assert_eq!(account.pending_balance, Decimal::ZERO);

        let again = ledger
            .settle(&key, hold.id, TransactionStatus::Completed, "late approval", Utc::now())
            .await
            .unwrap_err();
        assert_eq!(again.kind(), "ALREADY_PROCESSED");
    }

    #[tokio::test]
    async fn test_reserve_then_complete_debits() {
        let ledger = WalletLedger::new();
        let key = usdt("gina");
        funded(&ledger, &key, dec!(50)).await;

        let hold = ledger
            .reserve(PostRequest::debit(key.clone(), TransactionType::Withdraw, dec!(20)), Utc::now())
            .await
            .unwrap();
        ledger
            .settle(&key, hold.id, TransactionStatus::Completed, "paid out", Utc::now())
            .await
            .unwrap();

        let account = ledger.account(&key).await;
        assert_eq!(account.balance, dec!(30));
        assert_eq!(account.pending_balance, Decimal::ZERO);
        assert_eq!(ledger.recompute(&key).await, dec!(30));
    }

    #[tokio::test]
    async fn test_locked_wallet_accepts_credits_but_blocks_reserve() {
        let ledger = WalletLedger::new();
        let key = usdt("hank");
        ledger.set_locked(&key, true).await;
        funded(&ledger, &key, dec!(30)).await;

        let err = ledger
            .reserve(PostRequest::debit(key.clone(), TransactionType::Withdraw, dec!(10)), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WalletLocked(_)));
        assert_eq!(ledger.balance(&key).await, dec!(30));
    }

    #[tokio::test]
    async fn test_pending_credit_only_counts_when_completed() {
        let ledger = WalletLedger::new();
        let key = usdt("iris");
        let pending = ledger
            .record_pending_credit(PostRequest::credit(key.clone(), TransactionType::Deposit, dec!(75)), Utc::now())
            .await
            .unwrap();
        assert_eq!(ledger.balance(&key).await, Decimal::ZERO);

        ledger
            .settle(&key, pending.id, TransactionStatus::Completed, "confirmed", Utc::now())
            .await
            .unwrap();
        assert_eq!(ledger.balance(&key).await, dec!(75));
        assert_eq!(ledger.recompute(&key).await, dec!(75));
    }

    #[tokio::test]
    async fn test_transfer_moves_between_wallets() {
        let ledger = WalletLedger::new();
        let roi = WalletKey::new("jack", WalletType::Roi);
        let spot = usdt("jack");
        ledger
            .post(PostRequest::credit(roi.clone(), TransactionType::RoiCredit, dec!(12)), Utc::now())
            .await
            .unwrap();

        let (out, inbound) = ledger
            .transfer(
                PostRequest::debit(roi.clone(), TransactionType::Conversion, dec!(12)),
                PostRequest::credit(spot.clone(), TransactionType::Conversion, dec!(12)),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(inbound.related_to, Some(out.id));
        assert_eq!(ledger.balance(&roi).await, Decimal::ZERO);
        assert_eq!(ledger.balance(&spot).await, dec!(12));
    }

    #[tokio::test]
    async fn test_history_filters_and_orders() {
        let ledger = WalletLedger::new();
        let key = usdt("kate");
        let earlier = Utc::now() - chrono::Duration::days(2);
        ledger
            .post(PostRequest::credit(key.clone(), TransactionType::Deposit, dec!(5)), earlier)
            .await
            .unwrap();
        ledger
            .post(
                PostRequest::credit(WalletKey::new("kate", WalletType::Roi), TransactionType::RoiCredit, dec!(1)),
                Utc::now(),
            )
            .await
            .unwrap();

        let all = ledger.history(&"kate".to_string(), &HistoryFilter::default()).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].tx_type, TransactionType::RoiCredit);

        let deposits = ledger
            .history(
                &"kate".to_string(),
                &HistoryFilter {
                    tx_type: Some(TransactionType::Deposit),
                    ..HistoryFilter::default()
                },
            )
            .await;
        assert_eq!(deposits.len(), 1);

        let recent = ledger
            .history(
                &"kate".to_string(),
                &HistoryFilter {
                    from: Some(Utc::now() - chrono::Duration::days(1)),
                    ..HistoryFilter::default()
                },
            )
            .await;
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_cannot_overdraw() {
        let ledger = Arc::new(WalletLedger::new());
        let key = usdt("leo");
        funded(&ledger, &key, dec!(100)).await;

        let a = {
            let ledger = Arc::clone(&ledger);
            let key = key.clone();
            tokio::spawn(async move {
                ledger
                    .reserve(PostRequest::debit(key, TransactionType::Withdraw, dec!(70)), Utc::now())
                    .await
            })
        };
        let b = {
            let ledger = Arc::clone(&ledger);
            let key = key.clone();
            tokio::spawn(async move {
                ledger
                    .reserve(PostRequest::debit(key, TransactionType::Withdraw, dec!(60)), Utc::now())
                    .await
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::InsufficientFunds { .. })))
            .count();

        assert_eq!(ok, 1);
        assert_eq!(insufficient, 1);
        assert!(ledger.balance(&key).await >= Decimal::ZERO);
    }
}
