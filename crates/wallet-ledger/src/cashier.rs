//! Cashier - Deposits, Withdrawals and Wallet Conversion
//!
//! User-facing money movement in and out of the ledger. Every path validates
//! against the current settings snapshot before touching a wallet and fails closed
//! when the snapshot is stale.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tierfolio_core::{
    Clock, Currency, EngineError, EngineResult, KycDirectory, KycStatus, RequestId,
    SettingsStore, Transaction, TransactionId, TransactionStatus, TransactionType, UserId,
    WalletKey, WalletType,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::fees::{self, FeeBreakdown, FeeKind};
use crate::ledger::{PostRequest, WalletLedger};

/// Confirmed-transfer notification from the on-chain watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
    pub tx_hash: String,
    pub amount: Decimal,
    pub network: String,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    /// Waiting for the watcher to confirm the on-chain transfer
    AwaitingTransfer,
    AwaitingApproval,
    Credited,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub id: RequestId,
    pub user_id: UserId,
    pub wallet_type: WalletType,
    pub fee: FeeBreakdown,
    pub tx_hash: Option<String>,
    pub network: Option<String>,
    pub status: DepositStatus,
    pub pending_entry: TransactionId,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: RequestId,
    pub user_id: UserId,
    pub wallet_type: WalletType,
    pub fee: FeeBreakdown,
    pub reservation: TransactionId,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Result of moving value between two wallets of one user
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReceipt {
    pub debit: Transaction,
    pub credit: Transaction,
    pub currency_rate: Decimal,
    pub config_version: u64,
}

/// Deposit, withdrawal and conversion desk
pub struct Cashier {
    ledger: Arc<WalletLedger>,
    settings: Arc<SettingsStore>,
    kyc: Arc<dyn KycDirectory>,
    clock: Arc<dyn Clock>,
    deposits: DashMap<RequestId, Arc<Mutex<DepositRequest>>>,
    deposits_by_hash: DashMap<String, RequestId>,
    withdrawals: DashMap<RequestId, Arc<Mutex<WithdrawalRequest>>>,
}

impl std::fmt::Debug for Cashier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cashier")
            .field("deposits", &self.deposits.len())
            .field("withdrawals", &self.withdrawals.len())
            .finish_non_exhaustive()
    }
}

impl Cashier {
    pub fn new(
        ledger: Arc<WalletLedger>,
        settings: Arc<SettingsStore>,
        kyc: Arc<dyn KycDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            settings,
            kyc,
            clock,
            deposits: DashMap::new(),
            deposits_by_hash: DashMap::new(),
            withdrawals: DashMap::new(),
        }
    }

    /// Creates a deposit request and records its PENDING ledger entry.
    ///
    /// USDT deposits carrying a transaction hash wait for the watcher; every other
    /// deposit waits for admin approval.
    pub async fn request_deposit(
        &self,
        user_id: &str,
        currency: Currency,
        amount: Decimal,
        tx_hash: Option<String>,
    ) -> EngineResult<DepositRequest> {
        let snapshot = self.settings.current()?;
        let fee = FeeBreakdown::compute(FeeKind::Deposit, currency, amount, &snapshot)?;

        let tx_hash = tx_hash.map(|h| h.trim().to_string()).filter(|h| !h.is_empty());
        if tx_hash.is_some() && currency != Currency::Usdt {
            return Err(EngineError::invalid_field(
                "tx_hash",
                "on-chain transfers are only accepted for USDT deposits",
            ));
        }

        let id = Uuid::new_v4();
        if let Some(hash) = &tx_hash {
            match self.deposits_by_hash.entry(hash.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(EngineError::DuplicateRequest(format!(
                        "transaction hash {} already submitted",
                        hash
                    )));
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }

        let wallet_type = match currency {
            Currency::Inr => WalletType::Inr,
            Currency::Usdt => WalletType::Usdt,
        };
        let now = self.clock.now();
        let pending = self
            .ledger
            .record_pending_credit(
                PostRequest::credit(WalletKey::new(user_id, wallet_type), TransactionType::Deposit, fee.net_amount)
                    .description(format!("Deposit of {} {}", amount, currency))
                    .reference(format!("deposit:{}", id))
                    .config_version(snapshot.version),
                now,
            )
            .await;
        let pending = match pending {
            Ok(tx) => tx,
            Err(e) => {
                if let Some(hash) = &tx_hash {
                    self.deposits_by_hash.remove(hash);
                }
                return Err(e);
            }
        };

        let request = DepositRequest {
            id,
            user_id: user_id.to_string(),
            wallet_type,
            fee,
            status: if tx_hash.is_some() {
                DepositStatus::AwaitingTransfer
            } else {
                DepositStatus::AwaitingApproval
            },
            tx_hash,
            network: None,
            pending_entry: pending.id,
            created_at: now,
            settled_at: None,
        };

        info!(deposit = %id, user = user_id, %amount, %currency, status = ?request.status, "Deposit requested");
        self.deposits.insert(id, Arc::new(Mutex::new(request.clone())));
        Ok(request)
    }

    /// Reacts to the on-chain watcher.
    ///
    /// Unconfirmed or unknown transfers are ignored. Confirmed transfers at or below
    /// the auto-credit threshold credit immediately; larger ones or amount
    /// mismatches move to admin approval.
    pub async fn on_transfer_event(&self, event: TransferEvent) -> EngineResult<Option<DepositRequest>> {
        if !event.confirmed {
            debug!(tx_hash = %event.tx_hash, "Ignoring unconfirmed transfer");
            return Ok(None);
        }

        let Some(id) = self.deposits_by_hash.get(&event.tx_hash).map(|e| *e.value()) else {
            warn!(tx_hash = %event.tx_hash, "Confirmed transfer matches no deposit request");
            return Ok(None);
        };
        let deposit = self.deposit_handle(id)?;
        let mut deposit = deposit.lock().await;

        if deposit.status != DepositStatus::AwaitingTransfer {
            return Err(EngineError::AlreadyProcessed {
                reference: format!("deposit:{}", id),
            });
        }

        let snapshot = self.settings.current()?;
        deposit.network = Some(event.network.clone());

        if event.amount != deposit.fee.requested_amount {
            warn!(
                deposit = %id,
                expected = %deposit.fee.requested_amount,
                received = %event.amount,
                "On-chain amount mismatch, routing to admin review"
            );
            deposit.status = DepositStatus::AwaitingApproval;
            return Ok(Some(deposit.clone()));
        }

        if deposit.fee.net_amount <= snapshot.settings.auto_credit_threshold {
            self.credit_deposit(&mut deposit, "Auto-credited on-chain deposit").await?;
        } else {
            info!(deposit = %id, "Deposit above auto-credit threshold, awaiting approval");
            deposit.status = DepositStatus::AwaitingApproval;
        }

        Ok(Some(deposit.clone()))
    }

    /// Admin approval of a deposit awaiting review
    pub async fn approve_deposit(&self, id: RequestId) -> EngineResult<DepositRequest> {
        let deposit = self.deposit_handle(id)?;
        let mut deposit = deposit.lock().await;

        match deposit.status {
            DepositStatus::AwaitingApproval => {
                self.credit_deposit(&mut deposit, "Deposit approved").await?;
                Ok(deposit.clone())
            }
            DepositStatus::Credited | DepositStatus::Rejected => Err(EngineError::AlreadyProcessed {
                reference: format!("deposit:{}", id),
            }),
            DepositStatus::AwaitingTransfer => Err(EngineError::invalid_transition(
                "deposit",
                deposit.status,
                DepositStatus::Credited,
            )),
        }
    }

    pub async fn reject_deposit(&self, id: RequestId) -> EngineResult<DepositRequest> {
        let deposit = self.deposit_handle(id)?;
        let mut deposit = deposit.lock().await;

        if matches!(deposit.status, DepositStatus::Credited | DepositStatus::Rejected) {
            return Err(EngineError::AlreadyProcessed {
                reference: format!("deposit:{}", id),
            });
        }

        let now = self.clock.now();
        self.ledger
            .settle(
                &WalletKey::new(deposit.user_id.clone(), deposit.wallet_type),
                deposit.pending_entry,
                TransactionStatus::Rejected,
                "Deposit rejected",
                now,
            )
            .await?;
        deposit.status = DepositStatus::Rejected;
        deposit.settled_at = Some(now);

        info!(deposit = %id, "Deposit rejected");
        Ok(deposit.clone())
    }

    async fn credit_deposit(&self, deposit: &mut DepositRequest, description: &str) -> EngineResult<()> {
        let now = self.clock.now();
        self.ledger
            .settle(
                &WalletKey::new(deposit.user_id.clone(), deposit.wallet_type),
                deposit.pending_entry,
                TransactionStatus::Completed,
                description,
                now,
            )
            .await?;
        deposit.status = DepositStatus::Credited;
        deposit.settled_at = Some(now);

        info!(deposit = %deposit.id, amount = %deposit.fee.net_amount, "Deposit credited");
        Ok(())
    }

    fn deposit_handle(&self, id: RequestId) -> EngineResult<Arc<Mutex<DepositRequest>>> {
        self.deposits
            .get(&id)
            .map(|d| d.clone())
            .ok_or_else(|| EngineError::not_found(format!("deposit {}", id)))
    }

    pub async fn deposit(&self, id: RequestId) -> EngineResult<DepositRequest> {
        Ok(self.deposit_handle(id)?.lock().await.clone())
    }

    /// Creates a withdrawal and reserves the funds in the same step.
    ///
    /// Concurrent requests against one wallet are serialized by the wallet lock, so
    /// their combined amount can never exceed the balance.
    pub async fn request_withdrawal(
        &self,
        user_id: &str,
        wallet_type: WalletType,
        amount: Decimal,
    ) -> EngineResult<WithdrawalRequest> {
        if wallet_type.is_income_wallet() {
            return Err(EngineError::invalid_field(
                "wallet_type",
                format!("{} balances must be converted to USDT before withdrawal", wallet_type),
            ));
        }

        if self.kyc.kyc_status(user_id).await != KycStatus::Approved {
            return Err(EngineError::KycRequired(user_id.to_string()));
        }

        let snapshot = self.settings.current()?;
        let fee = FeeBreakdown::compute(FeeKind::Withdrawal, wallet_type.currency(), amount, &snapshot)?;

        let id = Uuid::new_v4();
        let now = self.clock.now();
        let reservation = self
            .ledger
            .reserve(
                PostRequest::debit(WalletKey::new(user_id, wallet_type), TransactionType::Withdraw, amount)
                    .description(format!("Withdrawal of {} {} (net {})", amount, wallet_type.currency(), fee.net_amount))
                    .reference(format!("withdrawal:{}", id))
                    .config_version(snapshot.version),
                now,
            )
            .await?;

        let request = WithdrawalRequest {
            id,
            user_id: user_id.to_string(),
            wallet_type,
            fee,
            reservation: reservation.id,
            status: WithdrawalStatus::Pending,
            created_at: now,
            settled_at: None,
        };

        info!(withdrawal = %id, user = user_id, %amount, wallet = %wallet_type, "Withdrawal requested");
        self.withdrawals.insert(id, Arc::new(Mutex::new(request.clone())));
        Ok(request)
    }

    pub async fn approve_withdrawal(&self, id: RequestId) -> EngineResult<WithdrawalRequest> {
        self.close_withdrawal(id, WithdrawalStatus::Approved).await
    }

    pub async fn reject_withdrawal(&self, id: RequestId) -> EngineResult<WithdrawalRequest> {
        self.close_withdrawal(id, WithdrawalStatus::Rejected).await
    }

    async fn close_withdrawal(&self, id: RequestId, outcome: WithdrawalStatus) -> EngineResult<WithdrawalRequest> {
        let handle = self
            .withdrawals
            .get(&id)
            .map(|w| w.clone())
            .ok_or_else(|| EngineError::not_found(format!("withdrawal {}", id)))?;
        let mut withdrawal = handle.lock().await;

        if withdrawal.status != WithdrawalStatus::Pending {
            return Err(EngineError::AlreadyProcessed {
                reference: format!("withdrawal:{}", id),
            });
        }

        let (ledger_status, description) = match outcome {
            WithdrawalStatus::Approved => (TransactionStatus::Completed, "Withdrawal paid out"),
            _ => (TransactionStatus::Rejected, "Withdrawal rejected, funds released"),
        };

        let now = self.clock.now();
        self.ledger
            .settle(
                &WalletKey::new(withdrawal.user_id.clone(), withdrawal.wallet_type),
                withdrawal.reservation,
                ledger_status,
                description,
                now,
            )
            .await?;
        withdrawal.status = outcome;
        withdrawal.settled_at = Some(now);

        info!(withdrawal = %id, outcome = ?outcome, "Withdrawal closed");
        Ok(withdrawal.clone())
    }

    pub async fn withdrawal(&self, id: RequestId) -> EngineResult<WithdrawalRequest> {
        let handle = self
            .withdrawals
            .get(&id)
            .map(|w| w.clone())
            .ok_or_else(|| EngineError::not_found(format!("withdrawal {}", id)))?;
        let withdrawal = handle.lock().await.clone();
        Ok(withdrawal)
    }

    /// Redeems or converts value between two wallets of the same user.
    ///
    /// Income wallets redeem 1:1 into USDT; USDT and INR convert at the current rate.
    pub async fn convert(
        &self,
        user_id: &str,
        from: WalletType,
        to: WalletType,
        amount: Decimal,
    ) -> EngineResult<ConversionReceipt> {
        let allowed = matches!(
            (from, to),
            (WalletType::Roi, WalletType::Usdt)
                | (WalletType::Salary, WalletType::Usdt)
                | (WalletType::Breakdown, WalletType::Usdt)
                | (WalletType::Usdt, WalletType::Inr)
                | (WalletType::Inr, WalletType::Usdt)
        );
        if !allowed {
            return Err(EngineError::validation(format!(
                "conversion from {} to {} is not supported",
                from, to
            )));
        }

        let snapshot = self.settings.current()?;
        let rate = snapshot.settings.currency_rate;
        let credited = fees::convert(amount, from.currency(), to.currency(), rate)?;
        let description = format!("Convert {} {} to {}", amount, from, to);

        let (debit, credit) = self
            .ledger
            .transfer(
                PostRequest::debit(WalletKey::new(user_id, from), TransactionType::Conversion, amount)
                    .description(description.clone())
                    .config_version(snapshot.version),
                PostRequest::credit(WalletKey::new(user_id, to), TransactionType::Conversion, credited)
                    .description(description)
                    .config_version(snapshot.version),
                self.clock.now(),
            )
            .await?;

        Ok(ConversionReceipt {
            debit,
            credit,
            currency_rate: rate,
            config_version: snapshot.version,
        })
    }
}
