//! Core ledger types and data structures for the Tierfolio income engine.
//!
//! This module defines the fundamental types shared by the wallet ledger and the
//! income engine: identifiers, wallet and currency tags, and the immutable
//! transaction record every balance is derived from.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifiers for engine entities
pub type UserId = String;
pub type PlanId = Uuid;
pub type InvestmentId = Uuid;
pub type TransactionId = Uuid;
pub type BreakdownId = Uuid;
pub type RequestId = Uuid;

/// Settlement currency of a wallet or amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Currency {
    /// Indian rupee, two decimal places
    Inr,
    /// Tether, six decimal places
    Usdt,
}

impl Currency {
    /// Number of decimal places amounts in this currency are stored with
    pub fn scale(&self) -> u32 {
        match self {
            Currency::Inr => 2,
            Currency::Usdt => 6,
        }
    }

    /// Rounds an amount to this currency's precision (half away from zero)
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.scale(), RoundingStrategy::MidpointAwayFromZero)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Inr => write!(f, "INR"),
            Currency::Usdt => write!(f, "USDT"),
        }
    }
}

/// Purpose tag of a balance bucket. One account exists per (user, type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WalletType {
    Inr,
    Usdt,
    Roi,
    Salary,
    Breakdown,
}

impl WalletType {
    pub const ALL: [WalletType; 5] = [
        WalletType::Inr,
        WalletType::Usdt,
        WalletType::Roi,
        WalletType::Salary,
        WalletType::Breakdown,
    ];

    /// Currency the wallet is denominated in. Income wallets settle in USDT.
    pub fn currency(&self) -> Currency {
        match self {
            WalletType::Inr => Currency::Inr,
            _ => Currency::Usdt,
        }
    }

    /// Returns true for wallets that only receive engine income
    pub fn is_income_wallet(&self) -> bool {
        matches!(
            self,
            WalletType::Roi | WalletType::Salary | WalletType::Breakdown
        )
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WalletType::Inr => "INR",
            WalletType::Usdt => "USDT",
            WalletType::Roi => "ROI",
            WalletType::Salary => "SALARY",
            WalletType::Breakdown => "BREAKDOWN",
        };
        f.write_str(label)
    }
}

/// Addresses a single wallet account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletKey {
    pub user_id: UserId,
    pub wallet_type: WalletType,
}

impl WalletKey {
    pub fn new(user_id: impl Into<UserId>, wallet_type: WalletType) -> Self {
        Self {
            user_id: user_id.into(),
            wallet_type,
        }
    }

    pub fn currency(&self) -> Currency {
        self.wallet_type.currency()
    }
}

impl fmt::Display for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.wallet_type)
    }
}

/// Snapshot of a wallet account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub user_id: UserId,
    pub wallet_type: WalletType,
    /// Spendable balance
    pub balance: Decimal,
    /// Funds reserved by withdrawals awaiting approval
    pub pending_balance: Decimal,
    /// Blocks withdrawals and conversions out of the wallet, never credits
    pub locked: bool,
}

impl WalletAccount {
    pub fn empty(key: &WalletKey) -> Self {
        Self {
            user_id: key.user_id.clone(),
            wallet_type: key.wallet_type,
            balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            locked: false,
        }
    }

    pub fn currency(&self) -> Currency {
        self.wallet_type.currency()
    }

    /// Settled funds, spendable plus reserved
    pub fn settled(&self) -> Decimal {
        self.balance + self.pending_balance
    }
}

/// Business classification of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    RoiCredit,
    SalaryCredit,
    Refund,
    Breakdown,
    PlanPurchase,
    PlanPayout,
    DirectReferral,
    /// Pass-through income paid to a referrer from a downline ROI posting
    BoostIncome,
    /// Movement between two wallets of the same user
    Conversion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Rejected,
    Failed,
}

/// Whether an entry adds to or removes from the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Credit,
    Debit,
}

/// Immutable ledger entry. Corrections are new entries, never edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet: WalletKey,
    pub tx_type: TransactionType,
    pub direction: Direction,
    /// Always positive; the sign comes from `direction`
    pub amount: Decimal,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub description: String,
    /// Idempotency reference, unique per wallet when present
    pub reference: Option<String>,
    /// Earlier entry this one settles or reverses
    pub related_to: Option<TransactionId>,
    /// Settings snapshot version the amount was computed with
    pub config_version: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Contribution of this entry to the settled balance
    pub fn settled_delta(&self) -> Decimal {
        if self.status != TransactionStatus::Completed {
            return Decimal::ZERO;
        }
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}

/// Returns `percent` percent of `amount` without rounding
pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    amount * percent / Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_rounding() {
        assert_eq!(Currency::Inr.round(dec!(10.005)), dec!(10.01));
        assert_eq!(Currency::Usdt.round(dec!(1.0000005)), dec!(1.000001));
        assert_eq!(Currency::Inr.round(dec!(-2.345)), dec!(-2.35));
    }

    #[test]
    fn test_income_wallets_settle_in_usdt() {
        assert_eq!(WalletType::Roi.currency(), Currency::Usdt);
        assert_eq!(WalletType::Salary.currency(), Currency::Usdt);
        assert_eq!(WalletType::Inr.currency(), Currency::Inr);
        assert!(WalletType::Breakdown.is_income_wallet());
        assert!(!WalletType::Usdt.is_income_wallet());
    }

    #[test]
    fn test_settled_delta_ignores_pending() {
        let key = WalletKey::new("u1", WalletType::Usdt);
        let mut tx = Transaction {
            id: Uuid::new_v4(),
            wallet: key,
            tx_type: TransactionType::Withdraw,
            direction: Direction::Debit,
            amount: dec!(25),
            currency: Currency::Usdt,
            status: TransactionStatus::Pending,
            description: "withdrawal".into(),
            reference: None,
            related_to: None,
            config_version: None,
            created_at: Utc::now(),
        };
        assert_eq!(tx.settled_delta(), Decimal::ZERO);
        tx.status = TransactionStatus::Completed;
        assert_eq!(tx.settled_delta(), dec!(-25));
    }

    #[test]
    fn test_wallet_key_display() {
        let key = WalletKey::new("alice", WalletType::Breakdown);
        assert_eq!(key.to_string(), "alice:BREAKDOWN");
    }
}
