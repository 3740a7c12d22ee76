//! Wallet Ledger
//!
//! Per-user, per-wallet-type balances backed by an append-only transaction log,
//! the pure fee and rate calculator, and the cashier flows that move money in and
//! out of the ledger.
//!
//! Core Features:
//! - Fixed-point balances that never go negative
//! - Idempotent credits keyed by reference
//! - Withdrawal reservations that close exactly once
//! - Deposit, withdrawal and conversion with versioned fee breakdowns

pub mod cashier;
pub mod fees;
pub mod ledger;

pub use cashier::{
    Cashier, ConversionReceipt, DepositRequest, DepositStatus, TransferEvent, WithdrawalRequest,
    WithdrawalStatus,
};
pub use fees::{FeeBreakdown, FeeKind};
pub use ledger::{HistoryFilter, PostRequest, Posting, WalletLedger};
