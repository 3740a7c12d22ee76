//! # Tierfolio - Income & Ledger Computation Engine
//!
//! Tierfolio owns the money rules of a tiered investment platform: how much sits in
//! each wallet, how plan purchases, ROI payouts, early exits, referral boosts and
//! salary levels move it, and when it may be withdrawn or converted.
//!
//! ## Architecture
//!
//! The system is organized into modular crates:
//! - `tierfolio-core`: identifiers, ledger types, the engine error, versioned settings
//! - `wallet-ledger`: balances, the append-only transaction log, fees, cashier flows
//! - `income-engine`: plans, investment lifecycle, ROI scheduler, breakdowns, boost, salary
//!
//! This crate wires them into a process: configuration, the scheduler loop and the
//! dashboard HTTP surface.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tierfolio::core::Platform;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let platform = Platform::builder().build()?;
//! platform.engine().register_user("alice", None)?;
//! let report = platform.engine().run_tick().await;
//! println!("credited {} payouts", report.roi.credited);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod core;
pub mod web;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::core::{Platform, PlatformBuilder};
    pub use income_engine::{IncomeEngine, PurchaseMethod};
    pub use tierfolio_core::{EngineError, EngineResult, WalletType};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information
pub const BUILD_INFO: &str = concat!("Tierfolio v", env!("CARGO_PKG_VERSION"));
