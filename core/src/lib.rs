//! # Tierfolio Core
//!
//! Shared building blocks for the income and ledger engine: identifiers and ledger
//! types, the engine error, versioned platform settings, the clock abstraction and
//! the KYC collaborator interface.

pub mod clock;
pub mod error;
pub mod kyc;
pub mod settings;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{EngineError, EngineResult};
pub use kyc::{InMemoryKycDirectory, KycDirectory, KycStatus};
pub use settings::{PlatformSettings, RequiredReferrals, SalaryLevel, SettingsSnapshot, SettingsStore};
pub use types::*;
