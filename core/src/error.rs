//! Engine error types
//!
//! One error enum is shared by every component so callers can tell a rejected
//! request from an already-processed one from a transient failure.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by ledger and income engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("Breakdown window closed: {days_since_start} days since start, limit {refund_timeline_days}")]
    WindowClosed {
        days_since_start: i64,
        refund_timeline_days: u32,
    },

    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("Stale configuration: {0}")]
    StaleConfiguration(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Wallet {0} is locked")]
    WalletLocked(String),

    #[error("KYC approval required for user {0}")]
    KycRequired(String),

    #[error("Invalid or already used auth key")]
    InvalidAuthKey,

    #[error("Already processed: {reference}")]
    AlreadyProcessed { reference: String },
}

impl EngineError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error tied to a request field
    pub fn invalid_field<S: Into<String>, F: Into<String>>(field: F, message: S) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn invalid_transition<E, F, T>(entity: E, from: F, to: T) -> Self
    where
        E: Into<String>,
        F: std::fmt::Debug,
        T: std::fmt::Debug,
    {
        Self::InvalidTransition {
            entity: entity.into(),
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }

    /// A second PENDING breakdown request for the same investment
    pub fn breakdown_already_requested(investment_id: impl std::fmt::Display) -> Self {
        Self::DuplicateRequest(format!(
            "BreakdownAlreadyRequested: investment {}",
            investment_id
        ))
    }

    /// A second open investment in the same plan for the same user
    pub fn duplicate_purchase(user_id: &str, plan_id: impl std::fmt::Display) -> Self {
        Self::DuplicateRequest(format!(
            "user {} already holds an investment in plan {}",
            user_id, plan_id
        ))
    }

    /// Stable machine-readable code for the error
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "VALIDATION_ERROR",
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EngineError::WindowClosed { .. } => "WINDOW_CLOSED",
            EngineError::DuplicateRequest(_) => "DUPLICATE_REQUEST",
            EngineError::StaleConfiguration(_) => "STALE_CONFIGURATION",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::WalletLocked(_) => "WALLET_LOCKED",
            EngineError::KycRequired(_) => "KYC_REQUIRED",
            EngineError::InvalidAuthKey => "INVALID_AUTH_KEY",
            EngineError::AlreadyProcessed { .. } => "ALREADY_PROCESSED",
        }
    }

    /// True when retrying the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StaleConfiguration(_))
    }
}

/// Type alias for engine results
pub type EngineResult<T> = Result<T, EngineError>;
