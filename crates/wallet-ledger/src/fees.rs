//! Fee & Rate Calculator
//!
//! Pure conversions between INR and USDT and percentage fee math for deposits and
//! withdrawals. Nothing here touches the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tierfolio_core::{percent_of, Currency, EngineError, EngineResult, SettingsSnapshot};

/// Amount actually credited for a deposit after the deposit fee
pub fn deposit_credit(entered_amount: Decimal, fee_percent: Decimal) -> Decimal {
    entered_amount * (Decimal::ONE - fee_percent / Decimal::ONE_HUNDRED)
}

/// Amount paid out for a withdrawal after the withdrawal fee
pub fn withdrawal_payout(requested_amount: Decimal, fee_percent: Decimal) -> Decimal {
    requested_amount * (Decimal::ONE - fee_percent / Decimal::ONE_HUNDRED)
}

/// USDT minimum expressed in INR at the given rate (INR per USDT)
pub fn min_in_inr(min_usdt: Decimal, currency_rate: Decimal) -> Decimal {
    Currency::Inr.round(min_usdt * currency_rate)
}

pub fn usdt_to_inr(amount: Decimal, currency_rate: Decimal) -> Decimal {
    Currency::Inr.round(amount * currency_rate)
}

pub fn inr_to_usdt(amount: Decimal, currency_rate: Decimal) -> EngineResult<Decimal> {
    if currency_rate <= Decimal::ZERO {
        return Err(EngineError::StaleConfiguration(
            "currency rate must be positive".into(),
        ));
    }
    Ok(Currency::Usdt.round(amount / currency_rate))
}

/// Converts an amount between currencies at the given rate
pub fn convert(amount: Decimal, from: Currency, to: Currency, currency_rate: Decimal) -> EngineResult<Decimal> {
    match (from, to) {
        (Currency::Usdt, Currency::Inr) => Ok(usdt_to_inr(amount, currency_rate)),
        (Currency::Inr, Currency::Usdt) => inr_to_usdt(amount, currency_rate),
        (same, _) => Ok(same.round(amount)),
    }
}

/// Minimum amount in `currency` for a USDT-denominated floor
pub fn minimum_for(currency: Currency, min_usdt: Decimal, currency_rate: Decimal) -> Decimal {
    match currency {
        Currency::Usdt => min_usdt,
        Currency::Inr => min_in_inr(min_usdt, currency_rate),
    }
}

/// Which side of the cashier a fee breakdown belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeKind {
    Deposit,
    Withdrawal,
}

/// Fee computation shown to the user before confirming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub kind: FeeKind,
    pub currency: Currency,
    pub requested_amount: Decimal,
    pub fee_percent: Decimal,
    pub fee_amount: Decimal,
    /// Credited (deposit) or paid out (withdrawal)
    pub net_amount: Decimal,
    pub minimum_amount: Decimal,
    pub currency_rate: Decimal,
    pub config_version: u64,
}

impl FeeBreakdown {
    /// Validates the minimum and computes the fee using one settings snapshot.
    ///
    /// Fails before any ledger mutation when the amount is below the minimum.
    pub fn compute(
        kind: FeeKind,
        currency: Currency,
        requested_amount: Decimal,
        snapshot: &SettingsSnapshot,
    ) -> EngineResult<Self> {
        let settings = &snapshot.settings;
        if requested_amount <= Decimal::ZERO {
            return Err(EngineError::invalid_field("amount", "amount must be positive"));
        }

        let (fee_percent, min_usdt) = match kind {
            FeeKind::Deposit => (settings.deposit_fee_percent, settings.min_deposit_usdt),
            FeeKind::Withdrawal => (settings.withdrawal_fee_percent, settings.min_withdrawal_usdt),
        };
        let minimum_amount = minimum_for(currency, min_usdt, settings.currency_rate);

        if requested_amount < minimum_amount {
            return Err(EngineError::invalid_field(
                "amount",
                format!(
                    "minimum {:?} is {} {}, requested {}",
                    kind, minimum_amount, currency, requested_amount
                ),
            ));
        }

        let net = match kind {
            FeeKind::Deposit => deposit_credit(requested_amount, fee_percent),
            FeeKind::Withdrawal => withdrawal_payout(requested_amount, fee_percent),
        };
        let net_amount = currency.round(net);

        Ok(Self {
            kind,
            currency,
            requested_amount,
            fee_percent,
            fee_amount: currency.round(percent_of(requested_amount, fee_percent)),
            net_amount,
            minimum_amount,
            currency_rate: settings.currency_rate,
            config_version: snapshot.version,
        })
    }
}
