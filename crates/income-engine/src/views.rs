//! Read-only dashboard projections. Nothing here writes to the ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tierfolio_core::{Currency, SettingsSnapshot, UserId, WalletAccount, WalletType};
use wallet_ledger::fees;

use crate::breakdown::BreakdownQuote;
use crate::lifecycle::Investment;
use crate::roi::real_time_roi;
use crate::schedule;

#[derive(Debug, Clone, Serialize)]
pub struct WalletView {
    pub wallet_type: WalletType,
    pub currency: Currency,
    pub balance: Decimal,
    pub pending_balance: Decimal,
    pub locked: bool,
    /// Balance valued at the rate in force when the view was built
    pub inr_equivalent: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletOverview {
    pub user_id: UserId,
    pub wallets: Vec<WalletView>,
    pub total_inr: Decimal,
    pub currency_rate: Decimal,
    pub config_version: u64,
}

impl WalletOverview {
    pub fn build(user_id: &str, accounts: Vec<WalletAccount>, snapshot: &SettingsSnapshot) -> Self {
        let rate = snapshot.settings.currency_rate;
        let wallets: Vec<WalletView> = accounts
            .into_iter()
            .map(|account| {
                let currency = account.currency();
                let inr_equivalent = match currency {
                    Currency::Inr => account.balance,
                    Currency::Usdt => fees::usdt_to_inr(account.balance, rate),
                };
                WalletView {
                    wallet_type: account.wallet_type,
                    currency,
                    balance: account.balance,
                    pending_balance: account.pending_balance,
                    locked: account.locked,
                    inr_equivalent,
                }
            })
            .collect();

        Self {
            user_id: user_id.to_string(),
            total_inr: wallets.iter().map(|w| w.inr_equivalent).sum(),
            wallets,
            currency_rate: rate,
            config_version: snapshot.version,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestmentView {
    #[serde(flatten)]
    pub investment: Investment,
    /// Display-only estimate, never a balance
    pub real_time_roi: Decimal,
    pub next_due_date: Option<DateTime<Utc>>,
    pub periods_remaining: u32,
    pub breakdown_quote: Option<BreakdownQuote>,
}

impl InvestmentView {
    pub fn build(investment: Investment, now: DateTime<Utc>, breakdown_quote: Option<BreakdownQuote>) -> Self {
        let periods_remaining = investment
            .plan
            .duration_times
            .saturating_sub(investment.periods_credited);
        let next_due_date = match (investment.start_date, periods_remaining) {
            (Some(start), remaining) if remaining > 0 && !investment.status.is_terminal() => {
                schedule::due_date(start, &investment.plan.frequency, investment.periods_credited)
            }
            _ => None,
        };

        Self {
            real_time_roi: real_time_roi(&investment, now),
            next_due_date,
            periods_remaining,
            breakdown_quote,
            investment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tierfolio_core::{PlatformSettings, WalletKey};

    #[test]
    fn test_inr_equivalents_use_snapshot_rate() {
        let snapshot = SettingsSnapshot {
            version: 3,
            settings: PlatformSettings {
                currency_rate: dec!(80),
                ..PlatformSettings::default()
            },
            published_at: Utc::now(),
        };
        let mut inr = WalletAccount::empty(&WalletKey::new("u", WalletType::Inr));
        inr.balance = dec!(100);
        let mut roi = WalletAccount::empty(&WalletKey::new("u", WalletType::Roi));
        roi.balance = dec!(2.5);

        let overview = WalletOverview::build("u", vec![inr, roi], &snapshot);
        assert_eq!(overview.wallets[1].inr_equivalent, dec!(200));
        assert_eq!(overview.total_inr, dec!(300));
        assert_eq!(overview.config_version, 3);
    }
}
