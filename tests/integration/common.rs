use chrono::{DateTime, TimeZone, Utc};
use income_engine::{IncomeEngine, PayoutFrequency, PlanTerms};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tierfolio::core::Platform;
use tierfolio_core::{
    ManualClock, PlatformSettings, RequiredReferrals, SalaryLevel, TransactionType, WalletKey,
    WalletType,
};
use wallet_ledger::PostRequest;

pub struct Harness {
    pub platform: Platform,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn engine(&self) -> &IncomeEngine {
        &self.platform.engine
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
}

/// One referral unlocks boost and salary qualification; a single level pays 50
pub fn settings() -> PlatformSettings {
    PlatformSettings {
        min_referrals_required: 1,
        required_referrals: RequiredReferrals { free: 1, paid: 1 },
        salary_levels: vec![SalaryLevel {
            level: 1,
            turnover_required: dec!(1000),
            salary_amount: dec!(50),
            timeline_days: 30,
        }],
        ..PlatformSettings::default()
    }
}

pub fn harness() -> Harness {
    harness_with(settings())
}

pub fn harness_with(settings: PlatformSettings) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let platform = Platform::builder()
        .settings(settings)
        .clock(clock.clone())
        .build()
        .unwrap();
    Harness { platform, clock }
}

/// 1000 USDT, 10 USDT a day for 30 days, 10% boost
pub fn daily_plan() -> PlanTerms {
    PlanTerms {
        name: "Daily 30".into(),
        amount: dec!(1000),
        roi_amount: dec!(10),
        duration_times: 30,
        frequency: PayoutFrequency::Daily,
        boost_percent: dec!(10),
        refund_timeline_days: None,
    }
}

pub async fn fund(engine: &IncomeEngine, user: &str, wallet_type: WalletType, amount: Decimal) {
    engine
        .ledger()
        .post(
            PostRequest::credit(WalletKey::new(user, wallet_type), TransactionType::Deposit, amount),
            t0(),
        )
        .await
        .unwrap();
}

pub async fn balance(engine: &IncomeEngine, user: &str, wallet_type: WalletType) -> Decimal {
    engine.ledger().balance(&WalletKey::new(user, wallet_type)).await
}
