use chrono::Duration;
use income_engine::{BreakdownStatus, InvestmentStatus, PurchaseMethod, SalaryState};
use rust_decimal_macros::dec;
use tierfolio_core::{Currency, WalletType};

use crate::common::{balance, daily_plan, fund, harness, t0};

#[tokio::test]
async fn test_purchase_accrual_boost_and_salary() {
    let h = harness();
    let engine = h.engine();
    engine.register_user("sponsor", None).unwrap();
    engine.register_user("investor", Some("sponsor")).unwrap();
    let plan = engine.create_plan(daily_plan()).unwrap();
    fund(engine, "investor", WalletType::Usdt, dec!(1000)).await;

    let investment = engine
        .purchase("investor", plan.id, PurchaseMethod::DirectWallet(Currency::Usdt))
        .await
        .unwrap();
    assert_eq!(investment.status, InvestmentStatus::Active);
    assert_eq!(balance(engine, "investor", WalletType::Usdt).await, dec!(0));

    h.clock.set(t0() + Duration::days(3) + Duration::hours(1));
    let report = engine.run_tick().await;
    assert_eq!(report.roi.credited, 3);
    assert_eq!(report.roi.failed, 0);

    assert_eq!(balance(engine, "investor", WalletType::Roi).await, dec!(30));
    // 10% of each 10 USDT payout
    assert_eq!(balance(engine, "sponsor", WalletType::Usdt).await, dec!(3));
    assert_eq!(balance(engine, "sponsor", WalletType::Salary).await, dec!(50));

    let sponsor_salary = engine.salary_status("sponsor").await.unwrap();
    assert_eq!(sponsor_salary.state, SalaryState::Completed);
    assert_eq!(sponsor_salary.qualified_at, Some(t0()));
    let investor_salary = engine.salary_status("investor").await.unwrap();
    assert_eq!(investor_salary.state, SalaryState::Disqualified);

    // A second tick at the same instant changes nothing
    let report = engine.run_tick().await;
    assert_eq!(report.roi.credited, 0);
    assert_eq!(balance(engine, "investor", WalletType::Roi).await, dec!(30));
    assert_eq!(balance(engine, "sponsor", WalletType::Usdt).await, dec!(3));
    assert_eq!(engine.salary_history("sponsor").await.len(), 1);

    let view = engine.investment("investor", investment.id).await.unwrap();
    assert_eq!(view.investment.roi_earned, dec!(30));
    assert_eq!(view.periods_remaining, 27);
    assert_eq!(view.next_due_date, Some(t0() + Duration::days(4)));
    assert_eq!(view.real_time_roi, dec!(30.416667));

    let boost = engine.boost_summary("sponsor").unwrap();
    assert!(boost.qualified);
    assert_eq!(boost.total_earned, dec!(3));
    assert_eq!(engine.boost_history("sponsor").len(), 3);
}

#[tokio::test]
async fn test_investment_completes_after_duration() {
    let h = harness();
    let engine = h.engine();
    engine.register_user("solo", None).unwrap();
    let plan = engine.create_plan(daily_plan()).unwrap();
    fund(engine, "solo", WalletType::Usdt, dec!(1000)).await;
    let investment = engine
        .purchase("solo", plan.id, PurchaseMethod::DirectWallet(Currency::Usdt))
        .await
        .unwrap();

    h.clock.set(t0() + Duration::days(45));
    let report = engine.run_tick().await;
    assert_eq!(report.roi.credited, 30);
    assert_eq!(report.roi.completed, 1);

    let view = engine.investment("solo", investment.id).await.unwrap();
    assert_eq!(view.investment.status, InvestmentStatus::Completed);
    assert_eq!(view.investment.roi_earned, dec!(300));
    assert_eq!(view.investment.end_date, Some(t0() + Duration::days(30)));
    assert_eq!(balance(engine, "solo", WalletType::Roi).await, dec!(300));

    // The plan slot is free again once the investment is closed
    fund(engine, "solo", WalletType::Usdt, dec!(1000)).await;
    assert!(engine
        .purchase("solo", plan.id, PurchaseMethod::DirectWallet(Currency::Usdt))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_breakdown_escrows_roi_then_settles() {
    let h = harness();
    let engine = h.engine();
    engine.register_user("sponsor", None).unwrap();
    engine.register_user("investor", Some("sponsor")).unwrap();
    let plan = engine.create_plan(daily_plan()).unwrap();
    fund(engine, "investor", WalletType::Usdt, dec!(1000)).await;
    let investment = engine
        .purchase("investor", plan.id, PurchaseMethod::DirectWallet(Currency::Usdt))
        .await
        .unwrap();

    h.clock.set(t0() + Duration::days(2));
    engine.run_tick().await;
    assert_eq!(balance(engine, "investor", WalletType::Roi).await, dec!(20));

    let quote = engine.breakdown_quote("investor", investment.id).await.unwrap();
    assert!(quote.window_open);
    assert_eq!(quote.figures.breakdown_amount, dec!(790));

    let request = engine
        .request_breakdown("investor", investment.id, WalletType::Usdt)
        .await
        .unwrap();
    assert_eq!(request.status, BreakdownStatus::Pending);
    assert_eq!(request.amount, dec!(790));
    assert_eq!(
        engine
            .request_breakdown("investor", investment.id, WalletType::Usdt)
            .await
            .unwrap_err()
            .kind(),
        "DUPLICATE_REQUEST"
    );

    // While pending, half of each payout is held in escrow and boost is paused
    h.clock.set(t0() + Duration::days(3));
    engine.run_tick().await;
    assert_eq!(balance(engine, "investor", WalletType::Roi).await, dec!(25));
    assert_eq!(balance(engine, "investor", WalletType::Breakdown).await, dec!(0));
    assert_eq!(balance(engine, "sponsor", WalletType::Usdt).await, dec!(2));

    let err = engine
        .cashier()
        .convert("investor", WalletType::Breakdown, WalletType::Usdt, dec!(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INSUFFICIENT_FUNDS");

    let settlement = engine.approve_breakdown(investment.id).await.unwrap();
    // 1000 * 80% - 30 * 0.5
    assert_eq!(settlement.request.amount, dec!(785));
    assert_eq!(settlement.request.status, BreakdownStatus::Approved);
    assert_eq!(balance(engine, "investor", WalletType::Usdt).await, dec!(785));
    assert_eq!(balance(engine, "investor", WalletType::Breakdown).await, dec!(5));

    h.clock.set(t0() + Duration::days(10));
    engine.run_tick().await;
    let view = engine.investment("investor", investment.id).await.unwrap();
    assert_eq!(view.investment.status, InvestmentStatus::Cancelled);
    assert_eq!(balance(engine, "investor", WalletType::Roi).await, dec!(25));
}

#[tokio::test]
async fn test_cancelled_breakdown_restores_full_roi() {
    let h = harness();
    let engine = h.engine();
    engine.register_user("sponsor", None).unwrap();
    engine.register_user("investor", Some("sponsor")).unwrap();
    let plan = engine.create_plan(daily_plan()).unwrap();
    fund(engine, "investor", WalletType::Usdt, dec!(1000)).await;
    let investment = engine
        .purchase("investor", plan.id, PurchaseMethod::DirectWallet(Currency::Usdt))
        .await
        .unwrap();

    engine
        .request_breakdown("investor", investment.id, WalletType::Breakdown)
        .await
        .unwrap();
    h.clock.set(t0() + Duration::days(1));
    engine.run_tick().await;
    assert_eq!(balance(engine, "investor", WalletType::Roi).await, dec!(5));
    assert_eq!(balance(engine, "sponsor", WalletType::Usdt).await, dec!(0));

    let cancelled = engine.cancel_breakdown("investor", investment.id).await.unwrap();
    assert_eq!(cancelled.status, BreakdownStatus::Cancelled);

    h.clock.set(t0() + Duration::days(2));
    engine.run_tick().await;
    assert_eq!(balance(engine, "investor", WalletType::Roi).await, dec!(15));
    assert_eq!(balance(engine, "investor", WalletType::Breakdown).await, dec!(5));
    assert_eq!(balance(engine, "sponsor", WalletType::Usdt).await, dec!(1));

    let view = engine.investment("investor", investment.id).await.unwrap();
    assert_eq!(view.investment.roi_earned, dec!(20));
}

#[tokio::test]
async fn test_admin_purchase_waits_for_approval() {
    let h = harness();
    let engine = h.engine();
    engine.register_user("sponsor", None).unwrap();
    engine.register_user("investor", Some("sponsor")).unwrap();
    let plan = engine.create_plan(daily_plan()).unwrap();

    let investment = engine
        .purchase("investor", plan.id, PurchaseMethod::AdminRequest)
        .await
        .unwrap();
    assert_eq!(investment.status, InvestmentStatus::PendingApproval);

    h.clock.set(t0() + Duration::days(2));
    engine.run_tick().await;
    assert_eq!(balance(engine, "investor", WalletType::Roi).await, dec!(0));
    assert!(!engine.graph().member("investor").unwrap().is_paid());

    let approved = engine.approve_investment(investment.id).await.unwrap();
    assert_eq!(approved.status, InvestmentStatus::Active);
    assert_eq!(approved.start_date, Some(t0() + Duration::days(2)));
    assert_eq!(
        engine.graph().member("investor").unwrap().paid_at,
        Some(t0() + Duration::days(2))
    );

    h.clock.set(t0() + Duration::days(3));
    engine.run_tick().await;
    assert_eq!(balance(engine, "investor", WalletType::Roi).await, dec!(10));

    assert_eq!(
        engine.reject_investment(investment.id).await.unwrap_err().kind(),
        "INVALID_TRANSITION"
    );
}

#[tokio::test]
async fn test_auth_key_is_single_use() {
    let h = harness();
    let engine = h.engine();
    engine.register_user("alice", None).unwrap();
    engine.register_user("bob", None).unwrap();
    let plan = engine.create_plan(daily_plan()).unwrap();
    let key = engine.issue_auth_key(plan.id).unwrap();

    let investment = engine
        .purchase("alice", plan.id, PurchaseMethod::AuthKey(key.code.clone()))
        .await
        .unwrap();
    assert_eq!(investment.status, InvestmentStatus::Active);

    let err = engine
        .purchase("bob", plan.id, PurchaseMethod::AuthKey(key.code))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_AUTH_KEY");
}

#[tokio::test]
async fn test_stale_settings_fail_closed_and_recover() {
    let h = harness();
    let engine = h.engine();
    engine.register_user("sponsor", None).unwrap();
    engine.register_user("investor", Some("sponsor")).unwrap();
    let plan = engine.create_plan(daily_plan()).unwrap();
    fund(engine, "investor", WalletType::Usdt, dec!(2000)).await;
    engine
        .purchase("investor", plan.id, PurchaseMethod::DirectWallet(Currency::Usdt))
        .await
        .unwrap();

    engine.settings().mark_stale("rate feed timeout");
    let second = engine.create_plan(daily_plan()).unwrap();
    let err = engine
        .purchase("investor", second.id, PurchaseMethod::DirectWallet(Currency::Usdt))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "STALE_CONFIGURATION");
    assert!(err.is_retryable());
    assert_eq!(balance(engine, "investor", WalletType::Usdt).await, dec!(1000));

    // The period cannot complete without boost settings; it is retried next tick
    h.clock.set(t0() + Duration::days(1));
    let report = engine.run_tick().await;
    assert_eq!(report.roi.failed, 1);

    engine.settings().update_rate(dec!(84)).unwrap();
    let report = engine.run_tick().await;
    assert_eq!(report.roi.failed, 0);
    assert_eq!(balance(engine, "investor", WalletType::Roi).await, dec!(10));
    assert_eq!(balance(engine, "sponsor", WalletType::Usdt).await, dec!(1));

    let investments = engine.investments("investor").await;
    assert_eq!(investments.len(), 1);
    assert_eq!(investments[0].investment.roi_earned, dec!(10));
}
