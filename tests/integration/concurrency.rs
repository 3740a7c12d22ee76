use chrono::Duration;
use income_engine::PurchaseMethod;
use rust_decimal_macros::dec;
use tierfolio_core::{Currency, KycStatus, TransactionStatus, WalletKey, WalletType};
use wallet_ledger::HistoryFilter;

use crate::common::{balance, daily_plan, fund, harness, t0};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() {
    let h = harness();
    let engine = h.platform.engine.clone();
    engine.register_user("alice", None).unwrap();
    h.platform.kyc.set_status("alice", KycStatus::Approved);
    fund(&engine, "alice", WalletType::Usdt, dec!(100)).await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .cashier()
                    .request_withdrawal("alice", WalletType::Usdt, dec!(70))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => {
                assert_eq!(err.kind(), "INSUFFICIENT_FUNDS");
                insufficient += 1;
            }
        }
    }
    assert_eq!((succeeded, insufficient), (1, 1));

    let account = engine
        .ledger()
        .account(&WalletKey::new("alice", WalletType::Usdt))
        .await;
    assert_eq!(account.balance, dec!(30));
    assert_eq!(account.pending_balance, dec!(70));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_ticks_credit_each_period_once() {
    let h = harness();
    let engine = h.platform.engine.clone();
    engine.register_user("sponsor", None).unwrap();
    engine.register_user("investor", Some("sponsor")).unwrap();
    let plan = engine.create_plan(daily_plan()).unwrap();
    fund(&engine, "investor", WalletType::Usdt, dec!(1000)).await;
    let investment = engine
        .purchase("investor", plan.id, PurchaseMethod::DirectWallet(Currency::Usdt))
        .await
        .unwrap();

    h.clock.set(t0() + Duration::days(5));
    let ticks: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_tick().await })
        })
        .collect();
    let mut credited = 0;
    for tick in ticks {
        credited += tick.await.unwrap().roi.credited;
    }

    assert_eq!(credited, 5);
    assert_eq!(balance(&engine, "investor", WalletType::Roi).await, dec!(50));
    assert_eq!(balance(&engine, "sponsor", WalletType::Usdt).await, dec!(5));
    assert_eq!(balance(&engine, "sponsor", WalletType::Salary).await, dec!(50));

    let view = engine.investment("investor", investment.id).await.unwrap();
    assert_eq!(view.investment.roi_earned, dec!(50));
    assert_eq!(view.investment.periods_credited, 5);

    // Balance is exactly the sum of completed entries
    let roi_key = WalletKey::new("investor", WalletType::Roi);
    assert_eq!(engine.ledger().recompute(&roi_key).await, dec!(50));
    let entries = engine
        .history(
            &"investor".to_string(),
            &HistoryFilter {
                wallet_type: Some(WalletType::Roi),
                status: Some(TransactionStatus::Completed),
                ..HistoryFilter::default()
            },
        )
        .await;
    assert_eq!(entries.len(), 5);
}
