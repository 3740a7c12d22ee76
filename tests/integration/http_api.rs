use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Duration;
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::str::FromStr;
use tierfolio::web::{router, AppState, ADMIN_HEADER, HOOK_HEADER, USER_HEADER};
use tierfolio_core::WalletType;
use tower::ServiceExt;

use crate::common::{fund, harness, t0, Harness};

fn app(h: &Harness, admin_token: Option<&str>) -> Router {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    router(AppState::new(
        h.platform.clone(),
        handle,
        admin_token.map(str::to_string),
    ))
}

fn app_with_hook(h: &Harness, hook_token: Option<&str>) -> Router {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    router(
        AppState::new(h.platform.clone(), handle, Some("s3cret".to_string()))
            .with_hook_token(hook_token.map(str::to_string)),
    )
}

async fn post_hook(app: &Router, token: Option<&str>, event: Value) -> StatusCode {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/hooks/transfers")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header(HOOK_HEADER, token);
    }
    let request = builder.body(Body::from(event.to_string())).unwrap();
    app.clone().oneshot(request).await.unwrap().status()
}

async fn send(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}

fn plan_body() -> Value {
    json!({
        "name": "Daily 30",
        "amount": "1000",
        "roi_amount": "10",
        "duration_times": 30,
        "frequency": { "kind": "DAILY" },
        "boost_percent": "10",
        "refund_timeline_days": null
    })
}

#[tokio::test]
async fn test_health_and_metrics() {
    let h = harness();
    let app = app(&h, None);

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["settings_fresh"], true);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_user_routes_require_identity() {
    let h = harness();
    let app = app(&h, None);

    let (status, body) = send(&app, "GET", "/api/wallets", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_admin_routes_check_token() {
    let h = harness();
    let app = app(&h, Some("s3cret"));
    let register = json!({ "user_id": "root", "referrer": null });

    let (status, _) = send(&app, "POST", "/admin/users", None, Some(register.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::builder()
        .method("POST")
        .uri("/admin/users")
        .header(ADMIN_HEADER, "s3cret")
        .header("content-type", "application/json")
        .body(Body::from(register.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(h.engine().graph().member("root").is_some());
}

#[tokio::test]
async fn test_purchase_and_quote_over_http() {
    let h = harness();
    let app = app(&h, None);

    send(&app, "POST", "/admin/users", None, Some(json!({ "user_id": "sponsor" }))).await;
    let (status, _) = send(
        &app,
        "POST",
        "/admin/users",
        None,
        Some(json!({ "user_id": "investor", "referrer": "sponsor" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, plan) = send(&app, "POST", "/admin/plans", None, Some(plan_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    let plan_id = plan["id"].as_str().unwrap().to_string();

    let purchase = json!({
        "plan_id": plan_id,
        "method": { "method": "DIRECT_WALLET", "value": "USDT" }
    });
    let (status, body) = send(&app, "POST", "/api/investments", Some("investor"), Some(purchase.clone())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_FUNDS");
    assert_eq!(body["error"]["retryable"], false);

    fund(h.engine(), "investor", WalletType::Usdt, dec!(1000)).await;
    let (status, investment) = send(&app, "POST", "/api/investments", Some("investor"), Some(purchase)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(investment["status"], "ACTIVE");
    let investment_id = investment["id"].as_str().unwrap().to_string();

    h.clock.set(t0() + Duration::days(1));
    let (status, report) = send(&app, "POST", "/admin/tick", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["roi"]["credited"], 1);

    let (status, wallets) = send(&app, "GET", "/api/wallets", Some("investor"), None).await;
    assert_eq!(status, StatusCode::OK);
    let roi = wallets["wallets"]
        .as_array()
        .unwrap()
        .iter()
        .find(|w| w["wallet_type"] == "ROI")
        .unwrap();
    assert_eq!(decimal(&roi["balance"]), dec!(10));
    // 10 USDT at 83 INR
    assert_eq!(decimal(&wallets["total_inr"]), dec!(830));

    let uri = format!("/api/investments/{}/breakdown", investment_id);
    let (status, quote) = send(&app, "GET", &uri, Some("investor"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&quote["breakdown_amount"]), dec!(795));

    // Another user cannot see the investment
    let (status, _) = send(&app, "GET", &uri, Some("sponsor"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, boost) = send(&app, "GET", "/api/boost", Some("sponsor"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&boost["total_earned"]), dec!(1));
}

#[tokio::test]
async fn test_validation_errors_name_the_field() {
    let h = harness();
    let app = app(&h, None);

    let (status, body) = send(
        &app,
        "POST",
        "/api/withdrawals",
        Some("alice"),
        Some(json!({ "wallet_type": "ROI", "amount": "25" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["field"], "wallet_type");
}

#[tokio::test]
async fn test_transfer_hook_requires_watcher_token() {
    let h = harness();
    let app = app_with_hook(&h, Some("watcher-token"));

    let (status, deposit) = send(
        &app,
        "POST",
        "/api/deposits",
        Some("mallory"),
        Some(json!({ "currency": "USDT", "amount": "400", "tx_hash": "0xnotreal" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let deposit_uri = format!("/api/deposits/{}", deposit["id"].as_str().unwrap());

    let event = json!({
        "tx_hash": "0xnotreal",
        "amount": "400",
        "network": "TRC20",
        "confirmed": true
    });
    assert_eq!(post_hook(&app, None, event.clone()).await, StatusCode::FORBIDDEN);
    assert_eq!(post_hook(&app, Some("s3cret"), event.clone()).await, StatusCode::FORBIDDEN);

    let (_, deposit) = send(&app, "GET", &deposit_uri, Some("mallory"), None).await;
    assert_eq!(deposit["status"], "AWAITING_TRANSFER");
    assert_eq!(balance_of(&h, "mallory").await, dec!(0));

    assert_eq!(post_hook(&app, Some("watcher-token"), event).await, StatusCode::OK);
    let (_, deposit) = send(&app, "GET", &deposit_uri, Some("mallory"), None).await;
    assert_eq!(deposit["status"], "CREDITED");
    assert_eq!(balance_of(&h, "mallory").await, dec!(400));
}

#[tokio::test]
async fn test_transfer_hook_closed_without_configured_token() {
    let h = harness();
    let app = app_with_hook(&h, None);

    let event = json!({ "tx_hash": "0xabc", "amount": "10", "network": "TRC20", "confirmed": true });
    assert_eq!(post_hook(&app, Some(""), event.clone()).await, StatusCode::FORBIDDEN);
    assert_eq!(post_hook(&app, None, event).await, StatusCode::FORBIDDEN);
}

async fn balance_of(h: &Harness, user: &str) -> Decimal {
    crate::common::balance(h.engine(), user, WalletType::Usdt).await
}
