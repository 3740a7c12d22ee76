//! HTTP surface for the investor dashboard and the admin console.
//!
//! Investor routes live under `/api` and act on the user named by the `x-user-id`
//! header, which the identity gateway in front of this service sets. Admin routes
//! live under `/admin` and require `x-admin-token` when a token is configured.
//! The transfer watcher hook always requires `x-hook-token`.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use income_engine::{
    AuthKey, BoostRecord, BoostSummary, BreakdownQuote, BreakdownRequest, BreakdownSettlement,
    IncomeEngine, Investment, InvestmentPlan, InvestmentView, Member, PlanTerms, PurchaseMethod,
    ReferralEdge, SalaryPayout, SalaryProgress, TickReport, WalletOverview,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tierfolio_core::{
    Currency, EngineError, InvestmentId, KycStatus, PlanId, PlatformSettings, RequestId,
    SettingsSnapshot, Transaction, UserId, WalletAccount, WalletKey, WalletType,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use wallet_ledger::{
    ConversionReceipt, DepositRequest, HistoryFilter, TransferEvent, WithdrawalRequest,
};

use crate::core::Platform;

/// Header carrying the authenticated caller
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the admin token
pub const ADMIN_HEADER: &str = "x-admin-token";
/// Header carrying the transfer watcher token
pub const HOOK_HEADER: &str = "x-hook-token";

/// State shared across the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    platform: Platform,
    prometheus_handle: PrometheusHandle,
    admin_token: Option<Arc<str>>,
    hook_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(platform: Platform, prometheus_handle: PrometheusHandle, admin_token: Option<String>) -> Self {
        Self {
            platform,
            prometheus_handle,
            admin_token: admin_token.map(Arc::from),
            hook_token: None,
        }
    }

    /// Enables the transfer hook for callers presenting this token
    pub fn with_hook_token(mut self, hook_token: Option<String>) -> Self {
        self.hook_token = hook_token.map(Arc::from);
        self
    }

    fn engine(&self) -> &IncomeEngine {
        &self.platform.engine
    }
}

// Errors

/// Errors returned by HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Missing x-user-id header")]
    MissingIdentity,

    #[error("Access token missing or invalid")]
    Forbidden,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingIdentity => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Engine(err) => match err {
                EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
                EngineError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::WindowClosed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::DuplicateRequest(_) => StatusCode::CONFLICT,
                EngineError::StaleConfiguration(_) => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
                EngineError::WalletLocked(_) => StatusCode::LOCKED,
                EngineError::KycRequired(_) => StatusCode::FORBIDDEN,
                EngineError::InvalidAuthKey => StatusCode::BAD_REQUEST,
                EngineError::AlreadyProcessed { .. } => StatusCode::CONFLICT,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Engine(err) => err.kind(),
            ApiError::MissingIdentity => "UNAUTHENTICATED",
            ApiError::Forbidden => "FORBIDDEN",
        }
    }
}

/// Error body returned to the dashboard
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code
    pub code: String,
    pub message: String,
    /// Offending request field, for validation errors
    pub field: Option<String>,
    /// Whether the same request may succeed later
    pub retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let (field, retryable) = match &self {
            ApiError::Engine(EngineError::Validation { field, .. }) => (field.clone(), false),
            ApiError::Engine(err) => (None, err.is_retryable()),
            _ => (None, false),
        };
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
                field,
                retryable,
            },
        };

        debug!(
            "API Error Response: status={}, code={}, message={}",
            status_code, body.error.code, body.error.message
        );

        (status_code, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Caller identity taken from the gateway header
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| CurrentUser(value.to_string()))
            .ok_or(ApiError::MissingIdentity)
    }
}

async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.admin_token {
        let presented = request
            .headers()
            .get(ADMIN_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(expected.as_ref()) {
            return ApiError::Forbidden.into_response();
        }
    }
    next.run(request).await
}

/// Unlike admin routes, the hook stays closed when no token is configured
async fn require_hook_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(HOOK_HEADER)
        .and_then(|value| value.to_str().ok());
    match (&state.hook_token, presented) {
        (Some(expected), Some(presented)) if presented == expected.as_ref() => next.run(request).await,
        _ => {
            warn!("Rejected transfer hook call without a valid token");
            ApiError::Forbidden.into_response()
        }
    }
}

// Server

/// Public entry-point for the web server.
pub fn spawn(addr: SocketAddr, state: AppState, cors_origins: Vec<String>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = run_server(addr, state, cors_origins).await {
            error!("Failed to launch dashboard API server: {err:?}");
        }
    })
}

async fn run_server(addr: SocketAddr, state: AppState, cors_origins: Vec<String>) -> anyhow::Result<()> {
    let app = router(state).layer(cors_layer(&cors_origins));

    info!("Launching dashboard API server at {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(allow_origin)
        .allow_headers(Any)
}

/// Builds the full route table
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/wallets", get(wallets))
        .route("/transactions", get(transactions))
        .route("/plans", get(list_plans))
        .route("/investments", get(list_investments).post(purchase))
        .route("/investments/:id", get(investment_detail))
        .route(
            "/investments/:id/breakdown",
            get(breakdown_quote).post(request_breakdown).delete(cancel_breakdown),
        )
        .route("/boost", get(boost_summary))
        .route("/boost/history", get(boost_history))
        .route("/salary", get(salary_status))
        .route("/salary/history", get(salary_history))
        .route("/referrals", get(referrals))
        .route("/deposits", post(request_deposit))
        .route("/deposits/:id", get(deposit_detail))
        .route("/withdrawals", post(request_withdrawal))
        .route("/withdrawals/:id", get(withdrawal_detail))
        .route("/conversions", post(convert));

    let admin = Router::new()
        .route("/users", post(register_user))
        .route("/users/:user_id/kyc", put(set_kyc))
        .route("/plans", post(create_plan))
        .route("/plans/:id", put(update_plan))
        .route("/plans/:id/active", put(set_plan_active))
        .route("/plans/:id/auth-keys", post(issue_auth_key))
        .route("/investments/:id/approve", post(approve_investment))
        .route("/investments/:id/reject", post(reject_investment))
        .route("/investments/:id/breakdown/approve", post(approve_breakdown))
        .route("/investments/:id/breakdown", delete(decline_breakdown))
        .route("/deposits/:id/approve", post(approve_deposit))
        .route("/deposits/:id/reject", post(reject_deposit))
        .route("/withdrawals/:id/approve", post(approve_withdrawal))
        .route("/withdrawals/:id/reject", post(reject_withdrawal))
        .route("/wallets/:user_id/:wallet_type/lock", put(set_wallet_lock))
        .route("/settings", get(current_settings).put(publish_settings))
        .route("/settings/rate", put(update_rate))
        .route("/settings/stale", post(mark_settings_stale))
        .route("/salary/:user_id/evaluate", post(evaluate_salary))
        .route("/tick", post(run_tick))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let hooks = Router::new()
        .route("/transfers", post(transfer_event))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_hook_token));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .nest("/hooks", hooks)
        .nest("/api", api)
        .nest("/admin", admin)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.engine().settings();
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "settings_fresh": settings.current().is_ok(),
        "config_version": settings.latest().map(|s| s.version),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.prometheus_handle.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics,
    )
        .into_response()
}

// Investor routes

async fn wallets(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<WalletOverview> {
    Ok(Json(state.engine().wallets(&user).await?))
}

async fn transactions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<HistoryFilter>,
) -> Json<Vec<Transaction>> {
    Json(state.engine().history(&user, &filter).await)
}

async fn list_plans(State(state): State<AppState>) -> Json<Vec<InvestmentPlan>> {
    let plans = state.engine().catalog().list_active();
    Json(plans.iter().map(|plan| plan.as_ref().clone()).collect())
}

#[derive(Debug, Deserialize)]
struct PurchaseBody {
    plan_id: PlanId,
    method: PurchaseMethod,
}

async fn purchase(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<PurchaseBody>,
) -> Result<(StatusCode, Json<Investment>), ApiError> {
    let investment = state.engine().purchase(&user, body.plan_id, body.method).await?;
    Ok((StatusCode::CREATED, Json(investment)))
}

async fn list_investments(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Json<Vec<InvestmentView>> {
    Json(state.engine().investments(&user).await)
}

async fn investment_detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<InvestmentId>,
) -> ApiResult<InvestmentView> {
    Ok(Json(state.engine().investment(&user, id).await?))
}

async fn breakdown_quote(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<InvestmentId>,
) -> ApiResult<BreakdownQuote> {
    Ok(Json(state.engine().breakdown_quote(&user, id).await?))
}

#[derive(Debug, Deserialize)]
struct BreakdownBody {
    #[serde(default = "default_payout_wallet")]
    payout_wallet: WalletType,
}

fn default_payout_wallet() -> WalletType {
    WalletType::Breakdown
}

async fn request_breakdown(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<InvestmentId>,
    Json(body): Json<BreakdownBody>,
) -> ApiResult<BreakdownRequest> {
    Ok(Json(state.engine().request_breakdown(&user, id, body.payout_wallet).await?))
}

async fn cancel_breakdown(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<InvestmentId>,
) -> ApiResult<BreakdownRequest> {
    Ok(Json(state.engine().cancel_breakdown(&user, id).await?))
}

async fn boost_summary(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<BoostSummary> {
    Ok(Json(state.engine().boost_summary(&user)?))
}

async fn boost_history(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Json<Vec<BoostRecord>> {
    Json(state.engine().boost_history(&user))
}

async fn salary_status(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> ApiResult<SalaryProgress> {
    Ok(Json(state.engine().salary_status(&user).await?))
}

async fn salary_history(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Json<Vec<SalaryPayout>> {
    Json(state.engine().salary_history(&user).await)
}

async fn referrals(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Json<Vec<ReferralEdge>> {
    Json(state.engine().referrals(&user))
}

#[derive(Debug, Deserialize)]
struct DepositBody {
    currency: Currency,
    amount: Decimal,
    tx_hash: Option<String>,
}

async fn request_deposit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<DepositBody>,
) -> Result<(StatusCode, Json<DepositRequest>), ApiError> {
    let deposit = state
        .engine()
        .cashier()
        .request_deposit(&user, body.currency, body.amount, body.tx_hash)
        .await?;
    Ok((StatusCode::CREATED, Json(deposit)))
}

async fn deposit_detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<RequestId>,
) -> ApiResult<DepositRequest> {
    let deposit = state.engine().cashier().deposit(id).await?;
    if deposit.user_id != user {
        return Err(EngineError::not_found(format!("deposit {}", id)).into());
    }
    Ok(Json(deposit))
}

#[derive(Debug, Deserialize)]
struct WithdrawalBody {
    wallet_type: WalletType,
    amount: Decimal,
}

async fn request_withdrawal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<WithdrawalBody>,
) -> Result<(StatusCode, Json<WithdrawalRequest>), ApiError> {
    let withdrawal = state
        .engine()
        .cashier()
        .request_withdrawal(&user, body.wallet_type, body.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

async fn withdrawal_detail(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<RequestId>,
) -> ApiResult<WithdrawalRequest> {
    let withdrawal = state.engine().cashier().withdrawal(id).await?;
    if withdrawal.user_id != user {
        return Err(EngineError::not_found(format!("withdrawal {}", id)).into());
    }
    Ok(Json(withdrawal))
}

#[derive(Debug, Deserialize)]
struct ConversionBody {
    from: WalletType,
    to: WalletType,
    amount: Decimal,
}

async fn convert(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<ConversionBody>,
) -> ApiResult<ConversionReceipt> {
    let receipt = state
        .engine()
        .cashier()
        .convert(&user, body.from, body.to, body.amount)
        .await?;
    Ok(Json(receipt))
}

/// Confirmed-transfer notifications from the on-chain watcher
async fn transfer_event(
    State(state): State<AppState>,
    Json(event): Json<TransferEvent>,
) -> ApiResult<Option<DepositRequest>> {
    Ok(Json(state.engine().cashier().on_transfer_event(event).await?))
}

// Admin routes

#[derive(Debug, Deserialize)]
struct RegisterBody {
    user_id: UserId,
    referrer: Option<UserId>,
}

async fn register_user(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<Member>), ApiError> {
    let member = state
        .engine()
        .register_user(&body.user_id, body.referrer.as_deref())?;
    Ok((StatusCode::CREATED, Json(member)))
}

#[derive(Debug, Deserialize)]
struct KycBody {
    status: KycStatus,
}

async fn set_kyc(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(body): Json<KycBody>,
) -> StatusCode {
    state.platform.kyc.set_status(user_id, body.status);
    StatusCode::NO_CONTENT
}

async fn create_plan(
    State(state): State<AppState>,
    Json(terms): Json<PlanTerms>,
) -> Result<(StatusCode, Json<InvestmentPlan>), ApiError> {
    let plan = state.engine().create_plan(terms)?;
    Ok((StatusCode::CREATED, Json(plan.as_ref().clone())))
}

async fn update_plan(
    State(state): State<AppState>,
    Path(id): Path<PlanId>,
    Json(terms): Json<PlanTerms>,
) -> ApiResult<InvestmentPlan> {
    let plan = state.engine().update_plan(id, terms)?;
    Ok(Json(plan.as_ref().clone()))
}

#[derive(Debug, Deserialize)]
struct PlanActiveBody {
    is_active: bool,
}

async fn set_plan_active(
    State(state): State<AppState>,
    Path(id): Path<PlanId>,
    Json(body): Json<PlanActiveBody>,
) -> Result<StatusCode, ApiError> {
    state.engine().set_plan_active(id, body.is_active)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn issue_auth_key(State(state): State<AppState>, Path(id): Path<PlanId>) -> ApiResult<AuthKey> {
    Ok(Json(state.engine().issue_auth_key(id)?))
}

async fn approve_investment(State(state): State<AppState>, Path(id): Path<InvestmentId>) -> ApiResult<Investment> {
    Ok(Json(state.engine().approve_investment(id).await?))
}

async fn reject_investment(State(state): State<AppState>, Path(id): Path<InvestmentId>) -> ApiResult<Investment> {
    Ok(Json(state.engine().reject_investment(id).await?))
}

async fn approve_breakdown(
    State(state): State<AppState>,
    Path(id): Path<InvestmentId>,
) -> ApiResult<BreakdownSettlement> {
    Ok(Json(state.engine().approve_breakdown(id).await?))
}

async fn decline_breakdown(
    State(state): State<AppState>,
    Path(id): Path<InvestmentId>,
) -> ApiResult<BreakdownRequest> {
    Ok(Json(state.engine().decline_breakdown(id).await?))
}

async fn approve_deposit(State(state): State<AppState>, Path(id): Path<RequestId>) -> ApiResult<DepositRequest> {
    Ok(Json(state.engine().cashier().approve_deposit(id).await?))
}

async fn reject_deposit(State(state): State<AppState>, Path(id): Path<RequestId>) -> ApiResult<DepositRequest> {
    Ok(Json(state.engine().cashier().reject_deposit(id).await?))
}

async fn approve_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> ApiResult<WithdrawalRequest> {
    Ok(Json(state.engine().cashier().approve_withdrawal(id).await?))
}

async fn reject_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> ApiResult<WithdrawalRequest> {
    Ok(Json(state.engine().cashier().reject_withdrawal(id).await?))
}

#[derive(Debug, Deserialize)]
struct LockBody {
    locked: bool,
}

async fn set_wallet_lock(
    State(state): State<AppState>,
    Path((user_id, wallet_type)): Path<(UserId, WalletType)>,
    Json(body): Json<LockBody>,
) -> Json<WalletAccount> {
    let key = WalletKey::new(user_id, wallet_type);
    let ledger = state.engine().ledger();
    ledger.set_locked(&key, body.locked).await;
    Json(ledger.account(&key).await)
}

fn latest_snapshot(state: &AppState) -> Result<SettingsSnapshot, ApiError> {
    state
        .engine()
        .settings()
        .latest()
        .map(|snapshot| snapshot.as_ref().clone())
        .ok_or_else(|| EngineError::StaleConfiguration("no settings published".into()).into())
}

async fn current_settings(State(state): State<AppState>) -> ApiResult<SettingsSnapshot> {
    Ok(Json(latest_snapshot(&state)?))
}

async fn publish_settings(
    State(state): State<AppState>,
    Json(settings): Json<PlatformSettings>,
) -> ApiResult<SettingsSnapshot> {
    state.engine().settings().publish(settings)?;
    Ok(Json(latest_snapshot(&state)?))
}

#[derive(Debug, Deserialize)]
struct RateBody {
    currency_rate: Decimal,
}

async fn update_rate(State(state): State<AppState>, Json(body): Json<RateBody>) -> ApiResult<SettingsSnapshot> {
    state.engine().settings().update_rate(body.currency_rate)?;
    Ok(Json(latest_snapshot(&state)?))
}

#[derive(Debug, Deserialize)]
struct StaleBody {
    reason: String,
}

/// Rate feed failure report; money-moving paths fail closed until a new rate lands
async fn mark_settings_stale(State(state): State<AppState>, Json(body): Json<StaleBody>) -> StatusCode {
    state.engine().settings().mark_stale(body.reason);
    StatusCode::NO_CONTENT
}

async fn evaluate_salary(State(state): State<AppState>, Path(user_id): Path<UserId>) -> ApiResult<SalaryProgress> {
    Ok(Json(state.engine().evaluate_salary(&user_id).await?))
}

async fn run_tick(State(state): State<AppState>) -> Json<TickReport> {
    Json(state.engine().run_tick().await)
}
