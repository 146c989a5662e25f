//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use rwa_protocol::{
    Account, Asset, Command, DepositEvent, ExtendedSymbol, PlanBook, PlanParams, Symbol, YieldComponent,
};
use serde::{Deserialize, Serialize};

use crate::custody::CustodyClient;
use crate::db;
use crate::errors::{LedgerError, Result};
use crate::events::EventRecord;
use crate::service::{LedgerService, StepOutcome};

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<LedgerService>,
    pub custody: CustodyClient,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/deposits", post(deposit))
        .route("/plans", post(create_plan))
        .route("/plans/:id", get(get_plan))
        .route("/plans/:id/refresh", post(refresh))
        .route("/plans/:id/cancel", post(cancel))
        .route("/plans/:id/refund", post(refund))
        .route("/plans/:id/guarantpay", post(guarantpay))
        .route("/plans/:id/redeem", post(redeem))
        .route("/plans/:id/buyback", post(buyback))
        .route("/plans/:id/unstake", post(unstake))
        .route("/plans/:id/claim", post(claim))
        .route("/plans/:id/batch-unstake", post(batch_unstake))
        .route("/plans/:id/slippage", post(set_slippage))
        .route("/plans/:id/coverage", post(set_coverage))
        .route("/plans/:id/yield/:year", get(yearly_yield))
        .route("/plans/:id/events", get(get_plan_events))
        .route("/events", get(get_all_events))
        .route("/admin/config", post(update_config))
        .with_state(state)
}

/// Clock reading for one request.
fn now() -> Result<u64> {
    u64::try_from(chrono::Utc::now().timestamp())
        .map_err(|_| LedgerError::Config("system clock is before the unix epoch".to_string()))
}

fn parse_asset(raw: &str) -> Result<Asset> {
    Ok(raw.parse::<Asset>()?)
}

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

/// Inbound transfer notification; `quantity` uses the `"10.0000 USDT"` form.
#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub from: Account,
    pub to: Account,
    pub contract: Account,
    pub quantity: String,
    pub memo: String,
}

impl DepositRequest {
    pub fn into_event(self) -> Result<DepositEvent> {
        Ok(DepositEvent {
            quantity: parse_asset(&self.quantity)?,
            from: self.from,
            to: self.to,
            contract: self.contract,
            memo: self.memo,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub creator: Account,
    pub title: String,
    pub goal_contract: Account,
    /// Goal with its precision, e.g. `"100000.0000 USDT"`.
    pub goal: String,
    pub receipt_contract: Account,
    pub receipt_symbol: String,
    pub receipt_precision: u8,
    pub receipt_per_unit: i64,
    pub soft_cap_pct: u8,
    pub hard_cap_pct: u8,
    pub start_time: u64,
    pub end_time: u64,
    pub return_periods: u32,
    pub guaranteed_apr_bp: i64,
}

impl CreatePlanRequest {
    pub fn into_params(self) -> Result<PlanParams> {
        let goal = parse_asset(&self.goal)?;
        let receipt = Symbol::new(&self.receipt_symbol, self.receipt_precision)?;
        Ok(PlanParams {
            creator: self.creator,
            title: self.title,
            goal_asset: ExtendedSymbol::new(self.goal_contract, goal.symbol.clone()),
            goal_amount: goal.amount,
            receipt_asset: ExtendedSymbol::new(self.receipt_contract, receipt),
            receipt_per_unit: self.receipt_per_unit,
            soft_cap_pct: self.soft_cap_pct,
            hard_cap_pct: self.hard_cap_pct,
            start_time: self.start_time,
            end_time: self.end_time,
            return_periods: self.return_periods,
            guaranteed_apr_bp: self.guaranteed_apr_bp,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub creator: Account,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub investor: Account,
    pub receipts: String,
}

#[derive(Debug, Deserialize)]
pub struct GuarantPayRequest {
    pub submitter: Account,
    pub periods: u32,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub guarantor: Account,
    pub quantity: String,
}

#[derive(Debug, Deserialize)]
pub struct BuybackRequest {
    pub submitter: Account,
}

#[derive(Debug, Deserialize)]
pub struct UnstakeRequest {
    pub owner: Account,
    pub quantity: String,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub owner: Account,
}

#[derive(Debug, Deserialize)]
pub struct BasisPointsRequest {
    pub caller: Account,
    pub bp: i64,
}

#[derive(Debug, Deserialize)]
pub struct ConfigRequest {
    pub caller: Account,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct YieldQuery {
    pub component: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct DepositResponse {
    pub applied: bool,
    pub outcome: Option<StepOutcome>,
}

#[derive(Serialize)]
pub struct CreatePlanResponse {
    pub plan_id: u64,
}

#[derive(Debug, Serialize)]
pub struct YieldResponse {
    pub plan_id: u64,
    pub year: u32,
    pub component: String,
    pub quantity: String,
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub plan_id: u64,
    pub count: usize,
    pub events: Vec<EventRecord>,
}

#[derive(Serialize)]
pub struct AllEventsResponse {
    pub count: usize,
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub key: String,
    pub value: String,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /deposits`
///
/// Custody notification of an incoming transfer. Transfers that are not for
/// the core account answer `applied: false`.
pub async fn deposit(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<DepositResponse>> {
    let event = req.into_event()?;
    let outcome = state.service.on_deposit(now()?, &event).await?;
    Ok(Json(DepositResponse {
        applied: outcome.is_some(),
        outcome,
    }))
}

/// `POST /plans`
pub async fn create_plan(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreatePlanRequest>,
) -> Result<Json<CreatePlanResponse>> {
    let params = req.into_params()?;
    let plan_id = state.service.create_plan(now()?, params).await?;
    Ok(Json(CreatePlanResponse { plan_id }))
}

/// `GET /plans/:id`
pub async fn get_plan(State(state): State<Arc<ApiState>>, Path(id): Path<u64>) -> Result<Json<PlanBook>> {
    Ok(Json(state.service.book(id).await?))
}

async fn run(state: &ApiState, id: u64, cmd: Command) -> Result<Json<StepOutcome>> {
    Ok(Json(state.service.execute(now()?, id, cmd).await?))
}

/// `POST /plans/:id/refresh`
pub async fn refresh(State(state): State<Arc<ApiState>>, Path(id): Path<u64>) -> Result<Json<StepOutcome>> {
    run(&state, id, Command::RefreshStatus).await
}

/// `POST /plans/:id/cancel`
pub async fn cancel(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<StepOutcome>> {
    run(&state, id, Command::Cancel { creator: req.creator }).await
}

/// `POST /plans/:id/refund`
pub async fn refund(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<StepOutcome>> {
    let receipts = parse_asset(&req.receipts)?;
    run(
        &state,
        id,
        Command::Refund {
            investor: req.investor,
            receipts,
        },
    )
    .await
}

/// `POST /plans/:id/guarantpay`
pub async fn guarantpay(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<GuarantPayRequest>,
) -> Result<Json<StepOutcome>> {
    run(
        &state,
        id,
        Command::GuarantPay {
            submitter: req.submitter,
            periods: req.periods,
        },
    )
    .await
}

/// `POST /plans/:id/redeem`
pub async fn redeem(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<StepOutcome>> {
    let quantity = parse_asset(&req.quantity)?;
    run(
        &state,
        id,
        Command::Redeem {
            guarantor: req.guarantor,
            quantity,
        },
    )
    .await
}

/// `POST /plans/:id/buyback`
///
/// Fetches the pool quote first; the step itself never performs I/O.
pub async fn buyback(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<BuybackRequest>,
) -> Result<Json<StepOutcome>> {
    let pair = state.service.trading_pair(id).await?;
    let quote = state.custody.quote(&pair).await?;
    run(
        &state,
        id,
        Command::Buyback {
            submitter: req.submitter,
            quote,
        },
    )
    .await
}

/// `POST /plans/:id/unstake`
pub async fn unstake(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<UnstakeRequest>,
) -> Result<Json<StepOutcome>> {
    let quantity = parse_asset(&req.quantity)?;
    run(
        &state,
        id,
        Command::Unstake {
            owner: req.owner,
            quantity,
        },
    )
    .await
}

/// `POST /plans/:id/claim`
pub async fn claim(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<StepOutcome>> {
    run(&state, id, Command::Claim { owner: req.owner }).await
}

/// `POST /plans/:id/batch-unstake`
pub async fn batch_unstake(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> Result<Json<StepOutcome>> {
    run(&state, id, Command::BatchUnstake).await
}

/// `POST /plans/:id/slippage`
pub async fn set_slippage(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<BasisPointsRequest>,
) -> Result<Json<StepOutcome>> {
    run(
        &state,
        id,
        Command::SetSlippage {
            caller: req.caller,
            bp: req.bp,
        },
    )
    .await
}

/// `POST /plans/:id/coverage`
pub async fn set_coverage(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
    Json(req): Json<BasisPointsRequest>,
) -> Result<Json<StepOutcome>> {
    run(
        &state,
        id,
        Command::SetCoverageRatio {
            caller: req.caller,
            bp: req.bp,
        },
    )
    .await
}

/// `GET /plans/:id/yield/:year?component=`
///
/// `component` is one of `total` (default), `investor`, `guarantor`, `buyback`.
pub async fn yearly_yield(
    State(state): State<Arc<ApiState>>,
    Path((id, year)): Path<(u64, u32)>,
    Query(query): Query<YieldQuery>,
) -> Result<Json<YieldResponse>> {
    let component = query.component.unwrap_or_else(|| "total".to_string());
    let parsed: YieldComponent = component.parse()?;
    let quantity = state.service.yearly_yield(id, year, parsed).await?;
    Ok(Json(YieldResponse {
        plan_id: id,
        year,
        component,
        quantity: quantity.to_string(),
    }))
}

/// `GET /plans/:id/events`
pub async fn get_plan_events(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<u64>,
) -> Result<Json<EventsResponse>> {
    let events = db::get_events_for_plan(state.service.pool(), id).await?;
    Ok(Json(EventsResponse {
        plan_id: id,
        count: events.len(),
        events,
    }))
}

/// `GET /events`
pub async fn get_all_events(State(state): State<Arc<ApiState>>) -> Result<Json<AllEventsResponse>> {
    let events = db::get_all_events(state.service.pool()).await?;
    Ok(Json(AllEventsResponse {
        count: events.len(),
        events,
    }))
}

/// `POST /admin/config`
pub async fn update_config(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ConfigRequest>,
) -> Result<Json<ConfigResponse>> {
    state
        .service
        .update_config(now()?, &req.caller, &req.key, &req.value)
        .await?;
    Ok(Json(ConfigResponse {
        key: req.key,
        value: req.value,
    }))
}
