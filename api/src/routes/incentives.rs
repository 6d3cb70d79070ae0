use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use haven_core::incentives::{
    ActivityKind, EarnOutcome, LedgerEntry, default_badges, default_earning_rules, evaluate_badges,
};
use haven_core::tenants::Feature;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::require_scopes;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::store::TenantContext;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActivityRequest {
    pub activity: ActivityKind,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ActivityResponse {
    /// False when the daily cap for the activity was already reached.
    pub recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<EarnOutcome>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RedeemRequest {
    pub cost: i64,
    pub reward: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RedeemResponse {
    pub entry: LedgerEntry,
    pub balance: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IncentiveSummary {
    pub user_id: Uuid,
    pub balance: i64,
    pub streak: u32,
    pub badges: Vec<String>,
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/incentives/{user_id}/activities", post(record_activity))
        .route("/v1/incentives/{user_id}/redeem", post(redeem))
}

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/incentives/{user_id}", get(summary))
}

/// Record an activity and award points
#[utoipa::path(
    post,
    path = "/v1/incentives/{user_id}/activities",
    params(("user_id" = Uuid, Path, description = "User ID")),
    request_body = ActivityRequest,
    responses(
        (status = 200, description = "Entries written, or recorded=false at the daily cap", body = ActivityResponse),
        (status = 422, description = "Feature disabled for tenant", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "incentives"
)]
pub async fn record_activity(
    ctx: TenantContext,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    AppJson(req): AppJson<ActivityRequest>,
) -> Result<Json<ActivityResponse>, AppError> {
    require_scopes(&ctx, &["incentives:write"], "POST /v1/incentives/{user_id}/activities")?;
    let mut store = state.store.write().await;
    store.require_feature(&ctx.tenant_id, Feature::Incentives)?;
    let outcome = store
        .ledger_mut(&ctx.tenant_id)
        .earn(user_id, req.activity, &default_earning_rules(), Utc::now())?;
    Ok(Json(ActivityResponse {
        recorded: outcome.is_some(),
        outcome,
    }))
}

/// Spend points on a reward
#[utoipa::path(
    post,
    path = "/v1/incentives/{user_id}/redeem",
    params(("user_id" = Uuid, Path, description = "User ID")),
    request_body = RedeemRequest,
    responses(
        (status = 200, description = "Redemption entry and new balance", body = RedeemResponse),
        (status = 400, description = "Non-positive cost", body = haven_core::error::ApiError),
        (status = 409, description = "Insufficient points", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "incentives"
)]
pub async fn redeem(
    ctx: TenantContext,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    AppJson(req): AppJson<RedeemRequest>,
) -> Result<Json<RedeemResponse>, AppError> {
    require_scopes(&ctx, &["incentives:write"], "POST /v1/incentives/{user_id}/redeem")?;
    let mut store = state.store.write().await;
    store.require_feature(&ctx.tenant_id, Feature::Incentives)?;
    let ledger = store.ledger_mut(&ctx.tenant_id);
    let entry = ledger.redeem(user_id, req.cost, &req.reward, Utc::now())?;
    Ok(Json(RedeemResponse {
        balance: ledger.balance(user_id),
        entry,
    }))
}

/// Balance, current streak and earned badges
#[utoipa::path(
    get,
    path = "/v1/incentives/{user_id}",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Incentive summary", body = IncentiveSummary),
    ),
    security(("bearer_auth" = [])),
    tag = "incentives"
)]
pub async fn summary(
    ctx: TenantContext,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<IncentiveSummary>, AppError> {
    require_scopes(&ctx, &["incentives:read"], "GET /v1/incentives/{user_id}")?;
    let store = state.store.read().await;
    store.require_feature(&ctx.tenant_id, Feature::Incentives)?;
    let today = Utc::now().date_naive();
    let summary = match store.ledger(&ctx.tenant_id) {
        Some(ledger) => IncentiveSummary {
            user_id,
            balance: ledger.balance(user_id),
            streak: ledger.streak(user_id, today),
            badges: evaluate_badges(ledger, user_id, &default_badges(), today),
        },
        None => IncentiveSummary {
            user_id,
            balance: 0,
            streak: 0,
            badges: Vec::new(),
        },
    };
    Ok(Json(summary))
}
