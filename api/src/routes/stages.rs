use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use haven_core::stages::{Stage, StageRecord};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::require_scopes;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::store::TenantContext;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetStageRequest {
    pub stage: Stage,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StageResponse {
    pub record: StageRecord,
    pub days_in_stage: i64,
    pub eligible_for_maintenance: bool,
    pub relapse_count: usize,
}

impl StageResponse {
    fn from_record(record: StageRecord) -> Self {
        let now = Utc::now();
        Self {
            days_in_stage: record.days_in_stage(now),
            eligible_for_maintenance: record.eligible_for_maintenance(now),
            relapse_count: record.relapse_count(),
            record,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/users/{user_id}/stage", get(get_stage).post(set_stage))
}

/// Read a user's stage record
#[utoipa::path(
    get,
    path = "/v1/users/{user_id}/stage",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Current stage and history", body = StageResponse),
        (status = 404, description = "No stage recorded for this user", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "stages"
)]
pub async fn get_stage(
    ctx: TenantContext,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<StageResponse>, AppError> {
    require_scopes(&ctx, &["stages:read"], "GET /v1/users/{user_id}/stage")?;
    let store = state.store.read().await;
    let record = store.stage(&ctx.tenant_id, user_id)?.clone();
    Ok(Json(StageResponse::from_record(record)))
}

/// Create a stage record or move it to a new stage
#[utoipa::path(
    post,
    path = "/v1/users/{user_id}/stage",
    params(("user_id" = Uuid, Path, description = "User ID")),
    request_body = SetStageRequest,
    responses(
        (status = 200, description = "Updated stage record", body = StageResponse),
        (status = 400, description = "Skipped stage or backdated transition", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "stages"
)]
pub async fn set_stage(
    ctx: TenantContext,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    AppJson(req): AppJson<SetStageRequest>,
) -> Result<Json<StageResponse>, AppError> {
    require_scopes(&ctx, &["stages:write"], "POST /v1/users/{user_id}/stage")?;
    let record = state
        .store
        .write()
        .await
        .set_stage(&ctx.tenant_id, user_id, req.stage, req.reason, Utc::now())?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        user_id = %user_id,
        stage = record.current.as_str(),
        "stage recorded"
    );
    Ok(Json(StageResponse::from_record(record)))
}
