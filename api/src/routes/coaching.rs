use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use haven_core::coaching::{
    CoachLevel, CoachProfile, Escalation, PromotionCheck, ReviewTransition,
    default_promotion_rules, evaluate_promotion,
};
use haven_core::tenants::Feature;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::require_scopes;
use crate::error::AppError;
use crate::extract::{AppJson, AppQuery};
use crate::state::AppState;
use crate::store::TenantContext;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterCoachRequest {
    pub display_name: String,
    pub level: CoachLevel,
    pub max_caseload: u32,
    /// Defaults to now.
    #[serde(default)]
    pub active_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sessions_completed: u32,
    #[serde(default)]
    pub avg_rating: f64,
    #[serde(default)]
    pub cases_closed: u32,
    #[serde(default)]
    pub training_hours: u32,
    #[serde(default)]
    pub supervision_hours: u32,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct PromotionQuery {
    /// Apply the promotion when eligible.
    #[serde(default)]
    pub apply: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PromotionResponse {
    pub check: PromotionCheck,
    pub level: CoachLevel,
    pub promoted: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EscalationView {
    #[serde(flatten)]
    pub escalation: Escalation,
    pub overdue: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/coaches", post(register_coach))
        .route("/v1/coaches/{coach_id}/promotion", post(promotion))
        .route("/v1/escalations", get(list_escalations))
        .route("/v1/escalations/{escalation_id}/transition", post(transition_escalation))
}

/// Register a coach with the tenant
#[utoipa::path(
    post,
    path = "/v1/coaches",
    request_body = RegisterCoachRequest,
    responses(
        (status = 200, description = "Registered coach", body = CoachProfile),
        (status = 400, description = "Invalid profile", body = haven_core::error::ApiError),
        (status = 422, description = "Feature disabled or member limit reached", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "coaching"
)]
pub async fn register_coach(
    ctx: TenantContext,
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterCoachRequest>,
) -> Result<Json<CoachProfile>, AppError> {
    require_scopes(&ctx, &["coaches:write"], "POST /v1/coaches")?;
    if req.display_name.trim().is_empty() {
        return Err(AppError::Validation {
            message: "display_name must not be empty".to_string(),
            field: Some("display_name".to_string()),
            received: None,
            docs_hint: None,
        });
    }
    if !(0.0..=5.0).contains(&req.avg_rating) {
        return Err(AppError::Validation {
            message: "avg_rating must be within 0..=5".to_string(),
            field: Some("avg_rating".to_string()),
            received: Some(serde_json::json!(req.avg_rating)),
            docs_hint: None,
        });
    }

    let mut profile = CoachProfile::new(
        ctx.tenant_id.clone(),
        req.display_name.trim(),
        req.level,
        req.max_caseload,
        req.active_since.unwrap_or_else(Utc::now),
    );
    profile.sessions_completed = req.sessions_completed;
    profile.avg_rating = req.avg_rating;
    profile.cases_closed = req.cases_closed;
    profile.training_hours = req.training_hours;
    profile.supervision_hours = req.supervision_hours;

    let mut store = state.store.write().await;
    store.require_feature(&ctx.tenant_id, Feature::CoachWorkflow)?;
    store.add_coach(profile.clone())?;
    Ok(Json(profile))
}

/// Evaluate a coach against the promotion ladder
#[utoipa::path(
    post,
    path = "/v1/coaches/{coach_id}/promotion",
    params(("coach_id" = Uuid, Path, description = "Coach ID"), PromotionQuery),
    responses(
        (status = 200, description = "Promotion check, applied when requested and eligible", body = PromotionResponse),
        (status = 404, description = "Unknown coach", body = haven_core::error::ApiError),
        (status = 422, description = "Requirements unmet or feature disabled", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "coaching"
)]
pub async fn promotion(
    ctx: TenantContext,
    State(state): State<AppState>,
    Path(coach_id): Path<Uuid>,
    AppQuery(query): AppQuery<PromotionQuery>,
) -> Result<Json<PromotionResponse>, AppError> {
    require_scopes(&ctx, &["coaches:write"], "POST /v1/coaches/{coach_id}/promotion")?;
    let now = Utc::now();
    let rules = default_promotion_rules();

    let mut store = state.store.write().await;
    store.require_feature(&ctx.tenant_id, Feature::CoachWorkflow)?;
    let check = evaluate_promotion(store.coach_mut(&ctx.tenant_id, coach_id)?, &rules, now);
    if query.apply && check.target == Some(CoachLevel::Expert) {
        store.require_feature(&ctx.tenant_id, Feature::ExpertReview)?;
    }

    let coach = store.coach_mut(&ctx.tenant_id, coach_id)?;
    let promoted = if query.apply {
        coach.promote(&rules, now)?;
        true
    } else {
        false
    };

    Ok(Json(PromotionResponse {
        check,
        level: coach.level,
        promoted,
    }))
}

/// Unresolved escalations, most urgent first
#[utoipa::path(
    get,
    path = "/v1/escalations",
    responses(
        (status = 200, description = "Open escalations", body = Vec<EscalationView>),
    ),
    security(("bearer_auth" = [])),
    tag = "coaching"
)]
pub async fn list_escalations(
    ctx: TenantContext,
    State(state): State<AppState>,
) -> Result<Json<Vec<EscalationView>>, AppError> {
    require_scopes(&ctx, &["escalations:read"], "GET /v1/escalations")?;
    let now = Utc::now();
    let store = state.store.read().await;
    store.require_feature(&ctx.tenant_id, Feature::CoachWorkflow)?;
    let views = store
        .open_escalations(&ctx.tenant_id)
        .into_iter()
        .map(|escalation| EscalationView {
            overdue: escalation.is_overdue(now),
            escalation,
        })
        .collect();
    Ok(Json(views))
}

/// Move an escalation through the review state machine
#[utoipa::path(
    post,
    path = "/v1/escalations/{escalation_id}/transition",
    params(("escalation_id" = Uuid, Path, description = "Escalation ID")),
    request_body = ReviewTransition,
    responses(
        (status = 200, description = "Escalation after the move", body = Escalation),
        (status = 404, description = "Unknown escalation or coach", body = haven_core::error::ApiError),
        (status = 409, description = "Move not allowed from the current status", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "coaching"
)]
pub async fn transition_escalation(
    ctx: TenantContext,
    State(state): State<AppState>,
    Path(escalation_id): Path<Uuid>,
    AppJson(transition): AppJson<ReviewTransition>,
) -> Result<Json<Escalation>, AppError> {
    require_scopes(
        &ctx,
        &["escalations:write"],
        "POST /v1/escalations/{escalation_id}/transition",
    )?;
    let mut store = state.store.write().await;
    store.require_feature(&ctx.tenant_id, Feature::CoachWorkflow)?;
    let escalation =
        store.transition_escalation(&ctx.tenant_id, escalation_id, transition, Utc::now())?;
    tracing::info!(
        tenant_id = %ctx.tenant_id,
        escalation_id = %escalation_id,
        status = ?escalation.status,
        "escalation moved"
    );
    Ok(Json(escalation))
}
