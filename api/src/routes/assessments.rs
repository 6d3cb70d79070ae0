use std::collections::BTreeMap;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use haven_core::assessments::{AssessmentResponse, AssessmentResult};
use haven_core::coaching::Escalation;
use haven_core::incentives::{ActivityKind, default_earning_rules};
use haven_core::risk::RiskAssessment;
use haven_core::stages::Stage;
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
pub struct SubmitAssessmentRequest {
    pub user_id: Uuid,
    pub instrument: String,
    pub answers: BTreeMap<String, u8>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AssessmentOutcome {
    pub result: AssessmentResult,
    /// Total of the previous result for the same instrument.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_total: Option<u32>,
    /// The user's combined risk after this result.
    pub risk: RiskAssessment,
    /// Starting stage implied by a readiness ruler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/assessments", post(submit_assessment))
}

/// Score a completed instrument and fold it into the user's risk
#[utoipa::path(
    post,
    path = "/v1/assessments",
    request_body = SubmitAssessmentRequest,
    responses(
        (status = 200, description = "Scored result and updated risk", body = AssessmentOutcome),
        (status = 400, description = "Unknown item, missing answer or out-of-range value", body = haven_core::error::ApiError),
        (status = 404, description = "Unknown instrument", body = haven_core::error::ApiError),
        (status = 422, description = "Feature disabled for tenant", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "assessments"
)]
pub async fn submit_assessment(
    ctx: TenantContext,
    State(state): State<AppState>,
    AppJson(req): AppJson<SubmitAssessmentRequest>,
) -> Result<Json<AssessmentOutcome>, AppError> {
    require_scopes(&ctx, &["assessments:write"], "POST /v1/assessments")?;
    let now = Utc::now();

    let response = AssessmentResponse {
        instrument: req.instrument,
        answers: req.answers,
    };
    let result = state.instruments.score(&response, now)?;

    let suggested_stage = match (
        result.instrument.as_str(),
        response.answers.get("importance"),
        response.answers.get("confidence"),
    ) {
        ("readiness", Some(importance), Some(confidence)) => {
            Some(Stage::infer_from_readiness(*importance, *confidence)?)
        }
        _ => None,
    };

    let mut store = state.store.write().await;
    store.require_feature(&ctx.tenant_id, Feature::Assessments)?;
    let previous_total = store
        .assessments(&ctx.tenant_id, req.user_id)
        .iter()
        .rev()
        .find(|r| r.instrument == result.instrument)
        .map(|r| r.total);
    store.record_assessment(&ctx.tenant_id, req.user_id, result.clone());
    let risk = store.user_risk(&ctx.tenant_id, req.user_id);

    let escalation = if result.risk.requires_human() {
        let reason = if result.critical_flags.is_empty() {
            format!("{} scored {} ({})", result.instrument, result.total, result.band)
        } else {
            format!(
                "{} critical item(s): {}",
                result.instrument,
                result.critical_flags.join(", ")
            )
        };
        let escalation =
            Escalation::open(ctx.tenant_id.clone(), req.user_id, risk.level, reason, now);
        Some(store.open_escalation(escalation, now)?)
    } else {
        None
    };

    if store.tenant(&ctx.tenant_id)?.feature_enabled(Feature::Incentives) {
        store
            .ledger_mut(&ctx.tenant_id)
            .earn(req.user_id, ActivityKind::AssessmentCompleted, &default_earning_rules(), now)?;
    }

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        user_id = %req.user_id,
        instrument = %result.instrument,
        total = result.total,
        risk = risk.level.as_str(),
        escalated = escalation.is_some(),
        "assessment scored"
    );

    Ok(Json(AssessmentOutcome {
        result,
        previous_total,
        risk,
        suggested_stage,
        escalation,
    }))
}
