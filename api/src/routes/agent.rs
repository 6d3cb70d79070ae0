use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use haven_core::agents::{AgentRequest, AgentTurn, Orchestrator};
use haven_core::stages::Stage;
use haven_core::tenants::Feature;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::require_scopes;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::store::TenantContext;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AgentMessageRequest {
    pub user_id: Uuid,
    pub text: String,
    /// Overrides the stored stage for this turn.
    #[serde(default)]
    pub stage: Option<Stage>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/agent/messages", post(send_message))
}

/// Handle one user message: safety, routing, reply, outbound safety
#[utoipa::path(
    post,
    path = "/v1/agent/messages",
    request_body = AgentMessageRequest,
    responses(
        (status = 200, description = "Agent turn with both safety verdicts", body = AgentTurn),
        (status = 400, description = "Empty message", body = haven_core::error::ApiError),
        (status = 422, description = "Feature disabled or daily turn limit reached", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "agent"
)]
pub async fn send_message(
    ctx: TenantContext,
    State(state): State<AppState>,
    AppJson(req): AppJson<AgentMessageRequest>,
) -> Result<Json<AgentTurn>, AppError> {
    require_scopes(&ctx, &["agent:write"], "POST /v1/agent/messages")?;
    let now = Utc::now();

    let mut store = state.store.write().await;
    store.require_feature(&ctx.tenant_id, Feature::AgentChat)?;
    store.count_agent_turn(&ctx.tenant_id, now.date_naive())?;

    let stage = req
        .stage
        .or_else(|| store.current_stage(&ctx.tenant_id, req.user_id))
        .unwrap_or(Stage::Precontemplation);
    let request = AgentRequest {
        tenant_id: ctx.tenant_id.clone(),
        user_id: req.user_id,
        text: req.text,
        stage,
        signals: store.risk_signals(&ctx.tenant_id, req.user_id),
    };

    let mut turn = Orchestrator {
        safety: &state.safety,
        routing: &state.routing,
        knowledge: store.knowledge(),
        catalog: &state.catalog,
    }
    .handle(&request, &state.responders, state.classifier(), now)?;

    // A calmer message replaces the previous safety-filter reading.
    store.record_signal(&ctx.tenant_id, req.user_id, turn.inbound.to_risk_signal());
    if let Some(escalation) = turn.escalation.take() {
        turn.escalation = Some(store.open_escalation(escalation, now)?);
    }

    Ok(Json(turn))
}
