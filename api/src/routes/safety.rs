use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use haven_core::safety::{Direction, SafetyVerdict};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::require_scopes;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::store::TenantContext;

/// Longest text the safety endpoint accepts, in characters.
const MAX_TEXT_CHARS: usize = 8_000;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SafetyCheckRequest {
    pub text: String,
    #[serde(default)]
    pub direction: Direction,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/safety/check", post(check))
}

/// Run text through the layered safety pipeline
#[utoipa::path(
    post,
    path = "/v1/safety/check",
    request_body = SafetyCheckRequest,
    responses(
        (status = 200, description = "Safety verdict", body = SafetyVerdict),
        (status = 400, description = "Invalid request", body = haven_core::error::ApiError),
        (status = 401, description = "Missing or invalid API key", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "safety"
)]
pub async fn check(
    ctx: TenantContext,
    State(state): State<AppState>,
    AppJson(req): AppJson<SafetyCheckRequest>,
) -> Result<Json<SafetyVerdict>, AppError> {
    require_scopes(&ctx, &["safety:check"], "POST /v1/safety/check")?;
    if req.text.chars().count() > MAX_TEXT_CHARS {
        return Err(AppError::Validation {
            message: format!("text exceeds {MAX_TEXT_CHARS} characters"),
            field: Some("text".to_string()),
            received: None,
            docs_hint: None,
        });
    }

    let verdict = state
        .safety
        .evaluate(&req.text, req.direction, state.classifier());

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        direction = ?req.direction,
        action = ?verdict.action,
        risk = verdict.risk.as_str(),
        "safety check"
    );
    Ok(Json(verdict))
}
