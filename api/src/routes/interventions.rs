use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use haven_core::interventions::{InterventionPack, MatchCriteria, PackMatch};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::require_scopes;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::store::TenantContext;

#[derive(Debug, Serialize, ToSchema)]
pub struct MatchResponse {
    pub matches: Vec<PackMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best: Option<InterventionPack>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/interventions/match", post(match_packs))
}

/// Rank intervention packs for a stage and risk level
#[utoipa::path(
    post,
    path = "/v1/interventions/match",
    request_body = MatchCriteria,
    responses(
        (status = 200, description = "Eligible packs, best first", body = MatchResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "interventions"
)]
pub async fn match_packs(
    ctx: TenantContext,
    State(state): State<AppState>,
    AppJson(criteria): AppJson<MatchCriteria>,
) -> Result<Json<MatchResponse>, AppError> {
    require_scopes(&ctx, &["interventions:read"], "POST /v1/interventions/match")?;
    let matches = state.catalog.match_packs(&criteria);
    let best = matches
        .first()
        .and_then(|m| state.catalog.get(&m.pack_id))
        .cloned();
    Ok(Json(MatchResponse { matches, best }))
}
