use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use haven_core::knowledge::{KnowledgeDocument, LifecycleAction, SearchHit};
use haven_core::stages::Stage;
use haven_core::tenants::Feature;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::require_scopes;
use crate::error::AppError;
use crate::extract::{AppJson, AppQuery};
use crate::state::AppState;
use crate::store::TenantContext;

const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDocumentRequest {
    pub title: String,
    pub body: String,
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Empty means every stage.
    #[serde(default)]
    pub stages: Vec<Stage>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DocumentStatusRequest {
    pub action: LifecycleAction,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default)]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/knowledge", post(create_document))
        .route("/v1/knowledge/{doc_id}/status", post(update_status))
}

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/knowledge/search", get(search))
}

/// Create a draft knowledge document
#[utoipa::path(
    post,
    path = "/v1/knowledge",
    request_body = CreateDocumentRequest,
    responses(
        (status = 200, description = "Draft document", body = KnowledgeDocument),
        (status = 400, description = "Empty or oversized title, empty body", body = haven_core::error::ApiError),
        (status = 422, description = "Feature disabled or document limit reached", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "knowledge"
)]
pub async fn create_document(
    ctx: TenantContext,
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateDocumentRequest>,
) -> Result<Json<KnowledgeDocument>, AppError> {
    require_scopes(&ctx, &["knowledge:write"], "POST /v1/knowledge")?;
    let doc = KnowledgeDocument::new(
        ctx.tenant_id.clone(),
        &req.title,
        &req.body,
        &req.author,
        Utc::now(),
    )?
    .with_tags(req.tags)
    .with_stages(req.stages);

    let mut store = state.store.write().await;
    store.require_feature(&ctx.tenant_id, Feature::Knowledge)?;
    store.add_document(doc.clone())?;
    tracing::info!(tenant_id = %ctx.tenant_id, doc_id = %doc.id, "knowledge document created");
    Ok(Json(doc))
}

/// Move a document through review and publication
#[utoipa::path(
    post,
    path = "/v1/knowledge/{doc_id}/status",
    params(("doc_id" = Uuid, Path, description = "Document ID")),
    request_body = DocumentStatusRequest,
    responses(
        (status = 200, description = "Document after the move", body = KnowledgeDocument),
        (status = 404, description = "Unknown document", body = haven_core::error::ApiError),
        (status = 409, description = "Move not allowed from the current status", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "knowledge"
)]
pub async fn update_status(
    ctx: TenantContext,
    State(state): State<AppState>,
    Path(doc_id): Path<Uuid>,
    AppJson(req): AppJson<DocumentStatusRequest>,
) -> Result<Json<KnowledgeDocument>, AppError> {
    let required: &[&str] = match req.action {
        LifecycleAction::Approve | LifecycleAction::Reject => &["knowledge:review"],
        LifecycleAction::Submit | LifecycleAction::Archive => &["knowledge:write"],
    };
    require_scopes(&ctx, required, "POST /v1/knowledge/{doc_id}/status")?;

    let mut store = state.store.write().await;
    store.require_feature(&ctx.tenant_id, Feature::Knowledge)?;
    let doc = store.apply_document_action(&ctx.tenant_id, doc_id, req.action, Utc::now())?;
    Ok(Json(doc))
}

/// Hybrid search over published passages
#[utoipa::path(
    get,
    path = "/v1/knowledge/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Best passage per document, highest score first", body = SearchResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "knowledge"
)]
pub async fn search(
    ctx: TenantContext,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    require_scopes(&ctx, &["knowledge:read"], "GET /v1/knowledge/search")?;
    let store = state.store.read().await;
    store.require_feature(&ctx.tenant_id, Feature::Knowledge)?;
    let hits = store.knowledge().search(
        &ctx.tenant_id,
        &query.q,
        query.stage,
        query.top_k.unwrap_or(DEFAULT_TOP_K),
    );
    Ok(Json(SearchResponse { query: query.q, hits }))
}
