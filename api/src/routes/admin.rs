use std::collections::BTreeSet;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use haven_core::auth::scope_matches;
use haven_core::tenants::{Feature, Tenant, TenantId, TenantPlan};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::require_scopes;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;
use crate::store::TenantContext;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTenantRequest {
    pub tenant_id: TenantId,
    pub name: String,
    pub plan: TenantPlan,
    #[serde(default)]
    pub disabled_features: BTreeSet<Feature>,
    /// Scopes for the first key. Defaults to every scope except `admin`.
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateTenantResponse {
    pub tenant: Tenant,
    pub key_id: Uuid,
    /// Shown once. Only its hash is kept.
    pub api_key: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
}

/// Every non-admin scope family.
const DEFAULT_TENANT_SCOPES: &[&str] = &[
    "safety:*",
    "assessments:*",
    "stages:*",
    "agent:*",
    "interventions:*",
    "coaches:*",
    "escalations:*",
    "knowledge:*",
    "incentives:*",
];

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/admin/tenants", post(create_tenant))
}

/// Create a tenant and issue its first API key
#[utoipa::path(
    post,
    path = "/v1/admin/tenants",
    request_body = CreateTenantRequest,
    responses(
        (status = 200, description = "Tenant created; the key is shown once", body = CreateTenantResponse),
        (status = 403, description = "Caller lacks the admin scope", body = haven_core::error::ApiError),
        (status = 409, description = "Tenant already exists", body = haven_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn create_tenant(
    ctx: TenantContext,
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateTenantRequest>,
) -> Result<Json<CreateTenantResponse>, AppError> {
    require_scopes(&ctx, state.signup_gate.creation_scopes(), "POST /v1/admin/tenants")?;
    if req.name.trim().is_empty() {
        return Err(AppError::Validation {
            message: "name must not be empty".to_string(),
            field: Some("name".to_string()),
            received: None,
            docs_hint: None,
        });
    }

    let scopes = match req.scopes {
        Some(requested) => {
            check_grantable(&ctx, &requested)?;
            requested
        }
        None => DEFAULT_TENANT_SCOPES.iter().map(|s| s.to_string()).collect(),
    };
    let mut tenant = Tenant::new(req.tenant_id, req.name.trim(), req.plan, Utc::now());
    tenant.disabled_features = req.disabled_features;

    let issued = state
        .store
        .write()
        .await
        .create_tenant(tenant.clone(), scopes.clone())?;

    tracing::info!(
        created_by = %ctx.tenant_id,
        tenant_id = %tenant.id,
        plan = ?tenant.plan,
        "tenant provisioned"
    );

    Ok(Json(CreateTenantResponse {
        tenant,
        key_id: issued.key_id,
        api_key: issued.api_key,
        key_prefix: issued.prefix,
        scopes,
    }))
}

/// A caller may only hand out scopes it holds itself.
fn check_grantable(ctx: &TenantContext, requested: &[String]) -> Result<(), AppError> {
    let ungrantable: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|scope| !ctx.scopes.iter().any(|granted| scope_matches(granted, scope)))
        .collect();
    if ungrantable.is_empty() {
        return Ok(());
    }
    tracing::warn!(
        tenant_id = %ctx.tenant_id,
        key_id = %ctx.key_id,
        ungrantable = ?ungrantable,
        "tenant creation asked for scopes beyond the caller's"
    );
    Err(AppError::Forbidden {
        message: format!(
            "cannot grant scopes the caller does not hold: {}",
            ungrantable.join(", ")
        ),
        docs_hint: Some("Omit scopes to get every non-admin scope family.".to_string()),
    })
}
