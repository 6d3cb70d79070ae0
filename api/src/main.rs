use std::net::SocketAddr;

use axum::Router;
use chrono::Utc;
use haven_core::tenants::{Tenant, TenantPlan};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod config;
mod error;
mod extract;
mod middleware;
mod routes;
mod state;
mod store;
#[cfg(test)]
mod tests;

use config::{ApiConfig, ConfigError};
use state::AppState;
use store::Store;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Haven API",
        version = "0.1.0",
        description = "Multi-tenant behavioral-health coaching: stage tracking, assessments, safety-filtered agents, coach review and incentives."
    ),
    paths(
        routes::health::health_check,
        routes::safety::check,
        routes::assessments::submit_assessment,
        routes::stages::get_stage,
        routes::stages::set_stage,
        routes::agent::send_message,
        routes::interventions::match_packs,
        routes::coaching::register_coach,
        routes::coaching::promotion,
        routes::coaching::list_escalations,
        routes::coaching::transition_escalation,
        routes::knowledge::create_document,
        routes::knowledge::update_status,
        routes::knowledge::search,
        routes::incentives::record_activity,
        routes::incentives::redeem,
        routes::incentives::summary,
        routes::admin::create_tenant,
    ),
    components(schemas(
        HealthResponse,
        haven_core::error::ApiError,
        routes::safety::SafetyCheckRequest,
        routes::assessments::SubmitAssessmentRequest,
        routes::assessments::AssessmentOutcome,
        routes::stages::SetStageRequest,
        routes::stages::StageResponse,
        routes::agent::AgentMessageRequest,
        routes::interventions::MatchResponse,
        routes::coaching::RegisterCoachRequest,
        routes::coaching::PromotionResponse,
        routes::coaching::EscalationView,
        routes::knowledge::CreateDocumentRequest,
        routes::knowledge::DocumentStatusRequest,
        routes::knowledge::SearchResponse,
        routes::incentives::ActivityRequest,
        routes::incentives::ActivityResponse,
        routes::incentives::RedeemRequest,
        routes::incentives::RedeemResponse,
        routes::incentives::IncentiveSummary,
        routes::admin::CreateTenantRequest,
        routes::admin::CreateTenantResponse,
        haven_core::safety::SafetyVerdict,
        haven_core::agents::AgentTurn,
        haven_core::coaching::Escalation,
        haven_core::coaching::CoachProfile,
        haven_core::knowledge::KnowledgeDocument,
        haven_core::interventions::MatchCriteria,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tenants: usize,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] haven_core::error::CoreError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Full router with per-route rate limits, auth injection, tracing and CORS.
pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    use middleware::rate_limit;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::safety::router().layer(rate_limit::safety_layer()))
        .merge(routes::agent::router().layer(rate_limit::agent_layer()))
        .merge(routes::assessments::router().layer(rate_limit::write_layer()))
        .merge(routes::stages::router().layer(rate_limit::write_layer()))
        .merge(routes::interventions::router().layer(rate_limit::read_layer()))
        .merge(routes::coaching::router().layer(rate_limit::write_layer()))
        .merge(routes::knowledge::write_router().layer(rate_limit::write_layer()))
        .merge(routes::knowledge::read_router().layer(rate_limit::read_layer()))
        .merge(routes::incentives::write_router().layer(rate_limit::write_layer()))
        .merge(routes::incentives::read_router().layer(rate_limit::read_layer()))
        .merge(routes::admin::router().layer(rate_limit::admin_layer()))
        .layer(auth::InjectAuthLayer::new(state.store.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer(cors_origins)),
        )
        .with_state(state)
}

fn seed_store(config: &ApiConfig) -> Result<Store, StartupError> {
    let mut store = Store::new();
    if let Some(bootstrap) = &config.bootstrap {
        let now = Utc::now();
        store.add_tenant(Tenant::new(
            bootstrap.tenant_id.clone(),
            bootstrap.tenant_id.as_str(),
            TenantPlan::Enterprise,
            now,
        ))?;
        store.insert_key(&bootstrap.tenant_id, &bootstrap.api_key, vec!["*".to_string()], now)?;
        tracing::info!(tenant_id = %bootstrap.tenant_id, "bootstrap tenant seeded");
    } else {
        tracing::warn!("no bootstrap tenant configured; every /v1 request will be rejected");
    }
    Ok(store)
}

async fn run() -> Result<(), StartupError> {
    let config = ApiConfig::from_env()?;
    let safety_config = config.load_safety_config()?;
    let state = AppState::new(seed_store(&config)?, safety_config, config.signup_gate)?;
    let app = app(state, &config.cors_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Haven API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haven_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "haven-api stopped");
        std::process::exit(1);
    }
}
