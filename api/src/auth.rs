use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use haven_core::auth::{has_any_required_scope, looks_like_api_key};
use tokio::sync::RwLock;
use tower::{Layer, Service, ServiceExt};

use crate::error::AppError;
use crate::state::AppState;
use crate::store::{Store, TenantContext};

pub fn require_scopes(
    ctx: &TenantContext,
    required_scopes: &[&str],
    operation: &str,
) -> Result<(), AppError> {
    if has_any_required_scope(&ctx.scopes, required_scopes) {
        tracing::debug!(
            tenant_id = %ctx.tenant_id,
            key_id = %ctx.key_id,
            operation = operation,
            decision = "allow",
            "scope authorization decision"
        );
        return Ok(());
    }

    tracing::warn!(
        tenant_id = %ctx.tenant_id,
        key_id = %ctx.key_id,
        operation = operation,
        required_scopes = ?required_scopes,
        granted_scopes = ?ctx.scopes,
        decision = "deny",
        "scope authorization decision"
    );

    let granted = if ctx.scopes.is_empty() {
        "none".to_string()
    } else {
        ctx.scopes.join(", ")
    };
    Err(AppError::Forbidden {
        message: format!("Insufficient scope for operation '{operation}'"),
        docs_hint: Some(format!(
            "Required one of: {}. Granted: {granted}.",
            required_scopes.join(", ")
        )),
    })
}

// --- Tower Layer/Service for auth injection ---

/// Resolves the bearer key once per request and stores the `TenantContext`
/// in the request extensions. Unauthenticated requests pass through; the
/// extractor rejects them where a key is required.
#[derive(Clone)]
pub struct InjectAuthLayer {
    store: Arc<RwLock<Store>>,
}

impl InjectAuthLayer {
    pub fn new(store: Arc<RwLock<Store>>) -> Self {
        Self { store }
    }
}

impl<S> Layer<S> for InjectAuthLayer {
    type Service = InjectAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectAuthService {
            inner,
            store: self.store.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InjectAuthService<S> {
    inner: S,
    store: Arc<RwLock<Store>>,
}

impl<S> Service<Request> for InjectAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let store = self.store.clone();
        let token = extract_bearer_token(req.headers());

        Box::pin(async move {
            if let Some(token) = token.filter(|t| looks_like_api_key(t)) {
                if let Some(ctx) = store.read().await.resolve_key(&token) {
                    req.extensions_mut().insert(ctx);
                }
            }
            Ok(ready.oneshot(req).await.into_response())
        })
    }
}

fn extract_bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|s| s.trim().to_owned())
}

// --- Extractor (used by handlers) ---

impl FromRequestParts<AppState> for TenantContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<TenantContext>() {
            return Ok(ctx.clone());
        }

        let token = extract_bearer_token(&parts.headers).ok_or_else(|| AppError::Unauthorized {
            message: "Missing bearer API key".to_string(),
            docs_hint: Some("Include 'Authorization: Bearer haven_sk_...'.".to_string()),
        })?;

        if !looks_like_api_key(&token) {
            return Err(AppError::Unauthorized {
                message: "Invalid token format".to_string(),
                docs_hint: Some(
                    "API keys start with 'haven_sk_' followed by 64 hex characters.".to_string(),
                ),
            });
        }

        state
            .store
            .read()
            .await
            .resolve_key(&token)
            .ok_or_else(|| AppError::Unauthorized {
                message: "Invalid API key".to_string(),
                docs_hint: Some(
                    "Check that the key is correct and belongs to an existing tenant.".to_string(),
                ),
            })
    }
}
