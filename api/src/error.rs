use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use haven_core::error::{ApiError, CoreError, codes};

/// Handler error that renders as a structured `ApiError` body.
#[derive(Debug)]
pub enum AppError {
    /// 400
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// 401
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// 403
    Forbidden {
        message: String,
        docs_hint: Option<String>,
    },
    /// 404
    NotFound { resource: String },
    /// 409
    Conflict { message: String },
    /// 422, a domain rule refused the request
    PolicyViolation {
        code: String,
        message: String,
        docs_hint: Option<String>,
    },
    /// 500
    Internal(String),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation { field, message } => AppError::Validation {
                message,
                field: Some(field),
                received: None,
                docs_hint: None,
            },
            CoreError::NotFound { resource } => AppError::NotFound { resource },
            CoreError::Conflict { message } => AppError::Conflict { message },
            CoreError::PolicyViolation { code, message } => {
                let docs_hint = (code == "feature_disabled").then(|| {
                    "The tenant's plan or settings turn this feature off. \
                     Ask an operator to enable it."
                        .to_string()
                });
                AppError::PolicyViolation {
                    code,
                    message,
                    docs_hint,
                }
            }
            CoreError::Classifier(msg) => AppError::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let body = |error: &str, message: String| ApiError {
            error: error.to_string(),
            error_code: None,
            message,
            field: None,
            received: None,
            request_id: request_id.clone(),
            docs_hint: None,
        };

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    field,
                    received,
                    docs_hint,
                    ..body(codes::VALIDATION_FAILED, message)
                },
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    docs_hint,
                    ..body(codes::UNAUTHORIZED, message)
                },
            ),
            AppError::Forbidden { message, docs_hint } => (
                StatusCode::FORBIDDEN,
                ApiError {
                    docs_hint,
                    ..body(codes::FORBIDDEN, message)
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                body(codes::NOT_FOUND, format!("{resource} not found")),
            ),
            AppError::Conflict { message } => {
                (StatusCode::CONFLICT, body(codes::CONFLICT, message))
            }
            AppError::PolicyViolation {
                code,
                message,
                docs_hint,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError {
                    error_code: Some(code),
                    docs_hint,
                    ..body(codes::POLICY_VIOLATION, message)
                },
            ),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body(codes::INTERNAL_ERROR, "An internal error occurred".to_string()),
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}
