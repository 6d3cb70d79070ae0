use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response returned by every API surface.
/// Carries enough context for a client (or an agent) to correct the request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "not_found", "conflict")
    pub error: String,
    /// Domain-specific machine code for deterministic remediation (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const POLICY_VIOLATION: &str = "policy_violation";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const RATE_LIMITED: &str = "rate_limited";
}

/// Domain error raised by the rule engines. The API maps each variant onto
/// an HTTP status; the CLI prints it as JSON.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("{code}: {message}")]
    PolicyViolation { code: String, message: String },

    #[error("safety classifier failed: {0}")]
    Classifier(String),
}

impl CoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        CoreError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        CoreError::Conflict {
            message: message.into(),
        }
    }

    pub fn policy(code: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::PolicyViolation {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Stable wire code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation { .. } => codes::VALIDATION_FAILED,
            CoreError::NotFound { .. } => codes::NOT_FOUND,
            CoreError::Conflict { .. } => codes::CONFLICT,
            CoreError::PolicyViolation { .. } => codes::POLICY_VIOLATION,
            CoreError::Classifier(_) => codes::INTERNAL_ERROR,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
