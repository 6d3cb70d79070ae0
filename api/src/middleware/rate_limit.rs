use axum::http::{HeaderValue, Response, StatusCode, header};
use axum::response::IntoResponse;
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer =
    GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, axum::body::Body>;

fn layer(replenish_ms: u64, burst: u32, name: &str) -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms)
            .burst_size(burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap_or_else(|| panic!("invalid governor config for {name}")),
    )
    .error_handler(json_error_handler)
}

/// POST /v1/safety/check: 120 requests/minute per IP.
pub fn safety_layer() -> RateLimitLayer {
    layer(500, 30, "safety")
}

/// POST /v1/agent/messages: 60 requests/minute per IP.
pub fn agent_layer() -> RateLimitLayer {
    layer(1_000, 20, "agent")
}

/// Domain writes (assessments, stages, coaches, knowledge, incentives).
pub fn write_layer() -> RateLimitLayer {
    layer(1_000, 30, "write")
}

/// Reads and searches: 120 requests/minute per IP.
pub fn read_layer() -> RateLimitLayer {
    layer(500, 30, "read")
}

/// POST /v1/admin/tenants: 5 requests per hour per IP.
pub fn admin_layer() -> RateLimitLayer {
    layer(720_000, 5, "admin")
}

/// 429 bodies in the `ApiError` shape with a Retry-After header.
fn json_error_handler(err: GovernorError) -> Response<axum::body::Body> {
    let (status, retry_after, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (code, None, msg.unwrap_or_default().to_string()),
    };

    let body = serde_json::json!({
        "error": haven_core::error::codes::RATE_LIMITED,
        "message": message,
        "request_id": uuid::Uuid::now_v7().to_string(),
    });

    let mut response = (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body.to_string(),
    )
        .into_response();
    if let Some(seconds) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
    }
    response
}
