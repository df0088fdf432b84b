//! Gateway-emitted error responses.
//!
//! # Purpose
//! Centralizes the JSON error shape `{code, message, details}` and the
//! status codes the gateway produces itself; everything else comes from
//! the upstream.
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorBody {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

pub fn unauthorized() -> Response {
    let body = ErrorBody::new("unauthorized", "Authentication required");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(body),
    )
        .into_response()
}

pub fn forbidden(reason: Option<&str>, violations: &[String]) -> Response {
    let mut body = ErrorBody::new("forbidden", reason.unwrap_or("Access denied"));
    if !violations.is_empty() {
        body.details = Some(violations.to_vec());
    }
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

pub fn too_many_requests(retry_after_secs: u64) -> Response {
    let body = ErrorBody::new("too_many_requests", "Rate limit exceeded. Try again later.");
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after_secs.to_string())],
        Json(body),
    )
        .into_response()
}

/// Structured 503 for upstream or policy-subsystem failures. Matches the
/// proxy fallback shape `{"error": "Service Unavailable: <detail>"}`.
pub fn service_unavailable(detail: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "error": format!("Service Unavailable: {detail}"),
        })),
    )
        .into_response()
}

pub fn gateway_timeout() -> Response {
    let body = ErrorBody::new("service_unavailable", "Request budget exceeded");
    (StatusCode::GATEWAY_TIMEOUT, Json(body)).into_response()
}

pub fn internal_error() -> Response {
    let body = ErrorBody::new("internal_error", "Internal server error");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
