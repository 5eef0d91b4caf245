//! HTTP handlers for the protocol and admin routes.
//!
//! Protocol handlers resolve the caller from the identity header, hand
//! the request to `HeartbeatService`, and wrap the result in the JSON
//! envelope. A reboot is a successful response, not an error.

use amrm_core::*;
use amrm_service::{CallerIdentity, ServiceError};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn service_error(err: ServiceError) -> Response {
    let status = match &err {
        ServiceError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        ServiceError::UnknownAttempt(_) | ServiceError::ApplicationNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ServiceError::Dispatch(_) | ServiceError::Scheduler(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if err.is_collaborator_failure() {
        error!(error = %err, "request failed");
    } else {
        warn!(error = %err, status = status.as_u16(), "request rejected");
    }
    error_response(&err.to_string(), status).into_response()
}

/// The verified caller, as asserted by the front door. An absent or
/// unreadable header leaves the identity unresolved.
fn caller_identity(state: &ApiState, headers: &HeaderMap) -> CallerIdentity {
    match headers
        .get(&state.identity_header)
        .and_then(|v| v.to_str().ok())
    {
        Some(user) if !user.is_empty() => CallerIdentity::user(user),
        _ => CallerIdentity::unresolved(),
    }
}

fn parse_attempt(raw: &str) -> Result<AttemptId, Response> {
    raw.parse::<AttemptId>()
        .map_err(|e| error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response())
}

// ── Protocol ───────────────────────────────────────────────────

/// POST /amrm/v1/register
pub async fn register(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let caller = caller_identity(&state, &headers);
    match state.service.register(&caller, req).await {
        Ok(resp) => ApiResponse::ok(resp).into_response(),
        Err(e) => service_error(e),
    }
}

/// POST /amrm/v1/allocate
pub async fn allocate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<AllocateRequest>,
) -> impl IntoResponse {
    let caller = caller_identity(&state, &headers);
    match state.service.allocate(&caller, req).await {
        Ok(resp) => ApiResponse::ok(resp.as_ref()).into_response(),
        Err(e) => service_error(e),
    }
}

/// POST /amrm/v1/finish
pub async fn finish(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<FinishRequest>,
) -> impl IntoResponse {
    let caller = caller_identity(&state, &headers);
    match state.service.finish(&caller, req).await {
        Ok(resp) => ApiResponse::ok(resp).into_response(),
        Err(e) => service_error(e),
    }
}

// ── Attempt lifecycle ──────────────────────────────────────────

/// PUT /internal/v1/attempts/:attempt_id
pub async fn register_attempt(
    State(state): State<ApiState>,
    Path(attempt_id): Path<String>,
) -> impl IntoResponse {
    let attempt = match parse_attempt(&attempt_id) {
        Ok(attempt) => attempt,
        Err(resp) => return resp,
    };
    state.service.register_app_attempt(attempt);
    (
        StatusCode::CREATED,
        ApiResponse::ok(serde_json::json!({
            "attempt_id": attempt,
            "registered": true
        })),
    )
        .into_response()
}

/// DELETE /internal/v1/attempts/:attempt_id
pub async fn unregister_attempt(
    State(state): State<ApiState>,
    Path(attempt_id): Path<String>,
) -> impl IntoResponse {
    let attempt = match parse_attempt(&attempt_id) {
        Ok(attempt) => attempt,
        Err(resp) => return resp,
    };
    let removed = state.service.unregister_attempt(&attempt);
    ApiResponse::ok(serde_json::json!({
        "attempt_id": attempt,
        "removed": removed
    }))
    .into_response()
}
