//! REST API handlers for the coordination engine
//!
//! Provides the route endpoint plus read access to session logs and the
//! agent registry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agents::config::CoordinationMode;
use crate::agents::domain::{CoordinationPort, RouteRequest};
use crate::agents::error::CoordinationError;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<dyn CoordinationPort>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RouteBody {
    pub message: String,
    #[serde(default)]
    pub mode: Option<CoordinationMode>,
    #[serde(default)]
    pub context_hints: Map<String, Value>,
}

/// HTTP status for a failed run
pub fn error_status(err: &CoordinationError) -> StatusCode {
    match err {
        CoordinationError::RoutingExhausted => StatusCode::SERVICE_UNAVAILABLE,
        CoordinationError::PrimaryFailed { .. } => StatusCode::BAD_GATEWAY,
        CoordinationError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        CoordinationError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        CoordinationError::Configuration(_) => StatusCode::BAD_REQUEST,
        CoordinationError::Store(_) | CoordinationError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Route a user message through the engine.
///
/// If the client disconnects, axum drops this future and the guard cancels
/// the run together with every model call still in flight.
pub async fn route_message(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Json(body): Json<RouteBody>,
) -> impl IntoResponse {
    let request = RouteRequest {
        session_id,
        message: body.message,
        mode: body.mode,
        context_hints: body.context_hints,
    };

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let result = state.engine.route_with_cancel(request, cancel).await;
    guard.disarm();

    match result {
        Ok(response) => (
            StatusCode::OK,
            Json(serde_json::to_value(ApiResponse::success(response)).unwrap_or_default()),
        ),
        Err(e) => {
            tracing::warn!("Route request failed: {}", e);
            (
                error_status(&e),
                Json(serde_json::to_value(ApiResponse::<()>::error(e.to_string())).unwrap_or_default()),
            )
        }
    }
}

pub async fn list_interactions(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.interactions(&session_id).await {
        Ok(log) => (StatusCode::OK, Json(ApiResponse::success(log))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

pub async fn list_messages(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.engine.messages(&session_id).await {
        Ok(messages) => (StatusCode::OK, Json(ApiResponse::success(messages))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

pub async fn list_agents(State(state): State<ApiState>) -> impl IntoResponse {
    match state.engine.list_agents().await {
        Ok(agents) => (StatusCode::OK, Json(ApiResponse::success(agents))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}
