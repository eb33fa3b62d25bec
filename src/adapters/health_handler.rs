use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::agents::store::SessionStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub agents: usize,
    pub store: String,
}

pub struct HealthHandler {
    store: Arc<dyn SessionStore>,
    agent_count: usize,
    start_time: std::time::Instant,
}

impl HealthHandler {
    pub fn new(store: Arc<dyn SessionStore>, agent_count: usize) -> Self {
        Self {
            store,
            agent_count,
            start_time: std::time::Instant::now(),
        }
    }

    /// Basic health check - returns 200 if server is running
    pub async fn health(&self) -> impl IntoResponse {
        let uptime = self.start_time.elapsed().as_secs();
        let status = HealthStatus {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            checks: HealthChecks {
                agents: self.agent_count,
                store: self.store.name().to_string(),
            },
        };

        (StatusCode::OK, Json(status))
    }

    /// Readiness check - agents are registered and the session store answers
    pub async fn ready(&self) -> impl IntoResponse {
        if self.agent_count == 0 {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "message": "No agents registered"
                })),
            );
        }

        match self.store.health_check().await {
            Ok(()) => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "ready",
                    "message": "Server is ready to accept requests"
                })),
            ),
            Err(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "message": format!("Session store unavailable: {}", e)
                })),
            ),
        }
    }

    /// Liveness check - returns 200 if server is alive
    pub async fn live(&self) -> impl IntoResponse {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "alive",
                "message": "Server is alive"
            })),
        )
    }
}
