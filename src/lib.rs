//! # Agora - Multi-Agent Coordination Engine
//!
//! Agora routes each user message to a set of specialized language-model
//! agents, coordinates them under one of four protocols and returns one
//! synthesized answer with a full log of who asked whom for what.
//!
//! ## Features
//!
//! - **Confidence routing**: keyword scoring with a guaranteed fallback agent
//! - **4 Coordination Modes**: Sequential, Parallel, Collaborative, Debate
//! - **Bounded context**: hard caps on history, snippets and structured fields
//! - **Failure isolation**: per-call timeouts, substitution, graceful degradation
//! - **Persistence**: in-memory or SQL session store (SQLite/PostgreSQL)
//! - **Metrics**: Prometheus metrics for monitoring
//! - **Health Checks**: Kubernetes-ready health endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agora::agents::{CoordinationEngine, CoordinationPort, RouteRequest};
//! use agora::agents::llm::{ProviderSet, ScriptedProvider};
//! use agora::agents::AgentRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let providers = ProviderSet::single("echo", Arc::new(ScriptedProvider::echo("echo")));
//!     let engine = CoordinationEngine::builder(AgentRegistry::builtin(), providers).build()?;
//!
//!     let response = engine
//!         .route(RouteRequest::new("session-1", "Research the market for a scalable app"))
//!         .await?;
//!     println!("{}: {}", response.answered_by, response.final_response);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Agora follows Hexagonal Architecture:
//! - **Agents**: The coordination engine and its ports
//! - **Adapters**: HTTP, health and metrics
//! - **Config**: Configuration management

pub mod adapters;
pub mod agents;
pub mod cli;
pub mod config;

use crate::adapters::api_handler::{self, ApiState};
use crate::adapters::health_handler::HealthHandler;
use crate::adapters::metrics_handler::MetricsHandler;
use crate::agents::domain::CoordinationPort;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Creates the Axum application router with all endpoints configured.
///
/// # Arguments
///
/// * `engine` - Coordination engine answering route requests
/// * `health_handler` - Health check handler
/// * `metrics_handler` - Metrics collection handler
///
/// # Returns
///
/// Configured Axum Router
pub fn create_app(
    engine: Arc<dyn CoordinationPort>,
    health_handler: Arc<HealthHandler>,
    metrics_handler: Arc<MetricsHandler>,
) -> Router {
    let public_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/ready", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.ready().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }))
        .route("/metrics", get({
            let handler = metrics_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.metrics().await }
            }
        }));

    let api_state = ApiState { engine };

    let api_router = Router::new()
        .route("/sessions/:session_id/route", post(api_handler::route_message))
        .route("/sessions/:session_id/interactions", get(api_handler::list_interactions))
        .route("/sessions/:session_id/messages", get(api_handler::list_messages))
        .route("/agents", get(api_handler::list_agents))
        .with_state(api_state);

    let router = public_router.nest("/api", api_router);

    router.layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}
