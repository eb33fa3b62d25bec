//! Domain types for the coordination engine
//!
//! Core abstractions that define the engine's domain model.

mod agent;
mod interaction;
mod message;
mod response;
mod run;

pub use agent::*;
pub use interaction::*;
pub use message::*;
pub use response::*;
pub use run::*;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agents::error::CoordinationResult;

/// Port trait for the coordination engine, consumed by the surrounding application
#[async_trait]
pub trait CoordinationPort: Send + Sync {
    /// Route a user message through the engine
    async fn route(&self, request: RouteRequest) -> CoordinationResult<RouteResponse> {
        self.route_with_cancel(request, CancellationToken::new()).await
    }

    /// Route a user message; cancelling `cancel` stops the run and every call in flight
    async fn route_with_cancel(
        &self,
        request: RouteRequest,
        cancel: CancellationToken,
    ) -> CoordinationResult<RouteResponse>;

    /// List registered agents in declaration order
    async fn list_agents(&self) -> anyhow::Result<Vec<AgentInfo>>;

    /// Ordered interaction log of a session
    async fn interactions(&self, session_id: &str) -> anyhow::Result<Vec<AgentInteraction>>;

    /// Messages of a session, oldest first
    async fn messages(&self, session_id: &str) -> anyhow::Result<Vec<Message>>;
}
