//! Entry point request and response types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{AgentInteraction, Degradation};
use crate::agents::config::CoordinationMode;

/// A user message to route through the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Owning session
    pub session_id: String,
    /// The user's message
    pub message: String,
    /// Protocol; collaborative when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<CoordinationMode>,
    /// Caller-supplied structured fields (form data, product metadata)
    #[serde(default)]
    pub context_hints: Map<String, Value>,
}

impl RouteRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            mode: None,
            context_hints: Map::new(),
        }
    }

    pub fn with_mode(mut self, mode: CoordinationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context_hints.insert(key.into(), value.into());
        self
    }
}

/// Final result of a coordination run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
    /// Run identifier
    pub run_id: String,
    /// Owning session
    pub session_id: String,
    /// Protocol used
    pub mode: CoordinationMode,
    /// Synthesized answer
    pub final_response: String,
    /// Highest-ranked selected role
    pub primary_agent: String,
    /// Role whose call produced the answer (differs from primary after substitution)
    pub answered_by: String,
    /// All selected roles, descending confidence
    pub selected_agents: Vec<String>,
    /// Every exchange of this run, in order
    pub interactions: Vec<AgentInteraction>,
    /// Non-fatal problems observed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<Degradation>,
    /// Wall-clock time of the run
    pub execution_time_ms: u64,
}
