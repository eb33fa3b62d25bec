//! Agent listing types

use serde::{Deserialize, Serialize};

/// Agent information returned from list operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Unique role key
    pub role: String,
    /// Human-readable name
    pub display_name: String,
    /// Capability keywords
    pub keywords: Vec<String>,
    /// Score floor
    pub base_confidence: f32,
    /// Sampling temperature
    pub temperature: f32,
    /// Whether retrieval snippets are injected
    pub uses_retrieval: bool,
    /// Provider answering for this agent
    pub provider: String,
}
