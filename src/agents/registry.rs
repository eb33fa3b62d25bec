//! Agent descriptor registry
//!
//! The registry is built once at process start and shared read-only by every
//! run. Declaration order is kept because it breaks scoring ties.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::agents::config::AgentConfig;
use crate::agents::domain::AgentInfo;

/// An agent role. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDescriptor {
    pub role: String,
    pub display_name: String,
    pub system_prompt_template: String,
    /// Lowercased capability keywords
    pub capability_keywords: BTreeSet<String>,
    pub base_confidence: f32,
    pub temperature: f32,
    pub uses_retrieval: bool,
    /// Roles this agent always consults in collaborative mode
    pub consults: Vec<String>,
    /// Named provider, `None` for the default
    pub provider: Option<String>,
}

impl AgentDescriptor {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            role: config.role.clone(),
            display_name: config.display_name.clone(),
            system_prompt_template: config.system_prompt.clone(),
            capability_keywords: config
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            base_confidence: config.base_confidence,
            temperature: config.temperature,
            uses_retrieval: config.uses_retrieval,
            consults: config.consults.clone(),
            provider: config.provider.clone(),
        }
    }

    pub fn info(&self, default_provider: &str) -> AgentInfo {
        AgentInfo {
            role: self.role.clone(),
            display_name: self.display_name.clone(),
            keywords: self.capability_keywords.iter().cloned().collect(),
            base_confidence: self.base_confidence,
            temperature: self.temperature,
            uses_retrieval: self.uses_retrieval,
            provider: self
                .provider
                .clone()
                .unwrap_or_else(|| default_provider.to_string()),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Agent role must not be empty (entry {0})")]
    EmptyRole(usize),

    #[error("Duplicate agent role: {0}")]
    DuplicateRole(String),

    #[error("Agent '{role}' has base_confidence {value} outside [0, 1]")]
    ConfidenceOutOfRange { role: String, value: f32 },
}

/// Ordered, read-only table of agent descriptors
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<AgentDescriptor>>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    /// Build a registry, rejecting empty or duplicate roles
    pub fn new(descriptors: Vec<AgentDescriptor>) -> Result<Self, RegistryError> {
        let mut agents = Vec::with_capacity(descriptors.len());
        let mut index = HashMap::new();

        for (idx, descriptor) in descriptors.into_iter().enumerate() {
            if descriptor.role.trim().is_empty() {
                return Err(RegistryError::EmptyRole(idx));
            }
            if !(0.0..=1.0).contains(&descriptor.base_confidence) {
                return Err(RegistryError::ConfidenceOutOfRange {
                    role: descriptor.role.clone(),
                    value: descriptor.base_confidence,
                });
            }
            if index.insert(descriptor.role.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateRole(descriptor.role));
            }
            agents.push(Arc::new(descriptor));
        }

        Ok(Self { agents, index })
    }

    pub fn from_configs(configs: &[AgentConfig]) -> Result<Self, RegistryError> {
        Self::new(configs.iter().map(AgentDescriptor::from_config).collect())
    }

    /// Default product-management roles, used when nothing is configured
    pub fn builtin() -> Self {
        let configs = builtin_agents();
        Self::from_configs(&configs).unwrap_or_default()
    }

    pub fn get(&self, role: &str) -> Option<&Arc<AgentDescriptor>> {
        self.index.get(role).map(|&idx| &self.agents[idx])
    }

    pub fn contains(&self, role: &str) -> bool {
        self.index.contains_key(role)
    }

    /// Declaration position, used as the tie-breaker
    pub fn position(&self, role: &str) -> Option<usize> {
        self.index.get(role).copied()
    }

    /// Descriptors in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentDescriptor>> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn roles(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.role.clone()).collect()
    }
}

fn agent(
    role: &str,
    display_name: &str,
    system_prompt: &str,
    keywords: &[&str],
    base_confidence: f32,
    temperature: f32,
    uses_retrieval: bool,
) -> AgentConfig {
    AgentConfig {
        role: role.to_string(),
        display_name: display_name.to_string(),
        system_prompt: system_prompt.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        base_confidence,
        temperature,
        uses_retrieval,
        consults: Vec::new(),
        provider: None,
    }
}

fn builtin_agents() -> Vec<AgentConfig> {
    vec![
        agent(
            "general",
            "General Assistant",
            "You are a helpful product-management assistant. Answer clearly and concisely.",
            &["help", "question", "explain"],
            0.3,
            0.7,
            false,
        ),
        agent(
            "research",
            "Research Analyst",
            "You are a market research analyst. Ground claims in evidence and name your assumptions.",
            &["market", "research", "competitor", "trend", "customer", "survey"],
            0.2,
            0.5,
            false,
        ),
        agent(
            "code",
            "Software Engineer",
            "You are a senior software engineer. Propose concrete, buildable technical designs.",
            &["build", "code", "application", "api", "scalable", "architecture", "implement"],
            0.2,
            0.3,
            false,
        ),
        agent(
            "rag",
            "Knowledge Specialist",
            "You answer strictly from the provided documents and say when they do not cover the question.",
            &["document", "knowledge", "policy", "reference", "according"],
            0.2,
            0.2,
            true,
        ),
        agent(
            "product",
            "Product Strategist",
            "You are a product strategist. Frame answers around users, value and prioritisation.",
            &["roadmap", "feature", "prioritize", "requirement", "user", "mvp"],
            0.2,
            0.6,
            false,
        ),
        agent(
            "analysis",
            "Data Analyst",
            "You are a data analyst. Quantify where possible and state the metrics you rely on.",
            &["metric", "kpi", "data", "analyze", "forecast", "revenue"],
            0.2,
            0.4,
            false,
        ),
    ]
}
