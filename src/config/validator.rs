use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::agents::config::{AgentConfig, EngineConfig, LlmProviderConfig};
use crate::config::Settings;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Cross-reference error: {0}")]
    CrossReference(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_server(&settings.server) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_engine(&settings.engine) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_providers(&settings.providers) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_agents(&settings.agents) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_cross_references(settings) {
            errors.extend(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &crate::config::ServerSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_engine(engine: &EngineConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !(0.0..=1.0).contains(&engine.min_confidence) {
            errors.push(ValidationError::InvalidValue {
                field: "engine.min_confidence".to_string(),
                reason: "Threshold must be within [0, 1]".to_string(),
            });
        }

        if engine.keyword_increment < 0.0 || engine.retrieval_penalty < 0.0 || engine.continuity_bonus < 0.0 {
            errors.push(ValidationError::InvalidValue {
                field: "engine".to_string(),
                reason: "Score adjustments must not be negative".to_string(),
            });
        }

        if engine.invocation_timeout_secs == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "engine.invocation_timeout_secs".to_string(),
                reason: "Timeout must be greater than 0".to_string(),
            });
        }

        if engine.run_deadline_secs == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "engine.run_deadline_secs".to_string(),
                reason: "Deadline must be greater than 0".to_string(),
            });
        }

        if engine.max_tokens == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "engine.max_tokens".to_string(),
                reason: "max_tokens must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_providers(providers: &[LlmProviderConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_names = HashMap::new();

        for (idx, provider) in providers.iter().enumerate() {
            if let Some(prev_idx) = seen_names.insert(&provider.name, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Provider name '{}' appears at indices {} and {}",
                    provider.name, prev_idx, idx
                )));
            }

            if provider.name.is_empty() {
                errors.push(ValidationError::MissingField(format!("providers[{}].name", idx)));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_agents(agents: &[AgentConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_roles = HashMap::new();

        for (idx, agent) in agents.iter().enumerate() {
            if let Some(prev_idx) = seen_roles.insert(&agent.role, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Agent role '{}' appears at indices {} and {}",
                    agent.role, prev_idx, idx
                )));
            }

            if agent.role.trim().is_empty() {
                errors.push(ValidationError::MissingField(format!("agents[{}].role", idx)));
            }

            if agent.display_name.is_empty() {
                errors.push(ValidationError::MissingField(format!(
                    "agents[{}].display_name",
                    idx
                )));
            }

            if !(0.0..=1.0).contains(&agent.base_confidence) {
                errors.push(ValidationError::InvalidValue {
                    field: format!("agents[{}].base_confidence", idx),
                    reason: "Must be within [0, 1]".to_string(),
                });
            }

            if !(0.0..=2.0).contains(&agent.temperature) {
                errors.push(ValidationError::InvalidValue {
                    field: format!("agents[{}].temperature", idx),
                    reason: "Must be within [0, 2]".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_cross_references(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let providers: HashSet<&str> = settings.providers.iter().map(|p| p.name.as_str()).collect();
        let roles: HashSet<&str> = settings.agents.iter().map(|a| a.role.as_str()).collect();

        if let Some(default) = &settings.default_provider {
            if !providers.contains(default.as_str()) {
                errors.push(ValidationError::CrossReference(format!(
                    "default_provider '{}' is not a configured provider",
                    default
                )));
            }
        }

        for agent in &settings.agents {
            if let Some(provider) = &agent.provider {
                if !providers.contains(provider.as_str()) {
                    errors.push(ValidationError::CrossReference(format!(
                        "Agent '{}' references unknown provider '{}'",
                        agent.role, provider
                    )));
                }
            }

            for consulted in &agent.consults {
                if !roles.contains(consulted.as_str()) {
                    errors.push(ValidationError::CrossReference(format!(
                        "Agent '{}' consults unknown role '{}'",
                        agent.role, consulted
                    )));
                }
            }
        }

        if !settings.agents.is_empty() {
            if let Some(fallback) = &settings.engine.fallback_role {
                if !roles.contains(fallback.as_str()) {
                    errors.push(ValidationError::CrossReference(format!(
                        "Fallback role '{}' is not a configured agent",
                        fallback
                    )));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
