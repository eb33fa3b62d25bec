//! LLM provider implementations
//!
//! This module provides a unified interface for the model backends an agent
//! can be bound to:
//! - OpenAI chat completions (and compatible endpoints)
//! - Anthropic messages
//! - Ollama (local models)
//! - Scripted echo provider (offline runs and tests)

mod anthropic;
mod ollama;
mod openai;
mod scripted;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use scripted::{ScriptedProvider, ScriptedReply};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::agents::config::{LlmProviderConfig, LlmProviderType};
use crate::agents::error::{LlmError, LlmResult};

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;

    /// Complete a request
    async fn complete(&self, request: CompletionRequest) -> LlmResult<CompletionResponse>;
}

/// Speaker of a chat message sent to a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in provider wire order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request for LLM completion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Messages in the conversation
    pub messages: Vec<ChatMessage>,
    /// Model to use (overrides provider default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Temperature for sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    /// Concatenated system messages
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// Content of the final user message
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Response from LLM completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text
    pub content: String,
    /// Reason the completion stopped
    pub finish_reason: FinishReason,
    /// Token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Reason completion stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop
    Stop,
    /// Hit max tokens
    Length,
    /// Content filtered
    ContentFilter,
}

impl FinishReason {
    fn from_wire(reason: Option<&str>) -> Self {
        match reason {
            Some("length") | Some("max_tokens") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Parse a `retry-after` header (seconds) into milliseconds
fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000)
        .unwrap_or(1000)
}

/// Turn a non-success HTTP response into an `LlmError`
async fn error_from_response(response: reqwest::Response) -> LlmError {
    let status = response.status();
    if status.as_u16() == 429 {
        return LlmError::RateLimited {
            retry_after_ms: retry_after_ms(response.headers()),
        };
    }
    let message = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => LlmError::Authentication(message),
        code => LlmError::Api {
            status: code,
            message,
        },
    }
}

/// Create an LLM provider from configuration
pub fn create_provider(config: &LlmProviderConfig) -> LlmResult<Arc<dyn LlmProvider>> {
    match config.provider {
        LlmProviderType::OpenAI => {
            let provider = OpenAiProvider::new(config)?;
            Ok(Arc::new(provider))
        }
        LlmProviderType::Anthropic => {
            let provider = AnthropicProvider::new(config)?;
            Ok(Arc::new(provider))
        }
        LlmProviderType::Ollama => {
            let provider = OllamaProvider::new(config)?;
            Ok(Arc::new(provider))
        }
        LlmProviderType::Echo => Ok(Arc::new(ScriptedProvider::echo(&config.model))),
    }
}

/// Named providers, resolved per agent
#[derive(Clone)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default: String,
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.providers.keys().collect();
        names.sort();
        f.debug_struct("ProviderSet")
            .field("providers", &names)
            .field("default", &self.default)
            .finish()
    }
}

impl ProviderSet {
    /// A set holding one provider, used for every agent
    pub fn single(name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        let name = name.into();
        let mut providers = HashMap::new();
        providers.insert(name.clone(), provider);
        Self {
            providers,
            default: name,
        }
    }

    /// Build every configured provider; `default` must name one of them
    pub fn from_configs(configs: &[LlmProviderConfig], default: &str) -> LlmResult<Self> {
        let mut providers = HashMap::new();
        for config in configs {
            providers.insert(config.name.clone(), create_provider(config)?);
        }
        if !providers.contains_key(default) {
            return Err(LlmError::ProviderNotFound(default.to_string()));
        }
        Ok(Self {
            providers,
            default: default.to_string(),
        })
    }

    /// Register an additional named provider
    pub fn with(mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    /// Provider for `name`, or the default when `None`
    pub fn resolve(&self, name: Option<&str>) -> LlmResult<Arc<dyn LlmProvider>> {
        let key = name.unwrap_or(&self.default);
        self.providers
            .get(key)
            .cloned()
            .ok_or_else(|| LlmError::ProviderNotFound(key.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }
}
