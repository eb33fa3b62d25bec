//! Prompt context assembly
//!
//! Every component of a [`PromptContext`] has a hard cap, so the assembled
//! prompt is bounded without counting tokens:
//! - the last N history messages, each cut to `message_chars`
//! - the top K retrieval snippets, each cut to `snippet_chars`
//! - at most `max_fields` caller fields, each value cut to `field_chars`
//! - injected agent turns, each cut to `turn_chars`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tera::{Context, Tera};
use tracing::{debug, warn};

use crate::agents::config::ContextConfig;
use crate::agents::domain::{Author, Message};
use crate::agents::llm::ChatMessage;
use crate::agents::registry::AgentDescriptor;
use crate::agents::retrieval::{Retriever, Snippet};

/// Render the system prompt as a Tera template.
///
/// Available variables: `role`, `display_name`, `session_id`, and every
/// structured field. Falls back to the raw template if rendering fails.
pub fn render_system_prompt(
    agent: &AgentDescriptor,
    session_id: &str,
    fields: &BTreeMap<String, String>,
) -> String {
    let template = &agent.system_prompt_template;
    if !template.contains("{{") && !template.contains("{%") {
        return template.clone();
    }

    let mut context = Context::new();
    for (key, value) in fields {
        context.insert(key, value);
    }
    context.insert("role", &agent.role);
    context.insert("display_name", &agent.display_name);
    context.insert("session_id", session_id);

    match Tera::one_off(template, &context, false) {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!(role = %agent.role, "Failed to render system prompt template: {}", e);
            template.clone()
        }
    }
}

/// Cut `text` to at most `max` characters
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// A capped hint key that does not collide with one already kept.
///
/// Keys sharing a truncated prefix get a `~N` suffix within the same cap.
fn field_key(kept: &BTreeMap<String, String>, key: &str, max: usize) -> String {
    let base = truncate_chars(key, max);
    if !kept.contains_key(&base) {
        return base;
    }
    (2..)
        .map(|n| {
            let suffix = format!("~{}", n);
            let room = max.saturating_sub(suffix.chars().count());
            format!("{}{}", truncate_chars(key, room), suffix)
        })
        .find(|candidate| !kept.contains_key(candidate))
        .unwrap_or(base)
}

/// Result of the per-run retrieval lookup
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub snippets: Vec<Snippet>,
    /// Retrieval was attempted
    pub consulted: bool,
    /// Retrieval errored or timed out
    pub degraded: bool,
}

impl RetrievalOutcome {
    /// Hit count for scoring, `None` when retrieval gave no usable answer
    pub fn hits(&self) -> Option<usize> {
        (self.consulted && !self.degraded).then_some(self.snippets.len())
    }
}

/// Another agent's output injected into the prompt
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTurn {
    pub role: String,
    pub content: String,
}

impl AgentTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Per-call additions chosen by the active protocol
#[derive(Debug, Clone, Default)]
pub struct ContextExtra {
    /// Peer output the agent should build on
    pub turns: Vec<AgentTurn>,
    /// Protocol instruction placed before the query
    pub instruction: Option<String>,
    /// Replaces the user message as the query (consultations)
    pub query_override: Option<String>,
}

impl ContextExtra {
    pub fn turn(mut self, turn: AgentTurn) -> Self {
        self.turns.push(turn);
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query_override = Some(query.into());
        self
    }
}

/// Session state a context is built from
#[derive(Debug, Clone, Copy)]
pub struct SessionView<'a> {
    pub session_id: &'a str,
    /// History before the current message, oldest first
    pub history: &'a [Message],
    /// The user's current message
    pub message: &'a str,
    pub hints: &'a Map<String, Value>,
    pub retrieval: &'a RetrievalOutcome,
}

/// Size-bounded prompt for one agent call
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub system_prompt: String,
    pub history_window: Vec<Message>,
    pub retrieved_snippets: Vec<Snippet>,
    pub structured_fields: BTreeMap<String, String>,
    pub agent_turns: Vec<AgentTurn>,
    pub instruction: Option<String>,
    pub query: String,
    pub retrieval_degraded: bool,
}

impl PromptContext {
    /// Total characters across every component
    pub fn char_len(&self) -> usize {
        self.system_prompt.chars().count()
            + self
                .history_window
                .iter()
                .map(|m| m.content.chars().count())
                .sum::<usize>()
            + self
                .retrieved_snippets
                .iter()
                .map(|s| s.text.chars().count())
                .sum::<usize>()
            + self
                .structured_fields
                .iter()
                .map(|(k, v)| k.chars().count() + v.chars().count())
                .sum::<usize>()
            + self
                .agent_turns
                .iter()
                .map(|t| t.content.chars().count())
                .sum::<usize>()
            + self.instruction.as_ref().map_or(0, |i| i.chars().count())
            + self.query.chars().count()
    }

    /// Whether another agent's output appears anywhere in this context
    pub fn contains(&self, needle: &str) -> bool {
        self.history_window.iter().any(|m| m.content.contains(needle))
            || self.agent_turns.iter().any(|t| t.content.contains(needle))
            || self.query.contains(needle)
            || self.instruction.as_ref().is_some_and(|i| i.contains(needle))
    }

    /// Sizes and flags recorded on the interaction
    pub fn metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        meta.insert("context_chars".to_string(), json!(self.char_len()));
        meta.insert("history_messages".to_string(), json!(self.history_window.len()));
        meta.insert("snippets".to_string(), json!(self.retrieved_snippets.len()));
        meta.insert("fields".to_string(), json!(self.structured_fields.len()));
        meta.insert("agent_turns".to_string(), json!(self.agent_turns.len()));
        meta.insert("retrieval_degraded".to_string(), json!(self.retrieval_degraded));
        meta
    }

    /// Provider wire messages: system, history, then the composed query
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut system = self.system_prompt.clone();

        if !self.retrieved_snippets.is_empty() {
            system.push_str("\n\nRelevant knowledge:");
            for (idx, snippet) in self.retrieved_snippets.iter().enumerate() {
                system.push_str(&format!("\n[{}] ({}) {}", idx + 1, snippet.source_id, snippet.text));
            }
        }

        if !self.structured_fields.is_empty() {
            system.push_str("\n\nContext:");
            for (key, value) in &self.structured_fields {
                system.push_str(&format!("\n- {}: {}", key, value));
            }
        }

        let mut messages = vec![ChatMessage::system(system)];

        for message in &self.history_window {
            messages.push(match message.author {
                Author::User => ChatMessage::user(message.content.clone()),
                Author::Agent => ChatMessage::assistant(message.content.clone()),
            });
        }

        let mut prompt = String::new();
        for turn in &self.agent_turns {
            prompt.push_str(&format!("[{}]\n{}\n\n", turn.role, turn.content));
        }
        if let Some(instruction) = &self.instruction {
            prompt.push_str(instruction);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&self.query);
        messages.push(ChatMessage::user(prompt));

        messages
    }
}

/// Builds prompt contexts with fixed caps
#[derive(Clone)]
pub struct ContextAssembler {
    config: ContextConfig,
    retriever: Arc<dyn Retriever>,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig, retriever: Arc<dyn Retriever>) -> Self {
        Self { config, retriever }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Search the knowledge base, never failing.
    ///
    /// Errors and timeouts produce an empty, degraded outcome.
    pub async fn retrieve(&self, query: &str) -> RetrievalOutcome {
        let budget = Duration::from_millis(self.config.retrieval_timeout_ms);
        let result = tokio::time::timeout(
            budget,
            self.retriever.search(query, self.config.snippet_top_k),
        )
        .await;

        match result {
            Ok(Ok(snippets)) => {
                debug!(retriever = self.retriever.name(), hits = snippets.len(), "Retrieval finished");
                RetrievalOutcome {
                    snippets,
                    consulted: true,
                    degraded: false,
                }
            }
            Ok(Err(e)) => {
                warn!(retriever = self.retriever.name(), "Retrieval failed: {}", e);
                RetrievalOutcome {
                    snippets: Vec::new(),
                    consulted: true,
                    degraded: true,
                }
            }
            Err(_) => {
                warn!(
                    retriever = self.retriever.name(),
                    "Retrieval timed out after {}ms", self.config.retrieval_timeout_ms
                );
                RetrievalOutcome {
                    snippets: Vec::new(),
                    consulted: true,
                    degraded: true,
                }
            }
        }
    }

    /// Build the context for one call to `agent`
    pub fn build(
        &self,
        session: &SessionView<'_>,
        agent: &AgentDescriptor,
        extra: ContextExtra,
    ) -> PromptContext {
        let cfg = &self.config;

        let skip = session.history.len().saturating_sub(cfg.history_window);
        let history_window = session.history[skip..]
            .iter()
            .map(|m| Message {
                content: truncate_chars(&m.content, cfg.message_chars),
                ..m.clone()
            })
            .collect();

        let retrieved_snippets = if agent.uses_retrieval {
            session
                .retrieval
                .snippets
                .iter()
                .take(cfg.snippet_top_k)
                .map(|s| Snippet {
                    text: truncate_chars(&s.text, cfg.snippet_chars),
                    ..s.clone()
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut structured_fields = BTreeMap::new();
        for (key, value) in session.hints.iter().take(cfg.max_fields) {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            let key = field_key(&structured_fields, key, cfg.field_chars);
            structured_fields.insert(key, truncate_chars(&text, cfg.field_chars));
        }

        let agent_turns = extra
            .turns
            .into_iter()
            .map(|t| AgentTurn {
                content: truncate_chars(&t.content, cfg.turn_chars),
                role: t.role,
            })
            .collect();

        let query = extra
            .query_override
            .as_deref()
            .unwrap_or(session.message);

        PromptContext {
            system_prompt: render_system_prompt(agent, session.session_id, &structured_fields),
            history_window,
            retrieved_snippets,
            agent_turns,
            instruction: extra.instruction,
            query: truncate_chars(query, cfg.message_chars),
            retrieval_degraded: agent.uses_retrieval && session.retrieval.degraded,
            structured_fields,
        }
    }
}
