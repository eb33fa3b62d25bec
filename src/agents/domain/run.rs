//! Coordination run record and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::config::CoordinationMode;
use crate::agents::error::InvocationErrorKind;

/// Lifecycle of a coordination run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Routing,
    Executing,
    Synthesizing,
    Done,
    Failed,
}

impl RunState {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Legal transitions. `Routing` cannot fail: the fallback role is forced instead.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Routing, RunState::Executing)
                | (RunState::Executing, RunState::Synthesizing)
                | (RunState::Executing, RunState::Failed)
                | (RunState::Synthesizing, RunState::Done)
                | (RunState::Synthesizing, RunState::Failed)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Routing => write!(f, "routing"),
            RunState::Executing => write!(f, "executing"),
            RunState::Synthesizing => write!(f, "synthesizing"),
            RunState::Done => write!(f, "done"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Error)]
#[error("illegal run transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

/// Confidence of one agent for the routed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentScore {
    pub role: String,
    pub score: f32,
}

/// Something that went wrong without failing the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Degradation {
    /// Retrieval errored or timed out; context was built without snippets
    RetrievalDegraded { query: String },
    /// A non-primary call failed and its output was left out
    AgentFailed {
        role: String,
        phase: String,
        kind: InvocationErrorKind,
    },
    /// The primary failed and a substitute answered in its place
    PrimarySubstituted { failed: String, substitute: String },
    /// An interaction, message or run write did not reach the store
    PersistenceWriteFailed { operation: String },
}

/// One user-triggered invocation of the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationRun {
    /// Unique run identifier
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// Protocol in use
    pub mode: CoordinationMode,
    /// Selected roles, descending confidence
    pub selected_agents: Vec<String>,
    /// Always `selected_agents[0]`
    pub primary_agent: String,
    /// Ranking snapshot the selection was taken from
    #[serde(default)]
    pub scores: Vec<AgentScore>,
    /// Current lifecycle state
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_response: Option<String>,
    /// Non-fatal problems observed during the run
    #[serde(default)]
    pub degraded: Vec<Degradation>,
}

impl CoordinationRun {
    /// Start a run in the `Routing` state.
    ///
    /// `selected_agents` must be non-empty; the first entry becomes the primary.
    pub fn new(
        session_id: impl Into<String>,
        mode: CoordinationMode,
        selected_agents: Vec<String>,
        scores: Vec<AgentScore>,
    ) -> Option<Self> {
        let primary_agent = selected_agents.first()?.clone();
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            mode,
            selected_agents,
            primary_agent,
            scores,
            state: RunState::Routing,
            started_at: Utc::now(),
            finished_at: None,
            final_response: None,
            degraded: Vec::new(),
        })
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn transition(&mut self, next: RunState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Seal the run with its answer
    pub fn complete(&mut self, final_response: String) -> Result<(), InvalidTransition> {
        self.transition(RunState::Done)?;
        self.final_response = Some(final_response);
        Ok(())
    }

    /// Mark the run failed from any non-terminal state
    pub fn fail(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
    }

    pub fn degrade(&mut self, degradation: Degradation) {
        self.degraded.push(degradation);
    }

    /// Supporting roles (everything after the primary)
    pub fn supporting_agents(&self) -> &[String] {
        &self.selected_agents[1..]
    }
}
