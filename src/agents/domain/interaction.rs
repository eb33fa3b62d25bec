//! Agent interaction log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::error::InvocationError;

/// Source label for exchanges initiated by the user
pub const USER_SOURCE: &str = "user";

/// Kind of exchange on an interaction edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// A query sent to an agent
    Request,
    /// An agent's answer to a request, consultation or delegation
    Response,
    /// A primary agent asking a supporting agent for input
    Consultation,
    /// One agent handing its output to the next in a chain
    Delegation,
    /// A request that ended without an answer; the error is in `metadata`
    Failure,
}

impl InteractionKind {
    /// Whether a response may answer this kind of interaction
    pub fn opens_exchange(&self) -> bool {
        !self.closes_exchange()
    }

    /// Whether this kind ends an exchange opened earlier
    pub fn closes_exchange(&self) -> bool {
        matches!(self, InteractionKind::Response | InteractionKind::Failure)
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InteractionKind::Request => write!(f, "request"),
            InteractionKind::Response => write!(f, "response"),
            InteractionKind::Consultation => write!(f, "consultation"),
            InteractionKind::Delegation => write!(f, "delegation"),
            InteractionKind::Failure => write!(f, "failure"),
        }
    }
}

impl std::str::FromStr for InteractionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(InteractionKind::Request),
            "response" => Ok(InteractionKind::Response),
            "consultation" => Ok(InteractionKind::Consultation),
            "delegation" => Ok(InteractionKind::Delegation),
            "failure" => Ok(InteractionKind::Failure),
            other => Err(format!("unknown interaction kind: {}", other)),
        }
    }
}

/// A directed exchange between the user and an agent, or between two agents.
///
/// A `Response` keeps the `(source, target)` pair of the exchange it answers
/// and points at it through `in_reply_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInteraction {
    /// Unique interaction identifier
    pub id: String,
    /// Coordination run that produced the exchange
    pub run_id: String,
    /// Owning session
    pub session_id: String,
    /// Requesting side: a role, or `"user"`
    pub source_agent: String,
    /// Answering role
    pub target_agent: String,
    /// Kind of exchange
    pub kind: InteractionKind,
    /// Query as sent
    pub query_snapshot: String,
    /// Answer as received (responses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_snapshot: Option<String>,
    /// Interaction this response answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Prompt fragments used, context size, latency and degradation flags
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentInteraction {
    fn open(
        kind: InteractionKind,
        run_id: &str,
        session_id: &str,
        source: &str,
        target: &str,
        query: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            session_id: session_id.to_string(),
            source_agent: source.to_string(),
            target_agent: target.to_string(),
            kind,
            query_snapshot: query.to_string(),
            response_snapshot: None,
            in_reply_to: None,
            created_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// A query sent from `source` (usually the user) to `target`
    pub fn request(run_id: &str, session_id: &str, source: &str, target: &str, query: &str) -> Self {
        Self::open(InteractionKind::Request, run_id, session_id, source, target, query)
    }

    /// A focused sub-query from a primary agent to a supporting agent
    pub fn consultation(run_id: &str, session_id: &str, primary: &str, supporting: &str, query: &str) -> Self {
        Self::open(InteractionKind::Consultation, run_id, session_id, primary, supporting, query)
    }

    /// A hand-off from one chained agent to the next
    pub fn delegation(run_id: &str, session_id: &str, from: &str, to: &str, query: &str) -> Self {
        Self::open(InteractionKind::Delegation, run_id, session_id, from, to, query)
    }

    /// The answer to this interaction, on the same edge
    pub fn respond(&self, response: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: self.run_id.clone(),
            session_id: self.session_id.clone(),
            source_agent: self.source_agent.clone(),
            target_agent: self.target_agent.clone(),
            kind: InteractionKind::Response,
            query_snapshot: self.query_snapshot.clone(),
            response_snapshot: Some(response.to_string()),
            in_reply_to: Some(self.id.clone()),
            created_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// Close this interaction without an answer, keeping the error
    pub fn fail(&self, error: &InvocationError) -> Self {
        let mut failure = self.respond("");
        failure.kind = InteractionKind::Failure;
        failure.response_snapshot = None;
        failure
            .with_metadata("error_kind", error.kind.to_string())
            .with_metadata("error", error.message.clone())
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a metadata map, keeping existing keys
    pub fn extend_metadata(&mut self, extra: &Map<String, Value>) {
        for (k, v) in extra {
            self.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// Check that every response or failure closes exactly one earlier exchange on the same edge.
///
/// Returns the offending response ids.
pub fn unpaired_responses(log: &[AgentInteraction]) -> Vec<String> {
    let mut answered = std::collections::HashSet::new();
    let mut bad = Vec::new();

    for (idx, entry) in log.iter().enumerate() {
        if !entry.kind.closes_exchange() {
            continue;
        }
        let opener = entry.in_reply_to.as_ref().and_then(|parent| {
            log[..idx].iter().find(|candidate| &candidate.id == parent)
        });
        let paired = match opener {
            Some(open) => {
                open.kind.opens_exchange()
                    && open.run_id == entry.run_id
                    && open.session_id == entry.session_id
                    && open.source_agent == entry.source_agent
                    && open.target_agent == entry.target_agent
                    && answered.insert(open.id.clone())
            }
            None => false,
        };
        if !paired {
            bad.push(entry.id.clone());
        }
    }

    bad
}
