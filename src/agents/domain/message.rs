//! Conversation turns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    /// The end user
    User,
    /// An agent answering on behalf of the engine
    Agent,
}

impl std::fmt::Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Author::User => write!(f, "user"),
            Author::Agent => write!(f, "agent"),
        }
    }
}

/// One turn in a session. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: String,
    /// Owning session
    pub session_id: String,
    /// Author of the turn
    pub author: Author,
    /// Role of the answering agent (agent turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    /// Message content (text)
    pub content: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a user turn
    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            author: Author::User,
            agent_role: None,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Create an agent turn
    pub fn agent(
        session_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            author: Author::Agent,
            agent_role: Some(role.into()),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Speaker label used when the turn is rendered into a prompt
    pub fn speaker(&self) -> &str {
        match self.author {
            Author::User => "user",
            Author::Agent => self.agent_role.as_deref().unwrap_or("agent"),
        }
    }
}
