//! In-memory session store

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::SessionStore;
use crate::agents::domain::{AgentInteraction, CoordinationRun, Message};
use crate::agents::error::{StoreError, StoreResult};

/// Entries are kept sorted by `created_at`, ties in append order
#[derive(Default)]
struct SessionLog {
    messages: Vec<Message>,
    interactions: Vec<AgentInteraction>,
    seen: HashSet<String>,
}

/// In-memory session store
#[derive(Default)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<String, SessionLog>>>,
    runs: Arc<RwLock<HashMap<String, CoordinationRun>>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append_message(&self, message: &Message) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(message.session_id.clone()).or_default();
        if log.seen.insert(message.id.clone()) {
            let at = log
                .messages
                .partition_point(|m| m.created_at <= message.created_at);
            log.messages.insert(at, message.clone());
        }
        Ok(())
    }

    async fn append_interaction(&self, interaction: &AgentInteraction) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let log = sessions.entry(interaction.session_id.clone()).or_default();
        if log.seen.insert(interaction.id.clone()) {
            let at = log
                .interactions
                .partition_point(|i| i.created_at <= interaction.created_at);
            log.interactions.insert(at, interaction.clone());
        }
        Ok(())
    }

    async fn create_run(&self, run: &CoordinationRun) -> StoreResult<()> {
        let mut runs = self.runs.write().await;
        runs.entry(run.id.clone()).or_insert_with(|| run.clone());
        Ok(())
    }

    async fn finalize_run(&self, run: &CoordinationRun) -> StoreResult<()> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(stored) if stored.state.is_terminal() => Ok(()),
            Some(stored) => {
                *stored = run.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "run",
                id: run.id.clone(),
            }),
        }
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> StoreResult<Vec<Message>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|log| {
                let skip = log.messages.len().saturating_sub(limit);
                log.messages[skip..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn messages(&self, session_id: &str) -> StoreResult<Vec<Message>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|log| log.messages.clone())
            .unwrap_or_default())
    }

    async fn interactions(&self, session_id: &str) -> StoreResult<Vec<AgentInteraction>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|log| log.interactions.clone())
            .unwrap_or_default())
    }

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<CoordinationRun>> {
        let runs = self.runs.read().await;
        Ok(runs.get(run_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::config::CoordinationMode;
    use crate::agents::domain::RunState;

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let store = InMemoryStore::new();
        let message = Message::user("s1", "hello");

        store.append_message(&message).await.unwrap();
        store.append_message(&message).await.unwrap();

        assert_eq!(store.messages("s1").await.unwrap().len(), 1);
        assert!(store.messages("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_messages_keeps_tail() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .append_message(&Message::user("s1", format!("m{}", i)))
                .await
                .unwrap();
        }
        let recent = store.recent_messages("s1", 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_finalize_run_once() {
        let store = InMemoryStore::new();
        let mut run = CoordinationRun::new(
            "s1",
            CoordinationMode::Parallel,
            vec!["code".to_string()],
            vec![],
        )
        .unwrap();
        store.create_run(&run).await.unwrap();

        run.transition(RunState::Executing).unwrap();
        run.transition(RunState::Synthesizing).unwrap();
        run.complete("answer".to_string()).unwrap();
        store.finalize_run(&run).await.unwrap();

        let mut late = run.clone();
        late.final_response = Some("changed".to_string());
        store.finalize_run(&late).await.unwrap();

        let stored = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.state, RunState::Done);
        assert_eq!(stored.final_response.as_deref(), Some("answer"));
    }

    #[tokio::test]
    async fn test_finalize_unknown_run() {
        let store = InMemoryStore::new();
        let run = CoordinationRun::new("s1", CoordinationMode::Debate, vec!["a".to_string()], vec![])
            .unwrap();
        assert!(matches!(
            store.finalize_run(&run).await,
            Err(StoreError::NotFound { entity: "run", .. })
        ));
    }
}
