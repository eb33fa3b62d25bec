//! Session persistence
//!
//! Storage backends for messages, interaction logs and run records:
//! - In-memory (default, lost on restart)
//! - Database (SQLite/PostgreSQL)
//!
//! Every write is idempotent on the caller-supplied id, so a retried write
//! never duplicates a row. Sessions are append-only.

mod database;
mod in_memory;

pub use database::DatabaseStore;
pub use in_memory::InMemoryStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::agents::config::{PersistenceConfig, StoreBackend};
use crate::agents::domain::{AgentInteraction, CoordinationRun, Message};
use crate::agents::error::{StoreError, StoreResult};

/// Trait for session storage backends
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Backend name, for logs and health checks
    fn name(&self) -> &str;

    /// Append a message; a repeated id is a no-op
    async fn append_message(&self, message: &Message) -> StoreResult<()>;

    /// Append an interaction; a repeated id is a no-op
    async fn append_interaction(&self, interaction: &AgentInteraction) -> StoreResult<()>;

    /// Record a new run; a repeated id is a no-op
    async fn create_run(&self, run: &CoordinationRun) -> StoreResult<()>;

    /// Persist a run's terminal state. Runs already sealed are left untouched.
    async fn finalize_run(&self, run: &CoordinationRun) -> StoreResult<()>;

    /// The `limit` most recent messages of a session, oldest first
    async fn recent_messages(&self, session_id: &str, limit: usize) -> StoreResult<Vec<Message>>;

    /// Every message of a session, oldest first
    async fn messages(&self, session_id: &str) -> StoreResult<Vec<Message>>;

    /// The session's interaction log in append order
    async fn interactions(&self, session_id: &str) -> StoreResult<Vec<AgentInteraction>>;

    /// Load a run by id
    async fn get_run(&self, run_id: &str) -> StoreResult<Option<CoordinationRun>>;

    /// Check that the backend is reachable
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Create a session store from configuration
pub async fn create_store(config: &PersistenceConfig) -> StoreResult<Arc<dyn SessionStore>> {
    match config.backend {
        StoreBackend::InMemory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackend::Database => {
            let url = config.url.as_deref().ok_or_else(|| {
                StoreError::Connection("persistence.url is required for the database backend".to_string())
            })?;
            let store = DatabaseStore::connect(url, config.max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}
