//! Interaction recorder
//!
//! Append-only writes to the session store, each bounded by a write timeout.
//! A failed write is logged and counted but never fails the run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::adapters::metrics_handler::MetricsCollector;
use crate::agents::domain::{AgentInteraction, CoordinationRun, Degradation, Message};
use crate::agents::error::{StoreError, StoreResult};
use crate::agents::store::SessionStore;

#[derive(Clone)]
pub struct InteractionRecorder {
    store: Arc<dyn SessionStore>,
    write_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl InteractionRecorder {
    pub fn new(
        store: Arc<dyn SessionStore>,
        write_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            write_timeout,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Load the `limit` most recent messages of a session.
    ///
    /// The read shares the write budget; a slow or failing store yields an
    /// empty history so the run can still proceed.
    pub async fn load_history(&self, session_id: &str, limit: usize) -> Vec<Message> {
        match tokio::time::timeout(self.write_timeout, self.store.recent_messages(session_id, limit)).await {
            Ok(Ok(history)) => history,
            Ok(Err(e)) => {
                warn!(store = self.store.name(), session_id, "History read failed: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!(store = self.store.name(), session_id, "History read timed out");
                Vec::new()
            }
        }
    }

    /// Append one interaction to the log
    pub async fn record(&self, interaction: &AgentInteraction) -> Result<(), Degradation> {
        self.write("append_interaction", self.store.append_interaction(interaction))
            .await
    }

    pub async fn record_message(&self, message: &Message) -> Result<(), Degradation> {
        self.write("append_message", self.store.append_message(message))
            .await
    }

    pub async fn create_run(&self, run: &CoordinationRun) -> Result<(), Degradation> {
        self.write("create_run", self.store.create_run(run)).await
    }

    pub async fn finalize_run(&self, run: &CoordinationRun) -> Result<(), Degradation> {
        self.write("finalize_run", self.store.finalize_run(run))
            .await
    }

    async fn write<F>(&self, operation: &str, fut: F) -> Result<(), Degradation>
    where
        F: Future<Output = StoreResult<()>>,
    {
        let result = match tokio::time::timeout(self.write_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::WriteTimeout(self.write_timeout.as_millis() as u64)),
        };

        result.map_err(|e| {
            warn!(store = self.store.name(), operation, "Persistence write failed: {}", e);
            self.metrics.recorder_failures.inc();
            Degradation::PersistenceWriteFailed {
                operation: operation.to_string(),
            }
        })
    }
}
