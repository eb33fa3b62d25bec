//! Coordination engine implementing CoordinationPort

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::adapters::metrics_handler::MetricsCollector;
use crate::agents::config::{ContextConfig, EngineConfig, RecorderConfig};
use crate::agents::context::ContextAssembler;
use crate::agents::domain::{
    AgentInfo, AgentInteraction, CoordinationPort, Message, RouteRequest, RouteResponse,
};
use crate::agents::error::{CoordinationError, CoordinationResult};
use crate::agents::invoker::ModelInvoker;
use crate::agents::llm::{ProviderSet, ScriptedProvider};
use crate::agents::orchestration::Coordinator;
use crate::agents::recorder::InteractionRecorder;
use crate::agents::registry::AgentRegistry;
use crate::agents::retrieval::{create_retriever, NoRetrieval, Retriever};
use crate::agents::store::{create_store, InMemoryStore, SessionStore};
use crate::config::Settings;

/// Provider name used when nothing is configured
pub const ECHO_PROVIDER: &str = "echo";

/// The multi-agent coordination engine
pub struct CoordinationEngine {
    coordinator: Coordinator,
    store: Arc<dyn SessionStore>,
}

impl CoordinationEngine {
    pub fn builder(registry: AgentRegistry, providers: ProviderSet) -> CoordinationEngineBuilder {
        CoordinationEngineBuilder::new(registry, providers)
    }

    /// Build the engine from loaded settings
    pub async fn from_settings(
        settings: &Settings,
        metrics: Arc<MetricsCollector>,
    ) -> anyhow::Result<Self> {
        let registry = if settings.agents.is_empty() {
            info!("No agents configured, using built-in roles");
            AgentRegistry::builtin()
        } else {
            AgentRegistry::from_configs(&settings.agents)?
        };

        let providers = if settings.providers.is_empty() {
            info!("No providers configured, agents answer through the echo provider");
            ProviderSet::single(ECHO_PROVIDER, Arc::new(ScriptedProvider::echo(ECHO_PROVIDER)))
        } else {
            let default = settings
                .default_provider
                .clone()
                .or_else(|| settings.providers.first().map(|p| p.name.clone()))
                .unwrap_or_default();
            ProviderSet::from_configs(&settings.providers, &default)
                .context("Failed to initialize LLM providers")?
        };

        let store = create_store(&settings.persistence)
            .await
            .context("Failed to initialize session store")?;
        let retriever = create_retriever(&settings.retrieval)?;

        info!(
            agents = registry.len(),
            store = store.name(),
            retriever = retriever.name(),
            default_provider = providers.default_name(),
            "Coordination engine ready"
        );

        Ok(Self::builder(registry, providers)
            .engine(settings.engine.clone())
            .context_config(settings.context.clone())
            .recorder(settings.recorder.clone())
            .store(store)
            .retriever(retriever)
            .metrics(metrics)
            .build()?)
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        self.coordinator.registry()
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
}

#[async_trait]
impl CoordinationPort for CoordinationEngine {
    async fn route_with_cancel(
        &self,
        request: RouteRequest,
        cancel: CancellationToken,
    ) -> CoordinationResult<RouteResponse> {
        if request.session_id.trim().is_empty() {
            return Err(CoordinationError::Configuration(
                "session_id must not be empty".to_string(),
            ));
        }
        self.coordinator.run(request, cancel).await
    }

    async fn list_agents(&self) -> anyhow::Result<Vec<AgentInfo>> {
        let default = self.coordinator.invoker().providers().default_name();
        Ok(self.registry().iter().map(|a| a.info(default)).collect())
    }

    async fn interactions(&self, session_id: &str) -> anyhow::Result<Vec<AgentInteraction>> {
        Ok(self.store.interactions(session_id).await?)
    }

    async fn messages(&self, session_id: &str) -> anyhow::Result<Vec<Message>> {
        Ok(self.store.messages(session_id).await?)
    }
}

/// Assembles a [`CoordinationEngine`] from its parts
pub struct CoordinationEngineBuilder {
    registry: AgentRegistry,
    providers: ProviderSet,
    engine: EngineConfig,
    context: ContextConfig,
    recorder: RecorderConfig,
    store: Option<Arc<dyn SessionStore>>,
    retriever: Option<Arc<dyn Retriever>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl CoordinationEngineBuilder {
    pub fn new(registry: AgentRegistry, providers: ProviderSet) -> Self {
        Self {
            registry,
            providers,
            engine: EngineConfig::default(),
            context: ContextConfig::default(),
            recorder: RecorderConfig::default(),
            store: None,
            retriever: None,
            metrics: None,
        }
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn context_config(mut self, context: ContextConfig) -> Self {
        self.context = context;
        self
    }

    pub fn recorder(mut self, recorder: RecorderConfig) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> anyhow::Result<CoordinationEngine> {
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(MetricsCollector::new()?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let retriever = self.retriever.unwrap_or_else(|| Arc::new(NoRetrieval));

        for agent in self.registry.iter() {
            if let Some(name) = &agent.provider {
                if !self.providers.contains(name) {
                    anyhow::bail!("Agent '{}' references unknown provider '{}'", agent.role, name);
                }
            }
        }

        let invoker = ModelInvoker::new(
            self.providers,
            Duration::from_secs(self.engine.invocation_timeout_secs),
            self.engine.max_tokens,
            metrics.clone(),
        );
        let recorder = InteractionRecorder::new(
            store.clone(),
            Duration::from_millis(self.recorder.write_timeout_ms),
            metrics.clone(),
        );
        let assembler = ContextAssembler::new(self.context, retriever);

        let coordinator = Coordinator::new(
            Arc::new(self.registry),
            self.engine,
            assembler,
            invoker,
            recorder,
            metrics,
        );

        Ok(CoordinationEngine { coordinator, store })
    }
}
