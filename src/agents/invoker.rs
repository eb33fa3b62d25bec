//! Model invoker
//!
//! One call to one agent's provider, bounded by a hard timeout and by the
//! run's cancellation token. The invoker never retries; the coordinator owns
//! retry policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapters::metrics_handler::MetricsCollector;
use crate::agents::context::PromptContext;
use crate::agents::error::{InvocationError, InvocationErrorKind};
use crate::agents::llm::{CompletionRequest, ProviderSet};
use crate::agents::registry::AgentDescriptor;

/// A successful model call
#[derive(Debug, Clone)]
pub struct Invocation {
    pub content: String,
    pub latency_ms: u64,
    pub model: String,
}

/// Calls agents' providers
#[derive(Clone)]
pub struct ModelInvoker {
    providers: ProviderSet,
    timeout: Duration,
    max_tokens: u32,
    metrics: Arc<MetricsCollector>,
}

impl ModelInvoker {
    pub fn new(
        providers: ProviderSet,
        timeout: Duration,
        max_tokens: u32,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            providers,
            timeout,
            max_tokens,
            metrics,
        }
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Invoke `agent` with `context`.
    ///
    /// Returns `Timeout` when the per-call timeout elapses and `Cancelled` when
    /// `cancel` fires first; the provider future is dropped in both cases.
    pub async fn invoke(
        &self,
        agent: &AgentDescriptor,
        context: &PromptContext,
        cancel: &CancellationToken,
    ) -> Result<Invocation, InvocationError> {
        let started = Instant::now();
        let result = self.call(agent, context, cancel).await;
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(_) => "ok".to_string(),
            Err(e) => e.kind.to_string(),
        };
        self.metrics
            .invocations_total
            .with_label_values(&[agent.role.as_str(), outcome.as_str()])
            .inc();
        self.metrics
            .invocation_duration
            .with_label_values(&[agent.role.as_str()])
            .observe(elapsed.as_secs_f64());

        match result {
            Ok((content, model)) => {
                debug!(role = %agent.role, latency_ms = elapsed.as_millis() as u64, "Invocation finished");
                Ok(Invocation {
                    content,
                    latency_ms: elapsed.as_millis() as u64,
                    model,
                })
            }
            Err(e) => {
                if e.kind != InvocationErrorKind::Cancelled {
                    warn!(role = %agent.role, kind = %e.kind, "Invocation failed: {}", e.message);
                }
                Err(e)
            }
        }
    }

    async fn call(
        &self,
        agent: &AgentDescriptor,
        context: &PromptContext,
        cancel: &CancellationToken,
    ) -> Result<(String, String), InvocationError> {
        if cancel.is_cancelled() {
            return Err(InvocationError::cancelled());
        }

        let provider = self.providers.resolve(agent.provider.as_deref())?;
        let request = CompletionRequest {
            messages: context.to_messages(),
            model: None,
            temperature: Some(agent.temperature),
            max_tokens: Some(self.max_tokens),
            stop: None,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InvocationError::cancelled()),
            result = tokio::time::timeout(self.timeout, provider.complete(request)) => match result {
                Ok(Ok(response)) => Ok((response.content, provider.model().to_string())),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(InvocationError::timeout(self.timeout.as_secs())),
            },
        }
    }
}
