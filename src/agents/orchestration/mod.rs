//! Multi-agent coordination protocols
//!
//! Provides different ways to coordinate the agents selected for a run:
//! - Sequential: agents run in ranked order, each building on the previous answer
//! - Parallel: agents run concurrently on the same context, answers concatenated
//! - Collaborative: the primary consults supporting agents, then answers
//! - Debate: three agents, two rounds, one synthesis
//!
//! The [`Coordinator`] owns the run state machine
//! (`Routing -> Executing -> Synthesizing -> Done | Failed`), the run deadline
//! and cancellation. Protocols only decide who is called with what.

mod collaborative;
mod debate;
mod parallel;
mod sequential;

pub use collaborative::CollaborativeProtocol;
pub use debate::DebateProtocol;
pub use parallel::ParallelProtocol;
pub use sequential::SequentialProtocol;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::adapters::metrics_handler::MetricsCollector;
use crate::agents::config::{CoordinationMode, EngineConfig};
use crate::agents::context::{
    ContextAssembler, ContextExtra, PromptContext, RetrievalOutcome, SessionView,
};
use crate::agents::domain::{
    AgentInteraction, AgentScore, CoordinationRun, Degradation, Message, RouteRequest,
    RouteResponse, RunState,
};
use crate::agents::error::{
    CoordinationError, CoordinationResult, InvocationError, InvocationErrorKind,
};
use crate::agents::invoker::{Invocation, ModelInvoker};
use crate::agents::recorder::InteractionRecorder;
use crate::agents::registry::{AgentDescriptor, AgentRegistry};
use crate::agents::scoring::{select, select_panel, ConfidenceScorer, ScoringPolicy, SelectionPolicy};

/// Interactions and degradations collected while a run executes
#[derive(Debug, Default)]
pub struct RunTrace {
    pub interactions: Vec<AgentInteraction>,
    pub degraded: Vec<Degradation>,
}

impl RunTrace {
    pub fn degrade(&mut self, degradation: Degradation) {
        self.degraded.push(degradation);
    }
}

/// What a protocol hands to the synthesis step
#[derive(Debug, Clone)]
pub enum ProtocolOutput {
    /// A single answer, passed through
    Answer { role: String, content: String },
    /// Independent answers in ranked order, concatenated
    Responses(Vec<(String, String)>),
    /// Debate positions, merged by a synthesis call
    Positions(Vec<(String, String)>),
}

/// A context built ahead of its invocation
pub struct PreparedCall {
    pub agent: Arc<AgentDescriptor>,
    pub context: PromptContext,
    pub opening: AgentInteraction,
}

/// Everything a protocol needs for one run
pub struct RunScope<'a> {
    pub coordinator: &'a Coordinator,
    pub run: &'a CoordinationRun,
    pub history: &'a [Message],
    pub message: &'a str,
    pub hints: &'a Map<String, Value>,
    pub retrieval: &'a RetrievalOutcome,
    pub cancel: &'a CancellationToken,
}

impl<'a> RunScope<'a> {
    pub fn engine(&self) -> &EngineConfig {
        &self.coordinator.engine
    }

    pub fn run_id(&self) -> &str {
        &self.run.id
    }

    pub fn session_id(&self) -> &str {
        &self.run.session_id
    }

    pub fn descriptor(&self, role: &str) -> CoordinationResult<Arc<AgentDescriptor>> {
        self.coordinator
            .registry
            .get(role)
            .cloned()
            .ok_or_else(|| CoordinationError::Internal(format!("role '{}' is not registered", role)))
    }

    /// Stop scheduling further steps once the caller has cancelled
    pub fn ensure_active(&self) -> CoordinationResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CoordinationError::Cancelled);
        }
        Ok(())
    }

    /// Build a context for `agent` without invoking it
    pub fn prepare(
        &self,
        agent: Arc<AgentDescriptor>,
        extra: ContextExtra,
        opening: AgentInteraction,
    ) -> PreparedCall {
        let session = SessionView {
            session_id: self.session_id(),
            history: self.history,
            message: self.message,
            hints: self.hints,
            retrieval: self.retrieval,
        };
        let context = self.coordinator.assembler.build(&session, &agent, extra);
        let mut opening = opening;
        opening.extend_metadata(&context.metadata());
        PreparedCall {
            agent,
            context,
            opening,
        }
    }

    /// Append an interaction to the run log and the store
    pub async fn record(&self, trace: &mut RunTrace, interaction: AgentInteraction) {
        if let Err(degradation) = self.coordinator.recorder.record(&interaction).await {
            trace.degrade(degradation);
        }
        trace.interactions.push(interaction);
    }

    /// Record the outcome of a prepared call.
    ///
    /// Failed calls close their exchange with a `failure` entry carrying the
    /// error; cancelled calls are left open.
    pub async fn settle(
        &self,
        trace: &mut RunTrace,
        call: &PreparedCall,
        result: Result<Invocation, InvocationError>,
    ) -> Result<String, InvocationError> {
        match result {
            Ok(invocation) => {
                let response = call
                    .opening
                    .respond(&invocation.content)
                    .with_metadata("latency_ms", invocation.latency_ms)
                    .with_metadata("model", invocation.model.clone())
                    .with_metadata("retrieval_degraded", call.context.retrieval_degraded);
                self.record(trace, carry_step(call, response)).await;
                Ok(invocation.content)
            }
            Err(e) if e.kind == InvocationErrorKind::Cancelled => Err(e),
            Err(e) => {
                self.record(trace, carry_step(call, call.opening.fail(&e))).await;
                Err(e)
            }
        }
    }

    /// Build, record, invoke and settle one call
    pub async fn call(
        &self,
        trace: &mut RunTrace,
        agent: Arc<AgentDescriptor>,
        extra: ContextExtra,
        opening: AgentInteraction,
    ) -> Result<String, InvocationError> {
        let call = self.prepare(agent, extra, opening);
        self.record(trace, call.opening.clone()).await;
        let result = self
            .coordinator
            .invoker
            .invoke(&call.agent, &call.context, self.cancel)
            .await;
        self.settle(trace, &call, result).await
    }

    /// Next-ranked roles that have not been tried for this step
    pub fn substitutes(&self, tried: &[String]) -> Vec<String> {
        self.run
            .scores
            .iter()
            .map(|s| s.role.clone())
            .filter(|role| !tried.contains(role))
            .take(self.engine().primary_retries as usize)
            .collect()
    }

    /// Call `first`, substituting next-ranked agents on failure.
    ///
    /// `opening` builds the interaction for a role and `extra` its context
    /// additions. Returns the role that answered and its output.
    pub async fn call_with_substitutes<O, E>(
        &self,
        trace: &mut RunTrace,
        first: &str,
        tried: &mut Vec<String>,
        opening: O,
        extra: E,
    ) -> CoordinationResult<(String, String)>
    where
        O: Fn(&AgentDescriptor) -> AgentInteraction,
        E: Fn(&AgentDescriptor) -> ContextExtra,
    {
        if !tried.iter().any(|r| r == first) {
            tried.push(first.to_string());
        }
        let mut candidates = vec![first.to_string()];
        candidates.extend(self.substitutes(tried));
        self.attempt(trace, first, candidates, tried, 0, None, opening, extra)
            .await
    }

    /// Replace a primary whose call already failed with next-ranked agents
    pub async fn substitute_for<O, E>(
        &self,
        trace: &mut RunTrace,
        failed: &str,
        error: InvocationError,
        tried: &mut Vec<String>,
        opening: O,
        extra: E,
    ) -> CoordinationResult<(String, String)>
    where
        O: Fn(&AgentDescriptor) -> AgentInteraction,
        E: Fn(&AgentDescriptor) -> ContextExtra,
    {
        if error.kind == InvocationErrorKind::Cancelled {
            return Err(CoordinationError::Cancelled);
        }
        let candidates = self.substitutes(tried);
        self.attempt(trace, failed, candidates, tried, 1, Some(error), opening, extra)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt<O, E>(
        &self,
        trace: &mut RunTrace,
        primary: &str,
        candidates: Vec<String>,
        tried: &mut Vec<String>,
        mut attempts: u32,
        mut last_error: Option<InvocationError>,
        opening: O,
        extra: E,
    ) -> CoordinationResult<(String, String)>
    where
        O: Fn(&AgentDescriptor) -> AgentInteraction,
        E: Fn(&AgentDescriptor) -> ContextExtra,
    {
        for role in candidates {
            self.ensure_active()?;
            if !tried.contains(&role) {
                tried.push(role.clone());
            }
            let agent = self.descriptor(&role)?;
            attempts += 1;

            match self
                .call(trace, agent.clone(), extra(agent.as_ref()), opening(agent.as_ref()))
                .await
            {
                Ok(content) => {
                    if role != primary {
                        warn!(failed = %primary, substitute = %role, "Primary agent substituted");
                        trace.degrade(Degradation::PrimarySubstituted {
                            failed: primary.to_string(),
                            substitute: role.clone(),
                        });
                    }
                    return Ok((role, content));
                }
                Err(e) if e.kind == InvocationErrorKind::Cancelled => {
                    return Err(CoordinationError::Cancelled)
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(CoordinationError::PrimaryFailed {
            role: primary.to_string(),
            attempts,
            source: last_error.unwrap_or_else(|| {
                InvocationError::new(InvocationErrorKind::ProviderUnavailable, "no candidate agent")
            }),
        })
    }

    /// Hand a failed primary's place to the best answer already collected.
    ///
    /// `answers` is in ranked order. Returns false if it is empty.
    pub fn promote(&self, trace: &mut RunTrace, failed: &str, answers: &[(String, String)]) -> bool {
        match answers.first() {
            Some((role, _)) => {
                warn!(failed = %failed, substitute = %role, "Primary agent substituted");
                trace.degrade(Degradation::PrimarySubstituted {
                    failed: failed.to_string(),
                    substitute: role.clone(),
                });
                true
            }
            None => false,
        }
    }

    /// Note a non-primary failure and carry on
    pub fn tolerate(
        &self,
        trace: &mut RunTrace,
        role: &str,
        phase: &str,
        error: InvocationError,
    ) -> CoordinationResult<()> {
        if error.kind == InvocationErrorKind::Cancelled {
            return Err(CoordinationError::Cancelled);
        }
        trace.degrade(Degradation::AgentFailed {
            role: role.to_string(),
            phase: phase.to_string(),
            kind: error.kind,
        });
        Ok(())
    }
}

/// Runs coordination protocols over a registry of agents
pub struct Coordinator {
    registry: Arc<AgentRegistry>,
    scorer: ConfidenceScorer,
    selection: SelectionPolicy,
    assembler: ContextAssembler,
    invoker: ModelInvoker,
    recorder: InteractionRecorder,
    metrics: Arc<MetricsCollector>,
    engine: EngineConfig,
}

impl Coordinator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        engine: EngineConfig,
        assembler: ContextAssembler,
        invoker: ModelInvoker,
        recorder: InteractionRecorder,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            scorer: ConfidenceScorer::new(ScoringPolicy::from(&engine)),
            selection: SelectionPolicy::from(&engine),
            registry,
            assembler,
            invoker,
            recorder,
            metrics,
            engine,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn recorder(&self) -> &InteractionRecorder {
        &self.recorder
    }

    pub fn invoker(&self) -> &ModelInvoker {
        &self.invoker
    }

    /// Rank agents and pick the ones that take part in a run
    pub fn route(
        &self,
        mode: CoordinationMode,
        message: &str,
        history: &[Message],
        retrieval: &RetrievalOutcome,
    ) -> CoordinationResult<(Vec<String>, Vec<AgentScore>)> {
        let ranking = self
            .scorer
            .rank(&self.registry, message, history, retrieval.hits());
        let selection = match mode {
            CoordinationMode::Debate => select_panel(&ranking)?,
            _ => select(&ranking, &self.registry, &self.selection)?,
        };
        if selection.fallback_used {
            info!(role = selection.primary(), "No agent cleared the threshold, forcing fallback");
        }
        Ok((selection.agents, ranking))
    }

    /// Execute one coordination run end to end
    pub async fn run(
        &self,
        request: RouteRequest,
        cancel: CancellationToken,
    ) -> CoordinationResult<RouteResponse> {
        let mode = request.mode.unwrap_or(self.engine.default_mode);
        let span = info_span!("coordination_run", session_id = %request.session_id, mode = %mode);
        self.run_inner(request, mode, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: RouteRequest,
        mode: CoordinationMode,
        cancel: CancellationToken,
    ) -> CoordinationResult<RouteResponse> {
        let started = Instant::now();
        let mut trace = RunTrace::default();

        let history = self
            .recorder
            .load_history(&request.session_id, self.assembler.config().history_window)
            .await;

        let user_message = Message::user(&request.session_id, &request.message);
        if let Err(d) = self.recorder.record_message(&user_message).await {
            trace.degrade(d);
        }

        let retrieval = if self.registry.iter().any(|a| a.uses_retrieval) {
            self.assembler.retrieve(&request.message).await
        } else {
            RetrievalOutcome::default()
        };
        if retrieval.degraded {
            self.metrics.retrieval_degraded.inc();
            trace.degrade(Degradation::RetrievalDegraded {
                query: request.message.clone(),
            });
        }

        let (selected, scores) = match self.route(mode, &request.message, &history, &retrieval) {
            Ok(routed) => routed,
            Err(e) => {
                error!("Routing failed: {}", e);
                self.observe(mode, "routing_exhausted", started);
                return Err(e);
            }
        };
        let mut run = CoordinationRun::new(&request.session_id, mode, selected, scores)
            .ok_or(CoordinationError::RoutingExhausted)?;

        info!(
            run_id = %run.id,
            primary = %run.primary_agent,
            selected = ?run.selected_agents,
            "Routed message"
        );

        if let Err(d) = self.recorder.create_run(&run).await {
            trace.degrade(d);
        }
        run.transition(RunState::Executing)?;
        self.metrics.runs_in_flight.inc();

        let deadline = Duration::from_secs(self.engine.run_deadline_secs);
        let outcome = {
            let snapshot = run.clone();
            let scope = RunScope {
                coordinator: self,
                run: &snapshot,
                history: &history,
                message: &request.message,
                hints: &request.context_hints,
                retrieval: &retrieval,
                cancel: &cancel,
            };
            let drive = self.drive(&scope, &mut run, &mut trace);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(CoordinationError::Cancelled),
                result = tokio::time::timeout(deadline, drive) => result
                    .unwrap_or(Err(CoordinationError::DeadlineExceeded(self.engine.run_deadline_secs))),
            }
        };
        self.metrics.runs_in_flight.dec();

        for degradation in &trace.degraded {
            run.degrade(degradation.clone());
        }

        match outcome {
            Ok((final_response, answered_by)) => {
                run.complete(final_response.clone())?;

                let reply = Message::agent(&run.session_id, &answered_by, &final_response);
                if let Err(d) = self.recorder.record_message(&reply).await {
                    trace.degrade(d.clone());
                    run.degrade(d);
                }
                if let Err(d) = self.recorder.finalize_run(&run).await {
                    trace.degrade(d);
                }

                info!(
                    run_id = %run.id,
                    answered_by = %answered_by,
                    interactions = trace.interactions.len(),
                    degraded = trace.degraded.len(),
                    "Run finished"
                );
                self.observe(mode, "done", started);

                Ok(RouteResponse {
                    run_id: run.id.clone(),
                    session_id: run.session_id.clone(),
                    mode,
                    final_response,
                    primary_agent: run.primary_agent.clone(),
                    answered_by,
                    selected_agents: run.selected_agents.clone(),
                    interactions: trace.interactions,
                    degraded: trace.degraded,
                    execution_time_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(e) => {
                run.fail();
                if let Err(d) = self.recorder.finalize_run(&run).await {
                    trace.degrade(d);
                }
                error!(run_id = %run.id, "Run failed: {}", e);
                self.observe(mode, outcome_label(&e), started);
                Err(e)
            }
        }
    }

    /// Executing and Synthesizing, under the caller's deadline
    async fn drive(
        &self,
        scope: &RunScope<'_>,
        run: &mut CoordinationRun,
        trace: &mut RunTrace,
    ) -> CoordinationResult<(String, String)> {
        let output = match run.mode {
            CoordinationMode::Sequential => SequentialProtocol::execute(scope, trace).await?,
            CoordinationMode::Parallel => ParallelProtocol::execute(scope, trace).await?,
            CoordinationMode::Collaborative => CollaborativeProtocol::execute(scope, trace).await?,
            CoordinationMode::Debate => DebateProtocol::execute(scope, trace).await?,
        };

        run.transition(RunState::Synthesizing)?;

        match output {
            ProtocolOutput::Answer { role, content } => Ok((content, role)),
            ProtocolOutput::Responses(responses) => Ok(concatenate(scope, &responses)),
            ProtocolOutput::Positions(positions) => DebateProtocol::synthesize(scope, trace, &positions).await,
        }
    }

    fn observe(&self, mode: CoordinationMode, outcome: &str, started: Instant) {
        let mode = mode.to_string();
        self.metrics
            .runs_total
            .with_label_values(&[mode.as_str(), outcome])
            .inc();
        self.metrics
            .run_duration
            .with_label_values(&[mode.as_str()])
            .observe(started.elapsed().as_secs_f64());
    }
}

/// Copy the step markers of a call onto the entry that closes it
fn carry_step(call: &PreparedCall, mut closing: AgentInteraction) -> AgentInteraction {
    for key in ["round", "phase"] {
        if let Some(value) = call.opening.metadata.get(key) {
            closing.metadata.insert(key.to_string(), value.clone());
        }
    }
    closing
}

fn outcome_label(err: &CoordinationError) -> &'static str {
    match err {
        CoordinationError::RoutingExhausted => "routing_exhausted",
        CoordinationError::PrimaryFailed { .. } => "primary_failed",
        CoordinationError::DeadlineExceeded(_) => "deadline_exceeded",
        CoordinationError::Cancelled => "cancelled",
        _ => "error",
    }
}

/// Join independent answers under their agents' names
fn concatenate(scope: &RunScope<'_>, responses: &[(String, String)]) -> (String, String) {
    let answered_by = responses
        .first()
        .map(|(role, _)| role.clone())
        .unwrap_or_else(|| scope.run.primary_agent.clone());

    if let [(_, only)] = responses {
        return (only.clone(), answered_by);
    }

    let sections: Vec<String> = responses
        .iter()
        .map(|(role, content)| {
            let title = scope
                .descriptor(role)
                .map(|d| d.display_name.clone())
                .unwrap_or_else(|_| role.clone());
            format!("## {}\n{}", title, content)
        })
        .collect();
    (sections.join("\n\n"), answered_by)
}
