//! Parallel coordination
//!
//! Every selected agent is invoked concurrently on its own copy of the same
//! context. No agent sees another's output. A failed primary is replaced by
//! the highest-ranked agent that answered, or else by the next-ranked agent
//! outside the selection.

use futures::future::join_all;
use tracing::info;

use super::{PreparedCall, ProtocolOutput, RunScope, RunTrace};
use crate::agents::context::ContextExtra;
use crate::agents::domain::{AgentInteraction, USER_SOURCE};
use crate::agents::error::CoordinationResult;

/// Concurrent, isolated agents
pub struct ParallelProtocol;

impl ParallelProtocol {
    pub async fn execute(scope: &RunScope<'_>, trace: &mut RunTrace) -> CoordinationResult<ProtocolOutput> {
        let run_id = scope.run_id();
        let session_id = scope.session_id();

        let mut calls: Vec<PreparedCall> = Vec::with_capacity(scope.run.selected_agents.len());
        for role in &scope.run.selected_agents {
            let agent = scope.descriptor(role)?;
            let opening = AgentInteraction::request(run_id, session_id, USER_SOURCE, role, scope.message);
            calls.push(scope.prepare(agent, ContextExtra::default(), opening));
        }
        for call in &calls {
            scope.record(trace, call.opening.clone()).await;
        }

        info!(agents = calls.len(), "Invoking agents in parallel");
        let invoker = &scope.coordinator.invoker;
        let results = join_all(
            calls
                .iter()
                .map(|call| invoker.invoke(&call.agent, &call.context, scope.cancel)),
        )
        .await;
        scope.ensure_active()?;

        let mut responses = Vec::with_capacity(calls.len());
        let mut primary_error = None;
        for (idx, (call, result)) in calls.iter().zip(results).enumerate() {
            match scope.settle(trace, call, result).await {
                Ok(content) => responses.push((call.agent.role.clone(), content)),
                Err(e) if idx == 0 => primary_error = Some(e),
                Err(e) => scope.tolerate(trace, &call.agent.role, "parallel", e)?,
            }
        }

        // The best answer that did arrive stands in for a failed primary
        if let Some(error) = primary_error {
            let primary = &scope.run.primary_agent;
            if !scope.promote(trace, primary, &responses) {
                let mut tried = scope.run.selected_agents.clone();
                let (role, content) = scope
                    .substitute_for(
                        trace,
                        primary,
                        error,
                        &mut tried,
                        |agent| AgentInteraction::request(run_id, session_id, USER_SOURCE, &agent.role, scope.message),
                        |_| ContextExtra::default(),
                    )
                    .await?;
                responses.push((role, content));
            }
        }

        Ok(ProtocolOutput::Responses(responses))
    }
}
