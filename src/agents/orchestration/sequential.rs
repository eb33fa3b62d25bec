//! Sequential coordination
//!
//! Selected agents run one after another in ranked order. Each agent after
//! the first receives the previous output as a delegation.

use tracing::{debug, info};

use super::{ProtocolOutput, RunScope, RunTrace};
use crate::agents::context::{AgentTurn, ContextExtra};
use crate::agents::domain::{AgentInteraction, USER_SOURCE};
use crate::agents::error::CoordinationResult;

const DELEGATION_INSTRUCTION: &str =
    "Build on the previous agent's answer. Correct it where needed and add what only you can contribute.";

/// Sequential chain of agents
pub struct SequentialProtocol;

impl SequentialProtocol {
    pub async fn execute(scope: &RunScope<'_>, trace: &mut RunTrace) -> CoordinationResult<ProtocolOutput> {
        let run_id = scope.run_id().to_string();
        let session_id = scope.session_id().to_string();
        let message = scope.message.to_string();

        let mut tried = Vec::new();
        let (mut last_role, mut last_output) = scope
            .call_with_substitutes(
                trace,
                &scope.run.primary_agent,
                &mut tried,
                |agent| AgentInteraction::request(&run_id, &session_id, USER_SOURCE, &agent.role, &message),
                |_| ContextExtra::default(),
            )
            .await?;

        if let Some(stripped) = strip_marker(scope, &last_output) {
            info!(role = %last_role, "Chain ended early by completion marker");
            return Ok(ProtocolOutput::Answer {
                role: last_role,
                content: stripped,
            });
        }

        for role in scope.run.supporting_agents() {
            if tried.contains(role) {
                debug!(role = %role, "Skipping agent that already ran");
                continue;
            }
            scope.ensure_active()?;
            tried.push(role.clone());

            let agent = scope.descriptor(role)?;
            let opening = AgentInteraction::delegation(&run_id, &session_id, &last_role, role, &message);
            let extra = ContextExtra::default()
                .turn(AgentTurn::new(last_role.clone(), last_output.clone()))
                .instruction(DELEGATION_INSTRUCTION);

            match scope.call(trace, agent, extra, opening).await {
                Ok(output) => {
                    last_role = role.clone();
                    match strip_marker(scope, &output) {
                        Some(stripped) => {
                            info!(role = %role, "Chain ended early by completion marker");
                            last_output = stripped;
                            break;
                        }
                        None => last_output = output,
                    }
                }
                Err(e) => scope.tolerate(trace, role, "chain", e)?,
            }
        }

        Ok(ProtocolOutput::Answer {
            role: last_role,
            content: last_output,
        })
    }
}

/// The output without the completion marker, if the marker is present
fn strip_marker(scope: &RunScope<'_>, output: &str) -> Option<String> {
    let marker = scope.engine().completion_marker.as_deref()?;
    if marker.is_empty() || !output.contains(marker) {
        return None;
    }
    Some(output.replace(marker, "").trim().to_string())
}
