//! Collaborative coordination
//!
//! The primary drafts an answer. Supporting agents it names in the draft, or
//! that it is configured to always consult, receive a focused consultation.
//! If any of them reply, the primary is re-invoked with their input and its
//! own draft to produce the final answer.

use tracing::{debug, info};

use super::{ProtocolOutput, RunScope, RunTrace};
use crate::agents::context::{AgentTurn, ContextExtra};
use crate::agents::domain::{AgentInteraction, USER_SOURCE};
use crate::agents::error::CoordinationResult;
use crate::agents::registry::AgentDescriptor;

const CONSULTATION_INSTRUCTION: &str =
    "Another agent is asking for your expertise. Answer the question briefly and only within your specialty.";

const REVISION_INSTRUCTION: &str =
    "Revise your draft using the input from the agents you consulted. Give the user one complete answer.";

/// Primary agent with on-demand consultations
pub struct CollaborativeProtocol;

impl CollaborativeProtocol {
    pub async fn execute(scope: &RunScope<'_>, trace: &mut RunTrace) -> CoordinationResult<ProtocolOutput> {
        let run_id = scope.run_id();
        let session_id = scope.session_id();

        let mut tried = Vec::new();
        let (primary_role, draft) = scope
            .call_with_substitutes(
                trace,
                &scope.run.primary_agent,
                &mut tried,
                |agent| AgentInteraction::request(run_id, session_id, USER_SOURCE, &agent.role, scope.message),
                |_| ContextExtra::default(),
            )
            .await?;
        let primary = scope.descriptor(&primary_role)?;

        let consulted = consultation_targets(scope, &primary, &draft, &tried);
        if consulted.is_empty() {
            debug!(role = %primary_role, "No consultation requested");
            return Ok(ProtocolOutput::Answer {
                role: primary_role,
                content: draft,
            });
        }

        info!(primary = %primary_role, consulted = ?consulted, "Consulting supporting agents");
        let mut replies = Vec::new();
        for role in &consulted {
            scope.ensure_active()?;
            let agent = scope.descriptor(role)?;
            let question = consultation_query(scope.message, &primary, &draft, &agent);
            let opening = AgentInteraction::consultation(run_id, session_id, &primary_role, role, &question);
            let extra = ContextExtra::default()
                .query(question.clone())
                .instruction(CONSULTATION_INSTRUCTION);

            match scope.call(trace, agent, extra, opening).await {
                Ok(reply) => replies.push(AgentTurn::new(role.clone(), reply)),
                Err(e) => scope.tolerate(trace, role, "consultation", e)?,
            }
        }

        if replies.is_empty() {
            return Ok(ProtocolOutput::Answer {
                role: primary_role,
                content: draft,
            });
        }

        scope.ensure_active()?;
        let mut extra = ContextExtra::default().instruction(REVISION_INSTRUCTION);
        extra = extra.turn(AgentTurn::new(format!("{} (draft)", primary_role), draft.clone()));
        for reply in replies {
            extra = extra.turn(reply);
        }
        let opening = AgentInteraction::request(run_id, session_id, USER_SOURCE, &primary_role, scope.message)
            .with_metadata("phase", "synthesis");

        match scope.call(trace, primary.clone(), extra, opening).await {
            Ok(answer) => Ok(ProtocolOutput::Answer {
                role: primary_role,
                content: answer,
            }),
            Err(e) => {
                scope.tolerate(trace, &primary_role, "synthesis", e)?;
                Ok(ProtocolOutput::Answer {
                    role: primary_role,
                    content: draft,
                })
            }
        }
    }
}

/// Supporting roles the primary asked for, in ranked order then configured order
fn consultation_targets(
    scope: &RunScope<'_>,
    primary: &AgentDescriptor,
    draft: &str,
    tried: &[String],
) -> Vec<String> {
    let registry = scope.coordinator.registry();
    let lowered = draft.to_lowercase();

    let mut candidates: Vec<&String> = scope.run.supporting_agents().iter().collect();
    for role in &primary.consults {
        if !candidates.contains(&role) {
            candidates.push(role);
        }
    }

    candidates
        .into_iter()
        .filter(|role| role.as_str() != primary.role && !tried.contains(*role))
        .filter_map(|role| registry.get(role))
        .filter(|agent| primary.consults.contains(&agent.role) || mentions(&lowered, agent))
        .map(|agent| agent.role.clone())
        .collect()
}

/// Whether a lowercased draft names an agent by role, `@role` or display name
fn mentions(lowered: &str, agent: &AgentDescriptor) -> bool {
    let role = agent.role.to_lowercase();
    let display = agent.display_name.to_lowercase();
    lowered.contains(&format!("@{}", role))
        || whole_word(lowered, &role)
        || (!display.is_empty() && whole_word(lowered, &display))
}

fn whole_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(idx, _)| {
        let end = idx + needle.len();
        haystack[..idx].chars().next_back().map_or(true, |c| !c.is_alphanumeric())
            && haystack[end..].chars().next().map_or(true, |c| !c.is_alphanumeric())
    })
}

/// The user's request plus the draft sentences that name the supporting agent
fn consultation_query(
    message: &str,
    primary: &AgentDescriptor,
    draft: &str,
    supporting: &AgentDescriptor,
) -> String {
    let mut query = format!(
        "{} is working on this request and needs your input:\n{}",
        primary.display_name, message
    );
    let asks: Vec<&str> = draft
        .split(|c| matches!(c, '.' | '!' | '?' | '\n'))
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty() && mentions(&sentence.to_lowercase(), supporting))
        .collect();
    if !asks.is_empty() {
        query.push_str("\n\nWhat they need from you:\n");
        query.push_str(&asks.join("\n"));
    }
    query
}
