//! Debate coordination
//!
//! Three panelists state positions independently, then each responds to the
//! others' positions, then one synthesis call merges the final positions.
//! With a full panel a run makes exactly seven model calls. If every opening
//! fails, the next-ranked agent outside the panel answers alone.

use futures::future::join_all;
use tracing::{info, warn};

use super::{PreparedCall, ProtocolOutput, RunScope, RunTrace};
use crate::agents::context::{AgentTurn, ContextExtra};
use crate::agents::domain::{AgentInteraction, USER_SOURCE};
use crate::agents::error::{CoordinationError, CoordinationResult, InvocationError, InvocationErrorKind};

const OPENING_INSTRUCTION: &str =
    "State your position on the request from your own perspective. Be specific and commit to a recommendation.";

const REBUTTAL_INSTRUCTION: &str =
    "Other panelists have stated their positions. Respond to them, concede what is right, and restate your refined position.";

const SYNTHESIS_INSTRUCTION: &str =
    "Synthesize the panel's final positions into one balanced answer. Note where they agree and resolve where they differ.";

/// Three-agent, two-round debate
pub struct DebateProtocol;

impl DebateProtocol {
    pub async fn execute(scope: &RunScope<'_>, trace: &mut RunTrace) -> CoordinationResult<ProtocolOutput> {
        let panel: Vec<String> = scope.run.selected_agents.clone();
        info!(panel = ?panel, "Opening debate");

        let mut openings = Vec::with_capacity(panel.len());
        for role in &panel {
            openings.push((role.clone(), ContextExtra::default().instruction(OPENING_INSTRUCTION)));
        }
        let (mut round_one, last_error) = Self::round(scope, trace, 1, openings).await?;

        let primary = &scope.run.primary_agent;
        let substituted = round_one.is_empty();
        if substituted {
            let error = last_error.unwrap_or_else(|| {
                InvocationError::new(InvocationErrorKind::ProviderUnavailable, "no panelist answered")
            });
            let mut tried = panel.clone();
            let (role, content) = scope
                .substitute_for(
                    trace,
                    primary,
                    error,
                    &mut tried,
                    |agent| Self::opening(scope, &agent.role, 1),
                    |_| ContextExtra::default().instruction(OPENING_INSTRUCTION),
                )
                .await?;
            round_one.push((role, content));
        }

        // One voice left: nothing to debate or merge
        if let [(role, content)] = round_one.as_slice() {
            if role != primary && !substituted {
                scope.promote(trace, primary, &round_one);
            }
            info!(role = %role, "Debate collapsed to a single position");
            return Ok(ProtocolOutput::Answer {
                role: role.clone(),
                content: content.clone(),
            });
        }

        scope.ensure_active()?;
        let rebuttals = round_one
            .iter()
            .map(|(role, _)| {
                let mut extra = ContextExtra::default().instruction(REBUTTAL_INSTRUCTION);
                for (other, position) in round_one.iter().filter(|(other, _)| other != role) {
                    extra = extra.turn(AgentTurn::new(other.clone(), position.clone()));
                }
                (role.clone(), extra)
            })
            .collect();
        let (round_two, _) = Self::round(scope, trace, 2, rebuttals).await?;

        // A panelist whose rebuttal failed keeps its opening position
        let positions = round_one
            .into_iter()
            .map(|(role, opening)| {
                let refined = round_two
                    .iter()
                    .find(|(r, _)| *r == role)
                    .map(|(_, content)| content.clone());
                (role, refined.unwrap_or(opening))
            })
            .collect();

        Ok(ProtocolOutput::Positions(positions))
    }

    fn opening(scope: &RunScope<'_>, role: &str, round: u32) -> AgentInteraction {
        AgentInteraction::request(scope.run_id(), scope.session_id(), USER_SOURCE, role, scope.message)
            .with_metadata("round", round)
    }

    /// Run one round concurrently; failures are tolerated and reported
    async fn round(
        scope: &RunScope<'_>,
        trace: &mut RunTrace,
        round: u32,
        participants: Vec<(String, ContextExtra)>,
    ) -> CoordinationResult<(Vec<(String, String)>, Option<InvocationError>)> {
        let mut calls: Vec<PreparedCall> = Vec::with_capacity(participants.len());
        for (role, extra) in participants {
            let agent = scope.descriptor(&role)?;
            let opening = Self::opening(scope, &role, round);
            calls.push(scope.prepare(agent, extra, opening));
        }
        for call in &calls {
            scope.record(trace, call.opening.clone()).await;
        }

        let invoker = &scope.coordinator.invoker;
        let results = join_all(
            calls
                .iter()
                .map(|call| invoker.invoke(&call.agent, &call.context, scope.cancel)),
        )
        .await;
        scope.ensure_active()?;

        let mut positions = Vec::with_capacity(calls.len());
        let mut last_error = None;
        for (call, result) in calls.iter().zip(results) {
            match scope.settle(trace, call, result).await {
                Ok(content) => positions.push((call.agent.role.clone(), content)),
                Err(e) => {
                    scope.tolerate(trace, &call.agent.role, &format!("round_{}", round), e.clone())?;
                    last_error = Some(e);
                }
            }
        }
        Ok((positions, last_error))
    }

    /// Merge final positions into one answer.
    ///
    /// The highest-ranked panelist holding a position synthesizes; if it
    /// fails, the next ones take over within the substitute budget. Returns
    /// the answer and the role that wrote it.
    pub async fn synthesize(
        scope: &RunScope<'_>,
        trace: &mut RunTrace,
        positions: &[(String, String)],
    ) -> CoordinationResult<(String, String)> {
        let primary = &scope.run.primary_agent;
        let mut last_error = None;
        let mut attempts = 0u32;

        let budget = 1 + scope.engine().primary_retries as usize;
        for (role, _) in positions.iter().take(budget) {
            scope.ensure_active()?;
            let agent = scope.descriptor(role)?;
            let mut extra = ContextExtra::default().instruction(SYNTHESIS_INSTRUCTION);
            for (panelist, position) in positions {
                extra = extra.turn(AgentTurn::new(panelist.clone(), position.clone()));
            }
            let opening =
                AgentInteraction::request(scope.run_id(), scope.session_id(), USER_SOURCE, role, scope.message)
                    .with_metadata("phase", "synthesis");

            attempts += 1;
            match scope.call(trace, agent, extra, opening).await {
                Ok(answer) => {
                    if role != primary {
                        scope.promote(trace, primary, std::slice::from_ref(&(role.clone(), answer.clone())));
                    }
                    return Ok((answer, role.clone()));
                }
                Err(e) if e.kind == InvocationErrorKind::Cancelled => return Err(CoordinationError::Cancelled),
                Err(e) => {
                    warn!(role = %role, "Debate synthesis failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(CoordinationError::PrimaryFailed {
            role: scope.run.primary_agent.clone(),
            attempts,
            source: last_error.unwrap_or_else(|| {
                InvocationError::new(InvocationErrorKind::ProviderUnavailable, "empty debate panel")
            }),
        })
    }
}
