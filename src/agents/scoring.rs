//! Confidence scoring and agent selection
//!
//! Scoring is a pure function of the descriptor, the message, the recent
//! history and the retrieval hit count. Ranking ties are broken by registry
//! declaration order, so identical inputs always produce the same ranking.

use crate::agents::config::EngineConfig;
use crate::agents::domain::{AgentScore, Author, Message};
use crate::agents::error::{CoordinationError, CoordinationResult};
use crate::agents::registry::{AgentDescriptor, AgentRegistry};

/// Number of agents in a debate panel
pub const DEBATE_PANEL_SIZE: usize = 3;

/// Tunables of the scoring function
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    pub keyword_increment: f32,
    pub retrieval_penalty: f32,
    pub continuity_bonus: f32,
}

impl From<&EngineConfig> for ScoringPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            keyword_increment: config.keyword_increment,
            retrieval_penalty: config.retrieval_penalty,
            continuity_bonus: config.continuity_bonus,
        }
    }
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Tunables of the selection step
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    pub supporting_agents: usize,
    pub min_confidence: f32,
    pub fallback_role: Option<String>,
}

impl From<&EngineConfig> for SelectionPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            supporting_agents: config.supporting_agents,
            min_confidence: config.min_confidence,
            fallback_role: config.fallback_role.clone(),
        }
    }
}

/// Agents chosen for a run, primary first
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub agents: Vec<String>,
    /// Nothing cleared the threshold and an agent was forced in
    pub fallback_used: bool,
}

impl Selection {
    pub fn primary(&self) -> &str {
        &self.agents[0]
    }
}

/// Whether `keyword` occurs in `haystack` at the start of a word.
///
/// Both inputs are expected lowercased. "build" matches "building" but not "rebuild".
pub fn keyword_matches(haystack: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    haystack.match_indices(keyword).any(|(pos, _)| {
        haystack[..pos]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

/// Scores agents against incoming messages
#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    policy: ScoringPolicy,
}

impl ConfidenceScorer {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    /// Score one agent. `retrieval_hits` is `None` when retrieval was not consulted.
    pub fn score(
        &self,
        agent: &AgentDescriptor,
        message: &str,
        history: &[Message],
        retrieval_hits: Option<usize>,
    ) -> f32 {
        let lowered = message.to_lowercase();
        let matched = agent
            .capability_keywords
            .iter()
            .filter(|keyword| keyword_matches(&lowered, keyword))
            .count();

        let mut score = agent.base_confidence + matched as f32 * self.policy.keyword_increment;

        let answered_last = history
            .iter()
            .rev()
            .find(|m| m.author == Author::Agent)
            .and_then(|m| m.agent_role.as_deref())
            == Some(agent.role.as_str());
        if answered_last {
            score += self.policy.continuity_bonus;
        }

        score = score.min(1.0);

        if agent.uses_retrieval && retrieval_hits == Some(0) {
            score = (score - self.policy.retrieval_penalty).max(agent.base_confidence / 2.0);
        }

        score.clamp(0.0, 1.0)
    }

    /// Score every registered agent, highest first, ties in declaration order
    pub fn rank(
        &self,
        registry: &AgentRegistry,
        message: &str,
        history: &[Message],
        retrieval_hits: Option<usize>,
    ) -> Vec<AgentScore> {
        let mut scored: Vec<(usize, AgentScore)> = registry
            .iter()
            .enumerate()
            .map(|(position, agent)| {
                (
                    position,
                    AgentScore {
                        role: agent.role.clone(),
                        score: self.score(agent, message, history, retrieval_hits),
                    },
                )
            })
            .collect();

        scored.sort_by(|(pa, a), (pb, b)| b.score.total_cmp(&a.score).then(pa.cmp(pb)));
        scored.into_iter().map(|(_, s)| s).collect()
    }
}

/// Pick the primary and supporting agents from a ranking.
///
/// The primary is the top-ranked agent; up to K following agents that clear
/// the threshold support it. When nothing clears the threshold the fallback
/// role is forced in, or the top-ranked agent if no fallback is registered.
pub fn select(
    ranking: &[AgentScore],
    registry: &AgentRegistry,
    policy: &SelectionPolicy,
) -> CoordinationResult<Selection> {
    if ranking.is_empty() {
        return Err(CoordinationError::RoutingExhausted);
    }

    let cleared: Vec<&AgentScore> = ranking
        .iter()
        .filter(|s| s.score >= policy.min_confidence)
        .collect();

    if cleared.is_empty() {
        let forced = policy
            .fallback_role
            .as_deref()
            .filter(|role| registry.contains(role))
            .unwrap_or(&ranking[0].role);
        return Ok(Selection {
            agents: vec![forced.to_string()],
            fallback_used: true,
        });
    }

    let agents = cleared
        .iter()
        .take(policy.supporting_agents + 1)
        .map(|s| s.role.clone())
        .collect();

    Ok(Selection {
        agents,
        fallback_used: false,
    })
}

/// Pick a debate panel: the top three of the ranking regardless of threshold
pub fn select_panel(ranking: &[AgentScore]) -> CoordinationResult<Selection> {
    if ranking.is_empty() {
        return Err(CoordinationError::RoutingExhausted);
    }
    Ok(Selection {
        agents: ranking
            .iter()
            .take(DEBATE_PANEL_SIZE)
            .map(|s| s.role.clone())
            .collect(),
        fallback_used: false,
    })
}
