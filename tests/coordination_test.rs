use agora::agents::config::{AgentConfig, CoordinationMode, EngineConfig};
use agora::agents::domain::{
    unpaired_responses, AgentInteraction, Author, CoordinationPort, CoordinationRun, Degradation,
    InteractionKind, Message, RouteRequest, USER_SOURCE,
};
use agora::agents::error::{CoordinationError, InvocationErrorKind, RetrievalError, StoreError, StoreResult};
use agora::agents::llm::{ProviderSet, ScriptedProvider, ScriptedReply};
use agora::agents::retrieval::{Retriever, Snippet};
use agora::agents::store::{InMemoryStore, SessionStore};
use agora::agents::{AgentRegistry, CoordinationEngine};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ROLES: [&str; 4] = ["general", "research", "code", "rag"];

fn agent(role: &str, display_name: &str, keywords: &[&str], base: f32, retrieval: bool) -> AgentConfig {
    AgentConfig {
        role: role.to_string(),
        display_name: display_name.to_string(),
        system_prompt: format!("You are the {} agent for session {{{{ session_id }}}}.", role),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        base_confidence: base,
        temperature: 0.5,
        uses_retrieval: retrieval,
        consults: vec![],
        provider: Some(role.to_string()),
    }
}

fn agents() -> Vec<AgentConfig> {
    vec![
        agent("general", "General Assistant", &["help"], 0.3, false),
        agent("research", "Research Analyst", &["market", "research", "competitor"], 0.2, false),
        agent("code", "Software Engineer", &["build", "scalable", "app"], 0.2, false),
        agent("rag", "Knowledge Specialist", &["document", "policy"], 0.2, true),
    ]
}

struct Harness {
    engine: CoordinationEngine,
    providers: HashMap<String, Arc<ScriptedProvider>>,
    store: Arc<InMemoryStore>,
}

impl Harness {
    fn provider(&self, role: &str) -> &Arc<ScriptedProvider> {
        &self.providers[role]
    }

    async fn total_calls(&self) -> usize {
        let mut total = 0;
        for provider in self.providers.values() {
            total += provider.call_count().await;
        }
        total
    }

    /// Text of the final user turn of every request `role` received
    async fn prompts(&self, role: &str) -> Vec<String> {
        self.provider(role)
            .requests()
            .await
            .iter()
            .map(|r| r.last_user_message().unwrap_or_default().to_string())
            .collect()
    }
}

struct HarnessBuilder {
    agents: Vec<AgentConfig>,
    scripts: HashMap<String, ScriptedProvider>,
    engine: EngineConfig,
    store: Option<Arc<dyn SessionStore>>,
    retriever: Option<Arc<dyn Retriever>>,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            agents: agents(),
            scripts: HashMap::new(),
            engine: EngineConfig::default(),
            store: None,
            retriever: None,
        }
    }

    fn script(mut self, role: &str, replies: Vec<ScriptedReply>) -> Self {
        self.scripts
            .insert(role.to_string(), ScriptedProvider::scripted(role, replies));
        self
    }

    fn always(mut self, role: &str, reply: ScriptedReply) -> Self {
        self.scripts
            .insert(role.to_string(), ScriptedProvider::always(role, reply));
        self
    }

    fn engine(mut self, f: impl FnOnce(&mut EngineConfig)) -> Self {
        f(&mut self.engine);
        self
    }

    fn agents(mut self, agents: Vec<AgentConfig>) -> Self {
        self.agents = agents;
        self
    }

    fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    fn build(mut self) -> Harness {
        let mut providers = HashMap::new();
        for config in &self.agents {
            let provider = self
                .scripts
                .remove(&config.role)
                .unwrap_or_else(|| ScriptedProvider::echo(&config.role));
            providers.insert(config.role.clone(), Arc::new(provider));
        }

        let default = self.agents[0].role.clone();
        let mut set = ProviderSet::single(default.clone(), providers[&default].clone());
        for (name, provider) in &providers {
            set = set.with(name.clone(), provider.clone());
        }

        let store = Arc::new(InMemoryStore::new());
        let registry = AgentRegistry::from_configs(&self.agents).unwrap();
        let mut builder = CoordinationEngine::builder(registry, set)
            .engine(self.engine)
            .store(self.store.unwrap_or_else(|| store.clone()));
        if let Some(retriever) = self.retriever {
            builder = builder.retriever(retriever);
        }

        Harness {
            engine: builder.build().unwrap(),
            providers,
            store,
        }
    }
}

fn kinds(log: &[AgentInteraction]) -> Vec<(InteractionKind, String, String)> {
    log.iter()
        .map(|i| (i.kind, i.source_agent.clone(), i.target_agent.clone()))
        .collect()
}

fn edge(kind: InteractionKind, source: &str, target: &str) -> (InteractionKind, String, String) {
    (kind, source.to_string(), target.to_string())
}

// ============================================================================
// Collaborative
// ============================================================================

#[tokio::test]
async fn test_collaborative_consults_mentioned_agent() {
    let harness = HarnessBuilder::new()
        .script(
            "code",
            vec![
                ScriptedReply::text("Draft: a service mesh. We should ask research for the market size."),
                ScriptedReply::text("Final: build it on a service mesh, the market is about 4B."),
            ],
        )
        .script("research", vec![ScriptedReply::text("The market is about 4B.")])
        .build();

    let response = harness
        .engine
        .route(RouteRequest::new("s1", "Research the market and build a scalable app"))
        .await
        .unwrap();

    assert_eq!(response.mode, CoordinationMode::Collaborative);
    assert_eq!(response.primary_agent, "code");
    assert_eq!(response.answered_by, "code");
    assert_eq!(response.selected_agents, vec!["code", "research", "general"]);
    assert_eq!(
        response.final_response,
        "Final: build it on a service mesh, the market is about 4B."
    );
    assert!(response.degraded.is_empty());

    assert_eq!(
        kinds(&response.interactions),
        vec![
            edge(InteractionKind::Request, USER_SOURCE, "code"),
            edge(InteractionKind::Response, USER_SOURCE, "code"),
            edge(InteractionKind::Consultation, "code", "research"),
            edge(InteractionKind::Response, "code", "research"),
            edge(InteractionKind::Request, USER_SOURCE, "code"),
            edge(InteractionKind::Response, USER_SOURCE, "code"),
        ]
    );
    assert!(unpaired_responses(&response.interactions).is_empty());

    // general was selected but never mentioned
    assert_eq!(harness.provider("general").call_count().await, 0);

    // the revision sees both the draft and the consultation reply
    let code_prompts = harness.prompts("code").await;
    assert_eq!(code_prompts.len(), 2);
    assert!(code_prompts[1].contains("Draft: a service mesh"));
    assert!(code_prompts[1].contains("The market is about 4B."));

    // the consultation carries a focused query, not the raw message only
    let research_prompts = harness.prompts("research").await;
    assert!(research_prompts[0].contains("Software Engineer is working on this request"));
    assert!(research_prompts[0].contains("We should ask research for the market size"));
    assert!(!research_prompts[0].contains("Draft: a service mesh"));
}

#[tokio::test]
async fn test_collaborative_without_mentions_is_single_call() {
    let harness = HarnessBuilder::new()
        .script("code", vec![ScriptedReply::text("Use a queue.")])
        .build();

    let response = harness
        .engine
        .route(RouteRequest::new("s1", "build a scalable app"))
        .await
        .unwrap();

    assert_eq!(response.final_response, "Use a queue.");
    assert_eq!(harness.total_calls().await, 1);
    assert_eq!(response.interactions.len(), 2);
}

#[tokio::test]
async fn test_collaborative_declared_consults() {
    let mut configs = agents();
    configs[2].consults = vec!["rag".to_string()];

    let harness = HarnessBuilder::new()
        .agents(configs)
        .script("code", vec![ScriptedReply::text("draft"), ScriptedReply::text("final")])
        .script("rag", vec![ScriptedReply::text("policy says no")])
        .build();

    let response = harness
        .engine
        .route(RouteRequest::new("s1", "build a scalable app"))
        .await
        .unwrap();

    assert_eq!(response.final_response, "final");
    assert_eq!(harness.provider("rag").call_count().await, 1);
    assert!(response
        .interactions
        .iter()
        .any(|i| i.kind == InteractionKind::Consultation && i.target_agent == "rag"));
}

#[tokio::test]
async fn test_collaborative_supporting_failure_degrades() {
    let harness = HarnessBuilder::new()
        .script(
            "code",
            vec![ScriptedReply::text("Let me check with research first.")],
        )
        .always("research", ScriptedReply::Unavailable("overloaded".to_string()))
        .build();

    let response = harness
        .engine
        .route(RouteRequest::new("s1", "research the market and build a scalable app"))
        .await
        .unwrap();

    // no reply arrived, so the draft stands and no revision call is made
    assert_eq!(response.final_response, "Let me check with research first.");
    assert_eq!(harness.provider("code").call_count().await, 1);
    assert!(response.degraded.contains(&Degradation::AgentFailed {
        role: "research".to_string(),
        phase: "consultation".to_string(),
        kind: InvocationErrorKind::ProviderUnavailable,
    }));
    assert!(unpaired_responses(&response.interactions).is_empty());
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_total_outage_fails_after_substitution() {
    let mut harness = HarnessBuilder::new();
    for role in ROLES {
        harness = harness.always(role, ScriptedReply::Unavailable("down".to_string()));
    }
    let harness = harness.build();

    let err = harness
        .engine
        .route(RouteRequest::new("s1", "research the market and build a scalable app"))
        .await
        .unwrap_err();

    match err {
        CoordinationError::PrimaryFailed { role, attempts, source } => {
            assert_eq!(role, "code");
            assert_eq!(attempts, 2);
            assert_eq!(source.kind, InvocationErrorKind::ProviderUnavailable);
        }
        other => panic!("expected PrimaryFailed, got {:?}", other),
    }

    // primary plus one substitute, nothing else
    assert_eq!(harness.total_calls().await, 2);
    assert_eq!(harness.provider("code").call_count().await, 1);
    assert_eq!(harness.provider("research").call_count().await, 1);

    // only the user's turn was persisted
    let messages = harness.store.messages("s1").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].author, Author::User);

    // each failed call is closed by a failure entry carrying the error
    let log = harness.store.interactions("s1").await.unwrap();
    assert_eq!(
        kinds(&log),
        vec![
            edge(InteractionKind::Request, USER_SOURCE, "code"),
            edge(InteractionKind::Failure, USER_SOURCE, "code"),
            edge(InteractionKind::Request, USER_SOURCE, "research"),
            edge(InteractionKind::Failure, USER_SOURCE, "research"),
        ]
    );
    for failure in log.iter().filter(|i| i.kind == InteractionKind::Failure) {
        assert_eq!(failure.metadata["error_kind"], "provider_unavailable");
        assert!(failure.response_snapshot.is_none());
    }
    assert!(unpaired_responses(&log).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_primary_timeout_uses_substitute() {
    let harness = HarnessBuilder::new()
        .engine(|e| e.invocation_timeout_secs = 1)
        .always(
            "code",
            ScriptedReply::delayed(Duration::from_secs(30), ScriptedReply::text("too late")),
        )
        .script("research", vec![ScriptedReply::text("backup answer")])
        .build();

    let response = harness
        .engine
        .route(RouteRequest::new("s1", "research the market and build a scalable app"))
        .await
        .unwrap();

    assert_eq!(response.primary_agent, "code");
    assert_eq!(response.answered_by, "research");
    assert_eq!(response.final_response, "backup answer");
    assert!(response.degraded.contains(&Degradation::PrimarySubstituted {
        failed: "code".to_string(),
        substitute: "research".to_string(),
    }));
    assert!(unpaired_responses(&response.interactions).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_run() {
    let harness = HarnessBuilder::new()
        .always(
            "code",
            ScriptedReply::delayed(Duration::from_secs(10), ScriptedReply::text("slow")),
        )
        .build();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = harness
        .engine
        .route_with_cancel(RouteRequest::new("s1", "build a scalable app"), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Cancelled));

    // no agent turn is written for a cancelled run
    let messages = harness.store.messages("s1").await.unwrap();
    assert_eq!(messages.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline() {
    let harness = HarnessBuilder::new()
        .engine(|e| e.run_deadline_secs = 2)
        .always(
            "code",
            ScriptedReply::delayed(Duration::from_secs(20), ScriptedReply::text("slow")),
        )
        .build();

    let err = harness
        .engine
        .route(RouteRequest::new("s1", "build a scalable app"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinationError::DeadlineExceeded(2)));
}

// ============================================================================
// Parallel
// ============================================================================

#[tokio::test]
async fn test_parallel_isolation_and_concatenation() {
    let harness = HarnessBuilder::new()
        .always("code", ScriptedReply::text("CODE-ANSWER"))
        .always("research", ScriptedReply::text("RESEARCH-ANSWER"))
        .always("general", ScriptedReply::text("GENERAL-ANSWER"))
        .build();

    let response = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Parallel),
        )
        .await
        .unwrap();

    assert_eq!(harness.total_calls().await, 3);
    for (role, others) in [
        ("code", ["RESEARCH-ANSWER", "GENERAL-ANSWER"]),
        ("research", ["CODE-ANSWER", "GENERAL-ANSWER"]),
        ("general", ["CODE-ANSWER", "RESEARCH-ANSWER"]),
    ] {
        for request in harness.provider(role).requests().await {
            for message in &request.messages {
                for other in others {
                    assert!(!message.content.contains(other), "{} saw {}", role, other);
                }
            }
        }
    }

    // sections follow ranked order, headed by display names
    let code_at = response.final_response.find("## Software Engineer").unwrap();
    let research_at = response.final_response.find("## Research Analyst").unwrap();
    let general_at = response.final_response.find("## General Assistant").unwrap();
    assert!(code_at < research_at && research_at < general_at);
    assert!(response.final_response.contains("CODE-ANSWER"));
    assert!(unpaired_responses(&response.interactions).is_empty());
}

#[tokio::test]
async fn test_parallel_supporting_failure_is_omitted() {
    let harness = HarnessBuilder::new()
        .always("code", ScriptedReply::text("CODE-ANSWER"))
        .always("research", ScriptedReply::Error {
            status: 400,
            message: "bad prompt".to_string(),
        })
        .always("general", ScriptedReply::text("GENERAL-ANSWER"))
        .build();

    let response = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Parallel),
        )
        .await
        .unwrap();

    assert!(!response.final_response.contains("Research Analyst"));
    assert!(response.final_response.contains("GENERAL-ANSWER"));
    assert!(response.degraded.contains(&Degradation::AgentFailed {
        role: "research".to_string(),
        phase: "parallel".to_string(),
        kind: InvocationErrorKind::InvalidRequest,
    }));
}

#[tokio::test]
async fn test_parallel_primary_failure_promotes_best_answer() {
    let harness = HarnessBuilder::new()
        .agents(agents().into_iter().filter(|a| a.role != "rag").collect())
        .always("code", ScriptedReply::Unavailable("down".to_string()))
        .always("research", ScriptedReply::text("RESEARCH-OK"))
        .always("general", ScriptedReply::text("GENERAL-OK"))
        .build();

    let response = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Parallel),
        )
        .await
        .unwrap();

    // every agent was selected, so no one is left outside the selection
    assert_eq!(response.selected_agents, vec!["code", "research", "general"]);
    assert_eq!(response.primary_agent, "code");
    assert_eq!(response.answered_by, "research");
    assert_eq!(harness.total_calls().await, 3);
    assert!(response.final_response.contains("RESEARCH-OK"));
    assert!(response.final_response.contains("GENERAL-OK"));
    assert!(!response.final_response.contains("## Software Engineer"));
    assert!(response.degraded.contains(&Degradation::PrimarySubstituted {
        failed: "code".to_string(),
        substitute: "research".to_string(),
    }));
    assert!(unpaired_responses(&response.interactions).is_empty());
}

#[tokio::test]
async fn test_parallel_selection_outage_uses_unselected_agent() {
    let harness = HarnessBuilder::new()
        .always("code", ScriptedReply::Unavailable("down".to_string()))
        .always("research", ScriptedReply::Unavailable("down".to_string()))
        .always("general", ScriptedReply::Unavailable("down".to_string()))
        .always("rag", ScriptedReply::text("RAG-OK"))
        .build();

    let response = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Parallel),
        )
        .await
        .unwrap();

    assert_eq!(response.answered_by, "rag");
    assert_eq!(response.final_response, "RAG-OK");
    assert_eq!(harness.total_calls().await, 4);
    assert!(response.degraded.contains(&Degradation::PrimarySubstituted {
        failed: "code".to_string(),
        substitute: "rag".to_string(),
    }));
    for role in ["research", "general"] {
        assert!(response.degraded.contains(&Degradation::AgentFailed {
            role: role.to_string(),
            phase: "parallel".to_string(),
            kind: InvocationErrorKind::ProviderUnavailable,
        }));
    }
}

// ============================================================================
// Sequential
// ============================================================================

#[tokio::test]
async fn test_sequential_chain_passes_output_forward() {
    let harness = HarnessBuilder::new()
        .always("code", ScriptedReply::text("step one"))
        .always("research", ScriptedReply::text("step two"))
        .always("general", ScriptedReply::text("step three"))
        .build();

    let response = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Sequential),
        )
        .await
        .unwrap();

    assert_eq!(response.final_response, "step three");
    assert_eq!(response.answered_by, "general");
    assert_eq!(
        kinds(&response.interactions),
        vec![
            edge(InteractionKind::Request, USER_SOURCE, "code"),
            edge(InteractionKind::Response, USER_SOURCE, "code"),
            edge(InteractionKind::Delegation, "code", "research"),
            edge(InteractionKind::Response, "code", "research"),
            edge(InteractionKind::Delegation, "research", "general"),
            edge(InteractionKind::Response, "research", "general"),
        ]
    );
    assert!(harness.prompts("research").await[0].contains("step one"));
    assert!(harness.prompts("general").await[0].contains("step two"));
    assert!(!harness.prompts("general").await[0].contains("step one"));
}

#[tokio::test]
async fn test_sequential_completion_marker_stops_chain() {
    let harness = HarnessBuilder::new()
        .engine(|e| e.completion_marker = Some("[DONE]".to_string()))
        .always("code", ScriptedReply::text("all settled [DONE]"))
        .build();

    let response = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Sequential),
        )
        .await
        .unwrap();

    assert_eq!(response.final_response, "all settled");
    assert_eq!(harness.total_calls().await, 1);
}

#[tokio::test]
async fn test_sequential_primary_failure_uses_substitute() {
    let harness = HarnessBuilder::new()
        .always("code", ScriptedReply::Unavailable("down".to_string()))
        .always("research", ScriptedReply::text("research step"))
        .always("general", ScriptedReply::text("general step"))
        .build();

    let response = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Sequential),
        )
        .await
        .unwrap();

    assert_eq!(response.final_response, "general step");
    assert_eq!(response.answered_by, "general");
    assert_eq!(harness.total_calls().await, 3);
    assert!(response.degraded.contains(&Degradation::PrimarySubstituted {
        failed: "code".to_string(),
        substitute: "research".to_string(),
    }));
    assert_eq!(
        kinds(&response.interactions),
        vec![
            edge(InteractionKind::Request, USER_SOURCE, "code"),
            edge(InteractionKind::Failure, USER_SOURCE, "code"),
            edge(InteractionKind::Request, USER_SOURCE, "research"),
            edge(InteractionKind::Response, USER_SOURCE, "research"),
            edge(InteractionKind::Delegation, "research", "general"),
            edge(InteractionKind::Response, "research", "general"),
        ]
    );
    // the substitute's answer is what gets handed on
    assert!(harness.prompts("general").await[0].contains("research step"));
}

// ============================================================================
// Debate
// ============================================================================

#[tokio::test]
async fn test_debate_makes_exactly_seven_calls() {
    let harness = HarnessBuilder::new()
        .script(
            "code",
            vec![
                ScriptedReply::text("code opening"),
                ScriptedReply::text("code rebuttal"),
                ScriptedReply::text("balanced synthesis"),
            ],
        )
        .script(
            "research",
            vec![
                ScriptedReply::text("research opening"),
                ScriptedReply::text("research rebuttal"),
            ],
        )
        .script(
            "general",
            vec![
                ScriptedReply::text("general opening"),
                ScriptedReply::text("general rebuttal"),
            ],
        )
        .build();

    let response = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Debate),
        )
        .await
        .unwrap();

    assert_eq!(response.selected_agents, vec!["code", "research", "general"]);
    assert_eq!(harness.total_calls().await, 7);
    assert_eq!(response.final_response, "balanced synthesis");
    assert_eq!(response.interactions.len(), 14);
    assert!(unpaired_responses(&response.interactions).is_empty());

    // round two sees the others' openings but not its own
    let research_prompts = harness.prompts("research").await;
    assert!(research_prompts[1].contains("code opening"));
    assert!(research_prompts[1].contains("general opening"));
    assert!(!research_prompts[1].contains("research opening"));

    // synthesis merges the rebuttals
    let synthesis = &harness.prompts("code").await[2];
    for position in ["code rebuttal", "research rebuttal", "general rebuttal"] {
        assert!(synthesis.contains(position));
    }

    let rounds: Vec<_> = response
        .interactions
        .iter()
        .filter(|i| i.kind == InteractionKind::Request)
        .map(|i| {
            i.metadata
                .get("round")
                .and_then(|r| r.as_u64())
                .map(|r| r.to_string())
                .or_else(|| i.metadata.get("phase").and_then(|p| p.as_str()).map(String::from))
                .unwrap_or_default()
        })
        .collect();
    assert_eq!(rounds, vec!["1", "1", "1", "2", "2", "2", "synthesis"]);
}

#[tokio::test]
async fn test_debate_panel_failure_keeps_going() {
    let harness = HarnessBuilder::new()
        .always("general", ScriptedReply::Unavailable("down".to_string()))
        .build();

    let response = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Debate),
        )
        .await
        .unwrap();

    // general fails in round one and sits out round two
    assert_eq!(harness.provider("general").call_count().await, 1);
    assert_eq!(harness.total_calls().await, 6);
    assert!(response.degraded.iter().any(|d| matches!(
        d,
        Degradation::AgentFailed { role, phase, .. } if role == "general" && phase == "round_1"
    )));
}

#[tokio::test]
async fn test_debate_total_outage_tries_substitute_outside_panel() {
    let mut harness = HarnessBuilder::new();
    for role in ROLES {
        harness = harness.always(role, ScriptedReply::Unavailable("down".to_string()));
    }
    let harness = harness.build();

    let err = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Debate),
        )
        .await
        .unwrap_err();

    match err {
        CoordinationError::PrimaryFailed { role, attempts, .. } => {
            assert_eq!(role, "code");
            assert_eq!(attempts, 2);
        }
        other => panic!("expected PrimaryFailed, got {:?}", other),
    }
    // three openings plus one substitute from outside the panel
    assert_eq!(harness.total_calls().await, 4);
    assert_eq!(harness.provider("rag").call_count().await, 1);
}

#[tokio::test]
async fn test_debate_panel_outage_answered_by_substitute() {
    let harness = HarnessBuilder::new()
        .always("code", ScriptedReply::Unavailable("down".to_string()))
        .always("research", ScriptedReply::Unavailable("down".to_string()))
        .always("general", ScriptedReply::Unavailable("down".to_string()))
        .always("rag", ScriptedReply::text("RAG-POSITION"))
        .build();

    let response = harness
        .engine
        .route(
            RouteRequest::new("s1", "Research the market and build a scalable app")
                .with_mode(CoordinationMode::Debate),
        )
        .await
        .unwrap();

    assert_eq!(response.final_response, "RAG-POSITION");
    assert_eq!(response.answered_by, "rag");
    assert_eq!(harness.total_calls().await, 4);
    assert!(response.degraded.contains(&Degradation::PrimarySubstituted {
        failed: "code".to_string(),
        substitute: "rag".to_string(),
    }));
    let substitute = response
        .interactions
        .iter()
        .find(|i| i.kind == InteractionKind::Request && i.target_agent == "rag")
        .unwrap();
    assert_eq!(substitute.metadata["round"], serde_json::json!(1));
    assert!(unpaired_responses(&response.interactions).is_empty());
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_gibberish_still_selects_an_agent() {
    let harness = HarnessBuilder::new().build();

    for message in ["", "   ", "xqzv blorf", "!!!???", "ñandú 日本語"] {
        let response = harness
            .engine
            .route(RouteRequest::new("s1", message))
            .await
            .unwrap();
        assert!(!response.selected_agents.is_empty());
        assert_eq!(response.primary_agent, "general");
    }
}

#[tokio::test]
async fn test_fallback_to_top_ranked_without_general() {
    let configs: Vec<_> = agents().into_iter().filter(|a| a.role != "general").collect();
    let harness = HarnessBuilder::new().agents(configs).build();

    let response = harness
        .engine
        .route(RouteRequest::new("s1", "xqzv"))
        .await
        .unwrap();
    assert_eq!(response.selected_agents, vec!["research"]);
}

#[tokio::test]
async fn test_continuity_bonus_keeps_previous_agent() {
    let harness = HarnessBuilder::new()
        .engine(|e| e.continuity_bonus = 0.5)
        .build();

    let first = harness
        .engine
        .route(RouteRequest::new("s1", "build a scalable app"))
        .await
        .unwrap();
    assert_eq!(first.primary_agent, "code");

    let second = harness
        .engine
        .route(RouteRequest::new("s1", "and what else?"))
        .await
        .unwrap();
    assert_eq!(second.primary_agent, "code");
}

// ============================================================================
// Persistence and context
// ============================================================================

#[tokio::test]
async fn test_session_history_and_isolation() {
    let harness = HarnessBuilder::new()
        .script("code", vec![ScriptedReply::text("first answer"), ScriptedReply::text("second answer")])
        .build();

    harness
        .engine
        .route(RouteRequest::new("s1", "build a scalable app"))
        .await
        .unwrap();
    harness
        .engine
        .route(RouteRequest::new("s1", "now build the api app"))
        .await
        .unwrap();
    harness
        .engine
        .route(RouteRequest::new("s2", "xqzv"))
        .await
        .unwrap();

    let messages = harness.store.messages("s1").await.unwrap();
    let authors: Vec<_> = messages.iter().map(|m| m.author).collect();
    assert_eq!(authors, vec![Author::User, Author::Agent, Author::User, Author::Agent]);
    assert_eq!(messages[1].agent_role.as_deref(), Some("code"));

    // the second call carried the first exchange as history
    let requests = harness.provider("code").requests().await;
    assert!(requests[1].messages.iter().any(|m| m.content == "first answer"));

    let s1_log = harness.engine.interactions("s1").await.unwrap();
    let s2_log = harness.engine.interactions("s2").await.unwrap();
    assert!(s1_log.iter().all(|i| i.session_id == "s1"));
    assert!(s2_log.iter().all(|i| i.session_id == "s2"));
    assert!(unpaired_responses(&s1_log).is_empty());
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_mix() {
    let harness = HarnessBuilder::new().build();

    let (a, b) = tokio::join!(
        harness.engine.route(RouteRequest::new("a", "build a scalable app")),
        harness.engine.route(RouteRequest::new("b", "research the market")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.interactions.iter().all(|i| i.session_id == "a" && i.run_id == a.run_id));
    assert!(b.interactions.iter().all(|i| i.session_id == "b" && i.run_id == b.run_id));
    assert_eq!(harness.store.messages("a").await.unwrap().len(), 2);
    assert_eq!(harness.store.messages("b").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_context_hints_reach_the_prompt() {
    let harness = HarnessBuilder::new().build();

    harness
        .engine
        .route(
            RouteRequest::new("s1", "build a scalable app")
                .with_hint("product", "Orbit")
                .with_hint("audience", "SMB"),
        )
        .await
        .unwrap();

    let request = &harness.provider("code").requests().await[0];
    let system = request.system_prompt().unwrap();
    assert!(system.contains("You are the code agent for session s1."));
    assert!(system.contains("- product: Orbit"));
    assert!(system.contains("- audience: SMB"));
}

struct FailingRetriever;

#[async_trait]
impl Retriever for FailingRetriever {
    fn name(&self) -> &str {
        "failing"
    }

    async fn search(&self, _: &str, _: usize) -> Result<Vec<Snippet>, RetrievalError> {
        Err(RetrievalError::Request("index offline".to_string()))
    }
}

#[tokio::test]
async fn test_retrieval_failure_degrades() {
    let harness = HarnessBuilder::new()
        .retriever(Arc::new(FailingRetriever))
        .build();

    let response = harness
        .engine
        .route(RouteRequest::new("s1", "what does the policy document say?"))
        .await
        .unwrap();

    assert_eq!(response.primary_agent, "rag");
    assert!(response.degraded.contains(&Degradation::RetrievalDegraded {
        query: "what does the policy document say?".to_string(),
    }));
    let opening = &response.interactions[0];
    assert_eq!(opening.metadata["retrieval_degraded"], serde_json::json!(true));
}

/// Store that rejects every write
struct BrokenStore;

#[async_trait]
impl SessionStore for BrokenStore {
    fn name(&self) -> &str {
        "broken"
    }

    async fn append_message(&self, _: &Message) -> StoreResult<()> {
        Err(StoreError::Connection("disk full".to_string()))
    }

    async fn append_interaction(&self, _: &AgentInteraction) -> StoreResult<()> {
        Err(StoreError::Connection("disk full".to_string()))
    }

    async fn create_run(&self, _: &CoordinationRun) -> StoreResult<()> {
        Err(StoreError::Connection("disk full".to_string()))
    }

    async fn finalize_run(&self, _: &CoordinationRun) -> StoreResult<()> {
        Err(StoreError::Connection("disk full".to_string()))
    }

    async fn recent_messages(&self, _: &str, _: usize) -> StoreResult<Vec<Message>> {
        Err(StoreError::Connection("disk full".to_string()))
    }

    async fn messages(&self, _: &str) -> StoreResult<Vec<Message>> {
        Ok(Vec::new())
    }

    async fn interactions(&self, _: &str) -> StoreResult<Vec<AgentInteraction>> {
        Ok(Vec::new())
    }

    async fn get_run(&self, _: &str) -> StoreResult<Option<CoordinationRun>> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_persistence_failure_never_fails_the_run() {
    let harness = HarnessBuilder::new()
        .store(Arc::new(BrokenStore))
        .script("code", vec![ScriptedReply::text("still answered")])
        .build();

    let response = harness
        .engine
        .route(RouteRequest::new("s1", "build a scalable app"))
        .await
        .unwrap();

    assert_eq!(response.final_response, "still answered");
    assert!(response
        .degraded
        .iter()
        .any(|d| matches!(d, Degradation::PersistenceWriteFailed { .. })));
    // the in-run log is still complete
    assert_eq!(response.interactions.len(), 2);
}

#[tokio::test]
async fn test_empty_session_id_rejected() {
    let harness = HarnessBuilder::new().build();
    let err = harness
        .engine
        .route(RouteRequest::new("  ", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Configuration(_)));
}
