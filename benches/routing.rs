use agora::agents::config::{CoordinationMode, EngineConfig};
use agora::agents::domain::{CoordinationPort, Message, RouteRequest};
use agora::agents::llm::{ProviderSet, ScriptedProvider};
use agora::agents::scoring::{select, ConfidenceScorer, ScoringPolicy, SelectionPolicy};
use agora::agents::{AgentRegistry, CoordinationEngine};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

const MESSAGES: [&str; 4] = [
    "Research the market and build a scalable app",
    "What does the policy document say about refunds?",
    "xqzv blorf",
    "Help me prioritize the roadmap features for the MVP using last quarter's revenue data",
];

fn benchmark_rank(c: &mut Criterion) {
    let registry = AgentRegistry::builtin();
    let scorer = ConfidenceScorer::new(ScoringPolicy::default());
    let history = vec![
        Message::user("s1", "We are launching a new product"),
        Message::agent("s1", "research", "The market is growing 12% a year"),
    ];

    let mut group = c.benchmark_group("rank");
    group.throughput(Throughput::Elements(MESSAGES.len() as u64));
    group.bench_function("builtin_registry", |b| {
        b.iter(|| {
            for message in MESSAGES {
                black_box(scorer.rank(&registry, black_box(message), &history, Some(0)));
            }
        })
    });
    group.finish();
}

fn benchmark_select(c: &mut Criterion) {
    let registry = AgentRegistry::builtin();
    let scorer = ConfidenceScorer::new(ScoringPolicy::default());
    let policy = SelectionPolicy::from(&EngineConfig::default());
    let ranking = scorer.rank(&registry, MESSAGES[0], &[], None);

    c.bench_function("select", |b| {
        b.iter(|| black_box(select(black_box(&ranking), &registry, &policy)))
    });
}

fn benchmark_route(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let providers = ProviderSet::single("echo", Arc::new(ScriptedProvider::echo("echo")));
    let engine = CoordinationEngine::builder(AgentRegistry::builtin(), providers)
        .build()
        .unwrap();

    let mut group = c.benchmark_group("route");
    for mode in [
        CoordinationMode::Sequential,
        CoordinationMode::Parallel,
        CoordinationMode::Collaborative,
        CoordinationMode::Debate,
    ] {
        group.bench_function(mode.to_string(), |b| {
            b.to_async(&rt).iter(|| async {
                let request = RouteRequest::new("bench", MESSAGES[0]).with_mode(mode);
                black_box(engine.route(request).await.unwrap())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_rank, benchmark_select, benchmark_route);
criterion_main!(benches);
