use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

pub struct MetricsCollector {
    registry: Registry,

    // Run metrics
    pub runs_total: CounterVec,
    pub run_duration: HistogramVec,
    pub runs_in_flight: IntGauge,

    // Invocation metrics
    pub invocations_total: CounterVec,
    pub invocation_duration: HistogramVec,

    // Degradation metrics
    pub recorder_failures: Counter,
    pub retrieval_degraded: Counter,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Run metrics
        let runs_total = CounterVec::new(
            Opts::new("agora_runs_total", "Total coordination runs"),
            &["mode", "outcome"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let run_duration = HistogramVec::new(
            HistogramOpts::new("agora_run_duration_seconds", "Coordination run duration in seconds")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
            &["mode"],
        )?;
        registry.register(Box::new(run_duration.clone()))?;

        let runs_in_flight = IntGauge::new(
            "agora_runs_in_flight",
            "Number of coordination runs currently executing",
        )?;
        registry.register(Box::new(runs_in_flight.clone()))?;

        // Invocation metrics
        let invocations_total = CounterVec::new(
            Opts::new("agora_invocations_total", "Total model invocations"),
            &["role", "outcome"],
        )?;
        registry.register(Box::new(invocations_total.clone()))?;

        let invocation_duration = HistogramVec::new(
            HistogramOpts::new(
                "agora_invocation_duration_seconds",
                "Model invocation duration in seconds",
            ),
            &["role"],
        )?;
        registry.register(Box::new(invocation_duration.clone()))?;

        // Degradation metrics
        let recorder_failures = Counter::new(
            "agora_recorder_failures_total",
            "Persistence writes that failed or timed out",
        )?;
        registry.register(Box::new(recorder_failures.clone()))?;

        let retrieval_degraded = Counter::new(
            "agora_retrieval_degraded_total",
            "Retrieval lookups that errored or timed out",
        )?;
        registry.register(Box::new(retrieval_degraded.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            run_duration,
            runs_in_flight,
            invocations_total,
            invocation_duration,
            recorder_failures,
            retrieval_degraded,
        })
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub struct MetricsHandler {
    collector: Arc<MetricsCollector>,
}

impl MetricsHandler {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    pub async fn metrics(&self) -> String {
        self.collector.encode().unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
            String::from("# Error encoding metrics\n")
        })
    }
}
