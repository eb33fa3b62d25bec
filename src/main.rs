use agora::adapters::health_handler::HealthHandler;
use agora::adapters::metrics_handler::{MetricsCollector, MetricsHandler};
use agora::agents::domain::CoordinationPort;
use agora::agents::CoordinationEngine;
use agora::cli::Cli;
use agora::config::Settings;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let settings = Settings::new_with_cli(&cli)?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    info!("Starting Agora coordination engine on {}:{}", host, port);

    let metrics = Arc::new(MetricsCollector::new()?);
    let engine = CoordinationEngine::from_settings(&settings, metrics.clone()).await?;

    let health_handler = Arc::new(HealthHandler::new(
        engine.store().clone(),
        engine.registry().len(),
    ));
    let metrics_handler = Arc::new(MetricsHandler::new(metrics));
    let engine: Arc<dyn CoordinationPort> = Arc::new(engine);

    let app = agora::create_app(engine, health_handler, metrics_handler);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
