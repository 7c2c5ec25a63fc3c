use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice_runner::config::secrets_from_env;
use sluice_runner::{Config, PipelineExecutor, Runtime};

pub mod api;
pub mod service;

use service::InvocationService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sluice_orchestrator=debug,sluice_runner=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Sluice Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    let secrets = secrets_from_env();

    // Pipeline definition evaluated once at startup
    let pipeline_path =
        PathBuf::from(std::env::var("PIPELINE").unwrap_or_else(|_| "pipeline.lua".to_string()));
    tracing::info!("Loading pipeline from {}", pipeline_path.display());

    let source = std::fs::read_to_string(&pipeline_path)
        .with_context(|| format!("Failed to read {}", pipeline_path.display()))?;
    let pipeline = sluice_lua::parse_pipeline(&source, config.script_vars())
        .with_context(|| format!("Failed to parse {}", pipeline_path.display()))?;

    tracing::info!(
        "Pipeline '{}' loaded with {} job(s)",
        pipeline.name,
        pipeline.jobs.len()
    );

    let runtime = Runtime::standard(config, secrets);
    let executor = PipelineExecutor::new(pipeline, runtime).context("Invalid pipeline")?;
    let retention = match std::env::var("ORCHESTRATOR_RETAINED_INVOCATIONS") {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("ORCHESTRATOR_RETAINED_INVOCATIONS must be a count, got '{}'", raw))?,
        Err(_) => service::invocation::DEFAULT_RETENTION,
    };
    let invocations = Arc::new(InvocationService::new(Arc::new(executor)).with_retention(retention));

    // Build router with all API endpoints
    let app = api::create_router(invocations);

    // Get bind address
    let addr =
        std::env::var("ORCHESTRATOR_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
