use std::sync::Arc;

use anyhow::Context;
use dmjobs_client::DmssClient;
use dmjobs_orchestrator::config::Config;
use dmjobs_orchestrator::handler::{HandlerEnv, HandlerRegistry};
use dmjobs_orchestrator::repository::{PgJobStore, PgTriggerStore};
use dmjobs_orchestrator::scheduler::Scheduler;
use dmjobs_orchestrator::service::JobService;
use dmjobs_orchestrator::{api, db};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dmjobs_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting dmjobs Orchestrator...");

    let config = Config::from_env()?;
    config.validate().context("Invalid configuration")?;

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let mut dmss = DmssClient::with_timeout(&config.dmss_api, config.dmss_request_timeout)
        .context("Failed to create the document store client")?;
    if let Some(token) = &config.dmss_service_token {
        dmss = dmss.with_service_token(token);
    }
    let documents = Arc::new(dmss);

    let env = HandlerEnv::new(documents.clone(), &config)
        .context("Failed to create the handler HTTP client")?;
    let handlers = Arc::new(HandlerRegistry::with_defaults(env)?);
    tracing::info!("Job handlers: {}", handlers.runner_types().join(", "));

    let scheduler = Arc::new(Scheduler::new(
        Arc::new(PgTriggerStore::new(pool.clone())),
        config.tick_interval,
        config.max_parallel_jobs,
    ));

    let service = Arc::new(
        JobService::new(
            Arc::new(PgJobStore::new(pool)),
            documents,
            handlers,
            scheduler.clone(),
        )
        .with_start_delay(config.start_delay)
        .with_handler_timeout(config.handler_timeout),
    );

    // cron triggers must be armed before any request can register a job
    service
        .rehydrate()
        .await
        .context("Failed to restore recurring jobs")?;
    scheduler.spawn(service.clone());

    // Build router with all API endpoints
    let app = api::create_router(service);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
