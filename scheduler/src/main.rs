// Menu notifier binary entry point

use anyhow::Context;
use common::bootstrap::{build_pipeline, init_channel, init_feed, init_stores};
use common::clock::SystemClock;
use common::config::Settings;
use common::telemetry::{init_logging, init_metrics, shutdown_tracer};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    info!("Starting menu notifier");

    init_metrics(settings.observability.metrics_port)?;

    info!(
        database = if settings.database.url.is_empty() { "memory" } else { "postgres" },
        timezone = %settings.notifier.timezone,
        cron = %settings.scraper.cron_expression,
        "Configuration loaded"
    );

    let stores = init_stores(&settings).await?;
    let feed = init_feed(&settings)?;
    let channel = init_channel(&settings)?;

    let pipeline = build_pipeline(&settings, &stores, feed, channel, Arc::new(SystemClock))?;
    let (engine, service, window_task) = pipeline.spawn_window_scheduler();

    // Pick up today's menu right away instead of waiting for the first tick
    let outcome = service.trigger_scrape_now().await;
    info!(outcome = outcome.as_str(), "Initial scrape finished");

    let engine_for_shutdown = engine.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        engine_for_shutdown.stop();
    });

    engine.start().await;

    if let Err(e) = window_task.await {
        error!(error = %e, "Window-open scheduler task failed");
    }
    if let Some(pool) = &stores.pool {
        pool.close().await;
    }
    shutdown_tracer();

    info!("Menu notifier stopped");
    Ok(())
}
