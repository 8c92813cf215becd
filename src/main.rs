use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use adscout::browser::SessionPool;
use adscout::config::AppConfig;
use adscout::notify::{LogNotifier, Notifier, WebhookNotifier};
use adscout::queue::JobQueue;
use adscout::scheduler::QueryScheduler;
use adscout::store::Store;
use adscout::worker::ScrapeWorker;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("adscout=debug".parse()?),
        )
        .init();

    info!("Starting adscout...");

    let config = AppConfig::from_env()?;

    let db_pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout))
        .connect(&config.database.url)
        .await?;

    let store = Arc::new(Store::new(db_pool.clone()));
    store.migrate().await?;

    let sessions = Arc::new(SessionPool::new(config.browser.clone()));
    let sweeper = sessions.spawn_sweeper();

    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let queue = Arc::new(JobQueue::new(db_pool, config.queue.clone()));
    queue.migrate().await?;

    let worker = Arc::new(ScrapeWorker::new(
        Arc::clone(&sessions),
        Arc::clone(&store),
        notifier,
        &config,
    ));
    queue.process(worker).await;

    let scheduler = Arc::new(QueryScheduler::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        config.scheduler.clone(),
    ));
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let scheduler_handle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(stop_rx).await })
    };

    if config.metrics.enabled {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()?;
        info!(port = config.metrics.port, "Prometheus exporter listening");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    // Stop producing first, then drain consumers, then tear sessions down.
    let _ = stop_tx.send(true);
    let _ = scheduler_handle.await;
    queue.shutdown().await;
    sessions.shutdown().await;
    sweeper.abort();

    info!("Shutdown complete");
    Ok(())
}
