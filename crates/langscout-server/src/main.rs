use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use langscout_client::{HtmlLanguageDetector, ReqwestFetcher, ReqwestNotifier};
use langscout_core::{CrawlConfig, ProxyPool, ResultTracker, Scheduler, TracingCrawlReporter, Worker};
use langscout_db::{BatchRepository, Database, DatabaseConfig};
use langscout_server::routes;
use langscout_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("langscout=info".parse()?))
        .with_target(false)
        .init();

    let api_key =
        std::env::var("LANGSCOUT_API_KEY").context("LANGSCOUT_API_KEY must be set")?;
    let addr = std::env::var("LANGSCOUT_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let config = CrawlConfig::from_env()?;

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let tracker = ResultTracker::new(config.batch_lifetime);
    let proxy_pool = ProxyPool::new(config.threads_per_proxy);
    let loaded = proxy_pool
        .refresh_from(&db.proxy_repo())
        .await
        .context("Failed to load proxy registry")?;
    tracing::info!(proxies = loaded, "Proxy pool loaded");

    let notifier = ReqwestNotifier::new()?;
    let worker = Worker::new(
        ReqwestFetcher::with_timeout(config.response_timeout),
        HtmlLanguageDetector::new(),
        db.domain_repo(),
        notifier.clone(),
        tracker.clone(),
        config.refresh.clone(),
    );
    let scheduler = Scheduler::new(worker, db.domain_repo(), proxy_pool.clone(), config.clone());

    let cancel = CancellationToken::new();
    let background = TaskTracker::new();

    let scheduler_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let result = scheduler.run(cancel.clone(), TracingCrawlReporter).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "Scheduler stopped, shutting down");
                cancel.cancel();
            }
            result
        }
    });

    background.spawn({
        let tracker = tracker.clone();
        let cancel = cancel.clone();
        let interval = config.sweep_interval;
        async move { tracker.run_sweeper(interval, cancel).await }
    });
    background.spawn(purge_expired_batches(
        db.batch_repo(),
        config.sweep_interval,
        cancel.clone(),
    ));
    background.spawn({
        let pool = proxy_pool.clone();
        let registry = db.proxy_repo();
        let cancel = cancel.clone();
        let interval = config.dead_proxy_refresh;
        async move { pool.run_refresh(registry, interval, cancel).await }
    });
    background.close();

    let state = Arc::new(AppState {
        db,
        tracker,
        proxy_pool,
        notifier,
        api_key,
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    background.wait().await;
    scheduler_task.await.context("Scheduler task panicked")??;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Delete persisted batches whose lifetime has ended, every `interval`.
async fn purge_expired_batches(
    batches: BatchRepository,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = cancel.cancelled() => break,
        }
        match batches.purge_expired().await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Purged expired batch records"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge expired batch records"),
        }
    }
}

/// Resolves on Ctrl-C or when a background task cancels the token.
async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutdown signal received");
        }
        () = cancel.cancelled() => {}
    }
    cancel.cancel();
}
