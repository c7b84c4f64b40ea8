//! Main entry point for the tempo server.
//!
//! Starts the HTTP facade and one scheduler worker against the configured
//! store, then waits for a shutdown signal. Shutdown order: worker first
//! (joins the in-flight dispatch), then the HTTP server, then the pool.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tempo::dispatch::CallbackRouter;
use tempo::ratelimit::RateLimitConfig;
use tempo::safety::UrlPolicy;
use tempo::store::{PostgresStore, Store};
use tempo::worker::{SchedulerWorker, WorkerConfig};
use tempo::{ApiServer, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tempo server");

    let config = Arc::new(Config::from_env()?);
    info!(addr = %config.http_addr, env = ?config.environment, "Loaded configuration");

    let database_url = config
        .database_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let postgres = PostgresStore::connect(&database_url, config.db_pool_size).await?;
    postgres.migrate().await?;
    info!("Connected to database, migrations complete");

    let store: Arc<dyn Store> = Arc::new(postgres.clone());

    let router = CallbackRouter {
        store: store.clone(),
        url_policy: UrlPolicy {
            require_https: config.environment.is_production(),
            allowed_domains: config.allowed_webhook_domains.clone(),
        },
        hmac_secret: config.hmac_secret.clone(),
        webhook_timeout: config.webhook_timeout,
    };

    let mut worker = SchedulerWorker::new(
        store.clone(),
        router,
        WorkerConfig {
            poll_interval: config.poll_interval,
            batch_size: config.batch_size,
            lock_timeout: config.lock_timeout,
            ..WorkerConfig::default()
        },
    );
    worker.start();

    let server = ApiServer::start(config.clone(), store, RateLimitConfig::default()).await?;
    info!(addr = %server.addr(), worker_id = %worker.worker_id(), "Tempo server running");

    shutdown_signal().await;
    info!("Shutdown signal received");

    // Worker first so the in-flight dispatch finishes before the pool
    // drains.
    worker.stop().await;
    server.shutdown().await;

    info!("Tempo server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
