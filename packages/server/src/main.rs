use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use feedmill_core::domains::crawler::startup;
use feedmill_core::domains::sources::{DefaultPlatformFactory, PlatformFactory};
use feedmill_core::kernel::notify::{NoopNotifier, Notifier, WebhookNotifier};
use feedmill_core::kernel::{CronScheduler, ServerDeps};
use feedmill_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,feedmill_core=debug,sqlx=warn")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(NoopNotifier),
    };
    let deps = Arc::new(ServerDeps::postgres(pool, notifier));
    let factory: Arc<dyn PlatformFactory> = Arc::new(DefaultPlatformFactory::new(deps.clone()));

    // Resume interrupted jobs before the scheduler can fire anything, so
    // a resumed run and a fresh scheduled run cannot race.
    startup::resume_running_jobs(&deps, &factory).await?;

    let scheduler = CronScheduler::start().await?;
    startup::register_definitions(&deps, &factory, &scheduler).await?;
    startup::register_credential_watch(&deps, &scheduler).await?;

    info!("feedmill server started");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    Ok(())
}
