// Listing sync entry point: one run with --once, otherwise on a cron schedule.

use anyhow::{Context, Result};
use clap::Parser;
use registry_client::{ClientCredentials, OAuthTokenSource, RegistryClient, TokenCache};
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::sync::Arc;
use sync_core::domains::listings::models::Category;
use sync_core::domains::replication::models::Watermark;
use sync_core::domains::sync::{categories_to_sync, sync_all};
use sync_core::kernel::{start_scheduler, FeedAdapter, PgListingStore, RegistryAdapter, SyncDeps};
use sync_core::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Replicate listings from the feed into Postgres")]
struct Args {
    /// Run a single sync and exit (also RUN_ONCE=true)
    #[arg(long)]
    once: bool,

    /// Only sync this category (residential or commercial)
    #[arg(long)]
    category: Option<Category>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sync_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        feed = %config.sync.feed_name,
        jurisdiction = %config.sync.jurisdiction,
        include_commercial = config.sync.include_commercial,
        stale_key_policy = %config.sync.stale_key_policy,
        media_failure_policy = %config.sync.media_failure_policy,
        "Configuration loaded"
    );

    let categories = categories_to_sync(&config.sync, args.category);
    if categories.is_empty() {
        tracing::warn!(feed = %config.sync.feed_name, "Feed is inactive, nothing to sync");
        return Ok(ExitCode::SUCCESS);
    }

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    for watermark in Watermark::find_all(&pool).await? {
        tracing::info!(
            source = %watermark.source,
            last_replicated_at = %watermark.last_replicated_at,
            completed_at = %watermark.completed_at,
            "Current watermark"
        );
    }

    // Build registry clients
    let feed = feed_client::FeedClient::new(&config.feed.base_url, config.feed.token)
        .context("Failed to build feed client")?;
    let registry = RegistryClient::new(&config.registry.api_url)
        .context("Failed to build registry client")?;
    let token_source = OAuthTokenSource::new(
        registry.http(),
        ClientCredentials {
            token_url: config.registry.token_url,
            client_id: config.registry.client_id,
            client_secret: config.registry.client_secret,
            scope: config.registry.scope,
        },
    );

    let deps = SyncDeps::new(
        Arc::new(FeedAdapter::new(Arc::new(feed))),
        Arc::new(RegistryAdapter::new(
            Arc::new(registry),
            Arc::new(TokenCache::new(token_source)),
        )),
        Arc::new(PgListingStore::new(pool)),
        config.sync,
    );

    let cancel = CancellationToken::new();

    if args.once || config.run_once {
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling sync");
                shutdown.cancel();
            }
        });

        let report = sync_all(&categories, &deps, &cancel).await;
        if report.is_success() {
            return Ok(ExitCode::SUCCESS);
        }
        tracing::error!(failed = ?report.failed_categories(), "Sync failed");
        return Ok(ExitCode::FAILURE);
    }

    let mut scheduler = start_scheduler(&config.schedule, categories, deps, cancel.clone())
        .await
        .context("Failed to start scheduler")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    cancel.cancel();
    scheduler
        .shutdown()
        .await
        .context("Failed to stop scheduler")?;

    Ok(ExitCode::SUCCESS)
}
