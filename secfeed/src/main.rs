use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use interfaces::ArticleStore;
use secfeed::config::{Cli, Command, Settings};
use secfeed::sources::seed_sources_if_empty;
use secfeed::{
    build_backend, ActivityLog, ContentExtractor, FeedIngester, Fetcher, Pipeline, PgStore,
    Scheduler, Summariser,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Hide the password part of a connection string.
fn redacted(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => database_url.to_string(),
    }
}

fn build_pipeline(settings: &Settings, store: Arc<dyn ArticleStore>) -> Result<Pipeline> {
    let activity = Arc::new(ActivityLog::default());
    let fetcher = Arc::new(Fetcher::new(settings.fetch_config()).context("building HTTP client")?);

    let ingester = FeedIngester::new(
        store.clone(),
        fetcher.clone(),
        ContentExtractor::new(fetcher),
        activity.clone(),
        settings.backfill_days,
    );

    let summariser = Summariser::new(
        store.clone(),
        build_backend(&settings.llm_config()),
        activity.clone(),
        settings.summariser_config(),
    );

    Ok(Pipeline::new(
        store,
        ingester,
        summariser,
        activity,
        settings.schedule_config(),
    ))
}

async fn run_scheduler(pipeline: Arc<Pipeline>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    Scheduler::new(pipeline).run(shutdown_rx).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;
    settings.validate()?;

    info!("Connecting to database: {}", redacted(&settings.database_url));
    let store: Arc<dyn ArticleStore> = Arc::new(
        PgStore::connect(&settings.database_url)
            .await
            .context("connecting to PostgreSQL")?,
    );

    let pipeline = Arc::new(build_pipeline(&settings, store.clone())?);

    match cli.command {
        Command::Run => {
            seed_sources_if_empty(store.as_ref(), &settings.feeds_path).await?;
            run_scheduler(pipeline).await?;
        }
        Command::Cycle => {
            let (ingest, batch) = pipeline.ingest_and_summarise().await?;
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "ingest": ingest,
                "summarise": batch,
            }))?);
        }
        Command::Summarise => {
            let batch = pipeline.summariser().run_batch().await?;
            println!("{}", serde_json::to_string_pretty(&batch)?);
        }
        Command::Purge => {
            let report = pipeline.purge_expired().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Watchdog => {
            let reset = pipeline.watchdog().await?;
            println!("Reset {} stuck articles", reset);
        }
        Command::Status => {
            let counts = pipeline.summariser().status().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Command::Requeue { id } => {
            if pipeline.summariser().requeue_article(id).await? {
                println!("Article {} queued for summarisation", id);
            } else {
                anyhow::bail!("article {} not found or not in a done/failed state", id);
            }
        }
    }

    Ok(())
}
