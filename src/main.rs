//! CLI entry point for the crawler.

use anyhow::{Context, Result};
use clap::Parser;
use crawler_core::config::load_file_config;
use crawler_core::seed::{load_seed_file, seed_start_pages};
use crawler_core::{HttpFetcher, Pipeline, PipelineConfig, open_store};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let file_config = load_file_config(args.config.as_deref()).context("Failed to load config")?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config
                .as_ref()
                .and_then(|cfg| cfg.verbosity)
                .map_or("info", |v| v.filter_level()),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let mut config = PipelineConfig::default();
    if let Some(file_config) = &file_config {
        file_config.apply_to(&mut config);
        debug!("config file applied");
    }
    args.apply_to(&mut config);
    config.output_dir = std::path::absolute(&config.output_dir).with_context(|| {
        format!(
            "Failed to resolve output directory '{}'",
            config.output_dir.display()
        )
    })?;
    config.validate().context("Invalid configuration")?;

    info!(store = %config.store_url, "crawler starting");

    let store = open_store(&config.store_url)
        .await
        .with_context(|| format!("Failed to open queue store '{}'", config.store_url))?;

    if args.no_seed {
        debug!("seeding skipped");
    } else {
        let mut seeds = args.seeds.clone();
        if let Some(path) = &args.seed_file {
            seeds.extend(load_seed_file(path).await?);
        }
        if seeds.is_empty() {
            info!("no seeds given; working existing queues only");
        } else {
            seed_start_pages(store.as_ref(), &config.queues.discovery, &seeds)
                .await
                .context("Failed to seed start pages")?;
        }
    }

    let fetcher = HttpFetcher::new(config.fetch.clone()).context("Failed to build HTTP client")?;
    let pipeline = Pipeline::start(config, store, fetcher)
        .await
        .context("Failed to start pipeline")?;
    info!(workers = pipeline.active_workers(), "pipeline running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, stopping");
    } else {
        info!("interrupted");
    }

    let stats = pipeline.stop().await;
    info!(
        listing_pages = stats.discovery.succeeded,
        detail_pages = stats.detail.succeeded,
        downloaded = stats.download.succeeded,
        requeued = stats.discovery.requeued + stats.detail.requeued + stats.download.requeued,
        "crawler stopped"
    );

    Ok(())
}
