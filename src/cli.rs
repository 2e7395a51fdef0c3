//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crawler_core::PipelineConfig;
use crawler_core::seed::SeedSource;

/// Staged gallery crawler.
///
/// Seeds listing pages into the shared queue store, then runs the
/// discovery, detail and download stages until interrupted with Ctrl-C.
/// Several processes pointed at the same store cooperate on one crawl.
#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/crawler/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Queue store: redis://HOST:PORT/DB, sqlite:PATH or memory
    #[arg(long, value_name = "URL")]
    pub store: Option<String>,

    /// Listing URL template and page count, e.g. 'https://site/cat/page/{}/=42' (repeatable)
    #[arg(long = "seed", value_name = "TEMPLATE=PAGES")]
    pub seeds: Vec<SeedSource>,

    /// File with one '<template> <pages>' seed per line
    #[arg(long, value_name = "PATH")]
    pub seed_file: Option<PathBuf>,

    /// Skip seeding and only work the queues
    #[arg(long, conflicts_with_all = ["seeds", "seed_file"])]
    pub no_seed: bool,

    /// Directory downloaded images are stored under
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Proxy source: none, static:URL[,URL...] or redis://HOST:PORT/DB
    #[arg(long, value_name = "SOURCE")]
    pub proxy: Option<String>,

    /// Discovery stage worker loops (1-1000)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub discovery_workers: Option<u16>,

    /// Detail stage worker loops (1-1000)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub detail_workers: Option<u16>,

    /// Download stage worker loops (1-1000)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub download_workers: Option<u16>,

    /// Seconds to wait after finding a queue empty (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub idle_interval_secs: Option<u64>,
}

impl Args {
    /// Applies every flag that was given on top of `config`.
    pub fn apply_to(&self, config: &mut PipelineConfig) {
        if let Some(store) = &self.store {
            config.store_url.clone_from(store);
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir.clone_from(output_dir);
        }
        if let Some(proxy) = &self.proxy {
            config.proxy.clone_from(proxy);
        }
        if let Some(workers) = self.discovery_workers {
            config.discovery.workers = usize::from(workers);
        }
        if let Some(workers) = self.detail_workers {
            config.detail.workers = usize::from(workers);
        }
        if let Some(workers) = self.download_workers {
            config.download.workers = usize::from(workers);
        }
        if let Some(secs) = self.idle_interval_secs {
            config.idle_interval = Duration::from_secs(secs);
        }
    }
}
