//! Starts and stops the stage workers.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::stats::{PipelineStats, StatsSnapshot};
use super::worker::{StageAction, StageContext, run_worker};
use crate::config::{ConfigError, PipelineConfig};
use crate::extract::{DetailTransform, DiscoveryTransform, ExtractError, Transform};
use crate::fetch::{HttpFetcher, ProxyError, ProxyPool};
use crate::offload::{OffloadError, Offloader};
use crate::queue::{QueueNames, QueueStore};
use crate::task::Stage;

/// Errors starting a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration cannot run a pipeline.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An extraction rule does not compile.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// The proxy source is unusable.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// The offload pool could not start.
    #[error(transparent)]
    Offload(#[from] OffloadError),
}

/// Entry point for running the crawl.
#[derive(Debug)]
pub struct Pipeline;

impl Pipeline {
    /// Spawns every stage's workers plus the stats reporter.
    ///
    /// Must be called from within a tokio runtime. The returned handle
    /// owns the workers; call [`RunningPipeline::stop`] to end the run.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError` if the configuration is invalid, a rule
    /// does not compile, or the proxy source cannot be reached.
    #[instrument(skip_all, fields(store = %config.store_url))]
    pub async fn start(
        config: PipelineConfig,
        store: Arc<dyn QueueStore>,
        fetcher: HttpFetcher,
    ) -> Result<RunningPipeline, PipelineError> {
        config.validate()?;

        let discovery = Transform::Discovery(DiscoveryTransform::new(&config.discovery_rules)?);
        let detail = Transform::Detail(DetailTransform::new(
            &config.detail_rules,
            &config.output_dir,
        )?);
        let proxies = Arc::new(ProxyPool::from_setting(&config.proxy).await?);
        let offloader = Arc::new(Offloader::start(config.offload_workers)?);
        let stats = Arc::new(PipelineStats::new());
        let cancel = CancellationToken::new();

        let stage_actions = [
            (
                Stage::Discovery,
                StageAction::Extract {
                    transform: discovery,
                    output_queue: config.queues.detail.clone(),
                },
            ),
            (
                Stage::Detail,
                StageAction::Extract {
                    transform: detail,
                    output_queue: config.queues.download.clone(),
                },
            ),
            (Stage::Download, StageAction::Persist),
        ];
        let mut workers = Vec::new();
        for (stage, action) in stage_actions {
            let settings = config.stage(stage);
            let ctx = Arc::new(StageContext {
                stage,
                input_queue: config.queues.for_stage(stage).to_string(),
                action,
                store: Arc::clone(&store),
                fetcher: fetcher.clone(),
                proxies: Arc::clone(&proxies),
                offloader: Arc::clone(&offloader),
                semaphore: Arc::new(Semaphore::new(settings.max_in_flight)),
                stats: Arc::clone(&stats),
                idle_interval: config.idle_interval,
                parse_timeout: config.parse_timeout,
            });

            debug!(
                stage = %stage,
                workers = settings.workers,
                max_in_flight = settings.max_in_flight,
                queue = %ctx.input_queue,
                "starting stage"
            );
            for worker in 0..settings.workers {
                workers.push(tokio::spawn(run_worker(
                    Arc::clone(&ctx),
                    worker,
                    cancel.child_token(),
                )));
            }
        }

        let reporter = tokio::spawn(report_stats(
            Arc::clone(&stats),
            Arc::clone(&store),
            config.queues.clone(),
            Arc::clone(&offloader),
            config.stats_interval,
            cancel.child_token(),
        ));

        info!(
            discovery_workers = config.discovery.workers,
            detail_workers = config.detail.workers,
            download_workers = config.download.workers,
            output_dir = %config.output_dir.display(),
            "pipeline started"
        );

        Ok(RunningPipeline {
            cancel,
            workers,
            reporter,
            offloader,
            stats,
            shutdown_grace: config.shutdown_grace,
        })
    }
}

/// Handle to a started pipeline.
#[derive(Debug)]
pub struct RunningPipeline {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    reporter: JoinHandle<()>,
    offloader: Arc<Offloader>,
    stats: Arc<PipelineStats>,
    shutdown_grace: Duration,
}

impl RunningPipeline {
    /// Returns the live counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the number of worker loops still running.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.workers.iter().filter(|h| !h.is_finished()).count()
    }

    /// Signals every worker to stop, waits for them, and drains the
    /// offload pool for up to the configured grace period.
    ///
    /// Tasks popped but not yet handed off are lost.
    #[instrument(skip(self))]
    pub async fn stop(self) -> StatsSnapshot {
        info!("stopping pipeline");
        self.cancel.cancel();

        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked");
            }
        }
        if let Err(e) = self.reporter.await {
            warn!(error = %e, "stats reporter panicked");
        }
        self.offloader.shutdown(self.shutdown_grace).await;

        let snapshot = self.stats.snapshot();
        log_snapshot(&snapshot, "final stats");
        snapshot
    }
}

async fn report_stats(
    stats: Arc<PipelineStats>,
    store: Arc<dyn QueueStore>,
    queues: QueueNames,
    offloader: Arc<Offloader>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    // first tick fires immediately
    interval.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        log_snapshot(&stats.snapshot(), "pipeline stats");
        for stage in Stage::ALL {
            let store = Arc::clone(&store);
            let queue = queues.for_stage(stage).to_string();
            match offloader.run(async move { store.count(&queue).await }).await {
                Ok(Ok(queued)) => info!(stage = %stage, queued, "queue depth"),
                Ok(Err(e)) => warn!(stage = %stage, error = %e, "queue depth unavailable"),
                Err(_) => break,
            }
        }
    }
}

fn log_snapshot(snapshot: &StatsSnapshot, message: &str) {
    for stage in Stage::ALL {
        let s = snapshot.stage(stage);
        info!(
            stage = %stage,
            dequeued = s.dequeued,
            succeeded = s.succeeded,
            requeued = s.requeued,
            dropped = s.dropped,
            emitted = s.emitted,
            store_errors = s.store_errors,
            in_flight = s.in_flight,
            peak_in_flight = s.peak_in_flight,
            "{message}"
        );
    }
}
