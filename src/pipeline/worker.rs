//! Stage worker loop.
//!
//! A worker repeatedly pops one payload from its stage's queue, fetches
//! the task's URL under the stage semaphore, and either hands the parsed
//! children to the next stage or persists the downloaded asset. Any fetch,
//! parse, hand-off or write failure puts the same payload back into
//! the stage's own queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::stats::{PipelineStats, StageStats};
use crate::assets::{asset_exists, write_asset};
use crate::extract::Transform;
use crate::fetch::{FetchError, HttpFetcher, ProxyPool, read_bytes, read_text};
use crate::offload::Offloader;
use crate::queue::{QueueError, QueueStore};
use crate::task::{DownloadTask, Stage, Task};

/// What a stage does with a fetched body.
#[derive(Debug)]
pub(crate) enum StageAction {
    /// Parse the page and hand children to `output_queue`.
    Extract {
        transform: Transform,
        output_queue: String,
    },
    /// Write the bytes to the task's destination path.
    Persist,
}

/// Everything the workers of one stage share.
#[derive(Debug)]
pub(crate) struct StageContext {
    pub stage: Stage,
    pub input_queue: String,
    pub action: StageAction,
    pub store: Arc<dyn QueueStore>,
    pub fetcher: HttpFetcher,
    pub proxies: Arc<ProxyPool>,
    pub offloader: Arc<Offloader>,
    pub semaphore: Arc<Semaphore>,
    pub stats: Arc<PipelineStats>,
    pub idle_interval: Duration,
    pub parse_timeout: Duration,
}

/// Pause after a dequeue lost to lock contention on the store.
const CONTENTION_BACKOFF: Duration = Duration::from_millis(50);

enum Step {
    Idle,
    Contended,
    Processed,
}

enum Outcome {
    Done { emitted: u64 },
    Skipped,
    Retry,
}

/// Runs one worker until `cancel` fires.
///
/// Cancellation is observed at every suspension point; a task popped but
/// not yet handed off when that happens is lost.
#[instrument(skip(ctx, cancel), fields(stage = %ctx.stage))]
pub(crate) async fn run_worker(ctx: Arc<StageContext>, worker: usize, cancel: CancellationToken) {
    debug!(worker, "worker started");
    while !cancel.is_cancelled() {
        let step = tokio::select! {
            () = cancel.cancelled() => break,
            step = ctx.step() => step,
        };
        let pause = match step {
            Step::Idle => ctx.idle_interval,
            Step::Contended => CONTENTION_BACKOFF.min(ctx.idle_interval),
            Step::Processed => continue,
        };
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(pause) => {}
        }
    }
    debug!(worker, "worker stopped");
}

impl StageContext {
    fn stats(&self) -> &StageStats {
        self.stats.stage(self.stage)
    }

    async fn step(&self) -> Step {
        let payload = match self.dequeue().await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(queue = %self.input_queue, "queue empty, idling");
                return Step::Idle;
            }
            Err(e) if e.is_contention() => {
                self.stats().record_store_error();
                debug!(queue = %self.input_queue, error = %e, "store busy, retrying shortly");
                return Step::Contended;
            }
            Err(e) => {
                self.stats().record_store_error();
                warn!(queue = %self.input_queue, error = %e, "dequeue failed, backing off");
                return Step::Idle;
            }
        };
        self.stats().record_dequeued();

        let task = match Task::decode(self.stage, &payload) {
            Ok(task) => task,
            Err(e) => {
                self.stats().record_dropped();
                error!(payload = %payload, error = %e, "dropping undecodable payload");
                return Step::Processed;
            }
        };

        let outcome = match (&self.action, &task) {
            (StageAction::Extract { transform, output_queue }, _) => {
                self.process_page(&task, transform, output_queue).await
            }
            (StageAction::Persist, Task::Download(download)) => {
                self.process_download(download).await
            }
            (StageAction::Persist, _) => {
                error!(url = %task.url(), "download stage received a page task");
                Outcome::Skipped
            }
        };

        match outcome {
            Outcome::Done { emitted } => {
                self.stats().record_succeeded();
                self.stats().record_emitted(emitted);
            }
            Outcome::Skipped => self.stats().record_dropped(),
            Outcome::Retry => self.requeue(payload).await,
        }
        Step::Processed
    }

    async fn dequeue(&self) -> Result<Option<String>, QueueError> {
        let store = Arc::clone(&self.store);
        let queue = self.input_queue.clone();
        self.offloader
            .run(async move { store.dequeue_random(&queue).await })
            .await
            .unwrap_or_else(|e| Err(QueueError::connection(&self.input_queue, e)))
    }

    async fn pick_proxy(&self) -> Option<String> {
        let proxies = Arc::clone(&self.proxies);
        self.offloader
            .run(async move { proxies.pick().await })
            .await
            .ok()
            .flatten()
    }

    async fn process_page(&self, task: &Task, transform: &Transform, output_queue: &str) -> Outcome {
        let url = task.url();
        let body = match self.fetch(url, |response| read_text(response, url, self.parse_timeout)).await {
            Ok(Some(body)) => body,
            Ok(None) => return Outcome::Retry,
            Err(e) => {
                warn!(url = %url, kind = %e.kind(), error = %e, "fetch failed, requeueing");
                return Outcome::Retry;
            }
        };

        // Html is not Send; parsing stays synchronous and finishes before the next await.
        let children = match transform.extract(&body, task) {
            Ok(children) => children,
            Err(e) => {
                warn!(url = %url, error = %e, "parse failed, requeueing");
                return Outcome::Retry;
            }
        };
        let children = self.drop_downloaded(children).await;

        let mut tickets = Vec::with_capacity(children.len());
        for child in &children {
            let payload = match child.encode() {
                Ok(payload) => payload,
                Err(e) => {
                    error!(url = %child.url(), error = %e, "failed to encode child task");
                    return Outcome::Retry;
                }
            };
            let store = Arc::clone(&self.store);
            let queue = output_queue.to_string();
            tickets.push(
                self.offloader
                    .submit(async move { store.enqueue(&queue, &payload).await })
                    .await,
            );
        }

        let mut handed_off = true;
        for ticket in tickets {
            match ticket.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    self.stats().record_store_error();
                    warn!(url = %url, error = %e, "hand-off failed");
                    handed_off = false;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "hand-off did not complete");
                    handed_off = false;
                }
            }
        }
        if !handed_off {
            return Outcome::Retry;
        }

        debug!(url = %url, children = children.len(), queue = %output_queue, "page handed off");
        Outcome::Done {
            emitted: u64::try_from(children.len()).unwrap_or(u64::MAX),
        }
    }

    /// Drops download tasks whose destination already holds a finished asset.
    async fn drop_downloaded(&self, children: Vec<Task>) -> Vec<Task> {
        let mut checks = Vec::with_capacity(children.len());
        for child in &children {
            let check = match child {
                Task::Download(download) => {
                    let path = download.path.clone();
                    Some(
                        self.offloader
                            .submit(async move { asset_exists(&path).await })
                            .await,
                    )
                }
                _ => None,
            };
            checks.push(check);
        }

        let mut kept = Vec::with_capacity(children.len());
        for (child, check) in children.into_iter().zip(checks) {
            let exists = match check {
                Some(ticket) => ticket.await.unwrap_or(false),
                None => false,
            };
            match &child {
                Task::Download(download) if exists => {
                    info!(path = %download.path.display(), "image already downloaded");
                }
                _ => kept.push(child),
            }
        }
        kept
    }

    async fn process_download(&self, task: &DownloadTask) -> Outcome {
        let path = task.path.clone();
        let exists = self
            .offloader
            .run(async move { asset_exists(&path).await })
            .await
            .unwrap_or(false);
        if exists {
            info!(path = %task.path.display(), "image already downloaded, dropping task");
            return Outcome::Skipped;
        }

        let url = task.url.as_str();
        let bytes = match self.fetch(url, |response| read_bytes(response, url, self.parse_timeout)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Outcome::Retry,
            Err(e) => {
                warn!(url = %url, kind = %e.kind(), error = %e, "download failed, requeueing");
                return Outcome::Retry;
            }
        };

        let path = task.path.clone();
        match self
            .offloader
            .run(async move { write_asset(&path, &bytes).await })
            .await
        {
            Ok(Ok(())) => Outcome::Done { emitted: 0 },
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "write failed, requeueing");
                Outcome::Retry
            }
            Err(e) => {
                warn!(url = %url, error = %e, "write did not complete, requeueing");
                Outcome::Retry
            }
        }
    }

    /// Fetches `url` and reads the body with `read`, holding a stage permit
    /// throughout. `Ok(None)` means the permit could not be acquired.
    async fn fetch<T, F, Fut>(&self, url: &str, read: F) -> Result<Option<T>, FetchError>
    where
        F: FnOnce(reqwest::Response) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let Ok(_permit) = self.semaphore.acquire().await else {
            warn!("stage semaphore closed");
            return Ok(None);
        };
        let _flight = self.stats().enter_flight();

        let proxy = self.pick_proxy().await;
        let response = self.fetcher.fetch(url, proxy.as_deref()).await?;
        read(response).await.map(Some)
    }

    async fn requeue(&self, payload: String) {
        let store = Arc::clone(&self.store);
        let queue = self.input_queue.clone();
        match self
            .offloader
            .run(async move { store.enqueue(&queue, &payload).await })
            .await
        {
            Ok(Ok(_)) => self.stats().record_requeued(),
            Ok(Err(e)) => {
                self.stats().record_store_error();
                error!(queue = %self.input_queue, error = %e, "requeue failed, task lost");
            }
            Err(e) => {
                error!(queue = %self.input_queue, error = %e, "requeue did not complete, task lost");
            }
        }
    }
}
