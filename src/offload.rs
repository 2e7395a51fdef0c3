//! Bounded worker pool for store, proxy and filesystem operations.
//!
//! Stage workers hand these operations to the [`Offloader`] so the fetch
//! loop never waits on them directly. Nothing is fire-and-forget: every
//! submission returns an [`OffloadTicket`] that resolves to the job's
//! output, and the stage awaits it before deciding whether its task was
//! handed off or must be requeued.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Default number of offload workers.
pub const DEFAULT_OFFLOAD_WORKERS: usize = 8;

/// Jobs buffered per worker before `submit` starts waiting.
const QUEUE_DEPTH_PER_WORKER: usize = 64;

type Job = BoxFuture<'static, ()>;

/// Errors reported through an [`OffloadTicket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OffloadError {
    /// The pool was shut down, or the job panicked, before producing a result.
    #[error("offloaded job did not complete (pool shut down or job panicked)")]
    Incomplete,

    /// Invalid pool size.
    #[error("invalid offload worker count {0}: must be at least 1")]
    InvalidWorkers(usize),
}

/// Pending result of an offloaded job.
#[must_use = "offload tickets report whether the job succeeded"]
#[derive(Debug)]
pub struct OffloadTicket<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for OffloadTicket<T> {
    type Output = Result<T, OffloadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| OffloadError::Incomplete))
    }
}

/// Fixed-size pool of tokio tasks consuming a bounded job channel.
#[derive(Debug)]
pub struct Offloader {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Offloader {
    /// Starts a pool of `workers` tasks on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`OffloadError::InvalidWorkers`] if `workers` is zero.
    #[instrument(level = "debug")]
    pub fn start(workers: usize) -> Result<Self, OffloadError> {
        if workers == 0 {
            return Err(OffloadError::InvalidWorkers(workers));
        }

        let (sender, receiver) = mpsc::channel::<Job>(workers * QUEUE_DEPTH_PER_WORKER);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers)
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else { break };
                        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                            warn!(worker, "offloaded job panicked");
                        }
                    }
                    debug!(worker, "offload worker exiting");
                })
            })
            .collect();

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        })
    }

    /// Queues `job` on the pool and returns a ticket for its output.
    ///
    /// Waits only while the job channel is full. If the pool has been shut
    /// down the ticket resolves to [`OffloadError::Incomplete`].
    pub async fn submit<F, T>(&self, job: F) -> OffloadTicket<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            // Receiver gone means the submitter stopped caring; nothing to report.
            let _ = tx.send(job.await);
        });

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sender) = sender {
            // On error the job (and its oneshot sender) is dropped, failing the ticket.
            let _ = sender.send(wrapped).await;
        }

        OffloadTicket { rx }
    }

    /// Submits `job` and waits for its output.
    ///
    /// # Errors
    ///
    /// Returns [`OffloadError::Incomplete`] if the job never produced a result.
    pub async fn run<F, T>(&self, job: F) -> Result<T, OffloadError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(job).await.await
    }

    /// Stops accepting jobs and waits up to `grace` for queued jobs to drain.
    ///
    /// Workers still busy after `grace` are aborted; their tickets resolve
    /// to [`OffloadError::Incomplete`].
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handles: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        let drained = tokio::time::timeout(grace, futures_util::future::join_all(handles)).await;
        if drained.is_err() {
            warn!(
                grace_ms = grace.as_millis(),
                "offload pool did not drain in time, aborting workers"
            );
            for abort in aborts {
                abort.abort();
            }
        } else {
            info!("offload pool drained");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_zero_workers_rejected() {
        assert_eq!(
            Offloader::start(0).unwrap_err(),
            OffloadError::InvalidWorkers(0)
        );
    }

    #[tokio::test]
    async fn test_run_returns_job_output() {
        let pool = Offloader::start(2).unwrap();
        let value = pool.run(async { 40 + 2 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_tickets_report_errors_from_job() {
        let pool = Offloader::start(1).unwrap();
        let ticket = pool.submit(async { Err::<(), _>("disk full") }).await;
        assert_eq!(ticket.await.unwrap(), Err("disk full"));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_incomplete() {
        let pool = Offloader::start(1).unwrap();
        pool.shutdown(Duration::from_secs(1)).await;
        let result = pool.run(async { 1 }).await;
        assert_eq!(result, Err(OffloadError::Incomplete));
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = Offloader::start(1).unwrap();
        let result = pool.run(async { panic!("boom") }).await;
        assert_eq!(result, Err::<(), _>(OffloadError::Incomplete));
        assert_eq!(pool.run(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_worker_count() {
        let pool = Offloader::start(2).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tickets = Vec::new();
        for _ in 0..10 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tickets.push(
                pool.submit(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await,
            );
        }
        for ticket in tickets {
            ticket.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_jobs() {
        let pool = Offloader::start(1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let mut tickets = Vec::new();
        for _ in 0..5 {
            let done = Arc::clone(&done);
            tickets.push(
                pool.submit(async move {
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .await,
            );
        }
        pool.shutdown(Duration::from_secs(5)).await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        for ticket in tickets {
            assert!(ticket.await.is_ok());
        }
    }
}
