//! Integration tests for the crawl pipeline.
//!
//! These tests run every stage against an in-memory queue store and a mock
//! HTTP server, and check delivery, dedup, concurrency and shutdown
//! behaviour end to end.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use crawler_core::queue::Result as QueueResult;
use crawler_core::seed::seed_start_pages;
use crawler_core::{
    DetailPageTask, DownloadTask, MemoryQueueStore, Pipeline, QueueStore, SeedSource,
    StageSettings, StartPageTask, Task,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::harness::{
    Site, detail_page, listing_page, local_sockets_available, mock_site_or_skip, test_config,
    test_fetcher, wait_until,
};

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0fake-jpeg";

fn encode(task: impl Into<Task>) -> String {
    let task: Task = task.into();
    task.encode().unwrap()
}

fn write_existing(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"already here").unwrap();
}

/// Memory store that remembers every enqueue in call order.
#[derive(Debug, Default)]
struct RecordingStore {
    inner: MemoryQueueStore,
    enqueued: Mutex<Vec<(String, String)>>,
}

impl RecordingStore {
    fn enqueued(&self) -> Vec<(String, String)> {
        self.enqueued.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueStore for RecordingStore {
    async fn enqueue(&self, queue: &str, payload: &str) -> QueueResult<bool> {
        self.enqueued
            .lock()
            .unwrap()
            .push((queue.to_string(), payload.to_string()));
        self.inner.enqueue(queue, payload).await
    }

    async fn dequeue_random(&self, queue: &str) -> QueueResult<Option<String>> {
        self.inner.dequeue_random(queue).await
    }

    async fn count(&self, queue: &str) -> QueueResult<u64> {
        self.inner.count(queue).await
    }
}

/// Serves `200 OK` headers and the start of a body, then never finishes.
/// Returns the base URL and a count of accepted connections.
async fn start_stalled_body_server() -> TestResult<(String, Arc<AtomicUsize>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base_url = format!("http://{}", listener.local_addr()?);
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 4096\r\n\r\n<html><body>",
                    )
                    .await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    Ok((base_url, accepted))
}

#[tokio::test]
async fn test_end_to_end_with_timed_out_detail_retry() -> TestResult {
    let Some(Site {
        server,
        output,
        config,
    }) = mock_site_or_skip().await?
    else {
        return Ok(());
    };
    let mut config = config;
    config.fetch.request_timeout = Duration::from_millis(500);

    Mock::given(method("GET"))
        .and(path("/cat/page/1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["101", "102"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cat/101-wallpaper.html"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(detail_page("101", &["800x600"])),
        )
        .mount(&server)
        .await;
    // First fetch of this detail page exceeds the request deadline.
    Mock::given(method("GET"))
        .and(path("/cat/102-wallpaper.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_page("102", &["800x600"]))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cat/102-wallpaper.html"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(detail_page("102", &["800x600"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/pic/12/800x600/img-\d+\.jpg$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(JPEG.to_vec()))
        .mount(&server)
        .await;

    let store = Arc::new(RecordingStore::default());
    let seeds = vec![SeedSource::new(format!("{}/cat/page/{{}}/", server.uri()), 1)?];
    seed_start_pages(store.as_ref(), &config.queues.discovery, &seeds).await?;

    let fetcher = test_fetcher(&config)?;
    let pipeline = Pipeline::start(config.clone(), store.clone(), fetcher).await?;

    let first = output.path().join("cat").join("101").join("800x600.jpg");
    let second = output.path().join("cat").join("102").join("800x600.jpg");
    let done = wait_until(Duration::from_secs(15), || first.exists() && second.exists()).await;
    let stats = pipeline.stop().await;
    assert!(done, "assets were not downloaded: {stats:?}");

    assert_eq!(stats.discovery.succeeded, 1);
    assert_eq!(stats.discovery.emitted, 2);
    assert!(
        stats.detail.requeued >= 1,
        "timed-out detail page should be requeued: {stats:?}"
    );
    assert_eq!(stats.download.succeeded, 2);
    assert_eq!(std::fs::read(&first)?, JPEG);
    assert_eq!(std::fs::read(&second)?, JPEG);

    // The timed-out task went back into the detail queue byte for byte, and
    // its download was only handed off after that retry.
    let slow_detail = encode(DetailPageTask {
        url: format!("{}/cat/102-wallpaper.html", server.uri()),
        category: "cat".to_string(),
        image_group: "12".to_string(),
        image_number: "102".to_string(),
    });
    let log = store.enqueued();
    let detail_adds: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, (queue, payload))| *queue == config.queues.detail && *payload == slow_detail)
        .map(|(index, _)| index)
        .collect();
    assert!(
        detail_adds.len() >= 2,
        "timed-out detail task was not requeued verbatim: {log:?}"
    );
    let retried_at = detail_adds[detail_adds.len() - 1];
    let download_at = log
        .iter()
        .position(|(queue, payload)| {
            *queue == config.queues.download && payload.contains("img-102.jpg")
        })
        .unwrap();
    assert!(
        download_at > retried_at,
        "download for the timed-out page was handed off before its retry: {log:?}"
    );

    assert_eq!(store.count(&config.queues.discovery).await?, 0);
    assert_eq!(store.count(&config.queues.download).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_failed_listing_fetch_is_requeued_until_success() -> TestResult {
    let Some(Site {
        server,
        output: _output,
        config,
    }) = mock_site_or_skip().await?
    else {
        return Ok(());
    };

    Mock::given(method("GET"))
        .and(path("/cat/page/1/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cat/page/1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[])))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryQueueStore::new());
    store
        .enqueue(
            &config.queues.discovery,
            &encode(StartPageTask {
                url: format!("{}/cat/page/1/", server.uri()),
            }),
        )
        .await?;

    let pipeline = Pipeline::start(config.clone(), store.clone(), test_fetcher(&config)?).await?;
    let done = wait_until(Duration::from_secs(10), || {
        pipeline.stats().discovery.succeeded == 1
    })
    .await;
    let stats = pipeline.stop().await;
    assert!(done, "listing page never succeeded: {stats:?}");

    assert_eq!(stats.discovery.requeued, 2);
    assert_eq!(stats.discovery.dequeued, 3);
    assert_eq!(stats.discovery.emitted, 0);
    assert_eq!(store.count(&config.queues.discovery).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_redirect_is_treated_as_failure() -> TestResult {
    let Some(Site {
        server,
        output: _output,
        config,
    }) = mock_site_or_skip().await?
    else {
        return Ok(());
    };

    Mock::given(method("GET"))
        .and(path("/cat/page/1/"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/cat/page/2/"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cat/page/2/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["1"])))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryQueueStore::new());
    store
        .enqueue(
            &config.queues.discovery,
            &encode(StartPageTask {
                url: format!("{}/cat/page/1/", server.uri()),
            }),
        )
        .await?;

    let pipeline = Pipeline::start(config.clone(), store.clone(), test_fetcher(&config)?).await?;
    let requeued = wait_until(Duration::from_secs(10), || {
        pipeline.stats().discovery.requeued >= 1
    })
    .await;
    let stats = pipeline.stop().await;
    assert!(requeued, "redirect should requeue the page: {stats:?}");
    assert_eq!(stats.discovery.succeeded, 0);
    assert_eq!(stats.discovery.emitted, 0);
    Ok(())
}

#[tokio::test]
async fn test_stalled_listing_body_is_requeued() -> TestResult {
    if !local_sockets_available() {
        return Ok(());
    }
    let (base_url, accepted) = start_stalled_body_server().await?;
    let output = TempDir::new()?;
    let mut config = test_config(&base_url, output.path());
    config.fetch.request_timeout = Duration::from_secs(10);
    config.parse_timeout = Duration::from_millis(300);

    let store = Arc::new(MemoryQueueStore::new());
    let listing = encode(StartPageTask {
        url: format!("{base_url}/cat/page/1/"),
    });
    store.enqueue(&config.queues.discovery, &listing).await?;

    let pipeline = Pipeline::start(config.clone(), store.clone(), test_fetcher(&config)?).await?;
    let retried = wait_until(Duration::from_secs(10), || {
        pipeline.stats().discovery.requeued >= 2 && accepted.load(Ordering::SeqCst) >= 2
    })
    .await;
    let stats = pipeline.stop().await;
    assert!(retried, "stalled body was not retried: {stats:?}");

    assert_eq!(stats.discovery.succeeded, 0);
    assert_eq!(stats.discovery.emitted, 0);
    assert_eq!(stats.discovery.dropped, 0);
    Ok(())
}

#[tokio::test]
async fn test_stalled_asset_body_is_requeued_and_not_written() -> TestResult {
    if !local_sockets_available() {
        return Ok(());
    }
    let (base_url, _accepted) = start_stalled_body_server().await?;
    let output = TempDir::new()?;
    let mut config = test_config(&base_url, output.path());
    config.fetch.request_timeout = Duration::from_secs(10);
    config.parse_timeout = Duration::from_millis(300);

    let destination = output.path().join("cat").join("5").join("800x600.jpg");
    let store = Arc::new(MemoryQueueStore::new());
    store
        .enqueue(
            &config.queues.download,
            &encode(DownloadTask {
                url: format!("{base_url}/pic/1/800x600/img-5.jpg"),
                path: destination.clone(),
            }),
        )
        .await?;

    let pipeline = Pipeline::start(config.clone(), store.clone(), test_fetcher(&config)?).await?;
    let requeued = wait_until(Duration::from_secs(10), || {
        pipeline.stats().download.requeued >= 1
    })
    .await;
    let stats = pipeline.stop().await;
    assert!(requeued, "stalled download was not requeued: {stats:?}");

    assert_eq!(stats.download.succeeded, 0);
    assert!(!destination.exists());
    Ok(())
}

#[tokio::test]
async fn test_detail_skips_assets_already_on_disk() -> TestResult {
    let Some(Site {
        server,
        output,
        config,
    }) = mock_site_or_skip().await?
    else {
        return Ok(());
    };
    write_existing(&output.path().join("cat").join("101").join("800x600.jpg"));

    Mock::given(method("GET"))
        .and(path("/cat/101-wallpaper.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_page("101", &["800x600", "1024x768"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/pic/12/800x600/"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(JPEG.to_vec()))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/pic/12/1024x768/"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(JPEG.to_vec()))
        .mount(&server)
        .await;

    let store = Arc::new(RecordingStore::default());
    store
        .enqueue(
            &config.queues.detail,
            &encode(DetailPageTask {
                url: format!("{}/cat/101-wallpaper.html", server.uri()),
                category: "cat".to_string(),
                image_group: "12".to_string(),
                image_number: "101".to_string(),
            }),
        )
        .await?;

    let fresh = output.path().join("cat").join("101").join("1024x768.jpg");
    let pipeline = Pipeline::start(config.clone(), store.clone(), test_fetcher(&config)?).await?;
    let done = wait_until(Duration::from_secs(10), || fresh.exists()).await;
    let stats = pipeline.stop().await;
    assert!(done, "missing resolution was not downloaded: {stats:?}");

    assert_eq!(stats.detail.succeeded, 1);
    assert_eq!(stats.detail.emitted, 1);
    let handed_off: Vec<_> = store
        .enqueued()
        .into_iter()
        .filter(|(queue, _)| *queue == config.queues.download)
        .collect();
    assert_eq!(handed_off.len(), 1);
    assert!(handed_off[0].1.contains("1024x768"));
    Ok(())
}

#[tokio::test]
async fn test_download_of_existing_asset_is_dropped_without_fetch() -> TestResult {
    let Some(Site {
        server,
        output,
        config,
    }) = mock_site_or_skip().await?
    else {
        return Ok(());
    };
    let existing = output.path().join("cat").join("7").join("1024x768.jpg");
    write_existing(&existing);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(JPEG.to_vec()))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryQueueStore::new());
    store
        .enqueue(
            &config.queues.download,
            &encode(DownloadTask {
                url: format!("{}/pic/3/1024x768/img-7.jpg", server.uri()),
                path: existing.clone(),
            }),
        )
        .await?;

    let pipeline = Pipeline::start(config.clone(), store.clone(), test_fetcher(&config)?).await?;
    let done = wait_until(Duration::from_secs(10), || {
        pipeline.stats().download.dropped == 1
    })
    .await;
    let stats = pipeline.stop().await;
    assert!(done, "download task was not dropped: {stats:?}");

    assert_eq!(stats.download.succeeded, 0);
    assert_eq!(std::fs::read(&existing)?, b"already here");
    Ok(())
}

#[tokio::test]
async fn test_download_concurrency_bounded_by_stage_limit() -> TestResult {
    let Some(Site {
        server,
        output,
        config,
    }) = mock_site_or_skip().await?
    else {
        return Ok(());
    };
    let mut config = config;
    config.download = StageSettings {
        workers: 8,
        max_in_flight: 2,
    };

    Mock::given(method("GET"))
        .and(path_regex(r"^/pic/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(JPEG.to_vec())
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryQueueStore::new());
    let mut paths = Vec::new();
    for i in 0..10 {
        let path: PathBuf = output.path().join("cat").join(i.to_string()).join("800x600.jpg");
        store
            .enqueue(
                &config.queues.download,
                &encode(DownloadTask {
                    url: format!("{}/pic/1/800x600/img-{i}.jpg", server.uri()),
                    path: path.clone(),
                }),
            )
            .await?;
        paths.push(path);
    }

    let pipeline = Pipeline::start(config.clone(), store.clone(), test_fetcher(&config)?).await?;
    let done = wait_until(Duration::from_secs(20), || {
        pipeline.stats().download.succeeded == 10
    })
    .await;
    let stats = pipeline.stop().await;
    assert!(done, "downloads did not finish: {stats:?}");

    assert!(
        stats.download.peak_in_flight <= 2,
        "peak in flight {} exceeds limit",
        stats.download.peak_in_flight
    );
    assert!(stats.download.peak_in_flight >= 1);
    assert_eq!(stats.download.in_flight, 0);
    for path in &paths {
        assert!(path.exists(), "missing {}", path.display());
    }
    Ok(())
}

#[tokio::test]
async fn test_stop_with_fetches_in_flight_does_not_deadlock() -> TestResult {
    let Some(Site {
        server,
        output,
        config,
    }) = mock_site_or_skip().await?
    else {
        return Ok(());
    };
    let mut config = config;
    config.fetch.request_timeout = Duration::from_secs(30);
    config.download = StageSettings {
        workers: 3,
        max_in_flight: 3,
    };

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(JPEG.to_vec())
                .set_delay(Duration::from_secs(20)),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryQueueStore::new());
    for i in 0..3 {
        store
            .enqueue(
                &config.queues.download,
                &encode(DownloadTask {
                    url: format!("{}/pic/1/800x600/img-{i}.jpg", server.uri()),
                    path: output.path().join(format!("{i}.jpg")),
                }),
            )
            .await?;
    }

    let pipeline = Pipeline::start(config.clone(), store.clone(), test_fetcher(&config)?).await?;
    let busy = wait_until(Duration::from_secs(10), || {
        pipeline.stats().download.in_flight >= 1
    })
    .await;
    assert!(busy, "no fetch went in flight");

    let stats = tokio::time::timeout(Duration::from_secs(5), pipeline.stop()).await?;
    assert_eq!(stats.download.succeeded, 0);
    assert_eq!(stats.download.in_flight, 0);
    Ok(())
}

#[tokio::test]
async fn test_idle_pipeline_stops_promptly() -> TestResult {
    let Some(Site {
        server: _server,
        output: _output,
        config,
    }) = mock_site_or_skip().await?
    else {
        return Ok(());
    };
    let mut config = config;
    config.idle_interval = Duration::from_secs(3600);

    let store = Arc::new(MemoryQueueStore::new());
    let pipeline = Pipeline::start(config.clone(), store, test_fetcher(&config)?).await?;
    assert_eq!(pipeline.active_workers(), 4);

    let stats = tokio::time::timeout(Duration::from_secs(5), pipeline.stop()).await?;
    assert_eq!(stats.discovery.dequeued, 0);
    assert_eq!(stats.download.dequeued, 0);
    Ok(())
}

#[tokio::test]
async fn test_payloads_never_cross_stages() -> TestResult {
    let Some(Site {
        server,
        output,
        config,
    }) = mock_site_or_skip().await?
    else {
        return Ok(());
    };

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["1"])))
        .expect(0)
        .mount(&server)
        .await;

    let download = encode(DownloadTask {
        url: format!("{}/pic/1/800x600/img-1.jpg", server.uri()),
        path: output.path().join("x.jpg"),
    });
    let start = encode(StartPageTask {
        url: format!("{}/cat/page/1/", server.uri()),
    });
    let detail = encode(DetailPageTask {
        url: format!("{}/cat/1-wallpaper.html", server.uri()),
        category: "cat".to_string(),
        image_group: "1".to_string(),
        image_number: "1".to_string(),
    });

    let store = Arc::new(MemoryQueueStore::new());
    store.enqueue(&config.queues.discovery, &download).await?;
    store.enqueue(&config.queues.detail, &start).await?;
    store.enqueue(&config.queues.download, &detail).await?;

    let pipeline = Pipeline::start(config.clone(), store.clone(), test_fetcher(&config)?).await?;
    let done = wait_until(Duration::from_secs(10), || {
        let s = pipeline.stats();
        s.discovery.dropped + s.detail.dropped + s.download.dropped == 3
    })
    .await;
    let stats = pipeline.stop().await;
    assert!(done, "foreign payloads were not dropped: {stats:?}");

    assert_eq!(stats.discovery.dropped, 1);
    assert_eq!(stats.detail.dropped, 1);
    assert_eq!(stats.download.dropped, 1);
    for queue in [
        &config.queues.discovery,
        &config.queues.detail,
        &config.queues.download,
    ] {
        assert_eq!(store.count(queue).await?, 0, "queue {queue} not empty");
    }
    Ok(())
}
