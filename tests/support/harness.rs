//! Shared fixtures for pipeline integration tests.

use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use crawler_core::extract::DetailRules;
use crawler_core::{FetchSettings, HttpFetcher, PipelineConfig, StageSettings};
use tempfile::TempDir;
use wiremock::MockServer;

/// Set to `1` to turn skipped socket or Redis tests into failures (CI).
const REQUIRE_ENV: &str = "CRAWLER_REQUIRE_LIVE_TESTS";

/// Redis URL for the live Redis tests; they are skipped when unset.
const REDIS_URL_ENV: &str = "CRAWLER_TEST_REDIS_URL";

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

/// A mock gallery site with a scratch output directory and a pipeline
/// configuration wired to both.
pub struct Site {
    pub server: MockServer,
    pub output: TempDir,
    pub config: PipelineConfig,
}

fn live_tests_required() -> bool {
    std::env::var(REQUIRE_ENV)
        .is_ok_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn skip(reason: &str) {
    assert!(
        !live_tests_required(),
        "{reason}; unset {REQUIRE_ENV} to allow skipping"
    );
    eprintln!("[crawler-tests] {reason}; skipping");
}

/// Returns false, after logging why, when this host cannot bind localhost.
pub fn local_sockets_available() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return true;
    }
    skip("cannot bind a localhost socket");
    false
}

/// Starts a mock site, or returns `None` when sockets are unavailable.
pub async fn mock_site_or_skip() -> TestResult<Option<Site>> {
    if !local_sockets_available() {
        return Ok(None);
    }
    let server = MockServer::start().await;
    let output = TempDir::new()?;
    let config = test_config(&server.uri(), output.path());
    Ok(Some(Site {
        server,
        output,
        config,
    }))
}

/// Returns the Redis URL for live tests, or `None` when none is configured.
pub fn redis_url_or_skip() -> Option<String> {
    match std::env::var(REDIS_URL_ENV) {
        Ok(url) if !url.is_empty() => Some(url),
        _ => {
            skip(&format!("{REDIS_URL_ENV} is not set"));
            None
        }
    }
}

/// Listing page with one gallery entry per image number, all in group 12.
pub fn listing_page(numbers: &[&str]) -> String {
    let entries: String = numbers
        .iter()
        .map(|n| {
            format!(
                r#"<a class="gallery_image" href="/cat/{n}-wallpaper.html">
                     <img class="img-responsive img-rounded" src="/mini/12/{n}.jpg">
                   </a>"#
            )
        })
        .collect();
    format!("<html><body><div class=\"gallery\">{entries}</div></body></html>")
}

/// Detail page offering the given resolutions for `number`.
pub fn detail_page(number: &str, resolutions: &[&str]) -> String {
    let links: String = resolutions
        .iter()
        .map(|r| format!(r#"<li><a href="/download/{number}/{r}/">{r}</a></li>"#))
        .collect();
    format!(r#"<html><body><ul class="llink list-inline">{links}</ul></body></html>"#)
}

/// Small, fast configuration pointing asset URLs at `base_url`.
pub fn test_config(base_url: &str, output_dir: &Path) -> PipelineConfig {
    let single = StageSettings {
        workers: 1,
        max_in_flight: 1,
    };
    PipelineConfig {
        store_url: "memory".to_string(),
        discovery: single,
        detail: single,
        download: StageSettings {
            workers: 2,
            max_in_flight: 2,
        },
        idle_interval: Duration::from_millis(20),
        fetch: FetchSettings {
            request_timeout: Duration::from_secs(2),
            ..FetchSettings::default()
        },
        parse_timeout: Duration::from_secs(2),
        offload_workers: 4,
        output_dir: output_dir.to_path_buf(),
        stats_interval: Duration::from_secs(60),
        shutdown_grace: Duration::from_secs(2),
        detail_rules: DetailRules {
            asset_url_template: format!(
                "{base_url}/pic/{{group}}/{{resolution}}/img-{{number}}.jpg"
            ),
            ..DetailRules::default()
        },
        ..PipelineConfig::default()
    }
}

/// Fetcher built from `config`'s request settings.
pub fn test_fetcher(config: &PipelineConfig) -> TestResult<HttpFetcher> {
    Ok(HttpFetcher::new(config.fetch.clone())?)
}

/// Polls `condition` every 20ms until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
