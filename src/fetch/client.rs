//! HTTP client wrapper for fetching pages and assets.
//!
//! This module provides the [`HttpFetcher`] which issues GET requests on
//! the tokio runtime with a fixed deadline, no redirect following, TLS
//! certificate validation disabled and an optional per-request proxy.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy, Response, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{DEFAULT_USER_AGENT, REQUEST_TIMEOUT_SECS};
use super::error::FetchError;

/// Request settings shared by every client the fetcher builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    /// Deadline for connecting and receiving response headers.
    pub request_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Non-blocking HTTP fetcher.
///
/// `reqwest` binds proxies to clients, so one client is built lazily per
/// distinct proxy URL and kept for reuse. Clones share the same clients
/// and connection pools.
///
/// # Example
///
/// ```no_run
/// use crawler_core::fetch::{FetchSettings, HttpFetcher, read_text};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = HttpFetcher::new(FetchSettings::default())?;
/// let response = fetcher.fetch("https://example.com/", None).await?;
/// let body = read_text(response, "https://example.com/", Duration::from_secs(10)).await?;
/// println!("{} bytes", body.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    direct: Client,
    proxied: Arc<DashMap<String, Client>>,
    settings: FetchSettings,
}

impl HttpFetcher {
    /// Creates a fetcher with the given settings.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    #[instrument(level = "debug")]
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let direct = build_client(&settings, None).map_err(FetchError::Client)?;
        Ok(Self {
            direct,
            proxied: Arc::new(DashMap::new()),
            settings,
        })
    }

    /// Issues a GET request for `url`, through `proxy` when given.
    ///
    /// Only a `200 OK` response is returned; every other status, redirects
    /// included, comes back as [`FetchError::HttpStatus`]. The body is not
    /// read here; use [`read_text`] or [`read_bytes`] with a deadline.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` if the URL is invalid, the proxy is unusable,
    /// the request fails or times out, or the status is not 200.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &str, proxy: Option<&str>) -> Result<Response, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;

        let client = self.client_for(proxy)?;
        debug!(proxy = proxy.unwrap_or("direct"), "sending request");

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::http_status(url, response.status().as_u16()));
        }

        Ok(response)
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, FetchError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        if let Some(client) = self.proxied.get(proxy) {
            return Ok(client.clone());
        }

        let client =
            build_client(&self.settings, Some(proxy)).map_err(|source| FetchError::InvalidProxy {
                proxy: proxy.to_string(),
                source,
            })?;
        self.proxied.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

fn build_client(settings: &FetchSettings, proxy: Option<&str>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(settings.request_timeout)
        .timeout(settings.request_timeout)
        .redirect(Policy::none())
        .danger_accept_invalid_certs(true)
        .gzip(true)
        .user_agent(settings.user_agent.clone());
    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    } else {
        builder = builder.no_proxy();
    }
    builder.build()
}

/// Reads the response body as text within `deadline`.
///
/// # Errors
///
/// Returns [`FetchError::BodyTimeout`] if the deadline expires and
/// [`FetchError::Body`] if the body cannot be read or decoded.
pub async fn read_text(
    response: Response,
    url: &str,
    deadline: Duration,
) -> Result<String, FetchError> {
    tokio::time::timeout(deadline, response.text())
        .await
        .map_err(|_| FetchError::body_timeout(url, deadline))?
        .map_err(|e| FetchError::body(url, e))
}

/// Reads the full response body within `deadline`.
///
/// # Errors
///
/// Returns [`FetchError::BodyTimeout`] if the deadline expires and
/// [`FetchError::Body`] if the body cannot be read.
pub async fn read_bytes(
    response: Response,
    url: &str,
    deadline: Duration,
) -> Result<Vec<u8>, FetchError> {
    let bytes = tokio::time::timeout(deadline, response.bytes())
        .await
        .map_err(|_| FetchError::body_timeout(url, deadline))?
        .map_err(|e| FetchError::body(url, e))?;
    Ok(bytes.to_vec())
}
