//! Rotating proxy pool.
//!
//! The crawler only reads the pool. Populating it (for example a feeder
//! writing `http://ip:port` keys with a TTL into Redis) happens elsewhere.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default key pattern for proxies stored in Redis.
pub const DEFAULT_REDIS_PROXY_PATTERN: &str = "http://*";

/// Errors building a proxy pool from its configuration string.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A static list contained no usable entry.
    #[error("static proxy list is empty")]
    EmptyStaticList,

    /// The Redis proxy source could not be reached.
    #[error("failed to connect to proxy source {url}: {message}")]
    Connection {
        /// The Redis URL.
        url: String,
        /// Why the connection failed.
        message: String,
    },

    /// The setting matches no known source form.
    #[error(
        "unsupported proxy source '{0}'\n  Suggestion: use none, static:URL[,URL...] or redis://host:port/db"
    )]
    Unsupported(String),
}

/// Source of proxies, picked per request.
pub enum ProxyPool {
    /// Every request goes direct.
    Direct,
    /// Round-robin over a fixed list.
    Static {
        /// Proxy URLs.
        proxies: Vec<String>,
        /// Next index to hand out.
        next: AtomicUsize,
    },
    /// Random choice among Redis keys matching a pattern.
    Redis {
        /// Redis connection manager.
        conn: ConnectionManager,
        /// Key pattern, e.g. `http://*`.
        pattern: String,
    },
}

impl fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("ProxyPool::Direct"),
            Self::Static { proxies, .. } => f
                .debug_struct("ProxyPool::Static")
                .field("proxies", &proxies.len())
                .finish(),
            Self::Redis { pattern, .. } => f
                .debug_struct("ProxyPool::Redis")
                .field("pattern", pattern)
                .finish_non_exhaustive(),
        }
    }
}

impl ProxyPool {
    /// Builds a round-robin pool over `proxies`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::EmptyStaticList`] if `proxies` is empty.
    pub fn from_list(proxies: Vec<String>) -> Result<Self, ProxyError> {
        if proxies.is_empty() {
            return Err(ProxyError::EmptyStaticList);
        }
        Ok(Self::Static {
            proxies,
            next: AtomicUsize::new(0),
        })
    }

    /// Builds a pool from its configuration string.
    ///
    /// Accepted forms: `none`, `static:URL[,URL...]`, `redis://host:port/db`
    /// (optionally followed by `#PATTERN` to override the key pattern).
    ///
    /// # Errors
    ///
    /// Returns `ProxyError` if the setting is malformed or Redis is unreachable.
    #[instrument]
    pub async fn from_setting(setting: &str) -> Result<Self, ProxyError> {
        let setting = setting.trim();
        if setting.is_empty() || setting == "none" {
            return Ok(Self::Direct);
        }

        if let Some(list) = setting.strip_prefix("static:") {
            let proxies = list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            return Self::from_list(proxies);
        }

        if setting.starts_with("redis://") || setting.starts_with("rediss://") {
            let (url, pattern) = setting
                .split_once('#')
                .unwrap_or((setting, DEFAULT_REDIS_PROXY_PATTERN));
            let connection_error = |e: redis::RedisError| ProxyError::Connection {
                url: url.to_string(),
                message: e.to_string(),
            };
            let client = redis::Client::open(url).map_err(connection_error)?;
            let conn = ConnectionManager::new(client)
                .await
                .map_err(connection_error)?;
            return Ok(Self::Redis {
                conn,
                pattern: pattern.to_string(),
            });
        }

        Err(ProxyError::Unsupported(setting.to_string()))
    }

    /// Picks a proxy for the next request.
    ///
    /// Returns `None` when the pool is direct, empty, or cannot be read;
    /// the request then proceeds without a proxy.
    pub async fn pick(&self) -> Option<String> {
        match self {
            Self::Direct => None,
            Self::Static { proxies, next } => {
                let index = next.fetch_add(1, Ordering::Relaxed) % proxies.len();
                proxies.get(index).cloned()
            }
            Self::Redis { conn, pattern } => {
                let mut conn = conn.clone();
                let keys: Vec<String> = match conn.keys(pattern.as_str()).await {
                    Ok(keys) => keys,
                    Err(e) => {
                        warn!(error = %e, "proxy lookup failed, going direct");
                        return None;
                    }
                };
                let picked = keys.choose(&mut rand::thread_rng()).cloned();
                if picked.is_none() {
                    debug!(pattern = %pattern, "proxy pool is empty, going direct");
                }
                picked
            }
        }
    }
}
