//! Non-blocking HTTP fetching for the stage workers.
//!
//! # Features
//!
//! - GET only, fixed request deadline (30s by default)
//! - Redirects are returned as data, never followed
//! - TLS certificate validation disabled
//! - Optional per-request proxy from a rotating [`ProxyPool`]
//! - Body reads under a separate, shorter deadline
//!
//! Failures are plain values ([`FetchError`]); the calling stage decides
//! what to do with them.

mod client;
mod constants;
mod error;
pub mod proxy;

pub use client::{FetchSettings, HttpFetcher, read_bytes, read_text};
pub use constants::{BODY_TIMEOUT_SECS, DEFAULT_USER_AGENT, REQUEST_TIMEOUT_SECS};
pub use error::{FailureKind, FetchError};
pub use proxy::{ProxyError, ProxyPool};
