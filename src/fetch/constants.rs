//! Constants for the fetch module (timeouts, identification).

/// Default per-request timeout covering connect and response headers (30 seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default deadline for reading and decoding a response body (10 seconds).
pub const BODY_TIMEOUT_SECS: u64 = 10;

/// Browser User-Agent sent with every request unless overridden.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
