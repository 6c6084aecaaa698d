//! Tunables for a device flow run.

use std::time::Duration;

use jsonwebtoken::Algorithm;

/// Per-request HTTP timeout. Independent of the device code lifetime.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// RFC 8628 §3.2: clients MUST use 5 seconds when `interval` is absent.
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Added to the polling interval on every `slow_down` response (RFC 8628 §3.5).
pub const SLOW_DOWN_INCREMENT_SECS: u64 = 5;

/// Clock skew tolerance in seconds for ID token time checks.
pub const CLOCK_SKEW_TOLERANCE_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Timeout applied to every individual HTTP request.
    pub request_timeout: Duration,

    /// Polling interval used when the server does not supply one.
    pub default_interval: Duration,

    /// Fixed amount the interval grows by on `slow_down`.
    pub slow_down_increment: Duration,

    /// Leeway for `exp` and `iat` checks.
    pub clock_skew: Duration,

    /// Expected `id_token_signed_response_alg`.
    pub id_token_algorithm: Algorithm,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            default_interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            slow_down_increment: Duration::from_secs(SLOW_DOWN_INCREMENT_SECS),
            clock_skew: Duration::from_secs(CLOCK_SKEW_TOLERANCE_SECS),
            id_token_algorithm: Algorithm::RS256,
        }
    }
}

impl FlowSettings {
    /// Override the per-request HTTP timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the HTTP client shared by every stage of a run.
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .user_agent(concat!("oidc-device-flow/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}
