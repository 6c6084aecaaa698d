//! Types for OAuth 2.0 Device Authorization Grant.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `grant_type` for the device access token request (RFC 8628 §3.4).
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Errors from the initial device authorization request. All are fatal.
#[derive(Debug, Error)]
pub enum AuthorizationRequestError {
    #[error("Device authorization request to {endpoint} failed: {reason}")]
    Network { endpoint: String, reason: String },

    #[error("Device authorization endpoint {endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Device authorization rejected by {endpoint}: error = {code}; error_description = {}", .description.as_deref().unwrap_or(""))]
    Rejected {
        endpoint: String,
        code: String,
        description: Option<String>,
    },

    #[error("Invalid device authorization response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("Device authorization response from {endpoint} is missing '{field}'")]
    MissingField {
        endpoint: String,
        field: &'static str,
    },
}

/// Transport-level failure while polling the token endpoint. Fatal.
#[derive(Debug, Error)]
pub enum PollTransportError {
    #[error("Token request to {endpoint} failed: {reason}")]
    Network { endpoint: String, reason: String },

    #[error("Invalid token response from {endpoint} (HTTP {status}): {reason}")]
    InvalidResponse {
        endpoint: String,
        status: u16,
        reason: String,
    },
}

/// Why the polling loop stopped without a terminal protocol state.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Transport(#[from] PollTransportError),

    #[error("Device flow cancelled")]
    Cancelled,
}

/// Device authorization request parameters, resolved from user configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAuthorizationRequest {
    pub client_id: String,
    /// Scope tokens in the order entered, without duplicates.
    pub scope: Vec<String>,
    pub audience: Option<String>,
}

impl DeviceAuthorizationRequest {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            scope: Vec::new(),
            audience: None,
        }
    }

    /// Set the scopes, keeping first occurrences in order.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.scope.clear();
        for scope in scopes {
            for token in scope.as_ref().split_whitespace() {
                if !self.scope.iter().any(|s| s == token) {
                    self.scope.push(token.to_string());
                }
            }
        }
        self
    }

    /// Set the audience. Empty strings mean "no audience".
    pub fn with_audience(mut self, audience: Option<&str>) -> Self {
        self.audience = audience
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from);
        self
    }

    /// Space-joined `scope` parameter, or `None` when no scope was chosen.
    pub fn scope_param(&self) -> Option<String> {
        if self.scope.is_empty() {
            None
        } else {
            Some(self.scope.join(" "))
        }
    }

    /// Form body for the device authorization endpoint. The client is public,
    /// so no secret is ever included.
    pub fn form_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("client_id", self.client_id.clone())];

        if let Some(scope) = self.scope_param() {
            params.push(("scope", scope));
        }

        if let Some(audience) = &self.audience {
            params.push(("audience", audience.clone()));
        }

        params
    }
}

/// Raw response from the device authorization endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DeviceAuthorizationResponse {
    #[serde(default)]
    pub device_code: Option<String>,
    #[serde(default)]
    pub user_code: Option<String>,
    #[serde(default)]
    pub verification_uri: Option<String>,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub interval: Option<u64>,
}

/// A pending device authorization, as returned by the server.
#[derive(Clone)]
pub struct DeviceAuthorizationHandle {
    device_code: String,
    pub user_code: String,
    pub verification_uri: Option<String>,
    pub verification_uri_complete: String,
    /// Lifetime in seconds, as reported by the server.
    pub expires_in: u64,
    /// Absolute deadline derived from `expires_in` at receipt time.
    pub expires_at: Instant,
    /// Initial polling interval.
    pub interval: Duration,
}

impl DeviceAuthorizationHandle {
    pub(crate) fn from_response(
        response: DeviceAuthorizationResponse,
        endpoint: &str,
        received_at: Instant,
        default_interval: Duration,
    ) -> Result<Self, AuthorizationRequestError> {
        let missing = |field: &'static str| AuthorizationRequestError::MissingField {
            endpoint: endpoint.to_string(),
            field,
        };

        let device_code = non_empty(response.device_code).ok_or_else(|| missing("device_code"))?;
        let user_code = non_empty(response.user_code).ok_or_else(|| missing("user_code"))?;
        let verification_uri_complete = non_empty(response.verification_uri_complete)
            .ok_or_else(|| missing("verification_uri_complete"))?;

        let expires_in = match response.expires_in {
            Some(secs) if secs > 0 => secs,
            _ => return Err(missing("expires_in")),
        };

        // RFC 8628 §3.2: if no value is provided, clients MUST use 5 as the default.
        let interval = match response.interval {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => default_interval,
        };

        Ok(Self {
            device_code,
            user_code,
            verification_uri: non_empty(response.verification_uri),
            verification_uri_complete,
            expires_in,
            expires_at: received_at + Duration::from_secs(expires_in),
            interval,
        })
    }

    /// Build a handle directly, e.g. when resuming a known authorization.
    pub fn new(
        device_code: &str,
        user_code: &str,
        verification_uri_complete: &str,
        expires_at: Instant,
        interval: Duration,
    ) -> Self {
        let expires_in = expires_at.saturating_duration_since(Instant::now()).as_secs();
        Self {
            device_code: device_code.to_string(),
            user_code: user_code.to_string(),
            verification_uri: None,
            verification_uri_complete: verification_uri_complete.to_string(),
            expires_in,
            expires_at,
            interval,
        }
    }

    /// The confidential device code. Never display or log this.
    pub fn device_code(&self) -> &str {
        &self.device_code
    }
}

impl fmt::Debug for DeviceAuthorizationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAuthorizationHandle")
            .field("device_code", &"<redacted>")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("verification_uri_complete", &self.verification_uri_complete)
            .field("expires_in", &self.expires_in)
            .field("interval", &self.interval)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Token response from the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// The token type (usually "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Lifetime of the access token in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Optional refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Optional ID token (for OIDC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Optional scope granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Error response from the token endpoint during polling.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    /// The error code.
    pub error: String,

    /// Optional error description.
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenErrorResponse {
    /// Classify the error code.
    pub fn into_outcome(self) -> PollOutcome {
        match self.error.as_str() {
            "authorization_pending" => PollOutcome::Pending,
            "slow_down" => PollOutcome::SlowDown,
            "access_denied" => PollOutcome::Denied,
            "expired_token" => PollOutcome::Expired,
            _ => PollOutcome::ProtocolError {
                code: self.error,
                description: self.error_description,
            },
        }
    }
}

/// Result of a single token request.
#[derive(Debug)]
pub enum PollOutcome {
    Success(TokenResponse),
    Pending,
    SlowDown,
    Denied,
    Expired,
    ProtocolError {
        code: String,
        description: Option<String>,
    },
    TransportError(PollTransportError),
}
