//! OIDC discovery (OpenID Connect Discovery 1.0).
//!
//! Fetches `<authority>/.well-known/openid-configuration` and reduces it to
//! the endpoints the device flow needs. The result is memoized per authority
//! for the lifetime of the resolver, so every later stage of a run shares one
//! read-only copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid authority URL '{authority}': {reason}")]
    InvalidAuthority { authority: String, reason: String },

    #[error("Failed to fetch OIDC discovery document from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("OIDC discovery document at {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to parse OIDC discovery document from {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("OIDC discovery document at {url} is missing required field '{field}'")]
    MissingField { url: String, field: &'static str },

    #[error("Discovery issuer '{actual}' doesn't match authority '{expected}'")]
    IssuerMismatch { expected: String, actual: String },
}

/// Endpoints and key material advertised by an issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerMetadata {
    pub issuer: String,
    pub device_authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
    /// Empty when the document does not advertise any.
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

impl IssuerMetadata {
    /// Whether the issuer advertises `alg` for ID tokens. An issuer that
    /// advertises nothing is assumed to support it.
    pub fn supports_signing_alg(&self, alg: &str) -> bool {
        self.id_token_signing_alg_values_supported.is_empty()
            || self
                .id_token_signing_alg_values_supported
                .iter()
                .any(|a| a == alg)
    }
}

/// Raw discovery document. Every field is optional here so that a missing
/// field is reported by name instead of as a generic parse failure.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: Option<String>,
    device_authorization_endpoint: Option<String>,
    token_endpoint: Option<String>,
    userinfo_endpoint: Option<String>,
    jwks_uri: Option<String>,
    #[serde(default)]
    id_token_signing_alg_values_supported: Vec<String>,
}

impl DiscoveryDocument {
    fn into_metadata(self, url: &str, authority: &str) -> Result<IssuerMetadata, DiscoveryError> {
        let issuer = required(self.issuer, url, "issuer")?;

        let matches = normalize_authority(&issuer)
            .map(|normalized| normalized == authority)
            .unwrap_or(false);
        if !matches {
            return Err(DiscoveryError::IssuerMismatch {
                expected: authority.to_string(),
                actual: issuer,
            });
        }

        Ok(IssuerMetadata {
            issuer,
            device_authorization_endpoint: required(
                self.device_authorization_endpoint,
                url,
                "device_authorization_endpoint",
            )?,
            token_endpoint: required(self.token_endpoint, url, "token_endpoint")?,
            userinfo_endpoint: self.userinfo_endpoint.filter(|s| !s.is_empty()),
            jwks_uri: self.jwks_uri.filter(|s| !s.is_empty()),
            id_token_signing_alg_values_supported: self.id_token_signing_alg_values_supported,
        })
    }
}

fn required(
    value: Option<String>,
    url: &str,
    field: &'static str,
) -> Result<String, DiscoveryError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DiscoveryError::MissingField {
            url: url.to_string(),
            field,
        })
}

/// Normalize an authority to `scheme://host[/path]` without a trailing slash.
pub fn normalize_authority(authority: &str) -> Result<String, DiscoveryError> {
    let invalid = |reason: String| DiscoveryError::InvalidAuthority {
        authority: authority.to_string(),
        reason,
    };

    let parsed = Url::parse(authority).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "https" | "http" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    let Some(host) = parsed.host_str() else {
        return Err(invalid("missing host".to_string()));
    };

    // Url lowercases scheme and host and drops a default port.
    let mut normalized = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        normalized.push_str(&format!(":{}", port));
    }
    normalized.push_str(parsed.path().trim_end_matches('/'));
    Ok(normalized)
}

/// Discovery document URL for an authority.
pub fn discovery_url(authority: &str) -> Result<String, DiscoveryError> {
    Ok(format!("{}{}", normalize_authority(authority)?, DISCOVERY_PATH))
}

/// Resolves and memoizes issuer metadata.
pub struct IssuerResolver {
    http_client: reqwest::Client,
    cache: Mutex<HashMap<String, Arc<IssuerMetadata>>>,
}

impl IssuerResolver {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the metadata for `authority`, fetching it on first use.
    pub async fn discover(&self, authority: &str) -> Result<Arc<IssuerMetadata>, DiscoveryError> {
        let authority = normalize_authority(authority)?;

        if let Some(cached) = self.cached(&authority) {
            debug!(authority = %authority, "Using memoized issuer metadata");
            return Ok(cached);
        }

        let metadata = Arc::new(self.fetch(&authority).await?);
        info!(
            issuer = %metadata.issuer,
            device_authorization_endpoint = %metadata.device_authorization_endpoint,
            "Discovered issuer metadata"
        );

        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(authority, Arc::clone(&metadata));

        Ok(metadata)
    }

    fn cached(&self, authority: &str) -> Option<Arc<IssuerMetadata>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(authority)
            .cloned()
    }

    async fn fetch(&self, authority: &str) -> Result<IssuerMetadata, DiscoveryError> {
        let url = discovery_url(authority)?;
        debug!(url = %url, "Fetching OIDC discovery document");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Fetch {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let document = response
            .json::<DiscoveryDocument>()
            .await
            .map_err(|e| DiscoveryError::Parse {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        document.into_metadata(&url, authority)
    }
}
