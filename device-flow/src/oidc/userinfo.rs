//! Best-effort UserInfo endpoint fetch.
//!
//! An access token scoped to a resource server often cannot read userinfo,
//! so every failure here degrades to "no result" and never fails the run.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::oidc::discovery::IssuerMetadata;

/// The UserInfo response: a JSON object of claims.
pub type UserInfo = Map<String, Value>;

#[derive(Debug, Error)]
pub enum UserInfoError {
    #[error("Issuer does not publish a userinfo_endpoint")]
    NoEndpoint,

    #[error("UserInfo request to {endpoint} failed: {reason}")]
    Network { endpoint: String, reason: String },

    #[error("UserInfo endpoint {endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Invalid UserInfo response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

pub struct UserInfoFetcher {
    http_client: reqwest::Client,
}

impl UserInfoFetcher {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Fetch userinfo, returning `None` on any failure.
    pub async fn fetch_user_info(
        &self,
        access_token: &str,
        metadata: &IssuerMetadata,
    ) -> Option<UserInfo> {
        match self.try_fetch(access_token, metadata).await {
            Ok(info) => Some(info),
            Err(UserInfoError::NoEndpoint) => {
                debug!("Skipping userinfo: no userinfo_endpoint advertised");
                None
            }
            Err(e) => {
                warn!(error = %e, "UserInfo unavailable");
                None
            }
        }
    }

    /// Fetch userinfo, surfacing the reason on failure.
    pub async fn try_fetch(
        &self,
        access_token: &str,
        metadata: &IssuerMetadata,
    ) -> Result<UserInfo, UserInfoError> {
        let endpoint = metadata
            .userinfo_endpoint
            .as_deref()
            .ok_or(UserInfoError::NoEndpoint)?;

        let response = self
            .http_client
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| UserInfoError::Network {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(UserInfoError::Status {
                endpoint: endpoint.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .json::<UserInfo>()
            .await
            .map_err(|e| UserInfoError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metadata(userinfo_endpoint: Option<String>) -> IssuerMetadata {
        IssuerMetadata {
            issuer: "https://tenant.example.com/".to_string(),
            device_authorization_endpoint: "https://tenant.example.com/oauth/device/code".into(),
            token_endpoint: "https://tenant.example.com/oauth/token".into(),
            userinfo_endpoint,
            jwks_uri: None,
            id_token_signing_alg_values_supported: vec![],
        }
    }

    #[tokio::test]
    async fn test_fetch_user_info_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer at-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sub": "auth0|123",
                "email": "jane@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = UserInfoFetcher::new(reqwest::Client::new());
        let info = fetcher
            .fetch_user_info(
                "at-123",
                &metadata(Some(format!("{}/userinfo", server.uri()))),
            )
            .await
            .unwrap();

        assert_eq!(info["sub"], "auth0|123");
        assert_eq!(info["email"], "jane@example.com");
    }

    #[tokio::test]
    async fn test_forbidden_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let fetcher = UserInfoFetcher::new(reqwest::Client::new());
        let metadata = metadata(Some(format!("{}/userinfo", server.uri())));

        assert!(fetcher.fetch_user_info("at-123", &metadata).await.is_none());
        assert!(matches!(
            fetcher.try_fetch("at-123", &metadata).await,
            Err(UserInfoError::Status { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_non_object_body_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Unauthorized"))
            .mount(&server)
            .await;

        let fetcher = UserInfoFetcher::new(reqwest::Client::new());
        let metadata = metadata(Some(format!("{}/userinfo", server.uri())));

        assert!(matches!(
            fetcher.try_fetch("at-123", &metadata).await,
            Err(UserInfoError::InvalidResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_endpoint() {
        let fetcher = UserInfoFetcher::new(reqwest::Client::new());
        assert!(fetcher
            .fetch_user_info("at-123", &metadata(None))
            .await
            .is_none());
    }
}
