//! Device flow client implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::types::{
    AuthorizationRequestError, DeviceAuthorizationHandle, DeviceAuthorizationRequest,
    DeviceAuthorizationResponse, PollOutcome, PollTransportError, TokenErrorResponse,
    TokenResponse, DEVICE_CODE_GRANT_TYPE,
};
use crate::oidc::IssuerMetadata;

/// A token endpoint that can be polled with a device code.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Send one device access token request and classify the reply.
    async fn poll(&self, device_code: &str) -> PollOutcome;
}

/// Client for OAuth 2.0 Device Authorization Grant.
///
/// The client is public (`token_endpoint_auth_method=none`): only
/// `client_id` identifies it, no secret is ever sent.
pub struct DeviceAuthorizationClient {
    http_client: Client,
    default_interval: Duration,
}

impl DeviceAuthorizationClient {
    pub fn new(http_client: Client, default_interval: Duration) -> Self {
        Self {
            http_client,
            default_interval,
        }
    }

    /// Start the device authorization flow.
    ///
    /// Returns the handle containing the user code and verification URI
    /// that should be displayed to the user.
    pub async fn request_device_authorization(
        &self,
        metadata: &IssuerMetadata,
        request: &DeviceAuthorizationRequest,
    ) -> Result<DeviceAuthorizationHandle, AuthorizationRequestError> {
        let endpoint = metadata.device_authorization_endpoint.as_str();
        debug!(endpoint = %endpoint, scope = ?request.scope_param(), "Requesting device authorization");

        let response = self
            .http_client
            .post(endpoint)
            .form(&request.form_params())
            .send()
            .await
            .map_err(|e| AuthorizationRequestError::Network {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        let received_at = Instant::now();

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthorizationRequestError::Network {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<TokenErrorResponse>(&body) {
                return Err(AuthorizationRequestError::Rejected {
                    endpoint: endpoint.to_string(),
                    code: error.error,
                    description: error.error_description,
                });
            }
            return Err(AuthorizationRequestError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed = serde_json::from_str::<DeviceAuthorizationResponse>(&body).map_err(|e| {
            AuthorizationRequestError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        })?;

        DeviceAuthorizationHandle::from_response(
            parsed,
            endpoint,
            received_at,
            self.default_interval,
        )
    }

    /// Bind this client to a token endpoint for polling.
    pub fn token_endpoint(&self, metadata: &IssuerMetadata, client_id: &str) -> HttpTokenEndpoint {
        HttpTokenEndpoint {
            http_client: self.http_client.clone(),
            token_endpoint: metadata.token_endpoint.clone(),
            client_id: client_id.to_string(),
        }
    }
}

/// The issuer's token endpoint, reached over HTTP.
pub struct HttpTokenEndpoint {
    http_client: Client,
    token_endpoint: String,
    client_id: String,
}

impl HttpTokenEndpoint {
    /// Make a single token request.
    async fn request_token(&self, device_code: &str) -> Result<PollOutcome, PollTransportError> {
        let params = [
            ("grant_type", DEVICE_CODE_GRANT_TYPE),
            ("device_code", device_code),
            ("client_id", self.client_id.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| PollTransportError::Network {
                endpoint: self.token_endpoint.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PollTransportError::Network {
                endpoint: self.token_endpoint.clone(),
                reason: e.to_string(),
            })?;

        let invalid = |reason: String| PollTransportError::InvalidResponse {
            endpoint: self.token_endpoint.clone(),
            status: status.as_u16(),
            reason,
        };

        // An `error` member wins regardless of status: some servers answer
        // pending polls with 200.
        if let Ok(error) = serde_json::from_slice::<TokenErrorResponse>(&body) {
            return Ok(error.into_outcome());
        }

        if !status.is_success() {
            return Err(invalid("response carries no OAuth error code".to_string()));
        }

        serde_json::from_slice::<TokenResponse>(&body)
            .map(PollOutcome::Success)
            .map_err(|e| invalid(e.to_string()))
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn poll(&self, device_code: &str) -> PollOutcome {
        match self.request_token(device_code).await {
            Ok(outcome) => outcome,
            Err(e) => PollOutcome::TransportError(e),
        }
    }
}
