//! End-to-end device flow run.
//!
//! Discovery, device authorization, polling, ID token validation and the
//! userinfo fetch run strictly in sequence; a fatal error at any stage ends
//! the run. Presentation is delegated to a [`FlowEvents`] implementation.

use std::future::Future;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::device_flow::{
    AuthorizationRequestError, DeviceAuthorizationClient, DeviceAuthorizationRequest, PollError,
    PollState, PollTransportError, PollingEngine, TokenResponse,
};
use crate::oidc::{
    DiscoveryError, IssuerResolver, TokenValidator, UserInfo, UserInfoFetcher, ValidatedClaims,
    ValidationError,
};
use crate::settings::FlowSettings;

/// Fatal errors: the run is aborted and no tokens are reported.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Device authorization failed: {0}")]
    AuthorizationRequest(#[from] AuthorizationRequestError),

    #[error("Polling failed: {0}")]
    PollTransport(#[from] PollTransportError),

    #[error("ID token validation failed: {0}")]
    TokenValidation(#[from] ValidationError),

    #[error("Device flow cancelled")]
    Cancelled,
}

impl From<PollError> for FlowError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::Transport(e) => FlowError::PollTransport(e),
            PollError::Cancelled => FlowError::Cancelled,
        }
    }
}

/// A terminal outcome that ends the run without tokens but is not a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowFailure {
    /// The user declined the request.
    Denied,
    /// The device code expired before the user finished.
    Expired,
    /// Any other OAuth error, surfaced verbatim.
    Protocol {
        code: String,
        description: Option<String>,
    },
}

/// Tokens and whatever could be learned about the user.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSuccess {
    pub tokens: TokenResponse,
    /// Present only when an ID token was issued and validated.
    pub claims: Option<ValidatedClaims>,
    /// Best-effort; `None` when userinfo was unavailable.
    pub userinfo: Option<UserInfo>,
}

#[derive(Debug)]
pub enum FlowOutcome {
    Success(Box<FlowSuccess>),
    Failed(FlowFailure),
}

impl FlowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FlowOutcome::Success(_))
    }
}

/// User-facing events emitted during a run. Implementations own all I/O.
///
/// Hooks are called synchronously from the task driving [`DeviceFlow::run`]
/// and may block (e.g. waiting for a keypress); cancellation is only observed
/// once the hook returns.
pub trait FlowEvents: Send + Sync {
    /// Show the code the user must confirm on the secondary device.
    fn show_code(&self, user_code: &str, verification_uri: Option<&str>, expires_in: u64);

    /// Direct the user to the verification page.
    fn open_browser(&self, uri: &str);

    /// The server has seen the request; the user has not finished yet. Once per run.
    fn pending_notice(&self);

    fn success(&self, result: &FlowSuccess);

    fn failure(&self, failure: &FlowFailure);
}

/// Runs the device flow against one authority.
pub struct DeviceFlow {
    settings: FlowSettings,
    http_client: reqwest::Client,
    resolver: IssuerResolver,
    cancel: CancellationToken,
}

impl DeviceFlow {
    pub fn new(settings: FlowSettings) -> Result<Self, FlowError> {
        let http_client = settings.http_client()?;
        Ok(Self {
            resolver: IssuerResolver::new(http_client.clone()),
            http_client,
            settings,
            cancel: CancellationToken::new(),
        })
    }

    /// Abort the run promptly when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn resolver(&self) -> &IssuerResolver {
        &self.resolver
    }

    /// Run the flow to a terminal outcome.
    pub async fn run(
        &self,
        authority: &str,
        request: &DeviceAuthorizationRequest,
        events: &dyn FlowEvents,
    ) -> Result<FlowOutcome, FlowError> {
        let metadata = self.cancellable(self.resolver.discover(authority)).await??;

        let client =
            DeviceAuthorizationClient::new(self.http_client.clone(), self.settings.default_interval);
        let handle = self
            .cancellable(client.request_device_authorization(&metadata, request))
            .await??;

        info!(
            user_code = %handle.user_code,
            expires_in = handle.expires_in,
            interval_secs = handle.interval.as_secs(),
            "Device authorization started"
        );

        events.show_code(
            &handle.user_code,
            handle.verification_uri.as_deref(),
            handle.expires_in,
        );
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        events.open_browser(&handle.verification_uri_complete);

        let mut engine = PollingEngine::new(
            client.token_endpoint(&metadata, &request.client_id),
            &handle,
            self.settings.slow_down_increment,
        )
        .with_cancellation(self.cancel.clone());

        let state = engine.run(&mut || events.pending_notice()).await?;

        let tokens = match state {
            PollState::Completed(tokens) => tokens,
            PollState::Denied => return Ok(self.fail(events, FlowFailure::Denied)),
            PollState::Expired => return Ok(self.fail(events, FlowFailure::Expired)),
            PollState::ProtocolFailed { code, description } => {
                return Ok(self.fail(events, FlowFailure::Protocol { code, description }))
            }
        };

        // Grants without the openid scope carry no ID token; nothing to validate.
        let claims = match tokens.id_token.as_deref().filter(|t| !t.is_empty()) {
            Some(id_token) => {
                let validator = TokenValidator::new(
                    &metadata,
                    &request.client_id,
                    self.http_client.clone(),
                    &self.settings,
                )?;
                Some(self.cancellable(validator.validate(id_token)).await??)
            }
            None => {
                debug!("Grant carries no ID token, skipping validation");
                None
            }
        };

        let fetcher = UserInfoFetcher::new(self.http_client.clone());
        let userinfo = self
            .cancellable(fetcher.fetch_user_info(&tokens.access_token, &metadata))
            .await?;

        let success = FlowSuccess {
            tokens,
            claims,
            userinfo,
        };
        events.success(&success);
        Ok(FlowOutcome::Success(Box::new(success)))
    }

    fn fail(&self, events: &dyn FlowEvents, failure: FlowFailure) -> FlowOutcome {
        events.failure(&failure);
        FlowOutcome::Failed(failure)
    }

    async fn cancellable<F: Future>(&self, fut: F) -> Result<F::Output, FlowError> {
        tokio::select! {
            output = fut => Ok(output),
            _ = self.cancel.cancelled() => Err(FlowError::Cancelled),
        }
    }
}
