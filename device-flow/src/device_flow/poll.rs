//! Polling state machine for the device access token request (RFC 8628 §3.4-3.5).
//!
//! One request is in flight at a time. Between attempts the engine waits the
//! full current interval; `slow_down` grows that interval by a fixed
//! increment for the rest of the run. Nothing is sent once the handle's
//! deadline has passed.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::TokenEndpoint;
use super::types::{DeviceAuthorizationHandle, PollError, PollOutcome, TokenResponse};

/// Terminal state of the polling loop.
#[derive(Debug)]
pub enum PollState {
    Completed(TokenResponse),
    Denied,
    Expired,
    ProtocolFailed {
        code: String,
        description: Option<String>,
    },
}

/// Suspension between polls.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Source of the current instant, compared against the handle deadline.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Drives the polling loop for one device authorization.
pub struct PollingEngine<'a, E, S = TokioSleeper, C = SystemClock> {
    endpoint: E,
    handle: &'a DeviceAuthorizationHandle,
    sleeper: S,
    clock: C,
    interval: Duration,
    deadline: Instant,
    slow_down_increment: Duration,
    pending_noticed: bool,
    cancel: CancellationToken,
}

impl<'a, E: TokenEndpoint> PollingEngine<'a, E> {
    pub fn new(
        endpoint: E,
        handle: &'a DeviceAuthorizationHandle,
        slow_down_increment: Duration,
    ) -> Self {
        Self::with_timing(
            endpoint,
            handle,
            slow_down_increment,
            TokioSleeper,
            SystemClock,
        )
    }
}

impl<'a, E, S, C> PollingEngine<'a, E, S, C>
where
    E: TokenEndpoint,
    S: Sleeper,
    C: Clock,
{
    /// Build an engine with explicit timing sources.
    pub fn with_timing(
        endpoint: E,
        handle: &'a DeviceAuthorizationHandle,
        slow_down_increment: Duration,
        sleeper: S,
        clock: C,
    ) -> Self {
        Self {
            endpoint,
            handle,
            sleeper,
            clock,
            interval: handle.interval,
            deadline: handle.expires_at,
            slow_down_increment,
            pending_noticed: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the loop when `cancel` fires, during a wait or a request.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Current polling interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until a terminal state is reached.
    ///
    /// `on_pending` is invoked once, the first time the server reports that
    /// authorization is still pending.
    pub async fn run(
        &mut self,
        on_pending: &mut (dyn FnMut() + Send),
    ) -> Result<PollState, PollError> {
        loop {
            if self.clock.now() >= self.deadline {
                info!("Device code expired before authorization completed");
                return Ok(PollState::Expired);
            }

            let outcome = tokio::select! {
                outcome = self.endpoint.poll(self.handle.device_code()) => outcome,
                _ = self.cancel.cancelled() => return Err(PollError::Cancelled),
            };

            match outcome {
                PollOutcome::Success(tokens) => {
                    info!("Device authorization completed");
                    return Ok(PollState::Completed(tokens));
                }
                PollOutcome::Pending => self.notice_pending(on_pending),
                PollOutcome::SlowDown => {
                    self.interval += self.slow_down_increment;
                    debug!(
                        interval_secs = self.interval.as_secs(),
                        "Server asked to slow down, polling less often"
                    );
                    self.notice_pending(on_pending);
                }
                PollOutcome::Denied => {
                    info!("Device authorization denied");
                    return Ok(PollState::Denied);
                }
                PollOutcome::Expired => {
                    info!("Device code expired");
                    return Ok(PollState::Expired);
                }
                PollOutcome::ProtocolError { code, description } => {
                    warn!(error = %code, "Token endpoint returned a non-retryable error");
                    return Ok(PollState::ProtocolFailed { code, description });
                }
                PollOutcome::TransportError(e) => return Err(e.into()),
            }

            tokio::select! {
                _ = self.sleeper.sleep(self.interval) => {}
                _ = self.cancel.cancelled() => return Err(PollError::Cancelled),
            }
        }
    }

    fn notice_pending(&mut self, on_pending: &mut (dyn FnMut() + Send)) {
        if !self.pending_noticed {
            self.pending_noticed = true;
            info!("Authorization pending, waiting for the user");
            on_pending();
        }
    }
}
