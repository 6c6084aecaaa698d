//! OAuth 2.0 Device Authorization Grant (RFC 8628) implementation.
//!
//! This module provides a client for the OAuth 2.0 Device Authorization Grant,
//! which allows users to authenticate on devices with limited input capabilities
//! by completing authentication on a secondary device (phone, browser).

pub mod client;
pub mod poll;
pub mod types;

pub use client::{DeviceAuthorizationClient, HttpTokenEndpoint, TokenEndpoint};
pub use poll::{Clock, PollState, PollingEngine, Sleeper, SystemClock, TokioSleeper};
pub use types::{
    AuthorizationRequestError, DeviceAuthorizationHandle, DeviceAuthorizationRequest,
    PollError, PollOutcome, PollTransportError, TokenErrorResponse, TokenResponse,
};
