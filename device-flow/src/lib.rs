//! OAuth 2.0 Device Authorization Grant (RFC 8628) client with OIDC support.
//!
//! A run goes through five stages:
//! 1. The issuer's metadata is discovered from `/.well-known/openid-configuration`
//! 2. A device code is requested from the device authorization endpoint
//! 3. The user is shown the user code and verification URI
//! 4. The token endpoint is polled until the user approves, denies, or the code expires
//! 5. The ID token (if any) is verified against the issuer's JWKS and userinfo is fetched
//!
//! [`flow::DeviceFlow`] drives the whole sequence; the individual stages are
//! usable on their own through [`oidc`] and [`device_flow`].

#![deny(unsafe_code)]

pub mod device_flow;
pub mod flow;
pub mod oidc;
pub mod settings;

pub use device_flow::{
    DeviceAuthorizationClient, DeviceAuthorizationHandle, DeviceAuthorizationRequest, PollState,
    PollingEngine, TokenResponse,
};
pub use flow::{DeviceFlow, FlowError, FlowEvents, FlowFailure, FlowOutcome, FlowSuccess};
pub use oidc::{IssuerMetadata, IssuerResolver, TokenValidator, UserInfo, UserInfoFetcher};
pub use settings::FlowSettings;
