//! OIDC discovery, ID token handling and userinfo.

pub mod discovery;
pub mod jwks;
pub mod token;
pub mod userinfo;
pub mod validation;

pub use discovery::{DiscoveryError, IssuerMetadata, IssuerResolver};
pub use jwks::{JwksError, JwksProvider};
pub use token::{IdTokenClaims, StringOrVec};
pub use userinfo::{UserInfo, UserInfoError, UserInfoFetcher};
pub use validation::{TokenValidator, ValidatedClaims, ValidationError};
