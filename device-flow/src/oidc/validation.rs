//! ID token validation with JWKS signature verification.

use std::ops::Deref;
use std::time::Duration;

use crate::oidc::discovery::IssuerMetadata;
use crate::oidc::jwks::{JwksError, JwksProvider};
use crate::oidc::token::IdTokenClaims;
use crate::settings::FlowSettings;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Malformed ID token: {0}")]
    Malformed(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Issuer does not publish a jwks_uri; cannot verify ID token signature")]
    MissingJwksUri,

    #[error("Failed to fetch JWKS: {0}")]
    Jwks(#[from] JwksError),

    #[error("Invalid issuer: expected {expected}, got {actual}")]
    InvalidIssuer { expected: String, actual: String },

    #[error("Invalid audience: '{client_id}' is not an audience of the ID token")]
    InvalidAudience { client_id: String },

    #[error("Invalid authorized party: expected {expected}, got {actual:?}")]
    InvalidAuthorizedParty {
        expected: String,
        actual: Option<String>,
    },

    #[error("Token expired")]
    Expired,

    #[error("Token issued in the future (iat={iat}, now={now})")]
    IssuedInFuture { iat: i64, now: i64 },

    #[error("Missing required claim: {0}")]
    MissingClaim(&'static str),
}

/// Claims every ID token must carry (OIDC Core 2).
const REQUIRED_CLAIMS: [&str; 5] = ["iss", "sub", "aud", "exp", "iat"];

/// Claims of an ID token whose signature and mandatory claims were verified.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidatedClaims(IdTokenClaims);

impl ValidatedClaims {
    pub fn into_inner(self) -> IdTokenClaims {
        self.0
    }
}

impl Deref for ValidatedClaims {
    type Target = IdTokenClaims;

    fn deref(&self) -> &IdTokenClaims {
        &self.0
    }
}

pub struct TokenValidator {
    issuer: String,
    client_id: String,
    algorithm: Algorithm,
    supported_algorithm: bool,
    clock_skew: i64,
    jwks_provider: JwksProvider,
}

impl TokenValidator {
    /// Build a validator for tokens issued to `client_id` by the discovered issuer.
    pub fn new(
        metadata: &IssuerMetadata,
        client_id: &str,
        http_client: reqwest::Client,
        settings: &FlowSettings,
    ) -> Result<Self, ValidationError> {
        let jwks_uri = metadata
            .jwks_uri
            .as_deref()
            .ok_or(ValidationError::MissingJwksUri)?;

        let algorithm = settings.id_token_algorithm;
        Ok(Self {
            issuer: metadata.issuer.clone(),
            client_id: client_id.to_string(),
            algorithm,
            supported_algorithm: metadata.supports_signing_alg(&format!("{:?}", algorithm)),
            clock_skew: skew_secs(settings.clock_skew),
            jwks_provider: JwksProvider::new(http_client, jwks_uri),
        })
    }

    /// Validate an ID token and return its claims.
    pub async fn validate(&self, id_token: &str) -> Result<ValidatedClaims, ValidationError> {
        self.validate_at(id_token, chrono::Utc::now().timestamp())
            .await
    }

    async fn validate_at(
        &self,
        id_token: &str,
        now: i64,
    ) -> Result<ValidatedClaims, ValidationError> {
        let claims = self.verify_and_decode(id_token).await?;

        // Validate issuer
        if claims.iss != self.issuer {
            return Err(ValidationError::InvalidIssuer {
                expected: self.issuer.clone(),
                actual: claims.iss.clone(),
            });
        }

        // Validate audience
        if !claims.aud.contains(&self.client_id) {
            return Err(ValidationError::InvalidAudience {
                client_id: self.client_id.clone(),
            });
        }

        // OIDC Core 3.1.3.7: with several audiences, azp must name this client
        if claims.aud.len() > 1 {
            if let Some(azp) = &claims.azp {
                if azp != &self.client_id {
                    return Err(ValidationError::InvalidAuthorizedParty {
                        expected: self.client_id.clone(),
                        actual: claims.azp.clone(),
                    });
                }
            }
        }

        // Validate expiration with clock skew tolerance
        if claims.exp.saturating_add(self.clock_skew) < now {
            return Err(ValidationError::Expired);
        }

        if claims.iat > now.saturating_add(self.clock_skew) {
            return Err(ValidationError::IssuedInFuture {
                iat: claims.iat,
                now,
            });
        }

        debug!(sub = %claims.sub, "ID token validated");
        Ok(ValidatedClaims(claims))
    }

    /// Verify JWT signature and decode claims
    async fn verify_and_decode(&self, id_token: &str) -> Result<IdTokenClaims, ValidationError> {
        let header =
            decode_header(id_token).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        if header.alg != self.algorithm || !self.supported_algorithm {
            return Err(ValidationError::UnsupportedAlgorithm(format!(
                "{:?}",
                header.alg
            )));
        }

        let jwk = self.jwks_provider.get_key(header.kid.as_deref()).await?;

        let decoding_key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| ValidationError::InvalidSignature(format!("Invalid JWK: {}", e)))?;

        let mut validation = Validation::new(self.algorithm);
        // Claims are checked by the caller so that each failure has its own variant.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data =
            decode::<Map<String, Value>>(id_token, &decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::Json(_) | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                        ValidationError::Malformed(e.to_string())
                    }
                    _ => ValidationError::InvalidSignature(e.to_string()),
                }
            })?;

        let claims = token_data.claims;
        if let Some(missing) = REQUIRED_CLAIMS
            .iter()
            .find(|name| claims.get(**name).map_or(true, Value::is_null))
        {
            return Err(ValidationError::MissingClaim(*missing));
        }

        serde_json::from_value(Value::Object(claims))
            .map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}

fn skew_secs(skew: Duration) -> i64 {
    i64::try_from(skew.as_secs()).unwrap_or(i64::MAX)
}
