//! JWKS (JSON Web Key Set) fetching.
//!
//! This module handles:
//! - Fetching and parsing the issuer's JWKS
//! - Memoizing the set for the rest of the run
//! - Key lookup by kid, with a single re-fetch on a miss (key rotation)

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("Failed to fetch JWKS from {uri}: {reason}")]
    Fetch { uri: String, reason: String },

    #[error("Failed to parse JWKS from {uri}: {reason}")]
    Parse { uri: String, reason: String },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("No RSA keys in JWKS")]
    NoKeys,
}

/// JWKS provider, memoized for one run.
pub struct JwksProvider {
    http_client: reqwest::Client,
    jwks_uri: String,
    cache: Mutex<Option<Arc<JwkSet>>>,
}

impl JwksProvider {
    pub fn new(http_client: reqwest::Client, jwks_uri: &str) -> Self {
        Self {
            http_client,
            jwks_uri: jwks_uri.to_string(),
            cache: Mutex::new(None),
        }
    }

    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Get the key for `kid`, or the first RSA key when the token carries no kid.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<Jwk, JwksError> {
        let jwks = self.keys().await?;
        if let Some(jwk) = select_key(&jwks, kid) {
            return Ok(jwk);
        }

        // Only a kid miss can be fixed by a rotation re-fetch.
        let Some(kid) = kid else {
            return Err(JwksError::NoKeys);
        };

        debug!(kid = %kid, "Key not in memoized JWKS, re-fetching");
        let jwks = self.refresh().await?;
        select_key(&jwks, Some(kid)).ok_or_else(|| JwksError::KeyNotFound(kid.to_string()))
    }

    async fn keys(&self) -> Result<Arc<JwkSet>, JwksError> {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        match cached {
            Some(jwks) => Ok(jwks),
            None => self.refresh().await,
        }
    }

    /// Force a fresh fetch and replace the memoized set.
    pub async fn refresh(&self) -> Result<Arc<JwkSet>, JwksError> {
        let jwks = Arc::new(self.fetch().await?);
        *self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&jwks));
        Ok(jwks)
    }

    async fn fetch(&self) -> Result<JwkSet, JwksError> {
        debug!(jwks_uri = %self.jwks_uri, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| JwksError::Fetch {
                uri: self.jwks_uri.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(JwksError::Fetch {
                uri: self.jwks_uri.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| JwksError::Parse {
                uri: self.jwks_uri.clone(),
                reason: e.to_string(),
            })
    }
}

fn select_key(jwks: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => jwks.find(kid).cloned(),
        None => jwks
            .keys
            .iter()
            .find(|k| matches!(k.algorithm, AlgorithmParameters::RSA(_)))
            .cloned(),
    }
}
