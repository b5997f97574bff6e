//! JWKS-backed JWT verifier.
//!
//! Production implementation of the `TokenVerifier` port. Verifies ID tokens
//! by:
//!
//! 1. Fetching JWKS from the issuer's well-known endpoint
//! 2. Validating the JWT signature against the published public keys
//! 3. Validating issuer, audience, and expiry claims
//! 4. Mapping the `sub` claim to a [`UserId`]
//!
//! Keys are fetched lazily on first verification and cached for the
//! configured TTL, so constructing the verifier never blocks startup.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{
    decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, TokenData, Validation,
};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::AuthConfig;
use crate::domain::foundation::{AuthError, UserId};
use crate::ports::TokenVerifier;

/// JWT claims we care about.
#[derive(Debug, Deserialize)]
struct Claims {
    /// Subject - the user ID
    sub: String,

    /// Issuer URL
    iss: String,
}

/// Cached JWKS with expiry tracking.
struct JwksCache {
    jwks: JwkSet,
    fetched_at: Instant,
    cache_duration: Duration,
}

impl JwksCache {
    fn new(jwks: JwkSet, cache_duration: Duration) -> Self {
        Self {
            jwks,
            fetched_at: Instant::now(),
            cache_duration,
        }
    }

    fn is_expired(&self) -> bool {
        self.fetched_at.elapsed() > self.cache_duration
    }
}

/// JWKS-backed OIDC token verifier.
pub struct JwksTokenVerifier {
    config: AuthConfig,
    http_client: reqwest::Client,
    jwks_cache: RwLock<Option<JwksCache>>,
}

impl JwksTokenVerifier {
    /// Create a new verifier.
    ///
    /// This does NOT fetch JWKS immediately - keys are fetched lazily on
    /// first verification.
    pub fn new(config: AuthConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            http_client,
            jwks_cache: RwLock::new(None),
        }
    }

    /// Get the JWKS URL for the configured issuer.
    fn jwks_url(&self) -> String {
        format!(
            "{}/.well-known/jwks.json",
            self.config.issuer_url.trim_end_matches('/')
        )
    }

    /// Fetch JWKS from the issuer.
    async fn fetch_jwks(&self) -> Result<JwkSet, AuthError> {
        let url = self.jwks_url();

        tracing::debug!("Fetching JWKS from {}", url);

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            tracing::error!("Failed to fetch JWKS: {}", e);
            AuthError::ServiceUnavailable(format!("Failed to fetch JWKS: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            tracing::error!("JWKS endpoint returned {}", status);
            return Err(AuthError::ServiceUnavailable(format!(
                "JWKS endpoint returned {}",
                status
            )));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse JWKS: {}", e);
            AuthError::ServiceUnavailable(format!("Failed to parse JWKS: {}", e))
        })?;

        tracing::debug!("Fetched {} keys from JWKS", jwks.keys.len());

        Ok(jwks)
    }

    /// Get JWKS, using cache if available and not expired.
    async fn get_jwks(&self) -> Result<JwkSet, AuthError> {
        {
            let cache = self.jwks_cache.read().await;
            if let Some(ref cached) = *cache {
                if !cached.is_expired() {
                    return Ok(cached.jwks.clone());
                }
            }
        }

        // Cache miss or expired - fetch new JWKS
        let jwks = self.fetch_jwks().await?;

        {
            let mut cache = self.jwks_cache.write().await;
            *cache = Some(JwksCache::new(jwks.clone(), self.config.jwks_cache_ttl()));
        }

        Ok(jwks)
    }

    /// Find the decoding key for a JWT.
    fn find_decoding_key(
        &self,
        header: &jsonwebtoken::Header,
        jwks: &JwkSet,
    ) -> Result<(DecodingKey, Algorithm), AuthError> {
        let kid = header.kid.as_ref().ok_or_else(|| {
            tracing::warn!("JWT missing 'kid' header");
            AuthError::InvalidToken
        })?;

        let jwk = jwks.find(kid).ok_or_else(|| {
            tracing::warn!("No matching key found for kid: {}", kid);
            AuthError::InvalidToken
        })?;

        let algorithm = match jwk.common.key_algorithm {
            Some(jsonwebtoken::jwk::KeyAlgorithm::RS256) => Algorithm::RS256,
            Some(jsonwebtoken::jwk::KeyAlgorithm::RS384) => Algorithm::RS384,
            Some(jsonwebtoken::jwk::KeyAlgorithm::RS512) => Algorithm::RS512,
            Some(jsonwebtoken::jwk::KeyAlgorithm::ES256) => Algorithm::ES256,
            Some(jsonwebtoken::jwk::KeyAlgorithm::ES384) => Algorithm::ES384,
            Some(other) => {
                tracing::warn!("Unsupported algorithm: {:?}", other);
                return Err(AuthError::InvalidToken);
            }
            // Default to RS256 if not specified (common for OIDC)
            None => Algorithm::RS256,
        };

        let decoding_key = DecodingKey::from_jwk(jwk).map_err(|e| {
            tracing::warn!("Failed to create decoding key: {}", e);
            AuthError::InvalidToken
        })?;

        Ok((decoding_key, algorithm))
    }

    /// Validate a JWT and extract claims.
    fn validate_token(
        &self,
        token: &str,
        decoding_key: &DecodingKey,
        algorithm: Algorithm,
    ) -> Result<TokenData<Claims>, AuthError> {
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&self.config.issuer_url]);
        validation.set_audience(&[&self.config.audience]);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => {
                    tracing::debug!("Token expired");
                    AuthError::TokenExpired
                }
                ErrorKind::InvalidIssuer => {
                    tracing::warn!("Invalid issuer in token");
                    AuthError::InvalidToken
                }
                ErrorKind::InvalidAudience => {
                    tracing::warn!("Invalid audience in token");
                    AuthError::InvalidToken
                }
                _ => {
                    tracing::warn!("Token validation failed: {}", e);
                    AuthError::InvalidToken
                }
            }
        })
    }
}

#[async_trait]
impl TokenVerifier for JwksTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!("Failed to decode JWT header: {}", e);
            AuthError::InvalidToken
        })?;

        let jwks = self.get_jwks().await?;

        let (decoding_key, algorithm) = self.find_decoding_key(&header, &jwks)?;

        let token_data = self.validate_token(token, &decoding_key, algorithm)?;
        let claims = token_data.claims;

        // Defense in depth: re-check the issuer after validation
        if claims.iss != self.config.issuer_url {
            tracing::warn!(
                "Issuer mismatch after validation: expected '{}', got '{}'",
                self.config.issuer_url,
                claims.iss
            );
            return Err(AuthError::InvalidToken);
        }

        UserId::new(&claims.sub).map_err(|_| {
            tracing::warn!("Empty subject claim in token");
            AuthError::InvalidToken
        })
    }
}

impl std::fmt::Debug for JwksTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksTokenVerifier")
            .field("issuer_url", &self.config.issuer_url)
            .field("audience", &self.config.audience)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig {
            issuer_url: "https://auth.example.com".to_string(),
            audience: "score-sync-api".to_string(),
            jwks_cache_ttl_secs: 3600,
        }
    }

    #[test]
    fn builds_correct_jwks_url() {
        let verifier = JwksTokenVerifier::new(test_config());
        assert_eq!(
            verifier.jwks_url(),
            "https://auth.example.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn jwks_url_handles_trailing_slash() {
        let mut config = test_config();
        config.issuer_url = "https://auth.example.com/".to_string();
        let verifier = JwksTokenVerifier::new(config);
        assert_eq!(
            verifier.jwks_url(),
            "https://auth.example.com/.well-known/jwks.json"
        );
    }

    #[tokio::test]
    async fn garbage_token_is_invalid_without_network() {
        let verifier = JwksTokenVerifier::new(test_config());
        // Header decode fails before any JWKS fetch is attempted
        let result = verifier.verify("not-a-jwt").await;
        assert!(matches!(result, Err(AuthError::InvalidToken)));
    }

    #[test]
    fn cache_expiry_respects_ttl() {
        let cache = JwksCache::new(JwkSet { keys: vec![] }, Duration::from_secs(3600));
        assert!(!cache.is_expired());

        let cache = JwksCache::new(JwkSet { keys: vec![] }, Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.is_expired());
    }
}
