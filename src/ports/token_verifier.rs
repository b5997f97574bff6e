//! Token verification port.
//!
//! This port defines the contract for verifying opaque bearer tokens and
//! extracting the user identity behind them. It is provider-agnostic -
//! implementations exist for JWKS-backed OIDC providers and mock testing.
//!
//! # Contract
//!
//! Implementations must:
//! - Validate the token signature
//! - Validate issuer, audience, and expiry claims
//! - Return `AuthError::InvalidToken` for malformed/bad signature tokens
//! - Return `AuthError::TokenExpired` for expired tokens
//! - Return `AuthError::ServiceUnavailable` for transient errors

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, UserId};

/// Verifies bearer tokens and extracts user identity.
///
/// Used once per WebSocket handshake and on the control-plane HTTP boundary.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify a bearer token and return the authenticated user id.
    ///
    /// # Arguments
    ///
    /// * `token` - The raw token (without "Bearer " prefix)
    ///
    /// # Returns
    ///
    /// * `Ok(UserId)` - Token is valid
    /// * `Err(AuthError::InvalidToken)` - Token is malformed or signature invalid
    /// * `Err(AuthError::TokenExpired)` - Token signature valid but expired
    /// * `Err(AuthError::ServiceUnavailable)` - Identity provider unreachable
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}
