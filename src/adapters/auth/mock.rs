//! Mock authentication adapter for testing.
//!
//! Implements the `TokenVerifier` port without a real identity provider.
//!
//! # Example
//!
//! ```ignore
//! use score_sync::adapters::auth::MockTokenVerifier;
//!
//! let verifier = MockTokenVerifier::new()
//!     .with_token("valid-token", "user-123")
//!     .with_expired_token("stale-token");
//!
//! let user_id = verifier.verify("valid-token").await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, UserId};
use crate::ports::TokenVerifier;

/// Mock token verifier for testing.
///
/// Stores a map of tokens to user ids. Tokens not in the map return
/// `InvalidToken`; tokens in the expired set return `TokenExpired`.
#[derive(Debug, Default)]
pub struct MockTokenVerifier {
    /// Map of valid tokens to their user ids
    tokens: RwLock<HashMap<String, UserId>>,
    /// Tokens that verify with `TokenExpired`
    expired: RwLock<HashSet<String>>,
    /// Optional error to return for all verifications (for error testing)
    force_error: RwLock<Option<AuthError>>,
}

impl MockTokenVerifier {
    /// Creates a new empty mock verifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a valid token that maps to a user id.
    pub fn with_token(self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        let user_id = UserId::new(user_id).expect("test user id must be non-empty");
        self.tokens.write().unwrap().insert(token.into(), user_id);
        self
    }

    /// Marks a token as expired.
    pub fn with_expired_token(self, token: impl Into<String>) -> Self {
        self.expired.write().unwrap().insert(token.into());
        self
    }

    /// Forces all verifications to return the specified error.
    pub fn with_error(self, error: AuthError) -> Self {
        *self.force_error.write().unwrap() = Some(error);
        self
    }

    /// Registers a new valid token at runtime.
    pub fn add_token(&self, token: impl Into<String>, user_id: UserId) {
        self.tokens.write().unwrap().insert(token.into(), user_id);
    }

    /// Removes a token, making it invalid.
    pub fn remove_token(&self, token: &str) {
        self.tokens.write().unwrap().remove(token);
    }
}

#[async_trait]
impl TokenVerifier for MockTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        if let Some(error) = self.force_error.read().unwrap().clone() {
            return Err(error);
        }

        if self.expired.read().unwrap().contains(token) {
            return Err(AuthError::TokenExpired);
        }

        self.tokens
            .read()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
