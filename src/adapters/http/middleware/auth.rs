//! Authentication middleware and extractor for the control plane.
//!
//! The middleware uses the `TokenVerifier` port, keeping it provider-agnostic:
//! whether tokens come from the production JWKS verifier or a mock, the
//! middleware doesn't change.
//!
//! ```text
//! Request → auth_middleware → injects UserId into extensions
//!                                      ↓
//!                              Handler → RequireAuth extractor reads it
//! ```

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domain::foundation::{AuthError, UserId};
use crate::ports::TokenVerifier;

/// Auth middleware state - wraps the token verifier.
pub type AuthState = Arc<dyn TokenVerifier>;

/// Validates Bearer tokens on every control-plane request.
///
/// On success the authenticated [`UserId`] is injected into request
/// extensions; missing or bad credentials get a 401 before any handler runs.
pub async fn auth_middleware(
    State(verifier): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized("Authentication required");
    };

    match verifier.verify(token).await {
        Ok(user_id) => {
            request.extensions_mut().insert(user_id);
            next.run(request).await
        }
        Err(AuthError::ServiceUnavailable(_)) => {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "Authentication service unavailable"})),
            )
                .into_response()
        }
        Err(err) => unauthorized(&err.to_string()),
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": message}))).into_response()
}

/// Extractor for the authenticated user injected by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct RequireAuth(pub UserId);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserId>()
            .cloned()
            .map(RequireAuth)
            .ok_or_else(|| unauthorized("Authentication required"))
    }
}
