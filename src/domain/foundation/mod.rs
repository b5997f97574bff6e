//! Foundation types: identifiers and the auth error taxonomy.

mod auth;
mod errors;
mod ids;

pub use auth::AuthError;
pub use errors::ValidationError;
pub use ids::{RequestId, RoomId, SessionId, UserId};
