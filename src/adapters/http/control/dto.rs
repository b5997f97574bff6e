//! Request/response bodies for the control-plane endpoints.

use serde::{Deserialize, Serialize};

/// Generic acknowledgement.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

/// Result of a room registration hint.
#[derive(Debug, Serialize)]
pub struct RegisterRoomResponse {
    pub room_id: String,
    /// False when the room entry already existed.
    pub registered: bool,
}

/// Body of a room-close announcement.
#[derive(Debug, Default, Deserialize)]
pub struct CloseRoomRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Error payload for 4xx responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Service identity returned from the root endpoint.
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
}

impl ServiceInfo {
    pub fn current() -> Self {
        Self {
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
