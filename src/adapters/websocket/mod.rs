//! The real-time room broadcast fabric.
//!
//! Accepts authenticated long-lived WebSocket connections, keeps each
//! connection in at most one room, and fans room state changes out to every
//! connected participant - without letting one slow receiver stall the
//! broadcast loop or exhaust memory.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   Control plane (HTTP endpoints)                     │
//! │   register_room │ broadcast │ song_updated │ page_updated           │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │ RoomBroadcaster
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              Hub                                     │
//! │   Room: R1              Room: R2              user_id → Session     │
//! │   ├── session-a         ├── session-d         pending batches       │
//! │   ├── session-b         └── session-e         periodic flush        │
//! │   └── session-c                                                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │ per-session enqueue
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Session                                   │
//! │   coalesce buffer → bounded send queue → writer task → socket       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`messages`] - Wire protocol types and the broadcast envelope
//! - [`session`] - Per-connection send queue, coalescing, and writer task
//! - [`hub`] - Room registry, per-user session map, broadcast and batching
//! - [`handler`] - Axum WebSocket upgrade handler and inbound protocol

pub mod handler;
pub mod hub;
pub mod messages;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use handler::{websocket_router, WebSocketState};
pub use hub::Hub;
pub use messages::{ClientMessage, OutboundMessage, ServerMessage};
pub use session::Session;

/// WebSocket close codes used by the fabric.
pub mod close_code {
    /// No token presented during the handshake.
    pub const AUTH_REQUIRED: u16 = 4000;

    /// Token presented but rejected by the identity verifier.
    pub const AUTH_FAILED: u16 = 4001;

    /// Cumulative drops exceeded the slow-client threshold.
    pub const SLOW_CLIENT: u16 = 4002;

    /// Reserved: caller is not a participant of the room.
    pub const NOT_PARTICIPANT: u16 = 4003;

    /// Reserved: room does not exist.
    pub const ROOM_NOT_FOUND: u16 = 4004;

    /// Unexpected server-side failure.
    pub const INTERNAL_ERROR: u16 = 1011;

    /// Normal closure; used when a newer connection supersedes this one.
    pub const NORMAL: u16 = 1000;
}
