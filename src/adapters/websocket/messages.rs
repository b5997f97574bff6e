//! Wire protocol types for the broadcast fabric.
//!
//! Defines the protocol between server and connected clients:
//! - Client → Server: room membership operations only
//! - Server → Client: connection/membership acknowledgements and room events
//!
//! All messages are JSON objects with a `type` discriminator. Clients never
//! carry broadcast payloads; state changes enter the fabric through the
//! control plane.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::foundation::{RoomId, UserId};
use crate::ports::{PageUpdate, SongUpdate};

/// Message kind tags.
pub mod kind {
    pub const CONNECTION_SUCCESS: &str = "connection_success";
    pub const JOIN_ROOM_SUCCESS: &str = "join_room_success";
    pub const ROOM_LEFT: &str = "room_left";
    pub const ERROR: &str = "error";
    pub const PARTICIPANT_JOINED: &str = "participant_joined";
    pub const PARTICIPANT_LEFT: &str = "participant_left";
    pub const ROOM_CLOSED: &str = "room_closed";
    pub const SONG_UPDATED: &str = "song_updated";
    pub const PAGE_UPDATED: &str = "page_updated";
    pub const BATCHED_UPDATE: &str = "batched_update";
    pub const CRITICAL_UPDATE: &str = "critical_update";
}

/// Kinds that bypass both coalescing and batching and are enqueued directly.
const CRITICAL_KINDS: &[&str] = &[
    kind::ROOM_CLOSED,
    kind::PARTICIPANT_JOINED,
    kind::PARTICIPANT_LEFT,
    kind::CONNECTION_SUCCESS,
    kind::JOIN_ROOM_SUCCESS,
    kind::ROOM_LEFT,
    kind::ERROR,
    kind::CRITICAL_UPDATE,
];

/// Whether a kind tag is in the critical set.
pub fn is_critical_kind(kind: &str) -> bool {
    CRITICAL_KINDS.contains(&kind)
}

// ============================================
// Client → Server Messages
// ============================================

/// All message types that can be received from a client after the handshake.
///
/// `room_id` is optional at the serde level so that a `join_room` without one
/// reaches the handler and gets the protocol-level error reply instead of
/// being dropped as malformed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room, leaving the current one if different.
    JoinRoom {
        #[serde(default)]
        room_id: Option<String>,
    },

    /// Leave the current room.
    LeaveRoom,
}

// ============================================
// Server → Client Messages
// ============================================

/// All message types that can be sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake completed; sent exactly once per connection.
    ConnectionSuccess { user_id: UserId },

    /// `join_room` acknowledged; sent to the joining session only.
    JoinRoomSuccess { room_id: RoomId },

    /// `leave_room` acknowledged; sent to the leaving session only.
    RoomLeft { room_id: RoomId },

    /// Protocol-level error; the connection stays open.
    Error { message: String },

    /// A participant joined the room (originates from the control plane).
    ParticipantJoined { user_id: UserId },

    /// A participant left the room or disconnected.
    ParticipantLeft { user_id: UserId },

    /// The host closed the room.
    RoomClosed {
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The host selected a song. Metadata only; clients fetch the page
    /// image over HTTP using the etag.
    SongUpdated { data: SongUpdate },

    /// The host turned the page. Metadata only.
    PageUpdated { data: PageUpdate },

    /// Several pending room messages combined into one frame.
    BatchedUpdate { data: BatchedMessages },
}

/// Payload of a `batched_update` frame.
#[derive(Debug, Clone, Serialize)]
pub struct BatchedMessages {
    pub messages: Vec<Value>,
}

impl ServerMessage {
    /// The message's kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionSuccess { .. } => kind::CONNECTION_SUCCESS,
            Self::JoinRoomSuccess { .. } => kind::JOIN_ROOM_SUCCESS,
            Self::RoomLeft { .. } => kind::ROOM_LEFT,
            Self::Error { .. } => kind::ERROR,
            Self::ParticipantJoined { .. } => kind::PARTICIPANT_JOINED,
            Self::ParticipantLeft { .. } => kind::PARTICIPANT_LEFT,
            Self::RoomClosed { .. } => kind::ROOM_CLOSED,
            Self::SongUpdated { .. } => kind::SONG_UPDATED,
            Self::PageUpdated { .. } => kind::PAGE_UPDATED,
            Self::BatchedUpdate { .. } => kind::BATCHED_UPDATE,
        }
    }
}

// ============================================
// Broadcast envelope
// ============================================

/// A message bound for room members.
///
/// Holds the kind tag and the full JSON object; the encoded wire form is
/// computed once on first use and shared across every recipient's queue.
#[derive(Debug)]
pub struct OutboundMessage {
    kind: String,
    body: Value,
    critical: bool,
    encoded: OnceLock<Arc<str>>,
}

impl OutboundMessage {
    /// Wraps an arbitrary JSON object, reading the kind from its `type`
    /// field. Objects without a `type` get an empty kind and fall through
    /// to the batching path.
    pub fn from_value(body: Value) -> Self {
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            kind,
            body,
            critical: false,
            encoded: OnceLock::new(),
        }
    }

    /// Wraps a typed server message.
    pub fn from_server_message(message: &ServerMessage) -> Self {
        let body = serde_json::to_value(message)
            .expect("ServerMessage serialization should not fail");
        Self {
            kind: message.kind().to_string(),
            body,
            critical: false,
            encoded: OnceLock::new(),
        }
    }

    /// Marks the message critical regardless of its kind.
    pub fn mark_critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// The message's kind tag; empty if the source object had none.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The full JSON object.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Whether this message bypasses coalescing and batching.
    pub fn is_critical(&self) -> bool {
        self.critical || is_critical_kind(&self.kind)
    }

    /// The encoded wire form, computed on first use.
    pub fn encoded(&self) -> Arc<str> {
        self.encoded
            .get_or_init(|| {
                serde_json::to_string(&self.body)
                    .expect("JSON value serialization should not fail")
                    .into()
            })
            .clone()
    }
}
