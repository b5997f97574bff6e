//! Room broadcast port - the control-plane shim.
//!
//! The HTTP layer drives room state changes (song selection, page turns,
//! participant roster changes, room closure) and announces them to connected
//! clients through this trait, without knowing anything about sessions,
//! queues, or sockets.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{RoomId, SessionId};

/// Metadata describing the currently selected song.
///
/// Clients never receive image bytes over the socket; on `image_etag` change
/// they fetch the current page image over HTTP with a conditional GET.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongUpdate {
    pub song_id: String,
    pub title: String,
    pub artist: String,
    #[serde(default = "default_page")]
    pub current_page: u32,
    #[serde(default = "default_page")]
    pub total_pages: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_etag: Option<String>,
}

/// Metadata describing a page turn within the current song.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageUpdate {
    pub current_page: u32,
    pub song_id: String,
    pub title: String,
    pub artist: String,
    pub total_pages: u32,
    pub image_etag: String,
}

fn default_page() -> u32 {
    1
}

/// Fan-out of room state changes to connected participants.
///
/// Implemented by the WebSocket hub; consumed by the control-plane HTTP
/// endpoints.
#[async_trait]
pub trait RoomBroadcaster: Send + Sync {
    /// Ensure a room entry exists before any client joins over WebSocket.
    ///
    /// Idempotent; returns `true` if the room was newly registered. Exists
    /// to close the race between room creation over HTTP and the host's
    /// first WebSocket join, during which broadcasts would otherwise be
    /// dropped with a warning.
    async fn register_room(&self, room_id: &RoomId) -> bool;

    /// Broadcast a message object to every member of the room, minus the
    /// excluded session. Messages to unregistered rooms are dropped with a
    /// warning.
    ///
    /// The value must be a JSON object carrying a `type` discriminator.
    async fn broadcast(
        &self,
        room_id: &RoomId,
        message: serde_json::Value,
        exclude: Option<&SessionId>,
    );

    /// Broadcast a metadata-only `song_updated` event.
    async fn broadcast_song_updated(&self, room_id: &RoomId, update: SongUpdate);

    /// Broadcast a metadata-only `page_updated` event.
    async fn broadcast_page_updated(&self, room_id: &RoomId, update: PageUpdate);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn song_update_omits_absent_etag() {
        let update = SongUpdate {
            song_id: "42".to_string(),
            title: "T".to_string(),
            artist: "A".to_string(),
            current_page: 1,
            total_pages: 3,
            image_etag: None,
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(!json.contains("image_etag"));
    }

    #[test]
    fn song_update_defaults_pages_on_deserialize() {
        let update: SongUpdate =
            serde_json::from_str(r#"{"song_id":"42","title":"T","artist":"A"}"#).unwrap();
        assert_eq!(update.current_page, 1);
        assert_eq!(update.total_pages, 1);
    }

    #[test]
    fn page_update_round_trips() {
        let json = r#"{"current_page":4,"song_id":"42","title":"T","artist":"A","total_pages":9,"image_etag":"W/\"ab-4\""}"#;
        let update: PageUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.current_page, 4);
        assert_eq!(update.image_etag, "W/\"ab-4\"");
    }
}
