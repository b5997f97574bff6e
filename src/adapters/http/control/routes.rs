//! Axum routes for the control-plane endpoints.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{
    broadcast_event, close_room, page_updated, participant_joined, register_room, service_info,
    song_updated, ControlAppState,
};

/// Routes for room announcements.
///
/// - POST /api/rooms/{room_id}/register - pre-register a room
/// - POST /api/rooms/{room_id}/song - announce a song selection
/// - POST /api/rooms/{room_id}/page - announce a page turn
/// - POST /api/rooms/{room_id}/participants/{user_id} - announce a join
/// - POST /api/rooms/{room_id}/close - announce room closure
/// - POST /api/rooms/{room_id}/broadcast - announce an arbitrary room event
pub fn room_routes() -> Router<ControlAppState> {
    Router::new()
        .route("/{room_id}/register", post(register_room))
        .route("/{room_id}/song", post(song_updated))
        .route("/{room_id}/page", post(page_updated))
        .route("/{room_id}/participants/{user_id}", post(participant_joined))
        .route("/{room_id}/close", post(close_room))
        .route("/{room_id}/broadcast", post(broadcast_event))
}

/// Combined router with all control-plane routes.
pub fn control_router() -> Router<ControlAppState> {
    Router::new().nest("/api/rooms", room_routes())
}

/// Unauthenticated service identity route.
pub fn service_info_router() -> Router {
    Router::new().route("/", get(service_info))
}
