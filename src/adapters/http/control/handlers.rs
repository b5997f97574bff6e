//! HTTP handlers for the control-plane endpoints.
//!
//! Each handler resolves the room id and hands the announcement to the
//! [`RoomBroadcaster`] shim. Broadcasts to rooms nobody registered are
//! dropped inside the shim with a warning; the control plane still gets a
//! 200 because the persisted state change already happened upstream.

use std::sync::Arc;

use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use tracing::info;

use crate::domain::foundation::RoomId;
use crate::ports::{PageUpdate, RoomBroadcaster, SongUpdate};

use super::dto::{
    CloseRoomRequest, ErrorResponse, RegisterRoomResponse, ServiceInfo, StatusResponse,
};

/// Shared state for the control-plane router.
#[derive(Clone)]
pub struct ControlAppState {
    pub broadcaster: Arc<dyn RoomBroadcaster>,
}

impl ControlAppState {
    pub fn new(broadcaster: Arc<dyn RoomBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

fn parse_room_id(raw: &str) -> Result<RoomId, Response> {
    RoomId::new(raw).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("No room_id provided")),
        )
            .into_response()
    })
}

/// GET / - service identity.
pub async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo::current())
}

/// POST /api/rooms/{room_id}/register - pre-register a room.
pub async fn register_room(
    State(state): State<ControlAppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RegisterRoomResponse>, Response> {
    let room_id = parse_room_id(&room_id)?;
    let registered = state.broadcaster.register_room(&room_id).await;
    Ok(Json(RegisterRoomResponse {
        room_id: room_id.to_string(),
        registered,
    }))
}

/// POST /api/rooms/{room_id}/song - announce a song selection.
pub async fn song_updated(
    State(state): State<ControlAppState>,
    Path(room_id): Path<String>,
    Json(update): Json<SongUpdate>,
) -> Result<Json<StatusResponse>, Response> {
    let room_id = parse_room_id(&room_id)?;
    info!(room_id = %room_id, song_id = %update.song_id, "song selection announced");
    state.broadcaster.broadcast_song_updated(&room_id, update).await;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/rooms/{room_id}/page - announce a page turn.
pub async fn page_updated(
    State(state): State<ControlAppState>,
    Path(room_id): Path<String>,
    Json(update): Json<PageUpdate>,
) -> Result<Json<StatusResponse>, Response> {
    let room_id = parse_room_id(&room_id)?;
    state.broadcaster.broadcast_page_updated(&room_id, update).await;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/rooms/{room_id}/participants/{user_id} - announce a join.
///
/// The HTTP join endpoint is the authoritative source of
/// `participant_joined`; the WebSocket join deliberately never emits it.
pub async fn participant_joined(
    State(state): State<ControlAppState>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, Response> {
    let room_id = parse_room_id(&room_id)?;
    state
        .broadcaster
        .broadcast(
            &room_id,
            json!({"type": "participant_joined", "user_id": user_id}),
            None,
        )
        .await;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/rooms/{room_id}/close - announce room closure.
pub async fn close_room(
    State(state): State<ControlAppState>,
    Path(room_id): Path<String>,
    Json(request): Json<CloseRoomRequest>,
) -> Result<Json<StatusResponse>, Response> {
    let room_id = parse_room_id(&room_id)?;
    let mut message = json!({"type": "room_closed", "room_id": room_id.as_str()});
    if let Some(reason) = request.reason {
        message["reason"] = Value::String(reason);
    }
    info!(room_id = %room_id, "room closure announced");
    state.broadcaster.broadcast(&room_id, message, None).await;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/rooms/{room_id}/broadcast - announce an arbitrary room event.
///
/// The body must be a JSON object with a `type` discriminator; non-critical
/// kinds ride the batch flush.
pub async fn broadcast_event(
    State(state): State<ControlAppState>,
    Path(room_id): Path<String>,
    Json(message): Json<Value>,
) -> Result<Json<StatusResponse>, Response> {
    let room_id = parse_room_id(&room_id)?;

    let has_kind = message
        .as_object()
        .and_then(|object| object.get("type"))
        .and_then(Value::as_str)
        .is_some_and(|kind| !kind.is_empty());
    if !has_kind {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Message must be an object with a type")),
        )
            .into_response());
    }

    state.broadcaster.broadcast(&room_id, message, None).await;
    Ok(Json(StatusResponse::ok()))
}
