//! WebSocket upgrade handler and inbound protocol.
//!
//! Connection lifecycle:
//! 1. Extract the correlation id and bearer token from the upgrade request
//! 2. Accept the upgrade, then authenticate (close 4000/4001 on failure
//!    before any server message)
//! 3. Spawn the writer task and register with the hub (evicting a prior
//!    session for the same user)
//! 4. Send exactly one `connection_success`
//! 5. Read membership operations until disconnect
//! 6. Clean up room membership and registry entries
//!
//! After the handshake only text frames carry protocol. Binary frames are
//! ignored; malformed JSON and unknown types are logged and never close the
//! connection.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use futures::{stream::SplitSink, FutureExt, SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::WebSocketConfig;
use crate::domain::foundation::{AuthError, RequestId, RoomId, UserId};
use crate::ports::TokenVerifier;

use super::close_code;
use super::hub::Hub;
use super::messages::{ClientMessage, OutboundMessage, ServerMessage};
use super::session::{run_writer, FrameTransport, Session, TransportError};

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub hub: Arc<Hub>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub config: Arc<WebSocketConfig>,
}

impl WebSocketState {
    pub fn new(
        hub: Arc<Hub>,
        verifier: Arc<dyn TokenVerifier>,
        config: Arc<WebSocketConfig>,
    ) -> Self {
        Self {
            hub,
            verifier,
            config,
        }
    }
}

/// Create the axum router for the WebSocket endpoint.
pub fn websocket_router(state: WebSocketState) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

/// Bind the WebSocket listener and serve until the shutdown future resolves.
pub async fn serve(
    state: WebSocketState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = state.config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "WebSocket fabric listening");
    axum::serve(listener, websocket_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Handle WebSocket upgrade requests.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WebSocketState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let request_id = extract_request_id(&headers, &state.config.request_id_header);
    let token = extract_token(&headers, &params);
    info!(request_id = %request_id, "WebSocket connect");

    ws.max_message_size(state.config.max_message_bytes)
        .max_frame_size(state.config.auto_fragment_size)
        .on_upgrade(move |socket| handle_socket(socket, state, request_id, token))
}

/// Correlation id from the configured header, or a fresh one.
fn extract_request_id(headers: &HeaderMap, header_name: &str) -> RequestId {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(RequestId::from_header)
        .unwrap_or_else(RequestId::generate)
}

/// Bearer token from the Authorization header or the `token` query parameter.
fn extract_token(headers: &HeaderMap, params: &HashMap<String, String>) -> Option<String> {
    if let Some(value) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some((scheme, token)) = value.split_once(' ') {
            if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
                return Some(token.trim().to_string());
            }
        }
    }
    params
        .get("token")
        .filter(|token| !token.is_empty())
        .cloned()
}

/// Resolve the handshake token to a user, or the close code to reject with.
async fn authenticate(
    verifier: &Arc<dyn TokenVerifier>,
    token: Option<&str>,
) -> Result<UserId, (u16, &'static str)> {
    let Some(token) = token else {
        return Err((close_code::AUTH_REQUIRED, "Authentication required"));
    };
    verifier
        .verify(token)
        .await
        .map_err(|err| (close_code::AUTH_FAILED, close_reason(&err)))
}

/// Close-frame reason derived from the auth error kind.
fn close_reason(err: &AuthError) -> &'static str {
    match err {
        AuthError::InvalidToken => "Invalid token",
        AuthError::TokenExpired => "Token expired",
        AuthError::ServiceUnavailable(_) => "Authentication service unavailable",
    }
}

/// Handle an established WebSocket connection for its whole lifetime.
async fn handle_socket(
    socket: WebSocket,
    state: WebSocketState,
    request_id: RequestId,
    token: Option<String>,
) {
    let (sink, mut stream) = socket.split();
    let mut transport = SocketTransport { sink };

    let user_id = match authenticate(&state.verifier, token.as_deref()).await {
        Ok(user_id) => user_id,
        Err((code, reason)) => {
            warn!(request_id = %request_id, code, reason, "handshake rejected");
            let _ = transport.send_close(code, reason).await;
            return;
        }
    };

    let session = Session::new(user_id.clone(), request_id.clone(), &state.config);
    let writer = tokio::spawn(run_writer(
        Arc::clone(&session),
        transport,
        state.config.yield_threshold_bytes,
    ));

    if let Some(evicted) = state.hub.register_connection(Arc::clone(&session)).await {
        debug!(
            request_id = %request_id,
            user_id = %user_id,
            evicted = %evicted.id(),
            "prior session superseded"
        );
    }

    send_to_session(
        &session,
        &ServerMessage::ConnectionSuccess {
            user_id: user_id.clone(),
        },
    );
    info!(request_id = %request_id, user_id = %user_id, "WebSocket connected");

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                // A panicking handler must not take the process down
                let dispatch =
                    AssertUnwindSafe(handle_text(&state.hub, &session, &text)).catch_unwind();
                if dispatch.await.is_err() {
                    error!(
                        request_id = %request_id,
                        user_id = %user_id,
                        "message handler panicked"
                    );
                    session.begin_close(close_code::INTERNAL_ERROR, "Internal error");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                // Binary frames are reserved and currently ignored
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Ping/pong handled by the framing layer
            }
            Err(err) => {
                debug!(
                    request_id = %request_id,
                    user_id = %user_id,
                    error = %err,
                    "socket read error"
                );
                break;
            }
        }
    }

    state.hub.disconnect(&session).await;
    writer.abort();
    info!(request_id = %request_id, user_id = %user_id, "WebSocket disconnected");
}

/// Dispatch one inbound text frame.
async fn handle_text(hub: &Arc<Hub>, session: &Arc<Session>, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                request_id = %session.request_id(),
                user_id = %session.user_id(),
                error = %err,
                "invalid JSON from client"
            );
            return;
        }
    };

    match serde_json::from_value::<ClientMessage>(value.clone()) {
        Ok(ClientMessage::JoinRoom { room_id }) => handle_join_room(hub, session, room_id).await,
        Ok(ClientMessage::LeaveRoom) => handle_leave_room(hub, session).await,
        Err(_) => {
            warn!(
                request_id = %session.request_id(),
                user_id = %session.user_id(),
                msg_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("<none>"),
                "unknown message type"
            );
        }
    }
}

/// `join_room`: bind the session to the room, leaving a previous room
/// silently. Replies to the joining session only; `participant_joined` is
/// the control plane's to broadcast.
pub(crate) async fn handle_join_room(
    hub: &Arc<Hub>,
    session: &Arc<Session>,
    room_id: Option<String>,
) {
    let room_id = match room_id.filter(|id| !id.is_empty()).map(RoomId::new) {
        Some(Ok(room_id)) => room_id,
        _ => {
            send_to_session(
                session,
                &ServerMessage::Error {
                    message: "No room_id provided".to_string(),
                },
            );
            return;
        }
    };

    hub.join_room(session, room_id.clone()).await;
    send_to_session(session, &ServerMessage::JoinRoomSuccess { room_id });
}

/// `leave_room`: notify the remaining members *before* removing membership,
/// then confirm to the leaver.
pub(crate) async fn handle_leave_room(hub: &Arc<Hub>, session: &Arc<Session>) {
    let Some(room_id) = session.room() else {
        send_to_session(
            session,
            &ServerMessage::Error {
                message: "Not in any room".to_string(),
            },
        );
        return;
    };

    let left = ServerMessage::ParticipantLeft {
        user_id: session.user_id().clone(),
    };
    hub.broadcast_message(
        &room_id,
        Arc::new(OutboundMessage::from_server_message(&left)),
        Some(&session.id()),
    )
    .await;

    hub.leave_room(session).await;
    send_to_session(session, &ServerMessage::RoomLeft { room_id });
}

fn send_to_session(session: &Arc<Session>, message: &ServerMessage) {
    session.enqueue(&Arc::new(OutboundMessage::from_server_message(message)));
}

/// The writer's view of the socket sink.
struct SocketTransport {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl FrameTransport for SocketTransport {
    async fn send_text(&mut self, payload: &str) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(payload.to_string().into()))
            .await
            .map_err(|err| TransportError::new(err.to_string()))
    }

    async fn send_close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.sink
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_string().into(),
            })))
            .await
            .map_err(|err| TransportError::new(err.to_string()))
    }
}
