//! The hub: process-wide coordinator owning the room registry and the
//! per-user session map.
//!
//! Broadcast fan-out enumerates a snapshot of the target room's membership
//! and enqueues on each session without suspending, so a slow receiver never
//! stalls the loop. Non-critical kinds are parked per-room and flushed on a
//! fixed cadence as one `batched_update` frame; kinds that coalesce
//! per-session bypass batching so the two mechanisms never compound.
//!
//! # Thread Safety
//!
//! Room and connection maps use `RwLock` since broadcasts (reads) vastly
//! outnumber joins/leaves (writes). Broadcasts to different rooms never
//! contend on a common lock beyond the registry read.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::WebSocketConfig;
use crate::domain::foundation::{RoomId, SessionId, UserId};
use crate::ports::{PageUpdate, RoomBroadcaster, SongUpdate};

use super::close_code;
use super::messages::{BatchedMessages, OutboundMessage, ServerMessage};
use super::session::Session;

/// One room's runtime state.
#[derive(Debug, Default)]
struct RoomEntry {
    members: HashSet<UserId>,
    /// Registered by the control plane before any WebSocket join; such a
    /// room survives its membership dropping to zero.
    pre_registered: bool,
}

/// Process-wide coordinator for sessions, rooms, and broadcast.
pub struct Hub {
    connections: RwLock<HashMap<UserId, Arc<Session>>>,
    rooms: RwLock<HashMap<RoomId, RoomEntry>>,
    /// Per-room messages awaiting the next batch flush.
    pending: Mutex<HashMap<RoomId, Vec<Arc<OutboundMessage>>>>,
    coalesce_kinds: HashSet<String>,
    config: WebSocketConfig,
}

impl Hub {
    pub fn new(config: WebSocketConfig) -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            coalesce_kinds: config.coalesce_set(),
            config,
        })
    }

    /// Record the authenticated session as the user's current connection.
    ///
    /// Last write wins: a prior session for the same user is told to close
    /// (normal closure, "session superseded") and its room membership is
    /// removed silently - the user is still present through the new
    /// session, so no `participant_left` is emitted. Returns the evicted
    /// session, if any.
    pub async fn register_connection(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let prior = {
            let mut connections = self.connections.write().await;
            connections.insert(session.user_id().clone(), Arc::clone(&session))
        };

        let prior = prior.filter(|p| p.id() != session.id())?;

        info!(
            user_id = %session.user_id(),
            superseded = %prior.id(),
            "evicting superseded session"
        );
        prior.begin_close(close_code::NORMAL, "session superseded");
        if let Some(room_id) = prior.room() {
            let mut rooms = self.rooms.write().await;
            Self::remove_member(&mut rooms, &room_id, prior.user_id());
            prior.set_room(None);
        }
        Some(prior)
    }

    /// Add the session to the room, creating the room entry if absent.
    ///
    /// A session already in a different room leaves it silently first; the
    /// control plane owns roster notifications for moves.
    pub async fn join_room(&self, session: &Arc<Session>, room_id: RoomId) {
        let mut rooms = self.rooms.write().await;

        if let Some(old_room) = session.room() {
            if old_room == room_id {
                return;
            }
            Self::remove_member(&mut rooms, &old_room, session.user_id());
            info!(
                request_id = %session.request_id(),
                user_id = %session.user_id(),
                from = %old_room,
                to = %room_id,
                "session moved rooms"
            );
        }

        let entry = rooms.entry(room_id.clone()).or_default();
        entry.members.insert(session.user_id().clone());
        session.set_room(Some(room_id.clone()));
        info!(
            request_id = %session.request_id(),
            user_id = %session.user_id(),
            room_id = %room_id,
            member_count = entry.members.len(),
            "session joined room"
        );
    }

    /// Remove the session's membership. The caller is responsible for
    /// notifying remaining members *before* this runs, while the room still
    /// exists. Returns the room left, if any.
    pub async fn leave_room(&self, session: &Arc<Session>) -> Option<RoomId> {
        let room_id = session.room()?;
        let mut rooms = self.rooms.write().await;
        Self::remove_member(&mut rooms, &room_id, session.user_id());
        session.set_room(None);
        Some(room_id)
    }

    /// Full disconnect cleanup, in destruction order: notify the room,
    /// remove membership, unregister, stop the writer.
    pub async fn disconnect(&self, session: &Arc<Session>) {
        if let Some(room_id) = session.room() {
            let left = ServerMessage::ParticipantLeft {
                user_id: session.user_id().clone(),
            };
            self.broadcast_message(
                &room_id,
                Arc::new(OutboundMessage::from_server_message(&left)),
                Some(&session.id()),
            )
            .await;
            self.leave_room(session).await;
            info!(
                request_id = %session.request_id(),
                user_id = %session.user_id(),
                room_id = %room_id,
                "session disconnected in room"
            );
        }

        self.unregister_connection(session).await;
        session.close();
        debug!(
            request_id = %session.request_id(),
            user_id = %session.user_id(),
            dropped = session.dropped_count(),
            peak_queue = session.peak_queue(),
            "session destroyed"
        );
    }

    async fn unregister_connection(&self, session: &Arc<Session>) {
        let mut connections = self.connections.write().await;
        // A reconnect may have already replaced this entry; only remove our own
        if connections
            .get(session.user_id())
            .is_some_and(|current| current.id() == session.id())
        {
            connections.remove(session.user_id());
        }
    }

    fn remove_member(
        rooms: &mut HashMap<RoomId, RoomEntry>,
        room_id: &RoomId,
        user_id: &UserId,
    ) {
        let Some(entry) = rooms.get_mut(room_id) else {
            return;
        };
        entry.members.remove(user_id);
        if entry.members.is_empty() && !entry.pre_registered {
            rooms.remove(room_id);
            info!(room_id = %room_id, "room removed (empty)");
        }
    }

    /// Route a message to the room: critical and per-session-coalesced
    /// kinds deliver immediately, everything else joins the room's pending
    /// batch. Messages to unregistered rooms are dropped with a warning.
    pub async fn broadcast_message(
        &self,
        room_id: &RoomId,
        message: Arc<OutboundMessage>,
        exclude: Option<&SessionId>,
    ) {
        if !self.rooms.read().await.contains_key(room_id) {
            warn!(
                room_id = %room_id,
                kind = message.kind(),
                "broadcast to unregistered room dropped"
            );
            return;
        }

        if message.is_critical() || self.coalesce_kinds.contains(message.kind()) {
            self.send_to_room(room_id, &message, exclude).await;
            return;
        }

        let mut pending = self.pending.lock().await;
        let queue = pending.entry(room_id.clone()).or_default();
        queue.push(message);
        debug!(
            room_id = %room_id,
            pending = queue.len(),
            "queued message for batch flush"
        );
    }

    /// Enqueue on every member's session, minus the excluded one. Returns
    /// the number of sessions that accepted the payload.
    async fn send_to_room(
        &self,
        room_id: &RoomId,
        message: &Arc<OutboundMessage>,
        exclude: Option<&SessionId>,
    ) -> usize {
        // Snapshot membership so enqueueing runs without the registry lock
        let members: Vec<UserId> = match self.rooms.read().await.get(room_id) {
            Some(entry) => entry.members.iter().cloned().collect(),
            None => {
                warn!(
                    room_id = %room_id,
                    kind = message.kind(),
                    "send to unregistered room dropped"
                );
                return 0;
            }
        };

        let connections = self.connections.read().await;
        let mut count = 0;
        for user_id in members {
            let Some(session) = connections.get(&user_id) else {
                continue;
            };
            if exclude.is_some_and(|id| *id == session.id()) {
                continue;
            }
            if session.enqueue(message) {
                count += 1;
            }
        }
        debug!(
            room_id = %room_id,
            kind = message.kind(),
            recipient_count = count,
            "delivered room message"
        );
        count
    }

    /// Deliver every room's pending batch: a single pending message goes out
    /// as-is, several are wrapped into one `batched_update` frame.
    pub async fn flush_pending_batches(&self) {
        let drained: Vec<(RoomId, Vec<Arc<OutboundMessage>>)> = {
            let mut pending = self.pending.lock().await;
            pending.drain().filter(|(_, v)| !v.is_empty()).collect()
        };

        for (room_id, mut messages) in drained {
            if messages.len() == 1 {
                let message = messages.pop().expect("checked non-empty");
                self.send_to_room(&room_id, &message, None).await;
                continue;
            }

            info!(
                room_id = %room_id,
                count = messages.len(),
                "flushing batched updates"
            );
            let batched = ServerMessage::BatchedUpdate {
                data: BatchedMessages {
                    messages: messages.iter().map(|m| m.body().clone()).collect(),
                },
            };
            self.send_to_room(
                &room_id,
                &Arc::new(OutboundMessage::from_server_message(&batched)),
                None,
            )
            .await;
        }
    }

    /// Spawn the periodic batch flush driver.
    pub fn start_batch_flush(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let period = self.config.batch_flush_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                hub.flush_pending_batches().await;
            }
        })
    }

    /// Number of connected members in a room (0 if the room is unknown).
    pub async fn member_count(&self, room_id: &RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|entry| entry.members.len())
            .unwrap_or(0)
    }

    /// Whether a room entry exists (members or pre-registration).
    pub async fn is_room_registered(&self, room_id: &RoomId) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    /// Total connected sessions.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[async_trait]
impl RoomBroadcaster for Hub {
    async fn register_room(&self, room_id: &RoomId) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(room_id) {
            return false;
        }
        rooms.insert(
            room_id.clone(),
            RoomEntry {
                members: HashSet::new(),
                pre_registered: true,
            },
        );
        info!(room_id = %room_id, "room pre-registered by control plane");
        true
    }

    async fn broadcast(
        &self,
        room_id: &RoomId,
        message: Value,
        exclude: Option<&SessionId>,
    ) {
        self.broadcast_message(room_id, Arc::new(OutboundMessage::from_value(message)), exclude)
            .await;
    }

    async fn broadcast_song_updated(&self, room_id: &RoomId, update: SongUpdate) {
        let message = ServerMessage::SongUpdated { data: update };
        self.broadcast_message(
            room_id,
            Arc::new(OutboundMessage::from_server_message(&message)),
            None,
        )
        .await;
    }

    async fn broadcast_page_updated(&self, room_id: &RoomId, update: PageUpdate) {
        info!(
            room_id = %room_id,
            page = update.current_page,
            "page_updated broadcast"
        );
        let message = ServerMessage::PageUpdated { data: update };
        self.broadcast_message(
            room_id,
            Arc::new(OutboundMessage::from_server_message(&message)),
            None,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::websocket::testutil::{
        custom_message, session_with_writer, test_config,
    };
    use std::time::Duration;

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    #[tokio::test]
    async fn register_room_is_idempotent() {
        let hub = Hub::new(test_config());
        let r = room("R1");
        assert!(hub.register_room(&r).await);
        assert!(!hub.register_room(&r).await);
        assert!(hub.is_room_registered(&r).await);
    }

    #[tokio::test]
    async fn broadcast_to_unregistered_room_is_noop() {
        let hub = Hub::new(test_config());
        // Must not panic and must not park anything for later delivery
        hub.broadcast(&room("ghost"), serde_json::json!({"type": "setlist_updated"}), None)
            .await;
        assert_eq!(hub.pending.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn song_update_reaches_every_member() {
        let hub = Hub::new(test_config());
        let r = room("R1");
        hub.register_room(&r).await;

        let (p1, frames1, _) = session_with_writer("p1");
        let (p2, frames2, _) = session_with_writer("p2");
        hub.register_connection(Arc::clone(&p1)).await;
        hub.register_connection(Arc::clone(&p2)).await;
        hub.join_room(&p1, r.clone()).await;
        hub.join_room(&p2, r.clone()).await;

        hub.broadcast_song_updated(
            &r,
            SongUpdate {
                song_id: "42".to_string(),
                title: "T".to_string(),
                artist: "A".to_string(),
                current_page: 1,
                total_pages: 3,
                image_etag: Some("W/\"ab-1\"".to_string()),
            },
        )
        .await;

        // song_updated is coalesced per-session; wait out the window
        tokio::time::sleep(Duration::from_millis(120)).await;

        for frames in [&frames1, &frames2] {
            let frames = frames.lock().unwrap();
            let songs: Vec<_> = frames
                .iter()
                .filter(|f| f.contains(r#""type":"song_updated""#))
                .collect();
            assert_eq!(songs.len(), 1, "frames: {frames:?}");
            assert!(songs[0].contains(r#""song_id":"42""#));
            assert!(songs[0].contains(r#""image_etag":"W/\"ab-1\"""#));
        }
    }

    #[tokio::test]
    async fn exclude_skips_exactly_that_session() {
        let hub = Hub::new(test_config());
        let r = room("R1");

        let (s1, frames1, _) = session_with_writer("u1");
        let (s2, frames2, _) = session_with_writer("u2");
        let (s3, frames3, _) = session_with_writer("u3");
        for s in [&s1, &s2, &s3] {
            hub.register_connection(Arc::clone(s)).await;
            hub.join_room(s, r.clone()).await;
        }

        let left = ServerMessage::ParticipantLeft {
            user_id: s1.user_id().clone(),
        };
        hub.broadcast_message(
            &r,
            Arc::new(OutboundMessage::from_server_message(&left)),
            Some(&s1.id()),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(frames1
            .lock()
            .unwrap()
            .iter()
            .all(|f| !f.contains("participant_left")));
        for frames in [&frames2, &frames3] {
            assert_eq!(
                frames
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|f| f.contains("participant_left"))
                    .count(),
                1
            );
        }
    }

    #[tokio::test]
    async fn broadcast_after_leave_reaches_remaining_only() {
        let hub = Hub::new(test_config());
        let r = room("R3");

        let (p1, frames1, _) = session_with_writer("p1");
        let (p2, frames2, _) = session_with_writer("p2");
        for s in [&p1, &p2] {
            hub.register_connection(Arc::clone(s)).await;
            hub.join_room(s, r.clone()).await;
        }

        hub.leave_room(&p1).await;
        assert_eq!(hub.member_count(&r).await, 1);

        hub.broadcast_message(&r, custom_message("critical_update", 7), None)
            .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(frames1.lock().unwrap().iter().all(|f| !f.contains(r#""seq":7"#)));
        assert!(frames2.lock().unwrap().iter().any(|f| f.contains(r#""seq":7"#)));
    }

    #[tokio::test]
    async fn plural_pending_messages_flush_as_one_batch() {
        let hub = Hub::new(test_config());
        let r = room("R1");

        let (s1, frames1, _) = session_with_writer("u1");
        hub.register_connection(Arc::clone(&s1)).await;
        hub.join_room(&s1, r.clone()).await;

        hub.broadcast_message(&r, custom_message("setlist_updated", 1), None)
            .await;
        hub.broadcast_message(&r, custom_message("annotation_added", 2), None)
            .await;

        // Nothing on the wire until the flush fires
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(frames1.lock().unwrap().is_empty());

        hub.flush_pending_batches().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let frames = frames1.lock().unwrap().clone();
        assert_eq!(frames.len(), 1, "frames: {frames:?}");
        let value: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["type"], "batched_update");
        let messages = value["data"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["seq"], 1);
        assert_eq!(messages[1]["seq"], 2);
    }

    #[tokio::test]
    async fn single_pending_message_flushes_unwrapped() {
        let hub = Hub::new(test_config());
        let r = room("R1");

        let (s1, frames1, _) = session_with_writer("u1");
        hub.register_connection(Arc::clone(&s1)).await;
        hub.join_room(&s1, r.clone()).await;

        hub.broadcast_message(&r, custom_message("setlist_updated", 1), None)
            .await;
        hub.flush_pending_batches().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let frames = frames1.lock().unwrap().clone();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains(r#""type":"setlist_updated""#));
    }

    #[tokio::test]
    async fn critical_messages_skip_batching() {
        let hub = Hub::new(test_config());
        let r = room("R1");

        let (s1, frames1, _) = session_with_writer("u1");
        hub.register_connection(Arc::clone(&s1)).await;
        hub.join_room(&s1, r.clone()).await;

        let closed = ServerMessage::RoomClosed {
            room_id: r.clone(),
            reason: Some("host ended".to_string()),
        };
        hub.broadcast_message(
            &r,
            Arc::new(OutboundMessage::from_server_message(&closed)),
            None,
        )
        .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(frames1
            .lock()
            .unwrap()
            .iter()
            .any(|f| f.contains(r#""type":"room_closed""#)));
        assert_eq!(hub.pending.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn reconnect_evicts_prior_session() {
        let hub = Hub::new(test_config());
        let r = room("R1");

        let (old, _frames_old, closes_old) = session_with_writer("u1");
        hub.register_connection(Arc::clone(&old)).await;
        hub.join_room(&old, r.clone()).await;

        let (new, _frames_new, _) = session_with_writer("u1");
        let evicted = hub.register_connection(Arc::clone(&new)).await;

        assert!(evicted.is_some_and(|e| e.id() == old.id()));
        assert!(old.is_closed());
        assert_eq!(hub.connection_count().await, 1);
        // Stale membership removed silently; no room left behind
        assert!(!hub.is_room_registered(&r).await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let closes = closes_old.lock().unwrap().clone();
        assert_eq!(closes.len(), 1);
        assert_eq!(closes[0].0, close_code::NORMAL);
        assert_eq!(closes[0].1, "session superseded");
    }

    #[tokio::test]
    async fn disconnect_notifies_room_before_removal() {
        let hub = Hub::new(test_config());
        let r = room("R1");

        let (p1, _f1, _) = session_with_writer("p1");
        let (p2, frames2, _) = session_with_writer("p2");
        for s in [&p1, &p2] {
            hub.register_connection(Arc::clone(s)).await;
            hub.join_room(s, r.clone()).await;
        }

        hub.disconnect(&p1).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let frames = frames2.lock().unwrap().clone();
        assert!(frames
            .iter()
            .any(|f| f.contains("participant_left") && f.contains(r#""user_id":"p1""#)));
        assert_eq!(hub.member_count(&r).await, 1);
        assert_eq!(hub.connection_count().await, 1);
        assert!(p1.is_closed());
    }

    #[tokio::test]
    async fn empty_room_is_removed_unless_pre_registered() {
        let hub = Hub::new(test_config());

        let organic = room("organic");
        let pinned = room("pinned");
        hub.register_room(&pinned).await;

        let (s1, _f, _) = session_with_writer("u1");
        hub.register_connection(Arc::clone(&s1)).await;
        hub.join_room(&s1, organic.clone()).await;
        hub.leave_room(&s1).await;
        assert!(!hub.is_room_registered(&organic).await);

        let (s2, _f, _) = session_with_writer("u2");
        hub.register_connection(Arc::clone(&s2)).await;
        hub.join_room(&s2, pinned.clone()).await;
        hub.leave_room(&s2).await;
        assert!(hub.is_room_registered(&pinned).await);
    }

    #[tokio::test]
    async fn closed_session_accepts_no_broadcast() {
        let hub = Hub::new(test_config());
        let r = room("R1");

        let (s1, frames1, _) = session_with_writer("u1");
        hub.register_connection(Arc::clone(&s1)).await;
        hub.join_room(&s1, r.clone()).await;
        s1.close();

        hub.broadcast_message(&r, custom_message("critical_update", 1), None)
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(frames1.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn page_update_goes_out_coalesced_not_batched() {
        let hub = Hub::new(test_config());
        let r = room("R2");

        let (s1, frames1, _) = session_with_writer("u1");
        hub.register_connection(Arc::clone(&s1)).await;
        hub.join_room(&s1, r.clone()).await;

        for page in 2..=6 {
            hub.broadcast_page_updated(
                &r,
                PageUpdate {
                    current_page: page,
                    song_id: "42".to_string(),
                    title: "T".to_string(),
                    artist: "A".to_string(),
                    total_pages: 9,
                    image_etag: format!("W/\"ab-{page}\""),
                },
            )
            .await;
        }

        // Never parked in the batch queue
        assert_eq!(hub.pending.lock().await.len(), 0);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let frames = frames1.lock().unwrap().clone();
        assert_eq!(frames.len(), 1, "frames: {frames:?}");
        assert!(frames[0].contains(r#""current_page":6"#));
    }
}
