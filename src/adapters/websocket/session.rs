//! Per-connection session state: the bounded outbound queue, the coalescing
//! buffer, and the writer task.
//!
//! Producers (the hub, the protocol handler) enqueue without ever suspending;
//! the session's writer task is the only consumer and the only place that
//! touches the socket sink. When the queue is at capacity the configured drop
//! policy decides which payload loses, so one slow receiver can neither stall
//! a broadcast nor grow memory without bound.
//!
//! # Coalescing
//!
//! High-frequency kinds (`page_updated`, `song_updated` by default) are not
//! enqueued immediately. The newest message per kind is parked in a buffer;
//! the first such message after a window expires schedules one flush, and
//! the flush enqueues only the latest value per kind. If the host drags the
//! page slider, participants see the final page, not every intermediate one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{DropPolicy, WebSocketConfig};
use crate::domain::foundation::{RequestId, RoomId, SessionId, UserId};

use super::close_code;
use super::messages::OutboundMessage;

/// Terminal failure writing to the underlying socket.
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Sink the writer task drains into.
///
/// Abstracted from the socket so the writer and queue discipline can be
/// exercised without a network connection.
#[async_trait]
pub trait FrameTransport: Send {
    /// Write one text frame.
    async fn send_text(&mut self, payload: &str) -> Result<(), TransportError>;

    /// Write a close frame with the given code and reason.
    async fn send_close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// An item awaiting the writer.
#[derive(Debug)]
enum Outbound {
    Frame(Arc<str>),
    Close { code: u16, reason: String },
}

#[derive(Debug)]
struct QueueInner {
    items: VecDeque<Outbound>,
    dropped: u64,
    peak: usize,
    /// A close command is queued; no further frames are accepted.
    closing: bool,
    /// The writer is done; pop returns None.
    closed: bool,
}

/// Outcome of a push attempt.
#[derive(Debug, Clone, Copy)]
struct PushOutcome {
    accepted: bool,
    dropped: bool,
    dropped_total: u64,
}

/// Bounded multi-producer single-consumer queue of encoded payloads.
///
/// Pushing never suspends: at capacity the drop policy is applied
/// immediately. The single consumer is the session's writer task.
#[derive(Debug)]
pub(crate) struct SendQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    policy: DropPolicy,
}

impl SendQueue {
    fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(64)),
                dropped: 0,
                peak: 0,
                closing: false,
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    fn push_frame(&self, payload: Arc<str>) -> PushOutcome {
        let mut inner = self.inner.lock().expect("send queue lock poisoned");
        if inner.closing || inner.closed {
            return PushOutcome {
                accepted: false,
                dropped: false,
                dropped_total: inner.dropped,
            };
        }

        let mut dropped = false;
        if inner.items.len() >= self.capacity {
            match self.policy {
                DropPolicy::Newest => {
                    inner.dropped += 1;
                    return PushOutcome {
                        accepted: false,
                        dropped: true,
                        dropped_total: inner.dropped,
                    };
                }
                // TODO: implement random eviction for DropPolicy::Random
                DropPolicy::Oldest | DropPolicy::Random => {
                    inner.items.pop_front();
                    inner.dropped += 1;
                    dropped = true;
                }
            }
        }

        inner.items.push_back(Outbound::Frame(payload));
        inner.peak = inner.peak.max(inner.items.len());
        let dropped_total = inner.dropped;
        drop(inner);
        self.notify.notify_one();

        PushOutcome {
            accepted: true,
            dropped,
            dropped_total,
        }
    }

    /// Queue a close command, discarding everything still pending.
    fn push_close(&self, code: u16, reason: &str) {
        let mut inner = self.inner.lock().expect("send queue lock poisoned");
        if inner.closing || inner.closed {
            return;
        }
        inner.items.clear();
        inner.items.push_back(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        inner.closing = true;
        drop(inner);
        self.notify.notify_one();
    }

    /// Stop the writer, discarding pending frames. A queued close command
    /// survives so the writer can still deliver the close frame.
    fn close(&self) {
        let mut inner = self.inner.lock().expect("send queue lock poisoned");
        inner
            .items
            .retain(|item| matches!(item, Outbound::Close { .. }));
        if inner.items.is_empty() {
            inner.closed = true;
        } else {
            inner.closing = true;
        }
        drop(inner);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<Outbound> {
        loop {
            {
                let mut inner = self.inner.lock().expect("send queue lock poisoned");
                if inner.closed {
                    return None;
                }
                if let Some(item) = inner.items.pop_front() {
                    if matches!(item, Outbound::Close { .. }) {
                        inner.closed = true;
                    }
                    return Some(item);
                }
                if inner.closing {
                    // Close command already consumed
                    inner.closed = true;
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("send queue lock poisoned").items.len()
    }

    fn dropped(&self) -> u64 {
        self.inner.lock().expect("send queue lock poisoned").dropped
    }

    fn peak(&self) -> usize {
        self.inner.lock().expect("send queue lock poisoned").peak
    }
}

/// Per-kind latest-message buffer with a single scheduled flush per window.
struct Coalescer {
    latest: HashMap<String, Arc<OutboundMessage>>,
    window_ends_at: Option<Instant>,
    flush_task: Option<JoinHandle<()>>,
}

/// The server's view of one client's live connection.
///
/// Owned by the hub's registry while alive; the writer task is owned by the
/// connection handler and exits when the session closes.
pub struct Session {
    id: SessionId,
    user_id: UserId,
    request_id: RequestId,
    queue: SendQueue,
    coalescer: Mutex<Coalescer>,
    coalesce_window: Duration,
    coalesce_types: HashSet<String>,
    slow_client_threshold: u64,
    room: Mutex<Option<RoomId>>,
    closed: AtomicBool,
}

impl Session {
    /// Create a session for an authenticated connection.
    pub fn new(user_id: UserId, request_id: RequestId, config: &WebSocketConfig) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            user_id,
            request_id,
            queue: SendQueue::new(config.send_queue_max, config.drop_policy),
            coalescer: Mutex::new(Coalescer {
                latest: HashMap::new(),
                window_ends_at: None,
                flush_task: None,
            }),
            coalesce_window: config.coalesce_window(),
            coalesce_types: config.coalesce_set(),
            slow_client_threshold: config.slow_client_disconnect_after_drops,
            room: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// The room this session currently belongs to, if any.
    pub fn room(&self) -> Option<RoomId> {
        self.room.lock().expect("room lock poisoned").clone()
    }

    pub(crate) fn set_room(&self, room_id: Option<RoomId>) {
        *self.room.lock().expect("room lock poisoned") = room_id;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Messages lost to the drop policy so far.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped()
    }

    /// High-water mark of the outbound queue.
    pub fn peak_queue(&self) -> usize {
        self.queue.peak()
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Enqueue a message for delivery, applying coalescing and the drop
    /// policy. Never suspends. Returns whether the message was accepted
    /// (a coalesced message counts as accepted even though it may be
    /// superseded before the flush).
    pub fn enqueue(self: &Arc<Self>, message: &Arc<OutboundMessage>) -> bool {
        if self.is_closed() {
            return false;
        }

        if !self.coalesce_window.is_zero()
            && !message.is_critical()
            && self.coalesce_types.contains(message.kind())
        {
            self.coalesce(message);
            return true;
        }

        self.enqueue_encoded(message)
    }

    /// Park the newest value for this kind; schedule one flush per window.
    fn coalesce(self: &Arc<Self>, message: &Arc<OutboundMessage>) {
        let mut coalescer = self.coalescer.lock().expect("coalescer lock poisoned");
        let now = Instant::now();
        let window_expired = coalescer
            .window_ends_at
            .map_or(true, |ends_at| now >= ends_at);

        if window_expired {
            coalescer.window_ends_at = Some(now + self.coalesce_window);
            let session = Arc::clone(self);
            coalescer.flush_task = Some(tokio::spawn(async move {
                tokio::time::sleep(session.coalesce_window).await;
                session.flush_coalesced();
            }));
        }

        coalescer
            .latest
            .insert(message.kind().to_string(), Arc::clone(message));
    }

    /// Enqueue everything parked in the coalesce buffer and clear it.
    fn flush_coalesced(self: &Arc<Self>) {
        let pending: Vec<Arc<OutboundMessage>> = {
            let mut coalescer = self.coalescer.lock().expect("coalescer lock poisoned");
            coalescer.latest.drain().map(|(_, message)| message).collect()
        };
        for message in pending {
            self.enqueue_encoded(&message);
        }
    }

    fn enqueue_encoded(self: &Arc<Self>, message: &Arc<OutboundMessage>) -> bool {
        let outcome = self.queue.push_frame(message.encoded());
        if outcome.dropped {
            warn!(
                request_id = %self.request_id,
                user_id = %self.user_id,
                kind = message.kind(),
                dropped_total = outcome.dropped_total,
                queue_len = self.queue.len(),
                "outbound queue full, applied drop policy"
            );
            if self.slow_client_threshold > 0
                && outcome.dropped_total >= self.slow_client_threshold
            {
                warn!(
                    request_id = %self.request_id,
                    user_id = %self.user_id,
                    dropped_total = outcome.dropped_total,
                    "slow client exceeded drop threshold, closing"
                );
                self.begin_close(close_code::SLOW_CLIENT, "Too many dropped messages");
            }
        }
        outcome.accepted
    }

    /// Ask the writer to send a close frame and stop. Pending frames are
    /// discarded; further enqueues are refused.
    pub fn begin_close(&self, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.abort_flush_task();
        self.queue.push_close(code, reason);
    }

    /// Terminal cleanup: stop the writer, discard the queue, cancel the
    /// coalesce flush. Called on disconnect and on writer failure.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.abort_flush_task();
        self.queue.close();
    }

    fn abort_flush_task(&self) {
        let task = self
            .coalescer
            .lock()
            .expect("coalescer lock poisoned")
            .flush_task
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("room", &self.room())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Drain a session's outbound queue into the transport until the session
/// closes or the transport fails.
///
/// The writer is the queue's only consumer. After writing a payload at or
/// above `yield_threshold` bytes it yields once to the scheduler so a large
/// frame cannot monopolize the task.
pub async fn run_writer<T: FrameTransport>(
    session: Arc<Session>,
    mut transport: T,
    yield_threshold: usize,
) {
    while let Some(item) = session.queue.pop().await {
        match item {
            Outbound::Frame(payload) => {
                if let Err(err) = transport.send_text(&payload).await {
                    debug!(
                        request_id = %session.request_id,
                        user_id = %session.user_id,
                        error = %err,
                        "write failed, closing session"
                    );
                    session.close();
                    break;
                }
                if payload.len() >= yield_threshold {
                    tokio::task::yield_now().await;
                }
            }
            Outbound::Close { code, reason } => {
                let _ = transport.send_close(code, &reason).await;
                session.close();
                break;
            }
        }
    }
}
