//! Shared helpers for the websocket module's unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::config::WebSocketConfig;
use crate::domain::foundation::{RequestId, UserId};

use super::messages::OutboundMessage;
use super::session::{run_writer, FrameTransport, Session, TransportError};

/// Collected frames and close commands, for asserting writer output.
pub(crate) type Frames = Arc<Mutex<Vec<String>>>;
pub(crate) type Closes = Arc<Mutex<Vec<(u16, String)>>>;

/// Transport that records everything the writer sends.
pub(crate) struct CollectorTransport {
    frames: Frames,
    closes: Closes,
}

impl CollectorTransport {
    pub(crate) fn new() -> (Self, Frames, Closes) {
        let frames: Frames = Arc::default();
        let closes: Closes = Arc::default();
        (
            Self {
                frames: Arc::clone(&frames),
                closes: Arc::clone(&closes),
            },
            frames,
            closes,
        )
    }
}

#[async_trait]
impl FrameTransport for CollectorTransport {
    async fn send_text(&mut self, payload: &str) -> Result<(), TransportError> {
        self.frames.lock().unwrap().push(payload.to_string());
        Ok(())
    }

    async fn send_close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.closes.lock().unwrap().push((code, reason.to_string()));
        Ok(())
    }
}

/// Transport whose writes always fail, for the write-error path.
pub(crate) struct FailingTransport;

#[async_trait]
impl FrameTransport for FailingTransport {
    async fn send_text(&mut self, _payload: &str) -> Result<(), TransportError> {
        Err(TransportError::new("connection reset"))
    }

    async fn send_close(&mut self, _code: u16, _reason: &str) -> Result<(), TransportError> {
        Err(TransportError::new("connection reset"))
    }
}

/// Default config for tests.
pub(crate) fn test_config() -> WebSocketConfig {
    WebSocketConfig::default()
}

/// A session with a running writer draining into a collector.
pub(crate) fn session_with_writer(user: &str) -> (std::sync::Arc<Session>, Frames, Closes) {
    let config = test_config();
    let session = Session::new(
        UserId::new(user).unwrap(),
        RequestId::generate(),
        &config,
    );
    let (transport, frames, closes) = CollectorTransport::new();
    tokio::spawn(run_writer(
        std::sync::Arc::clone(&session),
        transport,
        config.yield_threshold_bytes,
    ));
    (session, frames, closes)
}

/// A non-critical, non-coalescable (unless `kind` says otherwise) message
/// with a sequence marker for order assertions.
pub(crate) fn custom_message(kind: &str, seq: u32) -> Arc<OutboundMessage> {
    Arc::new(OutboundMessage::from_value(json!({
        "type": kind,
        "seq": seq,
    })))
}

/// A `page_updated` message carrying the given page number.
pub(crate) fn page_updated_message(page: u32) -> Arc<OutboundMessage> {
    Arc::new(OutboundMessage::from_value(json!({
        "type": "page_updated",
        "data": {
            "current_page": page,
            "song_id": "42",
            "title": "T",
            "artist": "A",
            "total_pages": 9,
            "image_etag": format!("W/\"ab-{page}\""),
        },
    })))
}
