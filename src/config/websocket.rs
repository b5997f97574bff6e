//! WebSocket fabric configuration
//!
//! Tuning knobs for the real-time broadcast fabric: the listen port, the
//! per-connection outbound queue bound and drop policy, coalescing and batch
//! flush windows, and framing limits.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use super::error::ValidationError;

/// Behavior when a session's outbound queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    /// Remove the head of the queue, then enqueue the new payload.
    #[default]
    Oldest,
    /// Refuse the new payload, keep the queue as-is.
    Newest,
    /// Reserved; currently behaves like `Oldest`.
    Random,
}

/// WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Host address to bind the WebSocket listener to
    #[serde(default = "default_ws_host")]
    pub host: String,

    /// Port the WebSocket listener binds to
    #[serde(default = "default_ws_port")]
    pub port: u16,

    /// Header carrying the request correlation id
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,

    /// Per-session outbound queue bound
    #[serde(default = "default_send_queue_max")]
    pub send_queue_max: usize,

    /// Coalesce flush delay in milliseconds
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,

    /// Queue-full behavior
    #[serde(default)]
    pub drop_policy: DropPolicy,

    /// Outgoing frame fragment threshold in bytes
    #[serde(default = "default_auto_fragment_size")]
    pub auto_fragment_size: usize,

    /// Maximum inbound frame payload in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Writer yields to the scheduler after payloads of this size or larger
    #[serde(default = "default_yield_threshold_bytes")]
    pub yield_threshold_bytes: usize,

    /// Cumulative drops triggering a slow-client close (0 disables)
    #[serde(default)]
    pub slow_client_disconnect_after_drops: u64,

    /// Message kinds coalesced per-session within the coalesce window
    #[serde(default = "default_coalesce_types")]
    pub coalesce_types: Vec<String>,

    /// Cadence of the per-room batch flush in milliseconds
    #[serde(default = "default_batch_flush_interval_ms")]
    pub batch_flush_interval_ms: u64,
}

impl WebSocketConfig {
    /// Get the socket address the WebSocket listener binds to
    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .expect("Invalid socket address")
    }

    /// Coalesce window as a Duration
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    /// Batch flush interval as a Duration
    pub fn batch_flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_flush_interval_ms)
    }

    /// Coalesce kinds as a set for membership checks
    pub fn coalesce_set(&self) -> HashSet<String> {
        self.coalesce_types.iter().cloned().collect()
    }

    /// Validate WebSocket configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.send_queue_max == 0 {
            return Err(ValidationError::InvalidQueueBound);
        }
        if self.max_message_bytes < 1024 {
            return Err(ValidationError::MaxMessageTooSmall);
        }
        if self.auto_fragment_size > self.max_message_bytes {
            return Err(ValidationError::FragmentExceedsMaxMessage);
        }
        Ok(())
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: default_ws_host(),
            port: default_ws_port(),
            request_id_header: default_request_id_header(),
            send_queue_max: default_send_queue_max(),
            coalesce_window_ms: default_coalesce_window_ms(),
            drop_policy: DropPolicy::default(),
            auto_fragment_size: default_auto_fragment_size(),
            max_message_bytes: default_max_message_bytes(),
            yield_threshold_bytes: default_yield_threshold_bytes(),
            slow_client_disconnect_after_drops: 0,
            coalesce_types: default_coalesce_types(),
            batch_flush_interval_ms: default_batch_flush_interval_ms(),
        }
    }
}

fn default_ws_host() -> String {
    "0.0.0.0".to_string()
}

fn default_ws_port() -> u16 {
    8766
}

fn default_request_id_header() -> String {
    "X-Request-ID".to_string()
}

fn default_send_queue_max() -> usize {
    100
}

fn default_coalesce_window_ms() -> u64 {
    50
}

fn default_auto_fragment_size() -> usize {
    65536
}

fn default_max_message_bytes() -> usize {
    1_048_576
}

fn default_yield_threshold_bytes() -> usize {
    262_144
}

fn default_coalesce_types() -> Vec<String> {
    vec!["page_updated".to_string(), "song_updated".to_string()]
}

fn default_batch_flush_interval_ms() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_defaults() {
        let config = WebSocketConfig::default();
        assert_eq!(config.port, 8766);
        assert_eq!(config.request_id_header, "X-Request-ID");
        assert_eq!(config.send_queue_max, 100);
        assert_eq!(config.coalesce_window_ms, 50);
        assert_eq!(config.drop_policy, DropPolicy::Oldest);
        assert_eq!(config.auto_fragment_size, 65536);
        assert_eq!(config.max_message_bytes, 1_048_576);
        assert_eq!(config.yield_threshold_bytes, 262_144);
        assert_eq!(config.slow_client_disconnect_after_drops, 0);
        assert_eq!(config.batch_flush_interval_ms, 200);
    }

    #[test]
    fn test_default_coalesce_set() {
        let config = WebSocketConfig::default();
        let set = config.coalesce_set();
        assert!(set.contains("page_updated"));
        assert!(set.contains("song_updated"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_validation_zero_port() {
        let config = WebSocketConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_queue_bound() {
        let config = WebSocketConfig {
            send_queue_max: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidQueueBound)
        ));
    }

    #[test]
    fn test_validation_fragment_exceeds_max_message() {
        let config = WebSocketConfig {
            auto_fragment_size: 2 * 1_048_576,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::FragmentExceedsMaxMessage)
        ));
    }

    #[test]
    fn test_validation_passes_on_defaults() {
        assert!(WebSocketConfig::default().validate().is_ok());
    }

    #[test]
    fn test_drop_policy_deserializes_lowercase() {
        let policy: DropPolicy = serde_json::from_str(r#""newest""#).unwrap();
        assert_eq!(policy, DropPolicy::Newest);
        let policy: DropPolicy = serde_json::from_str(r#""random""#).unwrap();
        assert_eq!(policy, DropPolicy::Random);
    }
}
