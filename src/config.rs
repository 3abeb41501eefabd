//! # Call Configuration
//!
//! Runtime configuration for a call. Every field has a default so an embedding
//! application only sets what it needs:
//!
//! ```json
//! { "relay_url": "wss://relay.umbra.chat", "max_failure_retries": 5 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::media::MediaConstraints;
use crate::types::RoomId;

/// Default relay endpoint
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8000";

/// Default offer re-send interval while an answer is outstanding
pub const DEFAULT_OFFER_RETRY_INTERVAL_MS: u64 = 3000;

/// Default delay before re-offering after a transport failure
pub const DEFAULT_FAILURE_RETRY_DELAY_MS: u64 = 3000;

/// Default delay before reconnecting the relay channel
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 2000;

/// Default capacity of the `CallEvent` broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Call configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Base URL of the room relay (`ws://` or `wss://`)
    pub relay_url: String,

    /// STUN/TURN servers handed to every peer connection
    pub ice_servers: Vec<String>,

    /// Interval between offer re-sends while awaiting an answer
    pub offer_retry_interval_ms: u64,

    /// Delay before re-offering to a peer whose transport failed
    pub failure_retry_delay_ms: u64,

    /// Delay before reconnecting after an unexpected channel close
    pub reconnect_delay_ms: u64,

    /// Maximum failure retries per session (`None` = unbounded)
    pub max_failure_retries: Option<u32>,

    /// Capture constraints for the local stream
    pub media: MediaConstraints,

    /// Capacity of the call event broadcast channel
    pub event_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            offer_retry_interval_ms: DEFAULT_OFFER_RETRY_INTERVAL_MS,
            failure_retry_delay_ms: DEFAULT_FAILURE_RETRY_DELAY_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_failure_retries: None,
            media: MediaConstraints::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CallConfig {
    /// Parse a configuration from JSON, filling omitted fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Offer re-send interval
    pub fn offer_retry_interval(&self) -> Duration {
        Duration::from_millis(self.offer_retry_interval_ms)
    }

    /// Failure retry delay
    pub fn failure_retry_delay(&self) -> Duration {
        Duration::from_millis(self.failure_retry_delay_ms)
    }

    /// Channel reconnect delay
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Whether another failure retry is allowed after `attempts` retries
    pub fn allows_failure_retry(&self, attempts: u32) -> bool {
        self.max_failure_retries.map_or(true, |max| attempts < max)
    }

    /// WebSocket URL of a room on the relay
    pub fn room_url(&self, room: &RoomId) -> String {
        format!(
            "{}/ws/room/{}/",
            self.relay_url.trim_end_matches('/'),
            room.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CallConfig::default();
        assert_eq!(config.offer_retry_interval(), Duration::from_secs(3));
        assert_eq!(config.failure_retry_delay(), Duration::from_secs(3));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.max_failure_retries, None);
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.media.ideal_width, 1280);
        assert_eq!(config.media.ideal_height, 720);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            CallConfig::from_json(r#"{"relay_url":"wss://relay.example","max_failure_retries":2}"#)
                .unwrap();
        assert_eq!(config.relay_url, "wss://relay.example");
        assert_eq!(config.max_failure_retries, Some(2));
        assert_eq!(config.offer_retry_interval_ms, DEFAULT_OFFER_RETRY_INTERVAL_MS);
        assert!(config.media.echo_cancellation);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(CallConfig::from_json("{\"relay_url\": 5}").is_err());
    }

    #[test]
    fn test_failure_retry_bound() {
        let mut config = CallConfig::default();
        assert!(config.allows_failure_retry(1_000));

        config.max_failure_retries = Some(2);
        assert!(config.allows_failure_retry(0));
        assert!(config.allows_failure_retry(1));
        assert!(!config.allows_failure_retry(2));
    }

    #[test]
    fn test_room_url() {
        let config = CallConfig {
            relay_url: "wss://relay.example/".to_string(),
            ..CallConfig::default()
        };
        let room = RoomId::parse("42").unwrap();
        assert_eq!(config.room_url(&room), "wss://relay.example/ws/room/42/");
    }
}
