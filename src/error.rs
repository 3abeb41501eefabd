//! # Error Handling
//!
//! Error types for Umbra Call.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Room Errors (100-199)                 → user visible, terminal     │
//! │  │   ├── InvalidRoomId                                                 │
//! │  │   ├── RoomNotFound                                                  │
//! │  │   ├── JoinRoomFailed                                                │
//! │  │   └── RelayServerError                                              │
//! │  │                                                                      │
//! │  ├── Media Errors (200-299)                → fatal to media            │
//! │  │   ├── MediaPermissionDenied                                         │
//! │  │   ├── NoMediaDevice                                                 │
//! │  │   └── MediaAcquisitionFailed                                        │
//! │  │                                                                      │
//! │  ├── Signaling Errors (300-399)            → dropped and logged        │
//! │  │   ├── NotConnected                                                  │
//! │  │   ├── SendFailed                                                    │
//! │  │   └── MalformedMessage                                              │
//! │  │                                                                      │
//! │  ├── Channel Errors (400-499)              → reconnect scheduled       │
//! │  │   ├── ConnectionFailed                                              │
//! │  │   └── ChannelClosed                                                 │
//! │  │                                                                      │
//! │  ├── Negotiation Errors (500-599)          → retried per session       │
//! │  │   ├── Negotiation                                                   │
//! │  │   ├── TransportError                                                │
//! │  │   └── SessionNotFound                                               │
//! │  │                                                                      │
//! │  └── Internal Errors (900-999)                                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Negotiation errors never cross session boundaries: the manager logs them
//! against the owning peer and keeps every other session running. Only the
//! room and media categories ever reach the user.

use thiserror::Error;

use crate::types::ParticipantId;

/// Result type alias for Umbra Call operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Umbra Call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ========================================================================
    // Room Errors (100-199)
    // ========================================================================

    /// The room id cannot name a room
    #[error("Invalid room id: {0:?}")]
    InvalidRoomId(String),

    /// The relay rejected the room (close code 4004)
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// The membership service refused the join
    #[error("Failed to join room: {0}")]
    JoinRoomFailed(String),

    /// The relay closed the connection with a server error (close code 1011)
    #[error("Relay server error: {0}")]
    RelayServerError(String),

    // ========================================================================
    // Media Errors (200-299)
    // ========================================================================

    /// Camera/microphone permission was denied
    #[error("Camera and microphone access was denied.")]
    MediaPermissionDenied,

    /// No capture device is available
    #[error("No camera or microphone found.")]
    NoMediaDevice,

    /// Capture failed for another reason
    #[error("Could not access camera and microphone: {0}")]
    MediaAcquisitionFailed(String),

    /// Local media is not ready yet
    #[error("Local media is not ready.")]
    MediaNotReady,

    // ========================================================================
    // Signaling Errors (300-399)
    // ========================================================================

    /// The signaling channel is not open
    #[error("Signaling channel is not connected.")]
    NotConnected,

    /// The signaling channel refused the message
    #[error("Failed to send signaling message: {0}")]
    SendFailed(String),

    /// A relay message is missing required fields
    #[error("Malformed relay message: {0}")]
    MalformedMessage(String),

    // ========================================================================
    // Channel Errors (400-499)
    // ========================================================================

    /// Could not open the relay connection
    #[error("Failed to connect to relay: {0}")]
    ConnectionFailed(String),

    /// The relay connection closed unexpectedly
    #[error("Relay connection closed (code {code}): {reason}")]
    ChannelClosed {
        /// WebSocket close code
        code: u16,
        /// Close reason sent by the relay, if any
        reason: String,
    },

    // ========================================================================
    // Negotiation Errors (500-599)
    // ========================================================================

    /// An offer/answer step failed for one peer
    #[error("Negotiation with {peer} failed: {reason}")]
    Negotiation {
        /// Remote participant
        peer: ParticipantId,
        /// What went wrong
        reason: String,
    },

    /// The media transport reported an error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// No session exists for the participant
    #[error("No session for participant {0}")]
    SessionNotFound(ParticipantId),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Handling category of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Terminal room condition, shown to the user
    Room,
    /// Capture failed; this participant cannot send media
    FatalToMedia,
    /// Malformed, misaddressed or unsendable message
    TransientSignaling,
    /// Relay connection dropped; reconnect pending
    TransportDisconnection,
    /// Per-session negotiation failure; retried by policy
    TransientNegotiation,
    /// Bug or encoding failure
    Internal,
}

impl Error {
    /// Get the numeric error code
    ///
    /// - 100-199: Room
    /// - 200-299: Media
    /// - 300-399: Signaling
    /// - 400-499: Channel
    /// - 500-599: Negotiation
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Room (100-199)
            Error::InvalidRoomId(_) => 100,
            Error::RoomNotFound(_) => 101,
            Error::JoinRoomFailed(_) => 102,
            Error::RelayServerError(_) => 103,

            // Media (200-299)
            Error::MediaPermissionDenied => 200,
            Error::NoMediaDevice => 201,
            Error::MediaAcquisitionFailed(_) => 202,
            Error::MediaNotReady => 203,

            // Signaling (300-399)
            Error::NotConnected => 300,
            Error::SendFailed(_) => 301,
            Error::MalformedMessage(_) => 302,

            // Channel (400-499)
            Error::ConnectionFailed(_) => 400,
            Error::ChannelClosed { .. } => 401,

            // Negotiation (500-599)
            Error::Negotiation { .. } => 500,
            Error::TransportError(_) => 501,
            Error::SessionNotFound(_) => 502,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Get the handling category
    pub fn category(&self) -> ErrorCategory {
        match self.code() {
            100..=199 => ErrorCategory::Room,
            200..=299 => ErrorCategory::FatalToMedia,
            300..=399 => ErrorCategory::TransientSignaling,
            400..=499 => ErrorCategory::TransportDisconnection,
            500..=599 => ErrorCategory::TransientNegotiation,
            _ => ErrorCategory::Internal,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors are resolved by the retry timers or the channel
    /// reconnect without user involvement.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientSignaling
                | ErrorCategory::TransportDisconnection
                | ErrorCategory::TransientNegotiation
        )
    }

    /// Check if this error must be shown to the user
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Room | ErrorCategory::FatalToMedia
        ) && !matches!(self, Error::MediaNotReady)
    }

    /// Build a negotiation error for a peer
    pub fn negotiation(peer: &ParticipantId, reason: impl ToString) -> Self {
        Error::Negotiation {
            peer: peer.clone(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::DeserializationError(err.to_string())
        } else {
            Error::SerializationError(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::ConnectionFailed(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_unique() {
        let errors = vec![
            Error::InvalidRoomId(String::new()),
            Error::RoomNotFound(String::new()),
            Error::JoinRoomFailed(String::new()),
            Error::RelayServerError(String::new()),
            Error::MediaPermissionDenied,
            Error::NoMediaDevice,
            Error::MediaAcquisitionFailed(String::new()),
            Error::MediaNotReady,
            Error::NotConnected,
            Error::SendFailed(String::new()),
            Error::MalformedMessage(String::new()),
            Error::ConnectionFailed(String::new()),
            Error::ChannelClosed {
                code: 1006,
                reason: String::new(),
            },
            Error::negotiation(&ParticipantId::from("peer"), "boom"),
            Error::TransportError(String::new()),
            Error::SessionNotFound(ParticipantId::from("peer")),
            Error::Internal(String::new()),
            Error::SerializationError(String::new()),
            Error::DeserializationError(String::new()),
        ];

        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total, "Duplicate error codes found");
    }

    #[test]
    fn test_media_errors_are_fatal_and_user_visible() {
        for err in [
            Error::MediaPermissionDenied,
            Error::NoMediaDevice,
            Error::MediaAcquisitionFailed("busy".into()),
        ] {
            assert_eq!(err.category(), ErrorCategory::FatalToMedia);
            assert!(!err.is_recoverable());
            assert!(err.requires_user_action());
        }
    }

    #[test]
    fn test_signaling_errors_are_transient() {
        let err = Error::NotConnected;
        assert_eq!(err.category(), ErrorCategory::TransientSignaling);
        assert!(err.is_recoverable());
        assert!(!err.requires_user_action());
    }

    #[test]
    fn test_negotiation_error_names_peer() {
        let err = Error::negotiation(&ParticipantId::from("bob"), "no answer");
        assert_eq!(err.category(), ErrorCategory::TransientNegotiation);
        assert!(err.to_string().contains("bob"));
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::DeserializationError(_)));
    }
}
