//! # Relay Wire Protocol
//!
//! JSON messages exchanged with the room relay over the WebSocket.
//!
//! ```text
//! Client                                   Relay
//!   │                                        │
//!   │ ◄── connection_established ─────────── │  userId, existing_users
//!   │ ◄── user_joined / user_left ────────── │  membership changes
//!   │                                        │
//!   │ ── offer {targetUserId} ─────────────► │
//!   │                                        │ ── offer {userId} ──► peer
//!   │ ◄── answer {userId, targetUserId} ──── │
//!   │ ── ice_candidate {targetUserId} ─────► │
//! ```
//!
//! The relay stamps the sender (`userId`) on every forwarded signal. Inbound
//! messages are converted into typed [`Inbound`] values before dispatch; a
//! message missing its sender never reaches the manager.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{IceCandidate, ParticipantId, SessionDescription};

// ============================================================================
// SERVER → CLIENT
// ============================================================================

/// Messages sent by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the socket opens; assigns our id
    ConnectionEstablished {
        /// Our participant id for this connection
        #[serde(rename = "userId", default)]
        user_id: Option<ParticipantId>,
        /// Participants in the room, including us
        #[serde(default)]
        participant_count: usize,
        /// Participants already present
        #[serde(default)]
        existing_users: Vec<ParticipantId>,
        /// Room the relay placed us in
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// Participant count changed
    ParticipantUpdate {
        /// New count
        participant_count: usize,
    },

    /// Another participant entered the room
    UserJoined {
        /// The newcomer
        #[serde(rename = "userId", default)]
        user_id: Option<ParticipantId>,
        /// Display name, if the relay knows it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        /// New count, if included
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_count: Option<usize>,
    },

    /// A participant left the room
    UserLeft {
        /// The departed participant
        #[serde(rename = "userId", default)]
        user_id: Option<ParticipantId>,
    },

    /// Forwarded SDP offer
    Offer {
        /// The offer
        offer: SessionDescription,
        /// Sender
        #[serde(rename = "userId", default)]
        user_id: Option<ParticipantId>,
        /// Intended recipient
        #[serde(
            rename = "targetUserId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        target_user_id: Option<ParticipantId>,
    },

    /// Forwarded SDP answer
    Answer {
        /// The answer
        answer: SessionDescription,
        /// Sender
        #[serde(rename = "userId", default)]
        user_id: Option<ParticipantId>,
        /// Intended recipient
        #[serde(
            rename = "targetUserId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        target_user_id: Option<ParticipantId>,
    },

    /// Forwarded ICE candidate
    IceCandidate {
        /// The candidate
        candidate: IceCandidate,
        /// Sender
        #[serde(rename = "userId", default)]
        user_id: Option<ParticipantId>,
        /// Intended recipient
        #[serde(
            rename = "targetUserId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        target_user_id: Option<ParticipantId>,
    },

    /// Room chat message
    ChatMessage {
        /// Message text
        message: String,
        /// Sender display name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
}

// ============================================================================
// CLIENT → SERVER
// ============================================================================

/// Messages sent to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// SDP offer for one peer
    Offer {
        /// The offer
        offer: SessionDescription,
        /// Recipient
        #[serde(rename = "targetUserId")]
        target_user_id: ParticipantId,
    },

    /// SDP answer for one peer
    Answer {
        /// The answer
        answer: SessionDescription,
        /// Recipient
        #[serde(rename = "targetUserId")]
        target_user_id: ParticipantId,
    },

    /// ICE candidate for one peer
    IceCandidate {
        /// The candidate
        candidate: IceCandidate,
        /// Recipient
        #[serde(rename = "targetUserId")]
        target_user_id: ParticipantId,
    },

    /// Chat message for the whole room
    ChatMessage {
        /// Message text
        message: String,
        /// Our display name
        username: String,
    },
}

impl ClientMessage {
    /// Recipient of a signaling message (`None` for room broadcasts)
    pub fn target(&self) -> Option<&ParticipantId> {
        match self {
            ClientMessage::Offer { target_user_id, .. }
            | ClientMessage::Answer { target_user_id, .. }
            | ClientMessage::IceCandidate { target_user_id, .. } => Some(target_user_id),
            ClientMessage::ChatMessage { .. } => None,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice_candidate",
            ClientMessage::ChatMessage { .. } => "chat_message",
        }
    }

    /// The message as the relay forwards it, stamped with its sender
    pub fn into_forwarded(self, sender: &ParticipantId) -> ServerMessage {
        let user_id = Some(sender.clone());
        match self {
            ClientMessage::Offer {
                offer,
                target_user_id,
            } => ServerMessage::Offer {
                offer,
                user_id,
                target_user_id: Some(target_user_id),
            },
            ClientMessage::Answer {
                answer,
                target_user_id,
            } => ServerMessage::Answer {
                answer,
                user_id,
                target_user_id: Some(target_user_id),
            },
            ClientMessage::IceCandidate {
                candidate,
                target_user_id,
            } => ServerMessage::IceCandidate {
                candidate,
                user_id,
                target_user_id: Some(target_user_id),
            },
            ClientMessage::ChatMessage { message, username } => ServerMessage::ChatMessage {
                message,
                username: Some(username),
            },
        }
    }
}

// ============================================================================
// TYPED INBOUND EVENTS
// ============================================================================

/// Room membership change
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// The relay accepted us and assigned an id
    ConnectionEstablished {
        /// Our id for this connection
        local_id: ParticipantId,
        /// Participants in the room, including us
        participant_count: usize,
        /// Participants already present
        existing: Vec<ParticipantId>,
    },
    /// A participant entered
    ParticipantJoined {
        /// The newcomer
        peer_id: ParticipantId,
        /// New count, if known
        participant_count: Option<usize>,
    },
    /// A participant left
    ParticipantLeft {
        /// The departed participant
        peer_id: ParticipantId,
    },
    /// Participant count changed
    ParticipantCountChanged {
        /// New count
        participant_count: usize,
    },
}

/// Payload of a routed signaling message
#[derive(Debug, Clone, PartialEq)]
pub enum SignalPayload {
    /// Remote offer
    Offer(SessionDescription),
    /// Remote answer
    Answer(SessionDescription),
    /// Remote ICE candidate
    IceCandidate(IceCandidate),
}

/// A signaling message routed by the relay from one participant to another
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    /// Who sent it
    pub sender: ParticipantId,
    /// Who it is for (`None` when the relay omits it)
    pub target: Option<ParticipantId>,
    /// The payload
    pub payload: SignalPayload,
}

/// A validated relay message
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Membership change
    Room(RoomEvent),
    /// Offer, answer or candidate
    Signal(SignalMessage),
    /// Chat message
    Chat {
        /// Message text
        message: String,
        /// Sender display name
        username: Option<String>,
    },
}

fn require_sender(user_id: Option<ParticipantId>, kind: &str) -> Result<ParticipantId> {
    user_id.ok_or_else(|| Error::MalformedMessage(format!("{} without userId", kind)))
}

impl ServerMessage {
    /// Validate and convert into a typed event
    pub fn into_inbound(self) -> Result<Inbound> {
        let inbound = match self {
            ServerMessage::ConnectionEstablished {
                user_id,
                participant_count,
                existing_users,
                ..
            } => Inbound::Room(RoomEvent::ConnectionEstablished {
                local_id: require_sender(user_id, "connection_established")?,
                participant_count,
                existing: existing_users,
            }),
            ServerMessage::ParticipantUpdate { participant_count } => {
                Inbound::Room(RoomEvent::ParticipantCountChanged { participant_count })
            }
            ServerMessage::UserJoined {
                user_id,
                participant_count,
                ..
            } => Inbound::Room(RoomEvent::ParticipantJoined {
                peer_id: require_sender(user_id, "user_joined")?,
                participant_count,
            }),
            ServerMessage::UserLeft { user_id } => Inbound::Room(RoomEvent::ParticipantLeft {
                peer_id: require_sender(user_id, "user_left")?,
            }),
            ServerMessage::Offer {
                offer,
                user_id,
                target_user_id,
            } => Inbound::Signal(SignalMessage {
                sender: require_sender(user_id, "offer")?,
                target: target_user_id,
                payload: SignalPayload::Offer(offer),
            }),
            ServerMessage::Answer {
                answer,
                user_id,
                target_user_id,
            } => Inbound::Signal(SignalMessage {
                sender: require_sender(user_id, "answer")?,
                target: target_user_id,
                payload: SignalPayload::Answer(answer),
            }),
            ServerMessage::IceCandidate {
                candidate,
                user_id,
                target_user_id,
            } => Inbound::Signal(SignalMessage {
                sender: require_sender(user_id, "ice_candidate")?,
                target: target_user_id,
                payload: SignalPayload::IceCandidate(candidate),
            }),
            ServerMessage::ChatMessage { message, username } => {
                Inbound::Chat { message, username }
            }
        };
        Ok(inbound)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_established_parse() {
        let json = r#"{
            "type": "connection_established",
            "message": "Connected to room 42",
            "userId": "7f0c",
            "room_id": "42",
            "participant_count": 3,
            "existing_users": ["0a1b", "c3d4"]
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg.into_inbound().unwrap() {
            Inbound::Room(RoomEvent::ConnectionEstablished {
                local_id,
                participant_count,
                existing,
            }) => {
                assert_eq!(local_id.as_str(), "7f0c");
                assert_eq!(participant_count, 3);
                assert_eq!(existing.len(), 2);
            }
            other => panic!("Unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_user_joined_without_count() {
        let json = r#"{"type":"user_joined","userId":"b","username":"Bob"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg.into_inbound().unwrap(),
            Inbound::Room(RoomEvent::ParticipantJoined {
                peer_id: ParticipantId::from("b"),
                participant_count: None,
            })
        );
    }

    #[test]
    fn test_offer_parse() {
        let json = r#"{
            "type": "offer",
            "offer": {"type": "offer", "sdp": "v=0"},
            "userId": "a",
            "targetUserId": "b"
        }"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg.into_inbound().unwrap() {
            Inbound::Signal(signal) => {
                assert_eq!(signal.sender.as_str(), "a");
                assert_eq!(signal.target, Some(ParticipantId::from("b")));
                assert_eq!(
                    signal.payload,
                    SignalPayload::Offer(SessionDescription::offer("v=0"))
                );
            }
            other => panic!("Unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_signal_without_sender_is_malformed() {
        let json = r#"{"type":"ice_candidate","candidate":{"candidate":"c"}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let err = msg.into_inbound().unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        let json = r#"{"type":"room_deleted"}"#;
        assert!(serde_json::from_str::<ServerMessage>(json).is_err());
    }

    #[test]
    fn test_client_offer_serialize() {
        let msg = ClientMessage::Offer {
            offer: SessionDescription::offer("v=0"),
            target_user_id: ParticipantId::from("b"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["targetUserId"], "b");
        assert_eq!(json["offer"]["type"], "offer");
        assert_eq!(json["offer"]["sdp"], "v=0");
    }

    #[test]
    fn test_client_candidate_serialize() {
        let msg = ClientMessage::IceCandidate {
            candidate: IceCandidate {
                candidate: "candidate:1".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            },
            target_user_id: ParticipantId::from("b"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ice_candidate");
        assert_eq!(json["candidate"]["sdpMid"], "0");
        assert_eq!(json["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_forwarding_stamps_sender() {
        let msg = ClientMessage::Answer {
            answer: SessionDescription::answer("v=0"),
            target_user_id: ParticipantId::from("a"),
        };
        assert_eq!(msg.kind(), "answer");
        assert_eq!(msg.target(), Some(&ParticipantId::from("a")));

        match msg.into_forwarded(&ParticipantId::from("b")) {
            ServerMessage::Answer {
                user_id,
                target_user_id,
                ..
            } => {
                assert_eq!(user_id, Some(ParticipantId::from("b")));
                assert_eq!(target_user_id, Some(ParticipantId::from("a")));
            }
            other => panic!("Unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_chat_round_trip_shape() {
        let msg = ClientMessage::ChatMessage {
            message: "hi".into(),
            username: "Ann".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let server: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(
            server.into_inbound().unwrap(),
            Inbound::Chat {
                message: "hi".into(),
                username: Some("Ann".into()),
            }
        );
    }
}
