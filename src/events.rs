//! # Call Events
//!
//! Inputs of the negotiation event loop and the notifications it publishes.
//!
//! ```text
//! ┌────────────────┐
//! │ SignalingChannel│──ChannelEvent──┐
//! └────────────────┘                 │
//! ┌────────────────┐                 ▼
//! │ MediaDevices   │──Media───► ManagerEvent ──► PeerSessionManager ──► CallEvent
//! └────────────────┘                 ▲                                   (broadcast)
//! ┌────────────────┐                 │
//! │ PeerConnection │──Transport──────┤
//! │ Scheduler      │──Timer──────────┤
//! │ CallHandle     │──Command────────┘
//! └────────────────┘
//! ```

use crate::error::Result;
use crate::media::{LocalStream, LocalTrack};
use crate::signaling::{ChannelEvent, ChannelStatus};
use crate::timer::TimerEvent;
use crate::transport::{RemoteTrack, TransportEvent};
use crate::types::{ParticipantId, TrackKind};

/// Everything the event loop reacts to
#[derive(Debug)]
pub enum ManagerEvent {
    /// Relay channel status or inbound message
    Channel(ChannelEvent),

    /// Result of local media acquisition
    Media(Result<LocalStream>),

    /// Report from a session's peer connection
    Transport {
        /// Session owner
        peer_id: ParticipantId,
        /// Session epoch the connection belongs to
        epoch: u64,
        /// What happened
        event: TransportEvent,
    },

    /// Retry timer fired
    Timer(TimerEvent),

    /// Application command
    Command(CallCommand),
}

/// Commands accepted from the application
#[derive(Debug, Clone)]
pub enum CallCommand {
    /// Mute/unmute a local track
    ToggleTrack(TrackKind),
    /// Send a screen track instead of the camera
    ShareScreen(LocalTrack),
    /// Send the camera again
    StopScreenShare,
    /// Send a chat message to the room
    SendChat {
        /// Message text
        message: String,
        /// Our display name
        username: String,
    },
    /// Leave the room and tear everything down
    Leave,
}

/// Notifications published to the application
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// Relay channel status changed
    ChannelStatus(ChannelStatus),

    /// The relay assigned our participant id
    Joined {
        /// Our id
        local_id: ParticipantId,
        /// Participants in the room, including us
        participant_count: usize,
    },

    /// Room size changed
    ParticipantCount(usize),

    /// Local media is ready
    MediaReady,

    /// Local media could not be acquired; nothing will be sent
    MediaUnavailable {
        /// Error code
        code: i32,
        /// User-facing message
        message: String,
    },

    /// Local track toggled
    TrackToggled {
        /// Which track
        kind: TrackKind,
        /// New state
        enabled: bool,
    },

    /// Media connection to a peer is up
    PeerConnected(ParticipantId),

    /// Media connection to a peer failed
    PeerFailed {
        /// The peer
        peer_id: ParticipantId,
        /// Whether a retry is scheduled
        retry_scheduled: bool,
    },

    /// A peer's session was removed
    PeerRemoved(ParticipantId),

    /// A peer started sending a track
    RemoteTrack {
        /// The peer
        peer_id: ParticipantId,
        /// The track
        track: RemoteTrack,
    },

    /// Chat message from the room
    ChatMessage {
        /// Sender display name
        username: Option<String>,
        /// Message text
        message: String,
        /// Receive time (Unix ms)
        received_at: i64,
    },

    /// The membership service refused the join
    JoinRoomFailed {
        /// Error message
        message: String,
    },

    /// The relay closed the room for good
    RoomUnavailable {
        /// Error code
        code: i32,
        /// User-facing message
        message: String,
    },
}
