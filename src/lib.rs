//! # Umbra Call
//!
//! Mesh group calls: every participant holds one WebRTC connection to every
//! other participant, negotiated over a room relay.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          UMBRA CALL MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐   ┌─────────────┐   ┌──────────────┐                   │
//! │  │  Signaling  │   │    Media    │   │  Directory   │                   │
//! │  │             │   │             │   │              │                   │
//! │  │ - WebSocket │   │ - Capture   │   │ - Membership │                   │
//! │  │ - Reconnect │   │ - Toggle    │   │   join       │                   │
//! │  │ - Protocol  │   │ - Screen    │   │              │                   │
//! │  └──────┬──────┘   └──────┬──────┘   └──────┬───────┘                   │
//! │         │                 │                 │                           │
//! │         └────────┬────────┴─────────────────┘                           │
//! │                  ▼                                                      │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      Event Loop / Manager                        │  │
//! │  │                                                                  │  │
//! │  │  PeerSessionManager ── sessions[peer] ── PeerSession             │  │
//! │  │         │                                     │                  │  │
//! │  │  PendingWorkQueue                       PeerConnection           │  │
//! │  │  (until media ready)                    (platform transport)     │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types and their categories
//! - [`config`] - Call configuration
//! - [`types`] - Participant ids, room ids, descriptions, candidates
//! - [`protocol`] - Relay wire messages and their typed forms
//! - [`signaling`] - Relay WebSocket channel
//! - [`media`] - Local capture and track control
//! - [`transport`] - Peer connection capability
//! - [`session`] - Per-peer negotiation state machine
//! - [`pending`] - Work deferred until media is ready
//! - [`manager`] - Session registry and event dispatch
//! - [`event_loop`] - The loop that drives the manager
//! - [`client`] - Application handle
//! - [`mock`] - In-memory capabilities for tests and simulation
//!
//! ## Negotiation Rules
//!
//! - The newcomer offers to everyone already in the room.
//! - When two offers cross, the participant with the lower id keeps its own.
//! - Nothing is negotiated before local media is ready; the work is parked
//!   and replayed once.
//! - Candidates are buffered in both directions until the remote description
//!   is applied.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod event_loop;
pub mod events;
pub mod manager;
pub mod media;
pub mod mock;
pub mod pending;
pub mod protocol;
pub mod session;
pub mod signaling;
/// Wall-clock helpers.
pub mod time;
pub mod timer;
pub mod transport;
pub mod types;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use client::{CallBackends, CallHandle};
pub use config::CallConfig;
pub use error::{Error, ErrorCategory, Result};
pub use events::{CallCommand, CallEvent, ManagerEvent};
pub use manager::PeerSessionManager;
pub use media::{LocalStream, LocalTrack, MediaConstraints, MediaDevices};
pub use session::{NegotiationState, PeerSession, Role};
pub use signaling::{ChannelStatus, SignalSink, SignalingChannel};
pub use transport::{PeerConnection, PeerConnectionFactory, PeerConnectionState};
pub use types::{IceCandidate, ParticipantId, RoomId, SessionDescription, TrackKind};

/// Returns the library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
