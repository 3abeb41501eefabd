//! # Media Transport Abstraction
//!
//! The ICE/DTLS engine is consumed through these traits so negotiation can be
//! driven by a real WebRTC stack or by the in-memory mocks in [`crate::mock`].
//!
//! A connection reports asynchronous happenings (gathered candidates,
//! connection-state changes, remote tracks) through the
//! [`TransportEventSender`] it was created with. Each sender is stamped with
//! the peer id and the epoch of the session that owns the connection, so
//! callbacks from a superseded connection are recognised and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::events::ManagerEvent;
use crate::media::LocalTrack;
use crate::types::{IceCandidate, ParticipantId, SessionDescription, TrackKind};

/// Signaling state of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingState {
    /// No offer/answer exchange in progress
    #[default]
    Stable,
    /// Local offer applied, waiting for the answer
    HaveLocalOffer,
    /// Remote offer applied, answer not yet applied
    HaveRemoteOffer,
    /// Connection closed
    Closed,
}

/// Aggregate ICE/DTLS connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    /// Just created
    New,
    /// Checking candidates
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity lost for good
    Failed,
    /// Closed locally
    Closed,
}

/// A media track received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Track id
    pub id: String,
    /// Audio or video
    pub kind: TrackKind,
    /// Stream the track belongs to
    pub stream_id: String,
}

/// Asynchronous report from a peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local candidate was gathered
    IceCandidate(IceCandidate),
    /// Connection state changed
    ConnectionState(PeerConnectionState),
    /// The remote side added a track
    Track(RemoteTrack),
}

/// Posts a connection's events into the negotiation event loop
#[derive(Debug, Clone)]
pub struct TransportEventSender {
    peer_id: ParticipantId,
    epoch: u64,
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl TransportEventSender {
    /// Create a sender for one session
    pub fn new(peer_id: ParticipantId, epoch: u64, tx: mpsc::UnboundedSender<ManagerEvent>) -> Self {
        Self { peer_id, epoch, tx }
    }

    /// Remote participant of the owning session
    pub fn peer_id(&self) -> &ParticipantId {
        &self.peer_id
    }

    /// Epoch of the owning session
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Report a gathered local candidate
    pub fn ice_candidate(&self, candidate: IceCandidate) {
        self.emit(TransportEvent::IceCandidate(candidate));
    }

    /// Report a connection state change
    pub fn connection_state(&self, state: PeerConnectionState) {
        self.emit(TransportEvent::ConnectionState(state));
    }

    /// Report a remote track
    pub fn track(&self, track: RemoteTrack) {
        self.emit(TransportEvent::Track(track));
    }

    fn emit(&self, event: TransportEvent) {
        // The loop only goes away on teardown; late reports are irrelevant then.
        let _ = self.tx.send(ManagerEvent::Transport {
            peer_id: self.peer_id.clone(),
            epoch: self.epoch,
            event,
        });
    }
}

/// One bidirectional media connection to a remote participant
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach a local track for sending
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    /// Swap the outgoing track of a kind without renegotiation
    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<()>;

    /// Generate an offer
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Generate an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply a remote description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply a remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Current signaling state
    fn signaling_state(&self) -> SignalingState;

    /// Close the connection and stop emitting events
    async fn close(&self);
}

/// Factory for peer connections
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Create a connection to `peer_id` that reports through `events`
    async fn create_connection(
        &self,
        peer_id: &ParticipantId,
        ice_servers: &[String],
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_stamps_peer_and_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = TransportEventSender::new(ParticipantId::from("b"), 7, tx);

        sender.ice_candidate(IceCandidate::new("c1"));
        sender.connection_state(PeerConnectionState::Connected);

        match rx.try_recv().unwrap() {
            ManagerEvent::Transport {
                peer_id,
                epoch,
                event,
            } => {
                assert_eq!(peer_id.as_str(), "b");
                assert_eq!(epoch, 7);
                assert_eq!(event, TransportEvent::IceCandidate(IceCandidate::new("c1")));
            }
            other => panic!("Unexpected: {:?}", other),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            ManagerEvent::Transport {
                event: TransportEvent::ConnectionState(PeerConnectionState::Connected),
                ..
            }
        ));
    }

    #[test]
    fn test_sender_survives_closed_loop() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sender = TransportEventSender::new(ParticipantId::from("b"), 1, tx);
        sender.connection_state(PeerConnectionState::Failed);
    }
}
