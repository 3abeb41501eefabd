//! Mock implementations for testing and simulation
//!
//! In-memory stand-ins for every capability the call core needs: the relay,
//! peer connections, capture devices and the membership service. They keep
//! enough state to assert on and behave like their browser counterparts where
//! negotiation depends on it (signaling states, candidate ordering).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::directory::RoomDirectory;
use crate::error::{Error, Result};
use crate::events::ManagerEvent;
use crate::media::{LocalStream, LocalTrack, MediaConstraints, MediaDevices};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::signaling::{ChannelEvent, SignalSink};
use crate::transport::{
    PeerConnection, PeerConnectionFactory, PeerConnectionState, RemoteTrack, SignalingState,
    TransportEventSender,
};
use crate::types::{IceCandidate, ParticipantId, RoomId, SdpType, SessionDescription, TrackKind};

static NEXT_SDP: AtomicUsize = AtomicUsize::new(1);

/// Microphone plus camera stream with track ids `mic` and `cam`
pub fn mock_stream() -> LocalStream {
    LocalStream::new(
        "local",
        vec![
            LocalTrack::new("mic", TrackKind::Audio, "Mock microphone"),
            LocalTrack::new("cam", TrackKind::Video, "Mock camera"),
        ],
    )
}

// ============================================================================
// SIGNAL SINK
// ============================================================================

/// Records every outgoing message
pub struct MockSignalSink {
    sent: Mutex<Vec<ClientMessage>>,
    open: AtomicBool,
    closed: AtomicBool,
}

impl MockSignalSink {
    /// Open sink
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate the channel going down or coming back
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }

    /// Take and clear the sent log
    pub fn take_sent(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Offers sent to `peer`
    pub fn offers_to(&self, peer: &ParticipantId) -> usize {
        self.offers_sdp_to(peer).len()
    }

    /// SDP of every offer sent to `peer`, oldest first
    pub fn offers_sdp_to(&self, peer: &ParticipantId) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|m| match m {
                ClientMessage::Offer {
                    offer,
                    target_user_id,
                } if target_user_id == peer => Some(offer.sdp.clone()),
                _ => None,
            })
            .collect()
    }

    /// Answers sent to `peer`
    pub fn answers_to(&self, peer: &ParticipantId) -> usize {
        self.count_to(peer, "answer")
    }

    /// Candidates sent to `peer`
    pub fn candidates_to(&self, peer: &ParticipantId) -> usize {
        self.count_to(peer, "ice_candidate")
    }

    fn count_to(&self, peer: &ParticipantId, kind: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.kind() == kind && m.target() == Some(peer))
            .count()
    }
}

impl Default for MockSignalSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalSink for MockSignalSink {
    fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) || self.is_closed() {
            return Err(Error::NotConnected);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// PEER CONNECTION
// ============================================================================

/// How mock connections react on their own
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBehavior {
    /// Local candidates gathered after the first local description
    pub candidates_per_description: usize,
    /// Report `Connected` once both descriptions are applied and stable
    pub auto_connect: bool,
}

#[derive(Default)]
struct ConnectionState {
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    senders: Vec<(TrackKind, String)>,
    gathered: bool,
    connected: bool,
    closed: bool,
}

/// Peer connection with a browser-like signaling state machine
pub struct MockPeerConnection {
    peer_id: ParticipantId,
    events: TransportEventSender,
    behavior: MockBehavior,
    state: Mutex<ConnectionState>,
}

impl MockPeerConnection {
    /// Connection that never reports on its own
    pub fn new(peer_id: ParticipantId, events: TransportEventSender) -> Self {
        Self::with_behavior(peer_id, events, MockBehavior::default())
    }

    /// Connection with the given behavior
    pub fn with_behavior(
        peer_id: ParticipantId,
        events: TransportEventSender,
        behavior: MockBehavior,
    ) -> Self {
        Self {
            peer_id,
            events,
            behavior,
            state: Mutex::new(ConnectionState::default()),
        }
    }

    /// Epoch of the session this connection reports to
    pub fn epoch(&self) -> u64 {
        self.events.epoch()
    }

    /// Remote candidates applied, in order
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().applied.clone()
    }

    /// Last applied local description
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    /// Last applied remote description
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    /// Ids of the tracks being sent, in attach order
    pub fn sender_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .senders
            .iter()
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Report a connection state, as the transport would
    pub fn emit_state(&self, state: PeerConnectionState) {
        self.events.connection_state(state);
    }

    /// Report a gathered local candidate
    pub fn emit_candidate(&self, candidate: IceCandidate) {
        self.events.ice_candidate(candidate);
    }

    /// Report an incoming remote track
    pub fn emit_track(&self, kind: TrackKind) {
        self.events.track(RemoteTrack {
            id: format!("{}-{}", self.peer_id, kind),
            kind,
            stream_id: format!("{}-stream", self.peer_id),
        });
    }

    fn after_description(&self, local: bool) {
        let (gather, connect) = {
            let mut state = self.state.lock();
            let gather = local && !state.gathered;
            if gather {
                state.gathered = true;
            }
            let connect = self.behavior.auto_connect
                && !state.connected
                && state.signaling == SignalingState::Stable
                && state.local.is_some()
                && state.remote.is_some();
            if connect {
                state.connected = true;
            }
            (gather, connect)
        };

        if gather {
            for n in 0..self.behavior.candidates_per_description {
                let mut candidate = IceCandidate::new(format!(
                    "candidate:{} 1 udp 2122260223 192.0.2.1 {} typ host",
                    n,
                    50000 + n
                ));
                candidate.sdp_mid = Some("0".into());
                candidate.sdp_m_line_index = Some(0);
                self.events.ice_candidate(candidate);
            }
        }
        if connect {
            self.events.connection_state(PeerConnectionState::Connecting);
            self.events.connection_state(PeerConnectionState::Connected);
        }
    }

    fn refuse(&self, reason: &str) -> Error {
        Error::negotiation(&self.peer_id, reason)
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.state
            .lock()
            .senders
            .push((track.kind(), track.id().to_string()));
        Ok(())
    }

    async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<()> {
        let mut state = self.state.lock();
        let sender = state
            .senders
            .iter_mut()
            .find(|(k, _)| *k == kind)
            .ok_or_else(|| Error::TransportError(format!("no {} sender", kind)))?;
        sender.1 = track.id().to_string();
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        if self.is_closed() {
            return Err(self.refuse("connection closed"));
        }
        let n = NEXT_SDP.fetch_add(1, Ordering::Relaxed);
        Ok(SessionDescription::offer(format!("v=0 offer {} #{}", self.peer_id, n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.state.lock().signaling != SignalingState::HaveRemoteOffer {
            return Err(self.refuse("no remote offer to answer"));
        }
        let n = NEXT_SDP.fetch_add(1, Ordering::Relaxed);
        Ok(SessionDescription::answer(format!("v=0 answer {} #{}", self.peer_id, n)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.signaling = match (desc.sdp_type, state.signaling) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                    SignalingState::HaveLocalOffer
                }
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (_, current) => {
                    return Err(self.refuse(&format!("local description in {:?}", current)));
                }
            };
            state.local = Some(desc);
        }
        self.after_description(true);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.signaling = match (desc.sdp_type, state.signaling) {
                (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
                (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                (_, current) => {
                    return Err(self.refuse(&format!("remote description in {:?}", current)));
                }
            };
            state.remote = Some(desc);
        }
        self.after_description(false);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(Error::TransportError(
                "candidate before remote description".into(),
            ));
        }
        state.applied.push(candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.signaling = SignalingState::Closed;
    }
}

/// Creates [`MockPeerConnection`]s and keeps them for inspection
pub struct MockConnectionFactory {
    behavior: MockBehavior,
    connections: Mutex<Vec<(ParticipantId, Arc<MockPeerConnection>)>>,
    fail_next: AtomicBool,
}

impl MockConnectionFactory {
    /// Factory for passive connections
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::default())
    }

    /// Factory whose connections use `behavior`
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            connections: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next `create_connection` fail
    pub fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Connections created so far
    pub fn created(&self) -> usize {
        self.connections.lock().len()
    }

    /// Most recent connection to `peer`
    pub fn latest(&self, peer: &ParticipantId) -> Option<Arc<MockPeerConnection>> {
        self.connections
            .lock()
            .iter()
            .rev()
            .find(|(id, _)| id == peer)
            .map(|(_, c)| c.clone())
    }
}

impl Default for MockConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockConnectionFactory {
    async fn create_connection(
        &self,
        peer_id: &ParticipantId,
        _ice_servers: &[String],
        events: TransportEventSender,
    ) -> Result<Arc<dyn PeerConnection>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::TransportError("connection refused".into()));
        }
        let connection = Arc::new(MockPeerConnection::with_behavior(
            peer_id.clone(),
            events,
            self.behavior,
        ));
        self.connections
            .lock()
            .push((peer_id.clone(), connection.clone()));
        Ok(connection)
    }
}

// ============================================================================
// MEDIA DEVICES
// ============================================================================

/// Capture devices that grant or deny, optionally after a delay
pub struct MockMediaDevices {
    denial: Option<Error>,
    delay: Option<Duration>,
    requests: AtomicUsize,
}

impl MockMediaDevices {
    /// Devices that hand out [`mock_stream`]
    pub fn granting() -> Self {
        Self {
            denial: None,
            delay: None,
            requests: AtomicUsize::new(0),
        }
    }

    /// Devices that always fail with `err`
    pub fn denying(err: Error) -> Self {
        Self {
            denial: Some(err),
            ..Self::granting()
        }
    }

    /// Answer only after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Capture requests received
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<LocalStream> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.denial {
            Some(err) => Err(err.clone()),
            None => Ok(mock_stream()),
        }
    }
}

// ============================================================================
// ROOM DIRECTORY
// ============================================================================

/// Membership service that records joins
pub struct MockRoomDirectory {
    joined: Mutex<Vec<RoomId>>,
    fail: bool,
}

impl MockRoomDirectory {
    /// Directory that accepts every join
    pub fn new() -> Self {
        Self {
            joined: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Directory that rejects every join
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Rooms joined so far
    pub fn joined(&self) -> Vec<RoomId> {
        self.joined.lock().clone()
    }
}

impl Default for MockRoomDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomDirectory for MockRoomDirectory {
    async fn join_room(&self, room: &RoomId) -> Result<()> {
        self.joined.lock().push(room.clone());
        if self.fail {
            return Err(Error::JoinRoomFailed("membership refused".into()));
        }
        Ok(())
    }
}

// ============================================================================
// RELAY
// ============================================================================

/// In-memory relay that routes messages between event loops
///
/// Behaves like the relay server: a newcomer gets the list of existing
/// participants, everyone else hears about the join, and targeted messages
/// reach only their target.
pub struct MockRelay {
    members: Mutex<Vec<(ParticipantId, mpsc::UnboundedSender<ManagerEvent>)>>,
}

impl MockRelay {
    /// Empty relay
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(Vec::new()),
        })
    }

    /// Admit `id`, whose event loop reads from `tx`
    pub fn join(
        self: &Arc<Self>,
        id: ParticipantId,
        tx: mpsc::UnboundedSender<ManagerEvent>,
    ) -> Arc<MockRelayLink> {
        let mut members = self.members.lock();
        let existing: Vec<ParticipantId> = members.iter().map(|(m, _)| m.clone()).collect();
        let participant_count = existing.len() + 1;

        deliver(
            &tx,
            ServerMessage::ConnectionEstablished {
                user_id: Some(id.clone()),
                participant_count,
                existing_users: existing,
                room_id: None,
            },
        );
        for (_, other) in members.iter() {
            deliver(
                other,
                ServerMessage::UserJoined {
                    user_id: Some(id.clone()),
                    username: None,
                    participant_count: Some(participant_count),
                },
            );
        }
        members.push((id.clone(), tx));

        Arc::new(MockRelayLink {
            relay: self.clone(),
            id,
            closed: AtomicBool::new(false),
        })
    }

    /// Remove `id` and tell everyone else
    pub fn leave(&self, id: &ParticipantId) {
        let mut members = self.members.lock();
        members.retain(|(m, _)| m != id);
        for (_, other) in members.iter() {
            deliver(
                other,
                ServerMessage::UserLeft {
                    user_id: Some(id.clone()),
                },
            );
        }
    }

    /// Participants currently admitted
    pub fn members(&self) -> Vec<ParticipantId> {
        self.members.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    fn route(&self, from: &ParticipantId, message: ClientMessage) {
        let target = message.target().cloned();
        let forwarded = message.into_forwarded(from);
        let members = self.members.lock();
        for (member, tx) in members.iter() {
            let wanted = match &target {
                Some(target) => member == target,
                None => member != from,
            };
            if wanted {
                deliver(tx, forwarded.clone());
            }
        }
    }
}

fn deliver(tx: &mpsc::UnboundedSender<ManagerEvent>, message: ServerMessage) {
    let _ = tx.send(ManagerEvent::Channel(ChannelEvent::Message(message)));
}

/// One participant's connection to a [`MockRelay`]
pub struct MockRelayLink {
    relay: Arc<MockRelay>,
    id: ParticipantId,
    closed: AtomicBool,
}

impl MockRelayLink {
    /// Participant this link belongs to
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }
}

#[async_trait]
impl SignalSink for MockRelayLink {
    fn send(&self, message: ClientMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.relay.route(&self.id, message);
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.relay.leave(&self.id);
        }
    }
}
