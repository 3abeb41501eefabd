//! # Peer Session Manager
//!
//! Owns every [`PeerSession`] of the call, keyed by remote participant id, and
//! turns room membership, routed signaling, media readiness, transport
//! reports and timer fires into negotiation steps.
//!
//! ## Dispatch
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        PeerSessionManager                            │
//! │                                                                      │
//! │  RoomEvent ─────────┐                                                │
//! │  SignalMessage ─────┤     media ready?                               │
//! │                     ├──────── no ──► PendingWorkQueue ──┐            │
//! │                     │                                   │ flush once │
//! │                     └──────── yes ─► sessions[peer] ◄───┘            │
//! │                                         │                            │
//! │  TransportEvent ── epoch matches? ──────┤                            │
//! │  TimerEvent ────── epoch matches? ──────┘                            │
//! │                                         │                            │
//! │                                         ▼                            │
//! │                               SignalSink / CallEvent                 │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events are handled one at a time to completion. A negotiation error in one
//! session is logged against its peer and never affects the others.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::CallConfig;
use crate::directory::RoomDirectory;
use crate::error::{Error, Result};
use crate::events::{CallCommand, CallEvent, ManagerEvent};
use crate::media::{LocalMediaSource, LocalStream, LocalTrack, MediaDevices};
use crate::pending::{DeferredIntent, PendingEntry, PendingWorkQueue};
use crate::protocol::{ClientMessage, Inbound, RoomEvent, ServerMessage, SignalMessage, SignalPayload};
use crate::session::{resolve_glare, GlareOutcome, HealthChange, PeerSession, Role, SessionContext};
use crate::signaling::{ChannelEvent, CloseDisposition, SignalSink};
use crate::timer::{Scheduler, TimerEvent, TimerKind};
use crate::transport::{PeerConnectionFactory, TransportEvent, TransportEventSender};
use crate::types::{IceCandidate, ParticipantId, RoomId, SessionDescription, TrackKind};

/// Registry and negotiation driver for all peer sessions of one call
pub struct PeerSessionManager {
    config: CallConfig,
    local_id: Option<ParticipantId>,
    participant_count: usize,
    sessions: HashMap<ParticipantId, PeerSession>,
    pending: PendingWorkQueue,
    media: LocalMediaSource,
    factory: Arc<dyn PeerConnectionFactory>,
    sink: Arc<dyn SignalSink>,
    directory: Option<(Arc<dyn RoomDirectory>, RoomId)>,
    scheduler: Scheduler,
    loop_tx: mpsc::UnboundedSender<ManagerEvent>,
    event_tx: broadcast::Sender<CallEvent>,
    next_epoch: u64,
    torn_down: bool,
}

impl PeerSessionManager {
    /// Create a manager
    ///
    /// `loop_tx` must feed the event loop that drives this manager; timers
    /// and connections report through it.
    pub fn new(
        config: CallConfig,
        factory: Arc<dyn PeerConnectionFactory>,
        sink: Arc<dyn SignalSink>,
        loop_tx: mpsc::UnboundedSender<ManagerEvent>,
        event_tx: broadcast::Sender<CallEvent>,
    ) -> Self {
        Self {
            config,
            local_id: None,
            participant_count: 0,
            sessions: HashMap::new(),
            pending: PendingWorkQueue::new(),
            media: LocalMediaSource::new(),
            factory,
            sink,
            directory: None,
            scheduler: Scheduler::new(loop_tx.clone()),
            loop_tx,
            event_tx,
            next_epoch: 0,
            torn_down: false,
        }
    }

    /// Join `room` on the membership service on every room entry
    pub fn with_directory(mut self, directory: Arc<dyn RoomDirectory>, room: RoomId) -> Self {
        self.directory = Some((directory, room));
        self
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Our relay-assigned id
    pub fn local_id(&self) -> Option<&ParticipantId> {
        self.local_id.as_ref()
    }

    /// Last known room size
    pub fn participant_count(&self) -> usize {
        self.participant_count
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session for a peer
    pub fn session(&self, peer_id: &ParticipantId) -> Option<&PeerSession> {
        self.sessions.get(peer_id)
    }

    /// Deferred work
    pub fn pending(&self) -> &PendingWorkQueue {
        &self.pending
    }

    /// Local media
    pub fn media(&self) -> &LocalMediaSource {
        &self.media
    }

    /// Whether [`teardown`](Self::teardown) ran
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // ========================================================================
    // EVENT DISPATCH
    // ========================================================================

    /// Handle one loop event; `false` once the call is over
    pub async fn handle_event(&mut self, event: ManagerEvent) -> bool {
        if self.torn_down {
            if let ManagerEvent::Media(Ok(stream)) = event {
                tracing::debug!("Capture finished after teardown; stopping it");
                self.media.mark_ready(stream);
            } else {
                tracing::debug!("Ignoring event after teardown");
            }
            return false;
        }

        match event {
            ManagerEvent::Channel(event) => self.on_channel_event(event).await,
            ManagerEvent::Media(Ok(stream)) => self.on_media_acquired(stream).await,
            ManagerEvent::Media(Err(e)) => self.on_media_failed(e),
            ManagerEvent::Transport {
                peer_id,
                epoch,
                event,
            } => self.on_transport_event(&peer_id, epoch, event),
            ManagerEvent::Timer(timer) => self.on_timer(timer).await,
            ManagerEvent::Command(CallCommand::Leave) => {
                self.teardown().await;
                return false;
            }
            ManagerEvent::Command(command) => self.on_command(command).await,
        }
        true
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Status(status) => self.emit(CallEvent::ChannelStatus(status)),
            ChannelEvent::Message(message) => self.on_server_message(message).await,
            ChannelEvent::Closed {
                code,
                reason,
                disposition,
            } => {
                let err = match disposition {
                    CloseDisposition::ServerError => Error::RelayServerError(reason),
                    CloseDisposition::RoomNotFound => Error::RoomNotFound(reason),
                    CloseDisposition::Reconnect => {
                        tracing::info!(
                            code,
                            sessions = self.sessions.len(),
                            "Relay dropped; keeping sessions until the next room entry"
                        );
                        return;
                    }
                    CloseDisposition::Normal | CloseDisposition::Intentional => return,
                };
                tracing::error!(
                    code,
                    category = ?err.category(),
                    error = %err,
                    "Room unavailable"
                );
                self.emit(CallEvent::RoomUnavailable {
                    code: err.code(),
                    message: err.to_string(),
                });
            }
        }
    }

    /// Validate and dispatch a relay message
    pub async fn on_server_message(&mut self, message: ServerMessage) {
        match message.into_inbound() {
            Ok(Inbound::Room(event)) => self.on_room_event(event).await,
            Ok(Inbound::Signal(signal)) => self.on_signaling_message(signal).await,
            Ok(Inbound::Chat { message, username }) => self.emit(CallEvent::ChatMessage {
                username,
                message,
                received_at: crate::time::now_timestamp_millis(),
            }),
            Err(e) => tracing::warn!(error = %e, "Dropping malformed relay message"),
        }
    }

    // ========================================================================
    // ROOM MEMBERSHIP
    // ========================================================================

    /// React to a membership change
    pub async fn on_room_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::ConnectionEstablished {
                local_id,
                participant_count,
                existing,
            } => {
                if self.local_id.as_ref().is_some_and(|prev| prev != &local_id) {
                    tracing::info!(
                        local_id = %local_id,
                        sessions = self.sessions.len(),
                        "Relay assigned a new id; restarting all sessions"
                    );
                    self.close_all_sessions().await;
                }
                self.local_id = Some(local_id.clone());
                self.participant_count = participant_count;
                tracing::info!(
                    local_id = %local_id,
                    participant_count,
                    existing = existing.len(),
                    "Joined room"
                );
                self.emit(CallEvent::Joined {
                    local_id: local_id.clone(),
                    participant_count,
                });
                self.join_directory();

                for peer_id in existing {
                    if peer_id != local_id {
                        self.initiate_session(peer_id).await;
                    }
                }
            }
            RoomEvent::ParticipantJoined {
                peer_id,
                participant_count,
            } => {
                if let Some(count) = participant_count {
                    self.set_participant_count(count);
                }
                if self.local_id.as_ref() == Some(&peer_id) {
                    return;
                }
                tracing::info!(peer = %peer_id, "Participant joined");
                self.initiate_session(peer_id).await;
            }
            RoomEvent::ParticipantLeft { peer_id } => {
                tracing::info!(peer = %peer_id, "Participant left");
                self.remove_peer(&peer_id).await;
            }
            RoomEvent::ParticipantCountChanged { participant_count } => {
                self.set_participant_count(participant_count);
            }
        }
    }

    fn set_participant_count(&mut self, count: usize) {
        if self.participant_count != count {
            self.participant_count = count;
            self.emit(CallEvent::ParticipantCount(count));
        }
    }

    fn join_directory(&self) {
        let Some((directory, room)) = self.directory.clone() else {
            return;
        };
        let events = self.event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = directory.join_room(&room).await {
                tracing::warn!(room = %room, error = %e, "Room membership join failed");
                let _ = events.send(CallEvent::JoinRoomFailed {
                    message: e.to_string(),
                });
            }
        });
    }

    async fn initiate_session(&mut self, peer_id: ParticipantId) {
        if self.sessions.contains_key(&peer_id) {
            tracing::debug!(peer = %peer_id, "Session already exists");
            return;
        }
        if !self.media.is_ready() {
            self.pending.defer(peer_id.clone(), DeferredIntent::InitiateOffer);
            tracing::debug!(peer = %peer_id, "Media not ready; offer deferred");
            return;
        }
        if self
            .create_session(
                peer_id.clone(),
                Role::Offerer,
                DeferredIntent::InitiateOffer,
                Vec::new(),
            )
            .await
            .is_ok()
        {
            self.start_offer(&peer_id).await;
        }
    }

    async fn remove_peer(&mut self, peer_id: &ParticipantId) {
        let parked = self.pending.remove(peer_id).is_some();
        let had_session = self.sessions.contains_key(peer_id);
        if had_session {
            self.close_session(peer_id).await;
        }
        if parked || had_session {
            self.emit(CallEvent::PeerRemoved(peer_id.clone()));
        }
    }

    // ========================================================================
    // SIGNALING
    // ========================================================================

    /// Dispatch an offer, answer or candidate from another participant
    pub async fn on_signaling_message(&mut self, message: SignalMessage) {
        let SignalMessage {
            sender,
            target,
            payload,
        } = message;

        if let Some(target) = &target {
            match &self.local_id {
                Some(local) if local == target => {}
                Some(_) => {
                    tracing::debug!(peer = %sender, addressed_to = %target, "Dropping signal for another participant");
                    return;
                }
                None => {
                    tracing::debug!(peer = %sender, "Dropping addressed signal before our id is known");
                    return;
                }
            }
        }
        if self.local_id.as_ref() == Some(&sender) {
            tracing::debug!("Dropping signal echoed from ourselves");
            return;
        }

        match payload {
            SignalPayload::Offer(offer) => self.on_remote_offer(sender, offer).await,
            SignalPayload::Answer(answer) => self.on_remote_answer(sender, answer).await,
            SignalPayload::IceCandidate(candidate) => {
                self.on_remote_candidate(sender, candidate).await
            }
        }
    }

    async fn on_remote_offer(&mut self, peer_id: ParticipantId, offer: SessionDescription) {
        if !self.media.is_ready() {
            self.pending
                .defer(peer_id.clone(), DeferredIntent::RespondToOffer(offer));
            tracing::debug!(peer = %peer_id, "Media not ready; offer parked");
            return;
        }
        self.respond_to_offer(peer_id, offer, Vec::new()).await;
    }

    async fn respond_to_offer(
        &mut self,
        peer_id: ParticipantId,
        offer: SessionDescription,
        early: Vec<IceCandidate>,
    ) {
        let mut carried = early;

        if let Some(outstanding) = self.sessions.get(&peer_id).map(|s| s.has_local_offer()) {
            if !outstanding {
                tracing::debug!(peer = %peer_id, "Renegotiation offer");
                self.answer_offer(&peer_id, offer).await;
                self.apply_remote_candidates(&peer_id, carried).await;
                return;
            }

            let outcome = match &self.local_id {
                Some(local) => resolve_glare(local, &peer_id),
                None => GlareOutcome::AcceptRemoteOffer,
            };
            match outcome {
                GlareOutcome::KeepLocalOffer => {
                    tracing::info!(peer = %peer_id, "Offer collision; keeping our offer");
                    self.apply_remote_candidates(&peer_id, carried).await;
                    return;
                }
                GlareOutcome::AcceptRemoteOffer => {
                    tracing::info!(peer = %peer_id, "Offer collision; answering theirs");
                    let mut leftover = self.close_session(&peer_id).await;
                    leftover.extend(carried);
                    carried = leftover;
                }
            }
        }

        let intent = DeferredIntent::RespondToOffer(offer.clone());
        if self
            .create_session(peer_id.clone(), Role::Answerer, intent, carried)
            .await
            .is_ok()
        {
            self.answer_offer(&peer_id, offer).await;
        }
    }

    async fn on_remote_answer(&mut self, peer_id: ParticipantId, answer: SessionDescription) {
        let Some((session, ctx)) = self.session_parts(&peer_id) else {
            tracing::warn!(peer = %peer_id, "Answer from a peer without a session");
            return;
        };
        match session.apply_answer(answer, &ctx).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(peer = %peer_id, "Ignoring stale answer"),
            Err(e) => tracing::warn!(peer = %peer_id, error = %e, "Applying answer failed"),
        }
    }

    async fn on_remote_candidate(&mut self, peer_id: ParticipantId, candidate: IceCandidate) {
        if let Some(session) = self.sessions.get_mut(&peer_id) {
            if let Err(e) = session.add_remote_candidate(candidate).await {
                tracing::warn!(peer = %peer_id, error = %e, "Remote candidate rejected");
            }
        } else if self.pending.buffer_candidate(&peer_id, candidate) {
            tracing::debug!(peer = %peer_id, "Candidate kept with parked offer");
        } else {
            tracing::warn!(peer = %peer_id, "Dropping candidate from a peer without a session");
        }
    }

    async fn apply_remote_candidates(&mut self, peer_id: &ParticipantId, candidates: Vec<IceCandidate>) {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            return;
        };
        for candidate in candidates {
            if let Err(e) = session.add_remote_candidate(candidate).await {
                tracing::warn!(peer = %peer_id, error = %e, "Remote candidate rejected");
            }
        }
    }

    // ========================================================================
    // MEDIA
    // ========================================================================

    /// Start acquiring local media; the result arrives as a loop event
    pub fn acquire_media(&mut self, devices: Arc<dyn MediaDevices>) -> bool {
        self.media
            .acquire(devices, self.config.media.clone(), self.loop_tx.clone())
    }

    /// Store the captured stream and flush deferred work
    pub async fn on_media_acquired(&mut self, stream: LocalStream) {
        if !self.media.mark_ready(stream) {
            return;
        }
        tracing::info!(pending = self.pending.len(), "Local media ready");
        self.emit(CallEvent::MediaReady);
        self.on_media_ready().await;
    }

    /// Flush the pending queue in insertion order
    ///
    /// The queue is drained before processing, so repeated calls never
    /// replay an entry.
    pub async fn on_media_ready(&mut self) {
        if !self.media.is_ready() {
            return;
        }
        for PendingEntry {
            peer_id,
            intent,
            early_candidates,
        } in self.pending.drain()
        {
            match intent {
                DeferredIntent::InitiateOffer => {
                    if self.sessions.contains_key(&peer_id) {
                        self.apply_remote_candidates(&peer_id, early_candidates).await;
                        continue;
                    }
                    if self
                        .create_session(
                            peer_id.clone(),
                            Role::Offerer,
                            DeferredIntent::InitiateOffer,
                            early_candidates,
                        )
                        .await
                        .is_ok()
                    {
                        self.start_offer(&peer_id).await;
                    }
                }
                DeferredIntent::RespondToOffer(offer) => {
                    self.respond_to_offer(peer_id, offer, early_candidates).await;
                }
            }
        }
    }

    /// Record a failed acquisition; deferred work stays parked
    pub fn on_media_failed(&mut self, err: Error) {
        self.media.mark_failed();
        tracing::error!(
            code = err.code(),
            category = ?err.category(),
            user_action = err.requires_user_action(),
            error = %err,
            "Local media unavailable"
        );
        self.emit(CallEvent::MediaUnavailable {
            code: err.code(),
            message: err.to_string(),
        });
    }

    // ========================================================================
    // TRANSPORT AND TIMERS
    // ========================================================================

    /// Handle a report from a session's connection
    pub fn on_transport_event(&mut self, peer_id: &ParticipantId, epoch: u64, event: TransportEvent) {
        if !self.is_current(peer_id, epoch) {
            tracing::debug!(peer = %peer_id, epoch, "Ignoring event from a superseded connection");
            return;
        }

        match event {
            TransportEvent::IceCandidate(candidate) => {
                if let Some((session, ctx)) = self.session_parts(peer_id) {
                    session.on_local_candidate(candidate, &ctx);
                }
            }
            TransportEvent::ConnectionState(state) => {
                let Some((session, ctx)) = self.session_parts(peer_id) else {
                    return;
                };
                match session.on_connection_state(state, &ctx) {
                    HealthChange::Connected => {
                        tracing::info!(peer = %peer_id, epoch, "Peer connected");
                        self.emit(CallEvent::PeerConnected(peer_id.clone()));
                    }
                    HealthChange::Failed { retry_scheduled } => {
                        tracing::warn!(peer = %peer_id, epoch, ?state, retry_scheduled, "Peer connection failed");
                        self.emit(CallEvent::PeerFailed {
                            peer_id: peer_id.clone(),
                            retry_scheduled,
                        });
                    }
                    HealthChange::Unchanged => {}
                }
            }
            TransportEvent::Track(track) => {
                tracing::debug!(peer = %peer_id, kind = %track.kind, "Remote track");
                self.emit(CallEvent::RemoteTrack {
                    peer_id: peer_id.clone(),
                    track,
                });
            }
        }
    }

    /// Handle a retry timer fire
    pub async fn on_timer(&mut self, timer: TimerEvent) {
        let TimerEvent {
            peer_id,
            epoch,
            kind,
        } = timer;
        if !self.is_current(&peer_id, epoch) {
            tracing::debug!(peer = %peer_id, epoch, ?kind, "Ignoring timer of a closed session");
            return;
        }

        match kind {
            TimerKind::OfferRetry => {
                if let Some((session, ctx)) = self.session_parts(&peer_id) {
                    session.resend_offer(&ctx);
                }
            }
            TimerKind::FailureRetry => {
                let media_ready = self.media.is_ready();
                let Some((session, ctx)) = self.session_parts(&peer_id) else {
                    return;
                };
                if !media_ready {
                    tracing::debug!(peer = %peer_id, "Media gone; skipping failure retry");
                    session.cancel_failure_retry();
                    return;
                }
                if let Err(e) = session.retry_after_failure(&ctx).await {
                    tracing::warn!(peer = %peer_id, error = %e, "Failure retry could not offer");
                    let retry_scheduled = session.mark_failed(&ctx);
                    self.emit(CallEvent::PeerFailed {
                        peer_id: peer_id.clone(),
                        retry_scheduled,
                    });
                }
            }
        }
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    async fn on_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::ToggleTrack(kind) => match self.media.toggle_track(kind) {
                Ok(enabled) => {
                    tracing::debug!(%kind, enabled, "Local track toggled");
                    self.emit(CallEvent::TrackToggled { kind, enabled });
                }
                Err(e) => tracing::debug!(%kind, error = %e, "Cannot toggle track"),
            },
            CallCommand::ShareScreen(track) => {
                if let Err(e) = self.share_screen(track).await {
                    tracing::warn!(error = %e, "Screen share failed");
                }
            }
            CallCommand::StopScreenShare => self.stop_screen_share().await,
            CallCommand::SendChat { message, username } => {
                if let Err(e) = self.send_chat(message, username) {
                    tracing::warn!(error = %e, "Chat message not sent");
                }
            }
            CallCommand::Leave => self.teardown().await,
        }
    }

    /// Send a screen track to every peer in place of the camera
    pub async fn share_screen(&mut self, track: LocalTrack) -> Result<()> {
        self.media.replace_video_track(track.clone())?;
        self.replace_outgoing_video(&track).await;
        Ok(())
    }

    /// Send the camera again
    pub async fn stop_screen_share(&mut self) {
        if let Some(camera) = self.media.restore_camera() {
            self.replace_outgoing_video(&camera).await;
        }
    }

    async fn replace_outgoing_video(&self, track: &LocalTrack) {
        for session in self.sessions.values() {
            if let Err(e) = session.replace_track(TrackKind::Video, track).await {
                tracing::warn!(peer = %session.peer_id(), error = %e, "Video track replacement failed");
            }
        }
    }

    /// Send a chat message to the room
    pub fn send_chat(&self, message: String, username: String) -> Result<()> {
        self.sink.send(ClientMessage::ChatMessage { message, username })
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Close every session, stop media and close the channel
    ///
    /// Safe to call more than once.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        tracing::info!(
            sessions = self.sessions.len(),
            pending = self.pending.len(),
            "Leaving call"
        );
        self.close_all_sessions().await;
        self.media.stop();
        self.sink.close().await;
    }

    /// Allocate a connection for `peer_id` and register its session
    ///
    /// On failure `intent` is parked again together with `early`, so the
    /// peer's work survives until it leaves or a later attempt succeeds.
    async fn create_session(
        &mut self,
        peer_id: ParticipantId,
        role: Role,
        intent: DeferredIntent,
        early: Vec<IceCandidate>,
    ) -> Result<()> {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let events = TransportEventSender::new(peer_id.clone(), epoch, self.loop_tx.clone());

        let connection = match self
            .factory
            .create_connection(&peer_id, &self.config.ice_servers, events)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(
                    peer = %peer_id,
                    recoverable = e.is_recoverable(),
                    error = %e,
                    "Could not create peer connection"
                );
                self.session_setup_failed(peer_id, intent, early);
                return Err(e);
            }
        };

        let mut session = PeerSession::new(peer_id.clone(), epoch, role, connection);
        if let Err(e) = session.attach_tracks(&self.media.outgoing_tracks()).await {
            tracing::warn!(peer = %peer_id, error = %e, "Could not attach local tracks");
            session.close().await;
            self.session_setup_failed(peer_id, intent, early);
            return Err(e);
        }
        if let Some(entry) = self.pending.remove(&peer_id) {
            session.buffer_remote_candidates(entry.early_candidates);
        }
        session.buffer_remote_candidates(early);

        tracing::info!(peer = %peer_id, epoch, ?role, "Session created");
        if let Some(mut replaced) = self.sessions.insert(peer_id.clone(), session) {
            tracing::warn!(peer = %peer_id, epoch = replaced.epoch(), "Replacing a live session");
            replaced.close().await;
        }
        Ok(())
    }

    fn session_setup_failed(
        &mut self,
        peer_id: ParticipantId,
        intent: DeferredIntent,
        early: Vec<IceCandidate>,
    ) {
        self.pending.defer(peer_id.clone(), intent);
        for candidate in early {
            self.pending.buffer_candidate(&peer_id, candidate);
        }
        self.emit(CallEvent::PeerFailed {
            peer_id,
            retry_scheduled: false,
        });
    }

    async fn start_offer(&mut self, peer_id: &ParticipantId) {
        let Some((session, ctx)) = self.session_parts(peer_id) else {
            return;
        };
        if let Err(e) = session.start_offer(&ctx).await {
            tracing::warn!(peer = %peer_id, error = %e, "Offer failed");
            let retry_scheduled = session.mark_failed(&ctx);
            self.emit(CallEvent::PeerFailed {
                peer_id: peer_id.clone(),
                retry_scheduled,
            });
        }
    }

    async fn answer_offer(&mut self, peer_id: &ParticipantId, offer: SessionDescription) {
        let Some((session, ctx)) = self.session_parts(peer_id) else {
            return;
        };
        if let Err(e) = session.accept_offer(offer, &ctx).await {
            tracing::warn!(peer = %peer_id, error = %e, "Answering offer failed");
            let retry_scheduled = session.mark_failed(&ctx);
            self.emit(CallEvent::PeerFailed {
                peer_id: peer_id.clone(),
                retry_scheduled,
            });
        }
    }

    /// Close a session's connection, then deregister it
    async fn close_session(&mut self, peer_id: &ParticipantId) -> Vec<IceCandidate> {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            return Vec::new();
        };
        let leftover = session.close().await;
        let epoch = session.epoch();
        self.sessions.remove(peer_id);
        tracing::debug!(peer = %peer_id, epoch, "Session closed");
        leftover
    }

    async fn close_all_sessions(&mut self) {
        let peers: Vec<ParticipantId> = self.sessions.keys().cloned().collect();
        for peer_id in peers {
            self.close_session(&peer_id).await;
            self.emit(CallEvent::PeerRemoved(peer_id));
        }
        self.pending.clear();
    }

    fn is_current(&self, peer_id: &ParticipantId, epoch: u64) -> bool {
        self.sessions
            .get(peer_id)
            .is_some_and(|session| session.epoch() == epoch)
    }

    fn session_parts(
        &mut self,
        peer_id: &ParticipantId,
    ) -> Option<(&mut PeerSession, SessionContext<'_>)> {
        let session = self.sessions.get_mut(peer_id)?;
        let ctx = SessionContext {
            sink: self.sink.as_ref(),
            scheduler: &self.scheduler,
            config: &self.config,
        };
        Some((session, ctx))
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.event_tx.send(event);
    }
}

// ============================================================================
// TESTS
// ============================================================================
