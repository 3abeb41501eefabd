//! # Peer Session
//!
//! One negotiated media connection to one remote participant.
//!
//! ## Negotiation State Machine
//!
//! ```text
//!                 start_offer()                    transport connected
//!        ┌──────────────────────► OfferPending ─────────────────────┐
//!        │                          │  ▲  offer re-sent every       │
//!        │                          │  └─ interval until answered   ▼
//!      Idle                         │                           Connected
//!        │                          │                               ▲
//!        │ accept_offer()           │                               │
//!        └──────────────────────► AnswerPending ────────────────────┘
//!
//!   any state ── transport failed/disconnected ──► Failed ── retry ──► OfferPending
//!   any state ── close() ──────────────────────────────────────────► Closed
//! ```
//!
//! ## Candidate Buffers
//!
//! Candidates in both directions wait until the remote description is
//! applied. Local candidates are then sent, remote candidates applied, each
//! exactly once and in arrival order.

use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::config::CallConfig;
use crate::error::Result;
use crate::media::LocalTrack;
use crate::protocol::ClientMessage;
use crate::signaling::SignalSink;
use crate::timer::{Scheduler, TimerEvent, TimerHandle, TimerKind};
use crate::transport::{PeerConnection, PeerConnectionState, SignalingState};
use crate::types::{IceCandidate, ParticipantId, SessionDescription, TrackKind};

// ============================================================================
// ROLES AND STATES
// ============================================================================

/// Which side created the first offer; fixed for the session's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We sent the initial offer
    Offerer,
    /// We answered the remote's offer
    Answerer,
}

/// Negotiation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Connection allocated, tracks attached
    Idle,
    /// Our offer is out
    OfferPending,
    /// Remote offer applied and answered
    AnswerPending,
    /// Transport connected
    Connected,
    /// Transport failed
    Failed,
    /// Closed; terminal
    Closed,
}

/// Transport health as last reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// Not connected yet
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost
    Failed,
    /// Closed
    Closed,
}

/// Result of an offer collision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlareOutcome {
    /// Ignore the inbound offer
    KeepLocalOffer,
    /// Drop our offer and answer theirs
    AcceptRemoteOffer,
}

/// Decide an offer collision between `local` and `remote`
///
/// The lexicographically lower id keeps its offer. Both sides evaluate the
/// same comparison with the arguments swapped, so exactly one of them yields.
pub fn resolve_glare(local: &ParticipantId, remote: &ParticipantId) -> GlareOutcome {
    if local < remote {
        GlareOutcome::KeepLocalOffer
    } else {
        GlareOutcome::AcceptRemoteOffer
    }
}

/// What a transport state report changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthChange {
    /// Became connected
    Connected,
    /// Became failed
    Failed {
        /// Whether a failure retry was armed
        retry_scheduled: bool,
    },
    /// Nothing to report
    Unchanged,
}

/// Shared collaborators a session step needs
pub struct SessionContext<'a> {
    /// Outbound signaling
    pub sink: &'a dyn SignalSink,
    /// Timer factory
    pub scheduler: &'a Scheduler,
    /// Retry intervals and bounds
    pub config: &'a CallConfig,
}

// ============================================================================
// PEER SESSION
// ============================================================================

/// Negotiation state for one remote participant
pub struct PeerSession {
    peer_id: ParticipantId,
    epoch: u64,
    role: Role,
    state: NegotiationState,
    health: ConnectionHealth,
    connection: Arc<dyn PeerConnection>,
    remote_description_set: bool,
    pending_remote_candidates: Vec<IceCandidate>,
    pending_local_candidates: Vec<IceCandidate>,
    local_offer: Option<SessionDescription>,
    offer_retry: Option<TimerHandle>,
    failure_retry: Option<TimerHandle>,
    retry_count: u32,
    created_at: i64,
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("epoch", &self.epoch)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("health", &self.health)
            .field("remote_description_set", &self.remote_description_set)
            .field("retry_count", &self.retry_count)
            .finish_non_exhaustive()
    }
}

impl PeerSession {
    /// Wrap a freshly created connection
    pub fn new(
        peer_id: ParticipantId,
        epoch: u64,
        role: Role,
        connection: Arc<dyn PeerConnection>,
    ) -> Self {
        Self {
            peer_id,
            epoch,
            role,
            state: NegotiationState::Idle,
            health: ConnectionHealth::Connecting,
            connection,
            remote_description_set: false,
            pending_remote_candidates: Vec::new(),
            pending_local_candidates: Vec::new(),
            local_offer: None,
            offer_retry: None,
            failure_retry: None,
            retry_count: 0,
            created_at: crate::time::now_timestamp_millis(),
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Remote participant
    pub fn peer_id(&self) -> &ParticipantId {
        &self.peer_id
    }

    /// Unique incarnation number
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Offerer or answerer
    pub fn role(&self) -> Role {
        self.role
    }

    /// Negotiation state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Transport health
    pub fn health(&self) -> ConnectionHealth {
        self.health
    }

    /// Whether the remote description has been applied
    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    /// Remote candidates waiting for the remote description
    pub fn pending_remote_candidates(&self) -> &[IceCandidate] {
        &self.pending_remote_candidates
    }

    /// Local candidates waiting for the remote description
    pub fn pending_local_candidates(&self) -> &[IceCandidate] {
        &self.pending_local_candidates
    }

    /// Whether the offer retry timer is armed
    pub fn offer_retry_active(&self) -> bool {
        self.offer_retry.is_some()
    }

    /// Whether the failure retry timer is armed
    pub fn failure_retry_active(&self) -> bool {
        self.failure_retry.is_some()
    }

    /// Failure retries since the last successful connection
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Creation time (Unix ms)
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// The underlying connection
    pub fn connection(&self) -> &Arc<dyn PeerConnection> {
        &self.connection
    }

    /// Whether our offer is applied and unanswered
    pub fn has_local_offer(&self) -> bool {
        self.connection.signaling_state() == SignalingState::HaveLocalOffer
    }

    /// Whether an answer is still expected
    pub fn is_awaiting_answer(&self) -> bool {
        self.state == NegotiationState::OfferPending && self.has_local_offer()
    }

    // ------------------------------------------------------------------------
    // Tracks
    // ------------------------------------------------------------------------

    /// Attach the local tracks to the connection
    pub async fn attach_tracks(&self, tracks: &[LocalTrack]) -> Result<()> {
        for track in tracks {
            self.connection.add_track(track).await?;
        }
        Ok(())
    }

    /// Swap the outgoing track of a kind
    pub async fn replace_track(&self, kind: TrackKind, track: &LocalTrack) -> Result<()> {
        self.connection.replace_track(kind, track).await
    }

    // ------------------------------------------------------------------------
    // Offer / answer
    // ------------------------------------------------------------------------

    /// Generate, apply and send an offer, then arm the offer retry
    pub async fn start_offer(&mut self, ctx: &SessionContext<'_>) -> Result<()> {
        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(offer.clone()).await?;

        self.state = NegotiationState::OfferPending;
        self.local_offer = Some(offer.clone());
        self.send(
            ctx,
            ClientMessage::Offer {
                offer,
                target_user_id: self.peer_id.clone(),
            },
        );
        self.offer_retry = Some(ctx.scheduler.every(
            ctx.config.offer_retry_interval(),
            self.timer_event(TimerKind::OfferRetry),
        ));
        tracing::debug!(peer = %self.peer_id, epoch = self.epoch, "Offer sent");
        Ok(())
    }

    /// Re-send the outstanding offer; disarms the retry once answered
    pub fn resend_offer(&mut self, ctx: &SessionContext<'_>) -> bool {
        if !self.is_awaiting_answer() {
            self.offer_retry = None;
            return false;
        }
        let Some(offer) = self.local_offer.clone() else {
            self.offer_retry = None;
            return false;
        };
        tracing::debug!(peer = %self.peer_id, epoch = self.epoch, "Re-sending unanswered offer");
        self.send(
            ctx,
            ClientMessage::Offer {
                offer,
                target_user_id: self.peer_id.clone(),
            },
        );
        true
    }

    /// Apply a remote offer and send our answer
    pub async fn accept_offer(
        &mut self,
        offer: SessionDescription,
        ctx: &SessionContext<'_>,
    ) -> Result<()> {
        self.connection.set_remote_description(offer).await?;
        self.renegotiated();
        self.on_remote_description_applied().await;

        let answer = self.connection.create_answer().await?;
        self.connection.set_local_description(answer.clone()).await?;
        self.send(
            ctx,
            ClientMessage::Answer {
                answer,
                target_user_id: self.peer_id.clone(),
            },
        );
        self.flush_local_candidates(ctx);

        if self.health != ConnectionHealth::Connected {
            self.state = NegotiationState::AnswerPending;
        }
        tracing::debug!(peer = %self.peer_id, epoch = self.epoch, "Answer sent");
        Ok(())
    }

    /// Apply the remote answer; `false` if no offer was outstanding
    pub async fn apply_answer(
        &mut self,
        answer: SessionDescription,
        ctx: &SessionContext<'_>,
    ) -> Result<bool> {
        if !self.has_local_offer() {
            return Ok(false);
        }
        self.connection.set_remote_description(answer).await?;
        self.offer_retry = None;
        self.renegotiated();
        self.on_remote_description_applied().await;
        self.flush_local_candidates(ctx);
        tracing::debug!(peer = %self.peer_id, epoch = self.epoch, "Answer applied");
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Candidates
    // ------------------------------------------------------------------------

    /// Queue remote candidates received before this session existed
    pub fn buffer_remote_candidates(&mut self, candidates: Vec<IceCandidate>) {
        self.pending_remote_candidates.extend(candidates);
    }

    /// Apply a remote candidate, or buffer it until the remote description
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.remote_description_set {
            self.connection.add_ice_candidate(candidate).await
        } else {
            self.pending_remote_candidates.push(candidate);
            Ok(())
        }
    }

    /// Send a gathered local candidate, or buffer it until the remote description
    pub fn on_local_candidate(&mut self, candidate: IceCandidate, ctx: &SessionContext<'_>) {
        if self.remote_description_set {
            self.send(
                ctx,
                ClientMessage::IceCandidate {
                    candidate,
                    target_user_id: self.peer_id.clone(),
                },
            );
        } else {
            self.pending_local_candidates.push(candidate);
        }
    }

    async fn on_remote_description_applied(&mut self) {
        if self.remote_description_set {
            return;
        }
        self.remote_description_set = true;
        for candidate in mem::take(&mut self.pending_remote_candidates) {
            if let Err(e) = self.connection.add_ice_candidate(candidate).await {
                tracing::warn!(peer = %self.peer_id, error = %e, "Buffered candidate rejected");
            }
        }
    }

    fn flush_local_candidates(&mut self, ctx: &SessionContext<'_>) {
        for candidate in mem::take(&mut self.pending_local_candidates) {
            self.send(
                ctx,
                ClientMessage::IceCandidate {
                    candidate,
                    target_user_id: self.peer_id.clone(),
                },
            );
        }
    }

    // ------------------------------------------------------------------------
    // Health and retries
    // ------------------------------------------------------------------------

    /// React to a transport state report
    pub fn on_connection_state(
        &mut self,
        state: PeerConnectionState,
        ctx: &SessionContext<'_>,
    ) -> HealthChange {
        match state {
            PeerConnectionState::Connected => {
                if self.health == ConnectionHealth::Connected {
                    return HealthChange::Unchanged;
                }
                self.health = ConnectionHealth::Connected;
                self.state = NegotiationState::Connected;
                self.retry_count = 0;
                self.offer_retry = None;
                self.failure_retry = None;
                HealthChange::Connected
            }
            PeerConnectionState::Failed | PeerConnectionState::Disconnected => {
                if self.health == ConnectionHealth::Failed {
                    return HealthChange::Unchanged;
                }
                let retry_scheduled = self.mark_failed(ctx);
                HealthChange::Failed { retry_scheduled }
            }
            PeerConnectionState::New
            | PeerConnectionState::Connecting
            | PeerConnectionState::Closed => HealthChange::Unchanged,
        }
    }

    /// Mark the session failed and arm a retry if the bound allows one
    pub fn mark_failed(&mut self, ctx: &SessionContext<'_>) -> bool {
        self.health = ConnectionHealth::Failed;
        self.state = NegotiationState::Failed;
        self.offer_retry = None;
        if !ctx.config.allows_failure_retry(self.retry_count) {
            tracing::warn!(
                peer = %self.peer_id,
                attempts = self.retry_count,
                "Failure retries exhausted"
            );
            self.failure_retry = None;
            return false;
        }
        self.failure_retry = Some(ctx.scheduler.once(
            ctx.config.failure_retry_delay(),
            self.timer_event(TimerKind::FailureRetry),
        ));
        true
    }

    /// Disarm a pending failure retry
    pub fn cancel_failure_retry(&mut self) {
        self.failure_retry = None;
    }

    // An applied remote description supersedes an armed failure retry.
    // `retry_count` carries over until the transport connects.
    fn renegotiated(&mut self) {
        self.failure_retry = None;
        if self.health == ConnectionHealth::Failed {
            self.health = ConnectionHealth::Connecting;
        }
    }

    /// Re-offer after a failure; no-op unless still failed
    pub async fn retry_after_failure(&mut self, ctx: &SessionContext<'_>) -> Result<bool> {
        self.failure_retry = None;
        if self.health != ConnectionHealth::Failed {
            return Ok(false);
        }
        self.retry_count += 1;
        self.health = ConnectionHealth::Connecting;
        tracing::info!(peer = %self.peer_id, attempt = self.retry_count, "Retrying failed connection");
        self.start_offer(ctx).await?;
        Ok(true)
    }

    /// Release the connection, timers and buffers
    ///
    /// Returns remote candidates that were never applied.
    pub async fn close(&mut self) -> Vec<IceCandidate> {
        self.offer_retry = None;
        self.failure_retry = None;
        self.pending_local_candidates.clear();
        self.local_offer = None;
        self.state = NegotiationState::Closed;
        self.health = ConnectionHealth::Closed;
        self.connection.close().await;
        mem::take(&mut self.pending_remote_candidates)
    }

    fn timer_event(&self, kind: TimerKind) -> TimerEvent {
        TimerEvent {
            peer_id: self.peer_id.clone(),
            epoch: self.epoch,
            kind,
        }
    }

    fn send(&self, ctx: &SessionContext<'_>, message: ClientMessage) {
        let kind = message.kind();
        if let Err(e) = ctx.sink.send(message) {
            tracing::warn!(peer = %self.peer_id, kind, error = %e, "Dropping signaling message");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::events::ManagerEvent;
    use crate::mock::{MockPeerConnection, MockSignalSink};
    use crate::transport::TransportEventSender;

    struct Fixture {
        sink: Arc<MockSignalSink>,
        scheduler: Scheduler,
        config: CallConfig,
        connection: Arc<MockPeerConnection>,
        rx: mpsc::UnboundedReceiver<ManagerEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let events = TransportEventSender::new(ParticipantId::from("b"), 1, tx.clone());
            Self {
                sink: Arc::new(MockSignalSink::new()),
                scheduler: Scheduler::new(tx),
                config: CallConfig::default(),
                connection: Arc::new(MockPeerConnection::new(ParticipantId::from("b"), events)),
                rx,
            }
        }

        fn ctx(&self) -> SessionContext<'_> {
            SessionContext {
                sink: self.sink.as_ref(),
                scheduler: &self.scheduler,
                config: &self.config,
            }
        }

        fn session(&self, role: Role) -> PeerSession {
            PeerSession::new(ParticipantId::from("b"), 1, role, self.connection.clone())
        }

        fn timer_fires(&mut self, kind: TimerKind) -> usize {
            let mut fired = 0;
            while let Ok(event) = self.rx.try_recv() {
                if matches!(event, ManagerEvent::Timer(ref t) if t.kind == kind) {
                    fired += 1;
                }
            }
            fired
        }
    }

    #[test]
    fn test_glare_is_antisymmetric() {
        let a = ParticipantId::from("a1");
        let b = ParticipantId::from("b2");
        assert_eq!(resolve_glare(&a, &b), GlareOutcome::KeepLocalOffer);
        assert_eq!(resolve_glare(&b, &a), GlareOutcome::AcceptRemoteOffer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_arms_retry_until_answered() {
        let mut fx = Fixture::new();
        let mut session = fx.session(Role::Offerer);

        session.start_offer(&fx.ctx()).await.unwrap();
        assert_eq!(session.state(), NegotiationState::OfferPending);
        assert!(session.offer_retry_active());
        assert_eq!(fx.sink.offers_to(&ParticipantId::from("b")), 1);

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(fx.timer_fires(TimerKind::OfferRetry), 1);
        assert!(session.resend_offer(&fx.ctx()));
        assert_eq!(fx.sink.offers_to(&ParticipantId::from("b")), 2);

        let applied = session
            .apply_answer(SessionDescription::answer("answer"), &fx.ctx())
            .await
            .unwrap();
        assert!(applied);
        assert!(!session.offer_retry_active());
        assert!(!session.resend_offer(&fx.ctx()));
    }

    #[tokio::test]
    async fn test_stale_answer_is_ignored() {
        let fx = Fixture::new();
        let mut session = fx.session(Role::Answerer);
        let applied = session
            .apply_answer(SessionDescription::answer("late"), &fx.ctx())
            .await
            .unwrap();
        assert!(!applied);
        assert!(!session.remote_description_set());
    }

    #[tokio::test]
    async fn test_remote_candidates_drain_in_order() {
        let fx = Fixture::new();
        let mut session = fx.session(Role::Answerer);

        session.buffer_remote_candidates(vec![IceCandidate::new("c1")]);
        session.add_remote_candidate(IceCandidate::new("c2")).await.unwrap();
        session.add_remote_candidate(IceCandidate::new("c3")).await.unwrap();
        assert!(fx.connection.applied_candidates().is_empty());

        session
            .accept_offer(SessionDescription::offer("offer"), &fx.ctx())
            .await
            .unwrap();
        assert_eq!(
            fx.connection.applied_candidates(),
            vec![
                IceCandidate::new("c1"),
                IceCandidate::new("c2"),
                IceCandidate::new("c3")
            ]
        );
        assert!(session.pending_remote_candidates().is_empty());

        session.add_remote_candidate(IceCandidate::new("c4")).await.unwrap();
        assert_eq!(fx.connection.applied_candidates().len(), 4);
    }

    #[tokio::test]
    async fn test_local_candidates_wait_for_remote_description() {
        let fx = Fixture::new();
        let mut session = fx.session(Role::Answerer);

        session.on_local_candidate(IceCandidate::new("l1"), &fx.ctx());
        session.on_local_candidate(IceCandidate::new("l2"), &fx.ctx());
        assert_eq!(fx.sink.candidates_to(&ParticipantId::from("b")), 0);

        session
            .accept_offer(SessionDescription::offer("offer"), &fx.ctx())
            .await
            .unwrap();
        let sent = fx.sink.sent();
        assert!(matches!(sent[0], ClientMessage::Answer { .. }));
        assert_eq!(fx.sink.candidates_to(&ParticipantId::from("b")), 2);
        assert_eq!(session.state(), NegotiationState::AnswerPending);

        session.on_local_candidate(IceCandidate::new("l3"), &fx.ctx());
        assert_eq!(fx.sink.candidates_to(&ParticipantId::from("b")), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_arms_single_retry() {
        let mut fx = Fixture::new();
        let mut session = fx.session(Role::Offerer);

        let change = session.on_connection_state(PeerConnectionState::Failed, &fx.ctx());
        assert_eq!(change, HealthChange::Failed { retry_scheduled: true });
        let again = session.on_connection_state(PeerConnectionState::Disconnected, &fx.ctx());
        assert_eq!(again, HealthChange::Unchanged);

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(fx.timer_fires(TimerKind::FailureRetry), 1);

        assert!(session.retry_after_failure(&fx.ctx()).await.unwrap());
        assert_eq!(session.retry_count(), 1);
        assert_eq!(session.state(), NegotiationState::OfferPending);
        assert_eq!(fx.sink.offers_to(&ParticipantId::from("b")), 1);

        session.on_connection_state(PeerConnectionState::Connected, &fx.ctx());
        assert_eq!(session.retry_count(), 0);
        assert!(!session.offer_retry_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retry_bound() {
        let mut fx = Fixture::new();
        fx.config.max_failure_retries = Some(1);
        let mut session = fx.session(Role::Offerer);

        session.on_connection_state(PeerConnectionState::Failed, &fx.ctx());
        assert!(session.retry_after_failure(&fx.ctx()).await.unwrap());

        let change = session.on_connection_state(PeerConnectionState::Failed, &fx.ctx());
        assert_eq!(change, HealthChange::Failed { retry_scheduled: false });
        assert!(!session.failure_retry_active());
    }

    #[tokio::test]
    async fn test_retry_skipped_after_recovery() {
        let fx = Fixture::new();
        let mut session = fx.session(Role::Offerer);

        session.on_connection_state(PeerConnectionState::Failed, &fx.ctx());
        session.on_connection_state(PeerConnectionState::Connected, &fx.ctx());
        assert!(!session.retry_after_failure(&fx.ctx()).await.unwrap());
        assert_eq!(fx.sink.offers_to(&ParticipantId::from("b")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answering_after_failure_disarms_retry() {
        let mut fx = Fixture::new();
        let mut session = fx.session(Role::Answerer);
        session
            .accept_offer(SessionDescription::offer("first"), &fx.ctx())
            .await
            .unwrap();

        session.on_connection_state(PeerConnectionState::Failed, &fx.ctx());
        assert!(session.failure_retry_active());

        session
            .accept_offer(SessionDescription::offer("second"), &fx.ctx())
            .await
            .unwrap();
        assert!(!session.failure_retry_active());
        assert_eq!(session.health(), ConnectionHealth::Connecting);
        assert_eq!(session.state(), NegotiationState::AnswerPending);

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(fx.timer_fires(TimerKind::FailureRetry), 0);
        assert!(!session.retry_after_failure(&fx.ctx()).await.unwrap());
        assert_eq!(fx.sink.offers_to(&ParticipantId::from("b")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_failure_retry_never_fires() {
        let mut fx = Fixture::new();
        let mut session = fx.session(Role::Offerer);

        session.on_connection_state(PeerConnectionState::Failed, &fx.ctx());
        session.cancel_failure_retry();
        assert!(!session.failure_retry_active());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fx.timer_fires(TimerKind::FailureRetry), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_everything() {
        let mut fx = Fixture::new();
        let mut session = fx.session(Role::Offerer);
        session.start_offer(&fx.ctx()).await.unwrap();
        session.add_remote_candidate(IceCandidate::new("early")).await.unwrap();

        let leftover = session.close().await;
        assert_eq!(leftover, vec![IceCandidate::new("early")]);
        assert_eq!(session.state(), NegotiationState::Closed);
        assert!(!session.offer_retry_active());
        assert!(fx.connection.is_closed());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fx.timer_fires(TimerKind::OfferRetry), 0);
    }
}
