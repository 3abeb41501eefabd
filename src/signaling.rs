//! # Signaling Channel
//!
//! Duplex WebSocket connection to the room relay.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!   Disconnected ── connect() ──► Connecting ──► Connected
//!        ▲                           │               │
//!        │                           │ failure       │ close frame / error
//!        │                           ▼               ▼
//!        │                  ┌─────────────────────────────┐
//!        │                  │ classify close code         │
//!        │                  │  1000, intentional → Closed │
//!        │                  │  1011 server error → Closed │
//!        │                  │  4004 no such room → Closed │
//!        │                  │  anything else     → Reconnecting
//!        │                  └─────────────────────────────┘
//!        │                                   │ after reconnect delay
//!        └───────────────────────────────────┘ (one attempt, cancellable)
//! ```
//!
//! Inbound frames are parsed and posted into the event loop in arrival
//! order. There is no send queue: [`SignalSink::send`] fails with
//! [`Error::NotConnected`] unless the socket is open, and the caller logs and
//! drops the message. The offer retry timer covers anything lost this way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::events::ManagerEvent;
use crate::protocol::{ClientMessage, ServerMessage};

// ============================================================================
// CLOSE CODES
// ============================================================================

/// Normal closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Closed without a close frame (also used for connect failures)
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Relay hit an internal error
pub const SERVER_ERROR: u16 = 1011;

/// Relay does not know the room
pub const ROOM_NOT_FOUND: u16 = 4004;

/// Close frame without a status code
const NO_STATUS: u16 = 1005;

/// What a channel close means for the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// We closed it
    Intentional,
    /// Relay closed normally
    Normal,
    /// Relay reported a server error
    ServerError,
    /// Room does not exist
    RoomNotFound,
    /// Unexpected; a reconnect follows
    Reconnect,
}

impl CloseDisposition {
    /// Classify a close code
    pub fn classify(code: u16, intentional: bool) -> Self {
        if intentional {
            return CloseDisposition::Intentional;
        }
        match code {
            NORMAL_CLOSURE => CloseDisposition::Normal,
            SERVER_ERROR => CloseDisposition::ServerError,
            ROOM_NOT_FOUND => CloseDisposition::RoomNotFound,
            _ => CloseDisposition::Reconnect,
        }
    }

    /// Whether a reconnect is scheduled
    pub fn reconnects(&self) -> bool {
        *self == CloseDisposition::Reconnect
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Relay connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Never connected
    Disconnected,
    /// Opening the socket
    Connecting,
    /// Socket open
    Connected,
    /// Waiting to reconnect
    Reconnecting,
    /// Closed; no reconnect pending
    Closed,
}

/// Report from the signaling channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Status changed
    Status(ChannelStatus),
    /// Parsed relay message
    Message(ServerMessage),
    /// Socket closed
    Closed {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
        /// What happens next
        disposition: CloseDisposition,
    },
}

// ============================================================================
// SIGNAL SINK
// ============================================================================

/// Outbound half of the signaling channel
#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Send a message now; fails unless the channel is open
    fn send(&self, message: ClientMessage) -> Result<()>;

    /// Close intentionally; no reconnect follows
    async fn close(&self);
}

// ============================================================================
// WEBSOCKET CHANNEL
// ============================================================================

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct ChannelState {
    status: ChannelStatus,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    intentional_close: bool,
    connection: Option<AbortHandle>,
    reconnect: Option<AbortHandle>,
    generation: u64,
}

struct ChannelInner {
    url: String,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<ManagerEvent>,
    state: Mutex<ChannelState>,
}

/// WebSocket connection to one room on the relay
pub struct SignalingChannel {
    inner: Arc<ChannelInner>,
}

impl SignalingChannel {
    /// Create a channel for `url` reporting into the event loop
    pub fn new(
        url: impl Into<String>,
        reconnect_delay: Duration,
        events: mpsc::UnboundedSender<ManagerEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                url: url.into(),
                reconnect_delay,
                events,
                state: Mutex::new(ChannelState {
                    status: ChannelStatus::Disconnected,
                    outbound: None,
                    intentional_close: false,
                    connection: None,
                    reconnect: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Relay URL
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current status
    pub fn status(&self) -> ChannelStatus {
        self.inner.state.lock().status
    }

    /// Whether a reconnect is scheduled
    pub fn reconnect_pending(&self) -> bool {
        self.inner.state.lock().reconnect.is_some()
    }

    /// Open the connection; no-op while connecting or connected
    ///
    /// A scheduled reconnect is superseded.
    pub fn connect(&self) {
        self.inner.start(false);
    }

    /// Close intentionally and cancel any scheduled reconnect
    pub fn disconnect(&self) {
        let previous = {
            let mut state = self.inner.state.lock();
            state.intentional_close = true;
            state.generation += 1;
            if let Some(pending) = state.reconnect.take() {
                pending.abort();
            }
            if let Some(outbound) = state.outbound.take() {
                let _ = outbound.send(WsMessage::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "leaving room".into(),
                })));
            }
            if let Some(connection) = state.connection.take() {
                connection.abort();
            }
            std::mem::replace(&mut state.status, ChannelStatus::Closed)
        };
        if previous != ChannelStatus::Closed {
            tracing::info!(url = %self.inner.url, "Relay channel closed");
            self.inner.emit(ChannelEvent::Status(ChannelStatus::Closed));
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if let Some(pending) = state.reconnect.take() {
            pending.abort();
        }
        if let Some(connection) = state.connection.take() {
            connection.abort();
        }
    }
}

#[async_trait]
impl SignalSink for SignalingChannel {
    fn send(&self, message: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&message)?;
        let state = self.inner.state.lock();
        match (&state.status, &state.outbound) {
            (ChannelStatus::Connected, Some(outbound)) => outbound
                .send(WsMessage::Text(json.into()))
                .map_err(|_| Error::NotConnected),
            _ => Err(Error::NotConnected),
        }
    }

    async fn close(&self) {
        self.disconnect();
    }
}

impl ChannelInner {
    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(ManagerEvent::Channel(event));
    }

    fn start(self: &Arc<Self>, scheduled: bool) {
        let generation = {
            let mut state = self.state.lock();
            if scheduled {
                state.reconnect = None;
                if state.intentional_close {
                    return;
                }
            }
            if matches!(
                state.status,
                ChannelStatus::Connecting | ChannelStatus::Connected
            ) {
                tracing::debug!(url = %self.url, "Relay channel already open or opening");
                return;
            }
            if let Some(pending) = state.reconnect.take() {
                pending.abort();
            }
            state.intentional_close = false;
            state.status = ChannelStatus::Connecting;
            state.generation += 1;
            state.generation
        };

        self.emit(ChannelEvent::Status(ChannelStatus::Connecting));

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.run(generation).await });

        let mut state = self.state.lock();
        if state.generation == generation {
            state.connection = Some(task.abort_handle());
        }
    }

    async fn run(self: Arc<Self>, generation: u64) {
        tracing::info!(url = %self.url, "Connecting to relay");

        let (code, reason) = match connect_async(self.url.as_str()).await {
            Ok((ws, _)) => self.pump(ws, generation).await,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "Relay connection failed");
                (ABNORMAL_CLOSURE, e.to_string())
            }
        };

        self.on_closed(generation, code, reason);
    }

    async fn pump(&self, ws: RelayStream, generation: u64) -> (u16, String) {
        let (mut ws_sender, mut ws_receiver) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        {
            let mut state = self.state.lock();
            if state.generation != generation || state.intentional_close {
                return (NORMAL_CLOSURE, "closed while connecting".to_string());
            }
            state.status = ChannelStatus::Connected;
            state.outbound = Some(tx);
        }
        tracing::info!(url = %self.url, "Relay channel open");
        self.emit(ChannelEvent::Status(ChannelStatus::Connected));

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, WsMessage::Close(_));
                if ws_sender.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        let mut close = (ABNORMAL_CLOSURE, "connection lost".to_string());
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => self.emit(ChannelEvent::Message(msg)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping unparseable relay message");
                    }
                },
                Ok(WsMessage::Close(frame)) => {
                    close = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
                        None => (NO_STATUS, String::new()),
                    };
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "Relay WebSocket error");
                    close = (ABNORMAL_CLOSURE, e.to_string());
                    break;
                }
            }
        }

        writer.abort();
        close
    }

    fn on_closed(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        let (disposition, status) = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.outbound = None;
            state.connection = None;

            let disposition = CloseDisposition::classify(code, state.intentional_close);
            let status = if disposition.reconnects() {
                let inner = Arc::clone(self);
                let delay = self.reconnect_delay;
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.start(true);
                });
                state.reconnect = Some(task.abort_handle());
                ChannelStatus::Reconnecting
            } else {
                ChannelStatus::Closed
            };
            state.status = status;
            (disposition, status)
        };

        match disposition {
            CloseDisposition::Reconnect => tracing::warn!(
                url = %self.url,
                code,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "Relay channel dropped; reconnect scheduled"
            ),
            CloseDisposition::ServerError | CloseDisposition::RoomNotFound => {
                tracing::error!(url = %self.url, code, reason = %reason, "Relay closed the room")
            }
            CloseDisposition::Normal | CloseDisposition::Intentional => {
                tracing::info!(url = %self.url, code, "Relay channel closed")
            }
        }

        self.emit(ChannelEvent::Closed {
            code,
            reason,
            disposition,
        });
        self.emit(ChannelEvent::Status(status));
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use super::*;
    use crate::types::{ParticipantId, SessionDescription};

    const WAIT: Duration = Duration::from_secs(5);

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/room/42/", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    async fn next_channel_event(rx: &mut mpsc::UnboundedReceiver<ManagerEvent>) -> ChannelEvent {
        loop {
            match timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
                ManagerEvent::Channel(event) => return event,
                _ => continue,
            }
        }
    }

    async fn wait_for_status(rx: &mut mpsc::UnboundedReceiver<ManagerEvent>, wanted: ChannelStatus) {
        loop {
            if let ChannelEvent::Status(status) = next_channel_event(rx).await {
                if status == wanted {
                    return;
                }
            }
        }
    }

    async fn wait_for_close(rx: &mut mpsc::UnboundedReceiver<ManagerEvent>) -> (u16, CloseDisposition) {
        loop {
            if let ChannelEvent::Closed {
                code, disposition, ..
            } = next_channel_event(rx).await
            {
                return (code, disposition);
            }
        }
    }

    #[test]
    fn test_close_code_classification() {
        assert_eq!(CloseDisposition::classify(1000, false), CloseDisposition::Normal);
        assert_eq!(CloseDisposition::classify(1011, false), CloseDisposition::ServerError);
        assert_eq!(CloseDisposition::classify(4004, false), CloseDisposition::RoomNotFound);
        assert_eq!(CloseDisposition::classify(1006, false), CloseDisposition::Reconnect);
        assert_eq!(CloseDisposition::classify(1001, false), CloseDisposition::Reconnect);
        assert_eq!(CloseDisposition::classify(1006, true), CloseDisposition::Intentional);
        assert!(CloseDisposition::Reconnect.reconnects());
        assert!(!CloseDisposition::RoomNotFound.reconnects());
    }

    #[tokio::test]
    async fn test_send_requires_open_channel() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = SignalingChannel::new("ws://127.0.0.1:1/ws/room/42/", WAIT, tx);
        let result = channel.send(ClientMessage::Offer {
            offer: SessionDescription::offer("v=0"),
            target_user_id: ParticipantId::from("b"),
        });
        assert_eq!(result, Err(Error::NotConnected));
        assert_eq!(channel.status(), ChannelStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_exchanges_messages_with_relay() {
        let (listener, url) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = SignalingChannel::new(url, Duration::from_millis(50), tx);
        channel.connect();
        channel.connect();

        let mut server = accept(&listener).await;
        wait_for_status(&mut rx, ChannelStatus::Connected).await;

        let hello = r#"{"type":"connection_established","userId":"a","participant_count":1,"existing_users":[]}"#;
        server.send(WsMessage::Text(hello.into())).await.unwrap();
        match next_channel_event(&mut rx).await {
            ChannelEvent::Message(ServerMessage::ConnectionEstablished { user_id, .. }) => {
                assert_eq!(user_id, Some(ParticipantId::from("a")));
            }
            other => panic!("Unexpected: {:?}", other),
        }

        channel
            .send(ClientMessage::ChatMessage {
                message: "hi".into(),
                username: "Ann".into(),
            })
            .unwrap();
        let frame = timeout(WAIT, server.next()).await.unwrap().unwrap().unwrap();
        let text = frame.into_text().unwrap();
        assert!(text.contains("\"type\":\"chat_message\""));
    }

    #[tokio::test]
    async fn test_unexpected_drop_reconnects_once() {
        let (listener, url) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = SignalingChannel::new(url, Duration::from_millis(50), tx);
        channel.connect();

        let server = accept(&listener).await;
        wait_for_status(&mut rx, ChannelStatus::Connected).await;
        drop(server);

        let (code, disposition) = wait_for_close(&mut rx).await;
        assert_eq!(code, ABNORMAL_CLOSURE);
        assert_eq!(disposition, CloseDisposition::Reconnect);

        let _second = accept(&listener).await;
        wait_for_status(&mut rx, ChannelStatus::Connected).await;
        assert_eq!(channel.status(), ChannelStatus::Connected);
    }

    #[tokio::test]
    async fn test_room_not_found_does_not_reconnect() {
        let (listener, url) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = SignalingChannel::new(url, Duration::from_millis(50), tx);
        channel.connect();

        let mut server = accept(&listener).await;
        server
            .close(Some(CloseFrame {
                code: CloseCode::from(ROOM_NOT_FOUND),
                reason: "Room not found".into(),
            }))
            .await
            .unwrap();

        let (code, disposition) = wait_for_close(&mut rx).await;
        assert_eq!(code, ROOM_NOT_FOUND);
        assert_eq!(disposition, CloseDisposition::RoomNotFound);
        assert_eq!(channel.status(), ChannelStatus::Closed);
        assert!(!channel.reconnect_pending());

        let again = timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(again.is_err(), "channel reconnected after 4004");
    }

    #[tokio::test]
    async fn test_intentional_close_cancels_pending_reconnect() {
        let (listener, url) = listener().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = SignalingChannel::new(url, Duration::from_millis(200), tx);
        channel.connect();

        let server = accept(&listener).await;
        wait_for_status(&mut rx, ChannelStatus::Connected).await;
        drop(server);
        wait_for_status(&mut rx, ChannelStatus::Reconnecting).await;
        assert!(channel.reconnect_pending());

        channel.disconnect();
        assert_eq!(channel.status(), ChannelStatus::Closed);
        assert!(!channel.reconnect_pending());

        let again = timeout(Duration::from_millis(600), listener.accept()).await;
        assert!(again.is_err(), "channel reconnected after intentional close");
    }

    #[tokio::test]
    async fn test_connect_failure_schedules_reconnect() {
        let (listener, url) = listener().await;
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = SignalingChannel::new(url, Duration::from_secs(60), tx);
        channel.connect();

        let (code, disposition) = wait_for_close(&mut rx).await;
        assert_eq!(code, ABNORMAL_CLOSURE);
        assert_eq!(disposition, CloseDisposition::Reconnect);
        assert!(channel.reconnect_pending());
        channel.disconnect();
    }
}
