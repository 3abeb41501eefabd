//! # Call Handle
//!
//! Application-facing entry point. Starting a call wires the relay channel,
//! the session manager and media capture together and spawns the event loop;
//! the returned [`CallHandle`] posts commands into it and hands out event
//! subscriptions.
//!
//! ```ignore
//! let handle = CallHandle::join(config, &room, backends);
//! let mut events = handle.subscribe();
//!
//! while let Ok(event) = events.recv().await {
//!     if let CallEvent::RemoteTrack { peer_id, track } = event {
//!         render(peer_id, track);
//!     }
//! }
//!
//! handle.leave().await;
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::CallConfig;
use crate::directory::RoomDirectory;
use crate::error::{Error, Result};
use crate::event_loop::run_event_loop;
use crate::events::{CallCommand, CallEvent, ManagerEvent};
use crate::manager::PeerSessionManager;
use crate::media::{LocalTrack, MediaDevices};
use crate::signaling::{SignalSink, SignalingChannel};
use crate::transport::PeerConnectionFactory;
use crate::types::{RoomId, TrackKind};

/// Platform capabilities a call runs on
#[derive(Clone)]
pub struct CallBackends {
    /// Creates peer connections
    pub connections: Arc<dyn PeerConnectionFactory>,
    /// Captures local media
    pub media: Arc<dyn MediaDevices>,
    /// Membership service, if the deployment has one
    pub directory: Option<Arc<dyn RoomDirectory>>,
}

/// Handle to a running call
pub struct CallHandle {
    loop_tx: mpsc::UnboundedSender<ManagerEvent>,
    event_tx: broadcast::Sender<CallEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CallHandle {
    /// Join `room` through the relay named in `config`
    ///
    /// Media capture and the relay connection start concurrently; peers
    /// seen before capture completes are negotiated once it does.
    pub fn join(config: CallConfig, room: &RoomId, backends: CallBackends) -> Self {
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let url = config.room_url(room);
        tracing::info!(room = %room, url = %url, "Joining call");

        let channel = Arc::new(SignalingChannel::new(
            url,
            config.reconnect_delay(),
            loop_tx.clone(),
        ));
        channel.connect();

        Self::start(config, Some(room.clone()), backends, channel, loop_tx, loop_rx)
    }

    /// Run a call over a caller-supplied signaling sink
    ///
    /// Inbound relay traffic must be posted into `loop_tx` as
    /// [`ManagerEvent::Channel`] events.
    pub fn with_sink(
        config: CallConfig,
        backends: CallBackends,
        sink: Arc<dyn SignalSink>,
        loop_tx: mpsc::UnboundedSender<ManagerEvent>,
        loop_rx: mpsc::UnboundedReceiver<ManagerEvent>,
    ) -> Self {
        Self::start(config, None, backends, sink, loop_tx, loop_rx)
    }

    fn start(
        config: CallConfig,
        room: Option<RoomId>,
        backends: CallBackends,
        sink: Arc<dyn SignalSink>,
        loop_tx: mpsc::UnboundedSender<ManagerEvent>,
        loop_rx: mpsc::UnboundedReceiver<ManagerEvent>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let mut manager = PeerSessionManager::new(
            config,
            backends.connections,
            sink,
            loop_tx.clone(),
            event_tx.clone(),
        );
        if let (Some(directory), Some(room)) = (backends.directory, room) {
            manager = manager.with_directory(directory, room);
        }
        manager.acquire_media(backends.media);

        let task = tokio::spawn(run_event_loop(manager, loop_rx));

        Self {
            loop_tx,
            event_tx,
            task: Mutex::new(Some(task)),
        }
    }

    /// Subscribe to call events
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// Whether the event loop is still running
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Mute or unmute the microphone
    pub fn toggle_audio(&self) -> Result<()> {
        self.command(CallCommand::ToggleTrack(TrackKind::Audio))
    }

    /// Turn the camera off or on
    pub fn toggle_video(&self) -> Result<()> {
        self.command(CallCommand::ToggleTrack(TrackKind::Video))
    }

    /// Send `track` to every peer in place of the camera
    pub fn share_screen(&self, track: LocalTrack) -> Result<()> {
        self.command(CallCommand::ShareScreen(track))
    }

    /// Send the camera again
    pub fn stop_screen_share(&self) -> Result<()> {
        self.command(CallCommand::StopScreenShare)
    }

    /// Send a chat message to the room
    pub fn send_chat(&self, message: impl Into<String>, username: impl Into<String>) -> Result<()> {
        self.command(CallCommand::SendChat {
            message: message.into(),
            username: username.into(),
        })
    }

    /// Leave the room and wait for teardown to finish
    pub async fn leave(&self) {
        let _ = self.loop_tx.send(ManagerEvent::Command(CallCommand::Leave));
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Call event loop panicked");
            }
        }
    }

    fn command(&self, command: CallCommand) -> Result<()> {
        self.loop_tx
            .send(ManagerEvent::Command(command))
            .map_err(|_| Error::Internal("call already ended".into()))
    }
}
