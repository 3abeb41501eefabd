//! # Local Media
//!
//! The local stream shared by every peer session.
//!
//! ```text
//!                  mark_ready()
//!   Acquiring ───────────────► Ready ──── stop() ───► Stopped
//!      │                        (one-shot)
//!      │ denied / no device
//!      ▼
//!   Failed  (pending work stays parked)
//! ```
//!
//! Tracks are handles: cloning a [`LocalTrack`] shares its enabled and live
//! flags, so toggling a track here is seen by every connection the track was
//! attached to. Screen sharing swaps the outgoing video track without
//! touching the camera track, which is restored when sharing stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::events::ManagerEvent;
use crate::types::TrackKind;

// ============================================================================
// TRACKS AND STREAMS
// ============================================================================

/// Handle to a local capture track
#[derive(Debug, Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
}

impl LocalTrack {
    /// Create an enabled, live track
    pub fn new(id: impl Into<String>, kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Track id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Audio or video
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Device label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the track currently sends media
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Mute or unmute
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether the capture is still running
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Stop capture; irreversible
    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// A captured local stream
#[derive(Debug, Clone, Default)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    /// Build a stream from its tracks
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Stream id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All tracks
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// First track of a kind
    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Stop every track
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Capture constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    /// Capture audio
    pub audio: bool,
    /// Capture video
    pub video: bool,
    /// Preferred video width
    pub ideal_width: u32,
    /// Preferred video height
    pub ideal_height: u32,
    /// Audio echo cancellation
    pub echo_cancellation: bool,
    /// Audio noise suppression
    pub noise_suppression: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            ideal_width: 1280,
            ideal_height: 720,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Camera/microphone capability
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Capture a stream matching the constraints
    ///
    /// Permission refusal must map to [`Error::MediaPermissionDenied`] and a
    /// missing device to [`Error::NoMediaDevice`].
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalStream>;
}

// ============================================================================
// LOCAL MEDIA SOURCE
// ============================================================================

/// Readiness of the local stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    /// Not requested yet
    Idle,
    /// Acquisition in flight
    Acquiring,
    /// Stream available
    Ready,
    /// Acquisition failed; never becomes ready
    Failed,
    /// Stopped by teardown
    Stopped,
}

/// Owner of the local stream for one room visit
#[derive(Debug)]
pub struct LocalMediaSource {
    state: MediaState,
    stream: Option<LocalStream>,
    screen: Option<LocalTrack>,
}

impl Default for LocalMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalMediaSource {
    /// Create an idle source
    pub fn new() -> Self {
        Self {
            state: MediaState::Idle,
            stream: None,
            screen: None,
        }
    }

    /// Current state
    pub fn state(&self) -> MediaState {
        self.state
    }

    /// Whether sessions may be created
    pub fn is_ready(&self) -> bool {
        self.state == MediaState::Ready
    }

    /// The captured stream
    pub fn stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    /// Whether a screen track replaces the camera
    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Request capture once
    ///
    /// The result is posted to the event loop as [`ManagerEvent::Media`].
    /// Returns `false` if capture was already requested.
    pub fn acquire(
        &mut self,
        devices: Arc<dyn MediaDevices>,
        constraints: MediaConstraints,
        events: mpsc::UnboundedSender<ManagerEvent>,
    ) -> bool {
        if self.state != MediaState::Idle {
            return false;
        }
        self.state = MediaState::Acquiring;
        tokio::spawn(async move {
            let result = devices.acquire(&constraints).await;
            let _ = events.send(ManagerEvent::Media(result));
        });
        true
    }

    /// Store the stream; `true` only on the first transition to ready
    pub fn mark_ready(&mut self, stream: LocalStream) -> bool {
        match self.state {
            MediaState::Idle | MediaState::Acquiring => {
                self.stream = Some(stream);
                self.state = MediaState::Ready;
                true
            }
            MediaState::Stopped => {
                // Capture finished after teardown; release it right away.
                stream.stop();
                false
            }
            MediaState::Ready | MediaState::Failed => false,
        }
    }

    /// Record a failed acquisition
    pub fn mark_failed(&mut self) {
        if matches!(self.state, MediaState::Idle | MediaState::Acquiring) {
            self.state = MediaState::Failed;
        }
    }

    /// Tracks to attach to a new connection
    ///
    /// The screen track stands in for the camera while sharing.
    pub fn outgoing_tracks(&self) -> Vec<LocalTrack> {
        let Some(stream) = &self.stream else {
            return Vec::new();
        };
        stream
            .tracks()
            .iter()
            .map(|track| match (&self.screen, track.kind()) {
                (Some(screen), TrackKind::Video) => screen.clone(),
                _ => track.clone(),
            })
            .collect()
    }

    /// Flip a track's enabled flag; returns the new value
    pub fn toggle_track(&mut self, kind: TrackKind) -> Result<bool> {
        let stream = self.stream.as_ref().ok_or(Error::MediaNotReady)?;
        let track = stream.track(kind).ok_or(Error::NoMediaDevice)?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        Ok(enabled)
    }

    /// Substitute a screen track for the outgoing video
    ///
    /// Any previous screen track is stopped.
    pub fn replace_video_track(&mut self, track: LocalTrack) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::MediaNotReady);
        }
        if let Some(previous) = self.screen.replace(track) {
            previous.stop();
        }
        Ok(())
    }

    /// End screen sharing and return the camera track to send again
    pub fn restore_camera(&mut self) -> Option<LocalTrack> {
        let screen = self.screen.take()?;
        screen.stop();
        self.stream
            .as_ref()
            .and_then(|s| s.track(TrackKind::Video))
            .cloned()
    }

    /// Halt every track; the source never becomes ready again
    pub fn stop(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        if let Some(stream) = &self.stream {
            stream.stop();
        }
        self.state = MediaState::Stopped;
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_stream() -> LocalStream {
        LocalStream::new(
            "local",
            vec![
                LocalTrack::new("mic", TrackKind::Audio, "Microphone"),
                LocalTrack::new("cam", TrackKind::Video, "Camera"),
            ],
        )
    }

    #[test]
    fn test_mark_ready_is_one_shot() {
        let mut media = LocalMediaSource::new();
        assert!(!media.is_ready());
        assert!(media.mark_ready(camera_stream()));
        assert!(media.is_ready());
        assert!(!media.mark_ready(camera_stream()));
    }

    #[test]
    fn test_failed_never_becomes_ready() {
        let mut media = LocalMediaSource::new();
        media.mark_failed();
        assert!(!media.mark_ready(camera_stream()));
        assert_eq!(media.state(), MediaState::Failed);
        assert!(media.outgoing_tracks().is_empty());
    }

    #[test]
    fn test_toggle_track_shares_state_with_clones() {
        let mut media = LocalMediaSource::new();
        media.mark_ready(camera_stream());
        let attached = media.outgoing_tracks();

        assert!(!media.toggle_track(TrackKind::Audio).unwrap());
        assert!(!attached[0].is_enabled());
        assert!(attached[1].is_enabled());
        assert!(media.toggle_track(TrackKind::Audio).unwrap());
    }

    #[test]
    fn test_toggle_before_ready_fails() {
        let mut media = LocalMediaSource::new();
        assert_eq!(media.toggle_track(TrackKind::Video), Err(Error::MediaNotReady));
    }

    #[test]
    fn test_screen_share_swaps_outgoing_video() {
        let mut media = LocalMediaSource::new();
        media.mark_ready(camera_stream());

        let screen = LocalTrack::new("screen", TrackKind::Video, "Screen");
        media.replace_video_track(screen.clone()).unwrap();
        let ids: Vec<_> = media
            .outgoing_tracks()
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        assert_eq!(ids, vec!["mic", "screen"]);

        let camera = media.restore_camera().unwrap();
        assert_eq!(camera.id(), "cam");
        assert!(!screen.is_live());
        assert!(!media.is_screen_sharing());
        assert!(media.restore_camera().is_none());
    }

    #[test]
    fn test_stop_halts_all_tracks() {
        let mut media = LocalMediaSource::new();
        media.mark_ready(camera_stream());
        let tracks = media.outgoing_tracks();
        media.stop();
        assert!(tracks.iter().all(|t| !t.is_live()));
        assert!(!media.is_ready());
    }

    #[test]
    fn test_capture_after_stop_is_released() {
        let mut media = LocalMediaSource::new();
        media.stop();
        let late = camera_stream();
        assert!(!media.mark_ready(late.clone()));
        assert!(late.tracks().iter().all(|t| !t.is_live()));
    }
}
