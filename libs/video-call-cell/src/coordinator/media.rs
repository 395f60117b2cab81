// libs/video-call-cell/src/coordinator/media.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { audio: true, video: true }
    }
}

/// Acquisition failures are kept apart from transport failures so the caller
/// can tell "grant permission" from "network issue".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("camera/microphone permission denied")]
    PermissionDenied,
    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// A local capture track. Implementations wrap whatever the platform hands out.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Releases the underlying device. Irreversible.
    fn stop(&self);
    fn is_live(&self) -> bool;
}

/// Capability to open camera and microphone.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProvider: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError>;
}

/// Set of local tracks exclusively owned by one call session.
pub struct LocalStream {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl LocalStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// Flips the first track of `kind` and returns its new enabled flag.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        self.first_of(kind).map(|track| {
            let enabled = !track.is_enabled();
            track.set_enabled(enabled);
            enabled
        })
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.set_enabled(false);
            track.stop();
        }
    }

    fn first_of(&self, kind: TrackKind) -> Option<&Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }
}

impl std::fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tracks.iter().map(|t| (t.id().to_string(), t.kind())))
            .finish()
    }
}
