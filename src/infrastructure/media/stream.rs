//! Media stream and track handles
//!
//! Local tracks are produced by a [`MediaDevices`](super::device::MediaDevices)
//! implementation and remote tracks by the peer connection. Both are shared
//! as `Arc<MediaTrack>` so the controller and the transport see the same
//! enabled/stopped flags.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Camera facing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    User,
    Environment,
}

impl CameraFacing {
    pub fn flipped(self) -> Self {
        match self {
            CameraFacing::User => CameraFacing::Environment,
            CameraFacing::Environment => CameraFacing::User,
        }
    }
}

/// A single audio or video track
#[derive(Debug)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    facing: Mutex<Option<CameraFacing>>,
}

impl MediaTrack {
    pub fn audio(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(id.into(), TrackKind::Audio, None))
    }

    pub fn video(id: impl Into<String>, facing: CameraFacing) -> Arc<Self> {
        Arc::new(Self::new(id.into(), TrackKind::Video, Some(facing)))
    }

    /// Track received from the remote peer; facing is unknown
    pub fn remote(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self::new(id.into(), kind, None))
    }

    fn new(id: String, kind: TrackKind, facing: Option<CameraFacing>) -> Self {
        Self {
            id,
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            facing: Mutex::new(facing),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopped {:?} track {}", self.kind, self.id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn facing(&self) -> Option<CameraFacing> {
        self.facing.lock().map(|f| *f).unwrap_or(None)
    }

    /// Flip the camera; `None` for tracks without a facing mode
    pub fn switch_facing(&self) -> Option<CameraFacing> {
        let mut facing = self.facing.lock().ok()?;
        let next = facing.map(CameraFacing::flipped)?;
        *facing = Some(next);
        Some(next)
    }
}

/// An ordered set of tracks under one stream id
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn has_video(&self) -> bool {
        self.tracks_of(TrackKind::Video).next().is_some()
    }

    /// Add a track unless one with the same id is already present
    pub fn add_track(&mut self, track: Arc<MediaTrack>) {
        if !self.tracks.iter().any(|t| t.id() == track.id()) {
            self.tracks.push(track);
        }
    }

    /// Flip `enabled` on every track of `kind`, returning the new value
    ///
    /// `None` if the stream carries no track of that kind.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let enabled = !self.tracks_of(kind).next()?.is_enabled();
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
        }
        Some(enabled)
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_stream() -> MediaStream {
        MediaStream::new(
            "local",
            vec![MediaTrack::audio("mic"), MediaTrack::video("cam", CameraFacing::User)],
        )
    }

    #[test]
    fn test_toggle_flips_only_matching_kind() {
        let stream = local_stream();
        assert_eq!(stream.toggle(TrackKind::Audio), Some(false));
        assert!(!stream.tracks()[0].is_enabled());
        assert!(stream.tracks()[1].is_enabled());
        assert_eq!(stream.toggle(TrackKind::Audio), Some(true));
    }

    #[test]
    fn test_toggle_without_track_is_none() {
        let stream = MediaStream::new("audio-only", vec![MediaTrack::audio("mic")]);
        assert_eq!(stream.toggle(TrackKind::Video), None);
        assert!(!stream.has_video());
    }

    #[test]
    fn test_switch_facing() {
        let stream = local_stream();
        assert_eq!(stream.tracks()[1].switch_facing(), Some(CameraFacing::Environment));
        assert_eq!(stream.tracks()[1].facing(), Some(CameraFacing::Environment));
        assert_eq!(stream.tracks()[0].switch_facing(), None);
    }

    #[test]
    fn test_stop_all_and_dedup() {
        let mut stream = local_stream();
        let cam = stream.tracks()[1].clone();
        stream.add_track(cam);
        assert_eq!(stream.tracks().len(), 2);

        stream.stop_all();
        assert!(stream.tracks().iter().all(|t| t.is_stopped()));
    }
}
