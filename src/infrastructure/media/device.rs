/// Local capture devices

use super::stream::{CameraFacing, MediaStream, MediaTrack};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Video capture floor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub min_width: u32,
    pub min_height: u32,
    pub min_frame_rate: u32,
    pub facing: CameraFacing,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            min_width: 500,
            min_height: 300,
            min_frame_rate: 30,
            facing: CameraFacing::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: None,
        }
    }

    pub fn audio_video() -> Self {
        Self {
            audio: true,
            video: Some(VideoConstraints::default()),
        }
    }
}

/// Source of local audio/video
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a stream satisfying `constraints`
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream>;
}

/// Device provider for headless hosts
///
/// Produces tracks without touching capture hardware; the peer connection
/// still negotiates them so the remote side sees a full audio/video call.
#[derive(Debug, Clone, Default)]
pub struct SyntheticDevices;

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream> {
        if !constraints.audio && constraints.video.is_none() {
            return Err(DomainError::MediaAcquisition(
                "at least one of audio or video must be requested".to_string(),
            ));
        }

        let stream_id = Uuid::new_v4().to_string();
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::audio(format!("audio-{}", stream_id)));
        }
        if let Some(video) = &constraints.video {
            tracks.push(MediaTrack::video(format!("video-{}", stream_id), video.facing));
        }

        info!("Acquired synthetic local stream {} ({} tracks)", stream_id, tracks.len());
        Ok(MediaStream::new(stream_id, tracks))
    }
}
