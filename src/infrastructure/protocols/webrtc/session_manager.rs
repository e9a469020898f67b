/// Peer Session Manager
///
/// Owns the single peer connection and the local/remote streams of the
/// current call. Every await point is followed by a generation check so that
/// a teardown racing an in-flight operation wins: the late result is
/// released instead of being installed.

use super::peer::{IceServer, PeerConnection, PeerConnector, PeerEventSink};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::signaling::{IceCandidate, SessionDescription};
use crate::infrastructure::media::{
    CameraFacing, MediaConstraints, MediaDevices, MediaStream, TrackKind,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Default)]
struct PeerSlot {
    handle: Option<Arc<dyn PeerConnection>>,
    local_stream: Option<MediaStream>,
    remote_stream: Option<MediaStream>,
}

pub struct PeerSessionManager {
    connector: Arc<dyn PeerConnector>,
    devices: Arc<dyn MediaDevices>,
    ice_servers: Vec<IceServer>,
    slot: Mutex<PeerSlot>,
    generation: AtomicU64,
}

impl PeerSessionManager {
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        devices: Arc<dyn MediaDevices>,
        ice_servers: Vec<IceServer>,
    ) -> Self {
        Self {
            connector,
            devices,
            ice_servers,
            slot: Mutex::new(PeerSlot::default()),
            generation: AtomicU64::new(0),
        }
    }

    fn slot(&self) -> Result<MutexGuard<'_, PeerSlot>> {
        self.slot
            .lock()
            .map_err(|_| DomainError::Internal("peer session lock poisoned".to_string()))
    }

    /// Current teardown generation
    ///
    /// Operations take the generation they were started under and cancel
    /// themselves once a teardown has moved past it.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Connection of the given generation, checked under the slot lock
    fn current_handle(&self, generation: u64, what: &str) -> Result<Arc<dyn PeerConnection>> {
        let slot = self.slot()?;
        if self.generation() != generation {
            debug!("{} superseded by teardown", what);
            return Err(DomainError::Cancelled(what.to_string()));
        }
        slot.handle
            .clone()
            .ok_or_else(|| DomainError::Negotiation("no peer connection".to_string()))
    }

    fn ensure_current(&self, generation: u64, what: &str) -> Result<()> {
        if self.generation() != generation {
            debug!("{} superseded by teardown", what);
            return Err(DomainError::Cancelled(what.to_string()));
        }
        Ok(())
    }

    pub fn has_handle(&self) -> bool {
        self.slot().map(|s| s.handle.is_some()).unwrap_or(false)
    }

    /// Create the peer connection for a new call
    pub async fn initialize(&self, generation: u64, events: PeerEventSink) -> Result<()> {
        self.ensure_current(generation, "initialize")?;
        if self.has_handle() {
            return Err(DomainError::Conflict("peer connection already exists".to_string()));
        }

        let connection = self.connector.connect(&self.ice_servers, events).await?;

        // Checked and installed under one lock so teardown cannot slip between
        let installed = {
            let mut slot = self.slot()?;
            if self.generation() == generation {
                slot.handle = Some(connection.clone());
                true
            } else {
                false
            }
        };
        if !installed {
            if let Err(e) = connection.close().await {
                debug!("Closing superseded connection failed: {}", e);
            }
            return Err(DomainError::Cancelled("initialize".to_string()));
        }

        info!("Peer connection initialized ({} ICE servers)", self.ice_servers.len());
        Ok(())
    }

    /// Acquire local media and attach it to the connection
    pub async fn acquire_local_media(&self, generation: u64, with_video: bool) -> Result<MediaStream> {
        self.ensure_current(generation, "acquire_local_media")?;
        let constraints = if with_video {
            MediaConstraints::audio_video()
        } else {
            MediaConstraints::audio_only()
        };

        let stream = self
            .devices
            .get_user_media(&constraints)
            .await
            .map_err(|e| match e {
                DomainError::MediaAcquisition(_) => e,
                other => DomainError::MediaAcquisition(other.to_string()),
            })?;

        let installed = {
            let mut slot = self.slot()?;
            if self.generation() == generation {
                slot.local_stream = Some(stream.clone());
                Some(slot.handle.clone())
            } else {
                None
            }
        };
        let Some(handle) = installed else {
            stream.stop_all();
            return Err(DomainError::Cancelled("acquire_local_media".to_string()));
        };
        if let Some(handle) = handle {
            handle.add_stream(&stream).await?;
        }
        self.ensure_current(generation, "acquire_local_media")?;

        Ok(stream)
    }

    /// Create an offer and install it as the local description
    pub async fn create_offer(&self, generation: u64) -> Result<SessionDescription> {
        let handle = self.current_handle(generation, "create_offer")?;
        let offer = handle.create_offer().await?;
        self.ensure_current(generation, "create_offer")?;
        handle.set_local_description(&offer).await?;
        self.ensure_current(generation, "create_offer")?;
        Ok(offer)
    }

    /// Apply a remote offer, then create and install the answer
    pub async fn create_answer(
        &self,
        generation: u64,
        remote_offer: &SessionDescription,
    ) -> Result<SessionDescription> {
        let handle = self.current_handle(generation, "create_answer")?;
        handle.set_remote_description(remote_offer).await?;
        self.ensure_current(generation, "create_answer")?;
        let answer = handle.create_answer().await?;
        self.ensure_current(generation, "create_answer")?;
        handle.set_local_description(&answer).await?;
        self.ensure_current(generation, "create_answer")?;
        Ok(answer)
    }

    pub async fn apply_remote_description(&self, generation: u64, description: &SessionDescription) -> Result<()> {
        let handle = self.current_handle(generation, "apply_remote_description")?;
        handle.set_remote_description(description).await?;
        self.ensure_current(generation, "apply_remote_description")
    }

    /// Add a remote candidate
    ///
    /// Candidate failures are logged and ignored. `Cancelled` means a
    /// teardown has happened since `generation` and the caller should stop
    /// applying the rest of its batch.
    pub async fn apply_remote_candidate(&self, generation: u64, candidate: &IceCandidate) -> Result<()> {
        let handle = match self.current_handle(generation, "apply_remote_candidate") {
            Ok(handle) => handle,
            Err(e @ DomainError::Cancelled(_)) => return Err(e),
            Err(_) => {
                debug!("Dropping remote candidate without a peer connection");
                return Ok(());
            }
        };
        if let Err(e) = handle.add_ice_candidate(candidate).await {
            warn!("Failed to add remote ICE candidate: {}", e);
        }
        Ok(())
    }

    /// Merge a received remote track into the remote stream
    ///
    /// Returns true when this is the first remote media of the call.
    pub fn set_remote_stream(&self, stream: MediaStream) -> bool {
        let Ok(mut slot) = self.slot() else {
            return false;
        };
        match slot.remote_stream.as_mut() {
            Some(existing) if existing.id() == stream.id() => {
                for track in stream.tracks() {
                    existing.add_track(track.clone());
                }
                false
            }
            Some(_) => {
                debug!("Ignoring tracks of secondary remote stream {}", stream.id());
                false
            }
            None => {
                slot.remote_stream = Some(stream);
                true
            }
        }
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.slot().ok()?.local_stream.clone()
    }

    pub fn remote_stream(&self) -> Option<MediaStream> {
        self.slot().ok()?.remote_stream.clone()
    }

    /// Flip the microphone; `None` without a local audio track
    pub fn toggle_mic(&self) -> Option<bool> {
        self.local_stream()?.toggle(TrackKind::Audio)
    }

    /// Flip the camera; `None` without a local video track
    pub fn toggle_camera(&self) -> Option<bool> {
        self.local_stream()?.toggle(TrackKind::Video)
    }

    pub fn switch_camera(&self) -> Option<CameraFacing> {
        let stream = self.local_stream()?;
        let track = stream.tracks_of(TrackKind::Video).next()?.clone();
        track.switch_facing()
    }

    /// Release everything held for the current call
    ///
    /// Safe to call repeatedly; in-flight operations started before this
    /// call observe the generation bump and discard their results.
    pub async fn teardown(&self) {
        let slot = match self.slot() {
            Ok(mut slot) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                std::mem::take(&mut *slot)
            }
            Err(_) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        if let Some(stream) = &slot.local_stream {
            stream.stop_all();
        }
        if let Some(stream) = &slot.remote_stream {
            stream.stop_all();
        }
        if let Some(handle) = slot.handle {
            handle.stop_transceivers().await;
            if let Err(e) = handle.close().await {
                warn!("Peer connection close failed: {}", e);
            }
            info!("Peer connection torn down");
        }
    }
}
