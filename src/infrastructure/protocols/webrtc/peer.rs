/// Peer connection seam
///
/// The call controller only talks to these traits. [`super::rtc`] binds them
/// to webrtc-rs; tests substitute in-memory fakes.

use crate::domain::shared::result::Result;
use crate::domain::signaling::{IceCandidate, SessionDescription};
use crate::infrastructure::media::MediaStream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Asynchronous notifications raised by a peer connection
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate was gathered and should be trickled to the peer
    CandidateDiscovered(IceCandidate),
    /// Remote media arrived; carries the stream the track belongs to
    TrackReceived(MediaStream),
}

/// Callback invoked from the connection's own tasks
pub type PeerEventSink = Arc<dyn Fn(PeerEvent) + Send + Sync>;

/// Factory for peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>>;
}

/// One negotiated peer-to-peer media session
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach every track of a local stream
    async fn add_stream(&self, stream: &MediaStream) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Stop every transceiver; never fails
    async fn stop_transceivers(&self);

    async fn close(&self) -> Result<()>;
}
