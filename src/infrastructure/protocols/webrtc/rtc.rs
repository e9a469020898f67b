/// webrtc-rs binding for the peer connection seam

use super::peer::{IceServer, PeerConnection, PeerConnector, PeerEvent, PeerEventSink};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::infrastructure::media::{MediaStream, MediaTrack, TrackKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn negotiation(e: webrtc::Error) -> DomainError {
    DomainError::Negotiation(e.to_string())
}

fn to_rtc_description(description: &SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = description.sdp.clone();
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
    }
    .map_err(negotiation)
}

/// Builds a fresh webrtc-rs API (codecs + interceptors) per connection
#[derive(Debug, Clone, Default)]
pub struct RtcPeerConnector;

#[async_trait]
impl PeerConnector for RtcPeerConnector {
    async fn connect(
        &self,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(negotiation)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(negotiation)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone().unwrap_or_default(),
                    credential: s.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(negotiation)?);

        let candidate_sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = candidate_sink.clone();
            Box::pin(async move {
                let Some(c) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match c.to_json() {
                    Ok(init) => sink(PeerEvent::CandidateDiscovered(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_m_line_index: init.sdp_mline_index,
                    })),
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        pc.on_peer_connection_state_change(Box::new(|state: RTCPeerConnectionState| {
            info!("Peer connection state changed: {}", state);
            Box::pin(async {})
        }));

        let track_sink = events;
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let sink = track_sink.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                info!(
                    "Remote {:?} track {} received ({})",
                    kind,
                    track.id(),
                    track.codec().capability.mime_type
                );

                let stream = MediaStream::new(
                    track.stream_id(),
                    vec![MediaTrack::remote(track.id(), kind)],
                );
                sink(PeerEvent::TrackReceived(stream));

                // Drain RTP so the interceptors keep flowing
                tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {}
                    debug!("Remote track {} ended", track.id());
                });
            })
        }));

        Ok(Arc::new(RtcPeerConnection { inner: pc }))
    }
}

/// Wraps an `RTCPeerConnection`
pub struct RtcPeerConnection {
    inner: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn add_stream(&self, stream: &MediaStream) -> Result<()> {
        for track in stream.tracks() {
            let mime_type = match track.kind() {
                TrackKind::Audio => MIME_TYPE_OPUS,
                TrackKind::Video => MIME_TYPE_VP8,
            };
            let sample_track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                track.id().to_string(),
                stream.id().to_string(),
            ));

            self.inner
                .add_track(sample_track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(negotiation)?;

            debug!("Added local {:?} track {}", track.kind(), track.id());
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.inner.create_offer(None).await.map_err(negotiation)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.inner.create_answer(None).await.map_err(negotiation)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: &SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.inner
            .set_local_description(description)
            .await
            .map_err(negotiation)
    }

    async fn set_remote_description(&self, description: &SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.inner
            .set_remote_description(description)
            .await
            .map_err(negotiation)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_m_line_index,
            ..Default::default()
        };
        self.inner.add_ice_candidate(init).await.map_err(negotiation)
    }

    async fn stop_transceivers(&self) {
        for transceiver in self.inner.get_transceivers().await {
            if let Err(e) = transceiver.stop().await {
                debug!("Transceiver stop failed: {}", e);
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await.map_err(negotiation)
    }
}
