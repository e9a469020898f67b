//! WebRTC peer connection management

pub mod peer;
pub mod rtc;
pub mod session_manager;

pub use peer::{IceServer, PeerConnection, PeerConnector, PeerEvent, PeerEventSink};
pub use rtc::{RtcPeerConnection, RtcPeerConnector};
pub use session_manager::PeerSessionManager;
