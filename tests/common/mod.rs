//! In-process fakes for driving call clients against a real relay

#![allow(dead_code)]

use async_trait::async_trait;
use peercall::application::call::{
    CallClient, CallHandle, CallParts, CallSettings, CallSnapshot, Mailbox,
};
use peercall::application::SignalingRelay;
use peercall::domain::relay::ConnectionHandle;
use peercall::domain::shared::value_objects::{RoomId, UserId};
use peercall::domain::signaling::{ClientMessage, IceCandidate, SessionDescription};
use peercall::infrastructure::media::{MediaStream, MediaTrack, SyntheticDevices, TrackKind};
use peercall::infrastructure::platform::{CallKind, CallUi, KeyValueStore, MemoryStore};
use peercall::infrastructure::protocols::webrtc::{
    IceServer, PeerConnection, PeerConnector, PeerEvent, PeerEventSink,
};
use peercall::infrastructure::transport::{
    SignalingTransport, TransportEvent, TransportEventSink,
};
use peercall::{DomainError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Transport wired straight into a relay instance
pub struct LocalTransport {
    relay: Arc<SignalingRelay>,
    handle: ConnectionHandle,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    connected: AtomicBool,
    events: TransportEventSink,
}

impl LocalTransport {
    pub async fn connect(
        relay: Arc<SignalingRelay>,
        user_id: UserId,
        events: TransportEventSink,
    ) -> Arc<Self> {
        let (handle, mut inbound) = relay.connect(user_id).await;
        let (outbound, mut queue) = mpsc::unbounded_channel::<ClientMessage>();

        // Preserve send order, like a socket would
        let pump_relay = relay.clone();
        let pump_handle = handle.clone();
        tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                pump_relay.handle(&pump_handle, message).await;
            }
        });

        let sink = events.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                sink(TransportEvent::Message(message));
            }
        });

        events(TransportEvent::Connected);
        Arc::new(Self {
            relay,
            handle,
            outbound,
            connected: AtomicBool::new(true),
            events,
        })
    }

    /// Simulate the socket dropping
    pub async fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.relay.disconnect(&self.handle).await;
        (self.events)(TransportEvent::Disconnected);
    }
}

impl SignalingTransport for LocalTransport {
    fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DomainError::TransportDisconnected("dropped".to_string()));
        }
        self.outbound
            .send(message)
            .map_err(|_| DomainError::TransportDisconnected("pump stopped".to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Peer connection that "connects" once both descriptions are installed
pub struct FakeConnection {
    label: String,
    events: PeerEventSink,
    local_set: AtomicBool,
    remote_set: AtomicBool,
    track_sent: AtomicBool,
    pub remote_candidates: AtomicUsize,
    pub closed: AtomicBool,
}

impl FakeConnection {
    fn maybe_connect(&self) {
        if self.local_set.load(Ordering::SeqCst)
            && self.remote_set.load(Ordering::SeqCst)
            && !self.track_sent.swap(true, Ordering::SeqCst)
        {
            let stream = MediaStream::new(
                format!("{}-remote", self.label),
                vec![MediaTrack::remote(format!("{}-audio", self.label), TrackKind::Audio)],
            );
            (self.events)(PeerEvent::TrackReceived(stream));
        }
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn add_stream(&self, _stream: &MediaStream) -> Result<()> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=label:{}",
            self.label
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- 2 2 IN IP4 127.0.0.1\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=label:{}",
            self.label
        )))
    }

    async fn set_local_description(&self, _description: &SessionDescription) -> Result<()> {
        self.local_set.store(true, Ordering::SeqCst);
        (self.events)(PeerEvent::CandidateDiscovered(IceCandidate {
            candidate: format!("candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host ({})", self.label),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }));
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, _description: &SessionDescription) -> Result<()> {
        self.remote_set.store(true, Ordering::SeqCst);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: &IceCandidate) -> Result<()> {
        self.remote_candidates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_transceivers(&self) {}

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    label: String,
    pub connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeConnector {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn last(&self) -> Option<Arc<FakeConnection>> {
        self.connections.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        _ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        let connection = Arc::new(FakeConnection {
            label: self.label.clone(),
            events,
            local_set: AtomicBool::new(false),
            remote_set: AtomicBool::new(false),
            track_sent: AtomicBool::new(false),
            remote_candidates: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

/// Call UI that records what it was asked to do
#[derive(Default)]
pub struct RecordingCallUi {
    pub actions: Mutex<Vec<String>>,
}

impl RecordingCallUi {
    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }
}

impl CallUi for RecordingCallUi {
    fn display_incoming_call(&self, room_id: &RoomId, caller_label: &str, kind: CallKind) {
        self.actions
            .lock()
            .unwrap()
            .push(format!("display:{}:{}:{:?}", room_id, caller_label, kind));
    }

    fn end_call(&self, room_id: &RoomId) {
        self.actions.lock().unwrap().push(format!("end:{}", room_id));
    }

    fn back_to_foreground(&self) {
        self.actions.lock().unwrap().push("foreground".to_string());
    }
}

/// One client plus the fakes behind it
pub struct TestPeer {
    pub client: CallClient,
    pub handle: CallHandle,
    pub transport: Arc<LocalTransport>,
    pub connector: Arc<FakeConnector>,
    pub call_ui: Arc<RecordingCallUi>,
    pub store: Arc<MemoryStore>,
}

pub fn fast_settings() -> CallSettings {
    CallSettings {
        video: false,
        invite_timeout: Duration::from_secs(5),
        ringing_timeout: Duration::from_secs(5),
        first_media_timeout: Duration::from_secs(5),
    }
}

pub async fn spawn_peer(relay: &Arc<SignalingRelay>, name: &str, settings: CallSettings) -> TestPeer {
    let user_id = UserId::parse(name).unwrap();
    let mailbox = Mailbox::new();
    let transport = LocalTransport::connect(relay.clone(), user_id.clone(), mailbox.transport_sink()).await;
    let connector = Arc::new(FakeConnector::new(name));
    let call_ui = Arc::new(RecordingCallUi::default());
    let store = Arc::new(MemoryStore::new());

    let client = CallClient::with_parts(
        mailbox,
        CallParts {
            user_id,
            settings,
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
            transport: transport.clone(),
            connector: connector.clone(),
            devices: Arc::new(SyntheticDevices),
            call_ui: call_ui.clone(),
            store: store.clone(),
        },
    );
    let handle = client.handle();

    TestPeer {
        client,
        handle,
        transport,
        connector,
        call_ui,
        store,
    }
}

/// Poll the client until `check` holds
pub async fn wait_for<F>(handle: &CallHandle, what: &str, check: F) -> CallSnapshot
where
    F: Fn(&CallSnapshot) -> bool,
{
    for _ in 0..200 {
        let snapshot = handle.snapshot().await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let snapshot = handle.snapshot().await.unwrap();
    panic!("{} never happened for {}: {:?}", what, handle.user_id(), snapshot);
}

pub fn pending_call(store: &MemoryStore) -> Option<String> {
    store.get(peercall::infrastructure::platform::PENDING_CALL_KEY)
}
