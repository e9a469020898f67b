//! Call client facade
//!
//! Owns the controller task and hands out cheap [`CallHandle`]s. Every
//! handle method is a message to the controller; nothing here touches the
//! call session directly.

use super::controller::{AppVisibility, CallController, CallEvent, CallSettings, ControllerDeps};
use super::notice::{CallNotice, NoticeBroadcaster};
use super::session::CallSnapshot;
use crate::config::ClientConfig;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{RoomId, UserId};
use crate::infrastructure::media::{CameraFacing, MediaDevices};
use crate::infrastructure::platform::{load_or_create_identifier, CallUi, KeyValueStore};
use crate::infrastructure::protocols::webrtc::{
    IceServer, PeerConnector, PeerSessionManager, RtcPeerConnector,
};
use crate::infrastructure::transport::{
    ReconnectPolicy, SignalingTransport, TransportEventSink, WsTransport,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The controller's inbound queue
///
/// Created before the transport so the transport's event sink can feed the
/// same queue as user actions.
pub struct Mailbox {
    tx: mpsc::UnboundedSender<CallEvent>,
    rx: mpsc::UnboundedReceiver<CallEvent>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Sink that forwards transport events to the controller
    pub fn transport_sink(&self) -> TransportEventSink {
        let tx = self.tx.clone();
        Arc::new(move |event| {
            let _ = tx.send(CallEvent::Transport(event));
        })
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a call client is assembled from
pub struct CallParts {
    pub user_id: UserId,
    pub settings: CallSettings,
    pub ice_servers: Vec<IceServer>,
    pub transport: Arc<dyn SignalingTransport>,
    pub connector: Arc<dyn PeerConnector>,
    pub devices: Arc<dyn MediaDevices>,
    pub call_ui: Arc<dyn CallUi>,
    pub store: Arc<dyn KeyValueStore>,
}

/// Cloneable entry point for user actions
#[derive(Clone)]
pub struct CallHandle {
    events: mpsc::UnboundedSender<CallEvent>,
    notices: NoticeBroadcaster,
    user_id: UserId,
}

fn stopped() -> DomainError {
    DomainError::Internal("call controller stopped".to_string())
}

impl CallHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> CallEvent,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.events.send(make(reply)).map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    fn post(&self, event: CallEvent) {
        if self.events.send(event).is_err() {
            warn!("Call controller stopped, event dropped");
        }
    }

    /// Place a call; returns the new room
    pub async fn start_call(&self, target: UserId) -> Result<RoomId> {
        self.request(|reply| CallEvent::StartCall { target, reply }).await
    }

    pub async fn accept(&self) -> Result<()> {
        self.request(|reply| CallEvent::Accept { reply }).await
    }

    pub async fn reject(&self) -> Result<()> {
        self.request(|reply| CallEvent::Reject { reply }).await
    }

    pub async fn hang_up(&self) -> Result<()> {
        self.request(|reply| CallEvent::HangUp { reply }).await
    }

    /// Returns whether the microphone is now enabled
    pub async fn toggle_mic(&self) -> Result<bool> {
        self.request(|reply| CallEvent::ToggleMic { reply }).await
    }

    /// Returns whether the camera is now enabled
    pub async fn toggle_camera(&self) -> Result<bool> {
        self.request(|reply| CallEvent::ToggleCamera { reply }).await
    }

    pub async fn switch_camera(&self) -> Result<CameraFacing> {
        self.request(|reply| CallEvent::SwitchCamera { reply }).await
    }

    pub fn set_visibility(&self, visibility: AppVisibility) {
        self.post(CallEvent::Visibility(visibility));
    }

    /// The user answered from the OS call UI
    pub fn call_ui_answered(&self, room_id: RoomId) {
        self.post(CallEvent::CallUiAnswered(room_id));
    }

    /// The user ended or declined from the OS call UI
    pub fn call_ui_ended(&self, room_id: RoomId) {
        self.post(CallEvent::CallUiEnded(room_id));
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(CallEvent::Snapshot { reply })
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallNotice> {
        self.notices.subscribe()
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}

/// A running call client
pub struct CallClient {
    handle: CallHandle,
    task: JoinHandle<()>,
}

impl CallClient {
    /// Connect to the relay configured in `config`
    ///
    /// Loads (or creates) this device's identifier from `store` and starts
    /// the reconnecting transport.
    pub async fn connect(
        config: &ClientConfig,
        devices: Arc<dyn MediaDevices>,
        call_ui: Arc<dyn CallUi>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let user_id = load_or_create_identifier(store.as_ref())?;
        let mailbox = Mailbox::new();

        let policy = ReconnectPolicy {
            initial_backoff: config.reconnect_initial_backoff(),
            max_backoff: config.reconnect_max_backoff(),
        };
        let transport = WsTransport::spawn(
            &config.server_url,
            &user_id,
            policy,
            mailbox.transport_sink(),
        );

        let parts = CallParts {
            user_id,
            settings: CallSettings::from(config),
            ice_servers: config.ice_servers.iter().map(IceServer::stun).collect(),
            transport,
            connector: Arc::new(RtcPeerConnector),
            devices,
            call_ui,
            store,
        };

        Ok(Self::with_parts(mailbox, parts))
    }

    /// Assemble a client from explicit parts
    pub fn with_parts(mailbox: Mailbox, parts: CallParts) -> Self {
        let Mailbox { tx, rx } = mailbox;
        let notices = NoticeBroadcaster::new();
        let peers = Arc::new(PeerSessionManager::new(
            parts.connector,
            parts.devices,
            parts.ice_servers,
        ));

        info!("Starting call client {}", parts.user_id);
        let controller = CallController::new(ControllerDeps {
            user_id: parts.user_id.clone(),
            settings: parts.settings,
            peers,
            transport: parts.transport,
            call_ui: parts.call_ui,
            store: parts.store,
            notices: notices.clone(),
            events: tx.clone(),
        });
        let task = tokio::spawn(controller.run(rx));

        Self {
            handle: CallHandle {
                events: tx,
                notices,
                user_id: parts.user_id,
            },
            task,
        }
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }

    pub fn user_id(&self) -> &UserId {
        &self.handle.user_id
    }

    /// Hang up any call and stop the controller
    pub async fn shutdown(self) {
        let _ = self.handle.events.send(CallEvent::Shutdown);
        if let Err(e) = self.task.await {
            warn!("Call controller task failed: {}", e);
        }
    }
}
