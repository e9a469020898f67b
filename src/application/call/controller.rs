//! Call controller actor
//!
//! The single mutator of the call session. User actions, relay messages,
//! peer connection callbacks, async completions and timers all arrive as
//! [`CallEvent`]s on one queue and are handled one at a time. Long-running
//! work (media acquisition, offer/answer) runs in spawned tasks that post a
//! `Completed` event tagged with the epoch they started under; anything
//! tagged with an older epoch is discarded, and the peer session manager
//! cancels work started before its last teardown.

use super::notice::{CallNotice, NoticeBroadcaster};
use super::session::{CallSession, CallSnapshot, PendingOp};
use crate::config::ClientConfig;
use crate::domain::call::{CallRole, CallState, EndReason, TimeoutKind, Trigger};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{RoomId, UserId};
use crate::domain::signaling::{
    ClientMessage, IceCandidate, ServerMessage, SessionDescription, SignalKind,
};
use crate::infrastructure::media::{CameraFacing, TrackKind};
use crate::infrastructure::platform::{CallKind, CallUi, KeyValueStore, PENDING_CALL_KEY};
use crate::infrastructure::protocols::webrtc::{PeerEvent, PeerEventSink, PeerSessionManager};
use crate::infrastructure::transport::{SignalingTransport, TransportEvent};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Whether the host app is on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppVisibility {
    Foreground,
    Background,
}

/// Per-client call behavior
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub video: bool,
    pub invite_timeout: Duration,
    pub ringing_timeout: Duration,
    pub first_media_timeout: Duration,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for CallSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            video: config.video,
            invite_timeout: config.invite_timeout(),
            ringing_timeout: config.ringing_timeout(),
            first_media_timeout: config.first_media_timeout(),
        }
    }
}

/// Result of a spawned pipeline
#[derive(Debug)]
pub(crate) enum Completion {
    OfferCreated(SessionDescription),
    MediaReady,
    AnswerCreated(SessionDescription),
    RemoteDescriptionApplied,
    Failed(DomainError),
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum CallEvent {
    StartCall { target: UserId, reply: Reply<RoomId> },
    Accept { reply: Reply<()> },
    Reject { reply: Reply<()> },
    HangUp { reply: Reply<()> },
    ToggleMic { reply: Reply<bool> },
    ToggleCamera { reply: Reply<bool> },
    SwitchCamera { reply: Reply<CameraFacing> },
    Visibility(AppVisibility),
    CallUiAnswered(RoomId),
    CallUiEnded(RoomId),
    Transport(TransportEvent),
    Peer { epoch: u64, event: PeerEvent },
    Completed { epoch: u64, completion: Completion },
    Timeout { epoch: u64, kind: TimeoutKind },
    Snapshot { reply: oneshot::Sender<CallSnapshot> },
    Shutdown,
}

/// Collaborators handed to the controller
pub(crate) struct ControllerDeps {
    pub user_id: UserId,
    pub settings: CallSettings,
    pub peers: Arc<PeerSessionManager>,
    pub transport: Arc<dyn SignalingTransport>,
    pub call_ui: Arc<dyn CallUi>,
    pub store: Arc<dyn KeyValueStore>,
    pub notices: NoticeBroadcaster,
    pub events: mpsc::UnboundedSender<CallEvent>,
}

pub(crate) struct CallController {
    user_id: UserId,
    settings: CallSettings,
    session: CallSession,
    peers: Arc<PeerSessionManager>,
    transport: Arc<dyn SignalingTransport>,
    call_ui: Arc<dyn CallUi>,
    store: Arc<dyn KeyValueStore>,
    notices: NoticeBroadcaster,
    events: mpsc::UnboundedSender<CallEvent>,
    foreground: bool,
    last_end_reason: Option<EndReason>,
}

async fn prepare_offer(
    peers: &PeerSessionManager,
    generation: u64,
    sink: PeerEventSink,
    video: bool,
) -> Result<SessionDescription> {
    peers.initialize(generation, sink).await?;
    peers.acquire_local_media(generation, video).await?;
    peers.create_offer(generation).await
}

async fn prepare_media(
    peers: &PeerSessionManager,
    generation: u64,
    sink: PeerEventSink,
    video: bool,
) -> Result<()> {
    peers.initialize(generation, sink).await?;
    peers.acquire_local_media(generation, video).await?;
    Ok(())
}

impl CallController {
    pub(crate) fn new(deps: ControllerDeps) -> Self {
        Self {
            user_id: deps.user_id,
            settings: deps.settings,
            session: CallSession::default(),
            peers: deps.peers,
            transport: deps.transport,
            call_ui: deps.call_ui,
            store: deps.store,
            notices: deps.notices,
            events: deps.events,
            foreground: true,
            last_end_reason: None,
        }
    }

    /// Process events until shutdown
    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<CallEvent>) {
        info!("Call controller started for {}", self.user_id);

        while let Some(event) = inbox.recv().await {
            if matches!(event, CallEvent::Shutdown) {
                break;
            }
            self.handle(event).await;
        }

        if self.session.state.is_in_call() {
            self.end_call(Trigger::UserHangsUp).await;
        }
        self.peers.teardown().await;
        info!("Call controller stopped for {}", self.user_id);
    }

    async fn handle(&mut self, event: CallEvent) {
        match event {
            CallEvent::StartCall { target, reply } => {
                let _ = reply.send(self.start_call(target));
            }
            CallEvent::Accept { reply } => {
                let _ = reply.send(self.accept());
            }
            CallEvent::Reject { reply } => {
                let result = self.reject().await;
                let _ = reply.send(result);
            }
            CallEvent::HangUp { reply } => {
                let result = self.hang_up().await;
                let _ = reply.send(result);
            }
            CallEvent::ToggleMic { reply } => {
                let _ = reply.send(self.toggle(TrackKind::Audio));
            }
            CallEvent::ToggleCamera { reply } => {
                let _ = reply.send(self.toggle(TrackKind::Video));
            }
            CallEvent::SwitchCamera { reply } => {
                let _ = reply.send(self.switch_camera());
            }
            CallEvent::Visibility(visibility) => {
                debug!("App visibility: {:?}", visibility);
                self.foreground = visibility == AppVisibility::Foreground;
            }
            CallEvent::CallUiAnswered(room_id) => self.on_call_ui_answered(room_id),
            CallEvent::CallUiEnded(room_id) => self.on_call_ui_ended(room_id).await,
            CallEvent::Transport(event) => self.on_transport(event).await,
            CallEvent::Peer { epoch, event } => {
                if self.session.is_current(epoch) {
                    self.on_peer_event(event);
                }
            }
            CallEvent::Completed { epoch, completion } => {
                if self.session.is_current(epoch) {
                    self.on_completed(completion).await;
                } else {
                    debug!("Discarding stale completion from epoch {}", epoch);
                }
            }
            CallEvent::Timeout { epoch, kind } => {
                if self.session.is_current(epoch) {
                    self.end_call(Trigger::TimedOut(kind)).await;
                }
            }
            CallEvent::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            CallEvent::Shutdown => {}
        }
    }

    // ---- user actions ----

    fn start_call(&mut self, target: UserId) -> Result<RoomId> {
        if target == self.user_id {
            return Err(DomainError::ValidationError("cannot call yourself".to_string()));
        }
        let next = self.session.state.on(&Trigger::UserInitiatesCall)?;
        if !self.transport.is_connected() {
            return Err(DomainError::TransportDisconnected(
                "not connected to the relay".to_string(),
            ));
        }

        let room_id = RoomId::generate();
        self.transport.send(ClientMessage::JoinRoom {
            room_id: room_id.clone(),
        })?;

        let epoch = self.session.begin(next.clone(), target.clone(), room_id.clone());
        self.session.joined_room = true;
        self.session.pending_op = Some(PendingOp::PreparingOffer);
        self.notices.publish(CallNotice::StateChanged { state: next });
        info!("Calling {} in room {}", target, room_id);

        self.start_timer(epoch, TimeoutKind::InviteResponse, self.settings.invite_timeout);

        let peers = self.peers.clone();
        let events = self.events.clone();
        let sink = self.peer_sink(epoch);
        let video = self.settings.video;
        let generation = peers.generation();
        tokio::spawn(async move {
            let completion = match prepare_offer(&peers, generation, sink, video).await {
                Ok(offer) => Completion::OfferCreated(offer),
                Err(e) => Completion::Failed(e),
            };
            let _ = events.send(CallEvent::Completed { epoch, completion });
        });

        Ok(room_id)
    }

    fn accept(&mut self) -> Result<()> {
        self.session.state.on(&Trigger::UserAccepts)?;
        let room_id = self
            .session
            .room_id
            .clone()
            .ok_or_else(|| DomainError::Internal("ringing without a room".to_string()))?;

        self.transport.send(ClientMessage::JoinRoom {
            room_id: room_id.clone(),
        })?;
        self.session.joined_room = true;
        self.transition(&Trigger::UserAccepts)?;
        self.clear_pending_marker();
        info!("Accepted call in room {}", room_id);

        let epoch = self.session.epoch;
        self.session.pending_op = Some(PendingOp::PreparingMedia);
        self.start_timer(epoch, TimeoutKind::FirstMedia, self.settings.first_media_timeout);

        let peers = self.peers.clone();
        let events = self.events.clone();
        let sink = self.peer_sink(epoch);
        let video = self.settings.video;
        let generation = peers.generation();
        tokio::spawn(async move {
            let completion = match prepare_media(&peers, generation, sink, video).await {
                Ok(()) => Completion::MediaReady,
                Err(e) => Completion::Failed(e),
            };
            let _ = events.send(CallEvent::Completed { epoch, completion });
        });

        Ok(())
    }

    async fn reject(&mut self) -> Result<()> {
        self.session.state.on(&Trigger::UserRejects)?;
        self.end_call(Trigger::UserRejects).await;
        Ok(())
    }

    async fn hang_up(&mut self) -> Result<()> {
        self.session.state.on(&Trigger::UserHangsUp)?;
        self.end_call(Trigger::UserHangsUp).await;
        Ok(())
    }

    fn toggle(&mut self, kind: TrackKind) -> Result<bool> {
        if !self.session.state.is_in_call() {
            return Err(DomainError::InvalidStateTransition("no call in progress".to_string()));
        }
        let enabled = match kind {
            TrackKind::Audio => self.peers.toggle_mic(),
            TrackKind::Video => self.peers.toggle_camera(),
        }
        .ok_or_else(|| DomainError::InvalidStateTransition(format!("no local {:?} track", kind)))?;

        self.notices.publish(CallNotice::MediaToggled { kind, enabled });
        Ok(enabled)
    }

    fn switch_camera(&mut self) -> Result<CameraFacing> {
        if !self.session.state.is_in_call() {
            return Err(DomainError::InvalidStateTransition("no call in progress".to_string()));
        }
        let facing = self
            .peers
            .switch_camera()
            .ok_or_else(|| DomainError::InvalidStateTransition("no local camera".to_string()))?;
        self.notices.publish(CallNotice::CameraSwitched { facing });
        Ok(facing)
    }

    // ---- OS call UI ----

    fn on_call_ui_answered(&mut self, room_id: RoomId) {
        let pending = self.store.get(PENDING_CALL_KEY);
        let matches = pending.as_deref() == Some(room_id.as_str())
            && self.session.state == CallState::Ringing
            && self.session.in_room(&room_id);

        if !matches {
            info!("Call UI answered unknown room {}, dismissing", room_id);
            self.clear_pending_marker();
            self.call_ui.end_call(&room_id);
            return;
        }

        self.call_ui.back_to_foreground();
        self.foreground = true;
        if let Err(e) = self.accept() {
            warn!("Accept from call UI failed: {}", e);
            self.notices.publish(CallNotice::Failed {
                message: "Could not answer the call".to_string(),
            });
        }
    }

    async fn on_call_ui_ended(&mut self, room_id: RoomId) {
        if !self.session.in_room(&room_id) {
            debug!("Call UI ended unrelated room {}", room_id);
            return;
        }
        let trigger = if self.session.state == CallState::Ringing {
            Trigger::UserRejects
        } else {
            Trigger::UserHangsUp
        };
        self.end_call(trigger).await;
    }

    // ---- transport ----

    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!("Connected to relay as {}", self.user_id);
                self.notices.publish(CallNotice::TransportStatus { connected: true });
            }
            TransportEvent::Disconnected => {
                warn!("Relay connection lost");
                self.notices.publish(CallNotice::TransportStatus { connected: false });
                if self.session.state.is_in_call() {
                    self.end_call(Trigger::TransportLost).await;
                }
            }
            TransportEvent::Message(message) => self.on_server_message(message).await,
        }
    }

    async fn on_server_message(&mut self, message: ServerMessage) {
        debug!("Relay -> {}: {}", self.user_id, message.name());
        match message {
            ServerMessage::IncomingCall {
                caller_id,
                room_id,
                offer,
            } => self.on_incoming_call(caller_id, room_id, offer),
            ServerMessage::InviteResponse { accepted, room_id } => {
                self.on_invite_response(accepted, room_id).await
            }
            ServerMessage::RoomJoined { room_id } => {
                if self.session.in_room(&room_id) && self.session.state.is_in_call() {
                    self.session.peer_in_room = true;
                    self.flush_local_candidates();
                }
            }
            ServerMessage::Signal { room_id, kind, data } => {
                if self.session.in_room(&room_id) {
                    self.on_signal(kind, data);
                } else {
                    debug!("Ignoring {} for room {}", kind.as_str(), room_id);
                }
            }
            ServerMessage::CallEnded { room_id } => {
                let current = match &room_id {
                    Some(room_id) => self.session.in_room(room_id),
                    None => true,
                };
                if current && self.session.state.is_in_call() {
                    self.end_call(Trigger::RemoteCallEnded).await;
                }
            }
            ServerMessage::Error { code, message } => {
                warn!("Relay error {}: {}", code, message);
                if code == "ROOM_FULL" && self.session.state.is_in_call() {
                    self.end_call(Trigger::NegotiationFailed).await;
                }
            }
        }
    }

    fn on_incoming_call(&mut self, caller_id: UserId, room_id: RoomId, offer: Option<SessionDescription>) {
        if self.session.in_room(&room_id) {
            debug!("Duplicate invite for room {}", room_id);
            return;
        }

        let next = match self.session.state.on(&Trigger::IncomingCall) {
            Ok(next) => next,
            Err(_) => {
                info!("Busy, declining call from {} (room {})", caller_id, room_id);
                self.send(ClientMessage::InviteResponse {
                    caller_id,
                    accepted: false,
                    room_id,
                });
                return;
            }
        };

        let kind = match &offer {
            Some(offer) if offer.sdp.contains("m=video") => CallKind::Video,
            Some(_) => CallKind::Audio,
            None if self.settings.video => CallKind::Video,
            None => CallKind::Audio,
        };

        let epoch = self.session.begin(next.clone(), caller_id.clone(), room_id.clone());
        self.session.remote_offer = offer;
        self.notices.publish(CallNotice::StateChanged { state: next });
        info!("Incoming call from {} (room {})", caller_id, room_id);

        if self.foreground {
            self.notices.publish(CallNotice::IncomingCall {
                caller_id,
                room_id,
            });
        } else {
            if let Err(e) = self.store.set(PENDING_CALL_KEY, room_id.as_str()) {
                warn!("Failed to persist pending call: {}", e);
            }
            self.call_ui
                .display_incoming_call(&room_id, caller_id.as_str(), kind);
            self.session.call_ui_shown = true;
        }

        self.start_timer(epoch, TimeoutKind::Ringing, self.settings.ringing_timeout);
    }

    async fn on_invite_response(&mut self, accepted: bool, room_id: RoomId) {
        if !self.session.in_room(&room_id) {
            debug!("Ignoring invite response for room {}", room_id);
            return;
        }

        let state = self.session.state.clone();
        match (state, accepted) {
            (CallState::Outgoing, true) => {
                if self.transition(&Trigger::InviteAccepted).is_ok() {
                    info!("Invite accepted (room {})", room_id);
                    self.start_timer(
                        self.session.epoch,
                        TimeoutKind::FirstMedia,
                        self.settings.first_media_timeout,
                    );
                    self.maybe_apply_answer();
                }
            }
            (CallState::Outgoing, false) => self.end_call(Trigger::InviteDeclined).await,
            // The caller withdrew before we answered
            (CallState::Ringing, false) => self.end_call(Trigger::RemoteCallEnded).await,
            (state, _) => debug!("Ignoring invite response in {}", state.name()),
        }
    }

    fn on_signal(&mut self, kind: SignalKind, data: Value) {
        match kind {
            SignalKind::Offer => {
                let Ok(offer) = serde_json::from_value::<SessionDescription>(data) else {
                    warn!("Malformed offer signal");
                    return;
                };
                let expecting = matches!(
                    self.session.state,
                    CallState::Ringing | CallState::Negotiating(CallRole::Callee)
                );
                if expecting && self.session.remote_offer.is_none() {
                    self.session.remote_offer = Some(offer);
                    self.maybe_create_answer();
                }
            }
            SignalKind::Answer => {
                let Ok(answer) = serde_json::from_value::<SessionDescription>(data) else {
                    warn!("Malformed answer signal");
                    return;
                };
                match self.session.state {
                    CallState::Outgoing | CallState::Negotiating(CallRole::Caller) => {
                        if !self.session.remote_description_set {
                            self.session.early_answer = Some(answer);
                            self.maybe_apply_answer();
                        }
                    }
                    _ => debug!("Ignoring answer in {}", self.session.state.name()),
                }
            }
            SignalKind::IceCandidate => {
                let Ok(candidate) = serde_json::from_value::<IceCandidate>(data) else {
                    warn!("Malformed ICE candidate signal");
                    return;
                };
                if self.session.state.on(&Trigger::RemoteCandidate).is_err() {
                    debug!("Ignoring remote candidate in {}", self.session.state.name());
                    return;
                }
                if self.session.remote_description_set {
                    self.apply_remote_candidates(vec![candidate]);
                } else {
                    self.session.pending_remote_candidates.push(candidate);
                }
            }
        }
    }

    // ---- peer connection ----

    fn on_peer_event(&mut self, event: PeerEvent) {
        if !self.session.state.is_in_call() {
            return;
        }
        match event {
            PeerEvent::CandidateDiscovered(candidate) => {
                if self.session.peer_in_room {
                    self.send_candidate(&candidate);
                } else {
                    self.session.pending_local_candidates.push(candidate);
                }
            }
            PeerEvent::TrackReceived(stream) => {
                let first = self.peers.set_remote_stream(stream);
                match self.transition(&Trigger::RemoteTrack) {
                    Ok(()) => {
                        if first || self.session.started_at.is_none() {
                            self.session.started_at = Some(Utc::now());
                            info!("Media connected (room {:?})", self.session.room_id);
                        }
                    }
                    Err(e) => debug!("Remote track not applied: {}", e),
                }
            }
        }
    }

    async fn on_completed(&mut self, completion: Completion) {
        match completion {
            Completion::Failed(DomainError::Cancelled(what)) => debug!("{} cancelled", what),
            Completion::Failed(e) => {
                warn!("Call setup failed: {}", e);
                self.session.pending_op = None;
                let trigger = match e {
                    DomainError::MediaAcquisition(_) => Trigger::MediaFailed,
                    _ => Trigger::NegotiationFailed,
                };
                self.end_call(trigger).await;
            }
            Completion::OfferCreated(offer) => {
                if self.session.pending_op != Some(PendingOp::PreparingOffer)
                    || self.session.state != CallState::Outgoing
                {
                    return;
                }
                self.session.pending_op = None;
                let (Some(callee_id), Some(room_id)) =
                    (self.session.other_user_id.clone(), self.session.room_id.clone())
                else {
                    return;
                };
                let sent = self.send(ClientMessage::InviteToCall {
                    callee_id,
                    room_id,
                    offer: Some(offer),
                });
                if sent {
                    self.session.invite_sent = true;
                } else {
                    self.end_call(Trigger::TransportLost).await;
                }
            }
            Completion::MediaReady => {
                if self.session.pending_op != Some(PendingOp::PreparingMedia) {
                    return;
                }
                self.session.pending_op = None;
                self.session.media_ready = true;
                self.maybe_create_answer();
            }
            Completion::AnswerCreated(answer) => {
                if self.session.pending_op != Some(PendingOp::CreatingAnswer) {
                    return;
                }
                self.session.pending_op = None;
                self.session.remote_description_set = true;
                let (Some(caller_id), Some(room_id)) =
                    (self.session.other_user_id.clone(), self.session.room_id.clone())
                else {
                    return;
                };

                self.send(ClientMessage::answer_signal(room_id.clone(), &answer));
                self.send(ClientMessage::InviteResponse {
                    caller_id,
                    accepted: true,
                    room_id: room_id.clone(),
                });

                // The caller has been in the room since it dialed
                self.session.peer_in_room = true;
                self.flush_local_candidates();
                self.flush_remote_candidates();
                self.notices.publish(CallNotice::ShowActiveCall { room_id });
            }
            Completion::RemoteDescriptionApplied => {
                if self.session.pending_op != Some(PendingOp::ApplyingAnswer) {
                    return;
                }
                self.session.pending_op = None;
                self.session.remote_description_set = true;
                self.flush_remote_candidates();
            }
        }
    }

    fn maybe_create_answer(&mut self) {
        if self.session.state != CallState::Negotiating(CallRole::Callee)
            || !self.session.media_ready
            || self.session.pending_op.is_some()
            || self.session.remote_description_set
        {
            return;
        }
        let Some(offer) = self.session.remote_offer.clone() else {
            debug!("Waiting for the caller's offer");
            return;
        };

        self.session.pending_op = Some(PendingOp::CreatingAnswer);
        let epoch = self.session.epoch;
        let peers = self.peers.clone();
        let events = self.events.clone();
        let generation = peers.generation();
        tokio::spawn(async move {
            let completion = match peers.create_answer(generation, &offer).await {
                Ok(answer) => Completion::AnswerCreated(answer),
                Err(e) => Completion::Failed(e),
            };
            let _ = events.send(CallEvent::Completed { epoch, completion });
        });
    }

    fn maybe_apply_answer(&mut self) {
        if self.session.state != CallState::Negotiating(CallRole::Caller)
            || self.session.pending_op.is_some()
            || self.session.remote_description_set
        {
            return;
        }
        let Some(answer) = self.session.early_answer.take() else {
            return;
        };

        self.session.pending_op = Some(PendingOp::ApplyingAnswer);
        let epoch = self.session.epoch;
        let peers = self.peers.clone();
        let events = self.events.clone();
        let generation = peers.generation();
        tokio::spawn(async move {
            let completion = match peers.apply_remote_description(generation, &answer).await {
                Ok(()) => Completion::RemoteDescriptionApplied,
                Err(e) => Completion::Failed(e),
            };
            let _ = events.send(CallEvent::Completed { epoch, completion });
        });
    }

    fn flush_local_candidates(&mut self) {
        for candidate in std::mem::take(&mut self.session.pending_local_candidates) {
            self.send_candidate(&candidate);
        }
    }

    fn flush_remote_candidates(&mut self) {
        let candidates = std::mem::take(&mut self.session.pending_remote_candidates);
        if !candidates.is_empty() {
            self.apply_remote_candidates(candidates);
        }
    }

    fn apply_remote_candidates(&self, candidates: Vec<IceCandidate>) {
        let peers = self.peers.clone();
        let generation = peers.generation();
        tokio::spawn(async move {
            for candidate in candidates {
                if peers.apply_remote_candidate(generation, &candidate).await.is_err() {
                    debug!("Dropping remote candidates of a torn down call");
                    break;
                }
            }
        });
    }

    fn send_candidate(&self, candidate: &IceCandidate) {
        if let Some(room_id) = self.session.room_id.clone() {
            self.send(ClientMessage::candidate_signal(room_id, candidate));
        }
    }

    // ---- termination ----

    /// Apply a terminal trigger and clean up; invalid triggers are ignored
    async fn end_call(&mut self, trigger: Trigger) {
        let previous = self.session.state.clone();
        if let Err(e) = self.transition(&trigger) {
            debug!("Ignoring {:?}: {}", trigger, e);
            return;
        }
        let CallState::Ended(reason) = self.session.state.clone() else {
            return;
        };
        self.finish(previous, reason).await;
    }

    async fn finish(&mut self, previous: CallState, reason: EndReason) {
        info!("Call ended: {}", reason);

        if let Some(room_id) = self.session.room_id.clone() {
            let other = self.session.other_user_id.clone();

            if previous == CallState::Ringing
                && matches!(reason, EndReason::Rejected | EndReason::TimedOut(TimeoutKind::Ringing))
            {
                if let Some(caller_id) = other.clone() {
                    self.send(ClientMessage::InviteResponse {
                        caller_id,
                        accepted: false,
                        room_id: room_id.clone(),
                    });
                }
            }

            // Withdraw the invite so the callee stops ringing
            if previous == CallState::Outgoing
                && self.session.invite_sent
                && !matches!(reason, EndReason::Declined | EndReason::RemoteEnded)
            {
                if let Some(callee_id) = other {
                    self.send(ClientMessage::InviteResponse {
                        caller_id: callee_id,
                        accepted: false,
                        room_id: room_id.clone(),
                    });
                }
            }

            if self.session.joined_room {
                let message = if reason.notifies_remote() {
                    ClientMessage::EndCall {
                        room_id: room_id.clone(),
                    }
                } else {
                    ClientMessage::LeaveRoom {
                        room_id: room_id.clone(),
                    }
                };
                self.send(message);
            }

            if self.session.call_ui_shown {
                self.call_ui.end_call(&room_id);
            }
        }

        self.clear_pending_marker();
        self.peers.teardown().await;

        if let Some(message) = reason.notice() {
            self.notices.publish(CallNotice::Failed { message });
        }
        self.last_end_reason = Some(reason);

        if let Err(e) = self.transition(&Trigger::CleanupComplete) {
            warn!("Cleanup transition failed: {}", e);
        }
        self.session.reset();
    }

    // ---- helpers ----

    fn transition(&mut self, trigger: &Trigger) -> Result<()> {
        let next = self.session.state.on(trigger)?;
        if next != self.session.state {
            debug!(
                "Call state {} -> {} on {:?}",
                self.session.state.name(),
                next.name(),
                trigger
            );
            self.session.state = next.clone();
            self.notices.publish(CallNotice::StateChanged { state: next });
        }
        Ok(())
    }

    /// Send best-effort; false if the transport refused
    fn send(&self, message: ClientMessage) -> bool {
        let name = message.name();
        match self.transport.send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {}: {}", name, e);
                false
            }
        }
    }

    fn clear_pending_marker(&self) {
        if let Err(e) = self.store.delete(PENDING_CALL_KEY) {
            warn!("Failed to clear pending call marker: {}", e);
        }
    }

    fn peer_sink(&self, epoch: u64) -> PeerEventSink {
        let events = self.events.clone();
        Arc::new(move |event| {
            let _ = events.send(CallEvent::Peer { epoch, event });
        })
    }

    fn start_timer(&self, epoch: u64, kind: TimeoutKind, after: Duration) {
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(CallEvent::Timeout { epoch, kind });
        });
    }

    fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            state: self.session.state.clone(),
            room_id: self.session.room_id.clone(),
            other_user_id: self.session.other_user_id.clone(),
            local_stream: self.peers.local_stream(),
            remote_stream: self.peers.remote_stream(),
            has_peer_connection: self.peers.has_handle(),
            last_end_reason: self.last_end_reason.clone(),
            started_at: self.session.started_at,
            foreground: self.foreground,
            transport_connected: self.transport.is_connected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::media::device::MockMediaDevices;
    use crate::infrastructure::media::{MediaDevices, MediaStream, SyntheticDevices};
    use crate::infrastructure::platform::call_ui::MockCallUi;
    use crate::infrastructure::platform::MemoryStore;
    use crate::infrastructure::protocols::webrtc::{IceServer, PeerConnection, PeerConnector};
    use crate::infrastructure::transport::MockSignalingTransport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NullConnection;

    #[async_trait]
    impl PeerConnection for NullConnection {
        async fn add_stream(&self, _stream: &MediaStream) -> Result<()> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::offer("v=0 offer"))
        }
        async fn create_answer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::answer("v=0 answer"))
        }
        async fn set_local_description(&self, _d: &SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn set_remote_description(&self, _d: &SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _c: &IceCandidate) -> Result<()> {
            Ok(())
        }
        async fn stop_transceivers(&self) {}
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NullConnector;

    #[async_trait]
    impl PeerConnector for NullConnector {
        async fn connect(&self, _ice: &[IceServer], _events: PeerEventSink) -> Result<Arc<dyn PeerConnection>> {
            Ok(Arc::new(NullConnection))
        }
    }

    type Applied = Arc<Mutex<Vec<(usize, String)>>>;

    /// Numbered connection; the first one is slow to take candidates
    struct ScriptedConnection {
        index: usize,
        fail_answer: bool,
        applied: Applied,
    }

    #[async_trait]
    impl PeerConnection for ScriptedConnection {
        async fn add_stream(&self, _stream: &MediaStream) -> Result<()> {
            Ok(())
        }
        async fn create_offer(&self) -> Result<SessionDescription> {
            Ok(SessionDescription::offer("v=0 offer"))
        }
        async fn create_answer(&self) -> Result<SessionDescription> {
            if self.fail_answer {
                return Err(DomainError::Negotiation("answer rejected".to_string()));
            }
            Ok(SessionDescription::answer("v=0 answer"))
        }
        async fn set_local_description(&self, _d: &SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn set_remote_description(&self, _d: &SessionDescription) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, c: &IceCandidate) -> Result<()> {
            self.applied
                .lock()
                .unwrap()
                .push((self.index, c.candidate.clone()));
            if self.index == 1 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(())
        }
        async fn stop_transceivers(&self) {}
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedConnector {
        fail_answer: bool,
        created: AtomicUsize,
        applied: Applied,
    }

    impl ScriptedConnector {
        fn applied(&self) -> Vec<(usize, String)> {
            self.applied.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PeerConnector for ScriptedConnector {
        async fn connect(&self, _ice: &[IceServer], _events: PeerEventSink) -> Result<Arc<dyn PeerConnection>> {
            let index = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Arc::new(ScriptedConnection {
                index,
                fail_answer: self.fail_answer,
                applied: self.applied.clone(),
            }))
        }
    }

    type Sent = Arc<Mutex<Vec<ClientMessage>>>;

    fn recording_transport() -> (MockSignalingTransport, Sent) {
        let sent: Sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let mut transport = MockSignalingTransport::new();
        transport.expect_is_connected().return_const(true);
        transport.expect_send().returning(move |message| {
            log.lock().unwrap().push(message);
            Ok(())
        });
        (transport, sent)
    }

    fn audio_settings() -> CallSettings {
        CallSettings {
            video: false,
            ..Default::default()
        }
    }

    fn controller(
        transport: MockSignalingTransport,
        call_ui: MockCallUi,
    ) -> (CallController, mpsc::UnboundedReceiver<CallEvent>) {
        controller_with(
            transport,
            call_ui,
            Arc::new(NullConnector),
            Arc::new(SyntheticDevices),
            audio_settings(),
        )
    }

    fn controller_with(
        transport: MockSignalingTransport,
        call_ui: MockCallUi,
        connector: Arc<dyn PeerConnector>,
        devices: Arc<dyn MediaDevices>,
        settings: CallSettings,
    ) -> (CallController, mpsc::UnboundedReceiver<CallEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let peers = Arc::new(PeerSessionManager::new(connector, devices, vec![]));
        let controller = CallController::new(ControllerDeps {
            user_id: UserId::parse("alice").unwrap(),
            settings,
            peers,
            transport: Arc::new(transport),
            call_ui: Arc::new(call_ui),
            store: Arc::new(MemoryStore::new()),
            notices: NoticeBroadcaster::new(),
            events,
        });
        (controller, rx)
    }

    async fn next_completion(rx: &mut mpsc::UnboundedReceiver<CallEvent>) -> CallEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, CallEvent::Completed { .. }) {
                return event;
            }
        }
    }

    async fn next_timeout(rx: &mut mpsc::UnboundedReceiver<CallEvent>, kind: TimeoutKind) -> CallEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(&event, CallEvent::Timeout { kind: k, .. } if *k == kind) {
                return event;
            }
        }
    }

    fn user(name: &str) -> UserId {
        UserId::parse(name).unwrap()
    }

    fn candidate(line: &str) -> IceCandidate {
        IceCandidate {
            candidate: line.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }

    fn drain_notices(rx: &mut tokio::sync::broadcast::Receiver<CallNotice>) -> Vec<CallNotice> {
        let mut notices = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            notices.push(notice);
        }
        notices
    }

    #[tokio::test]
    async fn test_start_call_joins_room_then_invites_with_offer() {
        let (transport, sent) = recording_transport();
        let (mut controller, mut rx) = controller(transport, MockCallUi::new());

        let room = controller.start_call(user("bob")).unwrap();
        assert_eq!(controller.session.state, CallState::Outgoing);
        assert_eq!(
            sent.lock().unwrap()[0],
            ClientMessage::JoinRoom { room_id: room.clone() }
        );

        let completion = next_completion(&mut rx).await;
        controller.handle(completion).await;

        assert!(controller.session.invite_sent);
        assert_eq!(
            sent.lock().unwrap()[1],
            ClientMessage::InviteToCall {
                callee_id: user("bob"),
                room_id: room,
                offer: Some(SessionDescription::offer("v=0 offer")),
            }
        );
    }

    #[tokio::test]
    async fn test_incoming_call_while_busy_is_declined() {
        let (transport, sent) = recording_transport();
        let (mut controller, _rx) = controller(transport, MockCallUi::new());
        controller.start_call(user("bob")).unwrap();

        let other_room = RoomId::parse("r9").unwrap();
        controller
            .handle(CallEvent::Transport(TransportEvent::Message(ServerMessage::IncomingCall {
                caller_id: user("carol"),
                room_id: other_room.clone(),
                offer: None,
            })))
            .await;

        assert_eq!(controller.session.state, CallState::Outgoing);
        assert_eq!(
            sent.lock().unwrap().last().cloned(),
            Some(ClientMessage::InviteResponse {
                caller_id: user("carol"),
                accepted: false,
                room_id: other_room,
            })
        );
    }

    #[tokio::test]
    async fn test_completion_from_ended_call_is_discarded() {
        let (transport, sent) = recording_transport();
        let (mut controller, mut rx) = controller(transport, MockCallUi::new());
        let room = controller.start_call(user("bob")).unwrap();

        controller.hang_up().await.unwrap();
        assert!(controller.session.state.is_idle());
        assert_eq!(controller.last_end_reason, Some(EndReason::LocalHangup));

        let completion = next_completion(&mut rx).await;
        controller.handle(completion).await;

        let sent = sent.lock().unwrap();
        assert!(sent.iter().all(|m| !matches!(m, ClientMessage::InviteToCall { .. })));
        assert_eq!(sent.last().cloned(), Some(ClientMessage::EndCall { room_id: room }));
    }

    #[tokio::test]
    async fn test_background_ringing_times_out_through_call_ui() {
        let (transport, sent) = recording_transport();
        let mut call_ui = MockCallUi::new();
        call_ui
            .expect_display_incoming_call()
            .withf(|_, caller, kind| caller == "bob" && *kind == CallKind::Video)
            .times(1)
            .return_const(());
        call_ui.expect_end_call().times(1).return_const(());
        let (mut controller, _rx) = controller(transport, call_ui);

        controller
            .handle(CallEvent::Visibility(AppVisibility::Background))
            .await;
        let room = RoomId::parse("r1").unwrap();
        controller
            .handle(CallEvent::Transport(TransportEvent::Message(ServerMessage::IncomingCall {
                caller_id: user("bob"),
                room_id: room.clone(),
                offer: Some(SessionDescription::offer("v=0\r\nm=audio 9\r\nm=video 9")),
            })))
            .await;
        assert_eq!(controller.session.state, CallState::Ringing);
        assert_eq!(controller.store.get(PENDING_CALL_KEY), Some("r1".to_string()));

        let epoch = controller.session.epoch;
        controller
            .handle(CallEvent::Timeout {
                epoch,
                kind: TimeoutKind::Ringing,
            })
            .await;

        assert!(controller.session.state.is_idle());
        assert_eq!(
            controller.last_end_reason,
            Some(EndReason::TimedOut(TimeoutKind::Ringing))
        );
        assert_eq!(controller.store.get(PENDING_CALL_KEY), None);
        assert_eq!(
            sent.lock().unwrap().last().cloned(),
            Some(ClientMessage::InviteResponse {
                caller_id: user("bob"),
                accepted: false,
                room_id: room,
            })
        );
    }

    #[tokio::test]
    async fn test_queued_candidates_stop_at_teardown() {
        let (transport, _sent) = recording_transport();
        let connector = Arc::new(ScriptedConnector::default());
        let (mut controller, mut rx) = controller_with(
            transport,
            MockCallUi::new(),
            connector.clone(),
            Arc::new(SyntheticDevices),
            audio_settings(),
        );

        controller.start_call(user("bob")).unwrap();
        let completion = next_completion(&mut rx).await;
        controller.handle(completion).await;

        controller.session.pending_remote_candidates =
            vec![candidate("call1-cand1"), candidate("call1-cand2")];
        controller.flush_remote_candidates();
        // Let the first candidate reach the slow connection
        tokio::task::yield_now().await;

        controller.hang_up().await.unwrap();
        controller.start_call(user("carol")).unwrap();
        let completion = next_completion(&mut rx).await;
        controller.handle(completion).await;
        assert!(controller.session.invite_sent);
        assert!(controller.peers.has_handle());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(connector.applied(), vec![(1, "call1-cand1".to_string())]);
    }

    #[tokio::test]
    async fn test_media_failure_returns_to_idle_with_notice() {
        let (transport, sent) = recording_transport();
        let mut devices = MockMediaDevices::new();
        devices
            .expect_get_user_media()
            .returning(|_| Err(DomainError::MediaAcquisition("permission denied".to_string())));
        let (mut controller, mut rx) = controller_with(
            transport,
            MockCallUi::new(),
            Arc::new(NullConnector),
            Arc::new(devices),
            audio_settings(),
        );
        let mut notices = controller.notices.subscribe();

        let room = controller.start_call(user("bob")).unwrap();
        let completion = next_completion(&mut rx).await;
        controller.handle(completion).await;

        assert!(controller.session.state.is_idle());
        assert_eq!(controller.last_end_reason, Some(EndReason::MediaFailure));
        assert!(!controller.peers.has_handle());
        assert_eq!(
            *sent.lock().unwrap(),
            vec![
                ClientMessage::JoinRoom { room_id: room.clone() },
                ClientMessage::EndCall { room_id: room },
            ]
        );
        assert!(drain_notices(&mut notices).contains(&CallNotice::Failed {
            message: "Could not access camera or microphone".to_string()
        }));
    }

    #[tokio::test]
    async fn test_answer_failure_ends_call_as_negotiation_failure() {
        let (transport, sent) = recording_transport();
        let connector = Arc::new(ScriptedConnector {
            fail_answer: true,
            ..Default::default()
        });
        let (mut controller, mut rx) = controller_with(
            transport,
            MockCallUi::new(),
            connector,
            Arc::new(SyntheticDevices),
            audio_settings(),
        );
        let mut notices = controller.notices.subscribe();

        let room = RoomId::parse("r1").unwrap();
        controller
            .handle(CallEvent::Transport(TransportEvent::Message(ServerMessage::IncomingCall {
                caller_id: user("bob"),
                room_id: room.clone(),
                offer: Some(SessionDescription::offer("v=0\r\nm=audio 9")),
            })))
            .await;
        controller.accept().unwrap();

        let media_ready = next_completion(&mut rx).await;
        controller.handle(media_ready).await;
        assert_eq!(controller.session.pending_op, Some(PendingOp::CreatingAnswer));

        let failed = next_completion(&mut rx).await;
        controller.handle(failed).await;

        assert!(controller.session.state.is_idle());
        assert_eq!(controller.last_end_reason, Some(EndReason::NegotiationFailure));
        assert!(!controller.peers.has_handle());
        let sent = sent.lock().unwrap();
        assert!(sent.iter().all(|m| !matches!(m, ClientMessage::Signal { .. })));
        assert_eq!(sent.last().cloned(), Some(ClientMessage::EndCall { room_id: room }));
        assert!(drain_notices(&mut notices).contains(&CallNotice::Failed {
            message: "Could not establish the call".to_string()
        }));
    }

    #[tokio::test]
    async fn test_no_remote_media_times_out_and_ends_call() {
        let (transport, sent) = recording_transport();
        let settings = CallSettings {
            first_media_timeout: Duration::from_millis(100),
            ..audio_settings()
        };
        let (mut controller, mut rx) = controller_with(
            transport,
            MockCallUi::new(),
            Arc::new(NullConnector),
            Arc::new(SyntheticDevices),
            settings,
        );

        let room = controller.start_call(user("bob")).unwrap();
        let completion = next_completion(&mut rx).await;
        controller.handle(completion).await;
        controller
            .handle(CallEvent::Transport(TransportEvent::Message(ServerMessage::InviteResponse {
                accepted: true,
                room_id: room.clone(),
            })))
            .await;
        assert_eq!(controller.session.state, CallState::Negotiating(CallRole::Caller));

        let timeout = next_timeout(&mut rx, TimeoutKind::FirstMedia).await;
        controller.handle(timeout).await;

        assert!(controller.session.state.is_idle());
        assert_eq!(
            controller.last_end_reason,
            Some(EndReason::TimedOut(TimeoutKind::FirstMedia))
        );
        assert!(!controller.peers.has_handle());
        assert_eq!(
            sent.lock().unwrap().last().cloned(),
            Some(ClientMessage::EndCall { room_id: room })
        );
    }
}
