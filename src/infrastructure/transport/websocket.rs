/// WebSocket transport with automatic reconnection

use super::{SignalingTransport, TransportEvent, TransportEventSink};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::UserId;
use crate::domain::signaling::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use rand::{thread_rng, Rng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Exponential backoff between connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

async fn sleep_with_jitter(base: Duration) {
    let jitter_ms: u64 = thread_rng().gen_range(0..=200);
    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
}

/// Relay socket URL for an identifier
pub fn socket_url(server_url: &str, user_id: &UserId) -> String {
    format!(
        "{}/socket?callerId={}",
        server_url.trim_end_matches('/'),
        urlencoding::encode(user_id.as_str())
    )
}

struct Shared {
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    connected: AtomicBool,
}

pub struct WsTransport {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
}

impl WsTransport {
    /// Start the connection task
    ///
    /// Reconnects forever with backoff until [`WsTransport::shutdown`] is
    /// called or the transport is dropped.
    pub fn spawn(
        server_url: &str,
        user_id: &UserId,
        policy: ReconnectPolicy,
        events: TransportEventSink,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            outbound: Mutex::new(None),
            connected: AtomicBool::new(false),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let url = socket_url(server_url, user_id);

        tokio::spawn(run(url, policy, shared.clone(), events, shutdown_rx));

        Arc::new(Self { shared, shutdown })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SignalingTransport for WsTransport {
    fn send(&self, message: ClientMessage) -> Result<()> {
        let text = serde_json::to_string(&message)
            .map_err(|e| DomainError::Internal(format!("encode {}: {}", message.name(), e)))?;

        let outbound = self
            .shared
            .outbound
            .lock()
            .map_err(|_| DomainError::Internal("transport lock poisoned".to_string()))?;
        let sent = outbound.as_ref().map(|tx| tx.send(text).is_ok()).unwrap_or(false);
        if !sent {
            return Err(DomainError::TransportDisconnected(format!(
                "cannot send {} while disconnected",
                message.name()
            )));
        }
        debug!("Queued {}", message.name());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

async fn run(
    url: String,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    events: TransportEventSink,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = policy.initial_backoff;

    while !*shutdown.borrow() {
        info!(%url, "connecting to relay");
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                backoff = policy.initial_backoff;
                let (tx, rx) = mpsc::unbounded_channel();
                if let Ok(mut outbound) = shared.outbound.lock() {
                    *outbound = Some(tx);
                }
                shared.connected.store(true, Ordering::SeqCst);
                events(TransportEvent::Connected);

                if let Err(e) = session(ws, rx, &events, &mut shutdown).await {
                    warn!("Relay connection error: {}", e);
                }

                // Anything still queued for the dead socket is discarded
                if let Ok(mut outbound) = shared.outbound.lock() {
                    *outbound = None;
                }
                shared.connected.store(false, Ordering::SeqCst);
                events(TransportEvent::Disconnected);
            }
            Err(e) => warn!("Relay connect failed: {}", e),
        }

        tokio::select! {
            _ = sleep_with_jitter(backoff) => {}
            _ = shutdown.changed() => {}
        }
        backoff = policy.next(backoff);
    }

    info!("Relay transport stopped");
}

async fn session<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: &TransportEventSink,
    shutdown: &mut watch::Receiver<bool>,
) -> std::result::Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
            _ = ping.tick() => {
                ws_tx.send(Message::Ping(Vec::new())).await?;
            }
            text = outbound.recv() => {
                let Some(text) = text else { break; };
                ws_tx.send(Message::Text(text)).await?;
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break; };
                match msg? {
                    Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => events(TransportEvent::Message(message)),
                        Err(e) => warn!("Ignoring malformed relay message: {}", e),
                    },
                    Message::Ping(p) => {
                        let _ = ws_tx.send(Message::Pong(p)).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_encodes_identifier() {
        let user = UserId::parse("a b&c").unwrap();
        assert_eq!(
            socket_url("ws://localhost:3500/", &user),
            "ws://localhost:3500/socket?callerId=a%20b%26c"
        );
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(2),
        };
        let b1 = policy.next(policy.initial_backoff);
        let b2 = policy.next(b1);
        let b3 = policy.next(b2);
        assert_eq!(b1, Duration::from_secs(1));
        assert_eq!(b2, Duration::from_secs(2));
        assert_eq!(b3, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let sink: TransportEventSink = Arc::new(|_| {});
        // Nothing listens on port 9; the task keeps retrying in the background
        let transport = WsTransport::spawn(
            "ws://127.0.0.1:9",
            &UserId::parse("alice").unwrap(),
            ReconnectPolicy::default(),
            sink,
        );

        assert!(!transport.is_connected());
        let result = transport.send(ClientMessage::JoinRoom {
            room_id: crate::domain::shared::value_objects::RoomId::parse("r1").unwrap(),
        });
        assert!(matches!(result, Err(DomainError::TransportDisconnected(_))));
        transport.shutdown();
    }
}
