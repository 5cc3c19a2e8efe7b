//! WebSocket Client für den Pub/Sub-Relay
//!
//! Verwaltet die WebSocket-Verbindung zum Relay:
//! - Kanäle abonnieren / abmelden
//! - Signale auf einen Kanal broadcasten
//! - Heartbeat gegen Idle-Timeouts
//! - eingehende Broadcasts an die lokalen Abos verteilen

use super::messages::{ClientFrame, ServerFrame, SignalMessage};
use super::transport::{SignalingError, SignalingTransport, Subscription};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Events der Relay-Verbindung
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Verbunden mit dem Relay
    Connected,

    /// Verbindung getrennt
    Disconnected,

    /// Fehler vom Relay
    Error { code: i32, message: String },
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
}

type Routes = HashMap<String, Vec<(u64, mpsc::UnboundedSender<SignalMessage>)>>;

// ============================================================================
// WS TRANSPORT
// ============================================================================

/// Signaling-Transport über einen WebSocket Pub/Sub-Relay
pub struct WsTransport {
    server_url: String,
    state: Arc<RwLock<ClientState>>,
    tx: mpsc::Sender<String>,
    routes: Arc<Mutex<Routes>>,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<TransportEvent>,
}

impl WsTransport {
    /// Baut die WebSocket URL aus der Relay-Adresse (`http(s)` → `ws(s)`, Pfad `/ws`)
    pub fn websocket_url(server_url: &str) -> Result<String, SignalingError> {
        let mut url =
            Url::parse(server_url).map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SignalingError::ConnectionFailed(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| SignalingError::ConnectionFailed("invalid url".to_string()))?;

        if url.path() == "/" || url.path().is_empty() {
            url.set_path("/ws");
        }
        Ok(url.to_string())
    }

    /// Verbindet mit dem Relay und startet Read- und Write-Task
    pub async fn connect(server_url: &str) -> Result<Self, SignalingError> {
        let ws_url = Self::websocket_url(server_url)?;
        tracing::info!("Connecting to signaling relay: {}", ws_url);

        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<String>(100);
        let (event_tx, _) = broadcast::channel(100);
        let state = Arc::new(RwLock::new(ClientState { is_connected: true }));
        let routes: Arc<Mutex<Routes>> = Arc::new(Mutex::new(HashMap::new()));

        let _ = event_tx.send(TransportEvent::Connected);

        // Read-Task
        let state_clone = Arc::clone(&state);
        let routes_clone = Arc::clone(&routes);
        let event_tx_clone = event_tx.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => Self::handle_server_frame(frame, &routes_clone, &event_tx_clone),
                        Err(e) => tracing::warn!("Ignoring unknown relay frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by relay");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            state_clone.write().is_connected = false;
            // Abos schließen, damit die Empfänger `None` sehen
            routes_clone.lock().clear();
            let _ = event_tx_clone.send(TransportEvent::Disconnected);
        });

        // Write-Task
        let state_clone = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
            state_clone.write().is_connected = false;
            let _ = write.close().await;
        });

        Ok(Self {
            server_url: server_url.to_string(),
            state,
            tx,
            routes,
            next_id: AtomicU64::new(0),
            event_tx,
        })
    }

    /// Gibt einen Event-Receiver zurück
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.event_tx.subscribe()
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Startet einen Heartbeat-Task, der endet sobald die Verbindung weg ist
    pub fn start_heartbeat(&self, interval: Duration) {
        let tx = self.tx.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !state.read().is_connected {
                    tracing::info!("Heartbeat: relay disconnected, stopping heartbeat task");
                    break;
                }
                let frame = match serde_json::to_string(&ClientFrame::Heartbeat) {
                    Ok(frame) => frame,
                    Err(_) => break,
                };
                if let Err(e) = tx.try_send(frame) {
                    tracing::warn!("Failed to send heartbeat: {}", e);
                }
            }
        });
    }

    fn encode(frame: &ClientFrame<'_>) -> Result<String, SignalingError> {
        serde_json::to_string(frame).map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    async fn send_frame(&self, frame: &ClientFrame<'_>) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }
        let text = Self::encode(frame)?;
        self.tx
            .send(text)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Verteilt einen eingehenden Relay-Frame
    fn handle_server_frame(
        frame: ServerFrame,
        routes: &Arc<Mutex<Routes>>,
        event_tx: &broadcast::Sender<TransportEvent>,
    ) {
        match frame {
            ServerFrame::Broadcast { channel, message } => {
                let signal = match serde_json::from_value::<SignalMessage>(message) {
                    Ok(signal) => signal,
                    Err(e) => {
                        tracing::warn!("Dropping malformed signal on {}: {}", channel, e);
                        return;
                    }
                };

                let mut routes = routes.lock();
                if let Some(subs) = routes.get_mut(&channel) {
                    subs.retain(|(_, tx)| tx.send(signal.clone()).is_ok());
                }
            }

            ServerFrame::Error { code, message } => {
                tracing::error!("Relay error {}: {}", code, message);
                let _ = event_tx.send(TransportEvent::Error { code, message });
            }

            ServerFrame::Pong => {
                // Heartbeat-Response - nichts zu tun
            }
        }
    }
}

#[async_trait]
impl SignalingTransport for WsTransport {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, SignalingError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sub_tx, sub_rx) = mpsc::unbounded_channel();

        let first = {
            let mut routes = self.routes.lock();
            let subs = routes.entry(channel.to_string()).or_default();
            subs.push((id, sub_tx));
            subs.len() == 1
        };

        if first {
            if let Err(e) = self.send_frame(&ClientFrame::Subscribe { channel }).await {
                self.routes.lock().remove(channel);
                return Err(e);
            }
            tracing::debug!("Subscribed to {}", channel);
        }

        let routes = Arc::clone(&self.routes);
        let tx = self.tx.clone();
        let key = channel.to_string();
        Ok(Subscription::new(channel, sub_rx, move || {
            let last = {
                let mut routes = routes.lock();
                match routes.get_mut(&key) {
                    Some(subs) => {
                        subs.retain(|(sub_id, _)| *sub_id != id);
                        let empty = subs.is_empty();
                        if empty {
                            routes.remove(&key);
                        }
                        empty
                    }
                    None => false,
                }
            };

            if last {
                // try_send, weil Drop nicht async sein kann
                if let Ok(frame) = Self::encode(&ClientFrame::Unsubscribe { channel: &key }) {
                    let _ = tx.try_send(frame);
                }
            }
        }))
    }

    async fn publish(&self, channel: &str, message: &SignalMessage) -> Result<(), SignalingError> {
        self.send_frame(&ClientFrame::Broadcast { channel, message })
            .await
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("server_url", &self.server_url)
            .field("state", &*self.state.read())
            .finish()
    }
}
