//! Consult Call - P2P Anrufe innerhalb einer Konsultation
//!
//! Signaling und Session-Lebenszyklus für Eins-zu-eins Audio/Video-Anrufe:
//! - Pub/Sub-Kanal pro Session als Signaling-Transport
//! - WebRTC für die direkte Media-Verbindung
//! - exklusive Capture von Mikrofon und Kamera
//! - ein Actor pro Session als Zustandsmaschine

pub mod call_engine;
pub mod capture;
pub mod config;
pub mod logging;
pub mod signaling;
pub mod testing;

pub use call_engine::{
    CallError, CallEvent, CallSession, CallSnapshot, CallState, EndReason, IncomingCallInfo,
    RtcConnectionFactory, SessionRegistry,
};
pub use capture::{CaptureManager, DeviceError, LocalMedia, MediaDevices, RemoteMedia};
pub use config::{CallConfig, CollisionPolicy};
pub use signaling::{ParticipantId, SessionId, SignalingTransport, WsTransport};

use call_engine::PeerConnectionFactory;
use config::ConfigError;
use std::sync::Arc;
use std::time::Duration;

/// Intervall für Heartbeats an den Relay
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// ENDPOINT
// ============================================================================

/// Ein Endpunkt: eigene Identität, ein Transport, eine Capture und alle
/// Sessions, denen er beigetreten ist.
pub struct Endpoint {
    registry: SessionRegistry,
    transport: Arc<dyn SignalingTransport>,
}

impl Endpoint {
    /// Verbindet mit dem Relay aus `config.signaling_url` und nutzt echte
    /// WebRTC-Verbindungen.
    pub async fn connect(
        config: CallConfig,
        local_id: ParticipantId,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<Self, CallError> {
        let url = config
            .signaling_url
            .clone()
            .ok_or(ConfigError::MissingSignalingUrl)?;

        let transport = WsTransport::connect(&url).await?;
        transport.start_heartbeat(HEARTBEAT_INTERVAL);

        let factory = Arc::new(RtcConnectionFactory::new(&config));
        Ok(Self::with_transport(
            config,
            local_id,
            Arc::new(transport),
            devices,
            factory,
        ))
    }

    /// Endpunkt mit beliebigem Transport und Connection-Factory
    pub fn with_transport(
        config: CallConfig,
        local_id: ParticipantId,
        transport: Arc<dyn SignalingTransport>,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> Self {
        tracing::info!("Initializing endpoint {}", local_id);
        let capture = CaptureManager::new(devices, config.media);
        let registry = SessionRegistry::new(local_id, Arc::clone(&transport), capture, factory, config);
        Self { registry, transport }
    }

    pub fn local_id(&self) -> &ParticipantId {
        self.registry.local_id()
    }

    pub fn capture(&self) -> &CaptureManager {
        self.registry.capture()
    }

    pub fn transport(&self) -> Arc<dyn SignalingTransport> {
        Arc::clone(&self.transport)
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Tritt einer Session bei (oder liefert die bestehende)
    pub async fn join(&self, session_id: impl Into<SessionId>) -> Result<Arc<CallSession>, CallError> {
        self.registry.join(session_id).await
    }

    /// Verlässt alle Sessions und beendet laufende Anrufe
    pub async fn shutdown(&self) {
        self.registry.leave_all().await;
        tracing::info!("Endpoint {} shut down", self.local_id());
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("registry", &self.registry)
            .finish()
    }
}
