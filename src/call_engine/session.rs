//! Call Session - öffentliche API für die UI
//!
//! Jede Operation wird an den Coordinator der Session geschickt und kehrt
//! erst zurück, wenn der neue Zustand im Snapshot sichtbar ist.

use super::connection::PeerConnectionFactory;
use super::coordinator::{Command, Coordinator, Reply, SessionContext};
use super::state::{CallEvent, CallSnapshot, CallState, IncomingCallInfo};
use crate::capture::{CaptureManager, DeviceError, LocalMedia, RemoteMedia};
use crate::config::{CallConfig, ConfigError};
use crate::signaling::{ParticipantId, SessionId, SignalingError, SignalingTransport};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CallError {
    #[error("Capture error: {0}")]
    Device(#[from] DeviceError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Not possible while {0:?}")]
    InvalidState(CallState),

    #[error("Call session is closed")]
    SessionClosed,
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Ein-zu-eins Anruf innerhalb einer Session (Konsultation)
pub struct CallSession {
    session_id: SessionId,
    local_id: ParticipantId,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: Arc<RwLock<CallSnapshot>>,
    events: broadcast::Sender<CallEvent>,
    capture: CaptureManager,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl CallSession {
    /// Abonniert den Kanal der Session und startet ihren Coordinator
    pub async fn join(
        session_id: SessionId,
        local_id: ParticipantId,
        transport: Arc<dyn SignalingTransport>,
        capture: CaptureManager,
        factory: Arc<dyn PeerConnectionFactory>,
        config: CallConfig,
    ) -> Result<Self, CallError> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let ctx = SessionContext {
            session_id: session_id.clone(),
            local_id: local_id.clone(),
            config,
            transport,
            capture: capture.clone(),
            factory,
        };

        let channel = ctx.channel();
        let subscription = ctx.transport.subscribe(&channel).await?;
        tracing::info!("Joined {} as {}", channel, local_id);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let snapshot = Arc::new(RwLock::new(CallSnapshot::default()));
        let coordinator = Coordinator::new(
            ctx,
            subscription,
            commands_rx,
            Arc::clone(&snapshot),
            events.clone(),
        );
        let actor = tokio::spawn(coordinator.run());

        Ok(Self {
            session_id,
            local_id,
            commands,
            snapshot,
            events,
            capture,
            actor: Mutex::new(Some(actor)),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.read().clone()
    }

    pub fn state(&self) -> CallState {
        self.snapshot.read().state
    }

    pub fn local_media(&self) -> Option<LocalMedia> {
        self.snapshot.read().local_media.clone()
    }

    pub fn remote_media(&self) -> Option<RemoteMedia> {
        self.snapshot.read().remote_media.clone()
    }

    /// Nur gesetzt solange ein eingehender Anruf auf Antwort wartet
    pub fn incoming_call(&self) -> Option<IncomingCallInfo> {
        self.snapshot.read().incoming_call.clone()
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Startet einen ausgehenden Anruf. Kehrt zurück, sobald das Offer
    /// verschickt wurde (oder der Versuch beendet ist).
    pub async fn start(&self) -> Result<(), CallError> {
        self.request(Command::Start).await?
    }

    /// Nimmt den wartenden Anruf an; ohne wartenden Anruf ein No-op
    pub async fn accept(&self) -> Result<(), CallError> {
        self.request(Command::Accept).await?
    }

    /// Lehnt den wartenden Anruf ab bzw. legt auf
    pub async fn decline(&self) -> Result<(), CallError> {
        self.request(Command::Decline).await
    }

    /// Legt auf. Capture und Verbindung sind bei Rückkehr freigegeben.
    pub async fn end(&self) -> Result<(), CallError> {
        self.request(Command::End).await
    }

    /// Wartet bis alle bisher zugestellten Signale verarbeitet sind
    pub async fn flush(&self) -> Result<(), CallError> {
        self.request(Command::Flush).await
    }

    /// Mute / Unmute, ohne neu zu verhandeln. Wirkt nur, solange diese
    /// Session die Aufnahme hält.
    pub fn set_audio_enabled(&self, enabled: bool) {
        if self.holds_capture() {
            self.capture.set_audio_enabled(enabled);
        }
    }

    /// Kamera an / aus, ohne neu zu verhandeln
    pub fn set_video_enabled(&self, enabled: bool) {
        if self.holds_capture() {
            self.capture.set_video_enabled(enabled);
        }
    }

    fn holds_capture(&self) -> bool {
        match (self.local_media(), self.capture.current()) {
            (Some(ours), Some(held)) => ours.same_as(&held),
            _ => false,
        }
    }

    /// Beendet einen laufenden Anruf und meldet das Abo ab. Danach liefern
    /// alle Operationen [`CallError::SessionClosed`].
    pub async fn leave(&self) {
        if self.request(Command::Leave).await.is_err() {
            return;
        }
        let actor = self.actor.lock().take();
        if let Some(actor) = actor {
            if let Err(e) = actor.await {
                tracing::warn!("Coordinator task failed: {}", e);
            }
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| CallError::SessionClosed)?;
        rx.await.map_err(|_| CallError::SessionClosed)
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("session_id", &self.session_id)
            .field("local_id", &self.local_id)
            .field("state", &self.state())
            .finish()
    }
}
