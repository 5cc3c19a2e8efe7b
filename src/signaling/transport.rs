//! Transport-Abstraktion für den Signaling-Kanal
//!
//! Ein Kanal pro Session, Nachrichten gehen an alle Abonnenten des Kanals,
//! inklusive des Absenders. Keine Zustellgarantie, keine Reihenfolge.

use super::messages::{SignalFormatError, SignalMessage};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Failed to encode signal: {0}")]
    Encode(#[from] SignalFormatError),
}

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// Pub/Sub-Kanal, über den Signale zwischen den Endpunkten laufen
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Abonniert einen Kanal. Das Abo endet, wenn die [`Subscription`] gedroppt wird.
    async fn subscribe(&self, channel: &str) -> Result<Subscription, SignalingError>;

    /// Fire-and-forget, es gibt keine Bestätigung vom Empfänger
    async fn publish(&self, channel: &str, message: &SignalMessage) -> Result<(), SignalingError>;
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

/// Aktives Abo auf einen Kanal. Droppen meldet das Abo ab.
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<SignalMessage>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        channel: impl Into<String>,
        rx: mpsc::UnboundedReceiver<SignalMessage>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            rx,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Nächste Nachricht; `None` wenn der Transport den Kanal geschlossen hat
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SignalMessage> {
        self.rx.try_recv().ok()
    }

    /// Explizites Abmelden (entspricht Drop)
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            tracing::debug!("Unsubscribing from {}", self.channel);
            on_drop();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish()
    }
}
