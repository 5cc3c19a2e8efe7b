//! In-Process Broadcast-Hub
//!
//! Verhält sich wie der externe Pub/Sub-Dienst: jede Nachricht geht an alle
//! Abonnenten des Kanals, auch an den Absender. Nützlich für Tests und für
//! zwei Endpunkte im selben Prozess.

use super::messages::SignalMessage;
use super::transport::{SignalingError, SignalingTransport, Subscription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

type Subscribers = Vec<(u64, mpsc::UnboundedSender<SignalMessage>)>;

#[derive(Default)]
struct HubInner {
    channels: Mutex<HashMap<String, Subscribers>>,
    history: Mutex<Vec<(String, SignalMessage)>>,
    next_id: AtomicU64,
    failing: AtomicBool,
}

/// Broadcast-Transport im Speicher
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lässt alle folgenden `publish`-Aufrufe fehlschlagen
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Alle bisher erfolgreich veröffentlichten Nachrichten eines Kanals
    pub fn published(&self, channel: &str) -> Vec<SignalMessage> {
        self.inner
            .history
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Stellt eine Nachricht zu, ohne den Verlauf oder den Fehlermodus zu berücksichtigen
    pub fn deliver(&self, channel: &str, message: SignalMessage) -> usize {
        let mut channels = self.inner.channels.lock();
        let Some(subs) = channels.get_mut(channel) else {
            return 0;
        };
        subs.retain(|(_, tx)| tx.send(message.clone()).is_ok());
        subs.len()
    }
}

#[async_trait]
impl SignalingTransport for MemoryHub {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, SignalingError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner
            .channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));

        let inner = Arc::clone(&self.inner);
        let key = channel.to_string();
        Ok(Subscription::new(channel, rx, move || {
            let mut channels = inner.channels.lock();
            if let Some(subs) = channels.get_mut(&key) {
                subs.retain(|(sub_id, _)| *sub_id != id);
                if subs.is_empty() {
                    channels.remove(&key);
                }
            }
        }))
    }

    async fn publish(&self, channel: &str, message: &SignalMessage) -> Result<(), SignalingError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(SignalingError::SendFailed("hub is failing".to_string()));
        }

        // Einmal über die Wire-Form, damit Tests dasselbe sehen wie der echte Kanal
        let wire = message.to_json()?;
        let decoded = SignalMessage::from_json(&wire)?;

        self.inner
            .history
            .lock()
            .push((channel.to_string(), decoded.clone()));
        let delivered = self.deliver(channel, decoded);
        tracing::trace!("Published {:?} on {} to {} subscriber(s)", message.signal.kind(), channel, delivered);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHub")
            .field("channels", &self.inner.channels.lock().len())
            .finish()
    }
}
