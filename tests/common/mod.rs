//! Gemeinsame Helfer für die Integration Tests

#![allow(dead_code)]

use consult_call::capture::CaptureManager;
use consult_call::signaling::{
    MemoryHub, ParticipantId, SessionDescription, SessionId, Signal, SignalMessage,
};
use consult_call::testing::{FakeConnection, FakeConnectionFactory, FakeDevices};
use consult_call::{CallConfig, CallSession, CallState};
use std::sync::Arc;
use std::time::Duration;

pub const SESSION: u64 = 7;

pub fn test_config() -> CallConfig {
    CallConfig {
        ring_timeout_secs: None,
        ..CallConfig::default()
    }
}

pub fn channel(session: u64) -> String {
    SessionId::from(session).channel_name("webrtc-session-")
}

/// Ein Endpunkt mit Fake-Geräten und Fake-Verbindungen
pub struct Peer {
    pub id: ParticipantId,
    pub session: CallSession,
    pub devices: FakeDevices,
    pub factory: FakeConnectionFactory,
    pub capture: CaptureManager,
}

impl Peer {
    pub async fn join(hub: &MemoryHub, session: u64, id: &str) -> Self {
        Self::join_with(hub, session, id, test_config()).await
    }

    pub async fn join_with(hub: &MemoryHub, session: u64, id: &str, config: CallConfig) -> Self {
        let devices = FakeDevices::new();
        let factory = FakeConnectionFactory::new();
        let capture = CaptureManager::new(Arc::new(devices.clone()), config.media);
        let session = CallSession::join(
            SessionId::from(session),
            ParticipantId::from(id),
            Arc::new(hub.clone()),
            capture.clone(),
            Arc::new(factory.clone()),
            config,
        )
        .await
        .unwrap();

        Self {
            id: ParticipantId::from(id),
            session,
            devices,
            factory,
            capture,
        }
    }

    pub fn state(&self) -> CallState {
        self.session.state()
    }

    pub fn connection(&self) -> Arc<FakeConnection> {
        self.factory.last().expect("no connection created")
    }

    /// Keine Media, keine Verbindung, keine laufende Capture
    pub fn assert_released(&self) {
        assert_eq!(self.state(), CallState::Idle);
        assert!(self.session.snapshot().is_clear(), "{:?}", self.session.snapshot());
        assert_eq!(self.devices.live_streams(), 0, "leaked capture streams");
        assert!(!self.capture.is_held());
        assert_eq!(self.factory.live_connections(), 0, "leaked connections");
    }
}

pub fn offer_sdp(tag: &str) -> SessionDescription {
    SessionDescription::offer(format!(
        "v=0\r\no=- 42 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=remote-{tag}\r\n"
    ))
}

pub fn answer_sdp(tag: &str) -> SessionDescription {
    SessionDescription::answer(format!(
        "v=0\r\no=- 43 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=remote-{tag}\r\n"
    ))
}

/// Stellt ein Signal zu, als käme es von `from`
pub fn inject(hub: &MemoryHub, session: u64, from: &str, signal: Signal) {
    hub.deliver(
        &channel(session),
        SignalMessage::new(signal, ParticipantId::from(from)),
    );
}

/// Alle Signale, die `from` auf dem Kanal veröffentlicht hat
pub fn sent_by(hub: &MemoryHub, session: u64, from: &str) -> Vec<Signal> {
    let from = ParticipantId::from(from);
    hub.published(&channel(session))
        .into_iter()
        .filter(|m| m.is_from(&from))
        .map(|m| m.signal)
        .collect()
}

pub fn count_end_calls(signals: &[Signal]) -> usize {
    signals.iter().filter(|s| matches!(s, Signal::EndCall)).count()
}

/// Pollt bis `condition` gilt, höchstens zwei Sekunden
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
