//! Test-Doubles für Capture und Peer Connection
//!
//! Ohne Geräte und ohne Netzwerk, aber mit derselben Offer/Answer-Logik
//! (Signaling State) wie eine echte Verbindung.

use crate::call_engine::{
    ConnectionEvent, ConnectionEvents, ConnectivityState, NegotiationError, NegotiationState,
    PeerConnection, PeerConnectionFactory,
};
use crate::capture::{CaptureStream, DeviceError, LocalTrack, MediaDevices, MediaKind, RemoteTrack, TrackSink};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Gültiger Host-Candidate für Tests
pub fn host_candidate(n: u8) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 192.0.2.{n} 5000{n} typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

// ============================================================================
// FAKE DEVICES
// ============================================================================

#[derive(Default)]
struct DevicesInner {
    denied: Mutex<HashSet<MediaKind>>,
    missing: Mutex<HashSet<MediaKind>>,
    unsupported: Mutex<HashSet<MediaKind>>,
    delay: Mutex<Option<Duration>>,
    sinks: Mutex<HashMap<MediaKind, TrackSink>>,
    live: AtomicUsize,
    opened: AtomicUsize,
    stopped: AtomicUsize,
}

/// Kamera und Mikrofon, die nur zählen
#[derive(Clone, Default)]
pub struct FakeDevices {
    inner: Arc<DevicesInner>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permission für `kind` verweigern
    pub fn deny(&self, kind: MediaKind) {
        self.inner.denied.lock().insert(kind);
    }

    /// Kein Gerät für `kind` vorhanden
    pub fn remove(&self, kind: MediaKind) {
        self.inner.missing.lock().insert(kind);
    }

    /// Backend ohne Quellen für `kind` (z.B. reines Audio-Backend)
    pub fn unsupported(&self, kind: MediaKind) {
        self.inner.unsupported.lock().insert(kind);
    }

    pub fn allow_all(&self) {
        self.inner.denied.lock().clear();
        self.inner.missing.lock().clear();
    }

    /// Jedes `open` dauert so lange (Permission-Prompt)
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock() = Some(delay);
    }

    /// Aktuell laufende Quellen
    pub fn live_streams(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sink der zuletzt geöffneten Quelle von `kind`
    pub fn sink(&self, kind: MediaKind) -> Option<TrackSink> {
        self.inner.sinks.lock().get(&kind).cloned()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    fn supports(&self, kind: MediaKind) -> bool {
        !self.inner.unsupported.lock().contains(&kind)
    }

    async fn open(
        &self,
        kind: MediaKind,
        sink: TrackSink,
    ) -> Result<Box<dyn CaptureStream>, DeviceError> {
        let delay = *self.inner.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.denied.lock().contains(&kind) {
            return Err(DeviceError::PermissionDenied(kind));
        }
        if self.inner.missing.lock().contains(&kind) {
            return Err(DeviceError::NotFound(kind));
        }

        self.inner.sinks.lock().insert(kind, sink);
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            devices: Arc::clone(&self.inner),
            stopped: false,
        }))
    }
}

impl std::fmt::Debug for FakeDevices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeDevices")
            .field("live", &self.live_streams())
            .finish()
    }
}

struct FakeStream {
    devices: Arc<DevicesInner>,
    stopped: bool,
}

impl CaptureStream for FakeStream {
    fn stop(&mut self) {
        if std::mem::replace(&mut self.stopped, true) {
            return;
        }
        self.devices.live.fetch_sub(1, Ordering::SeqCst);
        self.devices.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// FAKE CONNECTION
// ============================================================================

struct FakeState {
    negotiation: NegotiationState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    tracks: Vec<String>,
    candidates: Vec<IceCandidate>,
    closed: bool,
}

/// Peer Connection ohne Netzwerk
pub struct FakeConnection {
    id: usize,
    state: Mutex<FakeState>,
    events: Mutex<Option<ConnectionEvents>>,
}

impl FakeConnection {
    fn new(id: usize, events: ConnectionEvents) -> Self {
        Self {
            id,
            state: Mutex::new(FakeState {
                negotiation: NegotiationState::Stable,
                local: None,
                remote: None,
                tracks: Vec::new(),
                candidates: Vec::new(),
                closed: false,
            }),
            events: Mutex::new(Some(events)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Simuliert einen Callback der Verbindung
    pub fn emit(&self, event: ConnectionEvent) -> bool {
        match &*self.events.lock() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn emit_connectivity(&self, state: ConnectivityState) -> bool {
        self.emit(ConnectionEvent::ConnectivityChanged(state))
    }

    pub fn emit_track(&self, track: RemoteTrack) -> bool {
        self.emit(ConnectionEvent::TrackAdded(track))
    }

    pub fn emit_local_candidate(&self, candidate: IceCandidate) -> bool {
        self.emit(ConnectionEvent::CandidateDiscovered(candidate))
    }

    /// Ids der hinzugefügten lokalen Tracks
    pub fn tracks(&self) -> Vec<String> {
        self.state.lock().tracks.clone()
    }

    /// Erfolgreich hinzugefügte Remote-Candidates
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().candidates.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn fake_sdp(&self, kind: &str) -> String {
        format!(
            "v=0\r\no=- {id} 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=fake-{kind}:{id}\r\n",
            id = self.id
        )
    }

    fn open_state(&self) -> Result<parking_lot::MutexGuard<'_, FakeState>, NegotiationError> {
        let state = self.state.lock();
        if state.closed {
            return Err(NegotiationError::Closed);
        }
        Ok(state)
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), NegotiationError> {
        self.open_state()?.tracks.push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let state = self.open_state()?;
        if state.negotiation != NegotiationState::Stable {
            return Err(NegotiationError::UnexpectedDescription(state.negotiation));
        }
        Ok(SessionDescription::offer(self.fake_sdp("offer")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let state = self.open_state()?;
        if state.negotiation != NegotiationState::HaveRemoteOffer {
            return Err(NegotiationError::UnexpectedDescription(state.negotiation));
        }
        Ok(SessionDescription::answer(self.fake_sdp("answer")))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), NegotiationError> {
        let mut state = self.open_state()?;
        state.negotiation = match (desc.sdp_type, state.negotiation) {
            (SdpType::Offer, NegotiationState::Stable) => NegotiationState::HaveLocalOffer,
            (SdpType::Answer, NegotiationState::HaveRemoteOffer) => NegotiationState::Stable,
            (_, current) => return Err(NegotiationError::UnexpectedDescription(current)),
        };
        state.local = Some(desc.clone());
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        if !desc.sdp.starts_with("v=0") {
            return Err(NegotiationError::InvalidSdp(desc.sdp.clone()));
        }
        let mut state = self.open_state()?;
        state.negotiation = match (desc.sdp_type, state.negotiation) {
            (SdpType::Offer, NegotiationState::Stable) => NegotiationState::HaveRemoteOffer,
            (SdpType::Answer, NegotiationState::HaveLocalOffer) => NegotiationState::Stable,
            (_, current) => return Err(NegotiationError::UnexpectedDescription(current)),
        };
        state.remote = Some(desc.clone());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        let mut state = self.open_state()?;
        if state.remote.is_none() {
            return Err(NegotiationError::WebRTC("remote description not set".to_string()));
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(NegotiationError::InvalidCandidate(candidate.candidate.clone()));
        }
        state.candidates.push(candidate.clone());
        Ok(())
    }

    fn negotiation_state(&self) -> NegotiationState {
        let state = self.state.lock();
        if state.closed {
            NegotiationState::Closed
        } else {
            state.negotiation
        }
    }

    async fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        // Wie eine echte Verbindung meldet sie beim Schließen `Closed`
        self.emit_connectivity(ConnectivityState::Closed);
        self.events.lock().take();
    }
}

impl std::fmt::Debug for FakeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeConnection")
            .field("id", &self.id)
            .field("negotiation", &self.negotiation_state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// FAKE FACTORY
// ============================================================================

#[derive(Default)]
struct FactoryInner {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    failing: AtomicBool,
}

#[derive(Clone, Default)]
pub struct FakeConnectionFactory {
    inner: Arc<FactoryInner>,
}

impl FakeConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Alle bisher erzeugten Verbindungen
    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.inner.connections.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<FakeConnection>> {
        self.inner.connections.lock().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Noch nicht geschlossene Verbindungen
    pub fn live_connections(&self) -> usize {
        self.inner
            .connections
            .lock()
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeConnectionFactory {
    async fn create(
        &self,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(NegotiationError::WebRTC("connection factory failing".to_string()));
        }
        let mut connections = self.inner.connections.lock();
        let connection = Arc::new(FakeConnection::new(connections.len() + 1, events));
        connections.push(Arc::clone(&connection));
        Ok(connection)
    }
}

impl std::fmt::Debug for FakeConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeConnectionFactory")
            .field("created", &self.created())
            .field("live", &self.live_connections())
            .finish()
    }
}
