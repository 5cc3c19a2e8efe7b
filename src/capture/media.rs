//! Lokale und entfernte Media-Handles
//!
//! Ein [`LocalTrack`] verbindet eine Capture-Quelle mit dem ausgehenden
//! WebRTC-Track. Die Quelle schreibt über ihren [`TrackSink`], der Frames
//! verwirft solange der Track deaktiviert (Mute / Kamera aus) ist.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for MediaKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Video => MediaKind::Video,
            _ => MediaKind::Audio,
        }
    }
}

/// Laufende Capture-Quelle eines Tracks (Mikrofon, Kamera, ...)
pub trait CaptureStream: Send {
    /// Stoppt die Quelle; wird genau einmal aufgerufen
    fn stop(&mut self);
}

// ============================================================================
// TRACK SINK
// ============================================================================

#[derive(Debug)]
struct TrackFlags {
    enabled: AtomicBool,
    live: AtomicBool,
}

/// Schreibseite eines lokalen Tracks, wird der Capture-Quelle übergeben
#[derive(Clone)]
pub struct TrackSink {
    rtp: Arc<TrackLocalStaticSample>,
    flags: Arc<TrackFlags>,
    runtime: Option<tokio::runtime::Handle>,
}

impl TrackSink {
    pub fn is_live(&self) -> bool {
        self.flags.live.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.enabled.load(Ordering::Acquire)
    }

    /// Schreibt ein kodiertes Frame. Gibt `false` zurück, sobald der Track
    /// gestoppt wurde und die Quelle aufhören soll.
    pub async fn write(&self, data: Bytes, duration: Duration) -> bool {
        if !self.is_live() {
            return false;
        }
        if !self.is_enabled() {
            return true;
        }

        let sample = Sample {
            data,
            duration,
            ..Default::default()
        };
        if let Err(e) = self.rtp.write_sample(&sample).await {
            tracing::trace!("Dropping sample on {}: {}", self.rtp.id(), e);
        }
        true
    }

    /// Wie [`TrackSink::write`], für Capture-Threads außerhalb der Runtime
    pub fn blocking_write(&self, data: Bytes, duration: Duration) -> bool {
        match &self.runtime {
            Some(handle) => handle.block_on(self.write(data, duration)),
            None => self.is_live(),
        }
    }
}

// ============================================================================
// LOCAL TRACK
// ============================================================================

struct LocalTrackInner {
    id: String,
    kind: MediaKind,
    flags: Arc<TrackFlags>,
    rtp: Arc<TrackLocalStaticSample>,
    source: Mutex<Option<Box<dyn CaptureStream>>>,
}

/// Ein lokal aufgenommener Audio- oder Video-Track
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<LocalTrackInner>,
}

impl LocalTrack {
    pub(crate) fn new(
        kind: MediaKind,
        codec: RTCRtpCodecCapability,
        stream_id: &str,
    ) -> (Self, TrackSink) {
        let id = format!("{}-{}", stream_id, kind_label(kind));
        let rtp = Arc::new(TrackLocalStaticSample::new(
            codec,
            id.clone(),
            stream_id.to_string(),
        ));
        let flags = Arc::new(TrackFlags {
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
        });

        let sink = TrackSink {
            rtp: Arc::clone(&rtp),
            flags: Arc::clone(&flags),
            runtime: tokio::runtime::Handle::try_current().ok(),
        };

        let track = Self {
            inner: Arc::new(LocalTrackInner {
                id,
                kind,
                flags,
                rtp,
                source: Mutex::new(None),
            }),
        };
        (track, sink)
    }

    pub(crate) fn attach_source(&self, source: Box<dyn CaptureStream>) {
        *self.inner.source.lock() = Some(source);
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.flags.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.flags.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        self.inner.flags.live.load(Ordering::Acquire)
    }

    /// Der ausgehende WebRTC-Track, der an die Verbindung gehängt wird
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.inner.rtp)
    }

    /// Stoppt die Quelle; mehrfacher Aufruf ist ein No-op
    pub fn stop(&self) {
        if !self.inner.flags.live.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(mut source) = self.inner.source.lock().take() {
            source.stop();
        }
        tracing::debug!("Stopped local track {}", self.inner.id);
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

fn kind_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    }
}

// ============================================================================
// LOCAL MEDIA
// ============================================================================

struct LocalMediaInner {
    id: String,
    tracks: Vec<LocalTrack>,
    released: AtomicBool,
}

impl Drop for LocalMediaInner {
    fn drop(&mut self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Handle auf die lokale Aufnahme (alle Tracks eines Capture-Vorgangs)
#[derive(Clone)]
pub struct LocalMedia {
    inner: Arc<LocalMediaInner>,
}

impl LocalMedia {
    pub(crate) fn new(id: String, tracks: Vec<LocalTrack>) -> Self {
        Self {
            inner: Arc::new(LocalMediaInner {
                id,
                tracks,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Stream-Id, unter der die Tracks ausgehandelt werden
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.inner.tracks
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &LocalTrack> {
        self.inner.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn live_track_count(&self) -> usize {
        self.inner.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Gleiches Capture-Handle?
    pub fn same_as(&self, other: &LocalMedia) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stoppt alle Tracks. `true` beim ersten Aufruf.
    pub(crate) fn stop_all(&self) -> bool {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        for track in &self.inner.tracks {
            track.stop();
        }
        true
    }
}

impl PartialEq for LocalMedia {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("id", &self.inner.id)
            .field("tracks", &self.inner.tracks)
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================================================
// REMOTE MEDIA
// ============================================================================

/// Ein vom Peer empfangener Track
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    rtp: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            rtp: None,
        }
    }

    pub(crate) fn from_rtp(track: Arc<TrackRemote>) -> Self {
        Self {
            id: track.id(),
            stream_id: track.stream_id(),
            kind: MediaKind::from(track.kind()),
            rtp: Some(track),
        }
    }

    /// Zugriff auf den RTP-Stream, falls die Verbindung ein echter WebRTC-Peer ist
    pub fn rtp_track(&self) -> Option<Arc<TrackRemote>> {
        self.rtp.clone()
    }
}

impl PartialEq for RemoteTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.stream_id == other.stream_id && self.kind == other.kind
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Alle bisher eingetroffenen Tracks des Peers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteMedia {
    tracks: Vec<RemoteTrack>,
}

impl RemoteMedia {
    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub(crate) fn add(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.contains(&track) {
            return false;
        }
        self.tracks.push(track);
        true
    }
}
