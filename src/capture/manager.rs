//! Capture Manager - exklusiver Zugriff auf Mikrofon und Kamera
//!
//! Pro Endpunkt existiert höchstens eine aktive Aufnahme. Wer sie hält, gibt
//! sie mit [`CaptureManager::release`] wieder frei; das ist idempotent.

use super::media::{CaptureStream, LocalMedia, LocalTrack, MediaKind, TrackSink};
use crate::config::MediaConstraints;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Permission to capture {0:?} was denied")]
    PermissionDenied(MediaKind),

    #[error("No {0:?} capture device found")]
    NotFound(MediaKind),

    #[error("Capture devices are held by another call")]
    Busy,

    #[error("No media kinds requested")]
    NothingRequested,

    #[error("Capture backend error: {0}")]
    Backend(String),
}

// ============================================================================
// PLATFORM BOUNDARY
// ============================================================================

/// Plattform-API für Media-Capture
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Codec, in dem die Quelle für `kind` ihre Frames liefert
    fn codec(&self, kind: MediaKind) -> RTCRtpCodecCapability {
        default_codec(kind)
    }

    /// Kann das Backend überhaupt Quellen dieser Art liefern? Nicht
    /// unterstützte Arten werden beim Acquire übersprungen.
    fn supports(&self, _kind: MediaKind) -> bool {
        true
    }

    /// Öffnet die Quelle für `kind`. Darf dauern (Permission-Prompt).
    async fn open(&self, kind: MediaKind, sink: TrackSink)
        -> Result<Box<dyn CaptureStream>, DeviceError>;
}

pub fn default_codec(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

// ============================================================================
// CAPTURE MANAGER
// ============================================================================

enum Slot {
    Free,
    Acquiring,
    Held(LocalMedia),
}

struct CaptureInner {
    devices: Arc<dyn MediaDevices>,
    constraints: MediaConstraints,
    slot: Mutex<Slot>,
}

/// Verwaltet die lokale Aufnahme eines Endpunkts
#[derive(Clone)]
pub struct CaptureManager {
    inner: Arc<CaptureInner>,
}

impl CaptureManager {
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: MediaConstraints) -> Self {
        Self {
            inner: Arc::new(CaptureInner {
                devices,
                constraints,
                slot: Mutex::new(Slot::Free),
            }),
        }
    }

    pub fn constraints(&self) -> MediaConstraints {
        self.inner.constraints
    }

    /// Angeforderte Arten, die das Backend auch liefern kann
    pub fn requested_kinds(&self) -> Vec<MediaKind> {
        self.inner
            .constraints
            .kinds()
            .into_iter()
            .filter(|&kind| self.inner.devices.supports(kind))
            .collect()
    }

    /// Fordert Audio+Video an (je nach Constraints) und hält das Handle
    /// exklusiv bis zum `release`.
    pub async fn acquire(&self) -> Result<LocalMedia, DeviceError> {
        let kinds = self.requested_kinds();
        if kinds.is_empty() {
            return Err(DeviceError::NothingRequested);
        }

        {
            let mut slot = self.inner.slot.lock();
            if !matches!(*slot, Slot::Free) {
                return Err(DeviceError::Busy);
            }
            *slot = Slot::Acquiring;
        }

        // Wird der Aufruf abgebrochen, bevor die Quellen offen sind, ist der
        // Slot sofort wieder frei
        let mut pending = PendingAcquire {
            slot: &self.inner.slot,
            armed: true,
        };
        let result = self.open_tracks(&kinds).await;
        pending.armed = false;

        match result {
            Ok(media) => {
                *self.inner.slot.lock() = Slot::Held(media.clone());
                tracing::info!(
                    "Acquired local media {} ({} track(s))",
                    media.id(),
                    media.tracks().len()
                );
                Ok(media)
            }
            Err(e) => {
                *self.inner.slot.lock() = Slot::Free;
                tracing::warn!("Capture acquisition failed: {}", e);
                Err(e)
            }
        }
    }

    async fn open_tracks(&self, kinds: &[MediaKind]) -> Result<LocalMedia, DeviceError> {
        let stream_id = uuid::Uuid::new_v4().to_string();
        let mut tracks: Vec<LocalTrack> = Vec::with_capacity(kinds.len());

        for &kind in kinds {
            let codec = self.inner.devices.codec(kind);
            let (track, sink) = LocalTrack::new(kind, codec, &stream_id);

            match self.inner.devices.open(kind, sink).await {
                Ok(source) => {
                    track.attach_source(source);
                    tracks.push(track);
                }
                Err(e) => {
                    // Bereits geöffnete Quellen wieder schließen
                    track.stop();
                    for opened in &tracks {
                        opened.stop();
                    }
                    return Err(e);
                }
            }
        }

        Ok(LocalMedia::new(stream_id, tracks))
    }

    /// Stoppt und gibt alle Tracks frei. Mehrfacher Aufruf ist ein No-op.
    pub fn release(&self, media: &LocalMedia) {
        let stopped = media.stop_all();

        let mut slot = self.inner.slot.lock();
        if let Slot::Held(current) = &*slot {
            if current.same_as(media) {
                *slot = Slot::Free;
            }
        }

        if stopped {
            tracing::info!("Released local media {}", media.id());
        }
    }

    /// Aktuell gehaltene Aufnahme
    pub fn current(&self) -> Option<LocalMedia> {
        match &*self.inner.slot.lock() {
            Slot::Held(media) => Some(media.clone()),
            _ => None,
        }
    }

    pub fn is_held(&self) -> bool {
        !matches!(*self.inner.slot.lock(), Slot::Free)
    }

    /// Mute / Unmute des ausgehenden Audios, ohne neu zu verhandeln
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.set_enabled(MediaKind::Audio, enabled);
    }

    /// Kamera an / aus, ohne neu zu verhandeln
    pub fn set_video_enabled(&self, enabled: bool) {
        self.set_enabled(MediaKind::Video, enabled);
    }

    /// `None` wenn keine Aufnahme gehalten wird oder sie keinen Track der Art hat
    pub fn is_enabled(&self, kind: MediaKind) -> Option<bool> {
        let media = self.current()?;
        let mut tracks = media.tracks_of(kind).peekable();
        tracks.peek()?;
        Some(tracks.all(|t| t.is_enabled()))
    }

    fn set_enabled(&self, kind: MediaKind, enabled: bool) {
        if let Some(media) = self.current() {
            for track in media.tracks_of(kind) {
                track.set_enabled(enabled);
            }
            tracing::debug!("{:?} enabled: {}", kind, enabled);
        }
    }
}

struct PendingAcquire<'a> {
    slot: &'a Mutex<Slot>,
    armed: bool,
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Acquiring) {
            *slot = Slot::Free;
            tracing::debug!("Capture acquisition cancelled");
        }
    }
}

impl std::fmt::Debug for CaptureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureManager")
            .field("constraints", &self.inner.constraints)
            .field("held", &self.is_held())
            .finish()
    }
}
