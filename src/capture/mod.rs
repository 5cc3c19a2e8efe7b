//! Capture Module - lokale Audio/Video-Aufnahme
//!
//! Dieses Modul verwaltet:
//! - exklusives Acquire/Release der Aufnahme
//! - Mute / Kamera aus auf Track-Ebene
//! - Media-Handles für lokale und entfernte Tracks
//! - Mikrofon über cpal (Feature `cpal-capture`)

#[cfg(feature = "cpal-capture")]
mod audio;
mod manager;
mod media;
pub mod pcm;

#[cfg(feature = "cpal-capture")]
pub use audio::{CpalDevices, MicrophoneStream};
pub use manager::{default_codec, CaptureManager, DeviceError, MediaDevices};
pub use media::{
    CaptureStream, LocalMedia, LocalTrack, MediaKind, RemoteMedia, RemoteTrack, TrackSink,
};
