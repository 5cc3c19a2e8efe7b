//! Abstraktion der Peer Connection
//!
//! Der Coordinator spricht nur mit [`PeerConnection`]. Callbacks der
//! Verbindung (neuer Track, lokaler Candidate, Connectivity) kommen als
//! [`ConnectionEvent`] über einen Channel zurück.

use crate::capture::{LocalTrack, RemoteTrack};
use crate::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NegotiationError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("Unexpected description in signaling state {0:?}")]
    UnexpectedDescription(NegotiationState),

    #[error("Connection is closed")]
    Closed,
}

// ============================================================================
// STATES / EVENTS
// ============================================================================

/// Aggregierter Verbindungsstatus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// Zustände, in denen der Anruf als verloren gilt
    pub fn is_lost(self) -> bool {
        matches!(
            self,
            ConnectivityState::Disconnected | ConnectivityState::Failed | ConnectivityState::Closed
        )
    }
}

impl From<RTCPeerConnectionState> for ConnectivityState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => ConnectivityState::Connecting,
            RTCPeerConnectionState::Connected => ConnectivityState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectivityState::Failed,
            RTCPeerConnectionState::Closed => ConnectivityState::Closed,
            _ => ConnectivityState::New,
        }
    }
}

/// Offer/Answer-Stand der Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

impl From<RTCSignalingState> for NegotiationState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveRemotePranswer => {
                NegotiationState::HaveLocalOffer
            }
            RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveLocalPranswer => {
                NegotiationState::HaveRemoteOffer
            }
            RTCSignalingState::Closed => NegotiationState::Closed,
            _ => NegotiationState::Stable,
        }
    }
}

/// Callbacks der Verbindung
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    TrackAdded(RemoteTrack),
    CandidateDiscovered(IceCandidate),
    ConnectivityChanged(ConnectivityState),
}

pub type ConnectionEvents = mpsc::UnboundedSender<ConnectionEvent>;

// ============================================================================
// TRAITS
// ============================================================================

/// ICE-fähige Peer Connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), NegotiationError>;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), NegotiationError>;

    async fn set_remote_description(&self, desc: &SessionDescription)
        -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), NegotiationError>;

    fn negotiation_state(&self) -> NegotiationState;

    /// Wartet die Verbindung noch auf eine Answer?
    fn expects_answer(&self) -> bool {
        self.negotiation_state() == NegotiationState::HaveLocalOffer
    }

    /// Schließt die Verbindung; mehrfacher Aufruf ist ein No-op
    async fn close(&self);
}

/// Erzeugt pro Anrufversuch eine frische Verbindung
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, events: ConnectionEvents)
        -> Result<Arc<dyn PeerConnection>, NegotiationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_states() {
        assert!(ConnectivityState::from(RTCPeerConnectionState::Failed).is_lost());
        assert!(ConnectivityState::from(RTCPeerConnectionState::Disconnected).is_lost());
        assert!(ConnectivityState::from(RTCPeerConnectionState::Closed).is_lost());
        assert!(!ConnectivityState::from(RTCPeerConnectionState::Connected).is_lost());
        assert!(!ConnectivityState::from(RTCPeerConnectionState::Unspecified).is_lost());
    }

    #[test]
    fn signaling_state_mapping() {
        assert_eq!(
            NegotiationState::from(RTCSignalingState::HaveLocalOffer),
            NegotiationState::HaveLocalOffer
        );
        assert_eq!(
            NegotiationState::from(RTCSignalingState::HaveRemoteOffer),
            NegotiationState::HaveRemoteOffer
        );
        assert_eq!(NegotiationState::from(RTCSignalingState::Stable), NegotiationState::Stable);
    }
}
