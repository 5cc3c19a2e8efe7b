//! WebRTC Peer Connection
//!
//! Implementierung von [`PeerConnection`] auf Basis des `webrtc` Crates.

use super::connection::{
    ConnectionEvent, ConnectionEvents, ConnectivityState, NegotiationError, NegotiationState,
    PeerConnection, PeerConnectionFactory,
};
use crate::capture::{LocalTrack, RemoteTrack};
use crate::config::CallConfig;
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

fn webrtc_error(e: webrtc::Error) -> NegotiationError {
    NegotiationError::WebRTC(e.to_string())
}

// ============================================================================
// FACTORY
// ============================================================================

/// Erstellt echte WebRTC-Verbindungen mit den konfigurierten ICE Servern
#[derive(Debug, Clone)]
pub struct RtcConnectionFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl RtcConnectionFactory {
    pub fn new(config: &CallConfig) -> Self {
        Self {
            ice_servers: config.rtc_ice_servers(),
        }
    }

    pub fn with_ice_servers(ice_servers: Vec<RTCIceServer>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcConnectionFactory {
    async fn create(
        &self,
        events: ConnectionEvents,
    ) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        // Media Engine mit den Standard-Codecs (Opus, PCMU, VP8, ...)
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(webrtc_error)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(webrtc_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(webrtc_error)?);
        register_handlers(&pc, events);

        tracing::debug!("Created peer connection");
        Ok(Arc::new(RtcConnection {
            pc,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Registriert Event Handler für die Peer Connection
fn register_handlers(pc: &RTCPeerConnection, events: ConnectionEvents) {
    // Connection State Handler
    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        tracing::info!("Peer connection state: {:?}", s);
        let _ = tx.send(ConnectionEvent::ConnectivityChanged(ConnectivityState::from(s)));
        Box::pin(async {})
    }));

    // ICE Candidate Handler
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        if let Some(c) = candidate {
            match c.to_json() {
                Ok(init) => {
                    let _ = tx.send(ConnectionEvent::CandidateDiscovered(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
                Err(e) => tracing::warn!("Failed to serialize local candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    // Track Handler (eingehende Tracks)
    let tx = events;
    pc.on_track(Box::new(move |track, _, _| {
        tracing::info!("Received track: {} ({:?})", track.id(), track.kind());
        let _ = tx.send(ConnectionEvent::TrackAdded(RemoteTrack::from_rtp(track)));
        Box::pin(async {})
    }));
}

// ============================================================================
// CONNECTION
// ============================================================================

pub struct RtcConnection {
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl RtcConnection {
    pub fn peer_connection(&self) -> Arc<RTCPeerConnection> {
        Arc::clone(&self.pc)
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    parsed.map_err(|e| NegotiationError::InvalidSdp(e.to_string()))
}

#[async_trait]
impl PeerConnection for RtcConnection {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let rtp_sender = self
            .pc
            .add_track(track.rtp_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(webrtc_error)?;

        // RTCP lesen, damit die Interceptors (NACK, Reports) arbeiten
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        let offer = self.pc.create_offer(None).await.map_err(webrtc_error)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        let answer = self.pc.create_answer(None).await.map_err(webrtc_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let desc = to_rtc_description(desc)?;
        self.pc.set_local_description(desc).await.map_err(webrtc_error)
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let desc = to_rtc_description(desc)?;
        self.pc.set_remote_description(desc).await.map_err(webrtc_error)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| NegotiationError::InvalidCandidate(e.to_string()))
    }

    fn negotiation_state(&self) -> NegotiationState {
        if self.closed.load(Ordering::Acquire) {
            return NegotiationState::Closed;
        }
        NegotiationState::from(self.pc.signaling_state())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.pc.close().await {
            tracing::warn!("Failed to close peer connection: {}", e);
        }
    }
}

impl std::fmt::Debug for RtcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcConnection")
            .field("negotiation_state", &self.negotiation_state())
            .field("connection_state", &self.pc.connection_state())
            .finish()
    }
}
