//! Call State, Events und Snapshot

use super::connection::ConnectivityState;
use crate::capture::{LocalMedia, RemoteMedia, RemoteTrack};
use crate::signaling::{ParticipantId, SessionId};
use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// CALL STATE
// ============================================================================

/// Aktueller Status eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Kein aktiver Anruf
    #[default]
    Idle,
    /// Eigenes Offer wird erzeugt oder wartet auf die Answer
    OutgoingPending,
    /// Eingehendes Offer wartet auf accept / decline
    IncomingPending,
    /// Offer und Answer ausgetauscht
    Active,
    /// Anruf beendet, geht sofort zurück auf `Idle`
    Ended,
}

impl CallState {
    pub fn is_idle(self) -> bool {
        self == CallState::Idle
    }

    pub fn is_pending(self) -> bool {
        matches!(self, CallState::OutgoingPending | CallState::IncomingPending)
    }
}

/// Warum ein Anruf beendet wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    LocalHangup,
    Declined,
    RemoteHangup,
    ConnectivityLost,
    NoAnswer,
    SetupFailed,
}

/// Eingehender Anruf, solange er auf eine Entscheidung wartet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncomingCallInfo {
    pub session_id: SessionId,
    pub caller_id: ParticipantId,
    pub received_at: DateTime<Utc>,
}

// ============================================================================
// EVENTS
// ============================================================================

/// Events die von einer CallSession ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallState),
    IncomingCall(IncomingCallInfo),
    RemoteTrackAdded(RemoteTrack),
    ConnectivityChanged(ConnectivityState),
    CallEnded { reason: EndReason },
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Alles, was die UI über eine Session lesen kann
#[derive(Debug, Clone, Default)]
pub struct CallSnapshot {
    pub state: CallState,
    pub local_media: Option<LocalMedia>,
    pub remote_media: Option<RemoteMedia>,
    pub incoming_call: Option<IncomingCallInfo>,
    /// Gegenstelle des laufenden Anrufs
    pub peer_id: Option<ParticipantId>,
    pub last_end_reason: Option<EndReason>,
}

impl CallSnapshot {
    /// Keine lokalen oder entfernten Media-Handles mehr
    pub fn is_clear(&self) -> bool {
        self.local_media.is_none() && self.remote_media.is_none() && self.incoming_call.is_none()
    }
}
