//! Message Types für das Signaling-Protokoll
//!
//! Jede Nachricht auf dem Session-Kanal hat die Form
//! `{ "type": ..., "payload": ..., "senderId": ... }`. Intern arbeiten wir mit
//! dem typisierten [`Signal`]-Enum, die Wire-Form wird nur beim (De)Serialisieren
//! benutzt.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// IDENTITIES
// ============================================================================

/// Id der Konsultation, die genau zwei Teilnehmer teilen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name des Broadcast-Kanals, z.B. `webrtc-session-7`
    pub fn channel_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Eindeutige Kennung eines Endpunkts. Wird an jedes ausgehende Signal gehängt,
/// damit das eigene Echo verworfen werden kann.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Zufällige Kennung (UUID v4)
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session Description (Offer oder Answer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate im Browser-kompatiblen JSON-Format
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

// ============================================================================
// SIGNALS
// ============================================================================

/// Typisierter Inhalt einer Signal-Nachricht
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    EndCall,
}

impl Signal {
    pub fn kind(&self) -> SignalType {
        match self {
            Signal::Offer(_) => SignalType::Offer,
            Signal::Answer(_) => SignalType::Answer,
            Signal::IceCandidate(_) => SignalType::IceCandidate,
            Signal::EndCall => SignalType::EndCall,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalType {
    Offer,
    Answer,
    IceCandidate,
    EndCall,
}

/// Nachricht auf dem Session-Kanal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireSignal", into = "WireSignal")]
pub struct SignalMessage {
    pub signal: Signal,
    pub sender_id: ParticipantId,
}

impl SignalMessage {
    pub fn new(signal: Signal, sender_id: ParticipantId) -> Self {
        Self { signal, sender_id }
    }

    pub fn is_from(&self, participant: &ParticipantId) -> bool {
        &self.sender_id == participant
    }

    pub fn to_json(&self) -> Result<String, SignalFormatError> {
        serde_json::to_string(self).map_err(|e| SignalFormatError::Json(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, SignalFormatError> {
        serde_json::from_str(text).map_err(|e| SignalFormatError::Json(e.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalFormatError {
    #[error("Invalid {kind:?} payload: {reason}")]
    InvalidPayload { kind: SignalType, reason: String },

    #[error("Invalid signal JSON: {0}")]
    Json(String),
}

/// Wire-Form, exakt wie sie über den Kanal geht
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireSignal {
    #[serde(rename = "type")]
    kind: SignalType,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "senderId")]
    sender_id: ParticipantId,
}

impl From<SignalMessage> for WireSignal {
    fn from(msg: SignalMessage) -> Self {
        let kind = msg.signal.kind();
        let payload = match msg.signal {
            Signal::Offer(desc) | Signal::Answer(desc) => {
                serde_json::to_value(desc).unwrap_or_default()
            }
            Signal::IceCandidate(candidate) => serde_json::to_value(candidate).unwrap_or_default(),
            Signal::EndCall => serde_json::Value::Null,
        };

        Self {
            kind,
            payload,
            sender_id: msg.sender_id,
        }
    }
}

impl TryFrom<WireSignal> for SignalMessage {
    type Error = SignalFormatError;

    fn try_from(wire: WireSignal) -> Result<Self, Self::Error> {
        let kind = wire.kind;
        let invalid = |e: serde_json::Error| SignalFormatError::InvalidPayload {
            kind,
            reason: e.to_string(),
        };

        let signal = match kind {
            SignalType::Offer => Signal::Offer(serde_json::from_value(wire.payload).map_err(invalid)?),
            SignalType::Answer => {
                Signal::Answer(serde_json::from_value(wire.payload).map_err(invalid)?)
            }
            SignalType::IceCandidate => {
                Signal::IceCandidate(serde_json::from_value(wire.payload).map_err(invalid)?)
            }
            SignalType::EndCall => Signal::EndCall,
        };

        Ok(Self {
            signal,
            sender_id: wire.sender_id,
        })
    }
}

// ============================================================================
// RELAY FRAMES (WebSocket Pub/Sub)
// ============================================================================

/// Client → Relay
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientFrame<'a> {
    Subscribe {
        channel: &'a str,
    },
    Unsubscribe {
        channel: &'a str,
    },
    Broadcast {
        channel: &'a str,
        message: &'a SignalMessage,
    },
    Heartbeat,
}

/// Relay → Client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerFrame {
    /// Nachricht auf einem abonnierten Kanal; wird erst beim Routing geparst
    Broadcast {
        channel: String,
        message: serde_json::Value,
    },
    Pong,
    Error {
        code: i32,
        message: String,
    },
}
