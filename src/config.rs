//! Konfiguration
//!
//! Defaults im Code, optional überschrieben durch Umgebungsvariablen:
//!
//! | Variable                        | Bedeutung                           |
//! |---------------------------------|-------------------------------------|
//! | `SIGNALING_URL`                 | Adresse des Pub/Sub-Relays          |
//! | `CONSULT_CALL_STUN_URLS`        | STUN-Server, kommagetrennt          |
//! | `CONSULT_CALL_TURN_URL`         | TURN-Server                         |
//! | `CONSULT_CALL_TURN_USERNAME`    | TURN Benutzername                   |
//! | `CONSULT_CALL_TURN_CREDENTIAL`  | TURN Passwort                       |
//! | `CONSULT_CALL_RING_TIMEOUT_SECS`| Klingeldauer, `0` schaltet ab       |

use crate::capture::MediaKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Präfix des Broadcast-Kanals pro Session
pub const DEFAULT_CHANNEL_PREFIX: &str = "webrtc-session-";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("TURN server {0} requires username and credential")]
    IncompleteTurn(String),

    #[error("No signaling server configured (SIGNALING_URL)")]
    MissingSignalingUrl,
}

// ============================================================================
// ICE SERVERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl From<&IceServerConfig> for RTCIceServer {
    fn from(server: &IceServerConfig) -> Self {
        RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Standard STUN Server Konfiguration
pub fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
            "stun:stun2.l.google.com:19302".to_string(),
        ],
        username: None,
        credential: None,
    }]
}

// ============================================================================
// MEDIA / POLICIES
// ============================================================================

/// Welche Arten von Media bei `acquire` angefordert werden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl MediaConstraints {
    pub fn kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio {
            kinds.push(MediaKind::Audio);
        }
        if self.video {
            kinds.push(MediaKind::Video);
        }
        kinds
    }
}

/// Umgang mit gleichzeitigen Anrufversuchen beider Seiten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Jedes Offer außerhalb von `Idle` wird verworfen
    #[default]
    FirstWins,
    /// Während `OutgoingPending` gewinnt das Offer der kleineren Participant-Id
    IdentityOrdered,
}

// ============================================================================
// CALL CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub signaling_url: Option<String>,
    pub ice_servers: Vec<IceServerConfig>,
    pub media: MediaConstraints,
    pub channel_prefix: String,
    /// Sekunden bis ein unbeantworteter Anruf beendet wird
    pub ring_timeout_secs: Option<u64>,
    /// Maximal gepufferte Remote-Candidates vor der Remote Description
    pub candidate_buffer_limit: usize,
    pub collision_policy: CollisionPolicy,
    pub event_capacity: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: None,
            ice_servers: default_ice_servers(),
            media: MediaConstraints::default(),
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            ring_timeout_secs: Some(45),
            candidate_buffer_limit: 64,
            collision_policy: CollisionPolicy::default(),
            event_capacity: 100,
        }
    }
}

impl CallConfig {
    /// Defaults plus Umgebungsvariablen
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Wie [`CallConfig::from_env`], mit beliebiger Quelle für die Variablen
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("SIGNALING_URL") {
            config.signaling_url = Some(url);
        }

        if let Some(urls) = lookup("CONSULT_CALL_STUN_URLS") {
            let urls: Vec<String> = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
            if !urls.is_empty() {
                config.ice_servers = vec![IceServerConfig {
                    urls,
                    username: None,
                    credential: None,
                }];
            }
        }

        if let Some(url) = lookup("CONSULT_CALL_TURN_URL") {
            let username =
                lookup("CONSULT_CALL_TURN_USERNAME").ok_or_else(|| ConfigError::IncompleteTurn(url.clone()))?;
            let credential = lookup("CONSULT_CALL_TURN_CREDENTIAL")
                .ok_or_else(|| ConfigError::IncompleteTurn(url.clone()))?;
            config = config.with_turn_server(url, username, credential);
        }

        if let Some(value) = lookup("CONSULT_CALL_RING_TIMEOUT_SECS") {
            let secs: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "CONSULT_CALL_RING_TIMEOUT_SECS".to_string(),
                value: value.clone(),
            })?;
            config.ring_timeout_secs = (secs > 0).then_some(secs);
        }

        Ok(config)
    }

    /// Setzt optionale TURN-Server Credentials
    pub fn with_turn_server(
        mut self,
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.ice_servers.push(IceServerConfig {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        });
        self
    }

    pub fn ring_timeout(&self) -> Option<Duration> {
        self.ring_timeout_secs.map(Duration::from_secs)
    }

    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers.iter().map(RTCIceServer::from).collect()
    }
}
