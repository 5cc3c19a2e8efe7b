//! Signaling Module - Pub/Sub-Kanal pro Session
//!
//! Dieses Modul verwaltet die Kommunikation zwischen den beiden Endpunkten:
//! - typisierte Signal-Nachrichten (Offer, Answer, ICE, End-Call)
//! - Transport-Abstraktion mit Abos als Scoped Resource
//! - In-Memory Hub und WebSocket-Relay als Implementierungen
//!

mod client;
mod memory;
mod messages;
mod transport;

pub use client::{TransportEvent, WsTransport};
pub use memory::MemoryHub;
pub use messages::{
    IceCandidate, ParticipantId, SdpType, SessionDescription, SessionId, Signal,
    SignalFormatError, SignalMessage, SignalType,
};
pub use transport::{SignalingError, SignalingTransport, Subscription};
