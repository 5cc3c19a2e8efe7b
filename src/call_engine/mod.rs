//! Call Engine Module - Anruf-Lebenszyklus pro Session
//!
//! Dieses Modul verwaltet:
//! - die Zustandsmaschine eines Anrufs (ein Actor pro Session)
//! - Offer/Answer/ICE-Austausch über den Signaling-Kanal
//! - WebRTC Peer Connections
//! - die öffentliche CallSession-API und die Session Registry

mod connection;
mod coordinator;
mod registry;
mod rtc;
mod session;
mod state;

pub use connection::{
    ConnectionEvent, ConnectionEvents, ConnectivityState, NegotiationError, NegotiationState,
    PeerConnection, PeerConnectionFactory,
};
pub use registry::SessionRegistry;
pub use rtc::{RtcConnection, RtcConnectionFactory};
pub use session::{CallError, CallSession};
pub use state::{CallEvent, CallSnapshot, CallState, EndReason, IncomingCallInfo};
