//! Call Engine Module - Sitzungslogik und WebRTC
//!
//! Dieses Modul verwaltet:
//! - Die Zustandsmaschine einer Paarung (CallSession)
//! - Die Schnittstelle zur Medien-Engine
//! - WebRTC Peer Connections als Implementierung dieser Schnittstelle

mod engine;
mod rtc;
mod session;

pub use engine::{
    EngineError, EngineEvent, EngineEvents, EngineNotice, Generation, MediaEngine,
    MediaEngineFactory, NegotiationError, TransportError, TransportState,
};
pub use rtc::{LocalMedia, WebRtcEngine, WebRtcEngineFactory};
pub use session::{
    CallSession, CallSessionHandle, SessionError, SessionEvent, SessionSnapshot, SessionState,
    UserAction,
};
