//! Signaling Module - Nachrichtenkanal zum Matchmaking-Server
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Relay:
//! - Typisierte Kommandos und ihr Drahtformat
//! - Abstrakter Kanal (`send` / `receive`)
//! - WebSocket-Implementierung des Kanals
//!

mod channel;
mod client;
mod messages;

#[cfg(test)]
pub(crate) use channel::InboundFanout;
pub use channel::{CommandStream, SignalingChannel};
pub use client::{SignalingError, WsSignalingChannel};
pub use messages::*;
