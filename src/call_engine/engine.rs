//! Media Engine Schnittstelle
//!
//! Die eigentliche Medien-Engine (ICE, Codecs, Verschlüsselung) ist ein
//! externer Mitarbeiter. Der Kern braucht nur die Aushandlung über
//! undurchsichtige SDP/Candidate-Blobs und zwei Arten von Benachrichtigungen.

use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Laufende Nummer einer Engine-Instanz innerhalb einer Session
pub type Generation = u64;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("No local media attached")]
    NoLocalMedia,

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("WebRTC error: {0}")]
    WebRTC(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("ICE candidate rejected: {0}")]
    Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// Transportzustand, wie ihn die Engine meldet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// Zustände, die als Verlust des Partners gelten
    pub fn is_lost(self) -> bool {
        matches!(
            self,
            TransportState::Disconnected | TransportState::Failed | TransportState::Closed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Erster (oder weiterer) Remote-Track ist angekommen
    RemoteMediaAttached,
    TransportStateChanged(TransportState),
    /// Lokal gesammelter ICE Candidate für den Partner
    LocalCandidate(IceCandidate),
}

/// Benachrichtigung, markiert mit der Engine-Generation, von der sie stammt
#[derive(Debug, Clone, PartialEq)]
pub struct EngineNotice {
    pub generation: Generation,
    pub event: EngineEvent,
}

/// Rückkanal einer Engine zur Session
///
/// Jede Engine bekommt bei der Erzeugung ihren eigenen Rückkanal; die Session
/// verwirft alles, was nicht von der aktuell besessenen Generation kommt.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    generation: Generation,
    tx: mpsc::UnboundedSender<EngineNotice>,
}

impl EngineEvents {
    pub(crate) fn new(generation: Generation, tx: mpsc::UnboundedSender<EngineNotice>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn remote_media_attached(&self) {
        self.emit(EngineEvent::RemoteMediaAttached);
    }

    pub fn transport_state_changed(&self, state: TransportState) {
        self.emit(EngineEvent::TransportStateChanged(state));
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(EngineEvent::LocalCandidate(candidate));
    }

    fn emit(&self, event: EngineEvent) {
        let notice = EngineNotice {
            generation: self.generation,
            event,
        };
        if self.tx.send(notice).is_err() {
            tracing::trace!("Call session gone, dropping engine notice");
        }
    }
}

// ============================================================================
// TRAITS
// ============================================================================

/// Eine Peer-Verbindung mit bereits angehängten lokalen Tracks
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Erzeugt Offer oder Answer und setzt sie als lokale Description
    async fn create_local_description(
        &self,
        kind: SdpKind,
    ) -> Result<SessionDescription, NegotiationError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Löst zuerst die Remote-Medien und schließt dann den Transport
    async fn close(&self);
}

/// Erzeugt je Paarungsversuch eine frische [`MediaEngine`]
#[async_trait]
pub trait MediaEngineFactory: Send + Sync {
    async fn create(&self, events: EngineEvents) -> Result<Box<dyn MediaEngine>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_transport_states() {
        assert!(!TransportState::Connected.is_lost());
        assert!(TransportState::Disconnected.is_lost());
        assert!(TransportState::Failed.is_lost());
        assert!(TransportState::Closed.is_lost());
    }

    #[test]
    fn test_notices_carry_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EngineEvents::new(7, tx);

        events.remote_media_attached();
        events.transport_state_changed(TransportState::Failed);

        assert_eq!(
            rx.try_recv().unwrap(),
            EngineNotice {
                generation: 7,
                event: EngineEvent::RemoteMediaAttached
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            EngineNotice {
                generation: 7,
                event: EngineEvent::TransportStateChanged(TransportState::Failed)
            }
        );
    }

    #[test]
    fn test_emit_after_session_dropped_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        EngineEvents::new(1, tx).remote_media_attached();
    }
}
