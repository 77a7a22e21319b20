//! CallSession - Zustandsmaschine einer zufälligen Paarung
//!
//! Die Session ist ein Actor: Benutzeraktionen, eingehende Kommandos und
//! Engine-Benachrichtigungen laufen nacheinander durch [`CallSession::run`].
//! Jeder Verlust des Partners (Transportfehler, `receiverNext`, `receiverStop`,
//! `disconnect`) führt zurück in den Matchmaking-Pool; nur ein lokales
//! `stop_call` beendet die Suche.

use super::engine::{
    EngineEvent, EngineEvents, EngineNotice, Generation, MediaEngine, MediaEngineFactory,
};
use crate::signaling::{Command, CommandStream, PeerId, SdpKind, SessionDescription, SignalingChannel};
use futures::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Kapazität des Event-Kanals für Beobachter
const EVENT_BUFFER: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Call session is no longer running")]
    Closed,
}

// ============================================================================
// STATE & EVENTS
// ============================================================================

/// Zustand der Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nicht im Matchmaking-Pool
    #[default]
    Idle,
    /// Sucht einen Partner oder handelt gerade aus
    Connecting,
    /// Remote-Medien sind angekommen
    Active,
}

/// Aktionen des Benutzers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    StartCall,
    NextCall,
    StopCall,
}

/// Events für die UI-Schicht
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    PeerAssigned(PeerId),
    ParticipantCount(u64),
    RemoteMediaAttached,
    RemoteMediaDetached,
    EngineFailed(String),
}

/// Momentaufnahme der Session für Abfragen von außen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub peer_id: Option<PeerId>,
    pub participants: Option<u64>,
    pub remote_media_ready: bool,
}

#[derive(Debug)]
pub(crate) enum SessionInput {
    User(UserAction),
    Inbound(Command),
    Engine(EngineNotice),
}

/// Die aktuell besessene Engine samt Generation
struct EngineSlot {
    generation: Generation,
    engine: Box<dyn MediaEngine>,
}

// ============================================================================
// HANDLE
// ============================================================================

/// Steuerung einer laufenden [`CallSession`]
#[derive(Clone)]
pub struct CallSessionHandle {
    user_tx: mpsc::UnboundedSender<UserAction>,
    event_tx: broadcast::Sender<SessionEvent>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
}

impl CallSessionHandle {
    /// Betritt den Matchmaking-Pool
    pub fn start_call(&self) -> Result<(), SessionError> {
        self.dispatch(UserAction::StartCall)
    }

    /// Verlässt den aktuellen Partner und sucht sofort den nächsten
    pub fn next_call(&self) -> Result<(), SessionError> {
        self.dispatch(UserAction::NextCall)
    }

    /// Beendet den Anruf und verlässt den Pool
    pub fn stop_call(&self) -> Result<(), SessionError> {
        self.dispatch(UserAction::StopCall)
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.read().state
    }

    fn dispatch(&self, action: UserAction) -> Result<(), SessionError> {
        self.user_tx.send(action).map_err(|_| SessionError::Closed)
    }
}

impl std::fmt::Debug for CallSessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSessionHandle")
            .field("snapshot", &*self.snapshot.read())
            .finish()
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

pub struct CallSession {
    channel: Arc<dyn SignalingChannel>,
    factory: Arc<dyn MediaEngineFactory>,
    inbound: CommandStream,
    user_rx: mpsc::UnboundedReceiver<UserAction>,
    notice_tx: mpsc::UnboundedSender<EngineNotice>,
    notice_rx: mpsc::UnboundedReceiver<EngineNotice>,
    event_tx: broadcast::Sender<SessionEvent>,
    snapshot: Arc<RwLock<SessionSnapshot>>,

    state: SessionState,
    peer_id: Option<PeerId>,
    engine: Option<EngineSlot>,
    last_generation: Generation,
    participants: Option<u64>,
    remote_media_ready: bool,
}

impl CallSession {
    /// Erstellt eine Session im Zustand `Idle`
    ///
    /// Der Kanal wird sofort abonniert, damit zwischen Erzeugung und
    /// [`run`](Self::run) kein Kommando verloren geht.
    pub fn new(
        channel: Arc<dyn SignalingChannel>,
        factory: Arc<dyn MediaEngineFactory>,
    ) -> (Self, CallSessionHandle) {
        let inbound = channel.receive();
        let (user_tx, user_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let snapshot = Arc::new(RwLock::new(SessionSnapshot::default()));

        let handle = CallSessionHandle {
            user_tx,
            event_tx: event_tx.clone(),
            snapshot: Arc::clone(&snapshot),
        };

        let session = Self {
            channel,
            factory,
            inbound,
            user_rx,
            notice_tx,
            notice_rx,
            event_tx,
            snapshot,
            state: SessionState::Idle,
            peer_id: None,
            engine: None,
            last_generation: 0,
            participants: None,
            remote_media_ready: false,
        };

        (session, handle)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Actor-Schleife
    ///
    /// Endet, wenn alle Handles gedroppt sind oder der Kanal keine Kommandos
    /// mehr liefert. Eine noch lebende Engine wird dabei zerstört.
    pub async fn run(mut self) {
        tracing::debug!("Call session started");

        loop {
            let input = tokio::select! {
                action = self.user_rx.recv() => match action {
                    Some(action) => SessionInput::User(action),
                    None => {
                        tracing::debug!("All session handles dropped");
                        break;
                    }
                },
                command = self.inbound.next() => match command {
                    Some(command) => SessionInput::Inbound(command),
                    None => {
                        tracing::info!("Signaling channel closed");
                        break;
                    }
                },
                Some(notice) = self.notice_rx.recv() => SessionInput::Engine(notice),
            };

            self.handle(input).await;
        }

        self.destroy_engine().await;
        self.set_state(SessionState::Idle);
        tracing::debug!("Call session finished");
    }

    pub(crate) async fn handle(&mut self, input: SessionInput) {
        match input {
            SessionInput::User(action) => self.on_user_action(action).await,
            SessionInput::Inbound(command) => self.on_command(command).await,
            SessionInput::Engine(notice) => self.on_engine_notice(notice).await,
        }
    }

    // ========================================================================
    // USER ACTIONS
    // ========================================================================

    async fn on_user_action(&mut self, action: UserAction) {
        match action {
            UserAction::StartCall => {
                if self.state != SessionState::Idle {
                    tracing::debug!("Ignoring start, session already {:?}", self.state);
                    return;
                }
                tracing::info!("Starting call");
                self.begin_pairing().await;
            }

            UserAction::NextCall => {
                if self.state == SessionState::Idle {
                    tracing::debug!("Ignoring next, session is idle");
                    return;
                }
                tracing::info!("Skipping to next partner");
                self.channel.send(Command::ReceiverNext {
                    peer_id: self.peer_id.clone(),
                });
                self.begin_pairing().await;
            }

            UserAction::StopCall => {
                if self.state == SessionState::Idle {
                    tracing::debug!("Ignoring stop, session is idle");
                    return;
                }
                tracing::info!("Stopping call");
                let peer_id = self.peer_id.clone();
                self.destroy_engine().await;
                self.channel.send(Command::Stop);
                self.channel.send(Command::ReceiverStop { peer_id });
                self.set_state(SessionState::Idle);
            }
        }
    }

    // ========================================================================
    // INBOUND COMMANDS
    // ========================================================================

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::CountUser { count } => {
                self.participants = Some(count);
                self.publish();
                self.emit(SessionEvent::ParticipantCount(count));
            }

            Command::Info { peer_id } => {
                if self.state == SessionState::Idle {
                    tracing::debug!("Ignoring info for {} while idle", peer_id);
                    return;
                }
                self.assign_peer(peer_id);
            }

            Command::CreateOffer { peer_id } => {
                if !self.is_pairing() {
                    tracing::debug!("Ignoring createOffer for {} outside of pairing", peer_id);
                    return;
                }
                self.assign_peer(peer_id);
                self.negotiate(SdpKind::Offer).await;
            }

            Command::Offer {
                peer_id,
                description,
            } => {
                if !self.is_pairing() {
                    tracing::debug!("Ignoring offer outside of pairing");
                    return;
                }
                if let Some(peer_id) = peer_id {
                    self.assign_peer(peer_id);
                }
                if self.apply_remote_description(description).await {
                    self.negotiate(SdpKind::Answer).await;
                }
            }

            Command::Answer {
                peer_id,
                description,
            } => {
                if !self.is_pairing() || !self.concerns_current_peer(peer_id.as_ref()) {
                    tracing::debug!("Dropping stale answer");
                    return;
                }
                self.apply_remote_description(description).await;
            }

            Command::Candidate { peer_id, candidate } => {
                if !self.concerns_current_peer(peer_id.as_ref()) {
                    tracing::debug!("Dropping ICE candidate for another peer");
                    return;
                }
                let Some(slot) = self.engine.as_ref() else {
                    tracing::debug!("Dropping ICE candidate without media engine");
                    return;
                };
                if let Err(e) = slot.engine.add_remote_candidate(candidate).await {
                    tracing::warn!("Failed to add ICE candidate: {}", e);
                }
            }

            Command::ReceiverNext { peer_id } => self.on_peer_left("next", peer_id).await,
            Command::ReceiverStop { peer_id } => self.on_peer_left("stop", peer_id).await,
            Command::Disconnect { peer_id } => self.on_peer_left("disconnect", peer_id).await,

            outbound @ (Command::Match | Command::Stop) => {
                tracing::debug!("Ignoring outbound-only '{}' command", outbound.name());
            }
        }
    }

    /// Partner hat die Paarung verlassen: zurück in den Pool
    async fn on_peer_left(&mut self, reason: &'static str, peer_id: Option<PeerId>) {
        if self.state == SessionState::Idle {
            tracing::debug!("Ignoring peer {} while idle", reason);
            return;
        }
        if !self.concerns_current_peer(peer_id.as_ref()) {
            tracing::debug!("Ignoring peer {} for a previous partner", reason);
            return;
        }
        tracing::info!("Partner left ({}), looking for a new one", reason);
        self.begin_pairing().await;
    }

    // ========================================================================
    // ENGINE NOTIFICATIONS
    // ========================================================================

    async fn on_engine_notice(&mut self, notice: EngineNotice) {
        if !self.is_current(notice.generation) {
            tracing::debug!(
                generation = notice.generation,
                "Ignoring notice from replaced media engine"
            );
            return;
        }

        match notice.event {
            EngineEvent::RemoteMediaAttached => {
                if self.state != SessionState::Connecting {
                    return;
                }
                self.remote_media_ready = true;
                self.emit(SessionEvent::RemoteMediaAttached);
                self.set_state(SessionState::Active);
            }

            EngineEvent::TransportStateChanged(transport) => {
                if !transport.is_lost() {
                    tracing::debug!("Transport {:?}", transport);
                    return;
                }
                tracing::warn!("Connection lost ({:?}), looking for a new partner", transport);
                self.channel.send(Command::Disconnect {
                    peer_id: self.peer_id.clone(),
                });
                self.begin_pairing().await;
            }

            EngineEvent::LocalCandidate(candidate) => {
                self.channel.send(Command::Candidate {
                    peer_id: self.peer_id.clone(),
                    candidate,
                });
            }
        }
    }

    // ========================================================================
    // ENGINE LIFECYCLE
    // ========================================================================

    /// Zerstört die aktuelle Engine und startet einen neuen Paarungsversuch
    async fn begin_pairing(&mut self) {
        self.destroy_engine().await;

        self.last_generation += 1;
        let generation = self.last_generation;
        let events = EngineEvents::new(generation, self.notice_tx.clone());

        match self.factory.create(events).await {
            Ok(engine) => {
                tracing::debug!(generation, "Media engine created");
                self.engine = Some(EngineSlot { generation, engine });
                self.channel.send(Command::Match);
                self.set_state(SessionState::Connecting);
            }
            Err(e) => {
                tracing::error!("Failed to create media engine: {}", e);
                self.emit(SessionEvent::EngineFailed(e.to_string()));
                self.set_state(SessionState::Idle);
            }
        }
    }

    /// Löst zuerst die Remote-Medien, dann schließt die Engine den Transport
    async fn destroy_engine(&mut self) {
        if let Some(slot) = self.engine.take() {
            if self.remote_media_ready {
                self.remote_media_ready = false;
                self.emit(SessionEvent::RemoteMediaDetached);
            }
            slot.engine.close().await;
            tracing::debug!(generation = slot.generation, "Media engine destroyed");
        }

        self.peer_id = None;
        self.publish();
    }

    async fn negotiate(&mut self, kind: SdpKind) {
        let Some(slot) = self.engine.as_ref() else {
            return;
        };
        let generation = slot.generation;

        let description = match slot.engine.create_local_description(kind).await {
            Ok(description) => description,
            Err(e) => {
                tracing::warn!("Failed to create local {}: {}", kind, e);
                return;
            }
        };

        if !self.is_current(generation) {
            tracing::debug!(generation, "Discarding {} of replaced media engine", kind);
            return;
        }

        let peer_id = self.peer_id.clone();
        let command = match kind {
            SdpKind::Offer => Command::Offer {
                peer_id,
                description,
            },
            SdpKind::Answer => Command::Answer {
                peer_id,
                description,
            },
        };
        self.channel.send(command);
    }

    /// Gibt `false` zurück, wenn die Description nicht gesetzt werden konnte
    async fn apply_remote_description(&mut self, description: SessionDescription) -> bool {
        let Some(slot) = self.engine.as_ref() else {
            tracing::debug!("Dropping remote {} without media engine", description.kind);
            return false;
        };

        match slot.engine.set_remote_description(description).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to set remote description: {}", e);
                false
            }
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn is_pairing(&self) -> bool {
        self.state == SessionState::Connecting && self.engine.is_some()
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.engine
            .as_ref()
            .is_some_and(|slot| slot.generation == generation)
    }

    /// Kommandos ohne `receiverId` gelten dem aktuellen Partner
    fn concerns_current_peer(&self, peer_id: Option<&PeerId>) -> bool {
        match (peer_id, self.peer_id.as_ref()) {
            (None, _) => true,
            (Some(incoming), Some(current)) => incoming == current,
            (Some(_), None) => false,
        }
    }

    fn assign_peer(&mut self, peer_id: PeerId) {
        if self.peer_id.as_ref() == Some(&peer_id) {
            return;
        }
        tracing::info!("Paired with {}", peer_id);
        self.peer_id = Some(peer_id.clone());
        self.publish();
        self.emit(SessionEvent::PeerAssigned(peer_id));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::info!("Call session {:?} -> {:?}", self.state, state);
        self.state = state;
        self.publish();
        self.emit(SessionEvent::StateChanged(state));
    }

    fn publish(&self) {
        *self.snapshot.write() = SessionSnapshot {
            state: self.state,
            peer_id: self.peer_id.clone(),
            participants: self.participants,
            remote_media_ready: self.remote_media_ready,
        };
    }

    fn emit(&self, event: SessionEvent) {
        // Ohne Beobachter gibt es niemanden zu benachrichtigen
        let _ = self.event_tx.send(event);
    }

    #[cfg(test)]
    fn current_generation(&self) -> Option<Generation> {
        self.engine.as_ref().map(|slot| slot.generation)
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("state", &self.state)
            .field("peer_id", &self.peer_id)
            .field(
                "generation",
                &self.engine.as_ref().map(|slot| slot.generation),
            )
            .finish()
    }
}
