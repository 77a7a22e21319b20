//! Signaling-Kanal als reine Transport-Abstraktion
//!
//! Der Kanal interpretiert keine Kommandos. Er verschickt sie und liefert
//! eingehende Kommandos als Stream aus.

use super::messages::Command;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Unendlicher, nicht neu startbarer Stream eingehender Kommandos
pub type CommandStream = BoxStream<'static, Command>;

/// Bidirektionale Verbindung zum Matchmaking-/Relay-Server
pub trait SignalingChannel: Send + Sync {
    /// Reiht ein Kommando zum Versand ein.
    ///
    /// Blockiert nie. Ist der Transport nicht offen, wird das Kommando
    /// verworfen und geloggt; der Aufrufer erfährt davon nichts.
    fn send(&self, command: Command);

    /// Abonniert eingehende Kommandos ab jetzt; frühere gehen verloren.
    fn receive(&self) -> CommandStream;
}

// ============================================================================
// INBOUND FAN-OUT
// ============================================================================

/// Verteilt eingehende Kommandos an alle Abonnenten
///
/// Jeder Abonnent hat eine eigene unbeschränkte Queue; ein langsamer Leser
/// verliert nichts. Geschlossene Abonnenten werden beim nächsten Verteilen
/// entfernt. Die Streams enden, sobald der Fan-out gedroppt wird.
#[derive(Default)]
pub(crate) struct InboundFanout {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Command>>>,
}

impl InboundFanout {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Neuer Abonnent, der nur Kommandos ab jetzt erhält
    pub(crate) fn subscribe(&self) -> CommandStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);

        stream::unfold(rx, |mut rx| async move {
            let command = rx.recv().await?;
            Some((command, rx))
        })
        .boxed()
    }

    pub(crate) fn dispatch(&self, command: Command) {
        let mut subscribers = self.subscribers.lock();
        // Ohne Abonnenten geht das Kommando verloren
        subscribers.retain(|tx| tx.send(command.clone()).is_ok());
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl std::fmt::Debug for InboundFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundFanout")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
