//! WebSocket Client für den Signaling-Server
//!
//! Verwaltet die WebSocket-Verbindung zum Relay:
//! - Schreib-Task, gespeist über eine nicht blockierende Queue
//! - Lese-Task, der Frames parst und an alle Abonnenten verteilt
//! - Verbindungsstatus für das stille Verwerfen beim Senden
//! - Geordnetes Schließen, das die ausgehende Queue noch leert

use super::channel::{CommandStream, InboundFanout, SignalingChannel};
use super::messages::Command;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Kapazität der ausgehenden Queue
const OUTBOUND_BUFFER: usize = 100;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Signaling channel unavailable")]
    ChannelUnavailable,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Failed to encode command: {0}")]
    Encode(String),
}

// ============================================================================
// CHANNEL STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ChannelState {
    is_connected: bool,
}

// ============================================================================
// WEBSOCKET CHANNEL
// ============================================================================

/// [`SignalingChannel`] über eine persistente WebSocket-Verbindung
pub struct WsSignalingChannel {
    server_url: Url,
    state: Arc<RwLock<ChannelState>>,
    tx: RwLock<Option<mpsc::Sender<String>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    inbound: Arc<InboundFanout>,
}

impl WsSignalingChannel {
    /// Erstellt einen noch nicht verbundenen Kanal
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            state: Arc::new(RwLock::new(ChannelState::default())),
            tx: RwLock::new(None),
            writer: Mutex::new(None),
            inbound: Arc::new(InboundFanout::new()),
        }
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Verbindet mit dem Signaling-Server und startet Lese- und Schreib-Task
    pub async fn connect(&mut self) -> Result<(), SignalingError> {
        tracing::info!("Connecting to signaling server: {}", self.server_url);

        let (ws_stream, _) = connect_async(self.server_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        *self.tx.write() = Some(tx);
        self.state.write().is_connected = true;

        // Lese-Task
        let state = Arc::clone(&self.state);
        let inbound = Arc::clone(&self.inbound);
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => dispatch_frame(&text, &inbound),
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            state.write().is_connected = false;
        });

        // Schreib-Task
        let state = Arc::clone(&self.state);
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }

            state.write().is_connected = false;
            let _ = write.close().await;
        });
        *self.writer.lock() = Some(writer);

        tracing::info!("Connected to signaling server");
        Ok(())
    }

    /// Schließt den Kanal, nachdem alle eingereihten Kommandos gesendet wurden
    ///
    /// Danach werden weitere Kommandos verworfen.
    pub async fn close(&self) {
        self.state.write().is_connected = false;
        // Ohne Sender endet der Schreib-Task, sobald die Queue leer ist
        drop(self.tx.write().take());

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                tracing::warn!("Signaling writer task failed: {}", e);
            }
        }
        tracing::info!("Signaling channel closed");
    }

    /// Serialisiert und reiht ein Kommando ein (non-blocking)
    fn try_send(&self, command: &Command) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::ChannelUnavailable);
        }
        let text =
            serde_json::to_string(command).map_err(|e| SignalingError::Encode(e.to_string()))?;

        let tx = self.tx.read();
        let tx = tx.as_ref().ok_or(SignalingError::ChannelUnavailable)?;
        tx.try_send(text).map_err(|e| match e {
            TrySendError::Closed(_) => SignalingError::ChannelUnavailable,
            TrySendError::Full(_) => SignalingError::SendFailed("outbound queue full".to_string()),
        })
    }
}

impl SignalingChannel for WsSignalingChannel {
    fn send(&self, command: Command) {
        match self.try_send(&command) {
            Ok(()) => tracing::debug!("Sent '{}' command", command.name()),
            Err(e) => tracing::warn!("Dropping '{}' command: {}", command.name(), e),
        }
    }

    fn receive(&self) -> CommandStream {
        self.inbound.subscribe()
    }
}

impl std::fmt::Debug for WsSignalingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSignalingChannel")
            .field("server_url", &self.server_url.as_str())
            .field("state", &*self.state.read())
            .finish()
    }
}

/// Parst ein Text-Frame und verteilt es an die Abonnenten
fn dispatch_frame(text: &str, inbound: &InboundFanout) {
    match serde_json::from_str::<Command>(text) {
        Ok(command) => {
            tracing::debug!("Received '{}' command", command.name());
            inbound.dispatch(command);
        }
        Err(e) => tracing::warn!("Dropping malformed frame: {}", e),
    }
}
