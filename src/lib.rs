//! Stranger Call - anonyme Zufallspaarung für Video-Anrufe
//!
//! Ein headless Client mit:
//! - WebSocket-Relay als Signaling-Server
//! - WebRTC für die P2P Medienverbindung
//! - Einer Zustandsmaschine, die nach jedem Verlust des Partners
//!   automatisch den nächsten sucht

pub mod call_engine;
pub mod config;
pub mod signaling;

#[cfg(test)]
mod testing;

use tracing_subscriber::EnvFilter;

/// Standard-Filter, wenn `RUST_LOG` nicht gesetzt ist
const DEFAULT_LOG_FILTER: &str = "stranger_call=debug,webrtc=warn";

/// Logging initialisieren
///
/// Ein zweiter Aufruf ist wirkungslos.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
