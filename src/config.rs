//! Konfiguration aus Umgebungsvariablen
//!
//! - `SIGNALING_URL`: WebSocket-Endpunkt des Relays (http/https wird zu ws/wss)
//! - `ICE_SERVERS`: kommagetrennte STUN/TURN-URLs

use thiserror::Error;
use url::Url;

/// Standard Signaling-Endpunkt für lokale Entwicklung
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080/ws";

/// Google STUN Server (kostenlos)
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid signaling URL '{url}': {reason}")]
    InvalidSignalingUrl { url: String, reason: String },

    #[error("Unsupported signaling URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("ICE_SERVERS contains no usable entries")]
    EmptyIceServers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub signaling_url: Url,
    pub ice_servers: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Liest die Einstellungen über eine beliebige Quelle
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url =
            lookup("SIGNALING_URL").unwrap_or_else(|| DEFAULT_SIGNALING_URL.to_string());
        let signaling_url = parse_signaling_url(&raw_url)?;

        let ice_servers = match lookup("ICE_SERVERS") {
            Some(raw) => {
                let servers: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                if servers.is_empty() {
                    return Err(ConfigError::EmptyIceServers);
                }
                servers
            }
            None => vec![DEFAULT_ICE_SERVER.to_string()],
        };

        Ok(Self {
            signaling_url,
            ice_servers,
        })
    }
}

fn parse_signaling_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidSignalingUrl {
        url: raw.to_string(),
        reason,
    };

    let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;

    let rewrite = match url.scheme() {
        "ws" | "wss" => None,
        "http" => Some("ws"),
        "https" => Some("wss"),
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };

    if let Some(scheme) = rewrite {
        url.set_scheme(scheme)
            .map_err(|()| invalid(format!("cannot switch scheme to {}", scheme)))?;
    }

    Ok(url)
}
