//! Message Types für das Signaling-Protokoll
//!
//! Auf dem Draht ist jede Nachricht ein JSON-Objekt
//! `{ command, receiverId?, data, count? }`. [`Command`] ist die typisierte
//! Sicht darauf: jede Variante trägt nur die Felder, die sie braucht, und
//! eingehende Frames werden beim Parsen validiert.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command '{command}' requires field '{field}'")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },

    #[error("Invalid data for '{command}': {reason}")]
    InvalidData {
        command: &'static str,
        reason: String,
    },
}

// ============================================================================
// PAYLOAD TYPES
// ============================================================================

/// Vom Server vergebene Kennung des aktuellen Partners
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Art einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SDP Offer oder Answer, für den Kern ein undurchsichtiger Blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE Candidate, wird unverändert weitergereicht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IceCandidate(pub Value);

// ============================================================================
// WIRE FRAME
// ============================================================================

/// Rohes Frame, genau so wie es über den Kanal geht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub command: String,
    #[serde(
        rename = "receiverId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub receiver_id: Option<String>,
    #[serde(default = "empty_data")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

fn empty_data() -> Value {
    Value::Object(Map::new())
}

// ============================================================================
// COMMANDS
// ============================================================================

/// Alle Kommandos des Protokolls
///
/// (De-)Serialisierung läuft über [`Frame`], d.h. `serde_json::from_str::<Command>`
/// lehnt unbekannte oder unvollständige Frames direkt ab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Frame", into = "Frame")]
pub enum Command {
    /// Paarung anfordern
    Match,
    /// Server teilt den zugewiesenen Partner mit
    Info { peer_id: PeerId },
    /// Anzahl aktiver Benutzer
    CountUser { count: u64 },
    /// Server fordert diesen Client auf, das Offer zu erzeugen
    CreateOffer { peer_id: PeerId },
    Offer {
        peer_id: Option<PeerId>,
        description: SessionDescription,
    },
    Answer {
        peer_id: Option<PeerId>,
        description: SessionDescription,
    },
    Candidate {
        peer_id: Option<PeerId>,
        candidate: IceCandidate,
    },
    /// Partner (oder wir) wollen den nächsten Partner
    ReceiverNext { peer_id: Option<PeerId> },
    /// Partner (oder wir) beenden die Paarung
    ReceiverStop { peer_id: Option<PeerId> },
    /// Matchmaking-Pool komplett verlassen
    Stop,
    /// Transportverlust
    Disconnect { peer_id: Option<PeerId> },
}

impl Command {
    /// Name des Kommandos auf dem Draht
    pub fn name(&self) -> &'static str {
        match self {
            Command::Match => "match",
            Command::Info { .. } => "info",
            Command::CountUser { .. } => "countUser",
            Command::CreateOffer { .. } => "createOffer",
            Command::Offer { .. } => "offer",
            Command::Answer { .. } => "answer",
            Command::Candidate { .. } => "candidate",
            Command::ReceiverNext { .. } => "receiverNext",
            Command::ReceiverStop { .. } => "receiverStop",
            Command::Stop => "stop",
            Command::Disconnect { .. } => "disconnect",
        }
    }
}

impl TryFrom<Frame> for Command {
    type Error = MessageError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let Frame {
            command,
            receiver_id,
            data,
            count,
        } = frame;
        let peer_id = receiver_id.map(PeerId::from);

        let parsed = match command.as_str() {
            "match" => Command::Match,
            "info" => Command::Info {
                peer_id: require_peer("info", peer_id)?,
            },
            "countUser" => Command::CountUser {
                count: count.ok_or(MessageError::MissingField {
                    command: "countUser",
                    field: "count",
                })?,
            },
            "createOffer" => Command::CreateOffer {
                peer_id: require_peer("createOffer", peer_id)?,
            },
            "offer" => Command::Offer {
                peer_id,
                description: parse_description("offer", SdpKind::Offer, data)?,
            },
            "answer" => Command::Answer {
                peer_id,
                description: parse_description("answer", SdpKind::Answer, data)?,
            },
            "candidate" => Command::Candidate {
                peer_id,
                candidate: parse_candidate(data)?,
            },
            "receiverNext" => Command::ReceiverNext { peer_id },
            "receiverStop" => Command::ReceiverStop { peer_id },
            "stop" => Command::Stop,
            "disconnect" => Command::Disconnect { peer_id },
            other => return Err(MessageError::UnknownCommand(other.to_string())),
        };

        Ok(parsed)
    }
}

impl From<Command> for Frame {
    fn from(command: Command) -> Self {
        let name = command.name().to_string();

        let (peer_id, data, count) = match command {
            Command::Match | Command::Stop => (None, empty_data(), None),
            Command::Info { peer_id } | Command::CreateOffer { peer_id } => {
                (Some(peer_id), empty_data(), None)
            }
            Command::CountUser { count } => (None, empty_data(), Some(count)),
            Command::Offer {
                peer_id,
                description,
            }
            | Command::Answer {
                peer_id,
                description,
            } => (peer_id, description_data(description), None),
            Command::Candidate { peer_id, candidate } => {
                (peer_id, candidate_data(candidate), None)
            }
            Command::ReceiverNext { peer_id }
            | Command::ReceiverStop { peer_id }
            | Command::Disconnect { peer_id } => (peer_id, empty_data(), None),
        };

        Frame {
            command: name,
            receiver_id: peer_id.map(String::from),
            data,
            count,
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn require_peer(command: &'static str, peer_id: Option<PeerId>) -> Result<PeerId, MessageError> {
    peer_id.ok_or(MessageError::MissingField {
        command,
        field: "receiverId",
    })
}

fn parse_description(
    command: &'static str,
    expected: SdpKind,
    data: Value,
) -> Result<SessionDescription, MessageError> {
    let description: SessionDescription =
        serde_json::from_value(data).map_err(|e| MessageError::InvalidData {
            command,
            reason: e.to_string(),
        })?;

    if description.kind != expected {
        return Err(MessageError::InvalidData {
            command,
            reason: format!("expected type '{}', got '{}'", expected, description.kind),
        });
    }

    Ok(description)
}

fn parse_candidate(data: Value) -> Result<IceCandidate, MessageError> {
    match data {
        Value::Object(mut fields) => match fields.remove("candidate") {
            Some(Value::Null) | None => Err(MessageError::MissingField {
                command: "candidate",
                field: "candidate",
            }),
            Some(candidate) => Ok(IceCandidate(candidate)),
        },
        _ => Err(MessageError::InvalidData {
            command: "candidate",
            reason: "data must be an object".to_string(),
        }),
    }
}

fn description_data(description: SessionDescription) -> Value {
    let mut data = Map::new();
    data.insert(
        "type".to_string(),
        Value::String(description.kind.as_str().to_string()),
    );
    data.insert("sdp".to_string(), Value::String(description.sdp));
    Value::Object(data)
}

fn candidate_data(candidate: IceCandidate) -> Value {
    let mut data = Map::new();
    data.insert("type".to_string(), Value::String("candidate".to_string()));
    data.insert("candidate".to_string(), candidate.0);
    Value::Object(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<Command, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn test_parse_create_offer() {
        let command = parse(json!({
            "command": "createOffer",
            "receiverId": "peer-1",
            "data": {}
        }))
        .unwrap();

        assert_eq!(
            command,
            Command::CreateOffer {
                peer_id: PeerId::new("peer-1")
            }
        );
    }

    #[test]
    fn test_parse_count_user_without_data() {
        let command = parse(json!({ "command": "countUser", "count": 42 })).unwrap();
        assert_eq!(command, Command::CountUser { count: 42 });
    }

    #[test]
    fn test_parse_offer_keeps_sdp_opaque() {
        let command = parse(json!({
            "command": "offer",
            "receiverId": "peer-2",
            "data": { "type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n" }
        }))
        .unwrap();

        match command {
            Command::Offer {
                peer_id,
                description,
            } => {
                assert_eq!(peer_id, Some(PeerId::new("peer-2")));
                assert_eq!(description.kind, SdpKind::Offer);
                assert!(description.sdp.starts_with("v=0"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_candidate_from_browser_shape() {
        let command = parse(json!({
            "command": "candidate",
            "data": {
                "type": "candidate",
                "candidate": {
                    "candidate": "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host",
                    "sdpMid": "0",
                    "sdpMLineIndex": 0
                }
            }
        }))
        .unwrap();

        match command {
            Command::Candidate { peer_id, candidate } => {
                assert!(peer_id.is_none());
                assert_eq!(candidate.0["sdpMid"], "0");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_reject_unknown_command() {
        let frame = Frame {
            command: "teleport".to_string(),
            receiver_id: None,
            data: empty_data(),
            count: None,
        };
        assert_eq!(
            Command::try_from(frame),
            Err(MessageError::UnknownCommand("teleport".to_string()))
        );
    }

    #[test]
    fn test_reject_info_without_receiver() {
        assert!(parse(json!({ "command": "info", "data": {} })).is_err());
    }

    #[test]
    fn test_reject_answer_labelled_as_offer() {
        let frame = Frame {
            command: "answer".to_string(),
            receiver_id: None,
            data: json!({ "type": "offer", "sdp": "v=0" }),
            count: None,
        };
        assert!(matches!(
            Command::try_from(frame),
            Err(MessageError::InvalidData {
                command: "answer",
                ..
            })
        ));
    }

    #[test]
    fn test_reject_candidate_without_payload() {
        let frame = Frame {
            command: "candidate".to_string(),
            receiver_id: None,
            data: json!({ "type": "candidate" }),
            count: None,
        };
        assert_eq!(
            Command::try_from(frame),
            Err(MessageError::MissingField {
                command: "candidate",
                field: "candidate"
            })
        );
    }

    #[test]
    fn test_serialize_match() {
        let value = serde_json::to_value(Command::Match).unwrap();
        assert_eq!(value, json!({ "command": "match", "data": {} }));
    }

    #[test]
    fn test_serialize_receiver_stop_with_peer() {
        let value = serde_json::to_value(Command::ReceiverStop {
            peer_id: Some(PeerId::new("peer-9")),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "command": "receiverStop", "receiverId": "peer-9", "data": {} })
        );
    }

    #[test]
    fn test_serialize_answer_and_candidate_data() {
        let answer = serde_json::to_value(Command::Answer {
            peer_id: Some(PeerId::new("p")),
            description: SessionDescription::answer("v=0"),
        })
        .unwrap();
        assert_eq!(answer["data"], json!({ "type": "answer", "sdp": "v=0" }));

        let candidate = serde_json::to_value(Command::Candidate {
            peer_id: Some(PeerId::new("p")),
            candidate: IceCandidate(json!({ "candidate": "candidate:1" })),
        })
        .unwrap();
        assert_eq!(
            candidate["data"],
            json!({ "type": "candidate", "candidate": { "candidate": "candidate:1" } })
        );
    }
}
