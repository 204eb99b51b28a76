//! Lobby wire protocol
//!
//! Every frame is a JSON envelope `{"type": "<ns>/<name>", "data": ...}`.
//! Inbound envelopes are routed by `type` and validated into
//! [`InboundMessage`] at the boundary; outbound commands are
//! [`ClientMessage`] values encoded into the same envelope shape.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::lobby::game::{GameId, RoomKind};
use crate::lobby::notification::Notification;
use crate::net::patch::DiffOp;

/// Raw inbound frame before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// Inbound message types the lobby core consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    GamesList,
    GamesDiff,
    GamesDiffer,
    LobbySelect,
    LobbyNotification,
    LobbyTimeout,
}

impl MessageType {
    pub const ALL: [MessageType; 6] = [
        MessageType::GamesList,
        MessageType::GamesDiff,
        MessageType::GamesDiffer,
        MessageType::LobbySelect,
        MessageType::LobbyNotification,
        MessageType::LobbyTimeout,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::GamesList => "games/list",
            MessageType::GamesDiff => "games/diff",
            MessageType::GamesDiffer => "games/differ",
            MessageType::LobbySelect => "lobby/select",
            MessageType::LobbyNotification => "lobby/notification",
            MessageType::LobbyTimeout => "lobby/timeout",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == kind)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyed upserts and deletes. Update entries may be partial records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameDiff {
    #[serde(default)]
    pub update: BTreeMap<GameId, Map<String, Value>>,
    #[serde(default)]
    pub delete: Vec<GameId>,
}

/// Per-game diff-op sequences relative to the previous known record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchStream {
    #[serde(default)]
    pub update: BTreeMap<GameId, Vec<DiffOp>>,
    #[serde(default)]
    pub delete: Vec<GameId>,
    /// Optional broadcast sequence number used for gap detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// The three shapes of mirror update
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorUpdate {
    /// Full game list as received. Entries are validated one by one so a
    /// malformed game cannot reject the rest of the list.
    Snapshot(Vec<Value>),
    Diff(GameDiff),
    PatchStream(PatchStream),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffPayload {
    pub diff: GameDiff,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchPayload {
    pub diff: PatchStream,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectPayload {
    pub gameid: GameId,
    #[serde(default)]
    pub started: bool,
    /// Initial game state handed to the session launcher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPayload {
    pub gameid: GameId,
}

/// A validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    GamesList(Vec<Value>),
    GamesDiff(DiffPayload),
    GamesDiffer(PatchPayload),
    LobbySelect(SelectPayload),
    LobbyNotification(Notification),
    LobbyTimeout(TimeoutPayload),
}

impl InboundMessage {
    /// Validate `data` against the payload shape of `kind`
    pub fn decode(kind: MessageType, data: Value) -> Result<Self, DecodeError> {
        let msg = match kind {
            MessageType::GamesList => InboundMessage::GamesList(from_data(kind, data)?),
            MessageType::GamesDiff => InboundMessage::GamesDiff(from_data(kind, data)?),
            MessageType::GamesDiffer => InboundMessage::GamesDiffer(from_data(kind, data)?),
            MessageType::LobbySelect => InboundMessage::LobbySelect(from_data(kind, data)?),
            MessageType::LobbyNotification => {
                InboundMessage::LobbyNotification(from_data(kind, data)?)
            }
            MessageType::LobbyTimeout => InboundMessage::LobbyTimeout(from_data(kind, data)?),
        };
        Ok(msg)
    }

    /// Validate a raw envelope
    pub fn from_envelope(envelope: Envelope) -> Result<Self, DecodeError> {
        let kind = MessageType::parse(&envelope.kind)
            .ok_or_else(|| DecodeError::UnknownType(envelope.kind.clone()))?;
        Self::decode(kind, envelope.data)
    }

    pub fn kind(&self) -> MessageType {
        match self {
            InboundMessage::GamesList(_) => MessageType::GamesList,
            InboundMessage::GamesDiff(_) => MessageType::GamesDiff,
            InboundMessage::GamesDiffer(_) => MessageType::GamesDiffer,
            InboundMessage::LobbySelect(_) => MessageType::LobbySelect,
            InboundMessage::LobbyNotification(_) => MessageType::LobbyNotification,
            InboundMessage::LobbyTimeout(_) => MessageType::LobbyTimeout,
        }
    }
}

fn from_data<T: for<'de> Deserialize<'de>>(kind: MessageType, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|e| DecodeError::Payload {
        kind: kind.as_str(),
        reason: e.to_string(),
    })
}

/// Options for a new game
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateGame {
    pub title: String,
    pub room: RoomKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "allow-spectator")]
    pub allow_spectator: bool,
    pub spectatorhands: bool,
    #[serde(rename = "save-replay")]
    pub save_replay: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
}

/// Commands sent to the server. Fire-and-forget; results arrive as inbound
/// messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Ask for a full `games/list` snapshot
    #[serde(rename = "lobby/list")]
    ListGames,
    #[serde(rename = "lobby/create")]
    Create(CreateGame),
    #[serde(rename = "lobby/join")]
    Join {
        gameid: GameId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    #[serde(rename = "lobby/watch")]
    Watch {
        gameid: GameId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    #[serde(rename = "lobby/leave")]
    Leave { gameid: GameId },
    #[serde(rename = "lobby/start")]
    Start { gameid: GameId },
    #[serde(rename = "lobby/say")]
    Say { gameid: GameId, msg: String },
    #[serde(rename = "lobby/swap")]
    SwapSides { gameid: GameId },
}

/// Encode an outbound command as a JSON frame body
pub fn encode(message: &ClientMessage) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(message).map_err(|e| EncodeError(e.to_string()))
}

/// Decode a frame body into an envelope
pub fn decode(data: &[u8]) -> Result<Envelope, DecodeError> {
    serde_json::from_slice(data).map_err(|e| DecodeError::Envelope(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Envelope(String),
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Malformed {kind} payload: {reason}")]
    Payload { kind: &'static str, reason: String },
}
