//! Lobby game records
//!
//! Strongly-typed view of one lobby entry. Records cross the wire as JSON
//! objects and are merged and patched at the JSON level, so every type here
//! keeps unknown fields in a flattened `extra` map and normalizes the
//! collection fields (`players`, `spectators`) to a present, possibly empty,
//! array.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Opaque unique game identifier
pub type GameId = String;

/// Maximum seated players per game
pub const MAX_PLAYERS: usize = 2;

/// Keys of optional top-level fields that are omitted when unset.
/// Full snapshots write them back as explicit nulls so a refresh clears them.
const OPTIONAL_KEYS: [&str; 2] = ["password", "format"];

/// Lobby room category
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RoomKind {
    Tournament,
    Competitive,
    #[default]
    Casual,
    /// Any category this client does not know about
    Other(String),
}

impl RoomKind {
    pub fn as_str(&self) -> &str {
        match self {
            RoomKind::Tournament => "tournament",
            RoomKind::Competitive => "competitive",
            RoomKind::Casual => "casual",
            RoomKind::Other(name) => name,
        }
    }

    /// Tournament rooms are never subject to block filtering
    pub fn is_tournament(&self) -> bool {
        matches!(self, RoomKind::Tournament)
    }
}

impl From<String> for RoomKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "tournament" => RoomKind::Tournament,
            "competitive" => RoomKind::Competitive,
            "casual" => RoomKind::Casual,
            _ => RoomKind::Other(value),
        }
    }
}

impl From<RoomKind> for String {
    fn from(room: RoomKind) -> Self {
        match room {
            RoomKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user options carried on the user document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserOptions {
    #[serde(rename = "blocked-users", default, deserialize_with = "null_as_empty")]
    pub blocked_users: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Account as embedded in a game record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub options: UserOptions,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    /// Whether this user's personal block-list names `username`
    pub fn blocks(&self, username: &str) -> bool {
        self.options.blocked_users.iter().any(|u| u == username)
    }
}

/// Deck summary attached to a seated player after selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A seated player or a spectator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub user: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deck: Option<Deck>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Player {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            user: User::new(username),
            ..Default::default()
        }
    }

    pub fn username(&self) -> &str {
        &self.user.username
    }

    pub fn has_deck(&self) -> bool {
        self.deck.is_some()
    }
}

/// One lobby entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub gameid: GameId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub room: RoomKind,
    /// Join order; the first player hosts
    #[serde(default, deserialize_with = "null_as_empty")]
    pub players: Vec<Player>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub spectators: Vec<Player>,
    #[serde(default)]
    pub started: bool,
    /// Creation time, epoch milliseconds
    #[serde(default)]
    pub date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "allow-spectator", default)]
    pub allow_spectator: bool,
    #[serde(default)]
    pub spectatorhands: bool,
    #[serde(rename = "save-replay", default)]
    pub save_replay: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Game {
    pub fn new(gameid: impl Into<GameId>, room: RoomKind, date: i64) -> Self {
        Self {
            gameid: gameid.into(),
            room,
            date,
            ..Default::default()
        }
    }

    /// Build a record from a JSON object, normalizing absent or null
    /// collections and forcing `gameid` to the key it is stored under.
    pub fn from_record(gameid: &str, mut record: Map<String, Value>) -> Result<Self, serde_json::Error> {
        normalize_record(&mut record);
        record.insert("gameid".to_string(), Value::String(gameid.to_string()));
        serde_json::from_value(Value::Object(record))
    }

    /// JSON object form used as the merge/patch reference tree
    pub fn to_record(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "game serialized to non-object: {}",
                other
            ))),
        }
    }

    /// Record form of a full snapshot entry: optional fields the snapshot
    /// leaves unset are written as explicit nulls.
    pub fn to_full_record(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let mut record = self.to_record()?;
        for key in OPTIONAL_KEYS {
            record.entry(key).or_insert(Value::Null);
        }
        Ok(record)
    }

    /// The host is the first player to have joined
    pub fn host(&self) -> Option<&Player> {
        self.players.first()
    }

    pub fn has_player(&self, username: &str) -> bool {
        self.players.iter().any(|p| p.username() == username)
    }

    pub fn has_spectator(&self, username: &str) -> bool {
        self.spectators.iter().any(|p| p.username() == username)
    }

    pub fn player_usernames(&self) -> impl Iterator<Item = &str> {
        self.players.iter().map(Player::username)
    }

    /// Password presence marks protection; the secret is never displayed
    pub fn is_protected(&self) -> bool {
        self.password.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    /// Every seat is taken and every seated player has picked a deck
    pub fn decks_ready(&self) -> bool {
        self.players.len() == MAX_PLAYERS && self.players.iter().all(Player::has_deck)
    }
}

/// Default `players`/`spectators` to an empty array when absent or null
pub fn normalize_record(record: &mut Map<String, Value>) {
    for key in ["players", "spectators"] {
        if matches!(record.get(key), None | Some(Value::Null)) {
            record.insert(key.to_string(), Value::Array(Vec::new()));
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
