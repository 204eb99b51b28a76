//! Lobby alert gating
//!
//! Alerts ride either on a list diff (`notification` field) or on the
//! dedicated `lobby/notification` message. Diff-borne alerts only sound while
//! the viewer sits in the lobby; the dedicated channel always sounds.

use serde::{Deserialize, Serialize};

use crate::lobby::session::Session;

/// Name of the alert to play (e.g. `"ting"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Notification(String);

impl Notification {
    pub fn new(sound: impl Into<String>) -> Self {
        Self(sound.into())
    }

    pub fn sound(&self) -> &str {
        &self.0
    }
}

/// Where an alert came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSource {
    /// Carried on a `games/diff` or `games/differ` message
    ListDiff,
    /// The dedicated `lobby/notification` message
    Lobby,
}

/// Decide whether an incoming alert should be played
pub fn should_play(source: AlertSource, session: &Session) -> bool {
    match source {
        AlertSource::Lobby => true,
        AlertSource::ListDiff => !session.is_active(),
    }
}

/// Gate an optional alert, returning the one to play
pub fn trigger(
    notification: Option<&Notification>,
    source: AlertSource,
    session: &Session,
) -> Option<Notification> {
    notification
        .filter(|_| should_play(source, session))
        .cloned()
}
