//! Room and membership projection
//!
//! Read-only answers derived from the mirror plus viewer identity: how many
//! open and running games each room shows, and which lobby actions the
//! viewer may take on a given game.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::lobby::game::{Game, RoomKind, MAX_PLAYERS};
use crate::lobby::session::Session;
use crate::lobby::viewer::Viewer;

/// Games in one room, split by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoomCount {
    pub open: usize,
    pub started: usize,
}

impl RoomCount {
    pub fn total(&self) -> usize {
        self.open + self.started
    }
}

/// Per-room counts over an already filtered game set
pub fn room_counts<'a, I>(games: I) -> BTreeMap<RoomKind, RoomCount>
where
    I: IntoIterator<Item = &'a Game>,
{
    let mut counts: BTreeMap<RoomKind, RoomCount> = BTreeMap::new();
    for game in games {
        let count = counts.entry(game.room.clone()).or_default();
        if game.started {
            count.started += 1;
        } else {
            count.open += 1;
        }
    }
    counts
}

/// Action gates for one viewer in one session state
#[derive(Debug, Clone, Copy)]
pub struct Projection<'a> {
    viewer: &'a Viewer,
    session: &'a Session,
}

impl<'a> Projection<'a> {
    pub fn new(viewer: &'a Viewer, session: &'a Session) -> Self {
        Self { viewer, session }
    }

    /// New games can only be created from the lobby
    pub fn can_create(&self) -> bool {
        !self.session.is_active()
    }

    pub fn can_join(&self, game: &Game) -> bool {
        !self.session.is_active()
            && !game.started
            && game.players.len() < MAX_PLAYERS
            && !game.has_player(&self.viewer.username)
    }

    pub fn can_watch(&self, game: &Game) -> bool {
        !self.session.is_active() && game.allow_spectator
    }

    pub fn is_host(&self, game: &Game) -> bool {
        game.host()
            .is_some_and(|host| host.username() == self.viewer.username)
    }

    pub fn can_start(&self, game: &Game) -> bool {
        self.is_host(game) && game.decks_ready()
    }

    /// Joining a protected game needs a password prompt first
    pub fn needs_password(&self, game: &Game) -> bool {
        game.is_protected() && !game.has_player(&self.viewer.username)
    }
}
