//! Session identity
//!
//! The `gameid` the viewer currently considers themselves part of. It is set
//! only by an explicit server `lobby/select`, and cleared by an explicit leave
//! or by a `lobby/timeout` naming the same game.

use crate::lobby::game::GameId;

/// Banner shown when the server times out the viewer's game
pub const TIMEOUT_BANNER: &str = "Game lobby closed due to inactivity";

/// Viewer session state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    gameid: Option<GameId>,
    /// Dismissible error banner
    banner: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current game, if inside one
    pub fn gameid(&self) -> Option<&str> {
        self.gameid.as_deref()
    }

    /// Whether the viewer is inside a game rather than the lobby
    pub fn is_active(&self) -> bool {
        self.gameid.is_some()
    }

    pub fn is_in(&self, gameid: &str) -> bool {
        self.gameid.as_deref() == Some(gameid)
    }

    /// Server directive: viewer is now in `gameid`
    pub fn select(&mut self, gameid: GameId) {
        self.banner = None;
        self.gameid = Some(gameid);
    }

    /// Server timeout notice. Returns true if it matched the current game
    /// and the session was cleared; a mismatched id changes nothing.
    pub fn timeout(&mut self, gameid: &str) -> bool {
        if !self.is_in(gameid) {
            return false;
        }
        self.gameid = None;
        self.banner = Some(TIMEOUT_BANNER.to_string());
        true
    }

    /// Explicit leave. Returns the game that was left.
    pub fn leave(&mut self) -> Option<GameId> {
        self.gameid.take()
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new() {
        let session = Session::new();
        assert!(!session.is_active());
        assert!(session.gameid().is_none());
        assert!(session.banner().is_none());
    }

    #[test]
    fn test_select() {
        let mut session = Session::new();
        session.select("g1".to_string());
        assert!(session.is_active());
        assert!(session.is_in("g1"));
        assert!(!session.is_in("g2"));
    }

    #[test]
    fn test_timeout_matching() {
        let mut session = Session::new();
        session.select("g1".to_string());

        assert!(session.timeout("g1"));
        assert!(!session.is_active());
        assert_eq!(session.banner(), Some(TIMEOUT_BANNER));

        session.dismiss_banner();
        assert!(session.banner().is_none());
    }

    #[test]
    fn test_timeout_mismatched_is_noop() {
        let mut session = Session::new();
        session.select("g2".to_string());
        let before = session.clone();

        assert!(!session.timeout("g1"));
        assert_eq!(session, before);
    }

    #[test]
    fn test_timeout_outside_game_is_noop() {
        let mut session = Session::new();
        assert!(!session.timeout("g1"));
        assert_eq!(session, Session::new());
    }

    #[test]
    fn test_leave() {
        let mut session = Session::new();
        session.select("g1".to_string());
        assert_eq!(session.leave(), Some("g1".to_string()));
        assert!(!session.is_active());
        assert_eq!(session.leave(), None);
    }

    #[test]
    fn test_select_clears_banner() {
        let mut session = Session::new();
        session.select("g1".to_string());
        session.timeout("g1");
        session.select("g2".to_string());
        assert!(session.banner().is_none());
    }
}
