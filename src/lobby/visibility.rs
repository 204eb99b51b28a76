//! Per-viewer visibility filter
//!
//! A game is hidden from the viewer when any seated player has blocked the
//! viewer, or when the viewer has blocked any seated player. Blocking is
//! per-game: one blocked player hides the whole game. Tournament games and
//! privileged viewers bypass filtering. The filter is a pure function of
//! `(viewer, games)`.

use crate::lobby::game::Game;
use crate::lobby::viewer::Viewer;

/// Whether `game` is visible to `viewer`
pub fn is_visible(viewer: &Viewer, game: &Game) -> bool {
    if game.room.is_tournament() || viewer.privileged {
        return true;
    }

    let blocked_by_player = game
        .players
        .iter()
        .any(|p| p.user.blocks(&viewer.username));
    let blocking_player = game.player_usernames().any(|u| viewer.has_blocked(u));

    !(blocked_by_player || blocking_player)
}

/// Subset of `games` visible to `viewer`, in input order
pub fn visible<'a, I>(viewer: &Viewer, games: I) -> Vec<&'a Game>
where
    I: IntoIterator<Item = &'a Game>,
{
    games
        .into_iter()
        .filter(|game| is_visible(viewer, game))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::game::{Player, RoomKind};

    fn player(name: &str, blocks: &[&str]) -> Player {
        let mut p = Player::new(name);
        p.user.options.blocked_users = blocks.iter().map(|s| s.to_string()).collect();
        p
    }

    fn game(id: &str, room: RoomKind, players: Vec<Player>) -> Game {
        let mut g = Game::new(id, room, 1);
        g.players = players;
        g
    }

    #[test]
    fn test_unblocked_game_visible() {
        let viewer = Viewer::new("alice");
        let g = game("g1", RoomKind::Casual, vec![player("bob", &[])]);
        assert!(is_visible(&viewer, &g));
    }

    #[test]
    fn test_viewer_blocked_by_player() {
        let viewer = Viewer::new("alice");
        let g = game("g1", RoomKind::Casual, vec![player("bob", &["alice"])]);
        assert!(!is_visible(&viewer, &g));
    }

    #[test]
    fn test_viewer_blocks_sole_player() {
        let viewer = Viewer::new("alice").with_blocked(["bob"]);
        let g = game("g1", RoomKind::Casual, vec![player("bob", &[])]);
        assert!(!is_visible(&viewer, &g));
    }

    #[test]
    fn test_blocking_is_per_game() {
        let viewer = Viewer::new("alice").with_blocked(["bob"]);
        let g = game(
            "g1",
            RoomKind::Casual,
            vec![player("carol", &[]), player("bob", &[])],
        );
        assert!(!is_visible(&viewer, &g));
    }

    #[test]
    fn test_tournament_bypass() {
        let viewer = Viewer::new("alice").with_blocked(["bob"]);
        let g = game("g1", RoomKind::Tournament, vec![player("bob", &["alice"])]);
        assert!(is_visible(&viewer, &g));
    }

    #[test]
    fn test_privileged_bypass() {
        let viewer = Viewer::new("mod").with_privileged(true).with_blocked(["bob"]);
        let g = game("g1", RoomKind::Competitive, vec![player("bob", &["mod"])]);
        assert!(is_visible(&viewer, &g));
    }

    #[test]
    fn test_spectator_blocks_do_not_hide() {
        let viewer = Viewer::new("alice");
        let mut g = game("g1", RoomKind::Casual, vec![player("bob", &[])]);
        g.spectators.push(player("eve", &["alice"]));
        assert!(is_visible(&viewer, &g));
    }

    #[test]
    fn test_visible_keeps_input_order() {
        let viewer = Viewer::new("alice").with_blocked(["bob"]);
        let games = vec![
            game("g1", RoomKind::Casual, vec![player("carol", &[])]),
            game("g2", RoomKind::Casual, vec![player("bob", &[])]),
            game("g3", RoomKind::Casual, vec![player("dave", &[])]),
            game("g4", RoomKind::Tournament, vec![player("bob", &[])]),
        ];

        let ids: Vec<&str> = visible(&viewer, &games)
            .iter()
            .map(|g| g.gameid.as_str())
            .collect();
        assert_eq!(ids, vec!["g1", "g3", "g4"]);
    }
}
