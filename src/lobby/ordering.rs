//! Display order for the lobby list
//!
//! Ascending by (viewer not seated, started, date): the viewer's own games
//! first, then open games before running ones, oldest first. The sort is
//! stable, so full ties keep the mirror's traversal order (by `gameid`).

use std::cmp::Ordering;

use crate::lobby::game::Game;
use crate::lobby::viewer::Viewer;

fn sort_key(viewer: &Viewer, game: &Game) -> (bool, bool, i64) {
    (!game.has_player(&viewer.username), game.started, game.date)
}

/// Comparator over two games for `viewer`
pub fn compare(viewer: &Viewer, a: &Game, b: &Game) -> Ordering {
    sort_key(viewer, a).cmp(&sort_key(viewer, b))
}

/// Sort `games` into display order
pub fn order<'a>(viewer: &Viewer, mut games: Vec<&'a Game>) -> Vec<&'a Game> {
    games.sort_by(|a, b| compare(viewer, a, b));
    games
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::game::{Player, RoomKind};

    fn game(id: &str, started: bool, date: i64, players: &[&str]) -> Game {
        let mut g = Game::new(id, RoomKind::Casual, date);
        g.started = started;
        g.players = players.iter().map(|p| Player::new(*p)).collect();
        g
    }

    fn ids(games: &[&Game]) -> Vec<String> {
        games.iter().map(|g| g.gameid.clone()).collect()
    }

    #[test]
    fn test_own_games_first() {
        let viewer = Viewer::new("alice");
        let a = game("a", false, 1, &["bob"]);
        let b = game("b", true, 9, &["alice"]);
        assert_eq!(ids(&order(&viewer, vec![&a, &b])), vec!["b", "a"]);
    }

    #[test]
    fn test_open_before_started() {
        let viewer = Viewer::new("alice");
        let a = game("a", true, 1, &["bob"]);
        let b = game("b", false, 9, &["carol"]);
        assert_eq!(ids(&order(&viewer, vec![&a, &b])), vec!["b", "a"]);
    }

    #[test]
    fn test_oldest_first() {
        let viewer = Viewer::new("alice");
        let a = game("a", false, 30, &["bob"]);
        let b = game("b", false, 10, &["carol"]);
        let c = game("c", false, 20, &["dave"]);
        assert_eq!(ids(&order(&viewer, vec![&a, &b, &c])), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_full_ties_keep_input_order() {
        let viewer = Viewer::new("alice");
        let a = game("a", false, 5, &["bob"]);
        let b = game("b", false, 5, &["carol"]);
        assert_eq!(ids(&order(&viewer, vec![&a, &b])), vec!["a", "b"]);
        assert_eq!(ids(&order(&viewer, vec![&b, &a])), vec!["b", "a"]);
    }

    #[test]
    fn test_spectating_is_not_seated() {
        let viewer = Viewer::new("alice");
        let mut a = game("a", false, 1, &["bob"]);
        a.spectators.push(Player::new("alice"));
        let b = game("b", false, 2, &["alice"]);
        assert_eq!(ids(&order(&viewer, vec![&a, &b])), vec!["b", "a"]);
    }

    #[test]
    fn test_order_is_deterministic() {
        let viewer = Viewer::new("alice");
        let games: Vec<Game> = (0..20)
            .map(|i| game(&format!("g{i:02}"), i % 3 == 0, (i % 4) as i64, &["bob"]))
            .collect();

        let first = ids(&order(&viewer, games.iter().collect()));
        let second = ids(&order(&viewer, games.iter().collect()));
        assert_eq!(first, second);
    }
}
