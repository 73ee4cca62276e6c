// Authoritative world state: the session registry, the food registry with
// its position index, and the per-round delta tracking buffers.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::grid::{Direction, Point};
use super::player::Player;

/// Full per-player payload: body cells included, never key or token.
#[derive(Clone, Debug, Serialize)]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    pub color: String,
    pub head: Point,
    pub blocks: Vec<Point>,
    pub length: usize,
    pub invincible_rounds: u32,
}

/// Bandwidth-minimal per-player payload for delta updates (no body).
#[derive(Clone, Debug, Serialize)]
pub struct PlayerDeltaView {
    pub id: String,
    pub head: Point,
    pub direction: Direction,
    pub length: usize,
    pub invincible_rounds: u32,
}

/// The full view: everything a client needs to draw the world from scratch.
#[derive(Clone, Debug, Serialize)]
pub struct MapState {
    pub round: u64,
    pub timestamp: i64,
    pub next_round_timestamp: i64,
    pub players: Vec<PlayerView>,
    pub foods: Vec<Point>,
}

/// The delta view: the minimal update that mutates the previous full view
/// into the current one.
#[derive(Clone, Debug, Serialize)]
pub struct DeltaState {
    pub round: u64,
    pub timestamp: i64,
    pub next_round_timestamp: i64,
    pub players: Vec<PlayerDeltaView>,
    pub joined_players: Vec<PlayerView>,
    pub died_players: Vec<String>,
    pub added_foods: Vec<Point>,
    pub removed_foods: Vec<Point>,
}

pub struct GameState {
    round: u64,
    timestamp_ms: i64,
    next_round_timestamp_ms: i64,
    /// Sessions keyed by session ID. A BTreeMap so per-round iteration is
    /// deterministic (ascending session ID).
    players: BTreeMap<String, Player>,
    foods: Vec<Point>,
    /// Position -> index into `foods`, for O(1) lookup and swap-removal.
    food_index: HashMap<Point, usize>,
    // Delta tracking, cleared at tick start.
    joined_players: Vec<String>,
    died_players: Vec<String>,
    added_foods: Vec<Point>,
    removed_foods: Vec<Point>,
}

impl GameState {
    pub fn new() -> Self {
        GameState {
            round: 0,
            timestamp_ms: 0,
            next_round_timestamp_ms: 0,
            players: BTreeMap::new(),
            foods: Vec::new(),
            food_index: HashMap::new(),
            joined_players: Vec::new(),
            died_players: Vec::new(),
            added_foods: Vec::new(),
            removed_foods: Vec::new(),
        }
    }

    // --- Round & timestamps ---

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn increment_round(&mut self) {
        self.round += 1;
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn next_round_timestamp(&self) -> i64 {
        self.next_round_timestamp_ms
    }

    pub fn set_timestamps(&mut self, now_ms: i64, next_round_ms: i64) {
        self.timestamp_ms = now_ms;
        self.next_round_timestamp_ms = next_round_ms;
    }

    // --- Players ---

    /// Insert a session. A duplicate session ID is ignored.
    pub fn add_player(&mut self, player: Player) {
        self.players.entry(player.id.clone()).or_insert(player);
    }

    pub fn remove_player(&mut self, session_id: &str) {
        self.players.remove(session_id);
    }

    pub fn player(&self, session_id: &str) -> Option<&Player> {
        self.players.get(session_id)
    }

    pub fn player_mut(&mut self, session_id: &str) -> Option<&mut Player> {
        self.players.get_mut(session_id)
    }

    pub fn players(&self) -> &BTreeMap<String, Player> {
        &self.players
    }

    pub fn live_player_count(&self) -> usize {
        self.players.values().filter(|p| p.is_live()).count()
    }

    /// Session IDs in ascending order (the per-round resolution order).
    pub fn session_ids(&self) -> Vec<String> {
        self.players.keys().cloned().collect()
    }

    // --- Foods ---

    /// Add a food. At most one food per cell; duplicates are ignored.
    /// Returns whether the food was added.
    pub fn add_food(&mut self, position: Point) -> bool {
        if self.food_index.contains_key(&position) {
            return false;
        }
        self.foods.push(position);
        self.food_index.insert(position, self.foods.len() - 1);
        true
    }

    /// Remove the food at `position`, if any, in O(1) via swap-removal.
    pub fn remove_food(&mut self, position: Point) -> bool {
        let Some(index) = self.food_index.remove(&position) else {
            return false;
        };
        let last = self.foods.len() - 1;
        if index != last {
            self.foods.swap(index, last);
            let moved = self.foods[index];
            self.food_index.insert(moved, index);
        }
        self.foods.pop();
        true
    }

    pub fn has_food_at(&self, position: Point) -> bool {
        self.food_index.contains_key(&position)
    }

    pub fn foods(&self) -> &[Point] {
        &self.foods
    }

    pub fn food_count(&self) -> usize {
        self.foods.len()
    }

    pub fn food_index(&self) -> &HashMap<Point, usize> {
        &self.food_index
    }

    // --- Delta tracking ---

    pub fn track_player_joined(&mut self, session_id: &str) {
        self.joined_players.push(session_id.to_string());
    }

    pub fn track_player_died(&mut self, session_id: &str) {
        self.died_players.push(session_id.to_string());
    }

    pub fn track_food_added(&mut self, position: Point) {
        self.added_foods.push(position);
    }

    pub fn track_food_removed(&mut self, position: Point) {
        self.removed_foods.push(position);
    }

    pub fn joined_players(&self) -> &[String] {
        &self.joined_players
    }

    pub fn clear_delta_tracking(&mut self) {
        self.joined_players.clear();
        self.died_players.clear();
        self.added_foods.clear();
        self.removed_foods.clear();
    }

    // --- Views ---

    fn player_view(player: &Player) -> PlayerView {
        PlayerView {
            id: player.id.clone(),
            name: player.name.clone(),
            color: player.color.clone(),
            head: player.snake.head().unwrap_or(Point::new(0, 0)),
            blocks: player.snake.body().iter().copied().collect(),
            length: player.snake.len(),
            invincible_rounds: player.snake.invincible_rounds(),
        }
    }

    pub fn full_view(&self) -> MapState {
        MapState {
            round: self.round,
            timestamp: self.timestamp_ms,
            next_round_timestamp: self.next_round_timestamp_ms,
            players: self
                .players
                .values()
                .filter(|p| p.is_in_game())
                .map(Self::player_view)
                .collect(),
            foods: self.foods.clone(),
        }
    }

    pub fn delta_view(&self) -> DeltaState {
        DeltaState {
            round: self.round,
            timestamp: self.timestamp_ms,
            next_round_timestamp: self.next_round_timestamp_ms,
            players: self
                .players
                .values()
                .filter(|p| p.is_in_game())
                .map(|p| PlayerDeltaView {
                    id: p.id.clone(),
                    head: p.snake.head().unwrap_or(Point::new(0, 0)),
                    direction: p.snake.direction(),
                    length: p.snake.len(),
                    invincible_rounds: p.snake.invincible_rounds(),
                })
                .collect(),
            joined_players: self
                .joined_players
                .iter()
                .filter_map(|id| self.players.get(id))
                .filter(|p| p.is_in_game())
                .map(Self::player_view)
                .collect(),
            died_players: self.died_players.clone(),
            added_foods: self.added_foods.clone(),
            removed_foods: self.removed_foods.clone(),
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::snake::Snake;

    fn session(id: &str, head: Point) -> Player {
        Player::new(
            "42".into(),
            id.into(),
            format!("player-{id}"),
            "#00FF00".into(),
            Snake::new(head, 1).unwrap(),
        )
    }

    #[test]
    fn test_add_and_remove_player() {
        let mut w = GameState::new();
        w.add_player(session("p_42_000001", Point::new(1, 1)));
        assert_eq!(w.live_player_count(), 1);
        assert!(w.player("p_42_000001").is_some());

        // Duplicate session ID is ignored.
        w.add_player(session("p_42_000001", Point::new(9, 9)));
        assert_eq!(
            w.player("p_42_000001").unwrap().snake.head(),
            Some(Point::new(1, 1))
        );

        w.remove_player("p_42_000001");
        assert!(w.player("p_42_000001").is_none());
        assert_eq!(w.live_player_count(), 0);
    }

    #[test]
    fn test_session_ids_are_sorted() {
        let mut w = GameState::new();
        w.add_player(session("p_42_9", Point::new(1, 1)));
        w.add_player(session("p_42_1", Point::new(2, 2)));
        w.add_player(session("p_42_5", Point::new(3, 3)));
        assert_eq!(w.session_ids(), vec!["p_42_1", "p_42_5", "p_42_9"]);
    }

    #[test]
    fn test_food_add_remove_and_index() {
        let mut w = GameState::new();
        assert!(w.add_food(Point::new(1, 1)));
        assert!(w.add_food(Point::new(2, 2)));
        assert!(w.add_food(Point::new(3, 3)));
        // No duplicates on a cell.
        assert!(!w.add_food(Point::new(2, 2)));
        assert_eq!(w.food_count(), 3);
        assert!(w.has_food_at(Point::new(2, 2)));

        // Swap-removal keeps the index consistent.
        assert!(w.remove_food(Point::new(1, 1)));
        assert!(!w.remove_food(Point::new(1, 1)));
        assert_eq!(w.food_count(), 2);
        assert!(w.has_food_at(Point::new(2, 2)));
        assert!(w.has_food_at(Point::new(3, 3)));
        assert!(w.remove_food(Point::new(3, 3)));
        assert!(w.remove_food(Point::new(2, 2)));
        assert_eq!(w.food_count(), 0);
    }

    #[test]
    fn test_round_and_timestamps() {
        let mut w = GameState::new();
        assert_eq!(w.round(), 0);
        w.increment_round();
        w.increment_round();
        assert_eq!(w.round(), 2);
        w.set_timestamps(1000, 1500);
        assert_eq!(w.timestamp(), 1000);
        assert_eq!(w.next_round_timestamp(), 1500);
    }

    #[test]
    fn test_full_view_excludes_departed_players() {
        let mut w = GameState::new();
        w.add_player(session("p_42_1", Point::new(1, 1)));
        w.add_player(session("p_42_2", Point::new(2, 2)));
        w.player_mut("p_42_2").unwrap().set_in_game(false);

        let view = w.full_view();
        assert_eq!(view.players.len(), 1);
        assert_eq!(view.players[0].id, "p_42_1");
        assert_eq!(view.players[0].blocks, vec![Point::new(1, 1)]);
    }

    #[test]
    fn test_delta_view_tracks_changes() {
        let mut w = GameState::new();
        w.add_player(session("p_42_1", Point::new(1, 1)));
        w.track_player_joined("p_42_1");
        w.add_food(Point::new(4, 4));
        w.track_food_added(Point::new(4, 4));
        w.track_player_died("p_42_0");
        w.track_food_removed(Point::new(9, 9));

        let delta = w.delta_view();
        assert_eq!(delta.joined_players.len(), 1);
        assert_eq!(delta.joined_players[0].id, "p_42_1");
        assert_eq!(delta.died_players, vec!["p_42_0"]);
        assert_eq!(delta.added_foods, vec![Point::new(4, 4)]);
        assert_eq!(delta.removed_foods, vec![Point::new(9, 9)]);
        // Delta player entries carry no body.
        assert_eq!(delta.players.len(), 1);

        w.clear_delta_tracking();
        let delta = w.delta_view();
        assert!(delta.joined_players.is_empty());
        assert!(delta.died_players.is_empty());
        assert!(delta.added_foods.is_empty());
        assert!(delta.removed_foods.is_empty());
    }

    #[test]
    fn test_view_serialization_shape() {
        let mut w = GameState::new();
        w.add_player(session("p_42_1", Point::new(1, 1)));
        w.set_timestamps(5, 10);
        let json = serde_json::to_value(w.full_view()).unwrap();
        assert_eq!(json["round"], 0);
        assert_eq!(json["players"][0]["head"]["x"], 1);
        assert!(json["players"][0].get("token").is_none());
        assert!(json["players"][0].get("key").is_none());
    }
}
