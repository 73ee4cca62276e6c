// Map service: grid bounds, safe-spawn search, collision classification and
// food generation against the occupancy index.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::Rng;

use super::grid::Point;
use super::player::Player;

/// How a prospective head position relates to the pre-move world. The
/// classification never looks at invincibility; whether it becomes a death
/// is the driver's call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collision {
    None,
    Wall,
    SelfBody,
    OtherSnake,
}

#[derive(Clone, Copy, Debug)]
pub struct MapService {
    width: i32,
    height: i32,
}

impl MapService {
    pub fn new(width: i32, height: i32) -> Self {
        MapService { width, height }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn total_cells(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    pub fn is_valid_position(&self, p: Point) -> bool {
        p.x >= 0 && p.x < self.width && p.y >= 0 && p.y < self.height
    }

    /// Number of foods the map should carry for the given density, with the
    /// density clamped to [0, 1].
    pub fn target_food_count(&self, density: f64) -> usize {
        let density = density.clamp(0.0, 1.0);
        (self.total_cells() as f64 * density).round() as usize
    }

    /// Uniformly sample a spawn cell whose surrounding square of radius
    /// `safe_radius` is free of any live body. Sampling is restricted to the
    /// rectangle shrunk by `safe_radius` on each side; if that rectangle is
    /// empty the whole grid is sampled instead. Returns `Point::NULL` when no
    /// safe cell is found within the retry budget.
    pub fn random_safe_spawn(
        &self,
        players: &BTreeMap<String, Player>,
        safe_radius: i32,
    ) -> Point {
        if self.width <= 0 || self.height <= 0 {
            tracing::warn!("invalid map dimensions for spawn search");
            return Point::NULL;
        }
        let radius = safe_radius.max(0);

        let total_cells = self.total_cells();
        let max_attempts = total_cells.min(100.max(total_cells / 10)) as usize;

        let mut min_x = radius.min(self.width - 1).max(0);
        let mut max_x = (self.width - 1 - radius).max(0);
        let mut min_y = radius.min(self.height - 1).max(0);
        let mut max_y = (self.height - 1 - radius).max(0);
        if min_x > max_x || min_y > max_y {
            min_x = 0;
            max_x = self.width - 1;
            min_y = 0;
            max_y = self.height - 1;
        }

        let mut rng = rand::thread_rng();
        for _ in 0..max_attempts {
            let candidate = Point::new(
                rng.gen_range(min_x..=max_x),
                rng.gen_range(min_y..=max_y),
            );
            if self.is_safe_area(candidate, radius, players) {
                return candidate;
            }
        }

        tracing::warn!(attempts = max_attempts, "no safe spawn position found");
        Point::NULL
    }

    /// Every in-bounds cell of the `(2r+1)` square around `center` is free of
    /// live bodies. Out-of-bounds cells are skipped, not treated as unsafe.
    fn is_safe_area(
        &self,
        center: Point,
        radius: i32,
        players: &BTreeMap<String, Player>,
    ) -> bool {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let p = Point::new(center.x + dx, center.y + dy);
                if !self.is_valid_position(p) {
                    continue;
                }
                for player in players.values() {
                    if player.is_live() && player.snake.collides_with_body(p) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Classify a prospective head position against the pre-move world.
    /// Check order: wall, then own body (head excluded), then any other live
    /// snake (head included).
    pub fn classify_collision(
        &self,
        player: &Player,
        new_head: Point,
        all_players: &BTreeMap<String, Player>,
    ) -> Collision {
        if !self.is_valid_position(new_head) {
            return Collision::Wall;
        }
        if player.snake.collides_with_self(new_head) {
            return Collision::SelfBody;
        }
        for other in all_players.values() {
            if other.id == player.id || !other.is_live() {
                continue;
            }
            if other.snake.collides_with_body(new_head) {
                return Collision::OtherSnake;
            }
        }
        Collision::None
    }

    /// Sample up to `count` fresh food cells, rejecting cells that carry food
    /// already, were produced earlier in this call, or appear in the snake
    /// occupancy index. A request for more than half the grid is clamped.
    pub fn generate_food(
        &self,
        count: usize,
        occupancy: &HashMap<Point, u32>,
        existing_foods: &HashMap<Point, usize>,
    ) -> Vec<Point> {
        let mut foods = Vec::new();
        if count == 0 || self.width <= 0 || self.height <= 0 {
            return foods;
        }

        const MAX_ATTEMPTS_PER_FOOD: usize = 100;
        let half_grid = (self.total_cells() / 2).max(1) as usize;
        let count = if count > half_grid {
            tracing::warn!(requested = count, clamped = half_grid, "food request clamped to half the grid");
            half_grid
        } else {
            count
        };

        let mut rng = rand::thread_rng();
        let mut produced: HashSet<Point> = HashSet::with_capacity(count);

        for _ in 0..count {
            let mut placed = false;
            for _ in 0..MAX_ATTEMPTS_PER_FOOD {
                let candidate = Point::new(
                    rng.gen_range(0..self.width),
                    rng.gen_range(0..self.height),
                );
                if existing_foods.contains_key(&candidate)
                    || produced.contains(&candidate)
                    || occupancy.contains_key(&candidate)
                {
                    continue;
                }
                produced.insert(candidate);
                foods.push(candidate);
                placed = true;
                break;
            }
            if !placed {
                tracing::warn!(
                    generated = foods.len(),
                    requested = count,
                    "food placement retries exhausted"
                );
            }
        }

        foods
    }

    /// `round(density * W * H)` foods against the live occupancy of `players`.
    pub fn generate_by_density(
        &self,
        density: f64,
        players: &BTreeMap<String, Player>,
    ) -> Vec<Point> {
        let mut occupancy: HashMap<Point, u32> = HashMap::new();
        for player in players.values().filter(|p| p.is_live()) {
            for cell in player.snake.body() {
                *occupancy.entry(*cell).or_insert(0) += 1;
            }
        }
        self.generate_food(self.target_food_count(density), &occupancy, &HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::grid::Direction;
    use crate::engine::snake::Snake;

    fn player_at(id: &str, head: Point, length: u32) -> Player {
        let mut snake = Snake::new(head, length).unwrap();
        // Stretch to the target length so the body actually occupies cells.
        snake.set_direction(Direction::Right);
        for _ in 1..length {
            snake.advance();
        }
        Player::new("7".into(), id.into(), "p".into(), "#FFF".into(), snake)
    }

    #[test]
    fn test_bounds() {
        let map = MapService::new(10, 8);
        assert!(map.is_valid_position(Point::new(0, 0)));
        assert!(map.is_valid_position(Point::new(9, 7)));
        assert!(!map.is_valid_position(Point::new(10, 0)));
        assert!(!map.is_valid_position(Point::new(0, 8)));
        assert!(!map.is_valid_position(Point::new(-1, 3)));
    }

    #[test]
    fn test_target_food_count_clamps_density() {
        let map = MapService::new(10, 10);
        assert_eq!(map.target_food_count(0.05), 5);
        assert_eq!(map.target_food_count(-1.0), 0);
        assert_eq!(map.target_food_count(2.0), 100);
    }

    #[test]
    fn test_spawn_on_empty_map() {
        let map = MapService::new(20, 20);
        let players = BTreeMap::new();
        let spawn = map.random_safe_spawn(&players, 2);
        assert!(!spawn.is_null());
        assert!(map.is_valid_position(spawn));
        // The shrunk rectangle is honored.
        assert!(spawn.x >= 2 && spawn.x <= 17);
        assert!(spawn.y >= 2 && spawn.y <= 17);
    }

    #[test]
    fn test_spawn_falls_back_to_full_grid() {
        // Radius bigger than the map: the safe rectangle is empty, sampling
        // falls back to the whole grid.
        let map = MapService::new(3, 3);
        let players = BTreeMap::new();
        let spawn = map.random_safe_spawn(&players, 5);
        assert!(map.is_valid_position(spawn));
    }

    #[test]
    fn test_spawn_avoids_bodies() {
        let map = MapService::new(7, 7);
        let mut players = BTreeMap::new();
        // A snake across the middle row makes most of the map unsafe at
        // radius 1; the spawn must still avoid every body cell's square.
        players.insert("a".to_string(), player_at("a", Point::new(0, 3), 7));
        for _ in 0..50 {
            let spawn = map.random_safe_spawn(&players, 1);
            if spawn.is_null() {
                continue;
            }
            assert!((spawn.y - 3).abs() > 1, "spawn {spawn:?} too close to body");
        }
    }

    #[test]
    fn test_spawn_fails_when_fully_occupied() {
        let map = MapService::new(3, 1);
        let mut players = BTreeMap::new();
        players.insert("a".to_string(), player_at("a", Point::new(0, 0), 3));
        assert!(map.random_safe_spawn(&players, 0).is_null());
    }

    #[test]
    fn test_classify_wall() {
        let map = MapService::new(5, 5);
        let mut players = BTreeMap::new();
        players.insert("a".to_string(), player_at("a", Point::new(2, 2), 1));
        let p = &players["a"];
        assert_eq!(
            map.classify_collision(p, Point::new(-1, 2), &players),
            Collision::Wall
        );
        assert_eq!(
            map.classify_collision(p, Point::new(2, 5), &players),
            Collision::Wall
        );
    }

    #[test]
    fn test_classify_self_and_other() {
        let map = MapService::new(20, 20);
        let mut players = BTreeMap::new();
        // Snake "a" occupies (1,1)..(4,1), head at (4,1).
        players.insert("a".to_string(), player_at("a", Point::new(1, 1), 4));
        // Snake "b" occupies (1,5)..(3,5), head at (3,5).
        players.insert("b".to_string(), player_at("b", Point::new(1, 5), 3));

        let a = &players["a"];
        assert_eq!(
            map.classify_collision(a, Point::new(3, 1), &players),
            Collision::SelfBody
        );
        // Own head cell is not a self collision.
        assert_eq!(
            map.classify_collision(a, Point::new(4, 1), &players),
            Collision::None
        );
        // Another snake's body, and its head, both classify as OtherSnake.
        assert_eq!(
            map.classify_collision(a, Point::new(2, 5), &players),
            Collision::OtherSnake
        );
        assert_eq!(
            map.classify_collision(a, Point::new(3, 5), &players),
            Collision::OtherSnake
        );
        assert_eq!(
            map.classify_collision(a, Point::new(10, 10), &players),
            Collision::None
        );
    }

    #[test]
    fn test_classify_ignores_dead_snakes() {
        let map = MapService::new(20, 20);
        let mut players = BTreeMap::new();
        players.insert("a".to_string(), player_at("a", Point::new(1, 1), 1));
        players.insert("b".to_string(), player_at("b", Point::new(5, 5), 3));
        players.get_mut("b").unwrap().snake.kill();

        let a = &players["a"];
        assert_eq!(
            map.classify_collision(a, Point::new(6, 5), &players),
            Collision::None
        );
    }

    #[test]
    fn test_generate_food_respects_exclusions() {
        let map = MapService::new(4, 4);
        let mut occupancy = HashMap::new();
        // Occupy the left half.
        for y in 0..4 {
            for x in 0..2 {
                occupancy.insert(Point::new(x, y), 1);
            }
        }
        let mut existing = HashMap::new();
        existing.insert(Point::new(2, 0), 0usize);

        let foods = map.generate_food(5, &occupancy, &existing);
        let unique: HashSet<_> = foods.iter().copied().collect();
        assert_eq!(unique.len(), foods.len(), "no duplicate food cells");
        for f in &foods {
            assert!(f.x >= 2, "food {f:?} on an occupied cell");
            assert_ne!(*f, Point::new(2, 0), "food on an existing food cell");
        }
    }

    #[test]
    fn test_generate_food_clamps_to_half_grid() {
        let map = MapService::new(4, 4);
        let foods = map.generate_food(100, &HashMap::new(), &HashMap::new());
        assert!(foods.len() <= 8);
    }

    #[test]
    fn test_generate_by_density() {
        let map = MapService::new(10, 10);
        let players = BTreeMap::new();
        let foods = map.generate_by_density(0.05, &players);
        assert_eq!(foods.len(), 5);
        assert!(map.generate_by_density(0.0, &players).is_empty());
    }
}
