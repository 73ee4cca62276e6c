// Snake entity: a head-first deque of body cells plus a parallel hash set
// for O(1) occupancy queries. Both ends mutate every round.

use std::collections::{HashSet, VecDeque};

use super::grid::{Direction, Point};

/// What a single `advance()` changed, so the driver can update the global
/// occupancy index incrementally instead of rebuilding it.
#[derive(Clone, Copy, Debug, Default)]
pub struct MoveOutcome {
    pub moved: bool,
    pub new_head: Point,
    pub tail_removed: bool,
    pub removed_tail: Point,
}

pub struct Snake {
    /// Body cells, head at index 0.
    body: VecDeque<Point>,
    /// Same cells as `body`, for O(1) membership checks.
    occupied: HashSet<Point>,
    direction: Direction,
    invincible_rounds: u32,
    alive: bool,
    /// Moves remaining during which the tail is retained.
    pending_growth: u32,
}

impl Snake {
    /// A new snake occupies a single cell; the first `initial_length - 1`
    /// moves retain the tail, so it reaches its target length by moving.
    pub fn new(head: Point, initial_length: u32) -> Result<Self, String> {
        if initial_length < 1 {
            return Err("snake initial length must be at least 1".into());
        }
        let mut body = VecDeque::new();
        body.push_back(head);
        let mut occupied = HashSet::new();
        occupied.insert(head);
        Ok(Snake {
            body,
            occupied,
            direction: Direction::None,
            invincible_rounds: 0,
            alive: true,
            pending_growth: initial_length - 1,
        })
    }

    pub fn head(&self) -> Option<Point> {
        self.body.front().copied()
    }

    pub fn body(&self) -> &VecDeque<Point> {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn invincible_rounds(&self) -> u32 {
        self.invincible_rounds
    }

    pub fn set_invincible_rounds(&mut self, rounds: u32) {
        self.invincible_rounds = rounds;
    }

    pub fn decrement_invincibility(&mut self) {
        self.invincible_rounds = self.invincible_rounds.saturating_sub(1);
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn pending_growth(&self) -> u32 {
        self.pending_growth
    }

    /// Record the direction for the next move. A reversal of the current
    /// direction is ignored once the snake is moving.
    pub fn set_direction(&mut self, dir: Direction) {
        if self.direction != Direction::None && dir.is_opposite_of(self.direction) {
            return;
        }
        self.direction = dir;
    }

    /// Step one cell in the current direction. No-op while dead or before
    /// the first direction is set. The tail is retained while growth is
    /// pending, otherwise it is removed.
    pub fn advance(&mut self) -> MoveOutcome {
        let mut outcome = MoveOutcome::default();

        if !self.alive || self.direction == Direction::None {
            return outcome;
        }
        let Some(head) = self.head() else {
            return outcome;
        };

        let new_head = head.step(self.direction);
        outcome.moved = true;
        outcome.new_head = new_head;

        if self.pending_growth > 0 {
            self.pending_growth -= 1;
        } else if let Some(tail) = self.body.pop_back() {
            self.occupied.remove(&tail);
            outcome.tail_removed = true;
            outcome.removed_tail = tail;
        }

        self.body.push_front(new_head);
        self.occupied.insert(new_head);

        outcome
    }

    /// Retain the tail on the next move (called after eating food).
    pub fn grow(&mut self) {
        self.pending_growth += 1;
    }

    /// True iff `point` is a body cell other than the current head. Used to
    /// check whether the snake's own next head position hits its body.
    pub fn collides_with_self(&self, point: Point) -> bool {
        if self.body.len() <= 1 {
            return false;
        }
        if Some(point) == self.head() {
            return false;
        }
        self.occupied.contains(&point)
    }

    /// True iff `point` is any body cell, head included. Used to check other
    /// snakes' heads against this snake.
    pub fn collides_with_body(&self, point: Point) -> bool {
        self.occupied.contains(&point)
    }

    pub fn kill(&mut self) {
        self.alive = false;
        self.body.clear();
        self.occupied.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_starts_at_length_one() {
        let s = Snake::new(Point::new(5, 5), 3).unwrap();
        assert!(s.is_alive());
        assert_eq!(s.len(), 1);
        assert_eq!(s.pending_growth(), 2);
        assert_eq!(s.direction(), Direction::None);
        assert_eq!(s.head(), Some(Point::new(5, 5)));
    }

    #[test]
    fn test_new_rejects_zero_length() {
        assert!(Snake::new(Point::new(0, 0), 0).is_err());
    }

    #[test]
    fn test_advance_noop_without_direction() {
        let mut s = Snake::new(Point::new(5, 5), 3).unwrap();
        let outcome = s.advance();
        assert!(!outcome.moved);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_grows_to_initial_length_by_moving() {
        let mut s = Snake::new(Point::new(5, 5), 3).unwrap();
        s.set_direction(Direction::Right);
        s.advance();
        s.advance();
        assert_eq!(s.len(), 3);
        assert_eq!(s.head(), Some(Point::new(7, 5)));
        // Fully grown: further moves shed the tail.
        let outcome = s.advance();
        assert_eq!(s.len(), 3);
        assert!(outcome.tail_removed);
        assert_eq!(outcome.removed_tail, Point::new(5, 5));
    }

    #[test]
    fn test_body_matches_occupancy_set() {
        let mut s = Snake::new(Point::new(2, 2), 4).unwrap();
        s.set_direction(Direction::Down);
        for _ in 0..6 {
            s.advance();
            assert_eq!(s.len(), s.body().len());
            for p in s.body() {
                assert!(s.collides_with_body(*p));
            }
        }
    }

    #[test]
    fn test_reversal_is_ignored() {
        let mut s = Snake::new(Point::new(5, 5), 1).unwrap();
        s.set_direction(Direction::Right);
        s.set_direction(Direction::Left);
        assert_eq!(s.direction(), Direction::Right);
        // Perpendicular turns are fine.
        s.set_direction(Direction::Up);
        assert_eq!(s.direction(), Direction::Up);
    }

    #[test]
    fn test_first_direction_can_be_anything() {
        let mut s = Snake::new(Point::new(5, 5), 1).unwrap();
        assert_eq!(s.direction(), Direction::None);
        s.set_direction(Direction::Left);
        assert_eq!(s.direction(), Direction::Left);
    }

    #[test]
    fn test_grow_retains_tail_on_next_move() {
        let mut s = Snake::new(Point::new(5, 5), 1).unwrap();
        s.set_direction(Direction::Right);
        s.advance();
        assert_eq!(s.len(), 1);
        s.grow();
        let outcome = s.advance();
        assert!(!outcome.tail_removed);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_self_collision_excludes_head() {
        let mut s = Snake::new(Point::new(5, 5), 4).unwrap();
        s.set_direction(Direction::Right);
        s.advance();
        s.advance();
        s.advance();
        // Body: (8,5) (7,5) (6,5) (5,5); head is (8,5).
        assert!(!s.collides_with_self(Point::new(8, 5)));
        assert!(s.collides_with_self(Point::new(7, 5)));
        assert!(s.collides_with_body(Point::new(8, 5)));
        assert!(!s.collides_with_self(Point::new(0, 0)));
    }

    #[test]
    fn test_kill_clears_everything() {
        let mut s = Snake::new(Point::new(5, 5), 3).unwrap();
        s.set_direction(Direction::Right);
        s.advance();
        s.kill();
        assert!(!s.is_alive());
        assert!(s.is_empty());
        assert!(!s.collides_with_body(Point::new(5, 5)));
        assert_eq!(s.head(), None);
        // Dead snakes do not move.
        assert!(!s.advance().moved);
    }

    #[test]
    fn test_invincibility_counter() {
        let mut s = Snake::new(Point::new(5, 5), 1).unwrap();
        s.set_invincible_rounds(2);
        s.decrement_invincibility();
        assert_eq!(s.invincible_rounds(), 1);
        s.decrement_invincibility();
        s.decrement_invincibility();
        assert_eq!(s.invincible_rounds(), 0);
    }
}
