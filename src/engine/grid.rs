// Grid primitives: integer points and the four movement directions.

use serde::{Deserialize, Serialize};

/// A cell on the grid. Ordered so collections of points have a stable order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    /// Sentinel for "no valid position" (e.g. spawn search failure).
    pub const NULL: Point = Point { x: -1, y: -1 };

    pub fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// The cell one step away in the given direction. `Direction::None` is
    /// the identity.
    pub fn step(&self, dir: Direction) -> Point {
        match dir {
            Direction::Up => Point::new(self.x, self.y - 1),
            Direction::Down => Point::new(self.x, self.y + 1),
            Direction::Left => Point::new(self.x - 1, self.y),
            Direction::Right => Point::new(self.x + 1, self.y),
            Direction::None => *self,
        }
    }
}

/// Movement direction of a snake. `None` is the pre-first-move state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    None,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
            Direction::None => Direction::None,
        }
    }

    pub fn is_opposite_of(&self, other: Direction) -> bool {
        *self != Direction::None && *self == other.opposite()
    }

    /// Parse a client-supplied direction string. Case-insensitive; only the
    /// four movement directions are accepted ("none" is not a valid intent).
    pub fn parse(s: &str) -> Option<Direction> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::None => "none",
        }
    }
}
