// A game session: one account-bound player and its snake.

use super::snake::Snake;

pub struct Player {
    /// Stable account UID (survives across sessions).
    pub uid: String,
    /// Session ID, unique among live sessions (`p_{uid}_{rand}`).
    pub id: String,
    pub name: String,
    /// Hex color, `#RGB` or `#RRGGBB`.
    pub color: String,
    pub snake: Snake,
    in_game: bool,
}

impl Player {
    pub fn new(uid: String, id: String, name: String, color: String, snake: Snake) -> Self {
        Player {
            uid,
            id,
            name,
            color,
            snake,
            in_game: true,
        }
    }

    pub fn is_in_game(&self) -> bool {
        self.in_game
    }

    /// Leaving the game always kills the embedded snake, so no stale body
    /// cells survive the session.
    pub fn set_in_game(&mut self, in_game: bool) {
        self.in_game = in_game;
        if !in_game && self.snake.is_alive() {
            self.snake.kill();
        }
    }

    /// In the game with a living snake.
    pub fn is_live(&self) -> bool {
        self.in_game && self.snake.is_alive()
    }
}
