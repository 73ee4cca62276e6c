// Tick driver: the single writer that advances the world on a fixed period.
//
// Intents arrive into a double-buffered map guarded by its own mutex so move
// submissions never contend with readers snapshotting the world. The driver
// swaps buffers at tick start, resolves the round under the world write lock,
// and only then notifies the session directory and the leaderboard writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::config::GameConfig;
use crate::leaderboard::{LeaderboardEvent, LeaderboardHandle};
use crate::metrics;
use crate::session::SessionService;

use super::grid::{Direction, Point};
use super::map::{Collision, MapService};
use super::world::GameState;

/// Double-buffered intent collection: `submit` writes into the current
/// buffer, `swap` hands the accumulated intents to the driver and installs a
/// fresh buffer. Within one round only the latest direction per session is
/// retained.
pub struct IntentBuffer {
    current: Mutex<HashMap<String, Direction>>,
}

impl IntentBuffer {
    pub fn new() -> Self {
        IntentBuffer {
            current: Mutex::new(HashMap::new()),
        }
    }

    /// Last write wins within a round.
    pub fn submit(&self, session_id: &str, direction: Direction) {
        self.current
            .lock()
            .unwrap()
            .insert(session_id.to_string(), direction);
    }

    /// Take the collected intents and leave an empty buffer for the next
    /// round.
    pub fn swap(&self) -> HashMap<String, Direction> {
        std::mem::take(&mut *self.current.lock().unwrap())
    }

    pub fn pending_count(&self) -> usize {
        self.current.lock().unwrap().len()
    }
}

impl Default for IntentBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A resolved step for one snake, classified against the pre-move world.
struct Decision {
    session_id: String,
    new_head: Point,
    collision: Collision,
}

pub struct TickDriver {
    world: Arc<RwLock<GameState>>,
    intents: Arc<IntentBuffer>,
    sessions: Arc<SessionService>,
    map: MapService,
    game: GameConfig,
    leaderboard: LeaderboardHandle,
    /// Cell -> number of live snake bodies occupying it. Owned by the driver
    /// and maintained from per-move deltas; rebuilt on inconsistency.
    occupancy: HashMap<Point, u32>,
    shutdown: Arc<AtomicBool>,
}

impl TickDriver {
    pub fn new(
        world: Arc<RwLock<GameState>>,
        intents: Arc<IntentBuffer>,
        sessions: Arc<SessionService>,
        map: MapService,
        game: GameConfig,
        leaderboard: LeaderboardHandle,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        TickDriver {
            world,
            intents,
            sessions,
            map,
            game,
            leaderboard,
            occupancy: HashMap::new(),
            shutdown,
        }
    }

    /// Run the fixed-period loop until shutdown. The in-flight tick always
    /// completes; consume with `std::thread::spawn(move || driver.run())`.
    pub fn run(mut self) {
        tracing::info!(round_time_ms = self.game.round_time_ms, "tick driver started");
        let period = Duration::from_millis(self.game.round_time_ms);
        while !self.shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.tick();
            let elapsed = started.elapsed();
            if elapsed < period {
                std::thread::sleep(period - elapsed);
            }
        }
        tracing::info!("tick driver stopped");
    }

    /// Advance the world by one round.
    pub fn tick(&mut self) {
        let started = Instant::now();
        let died = {
            let world_arc = Arc::clone(&self.world);
            let mut world = world_arc.write().unwrap();
            self.resolve_round(&mut world)
        };
        // The world lock is released before touching the session directory.
        for session_id in &died {
            self.sessions.end_session(session_id);
        }
        metrics::TICK_DURATION_MS.observe(started.elapsed().as_secs_f64() * 1000.0);
    }

    fn resolve_round(&mut self, world: &mut GameState) -> Vec<String> {
        let round = world.round() + 1;

        // Fold snakes that joined since the last tick into the occupancy
        // index, then verify it against the live bodies.
        let joined: Vec<String> = world.joined_players().to_vec();
        for session_id in &joined {
            if let Some(player) = world.player(session_id) {
                for cell in player.snake.body() {
                    *self.occupancy.entry(*cell).or_insert(0) += 1;
                }
            }
        }
        self.verify_occupancy(world);

        let pending = self.intents.swap();
        world.clear_delta_tracking();

        let order = world.session_ids();

        // Admission: latest intent per session, else keep the current
        // direction. Reversals are rejected by the snake itself.
        for session_id in &order {
            let Some(player) = world.player_mut(session_id) else {
                continue;
            };
            if !player.is_live() {
                continue;
            }
            let desired = pending
                .get(session_id)
                .copied()
                .unwrap_or(player.snake.direction());
            player.snake.set_direction(desired);
        }

        // Classification happens for every snake against the pre-move world;
        // commits below cannot influence it.
        let mut decisions: Vec<Decision> = Vec::new();
        for session_id in &order {
            let Some(player) = world.player(session_id) else {
                continue;
            };
            if !player.is_live() || player.snake.direction() == Direction::None {
                continue;
            }
            let Some(head) = player.snake.head() else {
                continue;
            };
            let new_head = head.step(player.snake.direction());
            let collision = self.map.classify_collision(player, new_head, world.players());
            decisions.push(Decision {
                session_id: session_id.clone(),
                new_head,
                collision,
            });
        }

        // Simultaneous head-to-head: two otherwise-committable steps into the
        // same cell. Mortal snakes die there; invincible ones have the step
        // rejected.
        let mut targets: HashMap<Point, u32> = HashMap::new();
        for d in decisions.iter().filter(|d| d.collision == Collision::None) {
            *targets.entry(d.new_head).or_insert(0) += 1;
        }

        let mut died: Vec<String> = Vec::new();
        for decision in &decisions {
            let invincible = world
                .player(&decision.session_id)
                .map(|p| p.snake.invincible_rounds() > 0)
                .unwrap_or(false);

            match decision.collision {
                Collision::None => {
                    let contested = targets.get(&decision.new_head).copied().unwrap_or(0) > 1;
                    if !contested {
                        self.commit_step(world, &decision.session_id, decision.new_head, round);
                    } else if invincible {
                        tracing::debug!(
                            session = %decision.session_id,
                            "head-to-head step rejected for invincible snake"
                        );
                    } else {
                        self.kill_player(world, &decision.session_id, round, None);
                        died.push(decision.session_id.clone());
                        metrics::DEATHS_TOTAL.with_label_values(&["head_on"]).inc();
                    }
                }
                collision => {
                    if invincible {
                        tracing::debug!(
                            session = %decision.session_id,
                            ?collision,
                            "fatal step ignored while invincible"
                        );
                        continue;
                    }
                    let credit = if collision == Collision::OtherSnake {
                        self.killer_credit(world, &decision.session_id, decision.new_head)
                    } else {
                        None
                    };
                    self.kill_player(world, &decision.session_id, round, credit);
                    died.push(decision.session_id.clone());
                    let cause = match collision {
                        Collision::Wall => "wall",
                        Collision::SelfBody => "self",
                        _ => "other_snake",
                    };
                    metrics::DEATHS_TOTAL.with_label_values(&[cause]).inc();
                }
            }
        }

        // Dead sessions leave the world; their IDs stay in the delta record.
        for session_id in &died {
            world.remove_player(session_id);
        }

        // Invincibility burns down for every survivor, including snakes
        // whose step was rejected this round.
        for session_id in &order {
            if let Some(player) = world.player_mut(session_id) {
                if player.is_live() {
                    player.snake.decrement_invincibility();
                }
            }
        }

        // Food maintenance toward the configured density.
        let target = self.map.target_food_count(self.game.food_density);
        let current = world.food_count();
        if current < target {
            let fresh =
                self.map
                    .generate_food(target - current, &self.occupancy, world.food_index());
            for position in fresh {
                if world.add_food(position) {
                    world.track_food_added(position);
                }
            }
        }

        world.increment_round();
        let now = chrono::Utc::now().timestamp_millis();
        world.set_timestamps(now, now + self.game.round_time_ms as i64);

        metrics::ROUNDS_TOTAL.inc();
        metrics::LIVE_PLAYERS.set(world.live_player_count() as i64);
        metrics::FOOD_ON_MAP.set(world.food_count() as i64);

        died
    }

    /// Commit an uncontested, collision-free step. Food under the new head is
    /// consumed before the move so the retained tail lands this round.
    fn commit_step(&mut self, world: &mut GameState, session_id: &str, new_head: Point, round: u64) {
        let ate = world.has_food_at(new_head);
        let Some(player) = world.player_mut(session_id) else {
            return;
        };
        if ate {
            player.snake.grow();
        }
        let outcome = player.snake.advance();
        if !outcome.moved {
            return;
        }
        let uid = player.uid.clone();
        let name = player.name.clone();
        let length = player.snake.len();

        *self.occupancy.entry(outcome.new_head).or_insert(0) += 1;
        if outcome.tail_removed {
            self.release_cell(outcome.removed_tail);
        }

        if ate {
            world.remove_food(new_head);
            world.track_food_removed(new_head);
            metrics::FOOD_EATEN_TOTAL.inc();
            self.leaderboard.record(LeaderboardEvent::FoodEaten {
                uid,
                name,
                length,
                round,
            });
        }
    }

    /// The owner of the body cell a mover fatally ran into, if that opponent
    /// is itself vulnerable.
    fn killer_credit(
        &self,
        world: &GameState,
        mover_id: &str,
        new_head: Point,
    ) -> Option<(String, String)> {
        for other in world.players().values() {
            if other.id == mover_id || !other.is_live() {
                continue;
            }
            if other.snake.collides_with_body(new_head) {
                if other.snake.invincible_rounds() > 0 {
                    return None;
                }
                return Some((other.uid.clone(), other.name.clone()));
            }
        }
        None
    }

    fn kill_player(
        &mut self,
        world: &mut GameState,
        session_id: &str,
        round: u64,
        credit: Option<(String, String)>,
    ) {
        if let Some((uid, name)) = credit {
            metrics::KILLS_TOTAL.inc();
            self.leaderboard
                .record(LeaderboardEvent::Kill { uid, name, round });
        }

        let Some(player) = world.player_mut(session_id) else {
            return;
        };
        let cells: Vec<Point> = player.snake.body().iter().copied().collect();
        let uid = player.uid.clone();
        let name = player.name.clone();
        let length = player.snake.len();
        player.set_in_game(false);

        for cell in cells {
            self.release_cell(cell);
        }
        world.track_player_died(session_id);
        self.leaderboard.record(LeaderboardEvent::Death {
            uid,
            name,
            length,
            round,
        });
    }

    fn release_cell(&mut self, cell: Point) {
        match self.occupancy.get_mut(&cell) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.occupancy.remove(&cell);
            }
            None => {
                tracing::warn!(?cell, "occupancy release for an untracked cell");
            }
        }
    }

    /// Cross-check the index against the live bodies; on any disagreement
    /// rebuild it from scratch and keep going.
    fn verify_occupancy(&mut self, world: &GameState) {
        let expected: usize = world
            .players()
            .values()
            .filter(|p| p.is_live())
            .map(|p| p.snake.len())
            .sum();
        let actual: usize = self.occupancy.values().map(|c| *c as usize).sum();
        if expected != actual {
            tracing::warn!(expected, actual, "occupancy index inconsistent; rebuilding");
            metrics::OCCUPANCY_REBUILDS_TOTAL.inc();
            self.rebuild_occupancy(world);
        }
    }

    fn rebuild_occupancy(&mut self, world: &GameState) {
        self.occupancy.clear();
        for player in world.players().values().filter(|p| p.is_live()) {
            for cell in player.snake.body() {
                *self.occupancy.entry(*cell).or_insert(0) += 1;
            }
        }
    }

    #[cfg(test)]
    fn occupancy_count(&self, cell: Point) -> u32 {
        self.occupancy.get(&cell).copied().unwrap_or(0)
    }
}
