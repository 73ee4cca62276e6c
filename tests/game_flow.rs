// End-to-end engine scenarios: the session/join flow, round resolution
// through the tick driver, and the delta protocol's consistency law.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use gridsnake_backend::config::GameConfig;
use gridsnake_backend::engine::driver::{IntentBuffer, TickDriver};
use gridsnake_backend::engine::grid::{Direction, Point};
use gridsnake_backend::engine::map::MapService;
use gridsnake_backend::engine::player::Player;
use gridsnake_backend::engine::snake::Snake;
use gridsnake_backend::engine::world::{DeltaState, GameState, MapState};
use gridsnake_backend::leaderboard::{LeaderboardEvent, LeaderboardHandle};
use gridsnake_backend::session::{NewSession, SessionService};

struct Arena {
    driver: TickDriver,
    world: Arc<RwLock<GameState>>,
    intents: Arc<IntentBuffer>,
    sessions: Arc<SessionService>,
    _events: tokio::sync::mpsc::UnboundedReceiver<LeaderboardEvent>,
}

fn arena(width: i32, height: i32, food_density: f64) -> Arena {
    let cfg = GameConfig {
        map_width: width,
        map_height: height,
        round_time_ms: 100,
        initial_length: 1,
        invincibility_rounds: 0,
        food_density,
        spawn_safe_radius: 0,
    };
    let world = Arc::new(RwLock::new(GameState::new()));
    let intents = Arc::new(IntentBuffer::new());
    let sessions = Arc::new(SessionService::new());
    let map = MapService::new(cfg.map_width, cfg.map_height);
    let (handle, rx) = LeaderboardHandle::channel();
    let driver = TickDriver::new(
        Arc::clone(&world),
        Arc::clone(&intents),
        Arc::clone(&sessions),
        map,
        cfg,
        handle,
        Arc::new(AtomicBool::new(false)),
    );
    Arena {
        driver,
        world,
        intents,
        sessions,
        _events: rx,
    }
}

/// Join the way the request adapter does: session minted in the directory,
/// snake placed in the world, join tracked for the delta.
fn join(arena: &Arena, uid: &str, head: Point, length: u32, direction: Direction) -> NewSession {
    let session = arena.sessions.begin_session(uid).unwrap();
    let mut snake = Snake::new(head, length).unwrap();
    snake.set_direction(direction);
    for _ in 1..length {
        snake.advance();
    }
    let mut world = arena.world.write().unwrap();
    world.add_player(Player::new(
        uid.into(),
        session.session_id.clone(),
        format!("snake-{uid}"),
        "#336699".into(),
        snake,
    ));
    world.track_player_joined(&session.session_id);
    session
}

// ── Client-side delta application (the protocol's consistency law) ────

#[derive(Clone, Debug, PartialEq)]
struct ClientPlayer {
    name: String,
    color: String,
    body: Vec<Point>,
    invincible_rounds: u32,
}

#[derive(Clone, Debug, PartialEq, Default)]
struct ClientView {
    players: HashMap<String, ClientPlayer>,
    foods: HashSet<Point>,
}

impl ClientView {
    fn from_full(view: &MapState) -> Self {
        ClientView {
            players: view
                .players
                .iter()
                .map(|p| {
                    (
                        p.id.clone(),
                        ClientPlayer {
                            name: p.name.clone(),
                            color: p.color.clone(),
                            body: p.blocks.clone(),
                            invincible_rounds: p.invincible_rounds,
                        },
                    )
                })
                .collect(),
            foods: view.foods.iter().copied().collect(),
        }
    }

    fn apply_delta(&mut self, delta: &DeltaState) {
        for id in &delta.died_players {
            self.players.remove(id);
        }
        for joined in &delta.joined_players {
            self.players.insert(
                joined.id.clone(),
                ClientPlayer {
                    name: joined.name.clone(),
                    color: joined.color.clone(),
                    body: joined.blocks.clone(),
                    invincible_rounds: joined.invincible_rounds,
                },
            );
        }
        for food in &delta.removed_foods {
            self.foods.remove(food);
        }
        for food in &delta.added_foods {
            self.foods.insert(*food);
        }
        for update in &delta.players {
            let Some(player) = self.players.get_mut(&update.id) else {
                continue;
            };
            if player.body.first() != Some(&update.head) {
                player.body.insert(0, update.head);
            }
            player.body.truncate(update.length);
            player.invincible_rounds = update.invincible_rounds;
        }
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────

#[test]
fn delta_stream_reproduces_full_view() {
    let mut arena = arena(10, 10, 0.03);
    let a = join(&arena, "1", Point::new(2, 2), 1, Direction::Right);
    let b = join(&arena, "2", Point::new(2, 7), 3, Direction::Right);

    // Baseline full view after the first resolved round.
    arena.driver.tick();
    let mut client = ClientView::from_full(&arena.world.read().unwrap().full_view());

    // Five more rounds with both snakes steering in loops; apply each delta
    // as a client would.
    let square = [
        Direction::Down,
        Direction::Left,
        Direction::Up,
        Direction::Right,
        Direction::Down,
    ];
    for (i, dir) in square.iter().enumerate() {
        arena.intents.submit(&a.session_id, *dir);
        if i % 2 == 0 {
            arena.intents.submit(&b.session_id, Direction::Right);
        }
        arena.driver.tick();
        let delta = arena.world.read().unwrap().delta_view();
        client.apply_delta(&delta);
    }

    let authoritative = ClientView::from_full(&arena.world.read().unwrap().full_view());
    assert_eq!(client, authoritative);
}

#[test]
fn duplicate_move_is_idempotent() {
    let run = |submissions: &[Direction]| -> (Point, usize) {
        let mut arena = arena(10, 10, 0.0);
        let s = join(&arena, "1", Point::new(4, 4), 2, Direction::Right);
        for dir in submissions {
            arena.intents.submit(&s.session_id, *dir);
        }
        arena.driver.tick();
        let world = arena.world.read().unwrap();
        let p = world.player(&s.session_id).unwrap();
        (p.snake.head().unwrap(), p.snake.len())
    };

    let once = run(&[Direction::Down]);
    let twice = run(&[Direction::Down, Direction::Down]);
    assert_eq!(once, twice);
    assert_eq!(once.0, Point::new(5, 5));
}

#[test]
fn last_move_in_a_round_wins() {
    let run = |submissions: &[Direction]| -> Point {
        let mut arena = arena(10, 10, 0.0);
        let s = join(&arena, "1", Point::new(4, 4), 1, Direction::None);
        for dir in submissions {
            arena.intents.submit(&s.session_id, *dir);
        }
        arena.driver.tick();
        let world = arena.world.read().unwrap();
        world.player(&s.session_id).unwrap().snake.head().unwrap()
    };

    let sequenced = run(&[Direction::Up, Direction::Down]);
    let only_last = run(&[Direction::Down]);
    assert_eq!(sequenced, only_last);
    assert_eq!(sequenced, Point::new(4, 5));
}

#[test]
fn dead_session_keeps_token_and_account_can_rejoin() {
    let mut arena = arena(5, 5, 0.0);
    // Heading straight into the wall.
    let first = join(&arena, "1001", Point::new(4, 2), 1, Direction::Right);
    arena.driver.tick();

    {
        let world = arena.world.read().unwrap();
        assert!(world.player(&first.session_id).is_none());
        assert_eq!(
            world.delta_view().died_players,
            vec![first.session_id.clone()]
        );
    }

    // The old token still resolves to the dead session; the world no longer
    // knows it (the adapter answers not_found from exactly this state).
    assert_eq!(
        arena.sessions.validate_token(&first.token),
        Some(first.session_id.clone())
    );
    assert!(!arena.sessions.is_session_active(&first.session_id));
    assert!(arena
        .world
        .read()
        .unwrap()
        .player(&first.session_id)
        .is_none());

    // The same account may rejoin with fresh credentials.
    let second = join(&arena, "1001", Point::new(1, 1), 1, Direction::None);
    assert_ne!(second.session_id, first.session_id);
    assert_ne!(second.token, first.token);
    arena.driver.tick();
    assert!(arena
        .world
        .read()
        .unwrap()
        .player(&second.session_id)
        .is_some());
}

#[test]
fn join_during_game_appears_in_next_delta() {
    let mut arena = arena(10, 10, 0.0);
    join(&arena, "1", Point::new(2, 2), 1, Direction::Right);
    arena.driver.tick();

    // A join between two ticks is visible in the currently served delta.
    let late = join(&arena, "2", Point::new(7, 7), 1, Direction::None);
    {
        let world = arena.world.read().unwrap();
        let delta = world.delta_view();
        assert_eq!(delta.joined_players.len(), 1);
        assert_eq!(delta.joined_players[0].id, late.session_id);
        assert!(!delta.joined_players[0].blocks.is_empty());
    }

    // After the next round resolves it is a regular player.
    arena.driver.tick();
    let world = arena.world.read().unwrap();
    let delta = world.delta_view();
    assert!(delta.joined_players.is_empty());
    assert_eq!(delta.players.len(), 2);
}

#[test]
fn timestamps_are_non_decreasing_and_rounds_monotonic() {
    let mut arena = arena(8, 8, 0.02);
    join(&arena, "1", Point::new(3, 3), 1, Direction::None);

    let mut last_round = 0;
    let mut last_ts = 0;
    for _ in 0..4 {
        arena.driver.tick();
        let world = arena.world.read().unwrap();
        assert!(world.round() > last_round);
        assert!(world.timestamp() >= last_ts);
        assert_eq!(world.next_round_timestamp(), world.timestamp() + 100);
        last_round = world.round();
        last_ts = world.timestamp();
    }
}
