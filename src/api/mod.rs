// HTTP API routes: the thin adapter between the transport and the typed
// operations of the game core. Every response wears the same JSON envelope
// `{code, msg, data}`; non-zero codes mirror the HTTP status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{self, PasteVerifier};
use crate::config::Config;
use crate::db::{Database, LeaderboardSort};
use crate::engine::driver::IntentBuffer;
use crate::engine::grid::Direction;
use crate::engine::map::MapService;
use crate::engine::player::Player;
use crate::engine::snake::Snake;
use crate::engine::world::GameState;
use crate::leaderboard::LeaderboardService;
use crate::metrics;
use crate::rate_limit::RateLimiter;
use crate::session::{SessionError, SessionService};

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginRequest {
    uid: String,
    paste: String,
}

#[derive(Deserialize)]
struct JoinRequest {
    key: String,
    name: String,
    color: Option<String>,
}

#[derive(Deserialize)]
struct MoveRequest {
    token: String,
    direction: String,
}

#[derive(Deserialize)]
struct LeaderboardParams {
    #[serde(rename = "type")]
    sort: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub sessions: Arc<SessionService>,
    pub world: Arc<RwLock<GameState>>,
    pub intents: Arc<IntentBuffer>,
    pub map: MapService,
    pub verifier: Arc<PasteVerifier>,
    pub rate_limiter: RateLimiter,
    pub leaderboard: Arc<LeaderboardService>,
    pub config: Arc<Config>,
    pub shutdown: Arc<AtomicBool>,
}

// ── Envelope helpers ──────────────────────────────────────────────────

fn envelope(status: StatusCode, code: u16, msg: &str, data: Value) -> Response {
    (status, Json(json!({ "code": code, "msg": msg, "data": data }))).into_response()
}

fn ok(data: Value) -> Response {
    envelope(StatusCode::OK, 0, "success", data)
}

fn error(status: StatusCode, msg: &str) -> Response {
    envelope(status, status.as_u16(), msg, Value::Null)
}

fn too_many_requests(retry_after: u64) -> Response {
    envelope(
        StatusCode::TOO_MANY_REQUESTS,
        429,
        "too many requests",
        json!({ "retry_after": retry_after }),
    )
}

fn unavailable(e: sqlx::Error) -> Response {
    tracing::error!(error = %e, "store unreachable");
    error(StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
}

// ── Rate limiting ─────────────────────────────────────────────────────

/// The caller's address for ip-keyed limits, taken from proxy headers. A
/// direct connection shows up as "local".
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "local".to_string())
}

fn is_loopback(addr: &str) -> bool {
    addr == "local" || addr == "::1" || addr == "localhost" || addr.starts_with("127.")
}

/// Check the endpoint's configured limit for this caller. Loopback callers
/// bypass ip-keyed limits; token-keyed limits (`move`) are always enforced.
fn check_rate(
    state: &AppState,
    endpoint: &str,
    caller: &str,
    bypass_loopback: bool,
) -> Result<(), Response> {
    let Some(rule) = state.config.rate_limits.rule(endpoint) else {
        return Ok(());
    };
    if bypass_loopback && is_loopback(caller) {
        return Ok(());
    }
    state
        .rate_limiter
        .check(
            &format!("{caller}:{endpoint}"),
            rule.max_requests,
            Duration::from_secs(rule.window_seconds),
        )
        .map_err(|limited| too_many_requests(limited.retry_after))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/api/status", get(handle_status))
        .route("/api/game/login", post(handle_login))
        .route("/api/game/join", post(handle_join))
        .route("/api/game/map", get(handle_map_full))
        .route("/api/game/map/delta", get(handle_map_delta))
        .route("/api/game/move", post(handle_move))
        .route("/api/leaderboard", get(handle_leaderboard))
        .route("/api/metrics", get(handle_metrics))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(cors)
        .with_state(state)
}

/// Count every request and sample durations at the configured rate.
async fn track_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &path, response.status().as_str()])
        .inc();
    let monitor = &state.config.performance_monitor;
    if monitor.enabled && rand::thread_rng().gen::<f64>() < monitor.sample_rate {
        metrics::API_REQUEST_DURATION_SECONDS
            .with_label_values(&[&path])
            .observe(started.elapsed().as_secs_f64());
    }
    response
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn handle_status(State(state): State<AppState>) -> Response {
    let world = state.world.read().unwrap();
    ok(json!({
        "map_size": { "width": state.map.width(), "height": state.map.height() },
        "round_time": state.config.game.round_time_ms,
        "round": world.round(),
        "player_count": world.live_player_count(),
    }))
}

async fn handle_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(limited) = check_rate(&state, "login", &client_key(&headers), true) {
        return limited;
    }
    let Ok(req) = serde_json::from_value::<LoginRequest>(body) else {
        return error(StatusCode::BAD_REQUEST, "uid and paste are required");
    };
    if !auth::is_valid_uid(&req.uid) {
        return error(StatusCode::BAD_REQUEST, "invalid uid");
    }
    if !auth::is_valid_paste(&req.paste) {
        return error(StatusCode::BAD_REQUEST, "invalid paste");
    }

    if !state.verifier.verify(&req.uid, &req.paste).await {
        return error(StatusCode::UNAUTHORIZED, "credential validation failed");
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    match state.db.get_account(&req.uid).await {
        Ok(Some(account)) => {
            if account.paste == req.paste {
                if let Err(e) = state.db.touch_last_login(&req.uid, now_ms).await {
                    tracing::warn!(uid = %req.uid, error = %e, "last_login update failed");
                }
                state.sessions.cache_key(&req.uid, &account.key);
                ok(json!({ "key": account.key }))
            } else {
                // New proof: rotate the key and invalidate the old one.
                let key = auth::generate_key(&req.uid);
                match state
                    .db
                    .update_account_key(&req.uid, &req.paste, &key, now_ms)
                    .await
                {
                    Ok(_) => {
                        state.sessions.cache_key(&req.uid, &key);
                        tracing::info!(uid = %req.uid, "account key rotated");
                        ok(json!({ "key": key }))
                    }
                    Err(e) => unavailable(e),
                }
            }
        }
        Ok(None) => {
            let key = auth::generate_key(&req.uid);
            match state
                .db
                .create_account(&req.uid, &req.paste, &key, now_ms)
                .await
            {
                Ok(()) => {
                    state.sessions.cache_key(&req.uid, &key);
                    tracing::info!(uid = %req.uid, "new account registered");
                    ok(json!({ "key": key }))
                }
                Err(e) => unavailable(e),
            }
        }
        Err(e) => unavailable(e),
    }
}

async fn handle_join(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(limited) = check_rate(&state, "join", &client_key(&headers), true) {
        return limited;
    }
    let Ok(req) = serde_json::from_value::<JoinRequest>(body) else {
        return error(StatusCode::BAD_REQUEST, "key and name are required");
    };
    if !auth::is_valid_player_name(&req.name) {
        return error(StatusCode::BAD_REQUEST, "invalid player name");
    }
    let color = match req.color {
        Some(color) if !color.is_empty() => {
            if !auth::is_valid_color(&color) {
                return error(StatusCode::BAD_REQUEST, "invalid color format");
            }
            color
        }
        _ => auth::generate_random_color(),
    };

    // Key -> uid through the cache, falling back to the store for keys
    // issued before a restart.
    let uid = match state.sessions.validate_key(&req.key) {
        Some(uid) => uid,
        None => match state.db.find_uid_by_key(&req.key).await {
            Ok(Some(uid)) => {
                state.sessions.cache_key(&uid, &req.key);
                uid
            }
            Ok(None) => return error(StatusCode::FORBIDDEN, "invalid key"),
            Err(e) => return unavailable(e),
        },
    };

    let session = match state.sessions.begin_session(&uid) {
        Ok(session) => session,
        Err(SessionError::AlreadyInGame) => {
            return error(StatusCode::CONFLICT, "player already in game");
        }
    };

    let game = &state.config.game;
    let view = {
        let mut world = state.world.write().unwrap();
        let spawn = state.map.random_safe_spawn(world.players(), game.spawn_safe_radius);
        if spawn.is_null() {
            drop(world);
            state.sessions.remove_session(&session.session_id);
            return error(StatusCode::INTERNAL_SERVER_ERROR, "no safe spawn position");
        }
        let mut snake = match Snake::new(spawn, game.initial_length) {
            Ok(snake) => snake,
            Err(e) => {
                drop(world);
                state.sessions.remove_session(&session.session_id);
                tracing::error!(error = %e, "snake construction failed");
                return error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
            }
        };
        snake.set_invincible_rounds(game.invincibility_rounds);
        world.add_player(Player::new(
            uid.clone(),
            session.session_id.clone(),
            req.name.clone(),
            color,
            snake,
        ));
        world.track_player_joined(&session.session_id);
        world.full_view()
    };

    tracing::info!(uid = %uid, session = %session.session_id, "player joined");
    ok(json!({
        "token": session.token,
        "id": session.session_id,
        "map_state": view,
    }))
}

async fn handle_map_full(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(limited) = check_rate(&state, "map", &client_key(&headers), true) {
        return limited;
    }
    let view = state.world.read().unwrap().full_view();
    ok(json!({ "map_state": view }))
}

async fn handle_map_delta(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(limited) = check_rate(&state, "map_delta", &client_key(&headers), true) {
        return limited;
    }
    let view = state.world.read().unwrap().delta_view();
    ok(json!({ "delta_state": view }))
}

async fn handle_move(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let Ok(req) = serde_json::from_value::<MoveRequest>(body) else {
        return error(StatusCode::BAD_REQUEST, "token and direction are required");
    };
    let Some(direction) = Direction::parse(&req.direction) else {
        return error(StatusCode::BAD_REQUEST, "invalid direction");
    };
    if let Err(limited) = check_rate(&state, "move", &req.token, false) {
        return limited;
    }
    if state.shutdown.load(Ordering::Relaxed) {
        return error(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down");
    }

    let Some(session_id) = state.sessions.validate_token(&req.token) else {
        return error(StatusCode::FORBIDDEN, "invalid token");
    };
    let live = {
        let world = state.world.read().unwrap();
        world
            .player(&session_id)
            .map(|p| p.is_live())
            .unwrap_or(false)
    };
    if !live {
        return error(StatusCode::NOT_FOUND, "session has died");
    }

    state.intents.submit(&session_id, direction);
    ok(Value::Null)
}

async fn handle_leaderboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<LeaderboardParams>,
) -> Response {
    if let Err(limited) = check_rate(&state, "leaderboard", &client_key(&headers), true) {
        return limited;
    }
    let sort_name = params.sort.unwrap_or_else(|| "kills".to_string());
    let Some(sort) = LeaderboardSort::parse(&sort_name) else {
        return error(StatusCode::BAD_REQUEST, "invalid leaderboard type");
    };
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let offset = params.offset.unwrap_or(0).max(0);

    match state.leaderboard.top(sort, limit, offset).await {
        Ok(entries) => ok(json!({
            "entries": entries,
            "season": state.leaderboard.season_id(),
            "cache_ttl_seconds": state.leaderboard.cache_ttl_seconds(),
        })),
        Err(e) => unavailable(e),
    }
}

async fn handle_metrics() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
        .into_response()
}
