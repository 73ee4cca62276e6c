use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use gridsnake_backend::api::{self, AppState};
use gridsnake_backend::auth::PasteVerifier;
use gridsnake_backend::config::Config;
use gridsnake_backend::db::{Database, SeasonKey};
use gridsnake_backend::engine::driver::{IntentBuffer, TickDriver};
use gridsnake_backend::engine::map::MapService;
use gridsnake_backend::engine::world::GameState;
use gridsnake_backend::leaderboard::{self, LeaderboardHandle, LeaderboardService};
use gridsnake_backend::metrics;
use gridsnake_backend::rate_limit::RateLimiter;
use gridsnake_backend::session::SessionService;

fn main() {
    tracing_subscriber::fmt::init();

    let config = Arc::new(Config::load());
    metrics::register_metrics();

    // The HTTP worker pool is sized from config; the tick driver gets its
    // own dedicated OS thread outside the runtime.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.threads.max(1))
        .enable_all()
        .build()
        .expect("failed to build runtime");

    runtime.block_on(async move {
        sqlx::any::install_default_drivers();
        let db = Arc::new(
            Database::new(&config.database.url)
                .await
                .expect("failed to initialize database"),
        );
        tracing::info!(url = %config.database.url, "database initialized");

        let season = SeasonKey {
            season_id: config.leaderboard.season_id.clone(),
            season_start: config.leaderboard.season_start,
            season_end: config.leaderboard.season_end,
        };
        let (leaderboard_handle, leaderboard_rx) = LeaderboardHandle::channel();
        leaderboard::spawn_writer(Arc::clone(&db), season, leaderboard_rx);

        let world = Arc::new(RwLock::new(GameState::new()));
        let intents = Arc::new(IntentBuffer::new());
        let sessions = Arc::new(SessionService::new());
        let map = MapService::new(config.game.map_width, config.game.map_height);
        let shutdown = Arc::new(AtomicBool::new(false));

        let driver = TickDriver::new(
            Arc::clone(&world),
            Arc::clone(&intents),
            Arc::clone(&sessions),
            map,
            config.game.clone(),
            leaderboard_handle,
            Arc::clone(&shutdown),
        );
        let driver_thread = std::thread::spawn(move || driver.run());

        let state = AppState {
            db: Arc::clone(&db),
            sessions,
            world,
            intents,
            map,
            verifier: Arc::new(PasteVerifier::new(config.auth.clone())),
            rate_limiter: RateLimiter::new(),
            leaderboard: Arc::new(LeaderboardService::new(db, &config.leaderboard)),
            config: Arc::clone(&config),
            shutdown: Arc::clone(&shutdown),
        };
        let app = api::router(state);

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .unwrap_or_else(|e| panic!("failed to bind to {addr}: {e}"));
        tracing::info!(%addr, "gridsnake backend listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutdown signal received");
            })
            .await
            .expect("server error");

        // Let the in-flight tick complete before exiting.
        shutdown.store(true, Ordering::Relaxed);
        if driver_thread.join().is_err() {
            tracing::error!("tick driver thread panicked");
        }
        tracing::info!("server shutdown complete");
    });
}
