// Application configuration: one JSON document with sections for the
// server, the game rules, the database, rate limits, auth, the leaderboard
// and the performance monitor. Every section falls back to defaults when
// absent so a partial config file is fine.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Worker threads for the HTTP runtime.
    pub threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".into(),
            port: 8080,
            threads: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub map_width: i32,
    pub map_height: i32,
    pub round_time_ms: u64,
    pub initial_length: u32,
    pub invincibility_rounds: u32,
    /// Fraction of cells that should carry food, clamped to [0, 1].
    pub food_density: f64,
    pub spawn_safe_radius: i32,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            map_width: 100,
            map_height: 100,
            round_time_ms: 500,
            initial_length: 3,
            invincibility_rounds: 5,
            food_density: 0.02,
            spawn_safe_radius: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection string; SQLite file by default, PostgreSQL supported.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: "sqlite:gridsnake.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitRule {
    pub window_seconds: u64,
    pub max_requests: u32,
}

/// Per-endpoint rate limit rules, keyed by endpoint name ("login", "join",
/// "move", "map", "map_delta", "leaderboard"). A missing entry means the
/// endpoint is not limited.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RateLimitsConfig {
    pub endpoints: HashMap<String, RateLimitRule>,
}

impl RateLimitsConfig {
    pub fn rule(&self, endpoint: &str) -> Option<RateLimitRule> {
        self.endpoints.get(endpoint).copied()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Proof accepted without consulting the oracle. Empty disables it.
    pub universal_paste: String,
    /// Text the attestation paste must contain.
    pub validation_text: String,
    /// Base URL of the external paste service.
    pub paste_base_url: String,
    pub timeout_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            universal_paste: String::new(),
            validation_text: "I am joining the gridsnake arena".into(),
            paste_base_url: "https://www.luogu.com/paste".into(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    /// The single active season. Rows are keyed by (uid, season_id).
    pub season_id: String,
    pub season_start: i64,
    pub season_end: i64,
    pub cache_ttl_seconds: u64,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        LeaderboardConfig {
            season_id: "all_time".into(),
            season_start: 0,
            season_end: 0,
            cache_ttl_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    /// Fraction of requests whose duration is sampled into the histogram.
    pub sample_rate: f64,
    pub window_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            enabled: true,
            sample_rate: 1.0,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub game: GameConfig,
    pub database: DatabaseConfig,
    pub rate_limits: RateLimitsConfig,
    pub auth: AuthConfig,
    pub leaderboard: LeaderboardConfig,
    pub performance_monitor: MonitorConfig,
}

impl Config {
    /// Load the config document. The path comes from the first CLI argument,
    /// then the `GRIDSNAKE_CONFIG` env var, then `config.json`. A missing or
    /// malformed file logs a warning and falls back to defaults.
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let path = args
            .get(1)
            .cloned()
            .or_else(|| std::env::var("GRIDSNAKE_CONFIG").ok())
            .unwrap_or_else(|| "config.json".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path, error = %e, "config parse failed; using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!(path, error = %e, "config read failed; using defaults");
                Config::default()
            }
        }
    }
}
