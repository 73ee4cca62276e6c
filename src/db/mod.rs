// Database access layer using sqlx's Any driver (supports SQLite and
// PostgreSQL): account records and the per-season leaderboard counters.

use serde::{Deserialize, Serialize};
use sqlx::any::{AnyPoolOptions, AnyQueryResult};
use sqlx::AnyPool;

/// A registered account. Timestamps are milliseconds since epoch.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub uid: String,
    pub paste: String,
    pub key: String,
    pub created_at: i64,
    pub last_login: i64,
}

/// One leaderboard row as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeaderboardRow {
    pub uid: String,
    pub name: String,
    pub now_length: i64,
    pub max_length: i64,
    pub kills: i64,
    pub deaths: i64,
    pub games_played: i64,
    pub total_food: i64,
    pub last_round: i64,
}

/// The two supported leaderboard orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardSort {
    Kills,
    MaxLength,
}

impl LeaderboardSort {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "kills" => Some(LeaderboardSort::Kills),
            "max_length" => Some(LeaderboardSort::MaxLength),
            _ => None,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            LeaderboardSort::Kills => "kills",
            LeaderboardSort::MaxLength => "max_length",
        }
    }
}

/// The season identity stamped onto every leaderboard write.
#[derive(Debug, Clone)]
pub struct SeasonKey {
    pub season_id: String,
    pub season_start: i64,
    pub season_end: i64,
}

pub struct Database {
    pool: AnyPool,
    is_postgres: bool,
}

impl Database {
    /// Execute a raw SQL statement, returning the query result.
    /// This helper exists to provide type information for the Any driver.
    async fn exec(&self, sql: &str) -> Result<AnyQueryResult, sqlx::Error> {
        sqlx::query(sql).execute(&self.pool).await
    }

    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let is_postgres =
            database_url.starts_with("postgres://") || database_url.starts_with("postgresql://");
        // For SQLite in-memory databases, limit to 1 connection so all
        // queries share the same in-memory database.
        let is_memory = database_url.contains(":memory:");
        let max_conn = if is_memory { 1 } else { 5 };
        let pool = AnyPoolOptions::new()
            .max_connections(max_conn)
            .connect(database_url)
            .await?;
        let db = Self { pool, is_postgres };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        let serial_pk = if self.is_postgres {
            "BIGSERIAL PRIMARY KEY"
        } else {
            "INTEGER PRIMARY KEY AUTOINCREMENT"
        };

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS players (
                uid TEXT PRIMARY KEY,
                paste TEXT NOT NULL,
                key TEXT UNIQUE NOT NULL,
                created_at BIGINT NOT NULL,
                last_login BIGINT NOT NULL
            )
        "#,
        )
        .await?;

        self.exec(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS leaderboard (
                id {serial_pk},
                uid TEXT NOT NULL REFERENCES players(uid),
                player_name TEXT NOT NULL,
                season_id TEXT NOT NULL DEFAULT 'all_time',
                season_start BIGINT NOT NULL DEFAULT 0,
                season_end BIGINT NOT NULL DEFAULT 0,
                now_length BIGINT NOT NULL DEFAULT 0,
                max_length BIGINT NOT NULL DEFAULT 0,
                kills BIGINT NOT NULL DEFAULT 0,
                deaths BIGINT NOT NULL DEFAULT 0,
                games_played BIGINT NOT NULL DEFAULT 0,
                total_food BIGINT NOT NULL DEFAULT 0,
                last_round BIGINT NOT NULL DEFAULT 0,
                timestamp BIGINT NOT NULL DEFAULT 0,
                UNIQUE (uid, season_id)
            )
        "#
        ))
        .await?;

        // Additive column migration: columns introduced after early
        // deployments. Failures mean the column already exists.
        for col in [
            "season_id TEXT NOT NULL DEFAULT 'all_time'",
            "season_start BIGINT NOT NULL DEFAULT 0",
            "season_end BIGINT NOT NULL DEFAULT 0",
            "now_length BIGINT NOT NULL DEFAULT 0",
            "last_round BIGINT NOT NULL DEFAULT 0",
        ] {
            let _ = self
                .exec(&format!("ALTER TABLE leaderboard ADD COLUMN {col}"))
                .await;
        }

        self.exec(
            "CREATE INDEX IF NOT EXISTS idx_leaderboard_season_kills \
             ON leaderboard (season_id, kills DESC)",
        )
        .await?;
        self.exec(
            "CREATE INDEX IF NOT EXISTS idx_leaderboard_season_max_length \
             ON leaderboard (season_id, max_length DESC)",
        )
        .await?;
        self.exec(
            "CREATE INDEX IF NOT EXISTS idx_leaderboard_uid_season \
             ON leaderboard (uid, season_id)",
        )
        .await?;

        Ok(())
    }

    // ── Accounts ─────────────────────────────────────────────────────

    pub async fn get_account(&self, uid: &str) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as::<_, Account>(
            "SELECT uid, paste, key, created_at, last_login FROM players WHERE uid = $1",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn create_account(
        &self,
        uid: &str,
        paste: &str,
        key: &str,
        now_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO players (uid, paste, key, created_at, last_login) \
             VALUES ($1, $2, $3, $4, $4)",
        )
        .bind(uid)
        .bind(paste)
        .bind(key)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Key rotation: a new proof replaces both the stored paste and the key.
    pub async fn update_account_key(
        &self,
        uid: &str,
        paste: &str,
        key: &str,
        now_ms: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE players SET paste = $1, key = $2, last_login = $3 WHERE uid = $4",
        )
        .bind(paste)
        .bind(key)
        .bind(now_ms)
        .bind(uid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_last_login(&self, uid: &str, now_ms: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE players SET last_login = $1 WHERE uid = $2")
            .bind(now_ms)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Key -> uid fallback for sessions started after a server restart.
    pub async fn find_uid_by_key(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as("SELECT uid FROM players WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(uid,)| uid))
    }

    // ── Leaderboard counters ─────────────────────────────────────────

    /// Food hook: total_food += 1, current length recorded, max length
    /// ratcheted.
    pub async fn record_food_eaten(
        &self,
        uid: &str,
        name: &str,
        season: &SeasonKey,
        length: i64,
        round: i64,
        now_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO leaderboard (uid, player_name, season_id, season_start, season_end,
                now_length, max_length, kills, deaths, games_played, total_food, last_round, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $6, 0, 0, 0, 1, $7, $8)
            ON CONFLICT (uid, season_id) DO UPDATE SET
                player_name = excluded.player_name,
                now_length = excluded.now_length,
                max_length = CASE WHEN leaderboard.max_length >= excluded.now_length
                    THEN leaderboard.max_length ELSE excluded.now_length END,
                total_food = leaderboard.total_food + 1,
                last_round = excluded.last_round,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(uid)
        .bind(name)
        .bind(&season.season_id)
        .bind(season.season_start)
        .bind(season.season_end)
        .bind(length)
        .bind(round)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Kill hook: kills += 1 for the credited account.
    pub async fn record_kill(
        &self,
        uid: &str,
        name: &str,
        season: &SeasonKey,
        round: i64,
        now_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO leaderboard (uid, player_name, season_id, season_start, season_end,
                now_length, max_length, kills, deaths, games_played, total_food, last_round, timestamp)
            VALUES ($1, $2, $3, $4, $5, 0, 0, 1, 0, 0, 0, $6, $7)
            ON CONFLICT (uid, season_id) DO UPDATE SET
                player_name = excluded.player_name,
                kills = leaderboard.kills + 1,
                last_round = excluded.last_round,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(uid)
        .bind(name)
        .bind(&season.season_id)
        .bind(season.season_start)
        .bind(season.season_end)
        .bind(round)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Death hook. A session dies at most once, so every death also counts
    /// one played game; the final length still ratchets max_length.
    pub async fn record_death(
        &self,
        uid: &str,
        name: &str,
        season: &SeasonKey,
        final_length: i64,
        round: i64,
        now_ms: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO leaderboard (uid, player_name, season_id, season_start, season_end,
                now_length, max_length, kills, deaths, games_played, total_food, last_round, timestamp)
            VALUES ($1, $2, $3, $4, $5, 0, $6, 0, 1, 1, 0, $7, $8)
            ON CONFLICT (uid, season_id) DO UPDATE SET
                player_name = excluded.player_name,
                now_length = 0,
                max_length = CASE WHEN leaderboard.max_length >= excluded.max_length
                    THEN leaderboard.max_length ELSE excluded.max_length END,
                deaths = leaderboard.deaths + 1,
                games_played = leaderboard.games_played + 1,
                last_round = excluded.last_round,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(uid)
        .bind(name)
        .bind(&season.season_id)
        .bind(season.season_start)
        .bind(season.season_end)
        .bind(final_length)
        .bind(round)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Top rows ordered descending by the sort key, with a stable secondary
    /// order by uid.
    pub async fn leaderboard_top(
        &self,
        season_id: &str,
        sort: LeaderboardSort,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LeaderboardRow>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT uid, player_name AS name, now_length, max_length, kills, deaths,
                   games_played, total_food, last_round
            FROM leaderboard
            WHERE season_id = $1
            ORDER BY {} DESC, uid ASC
            LIMIT $2 OFFSET $3
            "#,
            sort.column()
        );
        sqlx::query_as::<_, LeaderboardRow>(&sql)
            .bind(season_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
    }
}
