// Leaderboard writer and reads. Update hooks fired by the tick driver flow
// through one channel into a single async writer task (the only writer
// against the store during a game), so the driver thread never blocks on the
// database. Top-N reads are served from the store behind a TTL cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::config::LeaderboardConfig;
use crate::db::{Database, LeaderboardRow, LeaderboardSort, SeasonKey};

/// Counter updates emitted by the driver while resolving a round.
#[derive(Debug, Clone)]
pub enum LeaderboardEvent {
    FoodEaten {
        uid: String,
        name: String,
        length: usize,
        round: u64,
    },
    Kill {
        uid: String,
        name: String,
        round: u64,
    },
    Death {
        uid: String,
        name: String,
        length: usize,
        round: u64,
    },
}

/// Cheap cloneable sender the driver holds. Dropping the writer side only
/// loses counter updates, never the game loop.
#[derive(Clone)]
pub struct LeaderboardHandle {
    tx: mpsc::UnboundedSender<LeaderboardEvent>,
}

impl LeaderboardHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LeaderboardEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LeaderboardHandle { tx }, rx)
    }

    pub fn record(&self, event: LeaderboardEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("leaderboard writer gone; event dropped");
        }
    }
}

/// Apply one event to the store. Failures are the caller's to log and drop.
pub async fn apply_event(
    db: &Database,
    season: &SeasonKey,
    event: &LeaderboardEvent,
) -> Result<(), sqlx::Error> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    match event {
        LeaderboardEvent::FoodEaten {
            uid,
            name,
            length,
            round,
        } => {
            db.record_food_eaten(uid, name, season, *length as i64, *round as i64, now_ms)
                .await
        }
        LeaderboardEvent::Kill { uid, name, round } => {
            db.record_kill(uid, name, season, *round as i64, now_ms).await
        }
        LeaderboardEvent::Death {
            uid,
            name,
            length,
            round,
        } => {
            db.record_death(uid, name, season, *length as i64, *round as i64, now_ms)
                .await
        }
    }
}

/// Drain driver events into the store. A store failure drops that hook and
/// the loop continues; the game is never held up by the leaderboard.
pub fn spawn_writer(
    db: Arc<Database>,
    season: SeasonKey,
    mut rx: mpsc::UnboundedReceiver<LeaderboardEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = apply_event(&db, &season, &event).await {
                tracing::error!(error = %e, ?event, "leaderboard write failed; event dropped");
            }
        }
        tracing::info!("leaderboard writer finished");
    })
}

type CacheKey = (&'static str, i64, i64);

/// Read side: top-N queries with a small TTL cache in front of the store.
pub struct LeaderboardService {
    db: Arc<Database>,
    season_id: String,
    ttl: Duration,
    cache: Mutex<HashMap<CacheKey, (Instant, Vec<LeaderboardRow>)>>,
}

impl LeaderboardService {
    pub fn new(db: Arc<Database>, cfg: &LeaderboardConfig) -> Self {
        LeaderboardService {
            db,
            season_id: cfg.season_id.clone(),
            ttl: Duration::from_secs(cfg.cache_ttl_seconds),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn season_id(&self) -> &str {
        &self.season_id
    }

    pub fn cache_ttl_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }

    pub async fn top(
        &self,
        sort: LeaderboardSort,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LeaderboardRow>, sqlx::Error> {
        let key: CacheKey = (
            match sort {
                LeaderboardSort::Kills => "kills",
                LeaderboardSort::MaxLength => "max_length",
            },
            limit,
            offset,
        );

        if let Some((fetched_at, rows)) = self.cache.lock().unwrap().get(&key) {
            if fetched_at.elapsed() < self.ttl {
                return Ok(rows.clone());
            }
        }

        let rows = self
            .db
            .leaderboard_top(&self.season_id, sort, limit, offset)
            .await?;
        self.cache
            .lock()
            .unwrap()
            .insert(key, (Instant::now(), rows.clone()));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Arc<Database> {
        sqlx::any::install_default_drivers();
        Arc::new(Database::new("sqlite::memory:").await.unwrap())
    }

    fn season() -> SeasonKey {
        SeasonKey {
            season_id: "all_time".into(),
            season_start: 0,
            season_end: 0,
        }
    }

    fn cfg(ttl: u64) -> LeaderboardConfig {
        LeaderboardConfig {
            season_id: "all_time".into(),
            season_start: 0,
            season_end: 0,
            cache_ttl_seconds: ttl,
        }
    }

    #[tokio::test]
    async fn test_apply_event_updates_counters() {
        let db = test_db().await;
        db.create_account("1001", "p", "k", 0).await.unwrap();

        apply_event(
            &db,
            &season(),
            &LeaderboardEvent::FoodEaten {
                uid: "1001".into(),
                name: "alice".into(),
                length: 4,
                round: 3,
            },
        )
        .await
        .unwrap();
        apply_event(
            &db,
            &season(),
            &LeaderboardEvent::Kill {
                uid: "1001".into(),
                name: "alice".into(),
                round: 4,
            },
        )
        .await
        .unwrap();
        apply_event(
            &db,
            &season(),
            &LeaderboardEvent::Death {
                uid: "1001".into(),
                name: "alice".into(),
                length: 4,
                round: 5,
            },
        )
        .await
        .unwrap();

        let rows = db
            .leaderboard_top("all_time", LeaderboardSort::Kills, 10, 0)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_food, 1);
        assert_eq!(rows[0].kills, 1);
        assert_eq!(rows[0].deaths, 1);
        assert_eq!(rows[0].games_played, 1);
        assert_eq!(rows[0].last_round, 5);
    }

    #[tokio::test]
    async fn test_top_cache_serves_within_ttl() {
        let db = test_db().await;
        db.create_account("1001", "p", "k", 0).await.unwrap();
        apply_event(
            &db,
            &season(),
            &LeaderboardEvent::Kill {
                uid: "1001".into(),
                name: "alice".into(),
                round: 1,
            },
        )
        .await
        .unwrap();

        let service = LeaderboardService::new(Arc::clone(&db), &cfg(3600));
        let first = service.top(LeaderboardSort::Kills, 10, 0).await.unwrap();
        assert_eq!(first[0].kills, 1);

        // A write after the first read is invisible until the TTL expires.
        apply_event(
            &db,
            &season(),
            &LeaderboardEvent::Kill {
                uid: "1001".into(),
                name: "alice".into(),
                round: 2,
            },
        )
        .await
        .unwrap();
        let second = service.top(LeaderboardSort::Kills, 10, 0).await.unwrap();
        assert_eq!(second[0].kills, 1, "served from cache");

        // Zero TTL bypasses the cache.
        let fresh = LeaderboardService::new(db, &cfg(0));
        let third = fresh.top(LeaderboardSort::Kills, 10, 0).await.unwrap();
        assert_eq!(third[0].kills, 2);
    }

    #[tokio::test]
    async fn test_writer_task_drains_channel() {
        let db = test_db().await;
        db.create_account("1001", "p", "k", 0).await.unwrap();

        let (handle, rx) = LeaderboardHandle::channel();
        let writer = spawn_writer(Arc::clone(&db), season(), rx);

        handle.record(LeaderboardEvent::Kill {
            uid: "1001".into(),
            name: "alice".into(),
            round: 1,
        });
        handle.record(LeaderboardEvent::Kill {
            uid: "1001".into(),
            name: "alice".into(),
            round: 2,
        });
        drop(handle);
        writer.await.unwrap();

        let rows = db
            .leaderboard_top("all_time", LeaderboardSort::Kills, 10, 0)
            .await
            .unwrap();
        assert_eq!(rows[0].kills, 2);
    }
}
