// In-memory sliding-window rate limiter for the API endpoints.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Returned when a caller exceeds an endpoint's limit. `retry_after` is the
/// whole seconds until the oldest counted request leaves the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    pub retry_after: u64,
}

/// Thread-safe sliding-window limiter, keyed by caller identity (session
/// token or client address) plus endpoint.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a request under `key` if it fits in the window, otherwise tell
    /// the caller how long to wait.
    pub fn check(&self, key: &str, max_requests: u32, window: Duration) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut map = self.inner.lock().unwrap();
        let entries = map.entry(key.to_string()).or_default();

        while let Some(front) = entries.front() {
            if now.duration_since(*front) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= max_requests as usize {
            let oldest = *entries.front().expect("non-empty at limit");
            let elapsed = now.duration_since(oldest);
            let retry_after = window.saturating_sub(elapsed).as_secs_f64().ceil() as u64;
            return Err(RateLimited { retry_after });
        }

        entries.push_back(now);
        Ok(())
    }

    /// Drop every record whose newest entry has left a `window`-sized
    /// horizon. Called opportunistically to bound memory.
    pub fn cleanup(&self, window: Duration) {
        let now = Instant::now();
        let mut map = self.inner.lock().unwrap();
        map.retain(|_, entries| {
            entries
                .back()
                .map(|last| now.duration_since(*last) < window)
                .unwrap_or(false)
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
