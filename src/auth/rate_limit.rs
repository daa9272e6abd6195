use crate::core::{EngineError, Result};
use moka::sync::Cache;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const MAX_TRACKED_CREDENTIALS: u64 = 100_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by credential.
///
/// State is per process. A limit of `0` disables the check. Credentials idle
/// for a whole window are evicted by the cache.
pub struct RateLimiter {
    window: Duration,
    counters: Cache<Arc<str>, Arc<Mutex<Window>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        let counters = Cache::builder()
            .max_capacity(MAX_TRACKED_CREDENTIALS)
            .time_to_idle(window)
            .build();
        Self { window, counters }
    }

    /// Counts one request for `credential` and fails once `limit` requests have
    /// already been seen in the current window.
    pub fn check(&self, credential: &str, limit: u32) -> Result<()> {
        if limit == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let key: Arc<str> = Arc::from(credential);
        let counter = self.counters.get_with(key, || {
            Arc::new(Mutex::new(Window {
                started: now,
                count: 0,
            }))
        });

        let mut entry = counter.lock()?;
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        if entry.count >= limit {
            return Err(EngineError::RateLimited);
        }
        entry.count += 1;
        Ok(())
    }

    pub fn reset(&self, credential: &str) {
        self.counters.invalidate(credential);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.window)
            .field("tracked", &self.counters.entry_count())
            .finish()
    }
}
