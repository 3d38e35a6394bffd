//! Per-client rate limiting.
//!
//! Each key (normally the client IP) keeps the timestamps of its admitted
//! attempts inside the trailing window. A request is admitted iff fewer than
//! `max_attempts` timestamps remain after pruning, so the window slides
//! continuously per key instead of resetting on a fixed boundary.
//!
//! The whole map sits behind one mutex: prune, compare and append happen in a
//! single critical section, so concurrent callers on the same key can never
//! admit more than `max_attempts` within a window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ATTEMPTS: usize = 5;
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Limiter configuration. Zero values fall back to the defaults
/// (1 minute window, 5 attempts, 5 minute sweep).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_attempts: usize,
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl RateLimitConfig {
    /// Limits for requests carrying a bearer token (100 per minute).
    pub fn authenticated() -> Self {
        Self {
            max_attempts: 100,
            ..Self::default()
        }
    }

    /// Limits for public paths and requests without a usable token (20 per minute).
    pub fn unauthenticated() -> Self {
        Self {
            max_attempts: 20,
            ..Self::default()
        }
    }

    fn normalized(self) -> Self {
        Self {
            window: if self.window.is_zero() {
                DEFAULT_WINDOW
            } else {
                self.window
            },
            max_attempts: if self.max_attempts == 0 {
                DEFAULT_MAX_ATTEMPTS
            } else {
                self.max_attempts
            },
            cleanup_interval: if self.cleanup_interval.is_zero() {
                DEFAULT_CLEANUP_INTERVAL
            } else {
                self.cleanup_interval
            },
        }
    }
}

struct AttemptLog {
    attempts: Mutex<HashMap<String, VecDeque<Instant>>>,
    window: Duration,
    max_attempts: usize,
}

impl AttemptLog {
    fn prune(attempts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        // Timestamps are appended in order, so stale ones are always at the front.
        while attempts
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            attempts.pop_front();
        }
    }

    fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);

        let attempts = map.entry(key.to_string()).or_default();
        Self::prune(attempts, now, self.window);

        if attempts.len() >= self.max_attempts {
            return false;
        }

        attempts.push_back(now);
        true
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut map = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();

        map.retain(|_, attempts| {
            Self::prune(attempts, now, self.window);
            !attempts.is_empty()
        });

        before - map.len()
    }
}

/// Sliding-window limiter with a background sweep that drops idle keys.
pub struct RateLimiter {
    log: Arc<AttemptLog>,
    config: RateLimitConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter. When called inside a Tokio runtime the periodic
    /// sweep is spawned immediately; outside a runtime stale attempts are
    /// still pruned lazily on every check.
    pub fn new(config: RateLimitConfig) -> Self {
        let config = config.normalized();
        let log = Arc::new(AttemptLog {
            attempts: Mutex::new(HashMap::new()),
            window: config.window,
            max_attempts: config.max_attempts,
        });

        let sweeper = tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| handle.spawn(sweep_loop(Arc::downgrade(&log), config.cleanup_interval)));

        Self {
            log,
            config,
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Record an attempt for `key` if it is under its limit.
    /// Returns false, without recording anything, when the limit is reached.
    pub fn allow_request(&self, key: &str) -> bool {
        self.log.allow(key)
    }

    /// Prune every key now and drop the ones left without attempts.
    /// Returns the number of keys removed.
    pub fn sweep(&self) -> usize {
        self.log.sweep()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.log
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop the background sweep. Safe to call more than once, and when no
    /// sweep was ever started.
    pub fn stop(&self) {
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(log: Weak<AttemptLog>, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        interval.tick().await;
        let Some(log) = log.upgrade() else {
            break;
        };
        let removed = log.sweep();
        if removed > 0 {
            debug!(removed, "Dropped idle rate limit keys");
        }
    }
}
