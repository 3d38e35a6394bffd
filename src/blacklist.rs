//! Revoked token tracking.
//!
//! Entries map a token identifier to the instant its revocation stops
//! mattering. An entry whose expiry has passed is treated as absent, so
//! cleanup only reclaims memory and never changes what `is_blacklisted`
//! reports.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

/// Errors reported by a blacklist store.
#[derive(Debug, thiserror::Error)]
pub enum BlacklistError {
    /// The backing store could not be reached or refused the operation.
    #[error("blacklist store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for revoked token identifiers.
///
/// The in-memory implementation below is process-local. A shared store can
/// implement this trait without changing the token engine.
pub trait TokenBlacklist: Send + Sync {
    /// Insert or overwrite the entry for `token_id`.
    fn add(&self, token_id: &str, expires_at: SystemTime) -> Result<(), BlacklistError>;

    /// True iff an entry exists and its expiry is after `now`.
    fn is_blacklisted_at(&self, token_id: &str, now: SystemTime) -> bool;

    /// True iff an entry exists and its expiry is still in the future.
    fn is_blacklisted(&self, token_id: &str) -> bool {
        self.is_blacklisted_at(token_id, SystemTime::now())
    }

    /// Remove every entry whose expiry has passed. Returns how many were removed.
    fn cleanup(&self) -> Result<usize, BlacklistError>;
}

/// In-memory blacklist guarded by a single reader/writer lock.
#[derive(Debug, Default)]
pub struct MemoryBlacklist {
    tokens: RwLock<HashMap<String, SystemTime>>,
}

impl MemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including logically expired ones not yet cleaned up.
    pub fn len(&self) -> usize {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenBlacklist for MemoryBlacklist {
    fn add(&self, token_id: &str, expires_at: SystemTime) -> Result<(), BlacklistError> {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token_id.to_string(), expires_at);
        Ok(())
    }

    fn is_blacklisted_at(&self, token_id: &str, now: SystemTime) -> bool {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token_id)
            .is_some_and(|expiry| now < *expiry)
    }

    fn cleanup(&self) -> Result<usize, BlacklistError> {
        let now = SystemTime::now();
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        let before = tokens.len();
        tokens.retain(|_, expiry| now < *expiry);
        Ok(before - tokens.len())
    }
}
