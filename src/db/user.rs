use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use argon2::password_hash::{self, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;

/// Minimum accepted password length in characters.
pub const MIN_PASSWORD_LENGTH: usize = 6;

const DEFAULT_ROLE: &str = "user";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("username already exists")]
    Conflict,
    #[error("password hashing failed: {0}")]
    Hashing(password_hash::Error),
    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: String,
}

/// Account storage used by the auth handlers.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create an account. Fails with `Conflict` if the username is taken.
    async fn create(&self, username: &str, password: &str) -> Result<User, StoreError>;

    /// Check credentials. Returns `None` for an unknown user or a wrong password.
    async fn verify(&self, username: &str, password: &str) -> Result<Option<User>, StoreError>;
}

struct StoredUser {
    user: User,
    /// Argon2id PHC string (algorithm, parameters, salt and hash)
    password_hash: String,
}

fn validate_credentials(username: &str, password: &str) -> Result<(), StoreError> {
    if username.trim().is_empty() {
        return Err(StoreError::InvalidInput("Username is required"));
    }
    if password.is_empty() {
        return Err(StoreError::InvalidInput("Password is required"));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(StoreError::InvalidInput("Password must be at least 6 characters long"));
    }
    Ok(())
}

/// Argon2 runs on the blocking pool.
async fn hash_password(password: String) -> Result<String, StoreError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
            .map_err(StoreError::Hashing)?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(StoreError::Hashing)
    })
    .await
    .map_err(|e| StoreError::Unavailable(e.to_string()))?
}

async fn verify_password(password: String, password_hash: String) -> Result<bool, StoreError> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&password_hash).map_err(StoreError::Hashing)?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(StoreError::Hashing(e)),
        }
    })
    .await
    .map_err(|e| StoreError::Unavailable(e.to_string()))?
}

/// Process-local user store keyed by username.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, StoredUser>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn contains(&self, username: &str) -> bool {
        self.users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(username)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, username: &str, password: &str) -> Result<User, StoreError> {
        validate_credentials(username, password)?;
        if self.contains(username) {
            return Err(StoreError::Conflict);
        }

        let password_hash = hash_password(password.to_string()).await?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            role: DEFAULT_ROLE.to_string(),
        };

        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        // Another registration may have won the race while hashing
        if users.contains_key(username) {
            return Err(StoreError::Conflict);
        }
        users.insert(
            username.to_string(),
            StoredUser {
                user: user.clone(),
                password_hash,
            },
        );
        Ok(user)
    }

    async fn verify(&self, username: &str, password: &str) -> Result<Option<User>, StoreError> {
        let stored = {
            let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
            users
                .get(username)
                .map(|stored| (stored.user.clone(), stored.password_hash.clone()))
        };
        let Some((user, password_hash)) = stored else {
            return Ok(None);
        };

        let matches = verify_password(password.to_string(), password_hash).await?;
        Ok(matches.then_some(user))
    }
}
