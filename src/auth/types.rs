//! Request-scoped authentication types.

use std::fmt;
use std::time::SystemTime;

use crate::jwt::Claims;

/// Authenticated caller, inserted into request extensions by the gate once
/// the bearer token has passed every check.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Token subject (user identifier)
    pub subject: String,
    pub role: Option<String>,
    /// Id of the presented token, used for revocation on logout
    pub token_id: String,
    /// When the gate admitted the request
    pub auth_time: SystemTime,
    pub claims: Claims,
}

/// Per-request correlation id, echoed in `X-Request-Id` and in error bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
