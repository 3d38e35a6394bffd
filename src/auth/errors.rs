//! Authentication error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Suggested wait after a rate limit denial, in seconds.
pub const RETRY_AFTER_SECS: u64 = 60;

/// Why the gate refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    MissingHeader,
    InvalidFormat,
    RateLimited,
    /// Any token engine failure. The specific check is not disclosed.
    InvalidToken,
    TokenTooOld,
    InvalidIssuer,
    /// A handler required authentication on a route the gate left public.
    NotAuthenticated,
}

impl AuthErrorKind {
    fn status_code(self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::MissingHeader => "Missing authorization header",
            Self::InvalidFormat => "Invalid authorization format",
            Self::RateLimited => "Rate limit exceeded",
            Self::InvalidToken => "Invalid token",
            Self::TokenTooOld => "Token expired",
            Self::InvalidIssuer => "Invalid token issuer",
            Self::NotAuthenticated => "Not authenticated",
        }
    }
}

/// Authentication rejection rendered as a JSON error body.
#[derive(Debug)]
pub struct ApiAuthError {
    pub(super) kind: AuthErrorKind,
    pub(super) request_id: Option<String>,
}

impl ApiAuthError {
    pub fn new(kind: AuthErrorKind, request_id: Option<String>) -> Self {
        Self { kind, request_id }
    }

    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_seconds: Option<u64>,
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        let rate_limited = self.kind == AuthErrorKind::RateLimited;

        let mut response = (
            self.kind.status_code(),
            Json(ErrorResponse {
                error: self.kind.message(),
                request_id: self.request_id,
                wait_seconds: rate_limited.then_some(RETRY_AFTER_SECS),
            }),
        )
            .into_response();

        if rate_limited {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }

        response
    }
}
