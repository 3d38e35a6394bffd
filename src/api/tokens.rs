//! Session API endpoints. Both require a valid bearer token.
//!
//! - GET `/verify` - Report the authenticated subject
//! - POST `/logout` - Revoke the presented token

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use std::time::UNIX_EPOCH;
use tracing::info;

use super::error::ApiError;
use super::{AuthState, SuccessResponse};
use crate::auth::Auth;

pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/verify", get(verify_token))
        .route("/logout", post(logout))
        .with_state(state)
}

#[derive(Serialize)]
struct VerifyResponse {
    subject: String,
    /// Unix seconds
    auth_time: u64,
}

async fn verify_token(Auth(auth): Auth) -> impl IntoResponse {
    let auth_time = auth
        .auth_time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Json(VerifyResponse {
        subject: auth.subject,
        auth_time,
    })
}

async fn logout(
    State(state): State<AuthState>,
    Auth(auth): Auth,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .revoke_token(&auth.token_id)
        .map_err(|e| ApiError::internal_error("Failed to revoke token", e))?;

    info!(user_id = %auth.subject, "User logged out");

    Ok(Json(SuccessResponse::new("Logged out successfully")))
}
