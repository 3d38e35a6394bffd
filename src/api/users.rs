//! Account API endpoints.
//!
//! - POST `/register` - Create an account
//! - POST `/login` - Exchange credentials for a fingerprint-bound token

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde::Deserialize;
use tracing::info;

use super::error::ApiError;
use super::{AuthState, SuccessResponse};
use crate::auth::ClientFingerprint;

pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .with_state(state)
}

#[derive(Deserialize)]
struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn register(
    State(state): State<AuthState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let user = state
        .users
        .create(payload.username.trim(), &payload.password)
        .await?;

    info!(user_id = %user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new("User registered successfully")),
    ))
}

async fn login(
    State(state): State<AuthState>,
    ClientFingerprint(fingerprint): ClientFingerprint,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::bad_request("Username and password are required"));
    }

    let user = state
        .users
        .verify(payload.username.trim(), &payload.password)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let issued = state
        .engine
        .generate_token_with_role(&user.id, Some(&user.role), &fingerprint)
        .map_err(|e| ApiError::internal_error("Failed to generate token", e))?;

    let response = SuccessResponse::new("Login successful");
    Ok(Json(response.with_data(issued.token)))
}
