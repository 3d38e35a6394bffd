mod error;
mod tokens;
mod users;

use axum::Router;
use serde::Serialize;
use std::sync::Arc;

use crate::db::UserStore;
use crate::jwt::TokenEngine;

pub use error::{ApiError, not_found};

/// Shared state of the auth endpoints.
#[derive(Clone)]
pub struct AuthState {
    pub users: Arc<dyn UserStore>,
    pub engine: Arc<TokenEngine>,
}

/// Body of successful auth responses.
#[derive(Serialize)]
struct SuccessResponse {
    status: &'static str,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

impl SuccessResponse {
    fn new(message: &'static str) -> Self {
        Self {
            status: "success",
            message,
            data: None,
        }
    }

    fn with_data(mut self, data: String) -> Self {
        self.data = Some(data);
        self
    }
}

/// Create the API router, mounted under `/api/v1`.
pub fn create_api_router(users: Arc<dyn UserStore>, engine: Arc<TokenEngine>) -> Router {
    let state = AuthState { users, engine };

    let auth_router = Router::new()
        .merge(users::router(state.clone()))
        .merge(tokens::router(state));

    Router::new().nest("/auth", auth_router)
}
