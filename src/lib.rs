pub mod api;
pub mod auth;
pub mod blacklist;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod rate_limit;

use api::{create_api_router, not_found};
use auth::{AuthGate, GateSettings, auth_gate, default_public_paths};
use axum::{Router, middleware};
use blacklist::{MemoryBlacklist, TokenBlacklist};
use db::UserStore;
use jwt::{JwtError, TOKEN_DURATION_SECS, TokenEngine, TokenPolicy};
use rate_limit::{RateLimitConfig, RateLimiter};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

pub struct ServerConfig {
    /// Application name, written into and required of every token as issuer
    pub app_name: String,
    /// JWT secret for signing tokens (at least 32 bytes)
    pub jwt_secret: Vec<u8>,
    /// Account storage used by register/login
    pub users: Arc<dyn UserStore>,
    /// IP extraction strategy (requires running behind a proxy)
    pub ip_extractor: Option<cli::IpExtractor>,
    /// Limits for requests presenting a bearer token
    pub authed_rate_limit: RateLimitConfig,
    /// Limits for public paths and requests without a usable token
    pub unauthed_rate_limit: RateLimitConfig,
    /// Tokens issued longer ago than this are refused by the gate
    pub max_token_age: Duration,
    /// Exact paths that skip token authentication
    pub public_paths: Vec<String>,
    /// Interval between blacklist cleanup runs
    pub cleanup_interval: Duration,
}

impl ServerConfig {
    /// Configuration with the default limits, token age and public paths.
    pub fn new(
        app_name: impl Into<String>,
        jwt_secret: Vec<u8>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            jwt_secret,
            users,
            ip_extractor: None,
            authed_rate_limit: RateLimitConfig::authenticated(),
            unauthed_rate_limit: RateLimitConfig::unauthenticated(),
            max_token_age: Duration::from_secs(TOKEN_DURATION_SECS),
            public_paths: default_public_paths(),
            cleanup_interval: cleanup::CLEANUP_INTERVAL,
        }
    }
}

/// The assembled application: the router plus handles to the shared
/// components it was built from.
pub struct App {
    pub router: Router,
    pub engine: Arc<TokenEngine>,
    pub blacklist: Arc<MemoryBlacklist>,
    pub authed_limiter: Arc<RateLimiter>,
    pub unauthed_limiter: Arc<RateLimiter>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl App {
    /// Stop the limiter sweeps and the blacklist cleanup scheduler.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        self.authed_limiter.stop();
        self.unauthed_limiter.stop();
        let handle = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Create the application with the given configuration.
///
/// Background tasks (limiter sweeps, blacklist cleanup) are only spawned
/// when called from within a Tokio runtime.
pub fn create_app(config: &ServerConfig) -> Result<App, JwtError> {
    let blacklist = Arc::new(MemoryBlacklist::new());
    let shared_blacklist: Arc<dyn TokenBlacklist> = blacklist.clone();

    let engine = Arc::new(TokenEngine::new(
        &config.jwt_secret,
        TokenPolicy::new(&config.app_name),
        shared_blacklist.clone(),
    )?);

    let authed_limiter = Arc::new(RateLimiter::new(config.authed_rate_limit));
    let unauthed_limiter = Arc::new(RateLimiter::new(config.unauthed_rate_limit));

    let settings = GateSettings {
        max_token_age: config.max_token_age,
        public_paths: config.public_paths.clone(),
        ..GateSettings::new(&config.app_name)
    };
    let gate = AuthGate::new(
        engine.clone(),
        authed_limiter.clone(),
        unauthed_limiter.clone(),
        settings,
        config.ip_extractor.clone(),
    );

    // The fallback must be registered before the layer so unmatched
    // paths still pass through the gate.
    let router = Router::new()
        .nest(
            "/api/v1",
            create_api_router(config.users.clone(), engine.clone()),
        )
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(gate, auth_gate));

    let cleanup = tokio::runtime::Handle::try_current().ok().map(|_| {
        cleanup::spawn_cleanup_scheduler(shared_blacklist, config.cleanup_interval)
    });

    Ok(App {
        router,
        engine,
        blacklist,
        authed_limiter,
        unauthed_limiter,
        cleanup: Mutex::new(cleanup),
    })
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

/// Run the server on the given listener until Ctrl-C, then stop the
/// background tasks.
pub async fn run_server(app: App, listener: TcpListener) -> Result<(), std::io::Error> {
    let make_service = app
        .router
        .clone()
        .into_make_service_with_connect_info::<SocketAddr>();
    let result = axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    app.shutdown();
    result
}
