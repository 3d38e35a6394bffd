//! CLI argument parsing, validation, and startup helpers.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::error;

use crate::ServerConfig;
use crate::db::MemoryUserStore;
use crate::jwt::MIN_SECRET_LENGTH;
use crate::rate_limit::RateLimitConfig;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Header a trusted reverse proxy uses to pass the original client address.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    /// `X-Forwarded-For`, first entry
    XForwardedFor,
    /// `X-Real-IP`
    XRealIp,
    /// `CF-Connecting-IP`
    CfConnectingIp,
}

/// Reads the client IP from a proxy header.
#[derive(Clone, Debug)]
pub struct IpExtractor {
    pub header_name: &'static str,
    source: ClientIpHeader,
}

impl From<ClientIpHeader> for IpExtractor {
    fn from(source: ClientIpHeader) -> Self {
        let header_name = match source {
            ClientIpHeader::XForwardedFor => "x-forwarded-for",
            ClientIpHeader::XRealIp => "x-real-ip",
            ClientIpHeader::CfConnectingIp => "cf-connecting-ip",
        };
        Self {
            header_name,
            source,
        }
    }
}

impl IpExtractor {
    /// Parse the header value into a normalized IP address string.
    pub fn extract(&self, header_value: &str) -> Result<String, &'static str> {
        let candidate = match self.source {
            // X-Forwarded-For can contain multiple IPs, take the first (original client)
            ClientIpHeader::XForwardedFor => header_value.split(',').next().unwrap_or(""),
            ClientIpHeader::XRealIp | ClientIpHeader::CfConnectingIp => header_value,
        }
        .trim();

        candidate
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header does not contain a valid address")
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "blog-gate",
    about = "Blog API with fingerprint-bound bearer tokens and per-client rate limiting"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Application name, used as the token issuer
    #[arg(long, env = "APPLICATION_NAME")]
    pub app_name: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Read the client IP from this proxy header instead of the socket address
    #[arg(long)]
    pub ip_header: Option<ClientIpHeader>,

    /// Requests per window for clients presenting a bearer token
    #[arg(long, default_value = "100")]
    pub authed_max_attempts: usize,

    /// Requests per window for public paths and clients without a token
    #[arg(long, default_value = "20")]
    pub unauthed_max_attempts: usize,

    /// Rate limit window in seconds
    #[arg(long, default_value = "60")]
    pub rate_window_secs: u64,

    /// Maximum accepted token age in seconds
    #[arg(long, default_value = "900")]
    pub max_token_age_secs: u64,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    validate_secret(secret)
}

fn validate_secret(secret: String) -> Option<String> {
    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} bytes. Use a longer secret",
            MIN_SECRET_LENGTH
        );
        return None;
    }
    Some(secret)
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, jwt_secret: String) -> ServerConfig {
    let window = Duration::from_secs(args.rate_window_secs);

    let mut config = ServerConfig::new(
        args.app_name.clone(),
        jwt_secret.into_bytes(),
        Arc::new(MemoryUserStore::new()),
    );
    config.ip_extractor = args.ip_header.map(IpExtractor::from);
    config.authed_rate_limit = RateLimitConfig {
        window,
        max_attempts: args.authed_max_attempts,
        ..RateLimitConfig::authenticated()
    };
    config.unauthed_rate_limit = RateLimitConfig {
        window,
        max_attempts: args.unauthed_max_attempts,
        ..RateLimitConfig::unauthenticated()
    };
    config.max_token_age = Duration::from_secs(args.max_token_age_secs);
    config
}
