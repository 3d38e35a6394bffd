//! Per-request admission middleware.
//!
//! Public path: unauthenticated rate limit, then the handler.
//! Protected path: header presence, Bearer scheme, authenticated rate limit,
//! token validation, claim extraction, token age, issuer, then the handler.
//! Requests without a usable Authorization header are charged to the
//! unauthenticated limiter before being rejected.
//!
//! Every response carries `X-Request-Id` and the static security headers.
//! A token older than half the maximum age gets a replacement in
//! `X-New-Token` once the handler has run, unless the handler revoked it.
//! Failing to mint one never fails the request.

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::errors::{ApiAuthError, AuthErrorKind};
use super::ip::extract_client_ip;
use super::types::{AuthContext, RequestId};
use crate::cli::IpExtractor;
use crate::jwt::{Fingerprint, TOKEN_DURATION_SECS, TokenEngine};
use crate::rate_limit::RateLimiter;

/// Response header carrying a renewed token.
pub const NEW_TOKEN_HEADER: &str = "x-new-token";

/// Response header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request header carrying the client device id.
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Rate limit and fingerprint key when the client address cannot be determined.
const UNKNOWN_CLIENT: &str = "unknown";

const SECURITY_HEADERS: [(HeaderName, &str); 6] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (
        header::STRICT_TRANSPORT_SECURITY,
        "max-age=31536000; includeSubDomains",
    ),
    (header::CONTENT_SECURITY_POLICY, "default-src 'self'"),
    (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
];

/// Paths that skip token authentication.
pub fn default_public_paths() -> Vec<String> {
    [
        "/api/v1/auth/login",
        "/api/v1/auth/register",
        "/login",
        "/register",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Gate policy.
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Tokens issued longer ago than this are refused.
    pub max_token_age: Duration,
    pub allowed_issuers: Vec<String>,
    /// Exact request paths that bypass authentication.
    pub public_paths: Vec<String>,
}

impl GateSettings {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            max_token_age: Duration::from_secs(TOKEN_DURATION_SECS),
            allowed_issuers: vec![issuer.into()],
            public_paths: default_public_paths(),
        }
    }
}

/// Shared state of the admission middleware.
#[derive(Clone)]
pub struct AuthGate {
    engine: Arc<TokenEngine>,
    authed_limiter: Arc<RateLimiter>,
    unauthed_limiter: Arc<RateLimiter>,
    settings: Arc<GateSettings>,
    ip_extractor: Option<IpExtractor>,
}

impl AuthGate {
    pub fn new(
        engine: Arc<TokenEngine>,
        authed_limiter: Arc<RateLimiter>,
        unauthed_limiter: Arc<RateLimiter>,
        settings: GateSettings,
        ip_extractor: Option<IpExtractor>,
    ) -> Self {
        Self {
            engine,
            authed_limiter,
            unauthed_limiter,
            settings: Arc::new(settings),
            ip_extractor,
        }
    }

    fn is_public(&self, path: &str) -> bool {
        self.settings.public_paths.iter().any(|p| p == path)
    }

    fn fingerprint(&self, request: &Request) -> Fingerprint {
        let ip = extract_client_ip(request, self.ip_extractor.as_ref()).unwrap_or_else(|e| {
            debug!(error = e, "Client IP unavailable");
            UNKNOWN_CLIENT.to_string()
        });

        Fingerprint::new(
            ip,
            header_str(request.headers(), header::USER_AGENT.as_str()),
            header_str(request.headers(), DEVICE_ID_HEADER),
        )
    }

    fn check_limit(limiter: &RateLimiter, client: &str) -> Result<(), AuthErrorKind> {
        if limiter.allow_request(client) {
            Ok(())
        } else {
            Err(AuthErrorKind::RateLimited)
        }
    }

    /// Run every admission check. On success returns what is needed to
    /// renew the presented token when it is past half its maximum age.
    fn admit(&self, request: &mut Request) -> Result<Option<Renewal>, AuthErrorKind> {
        let fingerprint = self.fingerprint(request);
        request.extensions_mut().insert(fingerprint.clone());

        if self.is_public(request.uri().path()) {
            Self::check_limit(&self.unauthed_limiter, &fingerprint.ip)?;
            return Ok(None);
        }

        let token = match bearer_token(request.headers()) {
            Ok(token) => token.to_string(),
            Err(kind) => {
                Self::check_limit(&self.unauthed_limiter, &fingerprint.ip)?;
                return Err(kind);
            }
        };

        Self::check_limit(&self.authed_limiter, &fingerprint.ip)?;

        let validated = self
            .engine
            .validate_token(&token, &fingerprint)
            .map_err(|e| {
                debug!(error = %e, "Token rejected");
                AuthErrorKind::InvalidToken
            })?;

        let claims = self
            .engine
            .get_claims(&validated)
            .map_err(|_| AuthErrorKind::InvalidToken)?;

        let now = validated.validated_at();
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let age = Duration::from_secs(now_secs.saturating_sub(claims.iat));

        if age > self.settings.max_token_age {
            return Err(AuthErrorKind::TokenTooOld);
        }

        if !self.settings.allowed_issuers.contains(&claims.iss) {
            return Err(AuthErrorKind::InvalidIssuer);
        }

        let renewal = (age > self.settings.max_token_age / 2).then(|| Renewal {
            subject: claims.sub.clone(),
            role: claims.role.clone(),
            token_id: claims.jti.clone(),
            fingerprint,
        });

        request.extensions_mut().insert(AuthContext {
            subject: claims.sub.clone(),
            role: claims.role.clone(),
            token_id: claims.jti.clone(),
            auth_time: now,
            claims,
        });

        Ok(renewal)
    }

    /// Mint the replacement token once the handler has run. A token revoked
    /// by the handler itself (logout) is not renewed.
    fn renew(&self, renewal: Renewal) -> Option<String> {
        if self.engine.is_revoked(&renewal.token_id) {
            debug!("Skipping renewal of revoked token");
            return None;
        }

        match self.engine.generate_token_with_role(
            &renewal.subject,
            renewal.role.as_deref(),
            &renewal.fingerprint,
        ) {
            Ok(issued) => Some(issued.token),
            Err(e) => {
                warn!(error = %e, "Failed to renew token");
                None
            }
        }
    }
}

/// Identity of an aging token, kept until the handler has run.
struct Renewal {
    subject: String,
    role: Option<String>,
    token_id: String,
    fingerprint: Fingerprint,
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthErrorKind> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthErrorKind::MissingHeader)?;
    if value.is_empty() {
        return Err(AuthErrorKind::MissingHeader);
    }

    let value = value.to_str().map_err(|_| AuthErrorKind::InvalidFormat)?;
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Ok(token),
        _ => Err(AuthErrorKind::InvalidFormat),
    }
}

/// Insert the fixed security header set.
pub fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

/// Admission middleware. Install with `middleware::from_fn_with_state`.
pub async fn auth_gate(State(gate): State<AuthGate>, mut request: Request, next: Next) -> Response {
    let request_id = RequestId::generate();
    request.extensions_mut().insert(request_id.clone());

    let mut response = match gate.admit(&mut request) {
        Ok(renewal) => {
            let mut response = next.run(request).await;
            let renewed = renewal.and_then(|r| gate.renew(r));
            if let Some(value) = renewed.and_then(|t| HeaderValue::from_str(&t).ok()) {
                response.headers_mut().insert(NEW_TOKEN_HEADER, value);
            }
            response
        }
        Err(kind) => {
            match kind {
                AuthErrorKind::RateLimited => {
                    warn!(request_id = %request_id, "Rate limit exceeded")
                }
                _ => debug!(request_id = %request_id, reason = ?kind, "Request rejected"),
            }
            ApiAuthError::new(kind, Some(request_id.0.clone())).into_response()
        }
    };

    let headers = response.headers_mut();
    apply_security_headers(headers);
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Auth;
    use crate::blacklist::MemoryBlacklist;
    use crate::cli::ClientIpHeader;
    use crate::jwt::{Claims, TokenPolicy};
    use crate::rate_limit::RateLimitConfig;
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::get};
    use std::time::SystemTime;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"this-is-a-valid-secret-key-with-32-chars";
    const CLIENT_IP: &str = "10.0.0.1";
    const USER_AGENT: &str = "test-agent";
    const DEVICE: &str = "test-device";

    struct Harness {
        router: Router,
        engine: Arc<TokenEngine>,
    }

    fn harness_with(
        engine_issuers: &[&str],
        gate_issuers: &[&str],
        unauthed_max: usize,
    ) -> Harness {
        let mut policy = TokenPolicy::new("awesome-blog");
        policy.allowed_issuers = engine_issuers.iter().map(|s| s.to_string()).collect();
        let engine =
            Arc::new(TokenEngine::new(SECRET, policy, Arc::new(MemoryBlacklist::new())).unwrap());

        let mut settings = GateSettings::new("awesome-blog");
        settings.allowed_issuers = gate_issuers.iter().map(|s| s.to_string()).collect();

        let gate = AuthGate::new(
            engine.clone(),
            Arc::new(RateLimiter::new(RateLimitConfig::authenticated())),
            Arc::new(RateLimiter::new(RateLimitConfig {
                max_attempts: unauthed_max,
                ..RateLimitConfig::unauthenticated()
            })),
            settings,
            Some(IpExtractor::from(ClientIpHeader::XForwardedFor)),
        );

        let revoking = engine.clone();
        let router = Router::new()
            .route("/test", get(|Auth(ctx): Auth| async move { ctx.subject }))
            .route(
                "/revoke",
                get(move |Auth(ctx): Auth| {
                    let engine = revoking.clone();
                    async move {
                        engine.revoke_token(&ctx.token_id).unwrap();
                        "revoked"
                    }
                }),
            )
            .route("/api/v1/auth/login", get(|| async { "public" }))
            .layer(middleware::from_fn_with_state(gate, auth_gate));

        Harness { router, engine }
    }

    fn harness() -> Harness {
        harness_with(&["awesome-blog"], &["awesome-blog"], 20)
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint::new(CLIENT_IP, USER_AGENT, DEVICE)
    }

    fn request(path: &str, authorization: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder()
            .uri(path)
            .header("x-forwarded-for", CLIENT_IP)
            .header("user-agent", USER_AGENT)
            .header("x-device-id", DEVICE);
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn token_issued_secs_ago(engine: &TokenEngine, age: u64, issuer: &str) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        engine
            .sign(&Claims {
                jti: uuid::Uuid::new_v4().simple().to_string(),
                sub: "alice".to_string(),
                iss: issuer.to_string(),
                iat: now - age,
                nbf: now - age,
                exp: now + 300,
                ip: CLIENT_IP.to_string(),
                user_agent: USER_AGENT.to_string(),
                device_id: DEVICE.to_string(),
                role: None,
            })
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_public_path_without_token() {
        let h = harness();
        let response = h
            .router
            .oneshot(request("/api/v1/auth/login", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let h = harness();
        let response = h.router.oneshot(request("/test", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let request_id = response.headers()[REQUEST_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        let body = body_json(response).await;
        assert_eq!(body["error"], "Missing authorization header");
        assert_eq!(body["request_id"], request_id.as_str());
    }

    #[tokio::test]
    async fn test_wrong_scheme() {
        let h = harness();
        for value in ["Basic abc", "Bearer", "Bearer a b", "bearer abc"] {
            let response = h
                .router
                .clone()
                .oneshot(request("/test", Some(value)))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{value}");
            let body = body_json(response).await;
            assert_eq!(body["error"], "Invalid authorization format", "{value}");
        }
    }

    #[tokio::test]
    async fn test_valid_token_reaches_handler() {
        let h = harness();
        let issued = h.engine.generate_token("alice", &fingerprint()).unwrap();

        let response = h
            .router
            .oneshot(request("/test", Some(&format!("Bearer {}", issued.token))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(NEW_TOKEN_HEADER).is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"alice");
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_is_not_disclosed() {
        let h = harness();
        let other = Fingerprint::new(CLIENT_IP, "another-agent", DEVICE);
        let issued = h.engine.generate_token("alice", &other).unwrap();

        let response = h
            .router
            .oneshot(request("/test", Some(&format!("Bearer {}", issued.token))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Invalid token");
    }

    #[tokio::test]
    async fn test_old_token_is_renewed() {
        let h = harness();
        let token = token_issued_secs_ago(&h.engine, 10 * 60, "awesome-blog");

        let response = h
            .router
            .oneshot(request("/test", Some(&format!("Bearer {token}"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let renewed = response.headers()[NEW_TOKEN_HEADER].to_str().unwrap();
        let claims = h
            .engine
            .validate_token(renewed, &fingerprint())
            .unwrap()
            .into_claims();
        assert_eq!(claims.sub, "alice");
    }

    #[tokio::test]
    async fn test_token_revoked_by_handler_is_not_renewed() {
        let h = harness();
        let token = token_issued_secs_ago(&h.engine, 10 * 60, "awesome-blog");

        let response = h
            .router
            .clone()
            .oneshot(request("/revoke", Some(&format!("Bearer {token}"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(NEW_TOKEN_HEADER).is_none());

        let response = h
            .router
            .oneshot(request("/test", Some(&format!("Bearer {token}"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_token_past_max_age_rejected() {
        let h = harness();
        let token = token_issued_secs_ago(&h.engine, 16 * 60, "awesome-blog");

        let response = h
            .router
            .oneshot(request("/test", Some(&format!("Bearer {token}"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Token expired");
    }

    #[tokio::test]
    async fn test_issuer_not_allowed_by_gate() {
        let h = harness_with(&["awesome-blog", "legacy"], &["awesome-blog"], 20);
        let token = token_issued_secs_ago(&h.engine, 0, "legacy");

        let response = h
            .router
            .oneshot(request("/test", Some(&format!("Bearer {token}"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Invalid token issuer");
    }

    #[tokio::test]
    async fn test_unauthenticated_rate_limit() {
        let h = harness_with(&["awesome-blog"], &["awesome-blog"], 2);

        for _ in 0..2 {
            let response = h
                .router
                .clone()
                .oneshot(request("/api/v1/auth/login", None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = h
            .router
            .oneshot(request("/api/v1/auth/login", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        let body = body_json(response).await;
        assert_eq!(body["error"], "Rate limit exceeded");
        assert_eq!(body["wait_seconds"], 60);
    }

    #[tokio::test]
    async fn test_missing_header_charged_to_unauthenticated_limit() {
        let h = harness_with(&["awesome-blog"], &["awesome-blog"], 1);

        let first = h
            .router
            .clone()
            .oneshot(request("/test", None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::UNAUTHORIZED);

        let second = h
            .router
            .clone()
            .oneshot(request("/test", None))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        // A bearer token uses the separate authenticated budget.
        let issued = h.engine.generate_token("alice", &fingerprint()).unwrap();
        let third = h
            .router
            .oneshot(request("/test", Some(&format!("Bearer {}", issued.token))))
            .await
            .unwrap();
        assert_eq!(third.status(), StatusCode::OK);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(AuthErrorKind::MissingHeader));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(""));
        assert_eq!(bearer_token(&headers), Err(AuthErrorKind::MissingHeader));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Ok("abc.def"));
    }

    #[test]
    fn test_security_headers() {
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers);

        assert_eq!(headers.len(), 6);
        assert_eq!(headers[header::CONTENT_SECURITY_POLICY], "default-src 'self'");
        assert_eq!(
            headers[header::STRICT_TRANSPORT_SECURITY],
            "max-age=31536000; includeSubDomains"
        );
    }
}
