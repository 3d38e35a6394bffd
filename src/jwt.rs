//! Token issuance and validation.
//!
//! Tokens are HS256 JWTs bound to the client fingerprint (IP, user agent,
//! device id) captured at issuance. Every token carries a random 128-bit id
//! used as the revocation key.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::blacklist::{BlacklistError, TokenBlacklist};

/// Minimum accepted signing secret length in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Token lifetime: 15 minutes
pub const TOKEN_DURATION_SECS: u64 = 15 * 60;

/// How long a revoked token id stays blacklisted: 24 hours
pub const REVOCATION_HORIZON_SECS: u64 = 24 * 60 * 60;

/// Client context a token is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub ip: String,
    pub user_agent: String,
    /// May be empty when the client sends no device id.
    pub device_id: String,
}

impl Fingerprint {
    pub fn new(
        ip: impl Into<String>,
        user_agent: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
            device_id: device_id.into(),
        }
    }
}

/// Signed token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Token id (hex-encoded random 128 bits), the blacklist key
    pub jti: String,
    /// Subject (user identifier)
    pub sub: String,
    /// Issuer (application name)
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Not before (Unix timestamp), equal to `iat` for issued tokens
    pub nbf: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    pub ip: String,
    pub user_agent: String,
    pub device_id: String,
    /// Carried through validation and renewal but not enforced here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Claims {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.ip, &self.user_agent, &self.device_id)
    }
}

/// A token whose signature, lifetime, revocation status, fingerprint and
/// issuer have all been checked.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    header: Header,
    claims: Claims,
    validated_at: SystemTime,
}

impl ValidatedToken {
    /// The single clock reading every time-based check was made against.
    pub fn validated_at(&self) -> SystemTime {
        self.validated_at
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

/// Result of issuing a token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT token string
    pub token: String,
    /// Token id (blacklist key)
    pub token_id: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
}

/// Issuer policy and lifetimes.
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    /// Issuer written into new tokens.
    pub issuer: String,
    /// Issuers accepted at validation.
    pub allowed_issuers: Vec<String>,
    pub token_duration: Duration,
    pub revocation_horizon: Duration,
}

impl TokenPolicy {
    /// Policy that issues and accepts only `issuer`, with the default lifetimes.
    pub fn new(issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        Self {
            allowed_issuers: vec![issuer.clone()],
            issuer,
            token_duration: Duration::from_secs(TOKEN_DURATION_SECS),
            revocation_horizon: Duration::from_secs(REVOCATION_HORIZON_SECS),
        }
    }
}

/// Signs and verifies fingerprint-bound tokens. Holds no mutable state of
/// its own; revocations go to the injected blacklist.
pub struct TokenEngine {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    policy: TokenPolicy,
    blacklist: Arc<dyn TokenBlacklist>,
}

impl TokenEngine {
    /// Create an engine. Fails with [`JwtError::Config`] if the secret is
    /// shorter than [`MIN_SECRET_LENGTH`] bytes.
    pub fn new(
        secret: &[u8],
        policy: TokenPolicy,
        blacklist: Arc<dyn TokenBlacklist>,
    ) -> Result<Self, JwtError> {
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(JwtError::Config(format!(
                "signing secret must be at least {MIN_SECRET_LENGTH} bytes"
            )));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            policy,
            blacklist,
        })
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Issue a token for `subject` bound to `fingerprint`.
    pub fn generate_token(
        &self,
        subject: &str,
        fingerprint: &Fingerprint,
    ) -> Result<IssuedToken, JwtError> {
        self.generate_token_with_role(subject, None, fingerprint)
    }

    /// Issue a token that also carries a role.
    pub fn generate_token_with_role(
        &self,
        subject: &str,
        role: Option<&str>,
        fingerprint: &Fingerprint,
    ) -> Result<IssuedToken, JwtError> {
        let now = unix_now()?;
        let exp = now + self.policy.token_duration.as_secs();

        let claims = Claims {
            jti: generate_token_id(),
            sub: subject.to_string(),
            iss: self.policy.issuer.clone(),
            iat: now,
            nbf: now,
            exp,
            ip: fingerprint.ip.clone(),
            user_agent: fingerprint.user_agent.clone(),
            device_id: fingerprint.device_id.clone(),
            role: role.map(str::to_string),
        };

        let token = self.sign(&claims)?;

        Ok(IssuedToken {
            token,
            token_id: claims.jti,
            issued_at: now,
            expires_at: exp,
        })
    }

    /// Sign arbitrary claims with the engine's key.
    pub fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(JwtError::Encoding)
    }

    /// Validate a token presented by a client with `fingerprint`.
    ///
    /// Checks run in a fixed order against a single clock reading and the
    /// first failure is returned: signature, expiry, not-before/issued-at,
    /// blacklist, fingerprint (IP, user agent, device), issuer.
    pub fn validate_token(
        &self,
        token: &str,
        fingerprint: &Fingerprint,
    ) -> Result<ValidatedToken, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| JwtError::InvalidToken)?;
        let claims = data.claims;

        let validated_at = SystemTime::now();
        let now = unix_secs(validated_at)?;

        if now > claims.exp {
            return Err(JwtError::ExpiredToken);
        }

        if claims.nbf > now || claims.iat > now {
            return Err(JwtError::TokenUsedBeforeIssued);
        }

        if self.blacklist.is_blacklisted_at(&claims.jti, validated_at) {
            return Err(JwtError::InvalidToken);
        }

        if claims.ip != fingerprint.ip {
            return Err(JwtError::InvalidIp);
        }
        if claims.user_agent != fingerprint.user_agent {
            return Err(JwtError::InvalidUserAgent);
        }
        if claims.device_id != fingerprint.device_id {
            return Err(JwtError::InvalidDevice);
        }

        if !self.policy.allowed_issuers.contains(&claims.iss) {
            return Err(JwtError::InvalidIssuer);
        }

        Ok(ValidatedToken {
            header: data.header,
            claims,
            validated_at,
        })
    }

    /// Extract the claims of a validated token, rejecting any that lack a
    /// subject or token id.
    pub fn get_claims(&self, token: &ValidatedToken) -> Result<Claims, JwtError> {
        if token.header.alg != Algorithm::HS256
            || token.claims.sub.is_empty()
            || token.claims.jti.is_empty()
        {
            return Err(JwtError::InvalidToken);
        }
        Ok(token.claims.clone())
    }

    /// Blacklist `token_id` for the revocation horizon, or for the token
    /// lifetime if that is longer.
    pub fn revoke_token(&self, token_id: &str) -> Result<(), JwtError> {
        let horizon = self
            .policy
            .revocation_horizon
            .max(self.policy.token_duration);
        let expires_at = SystemTime::now() + horizon;

        self.blacklist
            .add(token_id, expires_at)
            .map_err(JwtError::Revocation)
    }

    /// True if `token_id` is currently on the blacklist.
    pub fn is_revoked(&self, token_id: &str) -> bool {
        self.blacklist.is_blacklisted(token_id)
    }
}

fn unix_now() -> Result<u64, JwtError> {
    unix_secs(SystemTime::now())
}

fn unix_secs(time: SystemTime) -> Result<u64, JwtError> {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

fn generate_token_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

/// Errors that can occur during token operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// The engine was configured with an unusable secret
    #[error("invalid token configuration: {0}")]
    Config(String),
    /// Error encoding the token
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    /// Bad signature, wrong algorithm, malformed claims, revoked or wrong issuer
    #[error("invalid token")]
    InvalidToken,
    #[error("token has expired")]
    ExpiredToken,
    #[error("token used before issued")]
    TokenUsedBeforeIssued,
    #[error("invalid IP address")]
    InvalidIp,
    #[error("invalid user agent")]
    InvalidUserAgent,
    #[error("invalid device")]
    InvalidDevice,
    #[error("invalid token issuer")]
    InvalidIssuer,
    /// The blacklist refused the revocation
    #[error("failed to revoke token: {0}")]
    Revocation(BlacklistError),
    /// System time error
    #[error("system time error")]
    TimeError,
}
