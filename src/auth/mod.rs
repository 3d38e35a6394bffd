//! Request admission: bearer token authentication and rate limiting.
//!
//! Every request passes through [`auth_gate`]. Public paths only consume the
//! unauthenticated rate limit; everything else needs a valid, fingerprint
//! bound bearer token. Handlers read the outcome through the [`Auth`]
//! extractor.

mod errors;
mod extractors;
mod gate;
mod ip;
mod types;

pub use errors::{ApiAuthError, AuthErrorKind, RETRY_AFTER_SECS};
pub use extractors::{Auth, ClientFingerprint};
pub use gate::{
    AuthGate, DEVICE_ID_HEADER, GateSettings, NEW_TOKEN_HEADER, REQUEST_ID_HEADER,
    apply_security_headers, auth_gate, default_public_paths,
};
pub use ip::extract_client_ip;
pub use types::{AuthContext, RequestId};
