//! Request authentication.

use http::header::{HeaderValue, AUTHORIZATION};
use http::Request;

/// Scheme prefix of the authorization header.
pub const AUTH_SCHEME: &str = "token";

/// The credential could not be encoded as a header value.
#[derive(Debug, thiserror::Error)]
#[error("credential contains characters not allowed in a header value")]
pub struct InvalidCredential;

/// An opaque API token, injected into every outgoing request.
///
/// Read-only once built and cheap to clone; the header value is marked
/// sensitive so it is never printed by `Debug` implementations.
#[derive(Clone)]
pub struct Credential {
    header: HeaderValue,
}

impl Credential {
    pub fn new(token: impl AsRef<str>) -> Result<Self, InvalidCredential> {
        let mut header = HeaderValue::from_str(&format!("{} {}", AUTH_SCHEME, token.as_ref()))
            .map_err(|_| InvalidCredential)?;
        header.set_sensitive(true);
        Ok(Self { header })
    }

    /// Read the token from an environment variable. An unset variable yields
    /// an empty token so unauthenticated (rate-limited) access still works.
    pub fn from_env(var: &str) -> Result<Self, InvalidCredential> {
        let token = std::env::var(var).unwrap_or_default();
        if token.is_empty() {
            tracing::warn!(var = %var, "No API token set; requests will be unauthenticated");
        }
        Self::new(token)
    }

    /// The full header value, `token <credential>`.
    pub fn header_value(&self) -> &HeaderValue {
        &self.header
    }

    /// Overwrite the request's authorization header.
    pub fn apply<B>(&self, request: &mut Request<B>) {
        request.headers_mut().insert(AUTHORIZATION, self.header.clone());
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
