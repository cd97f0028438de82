//! Bearer token verification for realtime connection handshakes.
//!
//! The socket server runs this before any application handler sees a
//! connection. Unlike the client-side decoding in [`crate::auth::claims`],
//! the signature and expiry are checked against the server's shared secret.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use thiserror::Error;
use tracing::debug;

use crate::auth::AccessClaims;

const BEARER_SCHEME: &str = "bearer";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HandshakeAuthError {
    #[error("Authentication error: token missing")]
    MissingToken,

    #[error("Authentication error: invalid or expired token ({0})")]
    InvalidToken(String),
}

/// What a client presents when opening a connection.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    /// The `auth.token` field of the handshake payload.
    pub auth_token: Option<String>,
    pub headers: HeaderMap,
}

impl Handshake {
    pub fn with_auth_token(token: impl Into<String>) -> Self {
        Self {
            auth_token: Some(token.into()),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(headers: HeaderMap) -> Self {
        Self {
            auth_token: None,
            headers,
        }
    }
}

/// Drop an optional, case-insensitive `Bearer` scheme from a credential.
fn strip_bearer(raw: &str) -> &str {
    let raw = raw.trim();
    let scheme_len = BEARER_SCHEME.len();
    match (raw.get(..scheme_len), raw.get(scheme_len..)) {
        (Some(scheme), Some(rest))
            if scheme.eq_ignore_ascii_case(BEARER_SCHEME)
                && (rest.is_empty() || rest.starts_with(char::is_whitespace)) =>
        {
            rest.trim()
        }
        _ => raw,
    }
}

/// A connection that passed verification, with the claims attached.
#[derive(Debug)]
pub struct Authenticated<C> {
    pub connection: C,
    pub claims: AccessClaims,
}

/// Verifies HS256 bearer tokens against a shared secret.
pub struct HandshakeVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl HandshakeVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Pull the bearer token out of a handshake: the `auth.token` field wins
    /// over the `Authorization` header, and a `Bearer ` prefix is stripped.
    pub fn extract_token(handshake: &Handshake) -> Option<String> {
        let header_value = handshake
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        handshake
            .auth_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(header_value)
            .map(strip_bearer)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    pub fn verify(&self, handshake: &Handshake) -> Result<AccessClaims, HandshakeAuthError> {
        let token = Self::extract_token(handshake).ok_or(HandshakeAuthError::MissingToken)?;

        jsonwebtoken::decode::<AccessClaims>(&token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Handshake token rejected");
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "expired".to_string(),
                    ErrorKind::InvalidSignature => "bad signature".to_string(),
                    _ => e.to_string(),
                };
                HandshakeAuthError::InvalidToken(reason)
            })
    }

    /// Admit `connection` only if its handshake carries a valid token.
    pub fn authorize<C>(
        &self,
        connection: C,
        handshake: &Handshake,
    ) -> Result<Authenticated<C>, HandshakeAuthError> {
        let claims = self.verify(handshake)?;
        Ok(Authenticated { connection, claims })
    }
}
