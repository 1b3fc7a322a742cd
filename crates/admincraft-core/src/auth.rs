//! Connection credential verification.
//!
//! Clients present an HMAC-signed JWT in the `token` query parameter of the
//! upgrade request. A token is accepted only when its signature matches the
//! shared secret, it carries an unexpired `exp`, and it names a `userId`.

use std::fmt;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// The authenticated user behind a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    user_id: String,
}

impl Identity {
    /// Create an identity for the given user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    /// The user identifier taken from the token's `userId` claim.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_id)
    }
}

/// Why a token was rejected. Logged server-side only; clients just see the
/// authentication-failure close code.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No `token` query parameter, or an empty one.
    #[error("no token supplied")]
    MissingToken,
    /// The `exp` claim is in the past.
    #[error("token expired")]
    Expired,
    /// Signature does not match the shared secret.
    #[error("invalid signature")]
    InvalidSignature,
    /// Not a decodable JWT, wrong algorithm, or missing required claims.
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Well-formed token without a usable `userId`.
    #[error("token has no userId claim")]
    MissingUserId,
}

impl AuthError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::Expired => "expired",
            Self::InvalidSignature => "invalid_signature",
            Self::Malformed(_) => "malformed",
            Self::MissingUserId => "missing_user_id",
        }
    }
}

#[derive(Deserialize)]
struct Claims {
    #[serde(rename = "userId", default)]
    user_id: Option<Value>,
}

/// Verifies connection tokens against the process-wide shared secret.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Build a verifier for the given secret.
    pub fn new(secret: &SecretString) -> Self {
        let key = DecodingKey::from_secret(secret.expose_secret().as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        Self { key, validation }
    }

    /// Verify a token and extract the identity it names.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let result = self.decode(token);
        match &result {
            Ok(identity) => debug!(user_id = identity.user_id(), "token verified"),
            Err(e) => warn!(reason = %e, kind = e.error_kind(), "token rejected"),
        }
        result
    }

    fn decode(&self, token: &str) -> Result<Identity, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| classify(&e))?;
        data.claims
            .user_id
            .as_ref()
            .and_then(user_id_from_claim)
            .map(Identity::new)
            .ok_or(AuthError::MissingUserId)
    }
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenVerifier([REDACTED])")
    }
}

fn classify(err: &jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        other => AuthError::Malformed(format!("{other:?}")),
    }
}

/// Accepts string ids as-is and numeric ids in their decimal form.
fn user_id_from_claim(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
