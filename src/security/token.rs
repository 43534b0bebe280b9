//! Session token verification and issuing.
//!
//! The edge hands every client an HMAC-signed JWT whose `ip` claim names
//! the upstream the client may reach. The gateway checks that claim against
//! the upstream it resolved for the request: the token authorizes a
//! *target*, not a source address.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Clock skew tolerated on `nbf` when issuing.
pub const NOT_BEFORE_SKEW_SECS: i64 = 10;

/// Default token lifetime.
pub const DEFAULT_TTL_SECS: i64 = 30 * 60;

/// Claim set carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Upstream identity the token is bound to.
    pub ip: String,

    /// Edge gateway the token was issued for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,

    /// Issued at (unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Not before (unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Expires at (unix seconds).
    pub exp: i64,
}

impl SessionClaims {
    /// Claims for a token issued at `now` that lives for `ttl_secs`.
    pub fn issued_at(ip: impl Into<String>, upstream: impl Into<String>, now: i64, ttl_secs: i64) -> Self {
        Self {
            ip: ip.into(),
            upstream: Some(upstream.into()),
            iat: Some(now),
            nbf: Some(now - NOT_BEFORE_SKEW_SECS),
            exp: now + ttl_secs,
        }
    }
}

/// Error raised while signing a token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("signing secret is empty")]
    EmptySecret,

    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Verifies session tokens against a pre-loaded secret.
///
/// Every method is a pure function of its inputs and the current time.
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Decode and verify a token, returning its claims.
    ///
    /// Fails on bad structure, bad signature, `now < nbf`, `now > exp`,
    /// `iat` in the future, or an `ip` claim that is missing or not a string.
    pub fn claims(&self, token: &str) -> Option<SessionClaims> {
        let data = decode::<SessionClaims>(token, &self.key, &self.validation).ok()?;
        if let Some(iat) = data.claims.iat {
            if iat > unix_now() {
                return None;
            }
        }
        Some(data.claims)
    }

    /// Check that `token` is valid and bound to `expected_identity`.
    ///
    /// Never errors: every failure is a plain `false` the caller turns into
    /// an authorization-denied response.
    pub fn validate(&self, token: Option<&str>, expected_identity: &str) -> bool {
        let Some(token) = token else {
            return false;
        };

        match self.claims(token) {
            Some(claims) if claims.ip == expected_identity => true,
            Some(claims) => {
                tracing::debug!(
                    token_ip = %claims.ip,
                    expected = %expected_identity,
                    "Session token bound to a different upstream"
                );
                false
            }
            None => false,
        }
    }
}

/// Sign a session token with HS256.
pub fn issue_token(secret: &[u8], claims: &SessionClaims) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }
    let token = encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
