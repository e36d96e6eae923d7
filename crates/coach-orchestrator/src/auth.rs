//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs signed with the `JWT_SECRET` from the environment.
//! Handlers that take an [`AuthUser`] argument reject requests without a
//! valid token with `401`.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::ApiError;
use crate::error::{CoachError, Result};

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Issue time, seconds since the epoch.
    pub iat: i64,
}

impl Claims {
    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Signing and verification keys derived from one secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
    ttl: TimeDelta,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("secret", &"[redacted]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl JwtKeys {
    /// Keys for `secret`; tokens live for `ttl_hours`.
    #[must_use]
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            ttl: TimeDelta::try_hours(ttl_hours.max(1)).unwrap_or_else(|| TimeDelta::hours(24)),
        }
    }

    /// Signs a token for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Unauthorized` if signing fails.
    pub fn issue(&self, user_id: &str) -> Result<String> {
        self.issue_at(user_id, Utc::now())
    }

    /// Signs a token for `user_id` as if issued at `now`.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Unauthorized` if signing fails.
    pub fn issue_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CoachError::unauthorized(format!("could not sign token: {e}")))
    }

    /// Checks signature and expiry.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::Unauthorized` for a malformed, forged or expired
    /// token.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "Rejected bearer token");
                CoachError::unauthorized(format!("invalid token: {e}"))
            })
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// User id from the token subject.
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| CoachError::unauthorized("missing Authorization header"))?;
        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| CoachError::unauthorized("expected 'Authorization: Bearer <token>'"))?;
        let claims = JwtKeys::from_ref(state).verify(token)?;
        Ok(Self { user_id: claims.sub })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn issued_token_verifies() {
        let keys = JwtKeys::new(SECRET, 24);
        let token = keys.issue("user-1").unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
        assert!(claims.expires_at().unwrap() > Utc::now());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = JwtKeys::new(SECRET, 1);
        let token = keys.issue_at("user-1", Utc::now() - TimeDelta::hours(2)).unwrap();
        let err = keys.verify(&token).unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let token = JwtKeys::new(SECRET, 1).issue("user-1").unwrap();
        let other = JwtKeys::new("ffffffffffffffffffffffffffffffff", 1);
        assert!(other.verify(&token).is_err());
        assert!(other.verify("not-a-token").is_err());
    }

    #[test]
    fn debug_hides_secret() {
        let keys = JwtKeys::new(SECRET, 1);
        assert!(!format!("{keys:?}").contains(SECRET));
    }
}
