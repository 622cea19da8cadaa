//! Password hashing, bearer tokens and the authenticated-user extractor.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use super::api::{ApiError, SharedState};

pub fn hash_password(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow!("Failed to hash password: {}", e))
}

/// `Ok(false)` on a wrong password; `Err` only when the stored hash is
/// unreadable.
pub fn verify_password(plain: &str, stored_hash: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|e| anyhow!("Malformed password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signing keys plus the token lifetime.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, ttl_hours: i64) -> Result<Self> {
        let ttl = Duration::try_hours(ttl_hours)
            .ok_or_else(|| anyhow!("Token lifetime of {} hours is out of range", ttl_hours))?;
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        })
    }

    pub fn issue(&self, user_id: &str, email: &str) -> Result<String> {
        self.issue_at(user_id, email, Utc::now())
    }

    pub fn issue_at(&self, user_id: &str, email: &str, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            user_id: user_id.to_string(),
            email: email.to_string(),
            iat: now.timestamp(),
            exp: now
                .checked_add_signed(self.ttl)
                .context("Token expiry is out of range")?
                .timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("Failed to sign token")
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .context("Invalid token")?;
        Ok(data.claims)
    }
}

/// The caller behind a valid `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::unauthorized("No token provided"))?;

        let claims = state.jwt.verify(token).map_err(|e| {
            tracing::debug!(error = %e, "rejected bearer token");
            ApiError::unauthorized("Invalid or expired token")
        })?;

        Ok(Self {
            user_id: claims.user_id,
            email: claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_round_trip() -> Result<()> {
        let hash = hash_password("hunter22")?;
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash)?);
        assert!(!verify_password("hunter23", &hash)?);
        Ok(())
    }

    #[test]
    fn test_hashes_are_salted() -> Result<()> {
        assert_ne!(hash_password("same")?, hash_password("same")?);
        Ok(())
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        assert!(verify_password("x", "not-a-hash").is_err());
    }

    #[test]
    fn test_token_carries_user() -> Result<()> {
        let keys = JwtKeys::new("a-test-secret-of-some-length", 1)?;
        let token = keys.issue("user-1", "a@example.com")?;
        let claims = keys.verify(&token)?;
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.email, "a@example.com");
        assert_eq!(claims.exp - claims.iat, 3600);
        Ok(())
    }

    #[test]
    fn test_expired_token_rejected() -> Result<()> {
        let keys = JwtKeys::new("a-test-secret-of-some-length", 1)?;
        let token = keys.issue_at("user-1", "a@example.com", Utc::now() - Duration::days(2))?;
        assert!(keys.verify(&token).is_err());
        Ok(())
    }

    #[test]
    fn test_token_from_other_secret_rejected() -> Result<()> {
        let ours = JwtKeys::new("a-test-secret-of-some-length", 1)?;
        let theirs = JwtKeys::new("a-different-secret-entirely", 1)?;
        let token = theirs.issue("user-1", "a@example.com")?;
        assert!(ours.verify(&token).is_err());
        Ok(())
    }

    #[test]
    fn test_token_lifetime_must_fit_a_timestamp() -> Result<()> {
        assert!(JwtKeys::new("a-test-secret-of-some-length", 9_000_000_000_000_000).is_err());
        assert!(JwtKeys::new("a-test-secret-of-some-length", i64::MIN).is_err());

        // A lifetime that fits alone can still overflow from a late clock.
        let keys = JwtKeys::new("a-test-secret-of-some-length", 24 * 366 * 100)?;
        assert!(keys.issue_at("user-1", "a@example.com", DateTime::<Utc>::MAX_UTC).is_err());
        assert!(keys.issue("user-1", "a@example.com").is_ok());
        Ok(())
    }

    #[test]
    fn test_claims_use_camel_case() -> Result<()> {
        let claims = Claims {
            user_id: "u".into(),
            email: "e".into(),
            iat: 1,
            exp: 2,
        };
        let json = serde_json::to_value(&claims)?;
        assert_eq!(json["userId"], "u");
        Ok(())
    }
}
