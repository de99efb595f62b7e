use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::TokenResponse;

const ACCESS_TTL_SECONDS: i64 = 60 * 60;
const REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub email: String,
    /// "access" or "refresh".
    pub token_use: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Access + refresh token pair for a verified login.
    pub fn issue_pair(&self, user_id: Uuid, email: &str) -> Result<TokenResponse, CoreError> {
        Ok(TokenResponse {
            access: self.issue(user_id, email, "access", ACCESS_TTL_SECONDS)?,
            refresh: self.issue(user_id, email, "refresh", REFRESH_TTL_SECONDS)?,
        })
    }

    fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        token_use: &str,
        ttl_seconds: i64,
    ) -> Result<String, CoreError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            token_use: token_use.to_string(),
            exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| CoreError::Invariant(format!("token encoding failed: {}", e)))
    }

    /// Verify an access token and return its claims.
    pub fn verify_access(&self, token: &str) -> Result<Claims, CoreError> {
        let data: TokenData<Claims> = decode(token, &self.decoding_key, &Validation::default())
            .map_err(|_| CoreError::Forbidden("invalid or expired token".into()))?;
        if data.claims.token_use != "access" {
            return Err(CoreError::Forbidden("not an access token".into()));
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_pair_round_trips() {
        let jwt = JwtManager::new("test-secret");
        let user = Uuid::new_v4();
        let pair = jwt.issue_pair(user, "alice@example.com").unwrap();

        let claims = jwt.verify_access(&pair.access).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.email, "alice@example.com");

        // Refresh tokens do not pass access verification.
        assert!(jwt.verify_access(&pair.refresh).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let jwt = JwtManager::new("secret-a");
        let pair = jwt.issue_pair(Uuid::new_v4(), "a@b.c").unwrap();
        let other = JwtManager::new("secret-b");
        assert!(other.verify_access(&pair.access).is_err());
    }
}
