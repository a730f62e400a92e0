//! Bearer token verification.
//!
//! Accounts live in the lobby service; this server only checks the HS256
//! access tokens it issues and takes the player id from `sub`.

use chrono::{Duration, Utc};
use cribbage::PlayerId;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JWT claims for an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: PlayerId,
    pub exp: i64,
    pub iat: i64,
}

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `Authorization: Bearer` header or `token` parameter
    #[error("Missing bearer token")]
    MissingToken,

    /// JWT token error
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Verifies (and, for tooling and tests, issues) access tokens.
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Verify an access token
    ///
    /// # Returns
    ///
    /// * `AuthResult<Claims>` - The token's claims if the signature and expiry check out
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let token_data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(token_data.claims)
    }

    /// Verify a token that may not have been sent at all.
    ///
    /// Both the `Authorization` header and the WebSocket `token` parameter
    /// are optional on the wire; a missing one is [`AuthError::MissingToken`].
    pub fn authenticate(&self, token: Option<&str>) -> AuthResult<Claims> {
        let token = token.ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }

    /// Issue an access token for `player_id`, valid for `ttl`.
    pub fn issue(&self, player_id: PlayerId, ttl: Duration) -> AuthResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: player_id,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret_key_for_testing_only_0123456789";

    #[test]
    fn test_issue_and_verify() {
        let verifier = TokenVerifier::new(SECRET);
        let token = verifier.issue(42, Duration::minutes(15)).unwrap();
        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.sub, 42);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = TokenVerifier::new(SECRET)
            .issue(42, Duration::minutes(15))
            .unwrap();
        let other = TokenVerifier::new("another_secret_key_that_is_long_enough");
        assert!(matches!(other.verify(&token), Err(AuthError::JwtError(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        // Past the default 60 second leeway.
        let token = verifier.issue(42, Duration::minutes(-5)).unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_authenticate_requires_a_token() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(matches!(
            verifier.authenticate(None),
            Err(AuthError::MissingToken)
        ));

        let token = verifier.issue(9, Duration::minutes(15)).unwrap();
        assert_eq!(verifier.authenticate(Some(&token)).unwrap().sub, 9);
        assert!(matches!(
            verifier.authenticate(Some("not.a.token")),
            Err(AuthError::JwtError(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(verifier.verify("not.a.token").is_err());
    }
}
