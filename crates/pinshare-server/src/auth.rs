//! Handshake token validation (§4.7 SUPPLEMENT). The core treats the
//! token as opaque; this is the one concrete issuer/validator pair the
//! server binary needs to run the WebSocket upgrade end to end. A real
//! deployment would swap in whatever issuer the platform team runs
//! behind the same [`TokenValidator`] trait.

use chrono::Duration as ChronoDuration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use pinshare_core::id::{SessionId, UserId};

/// The authentication claims recovered from a validated token (§6):
/// subject is the participant id, plus the session id, user id, and
/// display name the Connection Handler needs to join with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_color: String,
    pub exp: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired websocket token")]
    InvalidToken,
}

/// Validates an opaque handshake token into its claims. A trait so the
/// core's Connection Handler never hard-codes a specific JWT library or
/// issuer (Design Notes §9).
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HS256 implementation backing `/sessions/{id}/join` and the WebSocket
/// upgrade handler.
pub struct HmacTokenValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: ChronoDuration,
}

impl HmacTokenValidator {
    pub fn new(secret: &[u8], ttl: ChronoDuration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn issue(
        &self,
        session_id: SessionId,
        user_id: UserId,
        display_name: String,
        avatar_color: String,
    ) -> Result<String, AuthError> {
        let exp = (chrono::Utc::now() + self.ttl).timestamp().max(0) as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            session_id,
            user_id,
            display_name,
            avatar_color,
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }
}

impl TokenValidator for HmacTokenValidator {
    fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_validates_back_to_the_same_claims() {
        let validator = HmacTokenValidator::new(b"test-secret", ChronoDuration::minutes(5));
        let session_id = SessionId::new();
        let user_id = UserId::from("u1");

        let token = validator
            .issue(session_id, user_id.clone(), "Alice".into(), "#FF5733".into())
            .unwrap();
        let claims = validator.validate(&token).unwrap();

        assert_eq!(claims.session_id, session_id);
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.display_name, "Alice");
        assert_eq!(claims.avatar_color, "#FF5733");
    }

    #[test]
    fn expired_token_is_rejected() {
        let validator = HmacTokenValidator::new(b"test-secret", ChronoDuration::seconds(-1));
        let token = validator
            .issue(SessionId::new(), UserId::from("u1"), "Alice".into(), "#FF5733".into())
            .unwrap();
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let validator = HmacTokenValidator::new(b"test-secret", ChronoDuration::minutes(5));
        let other = HmacTokenValidator::new(b"other-secret", ChronoDuration::minutes(5));
        let token = other
            .issue(SessionId::new(), UserId::from("u1"), "Alice".into(), "#FF5733".into())
            .unwrap();
        assert!(validator.validate(&token).is_err());
    }
}
