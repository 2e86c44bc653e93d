use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;

pub const SESSION_COOKIE: &str = "session";
const ISSUER: &str = "storefront-api";

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    /// Token id
    pub jti: String,
}

/// Issues and verifies signed, expiring session tokens.
#[derive(Clone)]
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    secure_cookie: bool,
}

impl SessionService {
    pub fn new(secret: &str, ttl: Duration, secure_cookie: bool) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
            secure_cookie,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            &cfg.session_secret,
            cfg.session_ttl(),
            cfg.session_cookie_secure,
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Signs a new session token for `user_id`
    pub fn issue(&self, user_id: Uuid) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
            iss: ISSUER.to_string(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::InternalError(format!("failed to sign session: {}", e)))
    }

    /// Returns the user id of a valid, unexpired token
    pub fn verify(&self, token: &str) -> Result<Uuid, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.leeway = 0;

        let claims = decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                debug!(error = %e, "rejected session token");
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        ServiceError::AuthError("Session expired".to_string())
                    }
                    _ => ServiceError::AuthError("Invalid session".to_string()),
                }
            })?
            .claims;

        Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::AuthError("Invalid session".to_string()))
    }

    fn cookie_attributes(&self) -> &'static str {
        // Browsers drop SameSite=None cookies that are not Secure
        if self.secure_cookie {
            "Path=/; HttpOnly; Secure; SameSite=None"
        } else {
            "Path=/; HttpOnly; SameSite=Lax"
        }
    }

    /// `Set-Cookie` value carrying `token`
    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; {}; Max-Age={}",
            SESSION_COOKIE,
            token,
            self.cookie_attributes(),
            self.ttl.as_secs()
        )
    }

    /// `Set-Cookie` value that removes the session
    pub fn cleared_cookie(&self) -> String {
        format!("{}=; {}; Max-Age=0", SESSION_COOKIE, self.cookie_attributes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &str = "session-secret-used-only-in-unit-tests-42";

    fn service() -> SessionService {
        SessionService::new(SECRET, Duration::from_secs(3600), true)
    }

    #[test]
    fn issued_token_verifies() {
        let user_id = Uuid::new_v4();
        let token = service().issue(user_id).unwrap();
        assert_eq!(service().verify(&token).unwrap(), user_id);
    }

    #[test]
    fn tokens_are_unique_per_issue() {
        let user_id = Uuid::new_v4();
        let svc = service();
        assert_ne!(svc.issue(user_id).unwrap(), svc.issue(user_id).unwrap());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: Uuid::new_v4().to_string(),
            iat: now - 7200,
            exp: now - 3600,
            iss: ISSUER.to_string(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert_matches!(service().verify(&token), Err(ServiceError::AuthError(msg)) if msg == "Session expired");
    }

    #[test]
    fn forged_or_foreign_tokens_are_rejected() {
        let token = service().issue(Uuid::new_v4()).unwrap();
        let other = SessionService::new("another-secret-with-enough-length-123", Duration::from_secs(60), true);
        assert_matches!(other.verify(&token), Err(ServiceError::AuthError(_)));

        // The legacy base64(userId:timestamp) format is not a session
        assert_matches!(
            service().verify("NjU0Zjc6MTcwMDAwMDAwMA=="),
            Err(ServiceError::AuthError(_))
        );
    }

    #[test]
    fn cookie_attributes() {
        let svc = service();
        let cookie = svc.session_cookie("abc");
        assert!(cookie.starts_with("session=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=None"));
        assert!(cookie.ends_with("Max-Age=3600"));
        assert!(svc.cleared_cookie().ends_with("Max-Age=0"));

        let local = SessionService::new(SECRET, Duration::from_secs(60), false);
        assert!(!local.session_cookie("abc").contains("Secure"));
    }
}
