/*!
 * # Authentication
 *
 * Sessions are HS256 JWTs issued after Google sign-in and carried in the
 * `session` cookie (or an `Authorization: Bearer` header).
 *
 * - [`AuthUser`] resolves the token to a stored user on every request
 * - [`AdminUser`] additionally requires `is_admin`
 */

pub mod google;
pub mod session;

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use tracing::debug;

use crate::entities::user;
use crate::errors::ServiceError;
use crate::AppState;

pub use google::{GoogleOAuthClient, GoogleProfile, IdentityProvider, OAuthError};
pub use session::{SessionClaims, SessionService, SESSION_COOKIE};

/// CSRF state for the Google redirect round trip
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";
const OAUTH_STATE_MAX_AGE_SECS: u64 = 600;

/// Value of cookie `name` from the request's `Cookie` headers
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Session token from the cookie, falling back to a bearer header
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    cookie_value(headers, SESSION_COOKIE).or_else(|| bearer_token(headers))
}

pub fn oauth_state_cookie(state: &str, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        OAUTH_STATE_COOKIE, state, OAUTH_STATE_MAX_AGE_SECS, secure
    )
}

pub fn cleared_oauth_state_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", OAUTH_STATE_COOKIE)
}

/// Signed-in user
#[derive(Debug, Clone)]
pub struct AuthUser(pub user::Model);

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.0.is_admin
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| ServiceError::AuthError("Not authenticated".to_string()))?;
        let user_id = state.sessions.verify(token)?;

        let user = state
            .services
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| {
                debug!(%user_id, "session refers to a missing user");
                ServiceError::AuthError("Not authenticated".to_string())
            })?;

        Ok(AuthUser(user))
    }
}

/// Signed-in user with admin rights
#[derive(Debug, Clone)]
pub struct AdminUser(pub user::Model);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err(ServiceError::Forbidden("Admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_named_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc.def.ghi; oauth_state=xyz"),
        );
        assert_eq!(cookie_value(&headers, "session"), Some("abc.def.ghi"));
        assert_eq!(cookie_value(&headers, OAUTH_STATE_COOKIE), Some("xyz"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn bearer_header_is_a_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(session_token(&headers), Some("tok"));

        headers.insert(header::COOKIE, HeaderValue::from_static("session=cookie-tok"));
        assert_eq!(session_token(&headers), Some("cookie-tok"));
    }

    #[test]
    fn empty_session_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_token(&headers), None);
    }
}
