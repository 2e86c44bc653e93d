//! Google sign-in.
//!
//! 1. `/api/auth/google` redirects to Google's consent page with a random `state`
//! 2. Google redirects back to `/api/auth/google/callback` with `code` and `state`
//! 3. The code is exchanged for an access token, which fetches the user profile
//! 4. The user is upserted and a session cookie is issued

use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, reqwest::async_http_client, AuthUrl, AuthorizationCode, ClientId,
    ClientSecret, CsrfToken, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::errors::ServiceError;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("Google OAuth not configured")]
    NotConfigured,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Failed to fetch user info: {0}")]
    UserInfo(String),
}

impl From<OAuthError> for ServiceError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::TokenExchange(_) | OAuthError::UserInfo(_) => {
                ServiceError::AuthError(err.to_string())
            }
            OAuthError::NotConfigured | OAuthError::Configuration(_) => {
                ServiceError::InternalError(err.to_string())
            }
        }
    }
}

/// Profile returned by Google's userinfo endpoint
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct GoogleProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Identity provider used by the sign-in handlers
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Consent page URL and the CSRF state embedded in it
    fn authorization_url(&self) -> (String, String);

    /// Exchanges an authorization code for the signed-in user's profile
    async fn exchange_code(&self, code: &str) -> Result<GoogleProfile, OAuthError>;
}

pub struct GoogleOAuthClient {
    client: BasicClient,
    http: reqwest::Client,
}

impl GoogleOAuthClient {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_url: String,
    ) -> Result<Self, OAuthError> {
        let client = BasicClient::new(
            ClientId::new(client_id),
            Some(ClientSecret::new(client_secret)),
            AuthUrl::new(GOOGLE_AUTH_URL.to_string())
                .map_err(|e| OAuthError::Configuration(e.to_string()))?,
            Some(
                TokenUrl::new(GOOGLE_TOKEN_URL.to_string())
                    .map_err(|e| OAuthError::Configuration(e.to_string()))?,
            ),
        )
        .set_redirect_uri(
            RedirectUrl::new(redirect_url).map_err(|e| OAuthError::Configuration(e.to_string()))?,
        );

        Ok(Self {
            client,
            http: reqwest::Client::new(),
        })
    }

    /// `Ok(None)` when client id or secret is not configured
    pub fn from_app_config(cfg: &AppConfig) -> Result<Option<Self>, OAuthError> {
        let id = cfg.google_client_id.clone().filter(|v| !v.trim().is_empty());
        let secret = cfg
            .google_client_secret
            .clone()
            .filter(|v| !v.trim().is_empty());
        match (id, secret) {
            (Some(id), Some(secret)) => {
                Self::new(id, secret, cfg.google_redirect_url()).map(Some)
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleOAuthClient {
    fn authorization_url(&self) -> (String, String) {
        let (url, state) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new("profile".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .add_extra_param("prompt", "select_account")
            .url();
        (url.to_string(), state.secret().clone())
    }

    async fn exchange_code(&self, code: &str) -> Result<GoogleProfile, OAuthError> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                error!(error = %e, "Google token exchange failed");
                OAuthError::TokenExchange(e.to_string())
            })?;

        let response = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(token.access_token().secret())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::UserInfo(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OAuthError::UserInfo(format!(
                "userinfo returned HTTP {}",
                response.status()
            )));
        }

        let profile: GoogleProfile = response
            .json()
            .await
            .map_err(|e| OAuthError::UserInfo(e.to_string()))?;
        info!(google_id = %profile.id, "Google profile fetched");
        Ok(profile)
    }
}
