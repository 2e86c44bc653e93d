use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{AppendHeaders, IntoResponse, Json, Redirect, Response},
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::auth::{
    cleared_oauth_state_cookie, cookie_value, oauth_state_cookie, AuthUser, OAUTH_STATE_COOKIE,
};
use crate::errors::ServiceError;
use crate::services::users::UserProfile;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by Google when the user denies consent
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdatePhoneRequest {
    #[validate(length(min = 10, max = 20, message = "Phone number is required"))]
    pub phone: String,
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/google", get(google_login))
        .route("/google/callback", get(google_callback))
        .route("/me", get(me))
        .route("/logout", get(logout))
        .route("/update-phone", put(update_phone))
}

/// Redirect back to the frontend carrying a sign-in error code
fn frontend_error(state: &AppState, code: &str) -> Response {
    (
        AppendHeaders([(header::SET_COOKIE, cleared_oauth_state_cookie())]),
        Redirect::to(&format!("{}?error={}", state.config.frontend_base(), code)),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/api/auth/google",
    summary = "Start Google sign-in",
    responses(
        (status = 303, description = "Redirect to the Google consent page"),
        (status = 500, description = "Google sign-in is not configured", body = crate::errors::ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn google_login(State(state): State<AppState>) -> Result<Response, ServiceError> {
    let identity = state.identity.as_ref().ok_or_else(|| {
        ServiceError::InternalError("Google sign-in is not configured".to_string())
    })?;
    let (url, csrf_state) = identity.authorization_url();
    Ok((
        AppendHeaders([(
            header::SET_COOKIE,
            oauth_state_cookie(&csrf_state, state.config.session_cookie_secure),
        )]),
        Redirect::to(&url),
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/api/auth/google/callback",
    summary = "Finish Google sign-in",
    params(CallbackQuery),
    responses(
        (status = 303, description = "Redirect to the frontend with `success=true` or `error=<code>`")
    ),
    tag = "Auth"
)]
pub async fn google_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    if let Some(err) = query.error.as_deref() {
        warn!(error = err, "Google returned an error to the callback");
    }
    let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
        return frontend_error(&state, "no_code");
    };

    let expected = cookie_value(&headers, OAUTH_STATE_COOKIE);
    if expected.is_none() || expected != query.state.as_deref() {
        warn!("OAuth state mismatch on callback");
        return frontend_error(&state, "invalid_state");
    }

    let Some(identity) = state.identity.as_ref() else {
        return frontend_error(&state, "server_error");
    };
    let profile = match identity.exchange_code(code).await {
        Ok(profile) => profile,
        Err(err) => {
            error!(error = %err, "Google sign-in failed");
            return frontend_error(&state, "token_failed");
        }
    };

    let session = async {
        let user = state.services.users.upsert_google(&profile).await?;
        let token = state.sessions.issue(user.id)?;
        Ok::<_, ServiceError>((user, token))
    }
    .await;

    match session {
        Ok((user, token)) => {
            info!(user_id = %user.id, "user signed in");
            (
                AppendHeaders([
                    (header::SET_COOKIE, state.sessions.session_cookie(&token)),
                    (header::SET_COOKIE, cleared_oauth_state_cookie()),
                ]),
                Redirect::to(&format!("{}?success=true", state.config.frontend_base())),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "could not establish session");
            frontend_error(&state, "server_error")
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    summary = "Current user",
    responses(
        (status = 200, description = "Signed-in user", body = ApiResponse<UserProfile>),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn me(AuthUser(user): AuthUser) -> Json<ApiResponse<UserProfile>> {
    Json(ApiResponse::success(user.into()))
}

#[utoipa::path(
    get,
    path = "/api/auth/logout",
    summary = "Sign out",
    responses((status = 303, description = "Session cookie cleared, redirect to the frontend")),
    tag = "Auth"
)]
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        AppendHeaders([(header::SET_COOKIE, state.sessions.cleared_cookie())]),
        Redirect::to(state.config.frontend_base()),
    )
}

#[utoipa::path(
    put,
    path = "/api/auth/update-phone",
    summary = "Store the user's phone number",
    request_body = UpdatePhoneRequest,
    responses(
        (status = 200, description = "Updated user", body = ApiResponse<UserProfile>),
        (status = 400, description = "Invalid phone number", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn update_phone(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<UpdatePhoneRequest>,
) -> Result<Json<ApiResponse<UserProfile>>, ServiceError> {
    payload.validate()?;
    let user = state.services.users.update_phone(user.id, &payload.phone).await?;
    Ok(Json(ApiResponse::success(user.into())))
}
