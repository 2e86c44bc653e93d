//! Storefront API Library
//!
//! Backend for a pickle and home-food storefront: Google sign-in, catalog,
//! cart, wishlist, orders and hosted online payments.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use std::sync::Arc;

use axum::{
    http::{header, Method},
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use http::HeaderValue;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer};
use utoipa::{OpenApi, ToSchema};

use crate::auth::{IdentityProvider, SessionService};
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::handlers::AppServices;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub event_sender: EventSender,
    pub services: AppServices,
    pub sessions: Arc<SessionService>,
    /// `None` when Google credentials are not configured
    pub identity: Option<Arc<dyn IdentityProvider>>,
    pub started: health::Uptime,
}

impl AppState {
    /// Builds the shared state; the payment gateway and identity provider are injected.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        identity: Option<Arc<dyn IdentityProvider>>,
        event_sender: EventSender,
    ) -> Self {
        let services = AppServices::new(
            db.clone(),
            config.clone(),
            gateway,
            event_sender.clone(),
        );
        Self {
            sessions: Arc::new(SessionService::from_config(&config)),
            db,
            config,
            event_sender,
            services,
            identity,
            started: health::Uptime::start(),
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// One CORS policy for the whole router. Credentials are always allowed, so
/// origins, methods and headers are listed explicitly outside development.
pub fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    if cfg.should_allow_permissive_cors() {
        ::tracing::info!("using permissive CORS (mirrors the request origin)");
        return CorsLayer::very_permissive();
    }

    let mut origins = cfg.cors_origins();
    if origins.is_empty() {
        origins.push(cfg.frontend_base().to_string());
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                ::tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::HeaderName::from_static(crate::tracing::REQUEST_ID_HEADER),
        ])
        .allow_credentials(true)
}

/// The complete application router: `/health`, the OpenAPI document and `/api`.
pub fn app_router(state: AppState) -> Router {
    let cfg = state.config.clone();

    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(openapi::ApiDoc::openapi()) }),
        )
        .nest("/api", handlers::api_routes())
        .layer(TimeoutLayer::new(cfg.request_timeout()))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&cfg))
        .layer(crate::tracing::http_trace_layer())
        .layer(axum::middleware::from_fn_with_state(
            cfg.expose_error_details(),
            middleware_helpers::error_details_middleware,
        ))
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn production_cors_falls_back_to_frontend_origin() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let cfg = AppConfig::new(
            "sqlite::memory:".into(),
            "a-long-and-varied-session-secret-for-tests-0123456789".into(),
            "https://shop.example.com/".into(),
            "https://api.shop.example.com".into(),
            "production".into(),
        );
        assert!(!cfg.should_allow_permissive_cors());

        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(cors_layer(&cfg));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/")
                    .header(header::ORIGIN, "https://shop.example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://shop.example.com"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }
}
