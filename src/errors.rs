use std::future::Future;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

tokio::task_local! {
    static EXPOSE_INTERNAL_DETAILS: bool;
}

/// Runs `future` with internal error details either exposed or hidden in responses.
pub async fn scope_error_details<Fut, R>(expose: bool, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    EXPOSE_INTERNAL_DETAILS.scope(expose, future).await
}

fn internal_details_exposed() -> bool {
    EXPOSE_INTERNAL_DETAILS.try_with(|expose| *expose).unwrap_or(false)
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Invalid transition: order is already completed",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2025-01-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Gateway error body, or internal diagnostics when running in development mode
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Payment gateway error: {message}")]
    PaymentGateway {
        message: String,
        /// The provider blamed the request rather than itself.
        client_fault: bool,
        details: Option<Value>,
    },

    #[error("Signature error: {0}")]
    SignatureError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) | Self::InvalidTransition(_) | Self::SignatureError(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::AuthError(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PaymentGateway { client_fault, .. } => {
                if *client_fault {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            Self::InternalError(_) | Self::DatabaseError(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Errors whose message describes server internals rather than the request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::InternalError(_) | Self::DatabaseError(_) | Self::Other(_)
        )
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return a generic message to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        if self.is_internal() {
            return "Internal server error".to_string();
        }
        self.to_string()
    }

    fn response_details(&self) -> Option<Value> {
        match self {
            Self::PaymentGateway { details, .. } => details.clone(),
            err if err.is_internal() && internal_details_exposed() => {
                Some(Value::String(err.to_string()))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed with server error");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.response_details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn payload(response: Response) -> ErrorResponse {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(payload(response).await.request_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn taxonomy_status_codes() {
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::AuthError("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InvalidTransition("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::SignatureError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn gateway_status_depends_on_fault() {
        let client = ServiceError::PaymentGateway {
            message: "bad phone".into(),
            client_fault: true,
            details: None,
        };
        let provider = ServiceError::PaymentGateway {
            message: "upstream down".into(),
            client_fault: false,
            details: None,
        };
        assert_eq!(client.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(provider.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn internal_details_hidden_by_default() {
        let response = ServiceError::InternalError("pool exhausted".into()).into_response();
        let body = payload(response).await;
        assert_eq!(body.message, "Internal server error");
        assert!(body.details.is_none());
    }

    #[tokio::test]
    async fn internal_details_exposed_in_scope() {
        let response = scope_error_details(true, async {
            ServiceError::InternalError("pool exhausted".into()).into_response()
        })
        .await;
        let body = payload(response).await;
        assert_eq!(body.message, "Internal server error");
        assert_eq!(
            body.details,
            Some(json!("Internal error: pool exhausted"))
        );
    }

    #[tokio::test]
    async fn gateway_body_is_attached() {
        let response = ServiceError::PaymentGateway {
            message: "order_amount invalid".into(),
            client_fault: true,
            details: Some(json!({"code": "order_amount_invalid"})),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = payload(response).await;
        assert_eq!(body.details, Some(json!({"code": "order_amount_invalid"})));
    }
}
