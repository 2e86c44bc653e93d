use axum::{extract::State, http::HeaderMap, response::Json};
use bytes::Bytes;

use crate::errors::ServiceError;
use crate::gateway::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::services::payment_verification::WebhookOutcome;
use crate::{ApiResponse, AppState};

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

// The body is taken raw: the signature covers the exact bytes sent.
#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    summary = "Gateway payment notification",
    request_body(content = String, description = "Raw JSON payload as signed by the gateway"),
    params(
        ("x-webhook-signature" = String, Header, description = "base64 HMAC-SHA256 of timestamp and body"),
        ("x-webhook-timestamp" = String, Header, description = "Unix timestamp, seconds or milliseconds")
    ),
    responses(
        (status = 200, description = "Delivery acknowledged", body = ApiResponse<WebhookOutcome>),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookOutcome>>, ServiceError> {
    let outcome = state
        .services
        .verifier
        .handle_webhook(
            header_str(&headers, SIGNATURE_HEADER),
            header_str(&headers, TIMESTAMP_HEADER),
            &body,
        )
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}
