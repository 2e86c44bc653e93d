use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::services::payment_verification::VerificationResult;
use crate::services::payments::{OnlineOrderInput, PaymentSession};
use crate::{ApiResponse, AppState};

/// Targets an existing order for a new payment session
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaymentRequest {
    pub order_id: Uuid,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
}

type SessionResponse = Result<(StatusCode, Json<ApiResponse<PaymentSession>>), ServiceError>;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/create-order", post(create_order))
        .route("/create-cod-payment", post(create_cod_payment))
        .route("/retry-payment", post(retry_payment))
        .route("/verify/:order_id", get(verify_payment))
        // Signature-verified rather than session-authenticated
        .route("/webhook", post(super::payment_webhooks::payment_webhook))
}

#[utoipa::path(
    post,
    path = "/api/payments/create-order",
    summary = "Create an online order",
    description = "Creates a `pending` online order and opens a hosted checkout session for it.",
    request_body = OnlineOrderInput,
    responses(
        (status = 201, description = "Payment session created", body = ApiResponse<PaymentSession>),
        (status = 400, description = "Invalid order or rejected by the gateway", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse),
        (status = 500, description = "Gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<OnlineOrderInput>,
) -> SessionResponse {
    payload.validate()?;
    let session = state
        .services
        .payments
        .create_online_order(&user, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

#[utoipa::path(
    post,
    path = "/api/payments/create-cod-payment",
    summary = "Pay a cash-on-delivery order online",
    request_body = OrderPaymentRequest,
    responses(
        (status = 201, description = "Payment session created", body = ApiResponse<PaymentSession>),
        (status = 400, description = "Order cannot be converted", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_cod_payment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<OrderPaymentRequest>,
) -> SessionResponse {
    payload.validate()?;
    let session = state
        .services
        .payments
        .convert_cod(&user, payload.order_id, payload.phone.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

#[utoipa::path(
    post,
    path = "/api/payments/retry-payment",
    summary = "Retry an online payment",
    request_body = OrderPaymentRequest,
    responses(
        (status = 201, description = "Payment session created", body = ApiResponse<PaymentSession>),
        (status = 400, description = "Order cannot be paid", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<OrderPaymentRequest>,
) -> SessionResponse {
    payload.validate()?;
    let session = state
        .services
        .payments
        .retry(&user, payload.order_id, payload.phone.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

#[utoipa::path(
    get,
    path = "/api/payments/verify/{order_id}",
    summary = "Verify a payment with the gateway",
    params(("order_id" = Uuid, Path, description = "Internal order id")),
    responses(
        (status = 200, description = "Verified order", body = ApiResponse<VerificationResult>),
        (status = 400, description = "Order has no payment session", body = crate::errors::ErrorResponse),
        (status = 403, description = "Neither owner nor admin", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<VerificationResult>>, ServiceError> {
    let result = state.services.verifier.verify_order(&user, order_id).await?;
    Ok(Json(ApiResponse::success(result)))
}
