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
use crate::entities::order::PaymentMethod;
use crate::errors::ServiceError;
use crate::services::orders::{NewOrder, OrderDetails};
use crate::services::pricing::LineItemInput;
use crate::{ApiResponse, AppState};

/// Checkout request. Totals sent by the client are ignored.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<LineItemInput>,
    #[validate(length(min = 1, max = 1000, message = "Delivery address is required"))]
    pub address: String,
    /// Defaults to cash on delivery
    pub payment_method: Option<PaymentMethod>,
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/my-orders", get(my_orders))
        .route("/:id/cancel", post(cancel_order))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    summary = "Create order",
    description = "Prices every line from the catalog. Cash-on-delivery orders start `placed`, online ones `pending`.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderDetails>),
        (status = 400, description = "Invalid items or address", body = crate::errors::ErrorResponse),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderDetails>>), ServiceError> {
    payload.validate()?;
    let order = state
        .services
        .orders
        .create(NewOrder {
            user_id: user.id,
            items: payload.items,
            address: payload.address,
            payment_method: payload
                .payment_method
                .unwrap_or(PaymentMethod::CashOnDelivery),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    get,
    path = "/api/orders/my-orders",
    summary = "Own orders",
    responses(
        (status = 200, description = "Orders, newest first", body = ApiResponse<Vec<OrderDetails>>),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn my_orders(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderDetails>>>, ServiceError> {
    Ok(Json(ApiResponse::success(
        state.services.orders.find_by_user(user.id).await?,
    )))
}

#[utoipa::path(
    post,
    path = "/api/orders/{id}/cancel",
    summary = "Cancel own order",
    description = "Only orders still `pending` can be cancelled by their owner.",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Cancelled order", body = ApiResponse<OrderDetails>),
        (status = 400, description = "Order is no longer pending", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderDetails>>, ServiceError> {
    let order = state.services.order_status.user_cancel(&user, id).await?;
    Ok(Json(ApiResponse::success(order).with_message("Order cancelled")))
}
