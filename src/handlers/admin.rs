use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use tracing::info;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::errors::ServiceError;
use crate::services::orders::OrderDetails;
use crate::{ApiResponse, AppState};

type OrderResponse = Result<Json<ApiResponse<OrderDetails>>, ServiceError>;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/place", post(place_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/complete", post(complete_order))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders",
    summary = "All orders",
    responses(
        (status = 200, description = "Orders, newest first", body = ApiResponse<Vec<OrderDetails>>),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin access required", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<ApiResponse<Vec<OrderDetails>>>, ServiceError> {
    Ok(Json(ApiResponse::success(state.services.orders.list_all().await?)))
}

#[utoipa::path(
    get,
    path = "/api/admin/orders/{id}",
    summary = "One order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = ApiResponse<OrderDetails>),
        (status = 403, description = "Admin access required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn get_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> OrderResponse {
    Ok(Json(ApiResponse::success(state.services.orders.details(id).await?)))
}

#[utoipa::path(
    post,
    path = "/api/admin/orders/{id}/place",
    summary = "Place a pending order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Placed order", body = ApiResponse<OrderDetails>),
        (status = 400, description = "Order is not pending", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn place_order(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> OrderResponse {
    let order = state.services.order_status.place(id).await?;
    info!(admin_id = %admin.id, order_id = %id, "order placed by admin");
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/admin/orders/{id}/cancel",
    summary = "Cancel an order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Cancelled order", body = ApiResponse<OrderDetails>),
        (status = 400, description = "Order is already completed or cancelled", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> OrderResponse {
    let order = state.services.order_status.cancel(id).await?;
    info!(admin_id = %admin.id, order_id = %id, "order cancelled by admin");
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/admin/orders/{id}/complete",
    summary = "Complete a placed order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Completed order", body = ApiResponse<OrderDetails>),
        (status = 400, description = "Order is not placed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn complete_order(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
) -> OrderResponse {
    let order = state.services.order_status.complete(id).await?;
    info!(admin_id = %admin.id, order_id = %id, "order completed by admin");
    Ok(Json(ApiResponse::success(order)))
}
