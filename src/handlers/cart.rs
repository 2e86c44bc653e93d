use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::services::cart::CartLine;
use crate::{ApiResponse, AppState};

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, message = "Valid quantity is required"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartRequest {
    /// Zero or less removes the line
    pub quantity: i32,
}

type CartResponse = Result<Json<ApiResponse<Vec<CartLine>>>, ServiceError>;

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/add", post(add_to_cart))
        .route("/update/:product_id", put(update_cart_item))
        .route("/remove/:product_id", delete(remove_cart_item))
        .route("/clear", delete(clear_cart))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    summary = "Current cart",
    responses(
        (status = 200, description = "Cart lines with products", body = ApiResponse<Vec<CartLine>>),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn get_cart(State(state): State<AppState>, AuthUser(user): AuthUser) -> CartResponse {
    Ok(Json(ApiResponse::success(state.services.cart.lines(user.id).await?)))
}

#[utoipa::path(
    post,
    path = "/api/cart/add",
    summary = "Add to cart",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<Vec<CartLine>>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<AddToCartRequest>,
) -> CartResponse {
    payload.validate()?;
    let lines = state
        .services
        .cart
        .add(user.id, payload.product_id, payload.quantity)
        .await?;
    Ok(Json(ApiResponse::success(lines)))
}

#[utoipa::path(
    put,
    path = "/api/cart/update/{product_id}",
    summary = "Set a line's quantity",
    params(("product_id" = Uuid, Path, description = "Product id")),
    request_body = UpdateCartRequest,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<Vec<CartLine>>),
        (status = 404, description = "Item not in cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateCartRequest>,
) -> CartResponse {
    let lines = state
        .services
        .cart
        .update(user.id, product_id, payload.quantity)
        .await?;
    Ok(Json(ApiResponse::success(lines)))
}

#[utoipa::path(
    delete,
    path = "/api/cart/remove/{product_id}",
    summary = "Remove a line",
    params(("product_id" = Uuid, Path, description = "Product id")),
    responses((status = 200, description = "Updated cart", body = ApiResponse<Vec<CartLine>>)),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(product_id): Path<Uuid>,
) -> CartResponse {
    Ok(Json(ApiResponse::success(
        state.services.cart.remove(user.id, product_id).await?,
    )))
}

#[utoipa::path(
    delete,
    path = "/api/cart/clear",
    summary = "Empty the cart",
    responses((status = 200, description = "Empty cart", body = ApiResponse<Vec<CartLine>>)),
    tag = "Cart"
)]
pub async fn clear_cart(State(state): State<AppState>, AuthUser(user): AuthUser) -> CartResponse {
    state.services.cart.clear(user.id).await?;
    Ok(Json(ApiResponse::success(Vec::new())))
}
