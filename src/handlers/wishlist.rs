use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::product::Model as Product;
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WishlistRequest {
    pub product_id: Uuid,
}

pub fn wishlist_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_wishlist))
        .route("/add", post(add_to_wishlist))
        .route("/remove/:product_id", delete(remove_from_wishlist))
}

#[utoipa::path(
    get,
    path = "/api/wishlist",
    summary = "Wishlisted products",
    responses(
        (status = 200, description = "Products", body = ApiResponse<Vec<Product>>),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorResponse)
    ),
    tag = "Wishlist"
)]
pub async fn get_wishlist(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ApiResponse<Vec<Product>>>, ServiceError> {
    Ok(Json(ApiResponse::success(
        state.services.wishlist.products(user.id).await?,
    )))
}

#[utoipa::path(
    post,
    path = "/api/wishlist/add",
    summary = "Add to wishlist",
    request_body = WishlistRequest,
    responses(
        (status = 200, description = "Updated wishlist", body = ApiResponse<Vec<Product>>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Wishlist"
)]
pub async fn add_to_wishlist(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<WishlistRequest>,
) -> Result<Json<ApiResponse<Vec<Product>>>, ServiceError> {
    let products = state
        .services
        .wishlist
        .add(user.id, payload.product_id)
        .await?;
    Ok(Json(ApiResponse::success(products)))
}

#[utoipa::path(
    delete,
    path = "/api/wishlist/remove/{product_id}",
    summary = "Remove from wishlist",
    params(("product_id" = Uuid, Path, description = "Product id")),
    responses((status = 200, description = "Updated wishlist", body = ApiResponse<Vec<Product>>)),
    tag = "Wishlist"
)]
pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Product>>>, ServiceError> {
    let products = state.services.wishlist.remove(user.id, product_id).await?;
    Ok(Json(ApiResponse::success(products)))
}
