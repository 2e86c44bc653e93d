use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::entities::product::Model as Product;
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProductQuery {
    /// Exact category tag, e.g. `pickles`
    pub category: Option<String>,
}

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
}

#[utoipa::path(
    get,
    path = "/api/products",
    summary = "List products",
    params(ProductQuery),
    responses(
        (status = 200, description = "Products, newest first", body = ApiResponse<Vec<Product>>)
    ),
    tag = "Products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<ApiResponse<Vec<Product>>>, ServiceError> {
    let category = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let products = state.services.products.list(category).await?;
    Ok(Json(ApiResponse::success(products)))
}

#[utoipa::path(
    get,
    path = "/api/products/{id}",
    summary = "Get a product",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = ApiResponse<Product>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Product>>, ServiceError> {
    Ok(Json(ApiResponse::success(state.services.products.get(id).await?)))
}
