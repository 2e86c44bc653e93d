use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use tracing::instrument;
use uuid::Uuid;

use crate::entities::product::{Entity as ProductEntity, Model as ProductModel};
use crate::entities::wishlist_item::{self, Entity as WishlistEntity};
use crate::errors::ServiceError;

#[derive(Clone)]
pub struct WishlistService {
    db: Arc<DatabaseConnection>,
}

impl WishlistService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Wishlisted products, most recently added first
    #[instrument(skip(self))]
    pub async fn products(&self, user_id: Uuid) -> Result<Vec<ProductModel>, ServiceError> {
        let rows = WishlistEntity::find()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .order_by_desc(wishlist_item::Column::CreatedAt)
            .find_also_related(ProductEntity)
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().filter_map(|(_, product)| product).collect())
    }

    /// Adds a product; adding it twice keeps a single entry
    #[instrument(skip(self))]
    pub async fn add(&self, user_id: Uuid, product_id: Uuid) -> Result<Vec<ProductModel>, ServiceError> {
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;

        let entry = wishlist_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            created_at: Set(Utc::now()),
        };
        WishlistEntity::insert(entry)
            .on_conflict(
                OnConflict::columns([
                    wishlist_item::Column::UserId,
                    wishlist_item::Column::ProductId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        self.products(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<Vec<ProductModel>, ServiceError> {
        WishlistEntity::delete_many()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;
        self.products(user_id).await
    }
}
