use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::cart_item::{self, Entity as CartItemEntity};
use crate::entities::product::{Entity as ProductEntity, Model as ProductModel};
use crate::errors::ServiceError;

/// One cart line with its product
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product: ProductModel,
    pub quantity: i32,
}

/// Per-user shopping cart; one row per (user, product)
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Cart lines, oldest first
    #[instrument(skip(self))]
    pub async fn lines(&self, user_id: Uuid) -> Result<Vec<CartLine>, ServiceError> {
        let rows = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .find_also_related(ProductEntity)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(item, product)| {
                product.map(|product| CartLine {
                    product,
                    quantity: item.quantity,
                })
            })
            .collect())
    }

    /// Adds `quantity` of a product, incrementing an existing line
    #[instrument(skip(self))]
    pub async fn add(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Vec<CartLine>, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Valid quantity is required".to_string(),
            ));
        }
        ProductEntity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;

        let now = Utc::now();
        let line = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
        };
        CartItemEntity::insert(line)
            .on_conflict(
                OnConflict::columns([cart_item::Column::UserId, cart_item::Column::ProductId])
                    .value(
                        cart_item::Column::Quantity,
                        Expr::col((CartItemEntity, cart_item::Column::Quantity)).add(quantity),
                    )
                    .value(cart_item::Column::UpdatedAt, Expr::value(now))
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        info!(%user_id, %product_id, quantity, "added to cart");
        self.lines(user_id).await
    }

    /// Sets a line's quantity; zero or less removes the line
    #[instrument(skip(self))]
    pub async fn update(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Vec<CartLine>, ServiceError> {
        if quantity <= 0 {
            return self.remove(user_id, product_id).await;
        }

        let result = CartItemEntity::update_many()
            .col_expr(cart_item::Column::Quantity, Expr::value(quantity))
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound("Item not found in cart".to_string()));
        }
        self.lines(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<Vec<CartLine>, ServiceError> {
        CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;
        self.lines(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<(), ServiceError> {
        Self::clear_with(&*self.db, user_id).await?;
        Ok(())
    }

    /// Empties a cart on `conn`, which may be an open transaction
    pub async fn clear_with<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}
