use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::entities::product::{self, Entity as ProductEntity, Model as ProductModel};
use crate::errors::ServiceError;

fn validate_price(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        return Err(ValidationError::new("price_negative"));
    }
    Ok(())
}

/// Catalog entry to insert
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[validate(custom = "validate_price")]
    pub price: Decimal,
    #[serde(default)]
    pub image: String,
    #[validate(length(min = 1, max = 100))]
    pub category: String,
}

#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Lists products newest first, optionally restricted to one category
    #[instrument(skip(self))]
    pub async fn list(&self, category: Option<&str>) -> Result<Vec<ProductModel>, ServiceError> {
        let mut query = ProductEntity::find().order_by_desc(product::Column::CreatedAt);
        if let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) {
            query = query.filter(product::Column::Category.eq(category));
        }
        Ok(query.all(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: Uuid) -> Result<ProductModel, ServiceError> {
        ProductEntity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
    }

    /// Inserts a catalog entry; used by the seeding CLI
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: NewProduct) -> Result<ProductModel, ServiceError> {
        input.validate()?;
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            description: Set(input.description),
            price: Set(input.price),
            image: Set(input.image),
            category: Set(input.category.trim().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %model.id, "product created");
        Ok(model)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<ProductModel>, ServiceError> {
        Ok(ProductEntity::find()
            .filter(product::Column::Name.eq(name.trim()))
            .one(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn negative_price_is_invalid() {
        let input = NewProduct {
            name: "Lime Pickle".into(),
            description: String::new(),
            price: dec!(-1),
            image: String::new(),
            category: "pickles".into(),
        };
        assert!(input.validate().is_err());
        assert!(NewProduct { price: dec!(180), ..input }.validate().is_ok());
    }
}
