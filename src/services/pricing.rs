use std::collections::HashMap;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::product::{self, Entity as ProductEntity};
use crate::errors::ServiceError;

/// A requested order line. Prices are never taken from the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineItemInput {
    pub product_id: Uuid,
    pub quantity: Option<i32>,
}

/// A line with its authoritative unit price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedOrder {
    pub lines: Vec<PricedLine>,
    pub total_amount: Decimal,
}

/// Σ(price × quantity) over the priced lines
pub fn compute_total(lines: &[PricedLine]) -> Decimal {
    lines
        .iter()
        .map(|line| line.unit_price * Decimal::from(line.quantity))
        .sum()
}

/// Prices order lines from the current catalog in a single lookup.
pub struct PriceResolver;

impl PriceResolver {
    /// Fails with a validation error for an empty list, a line without a
    /// positive quantity, or an unknown product.
    #[instrument(skip(conn, items), fields(lines = items.len()))]
    pub async fn resolve<C: ConnectionTrait>(
        conn: &C,
        items: &[LineItemInput],
    ) -> Result<PricedOrder, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one item".to_string(),
            ));
        }

        let mut quantities = Vec::with_capacity(items.len());
        for item in items {
            let quantity = item.quantity.ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Quantity is required for product {}",
                    item.product_id
                ))
            })?;
            if quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for product {} must be at least 1",
                    item.product_id
                )));
            }
            quantities.push((item.product_id, quantity));
        }

        let ids: Vec<Uuid> = quantities.iter().map(|(id, _)| *id).collect();
        let prices: HashMap<Uuid, Decimal> = ProductEntity::find()
            .filter(product::Column::Id.is_in(ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p.price))
            .collect();

        let lines = quantities
            .into_iter()
            .map(|(product_id, quantity)| {
                let unit_price = prices.get(&product_id).copied().ok_or_else(|| {
                    warn!(%product_id, "order references unknown product");
                    ServiceError::ValidationError(format!("Product {} not found", product_id))
                })?;
                Ok(PricedLine {
                    product_id,
                    quantity,
                    unit_price,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        Ok(PricedOrder {
            total_amount: compute_total(&lines),
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn line(price: Decimal, quantity: i32) -> PricedLine {
        PricedLine {
            product_id: Uuid::new_v4(),
            quantity,
            unit_price: price,
        }
    }

    #[test]
    fn total_of_scenario_cart() {
        assert_eq!(compute_total(&[line(dec!(100), 2)]), dec!(200));
        assert_eq!(
            compute_total(&[line(dec!(250), 1), line(dec!(180.50), 3)]),
            dec!(791.50)
        );
        assert_eq!(compute_total(&[]), Decimal::ZERO);
    }

    proptest! {
        #[test]
        fn total_is_sum_of_line_products(
            lines in proptest::collection::vec((0i64..1_000_000, 1i32..50), 1..20)
        ) {
            let priced: Vec<PricedLine> = lines
                .iter()
                .map(|(paise, qty)| line(Decimal::new(*paise, 2), *qty))
                .collect();
            let expected_paise: i64 = lines.iter().map(|(p, q)| p * i64::from(*q)).sum();
            prop_assert_eq!(compute_total(&priced), Decimal::new(expected_paise, 2));
        }
    }
}
