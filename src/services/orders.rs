use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveEnum, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{
    self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus,
};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::entities::product::{self, Entity as ProductEntity};
use crate::entities::user::{self, Entity as UserEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::pricing::{LineItemInput, PriceResolver};

/// Optimistic writes retried this many times before giving up
const MAX_WRITE_ATTEMPTS: usize = 3;

/// Order owner as shown on order views
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductSummary {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: Uuid,
    /// `None` when the product has since been removed from the catalog
    pub product: Option<ProductSummary>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub gateway_order_id: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub payment_details: Option<Value>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Fully populated order: owner, products and payment sub-record
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    pub id: Uuid,
    pub user: Option<OrderUser>,
    pub items: Vec<OrderLine>,
    pub total_amount: Decimal,
    pub address: String,
    pub status: OrderStatus,
    pub payment: PaymentInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub items: Vec<LineItemInput>,
    pub address: String,
    pub payment_method: PaymentMethod,
}

/// A change to an order's payment sub-record
#[derive(Debug, Clone)]
pub struct PaymentWrite {
    pub status: PaymentStatus,
    pub method: Option<PaymentMethod>,
    pub gateway_order_id: Option<String>,
    pub transaction_id: Option<String>,
    /// Merged key by key into `payment_details`
    pub details: Map<String, Value>,
}

impl PaymentWrite {
    pub fn status(status: PaymentStatus) -> Self {
        Self {
            status,
            method: None,
            gateway_order_id: None,
            transaction_id: None,
            details: Map::new(),
        }
    }
}

/// Merges `new` into the existing details object; non-object values are replaced
pub fn merge_payment_details(existing: Option<&Value>, new: Map<String, Value>) -> Value {
    let mut merged = match existing {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    merged.extend(new);
    Value::Object(merged)
}

/// Persistence for orders and their items
#[derive(Clone)]
pub struct OrderStore {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderStore {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Prices and persists a new order with its items in one transaction.
    ///
    /// Online orders start `pending`; COD orders start `placed`.
    #[instrument(skip(self, input), fields(user_id = %input.user_id, payment_method = %input.payment_method))]
    pub async fn create(&self, input: NewOrder) -> Result<OrderDetails, ServiceError> {
        let address = input.address.trim().to_string();
        if address.is_empty() {
            return Err(ServiceError::ValidationError(
                "Delivery address is required".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let priced = PriceResolver::resolve(&txn, &input.items).await?;

        let status = match input.payment_method {
            PaymentMethod::CashOnDelivery => OrderStatus::Placed,
            PaymentMethod::Online => OrderStatus::Pending,
        };
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(input.user_id),
            total_amount: Set(priced.total_amount),
            address: Set(address),
            status: Set(status),
            payment_method: Set(input.payment_method),
            payment_status: Set(PaymentStatus::Pending),
            transaction_id: Set(None),
            gateway_order_id: Set(None),
            payment_details: Set(None),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let items = priced.lines.iter().map(|line| order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
        });
        OrderItemEntity::insert_many(items)
            .exec_without_returning(&txn)
            .await?;

        txn.commit().await?;

        counter!(
            "storefront_orders.created",
            1,
            "payment_method" => input.payment_method.as_str()
        );
        info!(order_id = %order.id, total = %order.total_amount, %status, "order created");
        self.event_sender.send_or_log(Event::OrderCreated {
            order_id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount,
            payment_method: order.payment_method,
        });

        self.details(order.id).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<OrderModel, ServiceError> {
        Self::find_by_id_with(&*self.db, id).await
    }

    pub async fn find_by_id_with<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))
    }

    pub async fn find_by_gateway_order_id(
        &self,
        gateway_order_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::GatewayOrderId.eq(gateway_order_id))
            .one(&*self.db)
            .await?)
    }

    /// Populated view of one order
    pub async fn details(&self, id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = self.find_by_id(id).await?;
        self.populate_one(order).await
    }

    pub async fn populate_one(&self, order: OrderModel) -> Result<OrderDetails, ServiceError> {
        self.populate(vec![order])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::InternalError("order vanished while loading".to_string()))
    }

    /// A user's orders, newest first
    #[instrument(skip(self))]
    pub async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        self.populate(orders).await
    }

    /// Every order, newest first
    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        self.populate(orders).await
    }

    /// Moves an order to `new_status` if the transition table allows it.
    ///
    /// The write only lands if the status is still the one that was checked,
    /// so two racing transitions cannot both succeed. Re-requesting the
    /// current status is rejected like any other move outside the table.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let current = self.find_by_id(id).await?;
        if !current.status.can_transition_to(new_status) {
            warn!(from = %current.status, to = %new_status, "rejected order transition");
            return Err(ServiceError::InvalidTransition(format!(
                "order is {}, cannot move to {}",
                current.status, new_status
            )));
        }

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status.to_value()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(id))
            .filter(order::Column::Status.eq(current.status.to_value()))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            let latest = self.find_by_id(id).await?;
            return Err(ServiceError::InvalidTransition(format!(
                "order changed concurrently and is now {}",
                latest.status
            )));
        }

        info!(from = %current.status, to = %new_status, "order status updated");
        self.event_sender.send_or_log(Event::OrderStatusChanged {
            order_id: id,
            old_status: current.status,
            new_status,
        });
        self.find_by_id(id).await
    }

    /// Sets the payment status with no guard on the previous payment state.
    pub async fn update_payment_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        transaction_id: Option<String>,
        details: Option<Map<String, Value>>,
    ) -> Result<OrderModel, ServiceError> {
        let write = PaymentWrite {
            transaction_id,
            details: details.unwrap_or_default(),
            ..PaymentWrite::status(status)
        };
        self.apply_payment_write(id, &write).await
    }

    /// Applies a payment write, re-reading and retrying if the payment state
    /// moved between read and write.
    #[instrument(skip(self, write), fields(status = %write.status))]
    pub async fn apply_payment_write(
        &self,
        id: Uuid,
        write: &PaymentWrite,
    ) -> Result<OrderModel, ServiceError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let observed = self.find_by_id(id).await?;
            if Self::write_payment_with(&*self.db, &observed, write).await? {
                return self.find_by_id(id).await;
            }
        }
        error!(order_id = %id, "payment write kept conflicting");
        Err(ServiceError::InternalError(
            "order payment state changed concurrently".to_string(),
        ))
    }

    /// Applies `write` only if the payment is still in the state `observed`
    /// was checked against; any change in between is an `InvalidTransition`.
    #[instrument(skip(self, observed, write), fields(order_id = %observed.id, status = %write.status))]
    pub async fn apply_payment_write_over(
        &self,
        observed: &OrderModel,
        write: &PaymentWrite,
    ) -> Result<OrderModel, ServiceError> {
        if !Self::write_payment_with(&*self.db, observed, write).await? {
            let latest = self.find_by_id(observed.id).await?;
            warn!(
                expected = %observed.payment_status,
                found = %latest.payment_status,
                "payment changed while the write was prepared"
            );
            return Err(ServiceError::InvalidTransition(format!(
                "payment changed concurrently and is now {}",
                latest.payment_status
            )));
        }
        self.find_by_id(observed.id).await
    }

    /// Writes `write` over `observed` on `conn`. Returns `false`, writing
    /// nothing, when the stored payment status no longer matches `observed`.
    pub async fn write_payment_with<C: ConnectionTrait>(
        conn: &C,
        observed: &OrderModel,
        write: &PaymentWrite,
    ) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let details = merge_payment_details(observed.payment_details.as_ref(), write.details.clone());

        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(write.status.to_value()))
            .col_expr(order::Column::PaymentDetails, Expr::value(details))
            .col_expr(order::Column::UpdatedAt, Expr::value(now));
        if let Some(method) = write.method {
            update = update.col_expr(order::Column::PaymentMethod, Expr::value(method.to_value()));
        }
        if let Some(gateway_order_id) = &write.gateway_order_id {
            update = update.col_expr(
                order::Column::GatewayOrderId,
                Expr::value(gateway_order_id.clone()),
            );
        }
        if let Some(transaction_id) = &write.transaction_id {
            update = update.col_expr(
                order::Column::TransactionId,
                Expr::value(transaction_id.clone()),
            );
        }
        if write.status == PaymentStatus::Completed && observed.paid_at.is_none() {
            update = update.col_expr(order::Column::PaidAt, Expr::value(now));
        }

        let result = update
            .filter(order::Column::Id.eq(observed.id))
            .filter(order::Column::PaymentStatus.eq(observed.payment_status.to_value()))
            .exec(conn)
            .await?;

        if result.rows_affected > 0 {
            counter!(
                "storefront_payments.status_updates",
                1,
                "status" => write.status.as_str()
            );
        }
        Ok(result.rows_affected > 0)
    }

    /// Joins owners, items and products onto `orders`, preserving their order
    async fn populate(&self, orders: Vec<OrderModel>) -> Result<Vec<OrderDetails>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let db = &*self.db;

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .all(db)
            .await?;

        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let products: HashMap<Uuid, product::Model> = if product_ids.is_empty() {
            HashMap::new()
        } else {
            ProductEntity::find()
                .filter(product::Column::Id.is_in(product_ids))
                .all(db)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect()
        };

        let user_ids: Vec<Uuid> = orders.iter().map(|o| o.user_id).collect();
        let users: HashMap<Uuid, user::Model> = UserEntity::find()
            .filter(user::Column::Id.is_in(user_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        let mut lines_by_order: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for item in items {
            let product = products.get(&item.product_id).map(|p| ProductSummary {
                id: p.id,
                name: p.name.clone(),
                price: p.price,
                image: p.image.clone(),
            });
            lines_by_order.entry(item.order_id).or_default().push(OrderLine {
                product_id: item.product_id,
                product,
                quantity: item.quantity,
                unit_price: item.unit_price,
            });
        }

        Ok(orders
            .into_iter()
            .map(|o| OrderDetails {
                user: users.get(&o.user_id).map(|u| OrderUser {
                    id: u.id,
                    name: u.name.clone(),
                    email: u.email.clone(),
                }),
                items: lines_by_order.remove(&o.id).unwrap_or_default(),
                id: o.id,
                total_amount: o.total_amount,
                address: o.address,
                status: o.status,
                payment: PaymentInfo {
                    method: o.payment_method,
                    status: o.payment_status,
                    transaction_id: o.transaction_id,
                    gateway_order_id: o.gateway_order_id,
                    payment_details: o.payment_details,
                    paid_at: o.paid_at,
                },
                created_at: o.created_at,
                updated_at: o.updated_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn merge_keeps_earlier_keys() {
        let existing = json!({"original_method": "cash_on_delivery", "attempts": 1});
        let merged = merge_payment_details(
            Some(&existing),
            map(json!({"attempts": 2, "gateway_order_id": "ord_1"})),
        );
        assert_eq!(
            merged,
            json!({"original_method": "cash_on_delivery", "attempts": 2, "gateway_order_id": "ord_1"})
        );
    }

    #[test]
    fn merge_replaces_non_object_details() {
        let merged = merge_payment_details(Some(&json!("legacy")), map(json!({"a": 1})));
        assert_eq!(merged, json!({"a": 1}));
        assert_eq!(merge_payment_details(None, Map::new()), json!({}));
    }
}
