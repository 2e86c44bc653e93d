use tracing::instrument;
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::entities::user::Model as UserModel;
use crate::errors::ServiceError;
use crate::services::orders::{OrderDetails, OrderStore};
use crate::services::payments::ensure_owner;

/// Order Status Controller: admin transitions plus the owner's own cancel.
#[derive(Clone)]
pub struct OrderStatusController {
    orders: OrderStore,
}

impl OrderStatusController {
    pub fn new(orders: OrderStore) -> Self {
        Self { orders }
    }

    /// pending → placed
    #[instrument(skip(self))]
    pub async fn place(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        self.transition(order_id, OrderStatus::Placed).await
    }

    /// pending | placed → cancelled
    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        self.transition(order_id, OrderStatus::Cancelled).await
    }

    /// placed → completed
    #[instrument(skip(self))]
    pub async fn complete(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        self.transition(order_id, OrderStatus::Completed).await
    }

    /// Owners may only cancel orders that have not been placed yet.
    #[instrument(skip(self, caller), fields(caller_id = %caller.id))]
    pub async fn user_cancel(
        &self,
        caller: &UserModel,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let order = self.orders.find_by_id(order_id).await?;
        ensure_owner(&order, caller)?;
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidTransition(format!(
                "order is {}, only pending orders can be cancelled",
                order.status
            )));
        }
        self.transition(order_id, OrderStatus::Cancelled).await
    }

    async fn transition(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<OrderDetails, ServiceError> {
        let order = self.orders.update_status(order_id, status).await?;
        self.orders.populate_one(order).await
    }
}
