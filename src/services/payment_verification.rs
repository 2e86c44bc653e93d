//! Payment Verifier: applies gateway-reported payment outcomes to orders.
//!
//! Outcomes arrive two ways. The poll path ([`PaymentVerifier::verify_order`])
//! asks the gateway directly; the webhook path
//! ([`PaymentVerifier::handle_webhook`]) trusts a delivery only after its
//! signature checks out. Both funnel into [`PaymentVerifier::apply`], which
//! writes the payment status and clears the cart in one transaction.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::order::{Model as OrderModel, PaymentStatus};
use crate::entities::user::Model as UserModel;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender, VerificationSource};
use crate::gateway::{verify_webhook_signature, GatewayOrderStatus, PaymentGateway};
use crate::services::cart::CartService;
use crate::services::orders::{OrderDetails, OrderStore, PaymentWrite};

/// Transactions retried this many times when a concurrent write wins
const MAX_APPLY_ATTEMPTS: usize = 3;

/// Result of polling the gateway for an order
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub order_id: Uuid,
    /// Status string as the gateway reported it
    pub gateway_status: String,
    pub payment_status: PaymentStatus,
    pub order: OrderDetails,
}

/// Acknowledgement returned to the gateway for a webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub matched: bool,
    pub order_id: Option<Uuid>,
    pub payment_status: Option<PaymentStatus>,
}

/// Fields a webhook delivery carries, independent of payload shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    pub order_id: String,
    pub internal_order_id: Option<Uuid>,
    pub status: GatewayOrderStatus,
    pub transaction_id: Option<String>,
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses either the flat `{order_id, order_status}` shape or the Cashfree
/// `{data: {order, payment}}` shape.
pub fn parse_webhook_payload(body: &[u8]) -> Result<WebhookNotification, ServiceError> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| ServiceError::ValidationError(format!("Invalid webhook payload: {}", e)))?;

    if let Some(order) = payload.pointer("/data/order") {
        let order_id = order
            .get("order_id")
            .and_then(value_to_string)
            .ok_or_else(|| ServiceError::ValidationError("Webhook is missing order_id".into()))?;
        let internal_order_id = order
            .pointer("/order_tags/internal_order_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok());
        let raw_status = payload
            .pointer("/data/payment/payment_status")
            .and_then(Value::as_str)
            .or_else(|| order.get("order_status").and_then(Value::as_str))
            .unwrap_or_default();
        let status = match raw_status.to_ascii_uppercase().as_str() {
            "SUCCESS" => GatewayOrderStatus::Paid,
            other => GatewayOrderStatus::parse(other),
        };
        let transaction_id = payload
            .pointer("/data/payment/cf_payment_id")
            .and_then(value_to_string);
        return Ok(WebhookNotification {
            order_id,
            internal_order_id,
            status,
            transaction_id,
        });
    }

    let order_id = payload
        .get("order_id")
        .and_then(value_to_string)
        .ok_or_else(|| ServiceError::ValidationError("Webhook is missing order_id".into()))?;
    let status = payload
        .get("order_status")
        .and_then(Value::as_str)
        .map(GatewayOrderStatus::parse)
        .ok_or_else(|| ServiceError::ValidationError("Webhook is missing order_status".into()))?;
    Ok(WebhookNotification {
        order_id,
        internal_order_id: None,
        status,
        transaction_id: payload.get("cf_payment_id").and_then(value_to_string),
    })
}

#[derive(Clone)]
pub struct PaymentVerifier {
    db: Arc<DatabaseConnection>,
    orders: OrderStore,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
    event_sender: EventSender,
}

impl PaymentVerifier {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: OrderStore,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            orders,
            gateway,
            config,
            event_sender,
        }
    }

    /// Poll path. Only the owner or an admin may verify an order.
    #[instrument(skip(self, caller), fields(caller_id = %caller.id))]
    pub async fn verify_order(
        &self,
        caller: &UserModel,
        order_id: Uuid,
    ) -> Result<VerificationResult, ServiceError> {
        let order = self.orders.find_by_id(order_id).await?;
        if order.user_id != caller.id && !caller.is_admin {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".to_string(),
            ));
        }
        let gateway_order_id = order.gateway_order_id.clone().ok_or_else(|| {
            ServiceError::ValidationError("Order has no payment session to verify".to_string())
        })?;

        let remote = match self.gateway.fetch_order(&gateway_order_id).await {
            Ok(remote) => remote,
            Err(err) => {
                error!(%gateway_order_id, error = %err, "gateway order lookup failed");
                return Err(err.into());
            }
        };

        let updated = self
            .apply(
                order.id,
                &remote.status,
                remote.transaction_id,
                VerificationSource::Poll,
            )
            .await?;

        Ok(VerificationResult {
            order_id: updated.id,
            gateway_status: remote.status.as_str().to_string(),
            payment_status: updated.payment_status,
            order: self.orders.populate_one(updated).await?,
        })
    }

    /// Webhook path. Nothing in the body is read until the signature is valid.
    #[instrument(skip_all, fields(body_len = body.len()))]
    pub async fn handle_webhook(
        &self,
        signature: Option<&str>,
        timestamp: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, ServiceError> {
        if let Err(err) = verify_webhook_signature(
            self.config.webhook_secret(),
            signature,
            timestamp,
            body,
            self.config.payment_webhook_tolerance_secs,
            Utc::now(),
        ) {
            counter!("storefront_payments.webhooks", 1, "outcome" => "rejected");
            warn!(error = %err, "rejected webhook delivery");
            return Err(err.into());
        }

        let notification = parse_webhook_payload(body)?;
        let Some(order) = self.resolve_order(&notification).await? else {
            counter!("storefront_payments.webhooks", 1, "outcome" => "unmatched");
            warn!(
                gateway_order_id = %notification.order_id,
                "webhook for unknown order acknowledged"
            );
            return Ok(WebhookOutcome {
                matched: false,
                order_id: None,
                payment_status: None,
            });
        };

        let updated = self
            .apply(
                order.id,
                &notification.status,
                notification.transaction_id,
                VerificationSource::Webhook,
            )
            .await?;
        counter!("storefront_payments.webhooks", 1, "outcome" => "applied");

        Ok(WebhookOutcome {
            matched: true,
            order_id: Some(updated.id),
            payment_status: Some(updated.payment_status),
        })
    }

    async fn resolve_order(
        &self,
        notification: &WebhookNotification,
    ) -> Result<Option<OrderModel>, ServiceError> {
        if let Some(order) = self
            .orders
            .find_by_gateway_order_id(&notification.order_id)
            .await?
        {
            return Ok(Some(order));
        }
        let candidates = notification
            .internal_order_id
            .into_iter()
            .chain(Uuid::parse_str(&notification.order_id).ok());
        for id in candidates {
            match self.orders.find_by_id(id).await {
                Ok(order) => return Ok(Some(order)),
                Err(ServiceError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Applies a gateway status to an order.
    ///
    /// `PAID` completes the payment and empties the owner's cart in the same
    /// transaction; `FAILED` marks it failed; anything else leaves the order
    /// alone. Reapplying the current status is a no-op, and a late `FAILED`
    /// never downgrades a completed payment.
    #[instrument(skip(self, transaction_id), fields(gateway_status = status.as_str()))]
    pub async fn apply(
        &self,
        order_id: Uuid,
        status: &GatewayOrderStatus,
        transaction_id: Option<String>,
        source: VerificationSource,
    ) -> Result<OrderModel, ServiceError> {
        counter!("storefront_payments.verifications", 1, "source" => source.as_str());
        let Some(target) = status.payment_status() else {
            info!(%order_id, "gateway status needs no change");
            return self.orders.find_by_id(order_id).await;
        };

        for _ in 0..MAX_APPLY_ATTEMPTS {
            let txn = self.db.begin().await?;
            let current = OrderStore::find_by_id_with(&txn, order_id).await?;

            if current.payment_status == target {
                txn.commit().await?;
                return Ok(current);
            }
            if current.payment_status == PaymentStatus::Completed && target == PaymentStatus::Failed {
                warn!(%order_id, source = source.as_str(), "ignoring stale failure for completed payment");
                txn.commit().await?;
                return Ok(current);
            }

            let mut details = Map::new();
            details.insert("gateway_status".into(), json!(status.as_str()));
            details.insert("verified_via".into(), json!(source.as_str()));
            let write = PaymentWrite {
                transaction_id: transaction_id.clone(),
                details,
                ..PaymentWrite::status(target)
            };
            if !OrderStore::write_payment_with(&txn, &current, &write).await? {
                txn.rollback().await?;
                continue;
            }

            let cart_cleared = if target == PaymentStatus::Completed {
                CartService::clear_with(&txn, current.user_id).await?;
                true
            } else {
                false
            };
            txn.commit().await?;

            info!(
                %order_id,
                from = %current.payment_status,
                to = %target,
                source = source.as_str(),
                "payment status updated"
            );
            self.event_sender.send_or_log(Event::PaymentStatusChanged {
                order_id,
                old_status: current.payment_status,
                new_status: target,
                source,
            });
            if cart_cleared {
                self.event_sender.send_or_log(Event::CartCleared {
                    user_id: current.user_id,
                    order_id,
                });
            }
            return self.orders.find_by_id(order_id).await;
        }

        error!(%order_id, "payment verification kept conflicting");
        Err(ServiceError::InternalError(
            "order payment state changed concurrently".to_string(),
        ))
    }
}
