use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::entities::order::{Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus};
use crate::entities::user::Model as UserModel;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{CreateGatewayOrder, GatewayCustomer, PaymentGateway};
use crate::services::orders::{NewOrder, OrderDetails, OrderStore, PaymentWrite};
use crate::services::pricing::LineItemInput;
use crate::services::users::{normalize_phone, UserService};

/// Checkout request for a new order paid online
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnlineOrderInput {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<LineItemInput>,
    #[validate(length(min = 1, max = 1000, message = "Delivery address is required"))]
    pub address: String,
    pub phone: Option<String>,
    #[validate(length(max = 200))]
    pub note: Option<String>,
}

/// Hosted checkout session opened for an order
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub order_id: Uuid,
    pub gateway_order_id: String,
    pub payment_session_id: String,
    pub order: OrderDetails,
}

/// Caller may act on `order` only if they own it
pub fn ensure_owner(order: &OrderModel, user: &UserModel) -> Result<(), ServiceError> {
    if order.user_id != user.id {
        return Err(ServiceError::Forbidden(
            "You do not have access to this order".to_string(),
        ));
    }
    Ok(())
}

/// A new payment session may only be opened on a live, unpaid order
fn ensure_payable(order: &OrderModel) -> Result<(), ServiceError> {
    if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Completed) {
        return Err(ServiceError::InvalidTransition(format!(
            "order is {} and cannot be paid",
            order.status
        )));
    }
    if !order.payment_status.is_retriable() {
        return Err(ServiceError::InvalidTransition(format!(
            "payment is already {}",
            order.payment_status
        )));
    }
    Ok(())
}

/// Payment Session Initiator: opens hosted checkout sessions with the gateway.
#[derive(Clone)]
pub struct PaymentService {
    orders: OrderStore,
    users: UserService,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
    event_sender: EventSender,
}

impl PaymentService {
    pub fn new(
        orders: OrderStore,
        users: UserService,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            orders,
            users,
            gateway,
            config,
            event_sender,
        }
    }

    /// Creates a pending online order and opens its first payment session.
    #[instrument(skip(self, user, input), fields(user_id = %user.id))]
    pub async fn create_online_order(
        &self,
        user: &UserModel,
        input: OnlineOrderInput,
    ) -> Result<PaymentSession, ServiceError> {
        input.validate()?;
        let phone = self.customer_phone(user, input.phone.as_deref()).await?;

        let created = self
            .orders
            .create(NewOrder {
                user_id: user.id,
                items: input.items,
                address: input.address,
                payment_method: PaymentMethod::Online,
            })
            .await?;
        let order = self.orders.find_by_id(created.id).await?;

        self.initiate(&order, user, phone, input.note, false).await
    }

    /// Converts a cash-on-delivery order to online payment.
    ///
    /// On success the method becomes `online` and `payment_details` keeps
    /// `original_method = cash_on_delivery`.
    #[instrument(skip(self, user, phone), fields(user_id = %user.id))]
    pub async fn convert_cod(
        &self,
        user: &UserModel,
        order_id: Uuid,
        phone: Option<&str>,
    ) -> Result<PaymentSession, ServiceError> {
        let order = self.orders.find_by_id(order_id).await?;
        ensure_owner(&order, user)?;
        if order.payment_method != PaymentMethod::CashOnDelivery {
            return Err(ServiceError::ValidationError(
                "Order is not a cash-on-delivery order".to_string(),
            ));
        }
        ensure_payable(&order)?;

        let phone = self.customer_phone(user, phone).await?;
        self.initiate(&order, user, phone, None, true).await
    }

    /// Opens a fresh session for an online order whose payment is pending or failed.
    #[instrument(skip(self, user, phone), fields(user_id = %user.id))]
    pub async fn retry(
        &self,
        user: &UserModel,
        order_id: Uuid,
        phone: Option<&str>,
    ) -> Result<PaymentSession, ServiceError> {
        let order = self.orders.find_by_id(order_id).await?;
        ensure_owner(&order, user)?;
        if order.payment_method != PaymentMethod::Online {
            return Err(ServiceError::ValidationError(
                "Order is not an online-payment order".to_string(),
            ));
        }
        ensure_payable(&order)?;

        let phone = self.customer_phone(user, phone).await?;
        self.initiate(&order, user, phone, None, false).await
    }

    /// Requests a gateway session for `order` and records its identifiers.
    ///
    /// A gateway failure leaves the order untouched.
    #[instrument(skip(self, order, user, phone, note), fields(order_id = %order.id))]
    pub async fn initiate(
        &self,
        order: &OrderModel,
        user: &UserModel,
        phone: String,
        note: Option<String>,
        converting_from_cod: bool,
    ) -> Result<PaymentSession, ServiceError> {
        let gateway_order_id = format!("ord_{}", Uuid::new_v4().simple());
        let backend = self.config.backend_url.trim_end_matches('/');
        // The gateway only calls https notify URLs
        let notify_url = backend
            .starts_with("https://")
            .then(|| format!("{}/api/payments/webhook", backend));

        let request = CreateGatewayOrder {
            gateway_order_id,
            internal_order_id: order.id,
            amount: order.total_amount,
            currency: self.config.payment_currency.clone(),
            customer: GatewayCustomer {
                customer_id: user.id.simple().to_string(),
                name: user.name.clone(),
                email: user.email.clone(),
                phone,
            },
            return_url: format!(
                "{}/payment/status?order_id={}",
                self.config.frontend_base(),
                order.id
            ),
            notify_url,
            note,
        };

        let session = match self.gateway.create_order(request).await {
            Ok(session) => session,
            Err(err) => {
                counter!("storefront_payments.sessions", 1, "outcome" => "failed");
                error!(order_id = %order.id, error = %err, "payment session creation failed");
                return Err(err.into());
            }
        };

        let attempts = order
            .payment_details
            .as_ref()
            .and_then(|d| d.get("attempts"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + 1;

        let mut details = Map::new();
        details.insert("gateway_order_id".into(), json!(session.gateway_order_id));
        details.insert("payment_session_id".into(), json!(session.payment_session_id));
        if let Some(cf_order_id) = &session.cf_order_id {
            details.insert("cf_order_id".into(), json!(cf_order_id));
        }
        details.insert("session_created_at".into(), json!(Utc::now().to_rfc3339()));
        details.insert("attempts".into(), json!(attempts));
        if converting_from_cod {
            details.insert(
                "original_method".into(),
                json!(PaymentMethod::CashOnDelivery.as_str()),
            );
        }

        let write = PaymentWrite {
            method: Some(PaymentMethod::Online),
            gateway_order_id: Some(session.gateway_order_id.clone()),
            details,
            ..PaymentWrite::status(PaymentStatus::Pending)
        };
        // Compare against the payment state `ensure_payable` accepted, so a
        // payment completed meanwhile is never reopened
        let updated = self.orders.apply_payment_write_over(order, &write).await?;

        counter!("storefront_payments.sessions", 1, "outcome" => "created");
        info!(
            gateway_order_id = %session.gateway_order_id,
            attempts,
            converting_from_cod,
            "payment session created"
        );
        self.event_sender.send_or_log(Event::PaymentSessionCreated {
            order_id: order.id,
            gateway_order_id: session.gateway_order_id.clone(),
            converted_from_cod: converting_from_cod,
        });

        Ok(PaymentSession {
            order_id: order.id,
            gateway_order_id: session.gateway_order_id,
            payment_session_id: session.payment_session_id,
            order: self.orders.populate_one(updated).await?,
        })
    }

    /// Phone from the request, else the stored one. A supplied phone is saved
    /// when the user has none yet.
    async fn customer_phone(
        &self,
        user: &UserModel,
        supplied: Option<&str>,
    ) -> Result<String, ServiceError> {
        match supplied.map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => {
                let phone = normalize_phone(raw)?;
                if user.phone.is_none() {
                    self.users.update_phone(user.id, &phone).await?;
                }
                Ok(phone)
            }
            None => user.phone.clone().ok_or_else(|| {
                ServiceError::ValidationError("Phone number is required".to_string())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::{product, user};
    use crate::events;
    use crate::gateway::{GatewayError, GatewaySession, MockPaymentGateway};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

    struct Fixture {
        db: Arc<DatabaseConnection>,
        user: UserModel,
        product_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let db = establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        let now = Utc::now();
        let user = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            google_id: Set(Some("g-1".into())),
            email: Set("asha@example.com".into()),
            name: Set("Asha".into()),
            phone: Set(Some("9999999999".into())),
            picture: Set(None),
            is_admin: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&db)
        .await
        .unwrap();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Mango Pickle".into()),
            description: Set(String::new()),
            price: Set(dec!(100)),
            image: Set(String::new()),
            category: Set("pickles".into()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&db)
        .await
        .unwrap();
        Fixture {
            db: Arc::new(db),
            user,
            product_id: product.id,
        }
    }

    fn service(fx: &Fixture, gateway: MockPaymentGateway) -> PaymentService {
        let (sender, _rx) = events::channel(16);
        let config = AppConfig::new(
            "sqlite::memory:".into(),
            "a-long-and-varied-session-secret-for-tests-0123456789".into(),
            "https://shop.example.com".into(),
            "https://api.shop.example.com".into(),
            "development".into(),
        );
        let orders = OrderStore::new(fx.db.clone(), sender.clone());
        PaymentService::new(
            orders,
            UserService::new(fx.db.clone()),
            Arc::new(gateway),
            Arc::new(config),
            sender,
        )
    }

    fn input(fx: &Fixture) -> OnlineOrderInput {
        OnlineOrderInput {
            items: vec![LineItemInput {
                product_id: fx.product_id,
                quantity: Some(2),
            }],
            address: "12 MG Road, Bengaluru".into(),
            phone: None,
            note: None,
        }
    }

    #[tokio::test]
    async fn session_uses_server_total_and_records_identifiers() {
        let fx = fixture().await;
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_order()
            .withf(|req| {
                req.amount == dec!(200)
                    && req.currency == "INR"
                    && req.gateway_order_id.starts_with("ord_")
                    && req.notify_url.as_deref()
                        == Some("https://api.shop.example.com/api/payments/webhook")
            })
            .times(1)
            .returning(|req| {
                Ok(GatewaySession {
                    gateway_order_id: req.gateway_order_id.clone(),
                    payment_session_id: "session_abc".into(),
                    cf_order_id: Some("2149460581".into()),
                })
            });

        let session = service(&fx, gateway)
            .create_online_order(&fx.user, input(&fx))
            .await
            .unwrap();

        assert_eq!(session.order.total_amount, dec!(200));
        assert_eq!(session.order.status, OrderStatus::Pending);
        assert_eq!(session.order.payment.status, PaymentStatus::Pending);
        assert_eq!(
            session.order.payment.gateway_order_id.as_deref(),
            Some(session.gateway_order_id.as_str())
        );
        let details = session.order.payment.payment_details.unwrap();
        assert_eq!(details["payment_session_id"], json!("session_abc"));
        assert_eq!(details["attempts"], json!(1));
    }

    #[tokio::test]
    async fn gateway_rejection_leaves_order_untouched() {
        let fx = fixture().await;
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_order().times(1).returning(|_| {
            Err(GatewayError::Rejected {
                status: 400,
                message: "customer_phone is invalid".into(),
                code: None,
                error_type: Some("invalid_request_error".into()),
                body: json!({"message": "customer_phone is invalid"}),
            })
        });
        let svc = service(&fx, gateway);

        let err = svc.create_online_order(&fx.user, input(&fx)).await.unwrap_err();
        assert_matches!(
            err,
            ServiceError::PaymentGateway { client_fault: true, details: Some(_), .. }
        );

        let orders = OrderStore::new(fx.db.clone(), events::channel(1).0)
            .find_by_user(fx.user.id)
            .await
            .unwrap();
        assert_eq!(orders.len(), 1);
        assert!(orders[0].payment.gateway_order_id.is_none());
        assert!(orders[0].payment.payment_details.is_none());
    }

    #[tokio::test]
    async fn missing_phone_is_rejected_before_creating_anything() {
        let fx = fixture().await;
        let mut user = fx.user.clone();
        user.phone = None;
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_order().times(0);

        let err = service(&fx, gateway)
            .create_online_order(&user, input(&fx))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }
}
