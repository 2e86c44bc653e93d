use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, instrument, warn};

use super::{
    CreateGatewayOrder, GatewayError, GatewayOrder, GatewayOrderStatus, GatewaySession,
    PaymentGateway,
};
use crate::config::AppConfig;

/// Connection settings for the Cashfree Payment Gateway API
#[derive(Clone)]
pub struct CashfreeConfig {
    /// e.g. `https://sandbox.cashfree.com/pg`
    pub base_url: String,
    pub app_id: String,
    pub secret_key: String,
    pub api_version: String,
    pub timeout: Duration,
}

impl CashfreeConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            base_url: cfg.cashfree_base_url(),
            app_id: cfg.cashfree_app_id.clone(),
            secret_key: cfg.cashfree_secret_key.clone(),
            api_version: cfg.cashfree_api_version.clone(),
            timeout: cfg.gateway_timeout(),
        }
    }
}

impl std::fmt::Debug for CashfreeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CashfreeConfig")
            .field("base_url", &self.base_url)
            .field("app_id", &self.app_id)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Cashfree `/pg/orders` client
#[derive(Clone, Debug)]
pub struct CashfreeClient {
    http: reqwest::Client,
    config: CashfreeConfig,
}

#[derive(Serialize)]
struct OrderRequest<'a> {
    order_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    order_amount: Decimal,
    order_currency: &'a str,
    customer_details: CustomerDetails<'a>,
    order_meta: OrderMeta<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_note: Option<&'a str>,
    order_tags: HashMap<&'static str, String>,
}

#[derive(Serialize)]
struct CustomerDetails<'a> {
    customer_id: &'a str,
    customer_name: &'a str,
    customer_email: &'a str,
    customer_phone: &'a str,
}

#[derive(Serialize)]
struct OrderMeta<'a> {
    return_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    notify_url: Option<&'a str>,
}

#[derive(Deserialize)]
struct OrderResponse {
    order_id: String,
    #[serde(default)]
    payment_session_id: Option<String>,
    #[serde(default)]
    cf_order_id: Option<Value>,
    #[serde(default)]
    order_status: Option<String>,
}

#[derive(Deserialize)]
struct PaymentEntity {
    #[serde(default)]
    cf_payment_id: Option<Value>,
    #[serde(default)]
    payment_status: Option<String>,
}

/// Cashfree ids arrive as numbers or strings depending on the endpoint.
fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl CashfreeClient {
    pub fn new(config: CashfreeConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn from_app_config(cfg: &AppConfig) -> Result<Self, GatewayError> {
        Self::new(CashfreeConfig::from_app_config(cfg))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.config.base_url, path))
            .header("x-client-id", &self.config.app_id)
            .header("x-client-secret", &self.config.secret_key)
            .header("x-api-version", &self.config.api_version)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, GatewayError> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Transport("request to payment gateway timed out".to_string())
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        let field = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);
        let message = field("message").unwrap_or_else(|| format!("gateway returned HTTP {status}"));

        error!(status, body = %body, "payment gateway rejected request");
        Err(GatewayError::Rejected {
            status,
            message,
            code: field("code"),
            error_type: field("type"),
            body,
        })
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, GatewayError> {
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    /// Reference of the successful payment for a paid order, if any.
    async fn successful_payment_id(&self, gateway_order_id: &str) -> Option<String> {
        let path = format!("/orders/{}/payments", gateway_order_id);
        let result = async {
            let response = self.send(self.request(Method::GET, &path)).await?;
            Self::json::<Vec<PaymentEntity>>(response).await
        }
        .await;

        match result {
            Ok(payments) => payments
                .iter()
                .filter(|p| p.payment_status.as_deref() == Some("SUCCESS"))
                .find_map(|p| p.cf_payment_id.as_ref().and_then(id_to_string)),
            Err(err) => {
                warn!(gateway_order_id, error = %err, "could not fetch payments for paid order");
                None
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for CashfreeClient {
    #[instrument(skip(self, request), fields(gateway_order_id = %request.gateway_order_id, order_id = %request.internal_order_id))]
    async fn create_order(
        &self,
        request: CreateGatewayOrder,
    ) -> Result<GatewaySession, GatewayError> {
        let mut order_tags = HashMap::new();
        order_tags.insert("internal_order_id", request.internal_order_id.to_string());

        let body = OrderRequest {
            order_id: &request.gateway_order_id,
            order_amount: request.amount,
            order_currency: &request.currency,
            customer_details: CustomerDetails {
                customer_id: &request.customer.customer_id,
                customer_name: &request.customer.name,
                customer_email: &request.customer.email,
                customer_phone: &request.customer.phone,
            },
            order_meta: OrderMeta {
                return_url: &request.return_url,
                notify_url: request.notify_url.as_deref(),
            },
            order_note: request.note.as_deref(),
            order_tags,
        };

        let response = self
            .send(self.request(Method::POST, "/orders").json(&body))
            .await?;
        let created: OrderResponse = Self::json(response).await?;

        let payment_session_id = created
            .payment_session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                GatewayError::InvalidResponse("response has no payment_session_id".to_string())
            })?;

        Ok(GatewaySession {
            gateway_order_id: created.order_id,
            payment_session_id,
            cf_order_id: created.cf_order_id.as_ref().and_then(id_to_string),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_order(&self, gateway_order_id: &str) -> Result<GatewayOrder, GatewayError> {
        let path = format!("/orders/{}", gateway_order_id);
        let response = self.send(self.request(Method::GET, &path)).await?;
        let order: OrderResponse = Self::json(response).await?;

        let status = GatewayOrderStatus::parse(order.order_status.as_deref().unwrap_or_default());
        let transaction_id = if status == GatewayOrderStatus::Paid {
            self.successful_payment_id(&order.order_id).await
        } else {
            None
        };

        Ok(GatewayOrder {
            cf_order_id: order.cf_order_id.as_ref().and_then(id_to_string),
            gateway_order_id: order.order_id,
            status,
            transaction_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_accept_numbers_and_strings() {
        assert_eq!(id_to_string(&json!(2149460581_i64)), Some("2149460581".to_string()));
        assert_eq!(id_to_string(&json!("cf_1")), Some("cf_1".to_string()));
        assert_eq!(id_to_string(&json!("")), None);
        assert_eq!(id_to_string(&Value::Null), None);
    }

    #[test]
    fn amount_serializes_as_number() {
        let body = OrderRequest {
            order_id: "ord_1",
            order_amount: Decimal::new(25050, 2),
            order_currency: "INR",
            customer_details: CustomerDetails {
                customer_id: "u1",
                customer_name: "Asha",
                customer_email: "asha@example.com",
                customer_phone: "9999999999",
            },
            order_meta: OrderMeta {
                return_url: "https://shop.example.com/payment/status?order_id=1",
                notify_url: None,
            },
            order_note: None,
            order_tags: HashMap::new(),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["order_amount"], json!(250.5));
        assert!(value["order_meta"].get("notify_url").is_none());
        assert!(value.get("order_note").is_none());
    }
}
