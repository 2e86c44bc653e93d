//! Payment gateway abstraction.
//!
//! The order workflow talks to the hosted-checkout provider only through the
//! [`PaymentGateway`] trait. The production implementation is
//! [`cashfree::CashfreeClient`]; it is built once at startup from
//! configuration and shared as `Arc<dyn PaymentGateway>`.

pub mod cashfree;
pub mod signature;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::entities::order::PaymentStatus;
use crate::errors::ServiceError;

pub use cashfree::CashfreeClient;
pub use signature::{sign_webhook, verify_webhook_signature};

/// Customer contact details the gateway requires for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCustomer {
    pub customer_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Request to open a hosted payment session
#[derive(Debug, Clone, PartialEq)]
pub struct CreateGatewayOrder {
    /// Unique per payment attempt
    pub gateway_order_id: String,
    pub internal_order_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub customer: GatewayCustomer,
    pub return_url: String,
    pub notify_url: Option<String>,
    pub note: Option<String>,
}

/// Identifiers of a freshly created payment session. The browser opens
/// checkout from `payment_session_id` with the gateway's JS SDK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySession {
    pub gateway_order_id: String,
    pub payment_session_id: String,
    pub cf_order_id: Option<String>,
}

/// Gateway-side view of an order's payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOrderStatus {
    Paid,
    Failed,
    Other(String),
}

impl GatewayOrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PAID" => GatewayOrderStatus::Paid,
            "FAILED" => GatewayOrderStatus::Failed,
            other => GatewayOrderStatus::Other(other.to_string()),
        }
    }

    /// Status as reported by the gateway, upper case
    pub fn as_str(&self) -> &str {
        match self {
            GatewayOrderStatus::Paid => "PAID",
            GatewayOrderStatus::Failed => "FAILED",
            GatewayOrderStatus::Other(raw) => raw,
        }
    }

    /// Internal payment status this maps to; `None` means leave the order alone.
    pub fn payment_status(&self) -> Option<PaymentStatus> {
        match self {
            GatewayOrderStatus::Paid => Some(PaymentStatus::Completed),
            GatewayOrderStatus::Failed => Some(PaymentStatus::Failed),
            GatewayOrderStatus::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    pub gateway_order_id: String,
    pub status: GatewayOrderStatus,
    pub cf_order_id: Option<String>,
    /// Successful payment reference, when the gateway reports one
    pub transaction_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway rejected request ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
        code: Option<String>,
        error_type: Option<String>,
        body: Value,
    },

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// The provider attributes the failure to our request rather than itself.
    pub fn is_client_fault(&self) -> bool {
        match self {
            GatewayError::Rejected {
                status, error_type, ..
            } => {
                error_type.as_deref() == Some("invalid_request_error")
                    || matches!(status, 400 | 404 | 422)
            }
            GatewayError::Transport(_) | GatewayError::InvalidResponse(_) => false,
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        let client_fault = err.is_client_fault();
        let (message, details) = match err {
            GatewayError::Rejected { message, body, .. } => (message, Some(body)),
            other => (other.to_string(), None),
        };
        ServiceError::PaymentGateway {
            message,
            client_fault,
            details,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a hosted payment session for one attempt.
    async fn create_order(
        &self,
        request: CreateGatewayOrder,
    ) -> Result<GatewaySession, GatewayError>;

    /// Fetches the authoritative payment state of a gateway order.
    async fn fetch_order(&self, gateway_order_id: &str) -> Result<GatewayOrder, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("PAID", Some(PaymentStatus::Completed))]
    #[case("paid", Some(PaymentStatus::Completed))]
    #[case("FAILED", Some(PaymentStatus::Failed))]
    #[case("ACTIVE", None)]
    #[case("EXPIRED", None)]
    #[case("", None)]
    fn status_mapping(#[case] raw: &str, #[case] expected: Option<PaymentStatus>) {
        assert_eq!(GatewayOrderStatus::parse(raw).payment_status(), expected);
    }

    #[test]
    fn invalid_request_is_client_fault() {
        let err = GatewayError::Rejected {
            status: 400,
            message: "customer_phone is invalid".into(),
            code: Some("customer_details.customer_phone_invalid".into()),
            error_type: Some("invalid_request_error".into()),
            body: json!({"message": "customer_phone is invalid"}),
        };
        match ServiceError::from(err) {
            ServiceError::PaymentGateway {
                client_fault,
                details,
                ..
            } => {
                assert!(client_fault);
                assert_eq!(details, Some(json!({"message": "customer_phone is invalid"})));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn auth_and_transport_failures_are_server_faults() {
        let auth = GatewayError::Rejected {
            status: 401,
            message: "authentication Failed".into(),
            code: None,
            error_type: Some("authentication_error".into()),
            body: json!({}),
        };
        assert!(!auth.is_client_fault());
        assert!(!GatewayError::Transport("timed out".into()).is_client_fault());
    }
}
