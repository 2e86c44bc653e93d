#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    app_router,
    auth::{GoogleProfile, IdentityProvider, OAuthError},
    config::AppConfig,
    db::{self, DbConfig},
    entities::{product, user},
    events,
    gateway::{
        sign_webhook, CreateGatewayOrder, GatewayError, GatewayOrder, GatewayOrderStatus,
        GatewaySession, PaymentGateway,
    },
    AppState,
};
use tokio::sync::oneshot;
use tower::ServiceExt;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_integration_tests_only";
pub const SESSION_SECRET: &str = "integration-test-session-secret-with-variety-0123456789";

/// In-process gateway: records every session request and reports whatever
/// status the test sets.
#[derive(Default)]
pub struct StubGateway {
    pub created: Mutex<Vec<CreateGatewayOrder>>,
    remote_status: Mutex<Option<GatewayOrderStatus>>,
    reject_next: Mutex<bool>,
    hold_next: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl StubGateway {
    pub fn set_remote_status(&self, status: GatewayOrderStatus) {
        *self.remote_status.lock().unwrap() = Some(status);
    }

    pub fn reject_next_create(&self) {
        *self.reject_next.lock().unwrap() = true;
    }

    /// Parks the next `create_order` call. The first receiver fires once the
    /// call is parked; sending on the returned sender lets it finish.
    pub fn hold_next_create(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.hold_next.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last_request(&self) -> CreateGatewayOrder {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no gateway session was requested")
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_order(
        &self,
        request: CreateGatewayOrder,
    ) -> Result<GatewaySession, GatewayError> {
        let hold = self.hold_next.lock().unwrap().take();
        if let Some((entered, release)) = hold {
            let _ = entered.send(());
            let _ = release.await;
        }
        if std::mem::take(&mut *self.reject_next.lock().unwrap()) {
            return Err(GatewayError::Rejected {
                status: 400,
                message: "customer_details.customer_phone is invalid".into(),
                code: Some("customer_details.customer_phone_invalid".into()),
                error_type: Some("invalid_request_error".into()),
                body: serde_json::json!({
                    "message": "customer_details.customer_phone is invalid",
                    "type": "invalid_request_error"
                }),
            });
        }
        let session = GatewaySession {
            gateway_order_id: request.gateway_order_id.clone(),
            payment_session_id: format!("session_{}", request.gateway_order_id),
            cf_order_id: Some("2149460581".into()),
        };
        self.created.lock().unwrap().push(request);
        Ok(session)
    }

    async fn fetch_order(&self, gateway_order_id: &str) -> Result<GatewayOrder, GatewayError> {
        let status = self
            .remote_status
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| GatewayOrderStatus::Other("ACTIVE".into()));
        let transaction_id = (status == GatewayOrderStatus::Paid).then(|| "cf_pay_991".to_string());
        Ok(GatewayOrder {
            gateway_order_id: gateway_order_id.to_string(),
            status,
            cf_order_id: Some("2149460581".into()),
            transaction_id,
        })
    }
}

/// Identity provider that signs in a fixed Google profile
pub struct StubIdentity {
    pub profile: GoogleProfile,
}

#[async_trait]
impl IdentityProvider for StubIdentity {
    fn authorization_url(&self) -> (String, String) {
        (
            "https://accounts.google.com/o/oauth2/v2/auth?state=csrf-123".into(),
            "csrf-123".into(),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<GoogleProfile, OAuthError> {
        if code == "good-code" {
            Ok(self.profile.clone())
        } else {
            Err(OAuthError::TokenExchange("invalid_grant".into()))
        }
    }
}

/// Application over a private in-memory database with stubbed integrations.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

pub fn test_config(environment: &str) -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        SESSION_SECRET.to_string(),
        "https://shop.example.com".to_string(),
        "https://api.shop.example.com".to_string(),
        environment.to_string(),
    );
    cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
    cfg.cors_allowed_origins = Some("https://shop.example.com".to_string());
    cfg
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config("test")).await
    }

    pub async fn with_config(cfg: AppConfig) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(StubGateway::default());
        let identity: Arc<dyn IdentityProvider> = Arc::new(StubIdentity {
            profile: GoogleProfile {
                id: "google-sub-1".into(),
                email: "Meera@Example.com".into(),
                name: Some("Meera".into()),
                picture: None,
            },
        });
        let state = AppState::new(
            Arc::new(pool),
            Arc::new(cfg),
            gateway.clone(),
            Some(identity),
            event_sender,
        );

        Self {
            router: app_router(state.clone()),
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub async fn create_user(&self, name: &str, phone: Option<&str>, is_admin: bool) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            google_id: Set(Some(format!("google-{}", Uuid::new_v4().simple()))),
            email: Set(format!("{}-{}@example.com", name.to_lowercase(), Uuid::new_v4().simple())),
            name: Set(name.to_string()),
            phone: Set(phone.map(str::to_string)),
            picture: Set(None),
            is_admin: Set(is_admin),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert test user")
    }

    pub async fn create_product(&self, name: &str, price: Decimal) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(format!("{} made in small batches", name)),
            price: Set(price),
            image: Set("https://images.example.com/p.jpg".to_string()),
            category: Set("pickles".to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert test product")
    }

    pub fn token_for(&self, user: &user::Model) -> String {
        self.state.sessions.issue(user.id).expect("issue session")
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// JSON request, authenticated with `token` as a bearer header when given
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("build request")).await
    }

    /// Delivers a webhook signed with the configured secret
    pub async fn deliver_webhook(&self, payload: &Value) -> Response {
        let body = serde_json::to_vec(payload).expect("serialize webhook");
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign_webhook(WEBHOOK_SECRET, &timestamp, &body).expect("sign webhook");
        self.deliver_raw_webhook(body, &signature, &timestamp).await
    }

    pub async fn deliver_raw_webhook(&self, body: Vec<u8>, signature: &str, timestamp: &str) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/payments/webhook")
            .header("content-type", "application/json")
            .header("x-webhook-signature", signature)
            .header("x-webhook-timestamp", timestamp)
            .body(Body::from(body))
            .expect("build webhook request");
        self.send(request).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is JSON")
}

/// Decimal fields serialize as JSON numbers; compare them as decimals
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(raw) => raw.parse().expect("decimal string"),
        other => other.to_string().parse().expect("decimal number"),
    }
}

/// Cashfree-shaped success notification for `gateway_order_id`
pub fn paid_webhook(gateway_order_id: &str, internal_order_id: Uuid) -> Value {
    serde_json::json!({
        "type": "PAYMENT_SUCCESS_WEBHOOK",
        "event_time": Utc::now().to_rfc3339(),
        "data": {
            "order": {
                "order_id": gateway_order_id,
                "order_amount": 200.0,
                "order_currency": "INR",
                "order_tags": {"internal_order_id": internal_order_id.to_string()}
            },
            "payment": {
                "cf_payment_id": 5114910404u64,
                "payment_status": "SUCCESS",
                "payment_amount": 200.0
            }
        }
    })
}

pub fn failed_webhook(gateway_order_id: &str) -> Value {
    serde_json::json!({
        "type": "PAYMENT_FAILED_WEBHOOK",
        "data": {
            "order": {"order_id": gateway_order_id},
            "payment": {"payment_status": "FAILED"}
        }
    })
}
