mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{decimal, failed_webhook, paid_webhook, response_json, TestApp, WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_api::entities::order::PaymentStatus;
use storefront_api::gateway::{sign_webhook, GatewayOrderStatus};
use uuid::Uuid;

struct Checkout {
    token: String,
    user_id: Uuid,
    order_id: Uuid,
    gateway_order_id: String,
}

/// Signs in a customer with a product in their cart and an open online payment session
async fn checkout(app: &TestApp) -> Checkout {
    let user = app.create_user("Lakshmi", Some("9876543210"), false).await;
    let product = app.create_product("Mango Pickle", dec!(100)).await;
    let token = app.token_for(&user);

    let response = app
        .request(
            Method::POST,
            "/api/cart/add",
            Some(json!({"productId": product.id, "quantity": 2})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::POST,
            "/api/payments/create-order",
            Some(json!({
                "items": [{"productId": product.id, "quantity": 2}],
                "address": "14 Beach Road, Vizag"
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let session = response_json(response).await["data"].clone();

    Checkout {
        token,
        user_id: user.id,
        order_id: session["orderId"].as_str().unwrap().parse().unwrap(),
        gateway_order_id: session["gatewayOrderId"].as_str().unwrap().to_string(),
    }
}

async fn cart_len(app: &TestApp, token: &str) -> usize {
    let body = response_json(app.request(Method::GET, "/api/cart", None, Some(token)).await).await;
    body["data"].as_array().unwrap().len()
}

#[tokio::test]
async fn online_checkout_opens_a_gateway_session() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;

    let request = app.gateway.last_request();
    assert_eq!(request.amount, dec!(200));
    assert_eq!(request.currency, "INR");
    assert_eq!(request.internal_order_id, co.order_id);
    assert_eq!(request.gateway_order_id, co.gateway_order_id);
    assert!(request.gateway_order_id.starts_with("ord_"));
    assert_eq!(request.customer.phone, "9876543210");
    assert_eq!(
        request.return_url,
        format!("https://shop.example.com/payment/status?order_id={}", co.order_id)
    );
    assert_eq!(
        request.notify_url.as_deref(),
        Some("https://api.shop.example.com/api/payments/webhook")
    );

    let order = app.state.services.orders.find_by_id(co.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.gateway_order_id.as_deref(), Some(co.gateway_order_id.as_str()));
    // Checkout leaves the cart alone until the payment completes
    assert_eq!(cart_len(&app, &co.token).await, 1);
}

#[tokio::test]
async fn paid_webhook_completes_payment_and_clears_cart_once() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;

    let response = app
        .deliver_webhook(&paid_webhook(&co.gateway_order_id, co.order_id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["matched"], json!(true));
    assert_eq!(body["data"]["paymentStatus"], json!("completed"));

    let order = app.state.services.orders.find_by_id(co.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(order.transaction_id.as_deref(), Some("5114910404"));
    let paid_at = order.paid_at.expect("paid_at is stamped");
    assert_eq!(cart_len(&app, &co.token).await, 0);

    // Refill the cart; a redelivery must neither clear it nor move paid_at
    let product = app.create_product("Lime Pickle", dec!(180)).await;
    app.state.services.cart.add(co.user_id, product.id, 1).await.unwrap();

    let response = app
        .deliver_webhook(&paid_webhook(&co.gateway_order_id, co.order_id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let order = app.state.services.orders.find_by_id(co.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(order.paid_at, Some(paid_at));
    assert_eq!(cart_len(&app, &co.token).await, 1);
}

#[tokio::test]
async fn late_failure_never_downgrades_a_completed_payment() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;

    app.deliver_webhook(&paid_webhook(&co.gateway_order_id, co.order_id))
        .await;
    let response = app.deliver_webhook(&failed_webhook(&co.gateway_order_id)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.state.services.orders.find_by_id(co.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Completed);
}

#[tokio::test]
async fn failed_payment_can_be_retried_with_a_new_session() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;

    let response = app.deliver_webhook(&failed_webhook(&co.gateway_order_id)).await;
    assert_eq!(response_json(response).await["data"]["paymentStatus"], json!("failed"));
    // Failure keeps the cart for the retry
    assert_eq!(cart_len(&app, &co.token).await, 1);

    let response = app
        .request(
            Method::POST,
            "/api/payments/retry-payment",
            Some(json!({"orderId": co.order_id})),
            Some(&co.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let session = response_json(response).await["data"].clone();
    let retry_gateway_id = session["gatewayOrderId"].as_str().unwrap();
    assert_ne!(retry_gateway_id, co.gateway_order_id);
    assert_eq!(session["order"]["payment"]["status"], json!("pending"));
    assert_eq!(session["order"]["payment"]["paymentDetails"]["attempts"], json!(2));
    assert_eq!(app.gateway.created_count(), 2);

    // The superseded session id no longer resolves, the internal tag still does
    let response = app
        .deliver_webhook(&paid_webhook(&co.gateway_order_id, co.order_id))
        .await;
    assert_eq!(response_json(response).await["data"]["matched"], json!(true));
    let order = app.state.services.orders.find_by_id(co.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Completed);

    let response = app
        .request(
            Method::POST,
            "/api/payments/retry-payment",
            Some(json!({"orderId": co.order_id})),
            Some(&co.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tampered_or_stale_webhooks_are_rejected_without_changes() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;

    let body = serde_json::to_vec(&paid_webhook(&co.gateway_order_id, co.order_id)).unwrap();
    let timestamp = Utc::now().timestamp().to_string();
    let signature = sign_webhook(WEBHOOK_SECRET, &timestamp, &body).unwrap();

    let mut tampered = body.clone();
    let last = tampered.len() - 2;
    tampered[last] = b' ';
    let response = app
        .deliver_raw_webhook(tampered, &signature, &timestamp)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .deliver_raw_webhook(body.clone(), "bm90IGEgc2lnbmF0dXJl", &timestamp)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stale = (Utc::now().timestamp() - 3600).to_string();
    let stale_signature = sign_webhook(WEBHOOK_SECRET, &stale, &body).unwrap();
    let response = app
        .deliver_raw_webhook(body, &stale_signature, &stale)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let order = app.state.services.orders.find_by_id(co.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(cart_len(&app, &co.token).await, 1);
}

#[tokio::test]
async fn unknown_order_is_acknowledged_and_non_terminal_status_is_ignored() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;

    let response = app
        .deliver_webhook(&json!({"order_id": "ord_does_not_exist", "order_status": "PAID"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["matched"], json!(false));

    let response = app
        .deliver_webhook(&json!({
            "data": {
                "order": {"order_id": co.gateway_order_id},
                "payment": {"payment_status": "USER_DROPPED"}
            }
        }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["data"]["paymentStatus"], json!("pending"));
}

#[tokio::test]
async fn poll_verification_applies_gateway_status() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;
    let uri = format!("/api/payments/verify/{}", co.order_id);

    let response = app.request(Method::GET, &uri, None, Some(&co.token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["gatewayStatus"], json!("ACTIVE"));
    assert_eq!(body["data"]["paymentStatus"], json!("pending"));

    app.gateway.set_remote_status(GatewayOrderStatus::Paid);
    let body = response_json(app.request(Method::GET, &uri, None, Some(&co.token)).await).await;
    assert_eq!(body["data"]["paymentStatus"], json!("completed"));
    assert_eq!(body["data"]["order"]["payment"]["transactionId"], json!("cf_pay_991"));
    assert_eq!(cart_len(&app, &co.token).await, 0);

    let stranger = app.create_user("Other", None, false).await;
    let response = app
        .request(Method::GET, &uri, None, Some(&app.token_for(&stranger)))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin = app.create_user("Admin", None, true).await;
    let response = app
        .request(Method::GET, &uri, None, Some(&app.token_for(&admin)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn cod_order_converts_to_online_and_remembers_original_method() {
    let app = TestApp::new().await;
    let user = app.create_user("Farah", None, false).await;
    let product = app.create_product("Chicken Biryani", dec!(350)).await;
    let token = app.token_for(&user);

    let order = response_json(
        app.request(
            Method::POST,
            "/api/orders",
            Some(json!({"items": [{"productId": product.id, "quantity": 1}], "address": "3 Fort Road"})),
            Some(&token),
        )
        .await,
    )
    .await["data"]
        .clone();
    let order_id = order["id"].as_str().unwrap().to_string();

    // No stored phone and none supplied
    let response = app
        .request(
            Method::POST,
            "/api/payments/create-cod-payment",
            Some(json!({"orderId": order_id})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.gateway.created_count(), 0);

    let response = app
        .request(
            Method::POST,
            "/api/payments/create-cod-payment",
            Some(json!({"orderId": order_id, "phone": "+91 98765 43210"})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let session = response_json(response).await["data"].clone();
    let payment = &session["order"]["payment"];
    assert_eq!(payment["method"], json!("online"));
    assert_eq!(payment["status"], json!("pending"));
    assert_eq!(payment["paymentDetails"]["original_method"], json!("cash_on_delivery"));
    assert_eq!(decimal(&session["order"]["totalAmount"]), dec!(350));
    assert_eq!(app.gateway.last_request().customer.phone, "+919876543210");

    // The supplied phone is remembered for next time
    let me = response_json(app.request(Method::GET, "/api/auth/me", None, Some(&token)).await).await;
    assert_eq!(me["data"]["phone"], json!("+919876543210"));

    // Already online: a second conversion is refused
    let response = app
        .request(
            Method::POST,
            "/api/payments/create-cod-payment",
            Some(json!({"orderId": order_id})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn gateway_rejection_surfaces_provider_details() {
    let app = TestApp::new().await;
    let user = app.create_user("Sita", Some("9876543210"), false).await;
    let product = app.create_product("Veg Biryani", dec!(280)).await;
    app.gateway.reject_next_create();

    let response = app
        .request(
            Method::POST,
            "/api/payments/create-order",
            Some(json!({
                "items": [{"productId": product.id, "quantity": 1}],
                "address": "8 River Side"
            })),
            Some(&app.token_for(&user)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response_json(response).await;
    assert_eq!(body["details"]["type"], json!("invalid_request_error"));

    let orders = app.state.services.orders.find_by_user(user.id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert!(orders[0].payment.gateway_order_id.is_none());
}

#[tokio::test]
async fn only_the_owner_may_open_sessions_for_an_order() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;
    let intruder = app.create_user("Mallory", Some("9123456789"), false).await;

    let response = app
        .request(
            Method::POST,
            "/api/payments/retry-payment",
            Some(json!({"orderId": co.order_id})),
            Some(&app.token_for(&intruder)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.gateway.created_count(), 1);
}

#[tokio::test]
async fn flat_paid_notification_completes_payment() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;

    let response = app
        .deliver_webhook(&json!({"order_id": co.gateway_order_id, "order_status": "PAID"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.state.services.orders.find_by_id(co.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(order.payment_details.unwrap()["verified_via"], json!("webhook"));
    assert_eq!(cart_len(&app, &co.token).await, 0);
}

#[tokio::test]
async fn payment_completed_during_retry_is_not_reopened() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;
    let (entered, release) = app.gateway.hold_next_create();

    let retry = app.request(
        Method::POST,
        "/api/payments/retry-payment",
        Some(json!({"orderId": co.order_id})),
        Some(&co.token),
    );
    let paid_meanwhile = async {
        entered.await.unwrap();
        let response = app
            .deliver_webhook(&paid_webhook(&co.gateway_order_id, co.order_id))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        release.send(()).unwrap();
    };
    let (response, ()) = tokio::join!(retry, paid_meanwhile);
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let order = app.state.services.orders.find_by_id(co.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(order.gateway_order_id.as_deref(), Some(co.gateway_order_id.as_str()));
    assert_eq!(cart_len(&app, &co.token).await, 0);
}

#[tokio::test]
async fn out_of_range_webhook_timestamp_is_rejected() {
    let app = TestApp::new().await;
    let co = checkout(&app).await;
    let body = serde_json::to_vec(&paid_webhook(&co.gateway_order_id, co.order_id)).unwrap();

    for timestamp in ["-9223372036854775000", "9223372036854775807"] {
        let response = app.deliver_raw_webhook(body.clone(), "AAAA", timestamp).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "timestamp {timestamp}");
    }
    let order = app.state.services.orders.find_by_id(co.order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}
