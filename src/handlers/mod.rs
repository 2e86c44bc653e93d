pub mod admin;
pub mod auth;
pub mod cart;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod products;
pub mod wishlist;

use std::sync::Arc;

use axum::Router;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::services::{
    cart::CartService, order_status::OrderStatusController, orders::OrderStore,
    payment_verification::PaymentVerifier, payments::PaymentService, products::ProductService,
    users::UserService, wishlist::WishlistService,
};

pub use crate::AppState;

/// Services layer used by the HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub users: Arc<UserService>,
    pub products: Arc<ProductService>,
    pub cart: Arc<CartService>,
    pub wishlist: Arc<WishlistService>,
    pub orders: Arc<OrderStore>,
    pub order_status: Arc<OrderStatusController>,
    pub payments: Arc<PaymentService>,
    pub verifier: Arc<PaymentVerifier>,
}

impl AppServices {
    /// Wires every service over one pool; the gateway is the only outbound dependency.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let users = UserService::new(db_pool.clone());
        let orders = OrderStore::new(db_pool.clone(), event_sender.clone());

        let payments = PaymentService::new(
            orders.clone(),
            users.clone(),
            gateway.clone(),
            config.clone(),
            event_sender.clone(),
        );
        let verifier = PaymentVerifier::new(
            db_pool.clone(),
            orders.clone(),
            gateway,
            config,
            event_sender,
        );

        Self {
            users: Arc::new(users),
            products: Arc::new(ProductService::new(db_pool.clone())),
            cart: Arc::new(CartService::new(db_pool.clone())),
            wishlist: Arc::new(WishlistService::new(db_pool)),
            order_status: Arc::new(OrderStatusController::new(orders.clone())),
            orders: Arc::new(orders),
            payments: Arc::new(payments),
            verifier: Arc::new(verifier),
        }
    }
}

/// Every `/api` route
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::auth_routes())
        .nest("/products", products::product_routes())
        .nest("/cart", cart::cart_routes())
        .nest("/wishlist", wishlist::wishlist_routes())
        .nest("/orders", orders::order_routes())
        .nest("/payments", payments::payment_routes())
        .nest("/admin", admin::admin_routes())
}
