use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

struct SessionSecurity;

impl Modify for SessionSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "session_cookie",
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(
                crate::auth::SESSION_COOKIE,
            ))),
        );
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront API

Backend for a small food and pickle storefront: Google sign-in, catalog,
cart, wishlist, orders and hosted online payments.

## Authentication

Sign in through `GET /api/auth/google`. The callback sets an HttpOnly
`session` cookie; API clients may send the same token as
`Authorization: Bearer <token>`.

## Errors

Failures return `{error, message, details?, request_id?, timestamp}`.
Payment gateway rejections carry the provider's response under `details`.
"#
    ),
    servers(
        (url = "http://localhost:5000", description = "Local development")
    ),
    tags(
        (name = "Auth", description = "Google sign-in and sessions"),
        (name = "Products", description = "Catalog"),
        (name = "Cart", description = "Shopping cart"),
        (name = "Wishlist", description = "Saved products"),
        (name = "Orders", description = "Checkout and order history"),
        (name = "Payments", description = "Hosted payment sessions and verification"),
        (name = "Admin", description = "Order administration"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::health::health_check,

        crate::handlers::auth::google_login,
        crate::handlers::auth::google_callback,
        crate::handlers::auth::me,
        crate::handlers::auth::logout,
        crate::handlers::auth::update_phone,

        crate::handlers::products::list_products,
        crate::handlers::products::get_product,

        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_to_cart,
        crate::handlers::cart::update_cart_item,
        crate::handlers::cart::remove_cart_item,
        crate::handlers::cart::clear_cart,

        crate::handlers::wishlist::get_wishlist,
        crate::handlers::wishlist::add_to_wishlist,
        crate::handlers::wishlist::remove_from_wishlist,

        crate::handlers::orders::create_order,
        crate::handlers::orders::my_orders,
        crate::handlers::orders::cancel_order,

        crate::handlers::payments::create_order,
        crate::handlers::payments::create_cod_payment,
        crate::handlers::payments::retry_payment,
        crate::handlers::payments::verify_payment,
        crate::handlers::payment_webhooks::payment_webhook,

        crate::handlers::admin::list_orders,
        crate::handlers::admin::get_order,
        crate::handlers::admin::place_order,
        crate::handlers::admin::cancel_order,
        crate::handlers::admin::complete_order,
    ),
    components(
        schemas(
            crate::ResponseMeta,
            crate::errors::ErrorResponse,
            crate::entities::order::OrderStatus,
            crate::entities::order::PaymentMethod,
            crate::entities::order::PaymentStatus,
            crate::services::orders::OrderDetails,
            crate::services::payments::PaymentSession,
            crate::services::payment_verification::WebhookOutcome,
        )
    ),
    modifiers(&SessionSecurity)
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_storefront_routes() {
        let json = serde_json::to_string(&ApiDoc::openapi()).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/payments/webhook"));
        assert!(json.contains("/api/admin/orders/{id}/complete"));
        assert!(json.contains("session_cookie"));
    }
}
