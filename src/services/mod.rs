// Catalog and shopper state
pub mod cart;
pub mod products;
pub mod users;
pub mod wishlist;

// Orders
pub mod order_status;
pub mod orders;
pub mod pricing;

// Payments
pub mod payment_verification;
pub mod payments;
