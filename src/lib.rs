//! OpenSASE Checkout
//!
//! Cart-to-order lifecycle for the OpenSASE storefront.
//!
//! ## Features
//! - Shopping cart with live, derived totals
//! - Cart validation against current stock and pricing
//! - Discount codes (percentage and fixed amount)
//! - Atomic checkout: re-validate, decrement stock, place order, clear cart
//! - Order status state machine with customer and admin transitions
//!
//! Carts are edited optimistically (no stock checks while shopping) and
//! checked pessimistically at checkout.

pub mod config;
pub mod domain;
pub mod ports;
pub mod services;
pub mod infrastructure;
pub mod api;

use thiserror::Error;

use crate::domain::aggregates::{Actor, OrderStatus};
use crate::domain::value_objects::{CartItemId, OrderId, ProductId};
pub use crate::services::cart_validator::ValidationReport;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i64),

    #[error("Cart is not valid for checkout: {}", .0.summary())]
    CartInvalid(ValidationReport),

    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    OutOfStock { product_id: ProductId, requested: u32, available: u32 },

    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    #[error("Cart item not found: {0}")]
    CartItemNotFound(CartItemId),

    #[error("{actor} may not move order from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus, actor: Actor },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Order {order_id} was modified concurrently (expected {expected}, found {actual})")]
    ConcurrentModification { order_id: OrderId, expected: OrderStatus, actual: OrderStatus },

    #[error("Discount code {0} does not exist")]
    DiscountNotFound(String),

    #[error("Discount code {0} has expired")]
    DiscountExpired(String),

    #[error("Discount code {code} requires a subtotal of at least {minimum}")]
    DiscountMinimumNotMet { code: String, minimum: crate::domain::value_objects::Money },

    #[error("Could not allocate a unique order number after {0} attempts")]
    OrderNumberExhausted(u32),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Event publish error: {0}")]
    Publish(String),
}

impl From<sqlx::Error> for EcommerceError {
    fn from(e: sqlx::Error) -> Self { EcommerceError::Storage(e.to_string()) }
}

impl From<serde_json::Error> for EcommerceError {
    fn from(e: serde_json::Error) -> Self { EcommerceError::Storage(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
