//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::Product;
pub use order::{Actor, Address, CheckoutDetails, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus};
pub use cart::{Cart, CartItem, CartSummary};
