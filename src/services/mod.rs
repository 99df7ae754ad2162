//! Application services for the cart-to-order lifecycle.
pub mod cart_store;
pub mod cart_validator;
pub mod discount;
pub mod order_committer;
pub mod order_state;

pub use cart_store::{CartStore, CartView};
pub use cart_validator::{CartValidator, ValidationReport};
pub use discount::{Discount, DiscountKind, DiscountResolution, DiscountResolver};
pub use order_committer::{OrderCommitter, OrderNumberPolicy};
pub use order_state::OrderStateMachine;
