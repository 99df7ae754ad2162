//! Boundary traits the checkout core talks to.
//!
//! Stores are shared between concurrent requests. Implementations must make
//! `decrement_stock`, `claim_for_checkout` and `update_status` atomic per row.
//! The first is the only place where stock can go negative under contention,
//! the second keeps one cart from becoming two orders, and the third keeps two
//! concurrent admin edits from silently overwriting each other.

use async_trait::async_trait;

use crate::domain::aggregates::{Cart, Order, OrderStatus, PaymentStatus, Product};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{CustomerId, OrderId, OrderNumber, ProductId};
use crate::services::discount::Discount;
use crate::Result;

#[async_trait]
pub trait Inventory: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Subtracts `amount` unless that would take stock below zero, in which
    /// case nothing changes and `OutOfStock` is returned. Returns the new level.
    async fn decrement_stock(&self, id: ProductId, amount: u32) -> Result<u32>;

    async fn increment_stock(&self, id: ProductId, amount: u32) -> Result<u32>;

    async fn upsert_product(&self, product: Product) -> Result<()>;
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn load_cart(&self, customer_id: CustomerId) -> Result<Option<Cart>>;
    async fn save_cart(&self, cart: &Cart) -> Result<()>;
    async fn delete_cart(&self, customer_id: CustomerId) -> Result<()>;

    /// Empties the stored cart only while it still matches `expected`, so a
    /// cart can be claimed by at most one checkout. Returns `false` when
    /// another writer got there first.
    async fn claim_for_checkout(&self, expected: &Cart) -> Result<bool>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create_order(&self, order: &Order) -> Result<()>;
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;
    async fn list_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>>;
    async fn order_number_exists(&self, number: &OrderNumber) -> Result<bool>;

    /// Compare-and-set: applies `status` only while the stored status is
    /// still `expected`, otherwise fails with `ConcurrentModification`.
    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        status: OrderStatus,
        inventory_released: bool,
    ) -> Result<Order>;

    async fn update_payment_status(&self, id: OrderId, status: PaymentStatus) -> Result<Order>;
}

#[async_trait]
pub trait DiscountLookup: Send + Sync {
    /// Codes are stored normalised to upper case.
    async fn lookup_discount(&self, code: &str) -> Result<Option<Discount>>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<()>;
}
