//! Order Aggregate
//!
//! Orders are snapshots: item prices and totals are frozen when the order is
//! placed and only `status`, `payment_status` and the inventory release flag
//! change afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;
use crate::domain::value_objects::{AdminId, CustomerId, Money, OrderId, OrderNumber, ProductId};
use crate::{EcommerceError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub(crate) id: OrderId,
    pub(crate) order_number: OrderNumber,
    pub(crate) customer_id: CustomerId,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) shipping_address: Address,
    pub(crate) billing_address: Address,
    pub(crate) payment_method: PaymentMethod,
    pub(crate) notes: Option<String>,
    pub(crate) discount_code: Option<String>,
    pub(crate) subtotal: Money,
    pub(crate) discount_total: Money,
    pub(crate) total: Money,
    pub(crate) status: OrderStatus,
    pub(crate) payment_status: PaymentStatus,
    pub(crate) inventory_released: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem { pub product_id: ProductId, pub name: String, pub quantity: u32, pub unit_price: Money, pub total: Money }

impl OrderItem {
    pub fn new(product_id: ProductId, name: impl Into<String>, quantity: u32, unit_price: Money) -> Self {
        Self { product_id, name: name.into(), quantity, unit_price, total: unit_price.multiply(quantity) }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, max = 120))]
    pub full_name: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 255))]
    pub street: String,
    #[validate(length(min = 1, max = 120))]
    pub city: String,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    #[validate(length(min = 2, max = 56))]
    pub country: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { #[default] CashOnDelivery }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str { match self { Self::CashOnDelivery => "cash_on_delivery" } }
}

impl FromStr for PaymentMethod {
    type Err = EcommerceError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cash_on_delivery" | "cod" => Ok(Self::CashOnDelivery),
            other => Err(EcommerceError::Storage(format!("unknown payment method {other}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Completed, Cancelled, Refunded }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded }

/// Who is asking for a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor { Customer(CustomerId), Admin(AdminId) }

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::Customer(id) => write!(f, "customer:{id}"), Self::Admin(id) => write!(f, "admin:{id}") }
    }
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        Self::Pending, Self::Confirmed, Self::Processing, Self::Shipped,
        Self::Delivered, Self::Completed, Self::Cancelled, Self::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Confirmed => "confirmed", Self::Processing => "processing",
            Self::Shipped => "shipped", Self::Delivered => "delivered", Self::Completed => "completed",
            Self::Cancelled => "cancelled", Self::Refunded => "refunded",
        }
    }

    /// Stock decremented at checkout is still held by the order (nothing has left the warehouse).
    pub fn holds_stock(&self) -> bool { matches!(self, Self::Pending | Self::Confirmed | Self::Processing) }

    /// Transition table. Customers may only cancel before processing starts;
    /// admins may set any status, including out of terminal states.
    pub fn check_transition(&self, to: OrderStatus, actor: &Actor) -> Result<()> {
        let allowed = match actor {
            Actor::Admin(_) => true,
            Actor::Customer(_) => matches!((self, to), (Self::Pending | Self::Confirmed, Self::Cancelled)),
        };
        if allowed { Ok(()) } else { Err(EcommerceError::IllegalTransition { from: *self, to, actor: *actor }) }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = EcommerceError;
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == s)
            .ok_or_else(|| EcommerceError::Storage(format!("unknown order status {s}")))
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Paid => "paid", Self::Failed => "failed", Self::Refunded => "refunded" }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentStatus {
    type Err = EcommerceError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending), "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed), "refunded" => Ok(Self::Refunded),
            other => Err(EcommerceError::Storage(format!("unknown payment status {other}"))),
        }
    }
}

/// Everything the customer supplies at checkout.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CheckoutDetails {
    #[validate]
    pub shipping_address: Address,
    #[validate]
    pub billing_address: Address,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

impl Order {
    /// New order in `pending`/`pending`, totals frozen from `items`.
    pub fn place(
        order_number: OrderNumber,
        customer_id: CustomerId,
        items: Vec<OrderItem>,
        details: CheckoutDetails,
        discount_code: Option<String>,
        discount: Money,
    ) -> Self {
        let now = Utc::now();
        let subtotal: Money = items.iter().map(|i| i.total).sum();
        let discount_total = discount.min(subtotal);
        Self {
            id: OrderId::new(), order_number, customer_id, items,
            shipping_address: details.shipping_address, billing_address: details.billing_address,
            payment_method: details.payment_method, notes: details.notes, discount_code,
            subtotal, discount_total, total: subtotal.saturating_sub(&discount_total),
            status: OrderStatus::Pending, payment_status: PaymentStatus::Pending,
            inventory_released: false, created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> OrderId { self.id }
    pub fn order_number(&self) -> &OrderNumber { &self.order_number }
    pub fn customer_id(&self) -> CustomerId { self.customer_id }
    pub fn items(&self) -> &[OrderItem] { &self.items }
    pub fn shipping_address(&self) -> &Address { &self.shipping_address }
    pub fn billing_address(&self) -> &Address { &self.billing_address }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn notes(&self) -> Option<&str> { self.notes.as_deref() }
    pub fn discount_code(&self) -> Option<&str> { self.discount_code.as_deref() }
    pub fn subtotal(&self) -> Money { self.subtotal }
    pub fn discount_total(&self) -> Money { self.discount_total }
    pub fn total(&self) -> Money { self.total }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn inventory_released(&self) -> bool { self.inventory_released }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Whether moving to `to` should hand reserved stock back to inventory.
    pub fn releases_inventory_on(&self, to: OrderStatus) -> bool {
        matches!(to, OrderStatus::Cancelled | OrderStatus::Refunded) && self.status.holds_stock() && !self.inventory_released
    }

    pub(crate) fn set_status(&mut self, status: OrderStatus, inventory_released: bool) {
        self.status = status;
        self.inventory_released = inventory_released;
        self.touch();
    }

    pub(crate) fn set_payment_status(&mut self, status: PaymentStatus) { self.payment_status = status; self.touch(); }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
