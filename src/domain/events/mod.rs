//! Domain events
//!
//! Audit trail for the order lifecycle. Every status change carries the old
//! and new status, the actor and a timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::{Actor, Order, OrderStatus, PaymentStatus};
use crate::domain::value_objects::{CustomerId, Money, OrderId, OrderNumber, ProductId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
    Inventory(InventoryEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: OrderId, order_number: OrderNumber, customer_id: CustomerId, total: Money, at: DateTime<Utc> },
    StatusChanged { order_id: OrderId, from: OrderStatus, to: OrderStatus, actor: Actor, at: DateTime<Utc> },
    PaymentStatusChanged { order_id: OrderId, from: PaymentStatus, to: PaymentStatus, actor: Actor, at: DateTime<Utc> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InventoryEvent {
    Restocked { order_id: OrderId, product_id: ProductId, quantity: u32 },
}

impl DomainEvent {
    pub fn placed(order: &Order) -> Self {
        Self::Order(OrderEvent::Placed {
            order_id: order.id(), order_number: order.order_number().clone(),
            customer_id: order.customer_id(), total: order.total(), at: order.created_at(),
        })
    }

    pub fn status_changed(order_id: OrderId, from: OrderStatus, to: OrderStatus, actor: Actor) -> Self {
        Self::Order(OrderEvent::StatusChanged { order_id, from, to, actor, at: Utc::now() })
    }

    pub fn payment_status_changed(order_id: OrderId, from: PaymentStatus, to: PaymentStatus, actor: Actor) -> Self {
        Self::Order(OrderEvent::PaymentStatusChanged { order_id, from, to, actor, at: Utc::now() })
    }

    /// Subject suffix used when the event leaves the process.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Placed { .. }) => "placed",
            Self::Order(OrderEvent::StatusChanged { .. }) => "status_changed",
            Self::Order(OrderEvent::PaymentStatusChanged { .. }) => "payment_status_changed",
            Self::Inventory(InventoryEvent::Restocked { .. }) => "restocked",
        }
    }
}
