//! Order status and payment status transitions.
//!
//! Status writes go through the store's compare-and-set so that two
//! concurrent edits of the same order cannot both win. Returning stock on
//! cancellation is an explicit compensating step tied to the status write: if
//! the stock cannot be returned the status is put back.

use std::sync::Arc;

use crate::domain::aggregates::{Actor, Order, OrderStatus, PaymentStatus};
use crate::domain::events::{DomainEvent, InventoryEvent};
use crate::domain::value_objects::{AdminId, CustomerId, OrderId, ProductId};
use crate::ports::{EventPublisher, Inventory, OrderRepository};
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct OrderStateMachine {
    orders: Arc<dyn OrderRepository>,
    inventory: Arc<dyn Inventory>,
    events: Arc<dyn EventPublisher>,
}

impl OrderStateMachine {
    pub fn new(orders: Arc<dyn OrderRepository>, inventory: Arc<dyn Inventory>, events: Arc<dyn EventPublisher>) -> Self {
        Self { orders, inventory, events }
    }

    /// Customers only see their own orders; anyone else's is reported as missing.
    pub async fn get_order(&self, actor: &Actor, order_id: OrderId) -> Result<Order> {
        let order = self.orders.get_order(order_id).await?.ok_or(EcommerceError::OrderNotFound(order_id))?;
        match actor {
            Actor::Customer(customer_id) if order.customer_id() != *customer_id => Err(EcommerceError::OrderNotFound(order_id)),
            _ => Ok(order),
        }
    }

    pub async fn list_orders(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        self.orders.list_for_customer(customer_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_by_customer(&self, customer_id: CustomerId, order_id: OrderId) -> Result<Order> {
        let actor = Actor::Customer(customer_id);
        let order = self.get_order(&actor, order_id).await?;
        self.transition(actor, order, OrderStatus::Cancelled).await
    }

    /// Admins may set any status. `expected`, when given, must match the
    /// current status or the edit is rejected as concurrent.
    #[tracing::instrument(skip(self))]
    pub async fn set_status_by_admin(
        &self,
        admin_id: AdminId,
        order_id: OrderId,
        status: OrderStatus,
        expected: Option<OrderStatus>,
    ) -> Result<Order> {
        let actor = Actor::Admin(admin_id);
        let order = self.get_order(&actor, order_id).await?;
        if let Some(expected) = expected.filter(|e| *e != order.status()) {
            return Err(EcommerceError::ConcurrentModification { order_id, expected, actual: order.status() });
        }
        if order.status() == status {
            return Ok(order);
        }
        self.transition(actor, order, status).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_payment_status_by_admin(&self, admin_id: AdminId, order_id: OrderId, status: PaymentStatus) -> Result<Order> {
        let actor = Actor::Admin(admin_id);
        let order = self.get_order(&actor, order_id).await?;
        let from = order.payment_status();
        if from == status {
            return Ok(order);
        }
        let updated = self.orders.update_payment_status(order_id, status).await?;
        self.emit(DomainEvent::payment_status_changed(order_id, from, status, actor)).await;
        Ok(updated)
    }

    async fn transition(&self, actor: Actor, order: Order, to: OrderStatus) -> Result<Order> {
        let from = order.status();
        if let Err(e) = from.check_transition(to, &actor) {
            tracing::warn!(order_id = %order.id(), %from, %to, %actor, "illegal status transition rejected");
            return Err(e);
        }

        let release = order.releases_inventory_on(to);
        let updated = self.orders.update_status(order.id(), from, to, order.inventory_released() || release).await?;

        if release {
            if let Err(e) = self.return_stock(&updated).await {
                tracing::error!(order_id = %order.id(), error = %e, "restock failed, reverting status");
                if let Err(revert) = self.orders.update_status(order.id(), to, from, order.inventory_released()).await {
                    tracing::error!(order_id = %order.id(), error = %revert, "failed to revert status after restock failure");
                }
                return Err(e);
            }
        }

        tracing::info!(order_id = %order.id(), %from, %to, %actor, restocked = release, "order status changed");
        self.emit(DomainEvent::status_changed(order.id(), from, to, actor)).await;
        Ok(updated)
    }

    /// Hands every line back to inventory, undoing partial progress on failure.
    async fn return_stock(&self, order: &Order) -> Result<()> {
        let mut returned: Vec<(ProductId, u32)> = Vec::with_capacity(order.items().len());
        for item in order.items() {
            match self.inventory.increment_stock(item.product_id, item.quantity).await {
                Ok(_) => returned.push((item.product_id, item.quantity)),
                Err(e) => {
                    for (product_id, quantity) in &returned {
                        if let Err(undo) = self.inventory.decrement_stock(*product_id, *quantity).await {
                            tracing::error!(%product_id, error = %undo, "failed to undo partial restock");
                        }
                    }
                    return Err(e);
                }
            }
        }
        for (product_id, quantity) in returned {
            self.emit(DomainEvent::Inventory(InventoryEvent::Restocked { order_id: order.id(), product_id, quantity })).await;
        }
        Ok(())
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            tracing::warn!(error = %e, "failed to publish domain event");
        }
    }
}
