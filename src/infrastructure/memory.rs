//! In-process stores.
//!
//! Used when no database is configured and throughout the tests. Each store
//! keeps its rows behind a single tokio lock, so every operation is atomic
//! with respect to every other operation on the same store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

use crate::domain::aggregates::{Cart, Order, OrderStatus, PaymentStatus, Product};
use crate::domain::value_objects::{CustomerId, OrderId, OrderNumber, ProductId};
use crate::ports::{CartRepository, DiscountLookup, Inventory, OrderRepository};
use crate::services::discount::{normalize_code, Discount};
use crate::{EcommerceError, Result};

#[derive(Default)]
pub struct MemoryInventory {
    products: Mutex<HashMap<ProductId, Product>>,
}

impl MemoryInventory {
    pub async fn stock_of(&self, id: ProductId) -> Option<u32> {
        self.products.lock().await.get(&id).map(|p| p.stock_quantity)
    }
}

#[async_trait]
impl Inventory for MemoryInventory {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.products.lock().await.get(&id).cloned())
    }

    async fn decrement_stock(&self, id: ProductId, amount: u32) -> Result<u32> {
        let mut products = self.products.lock().await;
        let product = products.get_mut(&id).ok_or(EcommerceError::ProductNotFound(id))?;
        let available = product.stock_quantity;
        product.remove_stock(amount).ok_or(EcommerceError::OutOfStock { product_id: id, requested: amount, available })
    }

    async fn increment_stock(&self, id: ProductId, amount: u32) -> Result<u32> {
        let mut products = self.products.lock().await;
        let product = products.get_mut(&id).ok_or(EcommerceError::ProductNotFound(id))?;
        product.add_stock(amount);
        Ok(product.stock_quantity)
    }

    async fn upsert_product(&self, product: Product) -> Result<()> {
        self.products.lock().await.insert(product.id, product);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCarts {
    carts: RwLock<HashMap<CustomerId, Cart>>,
}

#[async_trait]
impl CartRepository for MemoryCarts {
    async fn load_cart(&self, customer_id: CustomerId) -> Result<Option<Cart>> {
        Ok(self.carts.read().await.get(&customer_id).cloned())
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        self.carts.write().await.insert(cart.customer_id(), cart.clone());
        Ok(())
    }

    async fn delete_cart(&self, customer_id: CustomerId) -> Result<()> {
        self.carts.write().await.remove(&customer_id);
        Ok(())
    }

    async fn claim_for_checkout(&self, expected: &Cart) -> Result<bool> {
        let mut carts = self.carts.write().await;
        match carts.get_mut(&expected.customer_id()) {
            Some(stored) if stored == expected => {
                stored.clear();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct MemoryOrders {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl MemoryOrders {
    pub async fn len(&self) -> usize { self.orders.read().await.len() }
    pub async fn is_empty(&self) -> bool { self.orders.read().await.is_empty() }
}

#[async_trait]
impl OrderRepository for MemoryOrders {
    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.values().any(|o| o.order_number() == order.order_number()) {
            return Err(EcommerceError::Storage(format!("duplicate order number {}", order.order_number())));
        }
        orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn list_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let mut list: Vec<Order> = self.orders.read().await.values().filter(|o| o.customer_id() == customer_id).cloned().collect();
        list.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(list)
    }

    async fn order_number_exists(&self, number: &OrderNumber) -> Result<bool> {
        Ok(self.orders.read().await.values().any(|o| o.order_number() == number))
    }

    async fn update_status(&self, id: OrderId, expected: OrderStatus, status: OrderStatus, inventory_released: bool) -> Result<Order> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(EcommerceError::OrderNotFound(id))?;
        if order.status() != expected {
            return Err(EcommerceError::ConcurrentModification { order_id: id, expected, actual: order.status() });
        }
        order.set_status(status, inventory_released);
        Ok(order.clone())
    }

    async fn update_payment_status(&self, id: OrderId, status: PaymentStatus) -> Result<Order> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(EcommerceError::OrderNotFound(id))?;
        order.set_payment_status(status);
        Ok(order.clone())
    }
}

#[derive(Default)]
pub struct MemoryDiscounts {
    discounts: RwLock<HashMap<String, Discount>>,
}

impl MemoryDiscounts {
    pub async fn insert(&self, discount: Discount) {
        self.discounts.write().await.insert(normalize_code(&discount.code), discount);
    }
}

#[async_trait]
impl DiscountLookup for MemoryDiscounts {
    async fn lookup_discount(&self, code: &str) -> Result<Option<Discount>> {
        Ok(self.discounts.read().await.get(&normalize_code(code)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{CheckoutDetails, OrderItem};
    use crate::domain::value_objects::{Money, Quantity};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_decrement_never_goes_negative() {
        let inventory = MemoryInventory::default();
        let product = Product::create("Chair", Money::from_major(40), 3);
        let id = product.id;
        inventory.upsert_product(product).await.unwrap();
        assert_eq!(inventory.decrement_stock(id, 2).await.unwrap(), 1);
        assert!(matches!(
            inventory.decrement_stock(id, 2).await,
            Err(EcommerceError::OutOfStock { requested: 2, available: 1, .. })
        ));
        assert_eq!(inventory.stock_of(id).await, Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_decrements_respect_floor() {
        let inventory = Arc::new(MemoryInventory::default());
        let product = Product::create("Desk", Money::from_major(300), 5);
        let id = product.id;
        inventory.upsert_product(product).await.unwrap();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let inventory = inventory.clone();
                tokio::spawn(async move { inventory.decrement_stock(id, 1).await.is_ok() })
            })
            .collect();
        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() { succeeded += 1; }
        }
        assert_eq!(succeeded, 5);
        assert_eq!(inventory.stock_of(id).await, Some(0));
    }

    #[tokio::test]
    async fn test_status_compare_and_set() {
        let orders = MemoryOrders::default();
        let order = Order::place(
            OrderNumber::new("ORD-T"), CustomerId::new(),
            vec![OrderItem::new(ProductId::new(), "Pen", 1, Money::from_major(2))],
            CheckoutDetails::default(), None, Money::zero(),
        );
        orders.create_order(&order).await.unwrap();
        orders.update_status(order.id(), OrderStatus::Pending, OrderStatus::Confirmed, false).await.unwrap();
        let stale = orders.update_status(order.id(), OrderStatus::Pending, OrderStatus::Shipped, false).await;
        assert!(matches!(stale, Err(EcommerceError::ConcurrentModification { actual: OrderStatus::Confirmed, .. })));
        assert!(orders.order_number_exists(&OrderNumber::new("ORD-T")).await.unwrap());
    }

    #[tokio::test]
    async fn test_cart_claimed_once() {
        let carts = MemoryCarts::default();
        let mut cart = Cart::for_customer(CustomerId::new());
        cart.add_item(ProductId::new(), Quantity::new(2).unwrap(), Money::from_major(10));
        carts.save_cart(&cart).await.unwrap();

        assert!(carts.claim_for_checkout(&cart).await.unwrap());
        assert!(!carts.claim_for_checkout(&cart).await.unwrap());
        assert!(carts.load_cart(cart.customer_id()).await.unwrap().unwrap().is_empty());
        assert!(!carts.claim_for_checkout(&Cart::for_customer(CustomerId::new())).await.unwrap());
    }
}
