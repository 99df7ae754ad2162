//! Checkout: turns a customer's cart into an order.
//!
//! The commit is all-or-nothing. The cart is validated again immediately
//! before stock is touched and then claimed, so a cart becomes at most one
//! order even when checkout is submitted twice. Stock is taken one atomic
//! decrement per line, and any failure after the claim hands every unit back
//! and restores the cart before the error is returned.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::aggregates::{Cart, CheckoutDetails, Order, OrderItem, Product};
use crate::domain::events::DomainEvent;
use crate::domain::value_objects::{CustomerId, Money, OrderNumber, ProductId};
use crate::ports::{CartRepository, DiscountLookup, EventPublisher, Inventory, OrderRepository};
use crate::services::cart_store::live_price;
use crate::services::cart_validator::{fetch_products, CartValidator, ValidationReport};
use crate::services::discount::DiscountResolver;
use crate::{EcommerceError, Result};

/// How order numbers are minted.
#[derive(Clone, Debug)]
pub struct OrderNumberPolicy {
    pub prefix: String,
    pub max_attempts: u32,
}

impl Default for OrderNumberPolicy {
    fn default() -> Self { Self { prefix: "ORD".to_string(), max_attempts: 8 } }
}

#[derive(Clone)]
pub struct OrderCommitter {
    carts: Arc<dyn CartRepository>,
    inventory: Arc<dyn Inventory>,
    orders: Arc<dyn OrderRepository>,
    discounts: Arc<dyn DiscountLookup>,
    events: Arc<dyn EventPublisher>,
    validator: CartValidator,
    numbers: OrderNumberPolicy,
}

impl OrderCommitter {
    pub fn new(
        carts: Arc<dyn CartRepository>,
        inventory: Arc<dyn Inventory>,
        orders: Arc<dyn OrderRepository>,
        discounts: Arc<dyn DiscountLookup>,
        events: Arc<dyn EventPublisher>,
        numbers: OrderNumberPolicy,
    ) -> Self {
        let validator = CartValidator::new(inventory.clone(), discounts.clone());
        Self { carts, inventory, orders, discounts, events, validator, numbers }
    }

    #[tracing::instrument(skip(self, details))]
    pub async fn commit(&self, customer_id: CustomerId, details: CheckoutDetails) -> Result<Order> {
        let cart = match self.carts.load_cart(customer_id).await? {
            Some(cart) if !cart.is_empty() => cart,
            _ => {
                let report = ValidationReport { errors: vec!["Cart is empty".to_string()], ..Default::default() };
                return Err(EcommerceError::CartInvalid(report));
            }
        };

        let products = fetch_products(self.inventory.as_ref(), &cart).await?;
        let report = self.validator.validate_against(&cart, &products).await?;
        if !report.valid {
            tracing::warn!(summary = %report.summary(), "checkout rejected by validation");
            return Err(EcommerceError::CartInvalid(report));
        }

        if !self.carts.claim_for_checkout(&cart).await? {
            tracing::warn!("cart changed while checking out");
            return Err(self.lost_claim(customer_id).await);
        }

        let mut taken: Vec<(ProductId, u32)> = Vec::with_capacity(cart.items().len());
        for item in cart.items() {
            let quantity = item.quantity.value();
            if let Err(e) = self.inventory.decrement_stock(item.product_id, quantity).await {
                tracing::warn!(product_id = %item.product_id, error = %e, "stock decrement failed, rolling back");
                self.rollback(&cart, &taken).await;
                return Err(e);
            }
            taken.push((item.product_id, quantity));
        }

        match self.place(&cart, &products, details).await {
            Ok(order) => {
                tracing::info!(order_id = %order.id(), order_number = %order.order_number(), total = %order.total(), "order placed");
                if let Err(e) = self.events.publish(DomainEvent::placed(&order)).await {
                    tracing::warn!(error = %e, "failed to publish order placed event");
                }
                Ok(order)
            }
            Err(e) => {
                tracing::warn!(error = %e, "order placement failed, rolling back");
                self.rollback(&cart, &taken).await;
                Err(e)
            }
        }
    }

    /// Builds and stores the order once the cart is claimed and stock taken.
    async fn place(&self, cart: &Cart, products: &HashMap<ProductId, Product>, details: CheckoutDetails) -> Result<Order> {
        let mut items = Vec::with_capacity(cart.items().len());
        for item in cart.items() {
            let product = products.get(&item.product_id).ok_or(EcommerceError::ProductNotFound(item.product_id))?;
            items.push(OrderItem::new(product.id, product.name.clone(), item.quantity.value(), product.effective_price()));
        }

        let discount = match cart.discount_code() {
            Some(code) => {
                let subtotal = cart.subtotal(|id| live_price(products, id));
                let definition = self.discounts.lookup_discount(code).await?;
                DiscountResolver::check(definition.as_ref(), code, subtotal, Utc::now())?
            }
            None => Money::zero(),
        };

        let number = self.allocate_order_number().await?;
        let order = Order::place(number, cart.customer_id(), items, details, cart.discount_code().map(str::to_string), discount);
        self.orders.create_order(&order).await?;
        Ok(order)
    }

    /// Another request emptied or edited the cart between load and claim.
    async fn lost_claim(&self, customer_id: CustomerId) -> EcommerceError {
        let message = match self.carts.load_cart(customer_id).await {
            Ok(Some(cart)) if !cart.is_empty() => "Cart changed during checkout",
            _ => "Cart is empty",
        };
        EcommerceError::CartInvalid(ValidationReport { errors: vec![message.to_string()], ..Default::default() })
    }

    async fn allocate_order_number(&self) -> Result<OrderNumber> {
        for _ in 0..self.numbers.max_attempts {
            let candidate = {
                let mut rng = rand::thread_rng();
                OrderNumber::generate(&self.numbers.prefix, Utc::now(), &mut rng)
            };
            if !self.orders.order_number_exists(&candidate).await? {
                return Ok(candidate);
            }
            tracing::debug!(%candidate, "order number collision, retrying");
        }
        Err(EcommerceError::OrderNumberExhausted(self.numbers.max_attempts))
    }

    /// Returns taken stock and puts the claimed cart back.
    async fn rollback(&self, cart: &Cart, taken: &[(ProductId, u32)]) {
        for (product_id, quantity) in taken {
            if let Err(e) = self.inventory.increment_stock(*product_id, *quantity).await {
                tracing::error!(%product_id, quantity, error = %e, "failed to return stock during rollback");
            }
        }
        if let Err(e) = self.carts.save_cart(cart).await {
            tracing::error!(error = %e, customer_id = %cart.customer_id(), "failed to restore cart");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{OrderStatus, PaymentStatus};
    use crate::domain::value_objects::OrderId;
    use crate::infrastructure::events::RecordingPublisher;
    use crate::infrastructure::memory::{MemoryCarts, MemoryDiscounts, MemoryInventory, MemoryOrders};
    use crate::services::cart_store::CartStore;
    use crate::services::discount::Discount;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    /// Order store that refuses every write.
    #[derive(Default)]
    struct BrokenOrders(MemoryOrders);

    #[async_trait]
    impl OrderRepository for BrokenOrders {
        async fn create_order(&self, _order: &Order) -> Result<()> { Err(EcommerceError::Storage("disk full".into())) }
        async fn get_order(&self, id: OrderId) -> Result<Option<Order>> { self.0.get_order(id).await }
        async fn list_for_customer(&self, c: CustomerId) -> Result<Vec<Order>> { self.0.list_for_customer(c).await }
        async fn order_number_exists(&self, n: &OrderNumber) -> Result<bool> { self.0.order_number_exists(n).await }
        async fn update_status(&self, id: OrderId, e: OrderStatus, s: OrderStatus, r: bool) -> Result<Order> { self.0.update_status(id, e, s, r).await }
        async fn update_payment_status(&self, id: OrderId, s: PaymentStatus) -> Result<Order> { self.0.update_payment_status(id, s).await }
    }

    /// Inventory where another buyer takes one unit of `contested` just before
    /// our decrement for it lands.
    struct RacingInventory {
        inner: Arc<MemoryInventory>,
        contested: ProductId,
    }

    #[async_trait]
    impl Inventory for RacingInventory {
        async fn get_product(&self, id: ProductId) -> Result<Option<Product>> { self.inner.get_product(id).await }
        async fn decrement_stock(&self, id: ProductId, amount: u32) -> Result<u32> {
            if id == self.contested {
                self.inner.decrement_stock(id, 1).await?;
            }
            self.inner.decrement_stock(id, amount).await
        }
        async fn increment_stock(&self, id: ProductId, amount: u32) -> Result<u32> { self.inner.increment_stock(id, amount).await }
        async fn upsert_product(&self, product: Product) -> Result<()> { self.inner.upsert_product(product).await }
    }

    struct Fixture {
        inventory: Arc<MemoryInventory>,
        carts: Arc<MemoryCarts>,
        discounts: Arc<MemoryDiscounts>,
        events: Arc<RecordingPublisher>,
        store: CartStore,
    }

    fn fixture() -> Fixture {
        let inventory = Arc::new(MemoryInventory::default());
        let carts = Arc::new(MemoryCarts::default());
        let discounts = Arc::new(MemoryDiscounts::default());
        let store = CartStore::new(carts.clone(), inventory.clone(), discounts.clone());
        Fixture { inventory, carts, discounts, events: Arc::new(RecordingPublisher::default()), store }
    }

    impl Fixture {
        fn committer(&self, orders: Arc<dyn OrderRepository>) -> OrderCommitter {
            self.committer_over(self.inventory.clone(), orders)
        }

        fn committer_over(&self, inventory: Arc<dyn Inventory>, orders: Arc<dyn OrderRepository>) -> OrderCommitter {
            OrderCommitter::new(self.carts.clone(), inventory, orders, self.discounts.clone(), self.events.clone(), OrderNumberPolicy::default())
        }

        async fn product(&self, price: i64, stock: u32) -> Product {
            let p = Product::create("Item", Money::from_major(price), stock);
            self.inventory.upsert_product(p.clone()).await.unwrap();
            p
        }
    }

    #[tokio::test]
    async fn test_commit_snapshots_and_clears() {
        let f = fixture();
        let orders = Arc::new(MemoryOrders::default());
        let committer = f.committer(orders.clone());
        let customer = CustomerId::new();
        let p = f.product(100, 5).await;
        f.store.add_item(customer, p.id, 2).await.unwrap();

        let order = committer.commit(customer, CheckoutDetails::default()).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.items()[0].unit_price, Money::from_major(100));
        assert_eq!(order.total(), Money::from_major(200));
        assert_eq!(f.inventory.stock_of(p.id).await, Some(3));
        assert!(f.store.view(customer).await.unwrap().cart.is_empty());
        assert_eq!(orders.len().await, 1);
        assert_eq!(f.events.events().await.len(), 1);

        f.inventory.upsert_product(Product { price: Money::from_major(999), ..p }).await.unwrap();
        let stored = orders.get_order(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.items()[0].unit_price, Money::from_major(100));
    }

    #[tokio::test]
    async fn test_empty_cart_rejected() {
        let f = fixture();
        let committer = f.committer(Arc::new(MemoryOrders::default()));
        let err = committer.commit(CustomerId::new(), CheckoutDetails::default()).await.unwrap_err();
        assert!(matches!(err, EcommerceError::CartInvalid(report) if !report.errors.is_empty()));
    }

    #[tokio::test]
    async fn test_invalid_cart_changes_nothing() {
        let f = fixture();
        let orders = Arc::new(MemoryOrders::default());
        let committer = f.committer(orders.clone());
        let customer = CustomerId::new();
        let plenty = f.product(10, 10).await;
        let scarce = f.product(20, 3).await;
        f.store.add_item(customer, plenty.id, 2).await.unwrap();
        f.store.add_item(customer, scarce.id, 5).await.unwrap();
        let before = f.store.view(customer).await.unwrap().cart;

        let err = committer.commit(customer, CheckoutDetails::default()).await.unwrap_err();
        assert!(matches!(err, EcommerceError::CartInvalid(ref report) if report.out_of_stock == vec![scarce.id]));
        assert_eq!(f.inventory.stock_of(plenty.id).await, Some(10));
        assert_eq!(f.inventory.stock_of(scarce.id).await, Some(3));
        assert_eq!(f.store.view(customer).await.unwrap().cart, before);
        assert!(orders.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_order_write_rolls_back() {
        let f = fixture();
        let committer = f.committer(Arc::new(BrokenOrders::default()));
        let customer = CustomerId::new();
        let a = f.product(10, 4).await;
        let b = f.product(15, 2).await;
        f.store.add_item(customer, a.id, 3).await.unwrap();
        f.store.add_item(customer, b.id, 2).await.unwrap();
        let before = f.store.view(customer).await.unwrap().cart;

        assert!(matches!(committer.commit(customer, CheckoutDetails::default()).await, Err(EcommerceError::Storage(_))));
        assert_eq!(f.inventory.stock_of(a.id).await, Some(4));
        assert_eq!(f.inventory.stock_of(b.id).await, Some(2));
        assert_eq!(f.store.view(customer).await.unwrap().cart, before);
        assert!(f.events.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_stock_lost_mid_commit_rolls_back() {
        let f = fixture();
        let orders = Arc::new(MemoryOrders::default());
        let customer = CustomerId::new();
        let a = f.product(10, 5).await;
        let b = f.product(15, 2).await;
        f.store.add_item(customer, a.id, 3).await.unwrap();
        f.store.add_item(customer, b.id, 2).await.unwrap();
        let before = f.store.view(customer).await.unwrap().cart;
        let racing = Arc::new(RacingInventory { inner: f.inventory.clone(), contested: b.id });
        let committer = f.committer_over(racing, orders.clone());

        let err = committer.commit(customer, CheckoutDetails::default()).await.unwrap_err();
        assert!(matches!(err, EcommerceError::OutOfStock { product_id, requested: 2, available: 1 } if product_id == b.id));
        assert_eq!(f.inventory.stock_of(a.id).await, Some(5));
        assert_eq!(f.inventory.stock_of(b.id).await, Some(1));
        assert!(orders.is_empty().await);
        let after = f.store.view(customer).await.unwrap().cart;
        assert_eq!(after.total_items(), 2);
        assert_eq!(after, before);
        assert!(f.events.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_discount_frozen_into_order() {
        let f = fixture();
        let committer = f.committer(Arc::new(MemoryOrders::default()));
        let customer = CustomerId::new();
        f.discounts.insert(Discount::percentage("SAVE10", Decimal::TEN)).await;
        let p = f.product(200_000, 3).await;
        f.store.add_item(customer, p.id, 1).await.unwrap();
        f.store.apply_discount_code(customer, "SAVE10").await.unwrap();

        let order = committer.commit(customer, CheckoutDetails::default()).await.unwrap();
        assert_eq!(order.discount_code(), Some("SAVE10"));
        assert_eq!(order.discount_total(), Money::from_major(20_000));
        assert_eq!(order.total(), Money::from_major(180_000));
        assert_eq!(f.store.view(customer).await.unwrap().cart.discount_code(), None);
    }
}
