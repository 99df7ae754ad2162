//! Per-customer cart operations.
//!
//! Every operation returns a fresh [`CartView`] whose summary is derived from
//! the catalog as it is right now. Adding to the cart never checks stock; the
//! validator catches over-subscription at checkout.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::aggregates::{Cart, CartSummary, Product};
use crate::domain::value_objects::{CartItemId, CustomerId, Money, ProductId, Quantity};
use crate::ports::{CartRepository, DiscountLookup, Inventory};
use crate::services::cart_validator::fetch_products;
use crate::services::discount::{normalize_code, DiscountResolution, DiscountResolver};
use crate::{EcommerceError, Result};

/// Snapshot of a cart with its derived totals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartView {
    pub cart: Cart,
    pub summary: CartSummary,
    /// Present when the cart carries a discount code.
    pub discount: Option<DiscountResolution>,
}

/// Live effective price of an active product.
pub(crate) fn live_price(products: &HashMap<ProductId, Product>, id: &ProductId) -> Option<Money> {
    products.get(id).filter(|p| p.is_active).map(Product::effective_price)
}

#[derive(Clone)]
pub struct CartStore {
    carts: Arc<dyn CartRepository>,
    inventory: Arc<dyn Inventory>,
    discounts: Arc<dyn DiscountLookup>,
}

impl CartStore {
    pub fn new(carts: Arc<dyn CartRepository>, inventory: Arc<dyn Inventory>, discounts: Arc<dyn DiscountLookup>) -> Self {
        Self { carts, inventory, discounts }
    }

    /// Renders the cart and records the live prices shown as the prices the
    /// customer has now seen, so a price change is reported once.
    pub async fn view(&self, customer_id: CustomerId) -> Result<CartView> {
        let Some(mut cart) = self.carts.load_cart(customer_id).await? else {
            return self.render(Cart::for_customer(customer_id)).await;
        };
        let products = fetch_products(self.inventory.as_ref(), &cart).await?;
        let drifted = cart.items().iter()
            .any(|item| live_price(&products, &item.product_id).is_some_and(|live| live != item.seen_unit_price));
        if drifted {
            cart.mark_prices_seen(|id| live_price(&products, id));
            self.carts.save_cart(&cart).await?;
            tracing::debug!(%customer_id, "recorded changed prices as seen");
        }
        self.render(cart).await
    }

    /// The stored cart exactly as saved, without recording anything as seen.
    pub async fn cart(&self, customer_id: CustomerId) -> Result<Cart> {
        self.load_or_create(customer_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_item(&self, customer_id: CustomerId, product_id: ProductId, quantity: i64) -> Result<CartView> {
        let quantity = Quantity::new(quantity)?;
        let product = self.inventory.get_product(product_id).await?
            .filter(|p| p.is_active)
            .ok_or(EcommerceError::ProductNotFound(product_id))?;
        let mut cart = self.load_or_create(customer_id).await?;
        cart.add_item(product_id, quantity, product.effective_price());
        self.carts.save_cart(&cart).await?;
        tracing::debug!(%product_id, quantity = quantity.value(), "item added to cart");
        self.render(cart).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_quantity(&self, customer_id: CustomerId, item_id: CartItemId, quantity: i64) -> Result<CartView> {
        let quantity = Quantity::new(quantity)?;
        let mut cart = self.carts.load_cart(customer_id).await?.ok_or(EcommerceError::CartItemNotFound(item_id))?;
        cart.update_quantity(item_id, quantity)?;
        self.carts.save_cart(&cart).await?;
        self.render(cart).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, customer_id: CustomerId, item_id: CartItemId) -> Result<CartView> {
        let Some(mut cart) = self.carts.load_cart(customer_id).await? else {
            return self.render(Cart::for_customer(customer_id)).await;
        };
        if cart.remove_item(item_id) {
            self.carts.save_cart(&cart).await?;
        }
        self.render(cart).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, customer_id: CustomerId) -> Result<CartView> {
        let Some(mut cart) = self.carts.load_cart(customer_id).await? else {
            return self.render(Cart::for_customer(customer_id)).await;
        };
        cart.clear();
        self.carts.save_cart(&cart).await?;
        self.render(cart).await
    }

    /// Stores the code on the cart only when it resolves against the current
    /// subtotal. The amount itself is never stored.
    #[tracing::instrument(skip(self))]
    pub async fn apply_discount_code(&self, customer_id: CustomerId, code: &str) -> Result<(DiscountResolution, CartView)> {
        let mut cart = self.load_or_create(customer_id).await?;
        let products = fetch_products(self.inventory.as_ref(), &cart).await?;
        let subtotal = cart.subtotal(|id| live_price(&products, id));
        let discount = self.discounts.lookup_discount(code).await?;
        let resolution = DiscountResolver::resolve(discount.as_ref(), code, subtotal, Utc::now());
        if resolution.applied {
            cart.set_discount_code(normalize_code(code));
            self.carts.save_cart(&cart).await?;
        } else {
            tracing::debug!(code = %resolution.code, reason = %resolution.message, "discount code rejected");
        }
        let view = self.render(cart).await?;
        Ok((resolution, view))
    }

    pub async fn remove_discount_code(&self, customer_id: CustomerId) -> Result<CartView> {
        let Some(mut cart) = self.carts.load_cart(customer_id).await? else {
            return self.render(Cart::for_customer(customer_id)).await;
        };
        if cart.discount_code().is_some() {
            cart.remove_discount_code();
            self.carts.save_cart(&cart).await?;
        }
        self.render(cart).await
    }

    /// Accepts the current catalog prices after a price-changed warning.
    pub async fn refresh_prices(&self, customer_id: CustomerId) -> Result<CartView> {
        let Some(mut cart) = self.carts.load_cart(customer_id).await? else {
            return self.render(Cart::for_customer(customer_id)).await;
        };
        let products = fetch_products(self.inventory.as_ref(), &cart).await?;
        cart.mark_prices_seen(|id| live_price(&products, id));
        self.carts.save_cart(&cart).await?;
        self.render(cart).await
    }

    async fn load_or_create(&self, customer_id: CustomerId) -> Result<Cart> {
        Ok(self.carts.load_cart(customer_id).await?.unwrap_or_else(|| Cart::for_customer(customer_id)))
    }

    async fn render(&self, cart: Cart) -> Result<CartView> {
        let products = fetch_products(self.inventory.as_ref(), &cart).await?;
        let subtotal = cart.subtotal(|id| live_price(&products, id));
        let discount = match cart.discount_code() {
            Some(code) => {
                let definition = self.discounts.lookup_discount(code).await?;
                Some(DiscountResolver::resolve(definition.as_ref(), code, subtotal, Utc::now()))
            }
            None => None,
        };
        let amount = discount.as_ref().map(|d| d.discount_amount).unwrap_or_default();
        let summary = CartSummary::new(subtotal, amount, cart.total_quantity(), cart.total_items());
        Ok(CartView { cart, summary, discount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory::{MemoryCarts, MemoryDiscounts, MemoryInventory};
    use crate::services::cart_validator::CartValidator;
    use crate::services::discount::Discount;
    use rust_decimal::Decimal;

    struct Fixture { inventory: Arc<MemoryInventory>, discounts: Arc<MemoryDiscounts>, store: CartStore }

    fn fixture() -> Fixture {
        let inventory = Arc::new(MemoryInventory::default());
        let discounts = Arc::new(MemoryDiscounts::default());
        let store = CartStore::new(Arc::new(MemoryCarts::default()), inventory.clone(), discounts.clone());
        Fixture { inventory, discounts, store }
    }

    async fn product(f: &Fixture, price: i64, stock: u32) -> Product {
        let p = Product::create("Item", Money::from_major(price), stock);
        f.inventory.upsert_product(p.clone()).await.unwrap();
        p
    }

    #[tokio::test]
    async fn test_add_merges_and_summarises() {
        let f = fixture();
        let customer = CustomerId::new();
        let p = product(&f, 50, 10).await;
        f.store.add_item(customer, p.id, 1).await.unwrap();
        let view = f.store.add_item(customer, p.id, 2).await.unwrap();
        assert_eq!(view.cart.items().len(), 1);
        assert_eq!(view.summary.total_quantity, 3);
        assert_eq!(view.summary.total_items, 1);
        assert_eq!(view.summary.subtotal, Money::from_major(150));
    }

    #[tokio::test]
    async fn test_add_does_not_check_stock() {
        let f = fixture();
        let p = product(&f, 10, 1).await;
        let view = f.store.add_item(CustomerId::new(), p.id, 5).await.unwrap();
        assert_eq!(view.summary.total_quantity, 5);
    }

    #[tokio::test]
    async fn test_invalid_quantities_rejected() {
        let f = fixture();
        let customer = CustomerId::new();
        let p = product(&f, 10, 5).await;
        assert!(matches!(f.store.add_item(customer, p.id, 0).await, Err(EcommerceError::InvalidQuantity(0))));
        let view = f.store.add_item(customer, p.id, 1).await.unwrap();
        let item = view.cart.items()[0].id;
        assert!(matches!(f.store.update_quantity(customer, item, 0).await, Err(EcommerceError::InvalidQuantity(0))));
        let view = f.store.update_quantity(customer, item, 4).await.unwrap();
        assert_eq!(view.summary.subtotal, Money::from_major(40));
    }

    #[tokio::test]
    async fn test_unknown_product_rejected() {
        let f = fixture();
        let missing = ProductId::new();
        assert!(matches!(f.store.add_item(CustomerId::new(), missing, 1).await, Err(EcommerceError::ProductNotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn test_remove_and_clear_are_idempotent() {
        let f = fixture();
        let customer = CustomerId::new();
        let p = product(&f, 10, 5).await;
        let item = f.store.add_item(customer, p.id, 1).await.unwrap().cart.items()[0].id;
        f.store.remove_item(customer, item).await.unwrap();
        let view = f.store.remove_item(customer, item).await.unwrap();
        assert!(view.cart.is_empty());
        f.store.clear(customer).await.unwrap();
        assert!(f.store.clear(CustomerId::new()).await.unwrap().cart.is_empty());
    }

    #[tokio::test]
    async fn test_subtotal_follows_live_prices() {
        let f = fixture();
        let customer = CustomerId::new();
        let p = product(&f, 100, 5).await;
        f.store.add_item(customer, p.id, 2).await.unwrap();
        f.inventory.upsert_product(p.clone().with_sale_price(Money::from_major(70))).await.unwrap();
        assert_eq!(f.store.view(customer).await.unwrap().summary.subtotal, Money::from_major(140));
    }

    #[tokio::test]
    async fn test_discount_recomputed_after_removal() {
        let f = fixture();
        let customer = CustomerId::new();
        f.discounts.insert(Discount::percentage("SAVE10", Decimal::TEN)).await;
        let a = product(&f, 150_000, 5).await;
        let b = product(&f, 50_000, 5).await;
        f.store.add_item(customer, a.id, 1).await.unwrap();
        let view = f.store.add_item(customer, b.id, 1).await.unwrap();
        assert_eq!(view.summary.subtotal, Money::from_major(200_000));

        let (resolution, view) = f.store.apply_discount_code(customer, "save10").await.unwrap();
        assert!(resolution.applied);
        assert_eq!(resolution.new_subtotal, Money::from_major(180_000));
        assert_eq!(view.summary.total, Money::from_major(180_000));
        assert_eq!(view.cart.discount_code(), Some("SAVE10"));

        let item_b = view.cart.items().iter().find(|i| i.product_id == b.id).unwrap().id;
        let view = f.store.remove_item(customer, item_b).await.unwrap();
        assert_eq!(view.summary.subtotal, Money::from_major(150_000));
        assert_eq!(view.summary.discount, Money::from_major(15_000));
        assert_eq!(view.summary.total, Money::from_major(135_000));
    }

    #[tokio::test]
    async fn test_rejected_code_not_stored() {
        let f = fixture();
        let customer = CustomerId::new();
        let p = product(&f, 10, 5).await;
        f.store.add_item(customer, p.id, 1).await.unwrap();
        let (resolution, view) = f.store.apply_discount_code(customer, "GHOST").await.unwrap();
        assert!(!resolution.applied);
        assert_eq!(view.cart.discount_code(), None);
        assert!(view.discount.is_none());
    }

    #[tokio::test]
    async fn test_refresh_prices_accepts_live_price() {
        let f = fixture();
        let customer = CustomerId::new();
        let p = product(&f, 100, 5).await;
        f.store.add_item(customer, p.id, 1).await.unwrap();
        f.inventory.upsert_product(p.clone().with_sale_price(Money::from_major(90))).await.unwrap();
        let view = f.store.refresh_prices(customer).await.unwrap();
        assert_eq!(view.cart.items()[0].seen_unit_price, Money::from_major(90));
    }

    #[tokio::test]
    async fn test_view_records_shown_prices() {
        let f = fixture();
        let validator = CartValidator::new(f.inventory.clone(), f.discounts.clone());
        let customer = CustomerId::new();
        let p = product(&f, 100, 5).await;
        f.store.add_item(customer, p.id, 1).await.unwrap();
        f.inventory.upsert_product(p.clone().with_sale_price(Money::from_major(80))).await.unwrap();

        let stale = f.store.cart(customer).await.unwrap();
        assert_eq!(validator.validate(&stale).await.unwrap().price_changed, vec![p.id]);

        let view = f.store.view(customer).await.unwrap();
        assert_eq!(view.cart.items()[0].seen_unit_price, Money::from_major(80));
        let report = validator.validate(&f.store.cart(customer).await.unwrap()).await.unwrap();
        assert!(report.price_changed.is_empty());
        assert!(report.valid);
    }
}
