//! Read-only check of a cart against live inventory and pricing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::aggregates::{Cart, Product};
use crate::domain::value_objects::ProductId;
use crate::ports::{DiscountLookup, Inventory};
use crate::services::discount::DiscountResolver;
use crate::Result;

/// Per-item findings. Every check runs for every line so one pass gives the
/// shopper the full list of things to fix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub out_of_stock: Vec<ProductId>,
    /// Live price differs from what the customer last saw. Never blocks checkout.
    pub price_changed: Vec<ProductId>,
    /// Missing or deactivated products; each also has an entry in `errors`.
    pub unavailable: Vec<ProductId>,
}

impl ValidationReport {
    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty() && self.out_of_stock.is_empty();
        self
    }

    pub fn summary(&self) -> String {
        format!("{} error(s), {} item(s) out of stock", self.errors.len(), self.out_of_stock.len())
    }
}

/// Fetches the current snapshot of every product referenced by `cart`.
pub(crate) async fn fetch_products(inventory: &dyn Inventory, cart: &Cart) -> Result<HashMap<ProductId, Product>> {
    let mut products = HashMap::with_capacity(cart.items().len());
    for item in cart.items() {
        if let Some(product) = inventory.get_product(item.product_id).await? {
            products.insert(item.product_id, product);
        }
    }
    Ok(products)
}

#[derive(Clone)]
pub struct CartValidator {
    inventory: Arc<dyn Inventory>,
    discounts: Arc<dyn DiscountLookup>,
}

impl CartValidator {
    pub fn new(inventory: Arc<dyn Inventory>, discounts: Arc<dyn DiscountLookup>) -> Self {
        Self { inventory, discounts }
    }

    #[tracing::instrument(skip_all, fields(customer_id = %cart.customer_id()))]
    pub async fn validate(&self, cart: &Cart) -> Result<ValidationReport> {
        let products = fetch_products(self.inventory.as_ref(), cart).await?;
        self.validate_against(cart, &products).await
    }

    /// Validates against an already fetched product snapshot.
    pub(crate) async fn validate_against(&self, cart: &Cart, products: &HashMap<ProductId, Product>) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();

        for item in cart.items() {
            let Some(product) = products.get(&item.product_id).filter(|p| p.is_active) else {
                report.errors.push(format!("Product {} is no longer available", item.product_id));
                report.unavailable.push(item.product_id);
                continue;
            };
            if item.quantity.value() > product.stock_quantity {
                report.out_of_stock.push(product.id);
            }
            if item.seen_unit_price != product.effective_price() {
                report.price_changed.push(product.id);
            }
        }

        if let Some(code) = cart.discount_code() {
            let subtotal = cart.subtotal(|id| products.get(id).filter(|p| p.is_active).map(Product::effective_price));
            let discount = self.discounts.lookup_discount(code).await?;
            if let Err(e) = DiscountResolver::check(discount.as_ref(), code, subtotal, Utc::now()) {
                report.errors.push(e.to_string());
            }
        }

        let report = report.finish();
        if !report.valid {
            tracing::debug!(errors = report.errors.len(), out_of_stock = report.out_of_stock.len(), "cart failed validation");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{CustomerId, Money, Quantity};
    use crate::infrastructure::memory::{MemoryDiscounts, MemoryInventory};
    use crate::services::discount::Discount;
    use rust_decimal::Decimal;

    async fn setup(stock: u32) -> (Arc<MemoryInventory>, Arc<MemoryDiscounts>, CartValidator, Product) {
        let inventory = Arc::new(MemoryInventory::default());
        let discounts = Arc::new(MemoryDiscounts::default());
        let product = Product::create("Lamp", Money::from_major(100), stock);
        inventory.upsert_product(product.clone()).await.unwrap();
        let validator = CartValidator::new(inventory.clone(), discounts.clone());
        (inventory, discounts, validator, product)
    }

    fn cart_with(product: &Product, qty: i64) -> Cart {
        let mut cart = Cart::for_customer(CustomerId::new());
        cart.add_item(product.id, Quantity::new(qty).unwrap(), product.effective_price());
        cart
    }

    #[tokio::test]
    async fn test_in_stock_cart_is_valid() {
        let (_, _, validator, product) = setup(10).await;
        let report = validator.validate(&cart_with(&product, 2)).await.unwrap();
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert!(report.out_of_stock.is_empty());
        assert!(report.price_changed.is_empty());
    }

    #[tokio::test]
    async fn test_over_subscribed_item_is_out_of_stock() {
        let (_, _, validator, product) = setup(3).await;
        let report = validator.validate(&cart_with(&product, 5)).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.out_of_stock, vec![product.id]);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_price_change_is_a_warning_only() {
        let (inventory, _, validator, product) = setup(10).await;
        let cart = cart_with(&product, 1);
        inventory.upsert_product(product.clone().with_sale_price(Money::from_major(60))).await.unwrap();
        let report = validator.validate(&cart).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.price_changed, vec![product.id]);
    }

    #[tokio::test]
    async fn test_checks_run_independently() {
        let (inventory, _, validator, product) = setup(1).await;
        let mut cart = cart_with(&product, 4);
        let gone = ProductId::new();
        cart.add_item(gone, Quantity::new(1).unwrap(), Money::from_major(5));
        let mut repriced = product.clone();
        repriced.price = Money::from_major(150);
        inventory.upsert_product(repriced).await.unwrap();

        let report = validator.validate(&cart).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.out_of_stock, vec![product.id]);
        assert_eq!(report.price_changed, vec![product.id]);
        assert_eq!(report.unavailable, vec![gone]);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_deactivated_product_is_an_error() {
        let (inventory, _, validator, product) = setup(10).await;
        let cart = cart_with(&product, 1);
        let mut inactive = product.clone();
        inactive.is_active = false;
        inventory.upsert_product(inactive).await.unwrap();
        let report = validator.validate(&cart).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.unavailable, vec![product.id]);
    }

    #[tokio::test]
    async fn test_lapsed_discount_code_is_an_error() {
        let (_, discounts, validator, product) = setup(10).await;
        discounts.insert(Discount::percentage("BULK", Decimal::TEN).with_minimum_subtotal(Money::from_major(500))).await;
        let mut cart = cart_with(&product, 1);
        cart.set_discount_code("BULK");
        let report = validator.validate(&cart).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
    }
}
