//! Cart Aggregate
//!
//! A cart never stores money totals. The summary is derived on demand from
//! live product prices so it cannot drift from the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{CartItemId, CustomerId, Money, ProductId, Quantity};
use crate::{EcommerceError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    customer_id: CustomerId,
    items: Vec<CartItem>,
    discount_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    /// Effective unit price the customer last saw for this line. Captured on
    /// add and updated whenever the cart is viewed or prices are refreshed.
    pub seen_unit_price: Money,
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    pub fn line_total(&self, unit_price: Money) -> Money { unit_price.multiply(self.quantity.value()) }
}

/// Derived totals, recomputed from the current catalog on every read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    pub total_quantity: u32,
    pub total_items: usize,
}

impl CartSummary {
    pub fn new(subtotal: Money, discount: Money, total_quantity: u32, total_items: usize) -> Self {
        let discount = discount.min(subtotal);
        Self { subtotal, discount, total: subtotal.saturating_sub(&discount), total_quantity, total_items }
    }
}

impl Cart {
    pub fn for_customer(customer_id: CustomerId) -> Self {
        let now = Utc::now();
        Self { customer_id, items: vec![], discount_code: None, created_at: now, updated_at: now }
    }

    /// Rebuild a cart loaded from storage.
    pub fn from_parts(
        customer_id: CustomerId,
        items: Vec<CartItem>,
        discount_code: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self { customer_id, items, discount_code, created_at, updated_at }
    }

    pub fn customer_id(&self) -> CustomerId { self.customer_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn discount_code(&self) -> Option<&str> { self.discount_code.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn total_items(&self) -> usize { self.items.len() }
    pub fn total_quantity(&self) -> u32 { self.items.iter().map(|i| i.quantity.value()).fold(0, u32::saturating_add) }

    /// Σ quantity × price, priced by `price_of`. Lines whose product cannot be
    /// priced contribute nothing; the validator reports them.
    pub fn subtotal<F>(&self, price_of: F) -> Money
    where
        F: Fn(&ProductId) -> Option<Money>,
    {
        self.items.iter().filter_map(|i| price_of(&i.product_id).map(|p| i.line_total(p))).sum()
    }

    /// Adds a line, merging into an existing line for the same product.
    pub fn add_item(&mut self, product_id: ProductId, quantity: Quantity, unit_price: Money) -> CartItemId {
        let id = if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            existing.quantity = existing.quantity.add(quantity);
            existing.seen_unit_price = unit_price;
            existing.id
        } else {
            let item = CartItem { id: CartItemId::new(), product_id, quantity, seen_unit_price: unit_price, added_at: Utc::now() };
            let id = item.id;
            self.items.push(item);
            id
        };
        self.touch();
        id
    }

    pub fn update_quantity(&mut self, item_id: CartItemId, quantity: Quantity) -> Result<()> {
        let item = self.items.iter_mut().find(|i| i.id == item_id).ok_or(EcommerceError::CartItemNotFound(item_id))?;
        item.quantity = quantity;
        self.touch();
        Ok(())
    }

    /// Returns whether a line was removed. Removing a missing line is not an error.
    pub fn remove_item(&mut self, item_id: CartItemId) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id != item_id);
        let removed = self.items.len() != before;
        if removed { self.touch(); }
        removed
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.discount_code = None;
        self.touch();
    }

    pub fn set_discount_code(&mut self, code: impl Into<String>) { self.discount_code = Some(code.into()); self.touch(); }
    pub fn remove_discount_code(&mut self) { self.discount_code = None; self.touch(); }

    /// Records the prices the customer is now looking at.
    pub fn mark_prices_seen<F>(&mut self, price_of: F)
    where
        F: Fn(&ProductId) -> Option<Money>,
    {
        for item in &mut self.items {
            if let Some(price) = price_of(&item.product_id) { item.seen_unit_price = price; }
        }
        self.touch();
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
