//! Product Aggregate
//!
//! The checkout core only reads pricing and stock from the catalog; catalog
//! editing lives elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{Money, ProductId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub sale_price: Option<Money>,
    pub stock_quantity: u32,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn create(name: impl Into<String>, price: Money, stock_quantity: u32) -> Self {
        Self {
            id: ProductId::new(), name: name.into(), price, sale_price: None,
            stock_quantity, is_active: true, updated_at: Utc::now(),
        }
    }

    pub fn with_sale_price(mut self, sale_price: Money) -> Self { self.sale_price = Some(sale_price); self }

    /// Sale price when present and strictly below the list price, list price otherwise.
    pub fn effective_price(&self) -> Money {
        match self.sale_price {
            Some(sale) if sale < self.price => sale,
            _ => self.price,
        }
    }

    pub fn remove_stock(&mut self, qty: u32) -> Option<u32> {
        self.stock_quantity = self.stock_quantity.checked_sub(qty)?;
        self.touch();
        Some(self.stock_quantity)
    }

    pub fn add_stock(&mut self, qty: u32) {
        self.stock_quantity = self.stock_quantity.saturating_add(qty);
        self.touch();
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
