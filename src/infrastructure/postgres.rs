//! Postgres-backed stores.
//!
//! Stock decrements are a single conditional `UPDATE`, so the floor check and
//! the write happen under the row lock Postgres takes for the update. Status
//! changes are conditional on the expected current status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use crate::domain::aggregates::{Address, Cart, CartItem, Order, OrderItem, OrderStatus, PaymentStatus, Product};
use crate::domain::value_objects::{CartItemId, CustomerId, Money, OrderId, OrderNumber, ProductId, Quantity};
use crate::ports::{CartRepository, DiscountLookup, Inventory, OrderRepository};
use crate::services::discount::{normalize_code, Discount, DiscountKind};
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| EcommerceError::Storage(e.to_string()))
    }

    async fn stock_level(&self, id: ProductId) -> Result<Option<u32>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT stock_quantity FROM products WHERE id = $1")
            .bind(id.as_uuid()).fetch_optional(&self.pool).await?;
        row.map(|(stock,)| to_u32(stock)).transpose()
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItemRow>("SELECT product_id, name, quantity, unit_price, total FROM order_items WHERE order_id = $1 ORDER BY position")
            .bind(order_id).fetch_all(&self.pool).await?;
        rows.into_iter().map(OrderItemRow::into_item).collect()
    }

    async fn hydrate(&self, row: OrderRow) -> Result<Order> {
        let items = self.order_items(row.id).await?;
        row.into_order(items)
    }
}

fn to_u32(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| EcommerceError::Storage(format!("quantity out of range: {value}")))
}

#[derive(sqlx::FromRow)]
struct ProductRow { id: Uuid, name: String, price: Decimal, sale_price: Option<Decimal>, stock_quantity: i64, is_active: bool, updated_at: DateTime<Utc> }

impl ProductRow {
    fn into_product(self) -> Result<Product> {
        Ok(Product {
            id: self.id.into(), name: self.name, price: Money::new(self.price), sale_price: self.sale_price.map(Money::new),
            stock_quantity: to_u32(self.stock_quantity)?, is_active: self.is_active, updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartRow { discount_code: Option<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct CartItemRow { id: Uuid, product_id: Uuid, quantity: i64, seen_unit_price: Decimal, added_at: DateTime<Utc> }

impl CartItemRow {
    fn into_item(self) -> Result<CartItem> {
        Ok(CartItem {
            id: CartItemId::from_uuid(self.id), product_id: self.product_id.into(),
            quantity: Quantity::new(self.quantity).map_err(|e| EcommerceError::Storage(e.to_string()))?,
            seen_unit_price: Money::new(self.seen_unit_price), added_at: self.added_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, customer_id: Uuid,
    shipping_address: Json<Address>, billing_address: Json<Address>,
    payment_method: String, notes: Option<String>, discount_code: Option<String>,
    subtotal: Decimal, discount_total: Decimal, total: Decimal,
    status: String, payment_status: String, inventory_released: bool,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

const ORDER_COLUMNS: &str = "id, order_number, customer_id, shipping_address, billing_address, payment_method, notes, discount_code, \
     subtotal, discount_total, total, status, payment_status, inventory_released, created_at, updated_at";

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order> {
        Ok(Order {
            id: self.id.into(), order_number: OrderNumber::new(self.order_number), customer_id: self.customer_id.into(), items,
            shipping_address: self.shipping_address.0, billing_address: self.billing_address.0,
            payment_method: self.payment_method.parse()?, notes: self.notes, discount_code: self.discount_code,
            subtotal: Money::new(self.subtotal), discount_total: Money::new(self.discount_total), total: Money::new(self.total),
            status: self.status.parse()?, payment_status: self.payment_status.parse()?,
            inventory_released: self.inventory_released, created_at: self.created_at, updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow { product_id: Uuid, name: String, quantity: i64, unit_price: Decimal, total: Decimal }

impl OrderItemRow {
    fn into_item(self) -> Result<OrderItem> {
        Ok(OrderItem {
            product_id: self.product_id.into(), name: self.name, quantity: to_u32(self.quantity)?,
            unit_price: Money::new(self.unit_price), total: Money::new(self.total),
        })
    }
}

#[derive(sqlx::FromRow)]
struct DiscountRow { code: String, kind: String, value: Decimal, valid_until: Option<DateTime<Utc>>, min_subtotal: Option<Decimal>, active: bool }

impl DiscountRow {
    fn into_discount(self) -> Result<Discount> {
        let kind = match self.kind.as_str() {
            "percentage" => DiscountKind::Percentage(self.value),
            "fixed_amount" => DiscountKind::FixedAmount(Money::new(self.value)),
            other => return Err(EcommerceError::Storage(format!("unknown discount kind {other}"))),
        };
        Ok(Discount { code: self.code, kind, valid_until: self.valid_until, min_subtotal: self.min_subtotal.map(Money::new), active: self.active })
    }
}

#[async_trait]
impl Inventory for PgStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        sqlx::query_as::<_, ProductRow>("SELECT id, name, price, sale_price, stock_quantity, is_active, updated_at FROM products WHERE id = $1")
            .bind(id.as_uuid()).fetch_optional(&self.pool).await?
            .map(ProductRow::into_product).transpose()
    }

    async fn decrement_stock(&self, id: ProductId, amount: u32) -> Result<u32> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE products SET stock_quantity = stock_quantity - $2, updated_at = NOW() \
             WHERE id = $1 AND stock_quantity >= $2 RETURNING stock_quantity",
        )
        .bind(id.as_uuid()).bind(i64::from(amount)).fetch_optional(&self.pool).await?;
        match row {
            Some((stock,)) => to_u32(stock),
            None => match self.stock_level(id).await? {
                Some(available) => Err(EcommerceError::OutOfStock { product_id: id, requested: amount, available }),
                None => Err(EcommerceError::ProductNotFound(id)),
            },
        }
    }

    async fn increment_stock(&self, id: ProductId, amount: u32) -> Result<u32> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE products SET stock_quantity = stock_quantity + $2, updated_at = NOW() WHERE id = $1 RETURNING stock_quantity",
        )
        .bind(id.as_uuid()).bind(i64::from(amount)).fetch_optional(&self.pool).await?;
        row.map(|(stock,)| to_u32(stock)).transpose()?.ok_or(EcommerceError::ProductNotFound(id))
    }

    async fn upsert_product(&self, product: Product) -> Result<()> {
        sqlx::query(
            "INSERT INTO products (id, name, price, sale_price, stock_quantity, is_active, updated_at) VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
             ON CONFLICT (id) DO UPDATE SET name = $2, price = $3, sale_price = $4, stock_quantity = $5, is_active = $6, updated_at = NOW()",
        )
        .bind(product.id.as_uuid()).bind(&product.name).bind(product.price.amount()).bind(product.sale_price.map(|m| m.amount()))
        .bind(i64::from(product.stock_quantity)).bind(product.is_active)
        .execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CartRepository for PgStore {
    async fn load_cart(&self, customer_id: CustomerId) -> Result<Option<Cart>> {
        let Some(row) = sqlx::query_as::<_, CartRow>("SELECT discount_code, created_at, updated_at FROM carts WHERE customer_id = $1")
            .bind(customer_id.as_uuid()).fetch_optional(&self.pool).await?
        else {
            return Ok(None);
        };
        let items = sqlx::query_as::<_, CartItemRow>(
            "SELECT id, product_id, quantity, seen_unit_price, added_at FROM cart_items WHERE customer_id = $1 ORDER BY added_at, id",
        )
        .bind(customer_id.as_uuid()).fetch_all(&self.pool).await?
        .into_iter().map(CartItemRow::into_item).collect::<Result<Vec<_>>>()?;
        Ok(Some(Cart::from_parts(customer_id, items, row.discount_code, row.created_at, row.updated_at)))
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        let customer = cart.customer_id().as_uuid();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO carts (customer_id, discount_code, created_at, updated_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (customer_id) DO UPDATE SET discount_code = $2, updated_at = $4",
        )
        .bind(customer).bind(cart.discount_code()).bind(cart.created_at()).bind(cart.updated_at())
        .execute(&mut *tx).await?;
        sqlx::query("DELETE FROM cart_items WHERE customer_id = $1").bind(customer).execute(&mut *tx).await?;
        for item in cart.items() {
            sqlx::query("INSERT INTO cart_items (id, customer_id, product_id, quantity, seen_unit_price, added_at) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(item.id.as_uuid()).bind(customer).bind(item.product_id.as_uuid()).bind(i64::from(item.quantity.value()))
                .bind(item.seen_unit_price.amount()).bind(item.added_at)
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_cart(&self, customer_id: CustomerId) -> Result<()> {
        sqlx::query("DELETE FROM carts WHERE customer_id = $1").bind(customer_id.as_uuid()).execute(&self.pool).await?;
        Ok(())
    }

    async fn claim_for_checkout(&self, expected: &Cart) -> Result<bool> {
        let customer = expected.customer_id().as_uuid();
        let mut tx = self.pool.begin().await?;
        // Every cart write bumps updated_at, so an unchanged stamp means an unchanged cart.
        let claimed = sqlx::query("UPDATE carts SET discount_code = NULL, updated_at = NOW() WHERE customer_id = $1 AND updated_at = $2")
            .bind(customer).bind(expected.updated_at())
            .execute(&mut *tx).await?
            .rows_affected() == 1;
        if !claimed {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query("DELETE FROM cart_items WHERE customer_id = $1").bind(customer).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn create_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("INSERT INTO orders ({ORDER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"))
            .bind(order.id().as_uuid()).bind(order.order_number().as_str()).bind(order.customer_id().as_uuid())
            .bind(Json(order.shipping_address())).bind(Json(order.billing_address()))
            .bind(order.payment_method().as_str()).bind(order.notes()).bind(order.discount_code())
            .bind(order.subtotal().amount()).bind(order.discount_total().amount()).bind(order.total().amount())
            .bind(order.status().as_str()).bind(order.payment_status().as_str()).bind(order.inventory_released())
            .bind(order.created_at()).bind(order.updated_at())
            .execute(&mut *tx).await?;
        for (position, item) in order.items().iter().enumerate() {
            let position = i32::try_from(position).map_err(|_| EcommerceError::Storage("too many order items".into()))?;
            sqlx::query("INSERT INTO order_items (order_id, position, product_id, name, quantity, unit_price, total) VALUES ($1, $2, $3, $4, $5, $6, $7)")
                .bind(order.id().as_uuid()).bind(position).bind(item.product_id.as_uuid()).bind(&item.name)
                .bind(i64::from(item.quantity)).bind(item.unit_price.amount()).bind(item.total.amount())
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid()).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE customer_id = $1 ORDER BY created_at DESC"))
            .bind(customer_id.as_uuid()).fetch_all(&self.pool).await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(self.hydrate(row).await?);
        }
        Ok(orders)
    }

    async fn order_number_exists(&self, number: &OrderNumber) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM orders WHERE order_number = $1)")
            .bind(number.as_str()).fetch_one(&self.pool).await?;
        Ok(exists)
    }

    async fn update_status(&self, id: OrderId, expected: OrderStatus, status: OrderStatus, inventory_released: bool) -> Result<Order> {
        let updated = sqlx::query("UPDATE orders SET status = $3, inventory_released = $4, updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(id.as_uuid()).bind(expected.as_str()).bind(status.as_str()).bind(inventory_released)
            .execute(&self.pool).await?
            .rows_affected();
        let order = self.get_order(id).await?.ok_or(EcommerceError::OrderNotFound(id))?;
        if updated == 0 {
            return Err(EcommerceError::ConcurrentModification { order_id: id, expected, actual: order.status() });
        }
        Ok(order)
    }

    async fn update_payment_status(&self, id: OrderId, status: PaymentStatus) -> Result<Order> {
        sqlx::query("UPDATE orders SET payment_status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_uuid()).bind(status.as_str()).execute(&self.pool).await?;
        self.get_order(id).await?.ok_or(EcommerceError::OrderNotFound(id))
    }
}

#[async_trait]
impl DiscountLookup for PgStore {
    async fn lookup_discount(&self, code: &str) -> Result<Option<Discount>> {
        sqlx::query_as::<_, DiscountRow>("SELECT code, kind, value, valid_until, min_subtotal, active FROM discounts WHERE code = $1")
            .bind(normalize_code(code)).fetch_optional(&self.pool).await?
            .map(DiscountRow::into_discount).transpose()
    }
}
