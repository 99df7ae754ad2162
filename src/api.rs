//! HTTP surface over the checkout services.
//!
//! Authentication happens upstream; the gateway forwards the caller's identity
//! as `x-customer-id` or `x-admin-id`.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{Actor, CheckoutDetails, Order, OrderStatus, PaymentStatus, Product};
use crate::domain::value_objects::{AdminId, CartItemId, CustomerId, Money, OrderId, ProductId};
use crate::ports::{CartRepository, DiscountLookup, EventPublisher, Inventory, OrderRepository};
use crate::services::{CartStore, CartValidator, CartView, DiscountResolution, OrderCommitter, OrderNumberPolicy, OrderStateMachine, ValidationReport};
use crate::EcommerceError;

#[derive(Clone)]
pub struct AppState {
    pub carts: CartStore,
    pub validator: CartValidator,
    pub committer: OrderCommitter,
    pub orders: OrderStateMachine,
    pub inventory: Arc<dyn Inventory>,
}

impl AppState {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        carts: Arc<dyn CartRepository>,
        orders: Arc<dyn OrderRepository>,
        discounts: Arc<dyn DiscountLookup>,
        events: Arc<dyn EventPublisher>,
        numbers: OrderNumberPolicy,
    ) -> Self {
        Self {
            carts: CartStore::new(carts.clone(), inventory.clone(), discounts.clone()),
            validator: CartValidator::new(inventory.clone(), discounts.clone()),
            committer: OrderCommitter::new(carts, inventory.clone(), orders.clone(), discounts, events.clone(), numbers),
            orders: OrderStateMachine::new(orders, inventory.clone(), events),
            inventory,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-checkout"})) }))
        .route("/api/v1/cart", get(get_cart).delete(clear_cart))
        .route("/api/v1/cart/items", post(add_item))
        .route("/api/v1/cart/items/:item_id", put(update_item).delete(remove_item))
        .route("/api/v1/cart/discount", post(apply_discount).delete(remove_discount))
        .route("/api/v1/cart/refresh-prices", post(refresh_prices))
        .route("/api/v1/cart/validate", get(validate_cart))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/admin/orders/:id", get(admin_get_order))
        .route("/api/v1/admin/orders/:id/status", put(admin_set_status))
        .route("/api/v1/admin/orders/:id/payment-status", put(admin_set_payment_status))
        .route("/api/v1/admin/products/:id", put(admin_upsert_product))
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    Domain(EcommerceError),
    Validation(validator::ValidationErrors),
    BadRequest(String),
    Unauthenticated(&'static str),
}

impl From<EcommerceError> for ApiError {
    fn from(e: EcommerceError) -> Self { Self::Domain(e) }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e) }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ValidationReport>,
}

fn domain_status(e: &EcommerceError) -> (StatusCode, &'static str) {
    use EcommerceError::*;
    match e {
        InvalidQuantity(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_quantity"),
        CartInvalid(_) => (StatusCode::CONFLICT, "cart_invalid"),
        OutOfStock { .. } => (StatusCode::CONFLICT, "out_of_stock"),
        ProductNotFound(_) => (StatusCode::NOT_FOUND, "product_not_found"),
        CartItemNotFound(_) => (StatusCode::NOT_FOUND, "cart_item_not_found"),
        IllegalTransition { .. } => (StatusCode::CONFLICT, "illegal_transition"),
        OrderNotFound(_) => (StatusCode::NOT_FOUND, "order_not_found"),
        ConcurrentModification { .. } => (StatusCode::CONFLICT, "concurrent_modification"),
        DiscountNotFound(_) => (StatusCode::UNPROCESSABLE_ENTITY, "discount_not_found"),
        DiscountExpired(_) => (StatusCode::UNPROCESSABLE_ENTITY, "discount_expired"),
        DiscountMinimumNotMet { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "discount_minimum_not_met"),
        OrderNumberExhausted(_) => (StatusCode::SERVICE_UNAVAILABLE, "order_number_exhausted"),
        Storage(_) | Publish(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Domain(e) => {
                let (status, code) = domain_status(&e);
                if status.is_server_error() {
                    tracing::error!(error = %e, "request failed");
                }
                let message = if status.is_server_error() { "Internal error".to_string() } else { e.to_string() };
                let report = match e { EcommerceError::CartInvalid(report) => Some(report), _ => None };
                (status, ErrorBody { error: code, message, report })
            }
            Self::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, ErrorBody { error: "validation", message: e.to_string(), report: None }),
            Self::BadRequest(message) => (StatusCode::UNPROCESSABLE_ENTITY, ErrorBody { error: "bad_request", message, report: None }),
            Self::Unauthenticated(header) => (StatusCode::UNAUTHORIZED, ErrorBody { error: "unauthenticated", message: format!("missing or malformed {header}"), report: None }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Identity
// =============================================================================

fn header_uuid(parts: &Parts, name: &'static str) -> Result<Uuid, ApiError> {
    parts.headers.get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(ApiError::Unauthenticated(name))
}

pub struct CurrentCustomer(pub CustomerId);
pub struct CurrentAdmin(pub AdminId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentCustomer {
    type Rejection = ApiError;
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_uuid(parts, "x-customer-id").map(|id| Self(id.into()))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentAdmin {
    type Rejection = ApiError;
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_uuid(parts, "x-admin-id").map(|id| Self(id.into()))
    }
}

// =============================================================================
// Cart
// =============================================================================

#[derive(Debug, Deserialize)] pub struct AddItemRequest { pub product_id: ProductId, pub quantity: i64 }
#[derive(Debug, Deserialize)] pub struct UpdateQuantityRequest { pub quantity: i64 }
#[derive(Debug, Deserialize, Validate)] pub struct ApplyDiscountRequest { #[validate(length(min = 1, max = 64))] pub code: String }
#[derive(Debug, Serialize)] pub struct ApplyDiscountResponse { pub resolution: DiscountResolution, pub cart: CartView }

async fn get_cart(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer) -> ApiResult<Json<CartView>> {
    Ok(Json(s.carts.view(c).await?))
}

async fn add_item(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer, Json(r): Json<AddItemRequest>) -> ApiResult<(StatusCode, Json<CartView>)> {
    Ok((StatusCode::CREATED, Json(s.carts.add_item(c, r.product_id, r.quantity).await?)))
}

async fn update_item(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer, Path(item_id): Path<CartItemId>, Json(r): Json<UpdateQuantityRequest>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.carts.update_quantity(c, item_id, r.quantity).await?))
}

async fn remove_item(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer, Path(item_id): Path<CartItemId>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.carts.remove_item(c, item_id).await?))
}

async fn clear_cart(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer) -> ApiResult<Json<CartView>> {
    Ok(Json(s.carts.clear(c).await?))
}

async fn apply_discount(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer, Json(r): Json<ApplyDiscountRequest>) -> ApiResult<Json<ApplyDiscountResponse>> {
    r.validate()?;
    let (resolution, cart) = s.carts.apply_discount_code(c, &r.code).await?;
    Ok(Json(ApplyDiscountResponse { resolution, cart }))
}

async fn remove_discount(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer) -> ApiResult<Json<CartView>> {
    Ok(Json(s.carts.remove_discount_code(c).await?))
}

async fn refresh_prices(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer) -> ApiResult<Json<CartView>> {
    Ok(Json(s.carts.refresh_prices(c).await?))
}

async fn validate_cart(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer) -> ApiResult<Json<ValidationReport>> {
    let cart = s.carts.cart(c).await?;
    Ok(Json(s.validator.validate(&cart).await?))
}

// =============================================================================
// Checkout & orders
// =============================================================================

async fn checkout(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer, Json(r): Json<CheckoutDetails>) -> ApiResult<(StatusCode, Json<Order>)> {
    r.validate()?;
    Ok((StatusCode::CREATED, Json(s.committer.commit(c, r).await?)))
}

async fn list_orders(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(s.orders.list_orders(c).await?))
}

async fn get_order(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer, Path(id): Path<OrderId>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.get_order(&Actor::Customer(c), id).await?))
}

async fn cancel_order(State(s): State<AppState>, CurrentCustomer(c): CurrentCustomer, Path(id): Path<OrderId>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.cancel_by_customer(c, id).await?))
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Deserialize)] pub struct SetStatusRequest { pub status: OrderStatus, pub expected_status: Option<OrderStatus> }
#[derive(Debug, Deserialize)] pub struct SetPaymentStatusRequest { pub payment_status: PaymentStatus }

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub price: Decimal,
    pub sale_price: Option<Decimal>,
    pub stock_quantity: u32,
    pub is_active: Option<bool>,
}

async fn admin_get_order(State(s): State<AppState>, CurrentAdmin(a): CurrentAdmin, Path(id): Path<OrderId>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.get_order(&Actor::Admin(a), id).await?))
}

async fn admin_set_status(State(s): State<AppState>, CurrentAdmin(a): CurrentAdmin, Path(id): Path<OrderId>, Json(r): Json<SetStatusRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.set_status_by_admin(a, id, r.status, r.expected_status).await?))
}

async fn admin_set_payment_status(State(s): State<AppState>, CurrentAdmin(a): CurrentAdmin, Path(id): Path<OrderId>, Json(r): Json<SetPaymentStatusRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.set_payment_status_by_admin(a, id, r.payment_status).await?))
}

async fn admin_upsert_product(State(s): State<AppState>, CurrentAdmin(_): CurrentAdmin, Path(id): Path<ProductId>, Json(r): Json<UpsertProductRequest>) -> ApiResult<Json<Product>> {
    r.validate()?;
    if r.price < Decimal::ZERO {
        return Err(ApiError::BadRequest("price must not be negative".into()));
    }
    if r.sale_price.is_some_and(|sale| sale < Decimal::ZERO || sale >= r.price) {
        return Err(ApiError::BadRequest("sale_price must be below price".into()));
    }
    let product = Product {
        id, name: r.name, price: Money::new(r.price), sale_price: r.sale_price.map(Money::new),
        stock_quantity: r.stock_quantity, is_active: r.is_active.unwrap_or(true), updated_at: chrono::Utc::now(),
    };
    s.inventory.upsert_product(product.clone()).await?;
    Ok(Json(product))
}
