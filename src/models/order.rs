use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

mod datetime_as_millis {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(dt.timestamp_millis())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Market => write!(f, "market"),
        }
    }
}

/// Order lifecycle status. `Pending` is the transient state between submit-accepted and the
/// matching engine's first pass; everything else matches the matching engine's own `OrderStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Open,
    #[sqlx(rename = "partial")]
    #[serde(rename = "partial")]
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// Whether a self-trade (maker and taker owned by the same address) is allowed to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "self_trade_policy", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SelfTradePolicy {
    Allow,
    Reject,
}

impl Default for SelfTradePolicy {
    fn default() -> Self {
        SelfTradePolicy::Allow
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_address: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    pub filled_amount: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub leverage: i32,
    pub post_only: bool,
    pub reduce_only: bool,
    pub self_trade_policy: SelfTradePolicy,
    pub client_order_id: Option<Uuid>,
    pub status: OrderStatus,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    #[validate(range(min = 0.000001, message = "quantity must be greater than zero"))]
    pub quantity: Decimal,
    #[validate(range(min = 1, max = 125))]
    pub leverage: i32,
    #[serde(default)]
    pub post_only: bool,
    #[serde(default)]
    pub reduce_only: bool,
    /// Client-generated idempotency key; resubmitting with the same key returns the same order.
    pub client_order_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub avg_fill_price: Decimal,
    pub leverage: i32,
    pub post_only: bool,
    pub reduce_only: bool,
    pub status: OrderStatus,
    #[serde(serialize_with = "datetime_as_millis::serialize")]
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            symbol: order.symbol,
            side: order.side,
            order_type: order.order_type,
            price: order.price.unwrap_or(Decimal::ZERO),
            quantity: order.amount,
            filled_quantity: order.filled_amount,
            remaining_quantity: order.amount - order.filled_amount,
            avg_fill_price: order.avg_fill_price.unwrap_or(Decimal::ZERO),
            leverage: order.leverage,
            post_only: order.post_only,
            reduce_only: order.reduce_only,
            status: order.status,
            created_at: order.created_at,
        }
    }
}
