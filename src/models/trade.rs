use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::order::OrderSide;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub maker_address: String,
    pub taker_address: String,
    /// The taker's side; trade price always equals the maker's resting price.
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub quote_quantity: Decimal,
    pub is_synthetic: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResponse {
    pub trade_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: i64,
}

impl From<Trade> for TradeResponse {
    fn from(t: Trade) -> Self {
        Self {
            trade_id: t.id,
            symbol: t.symbol,
            side: t.side,
            price: t.price,
            quantity: t.quantity,
            timestamp: t.created_at.timestamp_millis(),
        }
    }
}
