//! Shared types for the matching engine: the fixed-point price key, book entries, and the
//! results a submit/cancel call returns.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

pub use crate::models::order::{OrderSide as Side, OrderStatus, OrderType, SelfTradePolicy};
use crate::models::PositionSide;

/// Fixed-point price key (8 decimal places) so book levels hash and order exactly, instead of
/// relying on `Decimal`'s variable scale for `BTreeMap` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceLevel(i64);

const PRICE_SCALE: i64 = 100_000_000;

impl PriceLevel {
    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = price * Decimal::from(PRICE_SCALE);
        let truncated = scaled.trunc();
        let value = truncated.mantissa() / 10i128.pow(truncated.scale());
        PriceLevel(value as i64)
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(PRICE_SCALE)
    }

    pub fn raw(&self) -> i64 {
        self.0
    }
}

impl Ord for PriceLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A resting order in the book. Orders are owned by the orderbook; the order row in the store
/// is updated as a side effect, not the source of truth while resting.
#[derive(Debug, Clone)]
pub struct OrderEntry {
    pub id: Uuid,
    pub user_address: String,
    pub side: Side,
    pub price: Decimal,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub leverage: i32,
    pub reduce_only: bool,
    pub self_trade_policy: SelfTradePolicy,
    pub locked_margin: Decimal,
    /// Monotonic sequence assigned at insert; breaks FIFO ties at equal price and, failing
    /// that, orderId is used as the final, reproducible tiebreaker.
    pub sequence: u64,
    pub created_at_ms: i64,
}

/// One atomic fill produced while walking the opposing side.
#[derive(Debug, Clone, Serialize)]
pub struct TradeExecution {
    pub trade_id: Uuid,
    pub symbol: String,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub maker_address: String,
    pub taker_address: String,
    pub taker_side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    /// The maker's locked margin consumed by this fill, pro-rated from the maker's resting
    /// order at the instant of the match.
    pub maker_margin_released: Decimal,
    pub timestamp_ms: i64,
}

/// Per-side margin delta a single fill produces, handed to the Position Keeper and Balance
/// Ledger under the address lock.
#[derive(Debug, Clone)]
pub struct FillMarginEffect {
    pub address: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Margin attributed to this address's share of the fill (locked at submit time for the
    /// taker, or the maker's originally-locked pro-rata share).
    pub margin_attributed: Decimal,
}

/// Outcome of a single `submit` call.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub trades: Vec<TradeExecution>,
    pub margin_effects: Vec<FillMarginEffect>,
    /// Set when a residual had to be cancelled mid-fill (engine/store failure) rather than
    /// resting normally; the already-persisted trades stand.
    pub residual_cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderbookSnapshot {
    pub symbol: String,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
    pub last_price: Option<Decimal>,
    pub timestamp_ms: i64,
}

/// One price-level delta; `quantity = "0"` means the level was fully removed.
#[derive(Debug, Clone, Serialize)]
pub struct OrderbookLevelUpdate {
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp_ms: i64,
}

/// Broadcast when a mark-to-market sweep force-closes a position (spec §4.3/§4.5).
#[derive(Debug, Clone, Serialize)]
pub struct LiquidationEvent {
    pub address: String,
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub mark_price: Decimal,
    pub realized_pnl: Decimal,
    pub margin_forfeited: Decimal,
    pub timestamp_ms: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum MatchingError {
    #[error("market not found: {0}")]
    MarketNotFound(String),
    #[error("market {0} is not active")]
    MarketPaused(String),
    #[error("order not found: {0}")]
    OrderNotFound(Uuid),
    #[error("invalid price: {0}")]
    InvalidPrice(String),
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),
    #[error("leverage {leverage} exceeds effective max {max} for {symbol}")]
    LeverageExceeded { symbol: String, leverage: i32, max: i32 },
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },
    #[error("post-only order would cross the book")]
    PostOnlyWouldCross,
    #[error("reduce-only order has no opposite position to reduce")]
    NoPositionToReduce,
    #[error("oracle price unavailable for {0}")]
    OraclePriceUnavailable(String),
    #[error("store error: {0}")]
    Store(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_level_round_trips() {
        let price = dec!(200.50);
        let level = PriceLevel::from_decimal(price);
        assert_eq!(level.to_decimal(), price);
    }

    #[test]
    fn price_level_orders_numerically() {
        let p1 = PriceLevel::from_decimal(dec!(100.0));
        let p2 = PriceLevel::from_decimal(dec!(200.0));
        assert!(p1 < p2);
    }
}
