//! Per-market order book: two price-ordered maps of FIFO queues, plus an index for O(1)
//! cancellation. Concurrency-safe for a single market; the matching engine serializes all
//! mutating calls for a symbol through its worker, so the locks here are never contended by
//! cross-order logic, only by concurrent readers (snapshot, depth).

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering as AtomicOrdering};

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::types::{
    MatchingError, OrderEntry, PriceLevel, SelfTradePolicy, Side, TradeExecution,
};

pub struct Orderbook {
    symbol: String,
    bids: RwLock<BTreeMap<PriceLevel, VecDeque<OrderEntry>>>,
    asks: RwLock<BTreeMap<PriceLevel, VecDeque<OrderEntry>>>,
    order_index: DashMap<Uuid, (Side, PriceLevel)>,
    last_trade_price_raw: AtomicI64,
    order_count: AtomicI64,
    sequence: AtomicU64,
}

impl Orderbook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            order_index: DashMap::new(),
            last_trade_price_raw: AtomicI64::new(0),
            order_count: AtomicI64::new(0),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, AtomicOrdering::Relaxed)
    }

    pub fn order_count(&self) -> i64 {
        self.order_count.load(AtomicOrdering::Relaxed)
    }

    pub fn last_trade_price(&self) -> Option<Decimal> {
        let raw = self.last_trade_price_raw.load(AtomicOrdering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(PriceLevel::from_decimal(Decimal::from(raw) / Decimal::from(100_000_000)).to_decimal())
        }
    }

    fn set_last_trade_price(&self, price: Decimal) {
        let level = PriceLevel::from_decimal(price);
        self.last_trade_price_raw.store(level.raw(), AtomicOrdering::Relaxed);
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.read().keys().next_back().map(|p| p.to_decimal())
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.read().keys().next().map(|p| p.to_decimal())
    }

    /// Whether a limit order at `side`/`price` would take liquidity immediately (used for
    /// post-only's up-front crossing check, before any state changes).
    pub fn would_cross(&self, side: Side, price: Decimal) -> bool {
        match side {
            Side::Buy => self.best_ask().is_some_and(|ask| price >= ask),
            Side::Sell => self.best_bid().is_some_and(|bid| price <= bid),
        }
    }

    pub fn add_order(&self, entry: OrderEntry) {
        let price_level = PriceLevel::from_decimal(entry.price);
        let side = entry.side;
        let order_id = entry.id;

        match side {
            Side::Buy => self.bids.write().entry(price_level).or_default().push_back(entry),
            Side::Sell => self.asks.write().entry(price_level).or_default().push_back(entry),
        }

        self.order_index.insert(order_id, (side, price_level));
        self.order_count.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn cancel_order(&self, order_id: Uuid) -> Option<OrderEntry> {
        let (side, price_level) = self.order_index.remove(&order_id)?.1;
        let book = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        let mut guard = book.write();
        let queue = guard.get_mut(&price_level)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        let entry = queue.remove(pos)?;
        if queue.is_empty() {
            guard.remove(&price_level);
        }
        drop(guard);
        self.order_count.fetch_sub(1, AtomicOrdering::Relaxed);
        Some(entry)
    }

    /// Walks the opposing side in price-time priority, filling `quantity` at each resting
    /// order's price, honoring `limit_price` as the taker's worst acceptable price (`None` for
    /// an unconstrained market-style walk). Self-trades are skipped per `self_trade_policy` on
    /// either the maker or the taker; the skipped maker order remains resting untouched.
    pub fn match_incoming(
        &self,
        taker_order_id: Uuid,
        taker_address: &str,
        taker_side: Side,
        taker_self_trade_policy: SelfTradePolicy,
        mut quantity: Decimal,
        limit_price: Option<Decimal>,
    ) -> (Vec<TradeExecution>, Decimal) {
        let mut trades = Vec::new();
        let now = chrono::Utc::now().timestamp_millis();

        let opposing = match taker_side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };

        let price_levels: Vec<PriceLevel> = {
            let guard = opposing.read();
            match taker_side {
                Side::Buy => guard.keys().cloned().collect(),
                Side::Sell => guard.keys().rev().cloned().collect(),
            }
        };

        'levels: for price_level in price_levels {
            if quantity <= Decimal::ZERO {
                break;
            }
            let level_price = price_level.to_decimal();
            if let Some(limit) = limit_price {
                let acceptable = match taker_side {
                    Side::Buy => level_price <= limit,
                    Side::Sell => level_price >= limit,
                };
                if !acceptable {
                    break;
                }
            }

            let mut guard = opposing.write();
            let Some(queue) = guard.get_mut(&price_level) else {
                continue;
            };

            let mut idx = 0;
            while idx < queue.len() {
                if quantity <= Decimal::ZERO {
                    break 'levels;
                }
                let maker = &queue[idx];

                let self_trade = maker.user_address == taker_address;
                if self_trade
                    && (taker_self_trade_policy == SelfTradePolicy::Reject
                        || maker.self_trade_policy == SelfTradePolicy::Reject)
                {
                    idx += 1;
                    continue;
                }

                let trade_quantity = quantity.min(maker.remaining_quantity);
                let trade_price = maker.price;
                let margin_slice = if maker.remaining_quantity.is_zero() {
                    Decimal::ZERO
                } else {
                    maker.locked_margin * trade_quantity / maker.remaining_quantity
                };

                trades.push(TradeExecution {
                    trade_id: Uuid::new_v4(),
                    symbol: self.symbol.clone(),
                    maker_order_id: maker.id,
                    taker_order_id,
                    maker_address: maker.user_address.clone(),
                    taker_address: taker_address.to_string(),
                    taker_side,
                    price: trade_price,
                    quantity: trade_quantity,
                    maker_margin_released: margin_slice,
                    timestamp_ms: now,
                });

                quantity -= trade_quantity;
                self.set_last_trade_price(trade_price);

                let maker = &mut queue[idx];
                maker.remaining_quantity -= trade_quantity;
                maker.locked_margin -= margin_slice;

                if maker.remaining_quantity <= Decimal::ZERO {
                    let maker_id = maker.id;
                    queue.remove(idx);
                    self.order_index.remove(&maker_id);
                    self.order_count.fetch_sub(1, AtomicOrdering::Relaxed);
                } else {
                    idx += 1;
                }
            }

            if queue.is_empty() {
                guard.remove(&price_level);
            }
        }

        (trades, quantity)
    }

    pub fn snapshot(&self, depth: usize) -> (Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>) {
        let bids = {
            let guard = self.bids.read();
            guard
                .iter()
                .rev()
                .take(depth)
                .map(|(level, orders)| (level.to_decimal(), orders.iter().map(|o| o.remaining_quantity).sum()))
                .collect()
        };
        let asks = {
            let guard = self.asks.read();
            guard
                .iter()
                .take(depth)
                .map(|(level, orders)| (level.to_decimal(), orders.iter().map(|o| o.remaining_quantity).sum()))
                .collect()
        };
        (bids, asks)
    }

    pub fn has_order(&self, order_id: &Uuid) -> bool {
        self.order_index.contains_key(order_id)
    }

    pub fn get_order(&self, order_id: &Uuid) -> Option<OrderEntry> {
        let (side, price_level) = self.order_index.get(order_id)?.clone();
        let book = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        book.read().get(&price_level)?.iter().find(|o| o.id == *order_id).cloned()
    }

    /// Book-consistency check (testable property 1): every level's aggregate matches the sum
    /// of its resting orders' remaining quantity. Always true by construction here; exposed for
    /// tests that mutate the book directly.
    pub fn is_consistent(&self) -> Result<(), MatchingError> {
        for guard in [self.bids.read(), self.asks.read()] {
            for orders in guard.values() {
                if orders.iter().any(|o| o.remaining_quantity < Decimal::ZERO) {
                    return Err(MatchingError::InvalidQuantity("negative remaining quantity in book".into()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(id: Uuid, price: Decimal, quantity: Decimal, side: Side, address: &str) -> OrderEntry {
        OrderEntry {
            id,
            user_address: address.to_string(),
            side,
            price,
            original_quantity: quantity,
            remaining_quantity: quantity,
            leverage: 10,
            reduce_only: false,
            self_trade_policy: SelfTradePolicy::Allow,
            locked_margin: Decimal::ZERO,
            sequence: 0,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[test]
    fn add_and_cancel_round_trips() {
        let book = Orderbook::new("AAPL-PERP");
        let id = Uuid::new_v4();
        book.add_order(order(id, dec!(100.0), dec!(1.0), Side::Buy, "0xabc"));
        assert_eq!(book.order_count(), 1);
        assert!(book.cancel_order(id).is_some());
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn s1_full_cross_at_maker_price() {
        let book = Orderbook::new("AAPL-PERP");
        let alice = Uuid::new_v4();
        book.add_order(order(alice, dec!(200.50), dec!(1.00), Side::Sell, "alice"));

        let bob = Uuid::new_v4();
        let (trades, remaining) = book.match_incoming(
            bob, "bob", Side::Buy, SelfTradePolicy::Allow, dec!(1.00), Some(dec!(200.50)),
        );

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, dec!(200.50));
        assert_eq!(trades[0].quantity, dec!(1.00));
        assert_eq!(remaining, dec!(0));
        assert!(!book.has_order(&alice));
    }

    #[test]
    fn s2_partial_fill_leaves_resting_remainder() {
        let book = Orderbook::new("AAPL-PERP");
        let alice = Uuid::new_v4();
        book.add_order(order(alice, dec!(201), dec!(1.00), Side::Sell, "alice"));

        let bob = Uuid::new_v4();
        let (trades, remaining) = book.match_incoming(
            bob, "bob", Side::Buy, SelfTradePolicy::Allow, dec!(0.30), Some(dec!(201)),
        );

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, dec!(0.30));
        assert_eq!(remaining, dec!(0));
        let resting = book.get_order(&alice).unwrap();
        assert_eq!(resting.remaining_quantity, dec!(0.70));
    }

    #[test]
    fn self_trade_reject_skips_own_resting_order() {
        let book = Orderbook::new("AAPL-PERP");
        let mut maker = order(Uuid::new_v4(), dec!(100), dec!(1.0), Side::Sell, "same");
        maker.self_trade_policy = SelfTradePolicy::Reject;
        let maker_id = maker.id;
        book.add_order(maker);

        let (trades, remaining) = book.match_incoming(
            Uuid::new_v4(), "same", Side::Buy, SelfTradePolicy::Reject, dec!(1.0), Some(dec!(100)),
        );

        assert!(trades.is_empty());
        assert_eq!(remaining, dec!(1.0));
        assert!(book.has_order(&maker_id));
    }
}
