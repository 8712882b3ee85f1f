//! The per-market matching worker. Each symbol owns one `Orderbook`; submit/cancel for a
//! symbol always go through that symbol's entry, so book invariants only ever need to hold
//! within one `Orderbook`, never across symbols (spec §5).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{OrderStatus as ModelOrderStatus, PositionSide, SelfTradePolicy};
use crate::services::balance_ledger::{BalanceLedger, BalanceLedgerError};
use crate::services::market_registry::{MarketRegistry, MarketRegistryError};
use crate::services::position_keeper::PositionKeeper;

use super::orderbook::Orderbook;
use super::types::{MatchResult, MatchingError, OrderEntry, OrderType, Side};

const TRADE_CHANNEL_CAPACITY: usize = 4096;
const ORDERBOOK_CHANNEL_CAPACITY: usize = 4096;
const LIQUIDATION_CHANNEL_CAPACITY: usize = 256;
/// Market-order protective limit: oracle price ± this fraction.
const MARKET_ORDER_SLIPPAGE: Decimal = Decimal::from_parts(10, 0, 0, false, 2); // 0.10

impl From<MarketRegistryError> for MatchingError {
    fn from(e: MarketRegistryError) -> Self {
        match e {
            MarketRegistryError::UnknownSymbol(s) => MatchingError::MarketNotFound(s),
            MarketRegistryError::NotActive(s) => MatchingError::MarketPaused(s),
            MarketRegistryError::InvalidSeed { symbol, reason } => MatchingError::Store(format!("{symbol}: {reason}")),
        }
    }
}

impl From<BalanceLedgerError> for MatchingError {
    fn from(e: BalanceLedgerError) -> Self {
        match e {
            BalanceLedgerError::InsufficientFree { available, requested, .. } => {
                MatchingError::InsufficientBalance { required: requested, available }
            }
            BalanceLedgerError::InsufficientLocked { locked, requested, .. } => {
                MatchingError::InsufficientBalance { required: requested, available: locked }
            }
            BalanceLedgerError::NonPositiveAmount(d) => MatchingError::InvalidQuantity(d.to_string()),
        }
    }
}

pub struct SubmitOrderParams {
    pub order_id: Uuid,
    pub symbol: String,
    pub address: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub leverage: i32,
    pub post_only: bool,
    pub reduce_only: bool,
    pub self_trade_policy: SelfTradePolicy,
}

/// Owns every market's orderbook plus the shared services a fill must touch atomically.
pub struct MatchingEngine {
    books: DashMap<String, Arc<Orderbook>>,
    market_registry: Arc<MarketRegistry>,
    balance_ledger: Arc<BalanceLedger>,
    position_keeper: Arc<PositionKeeper>,
    /// Per-address critical section: spans margin lock/unlock, the book walk, and the position
    /// mutation for one submit/cancel, so a subscriber never observes a torn fill (spec §5).
    address_locks: DashMap<String, Arc<Mutex<()>>>,
    trade_tx: broadcast::Sender<super::types::TradeExecution>,
    orderbook_tx: broadcast::Sender<super::types::OrderbookLevelUpdate>,
    liquidation_tx: broadcast::Sender<super::types::LiquidationEvent>,
}

impl MatchingEngine {
    pub fn new(market_registry: Arc<MarketRegistry>, balance_ledger: Arc<BalanceLedger>, position_keeper: Arc<PositionKeeper>) -> Arc<Self> {
        let books = DashMap::new();
        for symbol in market_registry.symbols() {
            books.insert(symbol.clone(), Arc::new(Orderbook::new(symbol)));
        }
        let (trade_tx, _) = broadcast::channel(TRADE_CHANNEL_CAPACITY);
        let (orderbook_tx, _) = broadcast::channel(ORDERBOOK_CHANNEL_CAPACITY);
        let (liquidation_tx, _) = broadcast::channel(LIQUIDATION_CHANNEL_CAPACITY);
        Arc::new(Self {
            books,
            market_registry,
            balance_ledger,
            position_keeper,
            address_locks: DashMap::new(),
            trade_tx,
            orderbook_tx,
            liquidation_tx,
        })
    }

    pub fn subscribe_trades(&self) -> broadcast::Receiver<super::types::TradeExecution> {
        self.trade_tx.subscribe()
    }

    pub fn subscribe_orderbook(&self) -> broadcast::Receiver<super::types::OrderbookLevelUpdate> {
        self.orderbook_tx.subscribe()
    }

    pub fn subscribe_liquidations(&self) -> broadcast::Receiver<super::types::LiquidationEvent> {
        self.liquidation_tx.subscribe()
    }

    pub fn market_registry(&self) -> Arc<MarketRegistry> {
        self.market_registry.clone()
    }

    pub fn balance_ledger(&self) -> Arc<BalanceLedger> {
        self.balance_ledger.clone()
    }

    pub fn position_keeper(&self) -> Arc<PositionKeeper> {
        self.position_keeper.clone()
    }

    /// Oracle mark-to-market sweep for one symbol (spec §4.5). Liquidated positions have their
    /// margin forfeited from the Balance Ledger and a `position:liquidated` event broadcast.
    pub fn mark_to_market(&self, symbol: &str, mark_price: Decimal) {
        let Ok(market) = self.market_registry.get(symbol) else {
            return;
        };
        for outcome in self.position_keeper.mark_to_market(symbol, mark_price, market.maintenance_margin_rate) {
            let lock = self.address_lock(&outcome.position.address);
            let _guard = lock.lock();
            if outcome.margin_forfeited > Decimal::ZERO {
                let _ = self.balance_ledger.forfeit(&outcome.position.address, outcome.margin_forfeited, "liquidation", symbol);
            }
            let _ = self.liquidation_tx.send(super::types::LiquidationEvent {
                address: outcome.position.address.clone(),
                symbol: symbol.to_string(),
                side: outcome.position.side,
                size: outcome.position.size,
                mark_price,
                realized_pnl: outcome.realized_pnl,
                margin_forfeited: outcome.margin_forfeited,
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            });
        }
    }

    fn book(&self, symbol: &str) -> Result<Arc<Orderbook>, MatchingError> {
        self.books.get(symbol).map(|b| b.clone()).ok_or_else(|| MatchingError::MarketNotFound(symbol.to_string()))
    }

    fn address_lock(&self, address: &str) -> Arc<Mutex<()>> {
        self.address_locks.entry(address.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Diffs one side's top-of-book levels before/after a fill and broadcasts only what changed,
    /// tagged with the side the levels actually belong to. A level present before but absent
    /// after is published at `quantity = 0` so subscribers reconstructing the book from deltas
    /// remove it instead of holding a stale entry (spec §4.2/§4.6).
    fn publish_level_diffs(&self, symbol: &str, side: Side, before: &[(Decimal, Decimal)], after: &[(Decimal, Decimal)]) {
        let before: HashMap<Decimal, Decimal> = before.iter().copied().collect();
        let after: HashMap<Decimal, Decimal> = after.iter().copied().collect();
        let timestamp_ms = chrono::Utc::now().timestamp_millis();

        for (&price, &qty) in after.iter() {
            if before.get(&price) != Some(&qty) {
                let _ = self.orderbook_tx.send(super::types::OrderbookLevelUpdate { symbol: symbol.to_string(), side, price, quantity: qty, timestamp_ms });
            }
        }
        for &price in before.keys() {
            if !after.contains_key(&price) {
                let _ = self.orderbook_tx.send(super::types::OrderbookLevelUpdate { symbol: symbol.to_string(), side, price, quantity: Decimal::ZERO, timestamp_ms });
            }
        }
    }

    pub fn get_orderbook_snapshot(&self, symbol: &str, depth: usize) -> Result<super::types::OrderbookSnapshot, MatchingError> {
        let book = self.book(symbol)?;
        let (bids, asks) = book.snapshot(depth);
        Ok(super::types::OrderbookSnapshot {
            symbol: symbol.to_string(),
            bids: bids.into_iter().map(|(p, q)| [p.to_string(), q.to_string()]).collect(),
            asks: asks.into_iter().map(|(p, q)| [p.to_string(), q.to_string()]).collect(),
            last_price: book.last_trade_price(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn has_order(&self, symbol: &str, order_id: Uuid) -> Result<bool, MatchingError> {
        Ok(self.book(symbol)?.has_order(&order_id))
    }

    /// Reinstates one still-open order row read back from the store at startup (spec's restart
    /// recovery policy: "rebuilds books from `orders`"). The order's margin is re-locked against
    /// the Balance Ledger exactly as it would have been at original submission time, so the
    /// ledger stays consistent with what the book now holds.
    pub fn restore_order(&self, symbol: &str, order_id: Uuid, address: &str, side: Side, price: Decimal, remaining_quantity: Decimal, leverage: i32, reduce_only: bool) -> Result<(), MatchingError> {
        let book = self.book(symbol)?;
        let locked_margin = if reduce_only {
            Decimal::ZERO
        } else {
            let margin = price * remaining_quantity / Decimal::from(leverage);
            if margin > Decimal::ZERO {
                self.balance_ledger.lock(address, margin, "order-recovery", &order_id.to_string())?;
            }
            margin
        };
        book.add_order(OrderEntry {
            id: order_id,
            user_address: address.to_string(),
            side,
            price,
            original_quantity: remaining_quantity,
            remaining_quantity,
            leverage,
            reduce_only,
            self_trade_policy: SelfTradePolicy::Allow,
            locked_margin,
            sequence: book.next_sequence(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        });
        Ok(())
    }

    /// Submits an order per spec §4.1's algorithm. Returns the residual state and every trade
    /// produced; margin lock/unlock and position mutation all happen here, inside the address
    /// lock, before this call returns.
    pub fn submit_order(&self, params: SubmitOrderParams) -> Result<MatchResult, MatchingError> {
        let market = self.market_registry.require_active(&params.symbol)?;
        let book = self.book(&params.symbol)?;

        if params.quantity <= Decimal::ZERO {
            return Err(MatchingError::InvalidQuantity("quantity must be > 0".into()));
        }
        if params.leverage < 1 || params.leverage > market.max_leverage {
            return Err(MatchingError::LeverageExceeded {
                symbol: params.symbol.clone(),
                leverage: params.leverage,
                max: market.max_leverage,
            });
        }

        let lock = self.address_lock(&params.address);
        let _guard = lock.lock();

        // Resolve the limit price used for the walk: client price for limit orders, an
        // aggressive protective band off the oracle for market orders.
        let limit_price = match params.order_type {
            OrderType::Limit => {
                let price = params.price.ok_or_else(|| MatchingError::InvalidPrice("limit order requires a price".into()))?;
                if price <= Decimal::ZERO {
                    return Err(MatchingError::InvalidPrice("price must be > 0".into()));
                }
                Some(price)
            }
            OrderType::Market => {
                if market.oracle_price.is_zero() {
                    return Err(MatchingError::OraclePriceUnavailable(params.symbol.clone()));
                }
                let band = market.oracle_price * MARKET_ORDER_SLIPPAGE;
                Some(match params.side {
                    Side::Buy => market.oracle_price + band,
                    Side::Sell => market.oracle_price - band,
                })
            }
        };

        // Post-only: reject up-front if it would cross, before any locking.
        if params.post_only {
            if let Some(price) = limit_price {
                if book.would_cross(params.side, price) {
                    return Err(MatchingError::PostOnlyWouldCross);
                }
            }
        }

        // Reduce-only: truncate to the opposite position's size, or reject if none exists.
        let direction = PositionSide::from_order_side(match params.side {
            Side::Buy => crate::models::OrderSide::Buy,
            Side::Sell => crate::models::OrderSide::Sell,
        });
        let mut quantity = params.quantity;
        if params.reduce_only {
            let existing = self.position_keeper.get(&params.address, &params.symbol);
            match existing {
                Some(pos) if pos.side == direction.opposite() && pos.size > Decimal::ZERO => {
                    quantity = quantity.min(pos.size);
                }
                _ => return Err(MatchingError::NoPositionToReduce),
            }
        }

        let required_price = limit_price.unwrap();
        let required_margin = if params.reduce_only {
            Decimal::ZERO
        } else {
            required_price * quantity / Decimal::from(params.leverage)
        };

        if !params.reduce_only && required_margin > Decimal::ZERO {
            self.balance_ledger.lock(&params.address, required_margin, "order-margin", &params.order_id.to_string())?;
        }

        let (bids_before, asks_before) = book.snapshot(50);

        let (trades, remaining) = book.match_incoming(
            params.order_id,
            &params.address,
            params.side,
            params.self_trade_policy,
            quantity,
            limit_price,
        );

        let filled_quantity: Decimal = trades.iter().map(|t| t.quantity).sum();
        let mut margin_effects = Vec::new();

        if !trades.is_empty() {
            let market_for_risk = market.clone();
            for trade in &trades {
                let taker_margin_share = if quantity.is_zero() {
                    Decimal::ZERO
                } else {
                    (trade.quantity / quantity) * required_margin
                };
                self.apply_fill_to_position(&params.address, &params.symbol, direction, trade.quantity, trade.price, taker_margin_share, market_for_risk.maintenance_margin_rate);
                margin_effects.push(super::types::FillMarginEffect {
                    address: params.address.clone(),
                    side: params.side,
                    quantity: trade.quantity,
                    price: trade.price,
                    margin_attributed: taker_margin_share,
                });

                let maker_lock = self.address_lock(&trade.maker_address);
                let _maker_guard = if trade.maker_address != params.address { Some(maker_lock.lock()) } else { None };
                let maker_direction = direction.opposite();
                self.apply_fill_to_position(&trade.maker_address, &params.symbol, maker_direction, trade.quantity, trade.price, trade.maker_margin_released, market_for_risk.maintenance_margin_rate);

                let _ = self.trade_tx.send(trade.clone());
            }

            let (bids_after, asks_after) = book.snapshot(50);
            self.publish_level_diffs(&params.symbol, Side::Buy, &bids_before, &bids_after);
            self.publish_level_diffs(&params.symbol, Side::Sell, &asks_before, &asks_after);
        }

        let mut residual_cancelled = false;
        let status;
        if remaining.is_zero() {
            status = ModelOrderStatus::Filled;
        } else if filled_quantity.is_zero() {
            status = ModelOrderStatus::Open;
        } else {
            status = ModelOrderStatus::PartiallyFilled;
        }

        match params.order_type {
            OrderType::Market => {
                if remaining > Decimal::ZERO {
                    residual_cancelled = true;
                    let unused_margin = required_margin - (required_margin * filled_quantity / quantity);
                    if unused_margin > Decimal::ZERO {
                        let _ = self.balance_ledger.unlock(&params.address, unused_margin, "market-residual-unlock", &params.order_id.to_string());
                    }
                }
            }
            OrderType::Limit => {
                if remaining > Decimal::ZERO {
                    let residual_margin = if quantity.is_zero() { Decimal::ZERO } else { required_margin * remaining / quantity };
                    book.add_order(OrderEntry {
                        id: params.order_id,
                        user_address: params.address.clone(),
                        side: params.side,
                        price: required_price,
                        original_quantity: params.quantity,
                        remaining_quantity: remaining,
                        leverage: params.leverage,
                        reduce_only: params.reduce_only,
                        self_trade_policy: params.self_trade_policy,
                        locked_margin: residual_margin,
                        sequence: book.next_sequence(),
                        created_at_ms: chrono::Utc::now().timestamp_millis(),
                    });
                }
            }
        }

        let avg_fill_price = if filled_quantity.is_zero() {
            None
        } else {
            Some(trades.iter().map(|t| t.price * t.quantity).sum::<Decimal>() / filled_quantity)
        };

        Ok(MatchResult {
            order_id: params.order_id,
            status,
            filled_quantity,
            remaining_quantity: remaining,
            avg_fill_price,
            trades,
            margin_effects,
            residual_cancelled,
        })
    }

    fn apply_fill_to_position(
        &self,
        address: &str,
        symbol: &str,
        direction: PositionSide,
        quantity: Decimal,
        price: Decimal,
        margin_attributed: Decimal,
        maintenance_margin_rate: Decimal,
    ) {
        let outcome = self.position_keeper.apply_fill(address, symbol, direction, quantity, price, margin_attributed, maintenance_margin_rate);
        if outcome.margin_to_release > Decimal::ZERO {
            let _ = self.balance_ledger.unlock(address, outcome.margin_to_release, "position-reduce-release", symbol);
        }
        if outcome.realized_pnl > Decimal::ZERO {
            let _ = self.balance_ledger.credit(address, outcome.realized_pnl, "realized-pnl", symbol);
        } else if outcome.realized_pnl < Decimal::ZERO {
            let _ = self.balance_ledger.debit(address, -outcome.realized_pnl, "realized-pnl", symbol);
        }
    }

    /// Cancels a resting order, unlocking its remaining locked margin. Returns `Ok(None)` if no
    /// such order exists (already filled or cancelled).
    pub fn cancel_order(&self, symbol: &str, order_id: Uuid, address: &str) -> Result<Option<()>, MatchingError> {
        let book = self.book(symbol)?;
        let lock = self.address_lock(address);
        let _guard = lock.lock();

        let Some(entry) = book.get_order(&order_id) else {
            return Ok(None);
        };
        if entry.user_address != address {
            return Err(MatchingError::OrderNotFound(order_id));
        }
        book.cancel_order(order_id);
        if entry.locked_margin > Decimal::ZERO {
            self.balance_ledger.unlock(address, entry.locked_margin, "order-cancel", &order_id.to_string())?;
        }
        Ok(Some(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketSeed;
    use rust_decimal_macros::dec;

    fn engine() -> Arc<MatchingEngine> {
        let seed = MarketSeed {
            symbol: "AAPL-PERP".into(),
            tick_size: "0.01".into(),
            lot_size: "0.01".into(),
            min_order_size: "0.01".into(),
            max_order_size: "1000".into(),
            max_leverage: 10,
            initial_margin_rate: "0.10".into(),
            maintenance_margin_rate: "0.05".into(),
            initial_oracle_price: "200.00".into(),
        };
        let registry = MarketRegistry::from_seeds(&[seed]).unwrap();
        let ledger = BalanceLedger::new();
        ledger.credit("alice", dec!(100000), "faucet", "seed-alice").unwrap();
        ledger.credit("bob", dec!(100000), "faucet", "seed-bob").unwrap();
        MatchingEngine::new(registry, ledger, PositionKeeper::new())
    }

    #[test]
    fn s1_cross_produces_one_trade_and_a_long_position() {
        let engine = engine();
        engine.submit_order(SubmitOrderParams {
            order_id: Uuid::new_v4(),
            symbol: "AAPL-PERP".into(),
            address: "alice".into(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            price: Some(dec!(200.50)),
            quantity: dec!(1.00),
            leverage: 10,
            post_only: false,
            reduce_only: false,
            self_trade_policy: SelfTradePolicy::Allow,
        }).unwrap();

        let result = engine.submit_order(SubmitOrderParams {
            order_id: Uuid::new_v4(),
            symbol: "AAPL-PERP".into(),
            address: "bob".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Some(dec!(200.50)),
            quantity: dec!(1.00),
            leverage: 10,
            post_only: false,
            reduce_only: false,
            self_trade_policy: SelfTradePolicy::Allow,
        }).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].price, dec!(200.50));
        assert_eq!(result.filled_quantity, dec!(1.00));

        let snapshot = engine.get_orderbook_snapshot("AAPL-PERP", 10).unwrap();
        assert!(snapshot.bids.is_empty());
        assert!(snapshot.asks.is_empty());
    }

    #[test]
    fn s3_post_only_rejects_without_locking_margin() {
        let engine = engine();
        engine.submit_order(SubmitOrderParams {
            order_id: Uuid::new_v4(),
            symbol: "AAPL-PERP".into(),
            address: "alice".into(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            price: Some(dec!(200.50)),
            quantity: dec!(1.00),
            leverage: 10,
            post_only: false,
            reduce_only: false,
            self_trade_policy: SelfTradePolicy::Allow,
        }).unwrap();

        let before = engine.balance_ledger.get("bob").free;
        let err = engine.submit_order(SubmitOrderParams {
            order_id: Uuid::new_v4(),
            symbol: "AAPL-PERP".into(),
            address: "bob".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Some(dec!(200.50)),
            quantity: dec!(1.00),
            leverage: 10,
            post_only: true,
            reduce_only: false,
            self_trade_policy: SelfTradePolicy::Allow,
        }).unwrap_err();

        assert!(matches!(err, MatchingError::PostOnlyWouldCross));
        assert_eq!(engine.balance_ledger.get("bob").free, before);
    }

    #[test]
    fn s4_reduce_only_truncates_to_position_size() {
        let engine = engine();

        // Dana goes long 0.40 against Eve at 200.
        engine.submit_order(SubmitOrderParams {
            order_id: Uuid::new_v4(),
            symbol: "AAPL-PERP".into(),
            address: "eve".into(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            price: Some(dec!(200.00)),
            quantity: dec!(0.40),
            leverage: 10,
            post_only: false,
            reduce_only: false,
            self_trade_policy: SelfTradePolicy::Allow,
        }).unwrap();
        engine.submit_order(SubmitOrderParams {
            order_id: Uuid::new_v4(),
            symbol: "AAPL-PERP".into(),
            address: "dana".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Some(dec!(200.00)),
            quantity: dec!(0.40),
            leverage: 10,
            post_only: false,
            reduce_only: false,
            self_trade_policy: SelfTradePolicy::Allow,
        }).unwrap();

        // Eve rests a bid at 199 for Dana's reduce-only sell to cross against.
        engine.submit_order(SubmitOrderParams {
            order_id: Uuid::new_v4(),
            symbol: "AAPL-PERP".into(),
            address: "eve".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Some(dec!(199.00)),
            quantity: dec!(1.00),
            leverage: 10,
            post_only: false,
            reduce_only: false,
            self_trade_policy: SelfTradePolicy::Allow,
        }).unwrap();

        let result = engine.submit_order(SubmitOrderParams {
            order_id: Uuid::new_v4(),
            symbol: "AAPL-PERP".into(),
            address: "dana".into(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            price: Some(dec!(199.00)),
            quantity: dec!(1.00),
            leverage: 10,
            post_only: false,
            reduce_only: true,
            self_trade_policy: SelfTradePolicy::Allow,
        }).unwrap();

        assert_eq!(result.filled_quantity, dec!(0.40));
        assert_eq!(result.remaining_quantity, Decimal::ZERO);

        let position = engine.position_keeper.get("dana", "AAPL-PERP");
        assert!(position.is_none() || position.unwrap().size.is_zero());

        let snapshot = engine.get_orderbook_snapshot("AAPL-PERP", 10).unwrap();
        assert!(snapshot.asks.is_empty(), "the excess 0.60 must be dropped, not rested");
    }
}
