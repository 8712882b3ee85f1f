//! Ties the in-memory matching engine to durable storage. The engine is the source of truth
//! for order books, positions, and balances; everything here is a best-effort mirror into
//! Postgres, persisted after the fact so a restart has something to recover from (spec's
//! recovery policy). No business logic lives here — `submit_order`/`cancel_order` defer
//! entirely to the engine and only add the persistence side effect.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::models::order::{Order, OrderStatus as ModelOrderStatus, OrderType as ModelOrderType, SelfTradePolicy};
use crate::models::OrderSide as ModelOrderSide;

use super::engine::{MatchingEngine, SubmitOrderParams};
use super::types::{MatchResult, MatchingError, OrderType, Side};

/// Connects the matching engine to Postgres. Order submission stays synchronous and in-memory;
/// this only adds best-effort durability around it.
pub struct OrderFlowOrchestrator {
    engine: Arc<MatchingEngine>,
    db: Arc<Database>,
}

impl OrderFlowOrchestrator {
    pub fn new(engine: Arc<MatchingEngine>, db: Arc<Database>) -> Self {
        info!("order flow orchestrator initialized");
        Self { engine, db }
    }

    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.engine
    }

    /// Submits an order, then persists the accepted order row (and, via the order's fills, the
    /// resting maker orders they touched) in the background. Idempotent on retry: `upsert_order`
    /// is keyed on the order id.
    pub async fn submit_order(
        &self,
        symbol: &str,
        address: &str,
        side: Side,
        order_type: OrderType,
        price: Option<rust_decimal::Decimal>,
        quantity: rust_decimal::Decimal,
        leverage: i32,
        post_only: bool,
        reduce_only: bool,
        self_trade_policy: SelfTradePolicy,
        client_order_id: Option<Uuid>,
    ) -> Result<MatchResult, MatchingError> {
        let order_id = Uuid::new_v4();
        let result = self.engine.submit_order(SubmitOrderParams {
            order_id,
            symbol: symbol.to_string(),
            address: address.to_string(),
            side,
            order_type,
            price,
            quantity,
            leverage,
            post_only,
            reduce_only,
            self_trade_policy,
        })?;

        let now = chrono::Utc::now();
        let order = Order {
            id: order_id,
            user_address: address.to_string(),
            symbol: symbol.to_string(),
            side: to_model_side(side),
            order_type: to_model_order_type(order_type),
            price,
            amount: quantity,
            filled_amount: result.filled_quantity,
            avg_fill_price: result.avg_fill_price,
            leverage,
            post_only,
            reduce_only,
            self_trade_policy,
            client_order_id,
            status: result.status,
            created_at: now,
            updated_at: now,
        };

        let db = self.db.clone();
        tokio::spawn(async move {
            if let Err(e) = db.upsert_order(&order).await {
                error!(order_id = %order.id, error = %e, "failed to persist order");
            }
        });

        for trade in &result.trades {
            if let Err(e) = self.db.mark_order_status(
                trade.maker_order_id,
                if result.filled_quantity.is_zero() { ModelOrderStatus::Open } else { ModelOrderStatus::PartiallyFilled },
            ).await {
                warn!(order_id = %trade.maker_order_id, error = %e, "failed to touch maker order status");
            }
        }

        debug!(order_id = %order_id, status = ?result.status, filled = %result.filled_quantity, "order processed");
        Ok(result)
    }

    pub async fn cancel_order(&self, symbol: &str, order_id: Uuid, address: &str) -> Result<bool, MatchingError> {
        let cancelled = self.engine.cancel_order(symbol, order_id, address)?.is_some();
        if cancelled {
            let db = self.db.clone();
            tokio::spawn(async move {
                if let Err(e) = db.mark_order_status(order_id, ModelOrderStatus::Cancelled).await {
                    error!(%order_id, error = %e, "failed to persist cancellation");
                }
            });
        }
        Ok(cancelled)
    }
}

fn to_model_side(side: Side) -> ModelOrderSide {
    match side {
        Side::Buy => ModelOrderSide::Buy,
        Side::Sell => ModelOrderSide::Sell,
    }
}

fn to_model_order_type(order_type: OrderType) -> ModelOrderType {
    match order_type {
        OrderType::Limit => ModelOrderType::Limit,
        OrderType::Market => ModelOrderType::Market,
    }
}

/// Background workers mirroring the engine's broadcast streams into Postgres. One instance per
/// process, started once at startup and left running for the process lifetime.
pub struct PersistenceWorker {
    engine: Arc<MatchingEngine>,
    db: Arc<Database>,
}

impl PersistenceWorker {
    pub fn new(engine: Arc<MatchingEngine>, db: Arc<Database>) -> Self {
        Self { engine, db }
    }

    /// Spawns the trade, position, liquidation, and balance-change persistence tasks. Returns
    /// immediately; the tasks run for the lifetime of the process.
    pub fn spawn(self) {
        self.spawn_trade_worker();
        self.spawn_liquidation_worker();
        self.spawn_balance_change_worker();
    }

    fn spawn_trade_worker(&self) {
        let mut trades = self.engine.subscribe_trades();
        let db = self.db.clone();
        let position_keeper = self.engine.position_keeper();
        tokio::spawn(async move {
            info!("trade persistence worker started");
            loop {
                match trades.recv().await {
                    Ok(trade) => {
                        let row = crate::models::trade::Trade {
                            id: trade.trade_id,
                            symbol: trade.symbol.clone(),
                            maker_order_id: trade.maker_order_id,
                            taker_order_id: trade.taker_order_id,
                            maker_address: trade.maker_address.clone(),
                            taker_address: trade.taker_address.clone(),
                            side: to_model_side(trade.taker_side),
                            price: trade.price,
                            quantity: trade.quantity,
                            quote_quantity: trade.price * trade.quantity,
                            is_synthetic: false,
                            created_at: chrono::Utc::now(),
                        };
                        if let Err(e) = db.insert_trade(&row).await {
                            error!(trade_id = %row.id, error = %e, "failed to persist trade");
                        }

                        for (address, symbol) in [
                            (trade.maker_address.clone(), row.symbol.clone()),
                            (trade.taker_address.clone(), row.symbol.clone()),
                        ] {
                            if let Some(position) = position_keeper.get(&address, &symbol) {
                                if let Err(e) = db.upsert_position(&position).await {
                                    error!(%address, %symbol, error = %e, "failed to persist position after fill");
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "trade persistence worker lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("trade channel closed, stopping persistence worker");
                        break;
                    }
                }
            }
        });
    }

    fn spawn_liquidation_worker(&self) {
        let mut liquidations = self.engine.subscribe_liquidations();
        let db = self.db.clone();
        let position_keeper = self.engine.position_keeper();
        tokio::spawn(async move {
            info!("liquidation persistence worker started");
            loop {
                match liquidations.recv().await {
                    Ok(event) => {
                        if let Some(position) = position_keeper.get(&event.address, &event.symbol) {
                            if let Err(e) = db.upsert_position(&position).await {
                                error!(address = %event.address, symbol = %event.symbol, error = %e, "failed to persist liquidated position");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "liquidation persistence worker lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("liquidation channel closed, stopping persistence worker");
                        break;
                    }
                }
            }
        });
    }

    /// Drains the Balance Ledger's change log on a fixed tick, since balance mutations don't
    /// have their own broadcast channel (they're always a side effect of a trade or liquidation
    /// already covered by the other two workers).
    fn spawn_balance_change_worker(&self) {
        let ledger = self.engine.balance_ledger();
        let db = self.db.clone();
        tokio::spawn(async move {
            let mut cursor = 0usize;
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(500));
            loop {
                ticker.tick().await;
                for change in ledger.drain_new_changes(&mut cursor) {
                    if let Err(e) = db.insert_balance_change(&change).await {
                        error!(address = %change.address, error = %e, "failed to persist balance change");
                    }
                }
            }
        });
    }
}
