//! Postgres persistence. The matching engine and Position Keeper are the source of truth
//! for live state; this module is the durable record behind them — order/trade/position
//! rows other processes and a restart can read back (spec's recovery policy: books rebuild
//! from `orders`, positions replay from `positions`, candles resume from their last
//! persisted bucket).

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::candle::Candle;
use crate::models::order::{Order, OrderStatus};
use crate::models::position::Position;
use crate::models::trade::Trade;
use crate::models::BalanceChange;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upserts an order row. Called once when an order is accepted and again, with the same
    /// id, as fills update `filled_amount`/`status` (spec's "order insert carries a
    /// client-generated id so retries are safe").
    pub async fn upsert_order(&self, order: &Order) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_address, symbol, side, order_type, price, amount,
                filled_amount, avg_fill_price, leverage, post_only, reduce_only,
                self_trade_policy, client_order_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4::order_side, $5::order_type, $6, $7, $8, $9, $10, $11, $12,
                $13::self_trade_policy, $14, $15::order_status, $16, $17)
            ON CONFLICT (id) DO UPDATE SET
                filled_amount = $8,
                avg_fill_price = $9,
                status = $15::order_status,
                updated_at = $17
            "#,
        )
        .bind(order.id)
        .bind(&order.user_address)
        .bind(&order.symbol)
        .bind(order.side)
        .bind(order.order_type)
        .bind(order.price)
        .bind(order.amount)
        .bind(order.filled_amount)
        .bind(order.avg_fill_price)
        .bind(order.leverage)
        .bind(order.post_only)
        .bind(order.reduce_only)
        .bind(order.self_trade_policy)
        .bind(order.client_order_id)
        .bind(order.status)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_order_by_client_id(
        &self,
        user_address: &str,
        client_order_id: Uuid,
    ) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_address = $1 AND client_order_id = $2",
        )
        .bind(user_address)
        .bind(client_order_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn mark_order_status(&self, order_id: Uuid, status: OrderStatus) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE orders SET status = $1::order_status, updated_at = NOW() WHERE id = $2")
            .bind(status)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn open_orders_for_recovery(&self) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE status IN ('open', 'partial') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn open_orders_for_address(&self, address: &str) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_address = $1 AND status IN ('open', 'partial') ORDER BY created_at DESC",
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn order_history_for_address(&self, address: &str, limit: i64) -> Result<Vec<Order>, sqlx::Error> {
        sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_address = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(address)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Inserts a trade row. `ON CONFLICT DO NOTHING` on the unique trade id makes this safe to
    /// retry from the persistence worker's at-least-once broadcast subscription.
    pub async fn insert_trade(&self, trade: &Trade) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, symbol, maker_order_id, taker_order_id, maker_address,
                taker_address, side, price, quantity, quote_quantity, is_synthetic, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7::order_side, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(trade.id)
        .bind(&trade.symbol)
        .bind(trade.maker_order_id)
        .bind(trade.taker_order_id)
        .bind(&trade.maker_address)
        .bind(&trade.taker_address)
        .bind(trade.side)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.quote_quantity)
        .bind(trade.is_synthetic)
        .bind(trade.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_trades(&self, symbol: &str, limit: i64) -> Result<Vec<Trade>, sqlx::Error> {
        sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE symbol = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn trade_history_for_address(&self, address: &str, limit: i64) -> Result<Vec<Trade>, sqlx::Error> {
        sqlx::query_as::<_, Trade>(
            "SELECT * FROM trades WHERE maker_address = $1 OR taker_address = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(address)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Upserts a position row by id. The Position Keeper is the authority on live state; this
    /// is its durable mirror for recovery and the REST position list.
    pub async fn upsert_position(&self, position: &Position) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO positions (id, address, symbol, side, size, avg_entry_price, margin,
                leverage, realized_pnl, liquidation_price, status, liquidation_save_enabled,
                last_save_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4::position_side, $5, $6, $7, $8, $9, $10, $11::position_status, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                size = $5,
                avg_entry_price = $6,
                margin = $7,
                leverage = $8,
                realized_pnl = $9,
                liquidation_price = $10,
                status = $11::position_status,
                liquidation_save_enabled = $12,
                last_save_date = $13,
                updated_at = $15
            "#,
        )
        .bind(position.id)
        .bind(&position.address)
        .bind(&position.symbol)
        .bind(position.side)
        .bind(position.size)
        .bind(position.avg_entry_price)
        .bind(position.margin)
        .bind(position.leverage)
        .bind(position.realized_pnl)
        .bind(position.liquidation_price)
        .bind(position.status)
        .bind(position.liquidation_save_enabled)
        .bind(&position.last_save_date)
        .bind(position.created_at)
        .bind(position.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn open_positions_for_recovery(&self) -> Result<Vec<Position>, sqlx::Error> {
        sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE status = 'open'")
            .fetch_all(&self.pool)
            .await
    }

    /// Appends one balance change row. The Balance Ledger's invariant (`free + locked =
    /// totalCredits - totalDebits`) is enforced in memory; this is the append-only audit trail
    /// behind it.
    pub async fn insert_balance_change(&self, change: &BalanceChange) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO balance_changes (id, address, kind, amount, reason, reference_id,
                free_after, locked_after, created_at)
            VALUES ($1, $2, $3::balance_change_kind, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(change.id)
        .bind(&change.address)
        .bind(change.kind)
        .bind(change.amount)
        .bind(&change.reason)
        .bind(&change.reference_id)
        .bind(change.free_after)
        .bind(change.locked_after)
        .bind(change.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upserts a closed candle bucket. Unique on `(market_symbol, interval, bucket_start)` per
    /// spec's persisted-state layout.
    pub async fn upsert_candle(&self, candle: &Candle) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO candles (market_symbol, interval, bucket_start, open, high, low, close,
                volume, trades, is_closed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (market_symbol, interval, bucket_start) DO UPDATE SET
                high = $5,
                low = $6,
                close = $7,
                volume = $8,
                trades = $9,
                is_closed = $10
            "#,
        )
        .bind(&candle.market_symbol)
        .bind(candle.interval.as_str())
        .bind(candle.bucket_start)
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .bind(candle.trades)
        .bind(candle.is_closed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: i64,
    ) -> Result<Vec<Candle>, sqlx::Error> {
        sqlx::query_as::<_, Candle>(
            "SELECT * FROM candles WHERE market_symbol = $1 AND interval = $2 ORDER BY bucket_start DESC LIMIT $3",
        )
        .bind(symbol)
        .bind(interval)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Records a faucet claim for audit, keyed by address + the cooldown-window timestamp.
    pub async fn insert_faucet_claim(&self, address: &str, amount: Decimal) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO faucet_requests (id, address, amount, created_at) VALUES ($1, $2, $3, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(address)
        .bind(amount)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
