use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::info;

use crate::models::{Position, PositionSide, PositionStatus};

/// What happened to a user's position as the result of one fill, and the cash effects the
/// caller must apply to the Balance Ledger under the same address lock.
#[derive(Debug, Clone)]
pub struct FillOutcome {
    pub position: Position,
    pub realized_pnl: Decimal,
    /// Margin to move from locked back to free (proportional release on reduce/close, or the
    /// unused remainder when a flip's excess margin is refunded).
    pub margin_to_release: Decimal,
}

/// One mark-to-market crossing: a position was liquidated (or saved) on an oracle tick.
#[derive(Debug, Clone)]
pub struct LiquidationOutcome {
    pub position: Position,
    pub realized_pnl: Decimal,
    pub margin_forfeited: Decimal,
    pub saved: bool,
}

/// Owns every user's open positions. Keyed by address so the per-address lock spec §5 requires
/// for "fill + balance + position as one transition" is the same lock the Balance Ledger's
/// caller (the matching engine) holds for the whole operation; callers are expected to
/// serialize per address themselves (the matching engine's address lock), this map's own
/// sharding only protects the HashMap structure itself.
pub struct PositionKeeper {
    positions: DashMap<String, Mutex<HashMap<String, Position>>>,
}

impl PositionKeeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            positions: DashMap::new(),
        })
    }

    pub fn get(&self, address: &str, symbol: &str) -> Option<Position> {
        self.positions.get(address)?.lock().get(symbol).cloned()
    }

    pub fn list_for_address(&self, address: &str) -> Vec<Position> {
        self.positions
            .get(address)
            .map(|m| m.lock().values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn list_open_for_symbol(&self, symbol: &str) -> Vec<Position> {
        self.positions
            .iter()
            .filter_map(|entry| entry.value().lock().get(symbol).filter(|p| p.status == PositionStatus::Open).cloned())
            .collect()
    }

    /// Reinstates a position row read back from the store at startup. Bypasses `apply_fill`'s
    /// PnL/margin bookkeeping entirely: the row already reflects the last persisted state, this
    /// just makes it visible in memory again.
    pub fn restore(&self, position: Position) {
        self.positions
            .entry(position.address.clone())
            .or_insert_with(|| Mutex::new(HashMap::new()))
            .lock()
            .insert(position.symbol.clone(), position);
    }

    /// Applies one fill per spec §4.3. `direction` is the side the fill implies for this
    /// address (buy → long, sell → short); `margin_attributed` is this address's share of the
    /// margin locked for the fill.
    pub fn apply_fill(
        &self,
        address: &str,
        symbol: &str,
        direction: PositionSide,
        quantity: Decimal,
        price: Decimal,
        margin_attributed: Decimal,
        maintenance_margin_rate: Decimal,
    ) -> FillOutcome {
        let entry = self
            .positions
            .entry(address.to_string())
            .or_insert_with(|| Mutex::new(HashMap::new()));
        let mut positions = entry.lock();

        let current = positions.remove(symbol);
        let (mut position, realized_pnl, margin_to_release) = match current {
            None => {
                let position = Position::open(address, symbol, direction, quantity, price, margin_attributed);
                (position, Decimal::ZERO, Decimal::ZERO)
            }
            Some(mut position) if position.side == direction => {
                let new_size = position.size + quantity;
                position.avg_entry_price = (position.avg_entry_price * position.size + price * quantity) / new_size;
                position.size = new_size;
                position.margin += margin_attributed;
                (position, Decimal::ZERO, Decimal::ZERO)
            }
            Some(mut position) if quantity <= position.size => {
                let realized = signed_pnl(position.side, price, position.avg_entry_price, quantity);
                let margin_release = (quantity / position.size) * position.margin;
                position.margin -= margin_release;
                position.size -= quantity;
                position.realized_pnl += realized;
                if position.size.is_zero() {
                    position.status = PositionStatus::Closed;
                }
                (position, realized, margin_release)
            }
            Some(mut position) => {
                // Flip: fully reduce, then open the remainder on the opposite side.
                let close_qty = position.size;
                let realized = signed_pnl(position.side, price, position.avg_entry_price, close_qty);
                let margin_release = position.margin;
                position.realized_pnl += realized;
                position.status = PositionStatus::Closed;
                position.size = Decimal::ZERO;
                position.margin = Decimal::ZERO;

                let remainder_qty = quantity - close_qty;
                let remainder_margin_share = if quantity.is_zero() {
                    Decimal::ZERO
                } else {
                    (remainder_qty / quantity) * margin_attributed
                };
                let mut flipped = Position::open(address, symbol, direction, remainder_qty, price, remainder_margin_share);
                flipped.realized_pnl = position.realized_pnl;
                (flipped, realized, margin_release)
            }
        };

        position.recompute_risk(maintenance_margin_rate);
        positions.insert(symbol.to_string(), position.clone());

        FillOutcome {
            position,
            realized_pnl,
            margin_to_release,
        }
    }

    /// Mark-to-market sweep for one oracle tick. Force-closes any position that has crossed its
    /// liquidation price. A position with `liquidation_save_enabled` gets a once-per-UTC-day
    /// reprieve that halves size and margin instead — that flag is only ever set by an external
    /// collaborator granting the talent (spec §1/§4.3), so it stays off for every position this
    /// core opens.
    pub fn mark_to_market(&self, symbol: &str, mark_price: Decimal, maintenance_margin_rate: Decimal) -> Vec<LiquidationOutcome> {
        let mut outcomes = Vec::new();
        for entry in self.positions.iter() {
            let mut positions = entry.value().lock();
            let Some(position) = positions.get_mut(symbol) else {
                continue;
            };
            if !position.is_liquidatable(mark_price) {
                continue;
            }

            let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
            let can_save = position.liquidation_save_enabled && position.last_save_date.as_deref() != Some(today.as_str());

            if can_save {
                position.size /= Decimal::TWO;
                position.margin /= Decimal::TWO;
                position.last_save_date = Some(today);
                position.recompute_risk(maintenance_margin_rate);
                if !position.is_liquidatable(mark_price) {
                    info!(address = %entry.key(), %symbol, "liquidation save applied");
                    continue;
                }
            }

            let realized = signed_pnl(position.side, mark_price, position.avg_entry_price, position.size);
            let margin_forfeited = position.margin;
            position.realized_pnl += realized;
            position.status = PositionStatus::Liquidated;
            position.size = Decimal::ZERO;
            position.margin = Decimal::ZERO;

            outcomes.push(LiquidationOutcome {
                position: position.clone(),
                realized_pnl: realized,
                margin_forfeited,
                saved: false,
            });
        }
        outcomes
    }
}

fn signed_pnl(side: PositionSide, exit_price: Decimal, entry_price: Decimal, quantity: Decimal) -> Decimal {
    let diff = exit_price - entry_price;
    match side {
        PositionSide::Long => diff * quantity,
        PositionSide::Short => -diff * quantity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn opens_then_adds_recomputing_avg_entry() {
        let keeper = PositionKeeper::new();
        keeper.apply_fill("bob", "AAPL-PERP", PositionSide::Long, dec!(1.0), dec!(200), dec!(20), dec!(0.05));
        let outcome = keeper.apply_fill("bob", "AAPL-PERP", PositionSide::Long, dec!(1.0), dec!(210), dec!(21), dec!(0.05));
        assert_eq!(outcome.position.size, dec!(2.0));
        assert_eq!(outcome.position.avg_entry_price, dec!(205));
    }

    #[test]
    fn reduces_and_realizes_pnl() {
        let keeper = PositionKeeper::new();
        keeper.apply_fill("bob", "AAPL-PERP", PositionSide::Long, dec!(1.0), dec!(200), dec!(20), dec!(0.05));
        let outcome = keeper.apply_fill("bob", "AAPL-PERP", PositionSide::Short, dec!(0.5), dec!(210), dec!(0), dec!(0.05));
        assert_eq!(outcome.realized_pnl, dec!(5.0));
        assert_eq!(outcome.position.size, dec!(0.5));
    }

    #[test]
    fn full_close_zeroes_size_and_sets_closed_status() {
        let keeper = PositionKeeper::new();
        keeper.apply_fill("bob", "AAPL-PERP", PositionSide::Long, dec!(1.0), dec!(200), dec!(20), dec!(0.05));
        let outcome = keeper.apply_fill("bob", "AAPL-PERP", PositionSide::Short, dec!(1.0), dec!(210), dec!(0), dec!(0.05));
        assert_eq!(outcome.position.status, PositionStatus::Closed);
        assert_eq!(outcome.position.size, dec!(0));
    }

    #[test]
    fn s5_mark_to_market_liquidates_crossed_position() {
        let keeper = PositionKeeper::new();
        keeper.apply_fill("eve", "AAPL-PERP", PositionSide::Long, dec!(1.00), dec!(200), dec!(20), dec!(0.05));
        let outcomes = keeper.mark_to_market("AAPL-PERP", dec!(189.00), dec!(0.05));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].position.status, PositionStatus::Liquidated);
        assert_eq!(outcomes[0].realized_pnl, dec!(-11.00));
    }
}
