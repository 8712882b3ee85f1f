use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "position_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// The direction a fill implies: taker buy opens/adds long, taker sell opens/adds short.
    pub fn from_order_side(side: crate::models::order::OrderSide) -> Self {
        match side {
            crate::models::order::OrderSide::Buy => PositionSide::Long,
            crate::models::order::OrderSide::Sell => PositionSide::Short,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "position_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub address: String,
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub avg_entry_price: Decimal,
    pub margin: Decimal,
    pub leverage: Decimal,
    pub realized_pnl: Decimal,
    pub liquidation_price: Decimal,
    pub status: PositionStatus,
    /// Opt-in to the once-per-UTC-day "liquidation save" talent. Talents are granted by an
    /// external collaborator (out of scope here), so the core always opens positions with this
    /// off; nothing in this crate ever flips it on.
    pub liquidation_save_enabled: bool,
    /// UTC date (YYYY-MM-DD) of the last "liquidation save" talent use, at most one per day.
    pub last_save_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn open(address: impl Into<String>, symbol: impl Into<String>, side: PositionSide, size: Decimal, price: Decimal, margin: Decimal) -> Self {
        let now = Utc::now();
        let mut p = Self {
            id: Uuid::new_v4(),
            address: address.into(),
            symbol: symbol.into(),
            side,
            size,
            avg_entry_price: price,
            margin,
            leverage: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            liquidation_price: Decimal::ZERO,
            status: PositionStatus::Open,
            liquidation_save_enabled: false,
            last_save_date: None,
            created_at: now,
            updated_at: now,
        };
        p.recompute_risk(Decimal::new(5, 2));
        p
    }

    /// Recomputes `leverage` and `liquidationPrice` per spec §4.3, given a maintenance margin
    /// rate clamped to `[0.001, 0.99]`.
    pub fn recompute_risk(&mut self, maintenance_margin_rate: Decimal) {
        if self.size.is_zero() || self.margin.is_zero() {
            self.leverage = Decimal::ZERO;
            self.liquidation_price = Decimal::ZERO;
            return;
        }
        let mmr = maintenance_margin_rate
            .max(Decimal::new(1, 3))
            .min(Decimal::new(99, 2));
        let notional = self.avg_entry_price * self.size;
        self.leverage = notional / self.margin;
        self.liquidation_price = match self.side {
            PositionSide::Long => {
                let liq = (notional - self.margin) / (self.size * (Decimal::ONE - mmr));
                liq.max(Decimal::ZERO)
            }
            PositionSide::Short => (notional + self.margin) / (self.size * (Decimal::ONE + mmr)),
        };
    }

    pub fn unrealized_pnl(&self, mark_price: Decimal) -> Decimal {
        let diff = mark_price - self.avg_entry_price;
        match self.side {
            PositionSide::Long => diff * self.size,
            PositionSide::Short => -diff * self.size,
        }
    }

    pub fn is_liquidatable(&self, mark_price: Decimal) -> bool {
        if self.status != PositionStatus::Open || self.size.is_zero() {
            return false;
        }
        match self.side {
            PositionSide::Long => mark_price <= self.liquidation_price,
            PositionSide::Short => mark_price >= self.liquidation_price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionResponse {
    pub position_id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub avg_entry_price: Decimal,
    pub margin: Decimal,
    pub leverage: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub liquidation_price: Decimal,
    pub status: PositionStatus,
}

impl Position {
    pub fn to_response(&self, mark_price: Decimal) -> PositionResponse {
        PositionResponse {
            position_id: self.id,
            symbol: self.symbol.clone(),
            side: self.side,
            size: self.size,
            avg_entry_price: self.avg_entry_price,
            margin: self.margin,
            leverage: self.leverage,
            mark_price,
            unrealized_pnl: self.unrealized_pnl(mark_price),
            realized_pnl: self.realized_pnl,
            liquidation_price: self.liquidation_price,
            status: self.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn s1_cross_liquidation_price() {
        // Bob long 1.00 @ 200.50, margin 20.05, mmr 0.05
        let pos = Position::open("bob", "AAPL-PERP", PositionSide::Long, dec!(1.00), dec!(200.50), dec!(20.05));
        assert_eq!(pos.leverage, dec!(10.00));
        // (200.50 - 20.05) / (1 * 0.95) = 189.947368...
        assert!((pos.liquidation_price - dec!(189.9473684210526315789473684)).abs() < dec!(0.0001));
    }

    #[test]
    fn s5_liquidation_scenario() {
        let pos = Position::open("eve", "AAPL-PERP", PositionSide::Long, dec!(1.00), dec!(200), dec!(20));
        // (200 - 20) / (1 * 0.95) = 189.473684...
        assert!((pos.liquidation_price - dec!(189.4736842105263157894736842)).abs() < dec!(0.0001));
        assert!(pos.is_liquidatable(dec!(189.00)));
        assert!(!pos.is_liquidatable(dec!(190.00)));
    }
}
