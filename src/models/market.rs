use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Active,
    Paused,
    Settlement,
}

/// Immutable-per-run instrument configuration plus the one mutable field, `oracle_price`.
/// Loaded once at bootstrap from config; never deleted while referenced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub symbol: String,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    pub min_order_size: Decimal,
    pub max_order_size: Decimal,
    pub max_leverage: i32,
    pub initial_margin_rate: Decimal,
    pub maintenance_margin_rate: Decimal,
    pub oracle_price: Decimal,
    pub oracle_updated_at: DateTime<Utc>,
    pub status: MarketStatus,
}

impl Market {
    /// `tickSize>0, lotSize>0, 0<mmr<imr<1`
    pub fn validate_config(&self) -> Result<(), String> {
        if self.tick_size <= Decimal::ZERO {
            return Err("tickSize must be > 0".into());
        }
        if self.lot_size <= Decimal::ZERO {
            return Err("lotSize must be > 0".into());
        }
        if !(Decimal::ZERO < self.maintenance_margin_rate
            && self.maintenance_margin_rate < self.initial_margin_rate
            && self.initial_margin_rate < Decimal::ONE)
        {
            return Err("must hold: 0 < mmr < imr < 1".into());
        }
        Ok(())
    }

    pub fn round_to_tick(&self, price: Decimal) -> Decimal {
        (price / self.tick_size).round() * self.tick_size
    }

    pub fn is_tick_aligned(&self, price: Decimal) -> bool {
        (price / self.tick_size).round() * self.tick_size == price
    }

    pub fn is_lot_aligned(&self, qty: Decimal) -> bool {
        (qty / self.lot_size).round() * self.lot_size == qty
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketResponse {
    pub symbol: String,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    pub min_order_size: Decimal,
    pub max_order_size: Decimal,
    pub max_leverage: i32,
    pub initial_margin_rate: Decimal,
    pub maintenance_margin_rate: Decimal,
    pub oracle_price: Decimal,
    pub status: MarketStatus,
}

impl From<&Market> for MarketResponse {
    fn from(m: &Market) -> Self {
        Self {
            symbol: m.symbol.clone(),
            tick_size: m.tick_size,
            lot_size: m.lot_size,
            min_order_size: m.min_order_size,
            max_order_size: m.max_order_size,
            max_leverage: m.max_leverage,
            initial_margin_rate: m.initial_margin_rate,
            maintenance_margin_rate: m.maintenance_margin_rate,
            oracle_price: m.oracle_price,
            status: m.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn aapl() -> Market {
        Market {
            symbol: "AAPL-PERP".into(),
            tick_size: dec!(0.01),
            lot_size: dec!(0.01),
            min_order_size: dec!(0.01),
            max_order_size: dec!(1000),
            max_leverage: 10,
            initial_margin_rate: dec!(0.1),
            maintenance_margin_rate: dec!(0.05),
            oracle_price: dec!(200),
            oracle_updated_at: Utc::now(),
            status: MarketStatus::Active,
        }
    }

    #[test]
    fn validates_rate_ordering() {
        assert!(aapl().validate_config().is_ok());
        let mut bad = aapl();
        bad.maintenance_margin_rate = dec!(0.2);
        assert!(bad.validate_config().is_err());
    }

    #[test]
    fn tick_alignment() {
        let m = aapl();
        assert!(m.is_tick_aligned(dec!(200.50)));
        assert!(!m.is_tick_aligned(dec!(200.505)));
    }
}
