use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::MarketSeed;
use crate::models::{Market, MarketStatus};

#[derive(Debug, Error)]
pub enum MarketRegistryError {
    #[error("unknown market symbol: {0}")]
    UnknownSymbol(String),
    #[error("invalid market seed for {symbol}: {reason}")]
    InvalidSeed { symbol: String, reason: String },
    #[error("market {0} is not active")]
    NotActive(String),
}

/// Holds every configured market and its latest oracle price. One instance shared via `Arc`
/// across the matching engine, position keeper, candle aggregator and API layer.
pub struct MarketRegistry {
    markets: RwLock<HashMap<String, Market>>,
}

impl MarketRegistry {
    pub fn from_seeds(seeds: &[MarketSeed]) -> Result<Arc<Self>, MarketRegistryError> {
        let mut markets = HashMap::new();
        for seed in seeds {
            let market = Market {
                symbol: seed.symbol.clone(),
                tick_size: parse_dec(&seed.symbol, "tick_size", &seed.tick_size)?,
                lot_size: parse_dec(&seed.symbol, "lot_size", &seed.lot_size)?,
                min_order_size: parse_dec(&seed.symbol, "min_order_size", &seed.min_order_size)?,
                max_order_size: parse_dec(&seed.symbol, "max_order_size", &seed.max_order_size)?,
                max_leverage: seed.max_leverage,
                initial_margin_rate: parse_dec(&seed.symbol, "initial_margin_rate", &seed.initial_margin_rate)?,
                maintenance_margin_rate: parse_dec(&seed.symbol, "maintenance_margin_rate", &seed.maintenance_margin_rate)?,
                oracle_price: parse_dec(&seed.symbol, "initial_oracle_price", &seed.initial_oracle_price)?,
                oracle_updated_at: chrono::Utc::now(),
                status: MarketStatus::Active,
            };
            market.validate_config().map_err(|reason| MarketRegistryError::InvalidSeed {
                symbol: seed.symbol.clone(),
                reason,
            })?;
            markets.insert(market.symbol.clone(), market);
        }
        Ok(Arc::new(Self {
            markets: RwLock::new(markets),
        }))
    }

    pub fn get(&self, symbol: &str) -> Result<Market, MarketRegistryError> {
        self.markets
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| MarketRegistryError::UnknownSymbol(symbol.to_string()))
    }

    pub fn require_active(&self, symbol: &str) -> Result<Market, MarketRegistryError> {
        let market = self.get(symbol)?;
        if market.status != MarketStatus::Active {
            return Err(MarketRegistryError::NotActive(symbol.to_string()));
        }
        Ok(market)
    }

    pub fn list(&self) -> Vec<Market> {
        self.markets.read().values().cloned().collect()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.markets.read().keys().cloned().collect()
    }

    /// Applied by the oracle ingestor after each successful poll.
    pub fn update_oracle_price(&self, symbol: &str, price: Decimal) -> Result<(), MarketRegistryError> {
        let mut guard = self.markets.write();
        let market = guard
            .get_mut(symbol)
            .ok_or_else(|| MarketRegistryError::UnknownSymbol(symbol.to_string()))?;
        market.oracle_price = price;
        market.oracle_updated_at = chrono::Utc::now();
        Ok(())
    }

    pub fn set_status(&self, symbol: &str, status: MarketStatus) -> Result<(), MarketRegistryError> {
        let mut guard = self.markets.write();
        let market = guard
            .get_mut(symbol)
            .ok_or_else(|| MarketRegistryError::UnknownSymbol(symbol.to_string()))?;
        market.status = status;
        Ok(())
    }
}

fn parse_dec(symbol: &str, field: &str, raw: &str) -> Result<Decimal, MarketRegistryError> {
    Decimal::from_str(raw).map_err(|_| MarketRegistryError::InvalidSeed {
        symbol: symbol.to_string(),
        reason: format!("{field} is not a valid decimal: {raw}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> MarketSeed {
        MarketSeed {
            symbol: "AAPL-PERP".into(),
            tick_size: "0.01".into(),
            lot_size: "0.01".into(),
            min_order_size: "0.01".into(),
            max_order_size: "1000".into(),
            max_leverage: 50,
            initial_margin_rate: "0.10".into(),
            maintenance_margin_rate: "0.05".into(),
            initial_oracle_price: "200.00".into(),
        }
    }

    #[test]
    fn loads_seed_and_round_trips() {
        let registry = MarketRegistry::from_seeds(&[seed()]).unwrap();
        let m = registry.get("AAPL-PERP").unwrap();
        assert_eq!(m.max_leverage, 50);
    }

    #[test]
    fn rejects_unknown_symbol() {
        let registry = MarketRegistry::from_seeds(&[seed()]).unwrap();
        assert!(matches!(
            registry.get("MSFT-PERP"),
            Err(MarketRegistryError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn oracle_update_is_visible_to_subsequent_reads() {
        let registry = MarketRegistry::from_seeds(&[seed()]).unwrap();
        registry.update_oracle_price("AAPL-PERP", rust_decimal::Decimal::new(20150, 2)).unwrap();
        assert_eq!(registry.get("AAPL-PERP").unwrap().oracle_price, rust_decimal::Decimal::new(20150, 2));
    }
}
