//! Price Cache Module
//!
//! Caches the current oracle price per market so reads (REST snapshot, WebSocket
//! subscriber catch-up) don't need to go through the Market Registry's lock.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::keys::{ttl, CacheKey};
use super::redis_client::RedisClient;

/// Cached oracle price for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPrice {
    pub symbol: String,
    pub oracle_price: Decimal,
    pub updated_at: i64,
}

/// Price cache operations
pub struct PriceCache {
    redis: Arc<RedisClient>,
}

impl PriceCache {
    /// Create new price cache
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    /// Get the cached oracle price for a symbol
    pub async fn get_oracle_price(&self, symbol: &str) -> Option<Decimal> {
        let key = CacheKey::oracle_price(symbol);
        match self.redis.get::<String>(&key).await {
            Ok(Some(value)) => value.parse().ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to get oracle price from cache: {}", e);
                None
            }
        }
    }

    /// Set the oracle price for a symbol
    pub async fn set_oracle_price(&self, symbol: &str, price: Decimal) -> Result<(), redis::RedisError> {
        let key = CacheKey::oracle_price(symbol);
        self.redis.set_ex(&key, price.to_string(), ttl::PRICE).await
    }

    /// Invalidate the cached price for a symbol
    pub async fn invalidate_symbol(&self, symbol: &str) -> Result<(), redis::RedisError> {
        let key = CacheKey::oracle_price(symbol);
        self.redis.del(&key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_price_serialization() {
        let data = CachedPrice {
            symbol: "AAPL-PERP".to_string(),
            oracle_price: Decimal::new(20000, 2),
            updated_at: 1702654321000,
        };

        let json = serde_json::to_string(&data).unwrap();
        let parsed: CachedPrice = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.symbol, "AAPL-PERP");
        assert_eq!(parsed.oracle_price, Decimal::new(20000, 2));
    }
}
