//! Position Cache Module
//!
//! Provides Redis-based caching for positions so high-frequency reads (REST position
//! list, WebSocket `user:ADDR` catch-up) don't contend with the Position Keeper's
//! in-memory map. The Position Keeper remains the source of truth; this cache is a
//! best-effort read-through projection, rebuilt on a miss.

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::keys::{ttl, CacheKey};
use super::redis_client::RedisClient;
use crate::models::{Position, PositionSide, PositionStatus};

/// Cached position data (serializable subset of Position; Decimal fields travel as strings
/// so precision survives the JSON round trip unchanged).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPosition {
    pub id: Uuid,
    pub address: String,
    pub symbol: String,
    pub side: String,
    pub size: String,
    pub avg_entry_price: String,
    pub margin: String,
    pub leverage: String,
    pub realized_pnl: String,
    pub liquidation_price: String,
    pub status: String,
    pub liquidation_save_enabled: bool,
    pub last_save_date: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Position> for CachedPosition {
    fn from(p: &Position) -> Self {
        Self {
            id: p.id,
            address: p.address.clone(),
            symbol: p.symbol.clone(),
            side: p.side.to_string(),
            size: p.size.to_string(),
            avg_entry_price: p.avg_entry_price.to_string(),
            margin: p.margin.to_string(),
            leverage: p.leverage.to_string(),
            realized_pnl: p.realized_pnl.to_string(),
            liquidation_price: p.liquidation_price.to_string(),
            status: format!("{:?}", p.status).to_lowercase(),
            liquidation_save_enabled: p.liquidation_save_enabled,
            last_save_date: p.last_save_date.clone(),
            created_at: p.created_at.timestamp_millis(),
            updated_at: p.updated_at.timestamp_millis(),
        }
    }
}

impl CachedPosition {
    /// Convert back to the Position model
    pub fn to_position(&self) -> Option<Position> {
        use chrono::{TimeZone, Utc};

        let side = match self.side.as_str() {
            "long" => PositionSide::Long,
            "short" => PositionSide::Short,
            _ => return None,
        };

        let status = match self.status.as_str() {
            "open" => PositionStatus::Open,
            "closed" => PositionStatus::Closed,
            "liquidated" => PositionStatus::Liquidated,
            _ => return None,
        };

        Some(Position {
            id: self.id,
            address: self.address.clone(),
            symbol: self.symbol.clone(),
            side,
            size: self.size.parse().ok()?,
            avg_entry_price: self.avg_entry_price.parse().ok()?,
            margin: self.margin.parse().ok()?,
            leverage: self.leverage.parse().ok()?,
            realized_pnl: self.realized_pnl.parse().ok()?,
            liquidation_price: self.liquidation_price.parse().ok()?,
            status,
            liquidation_save_enabled: self.liquidation_save_enabled,
            last_save_date: self.last_save_date.clone(),
            created_at: Utc.timestamp_millis_opt(self.created_at).single()?,
            updated_at: Utc.timestamp_millis_opt(self.updated_at).single()?,
        })
    }
}

/// Position Cache service
pub struct PositionCache {
    redis: Arc<RedisClient>,
}

impl PositionCache {
    /// Create a new position cache
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    /// Cache a position
    pub async fn set_position(&self, position: &Position) -> Result<(), redis::RedisError> {
        let cached = CachedPosition::from(position);
        let json = serde_json::to_string(&cached)
            .map_err(|e| redis::RedisError::from((redis::ErrorKind::IoError, "Serialization error", e.to_string())))?;

        let key = CacheKey::position(&position.id.to_string());
        self.redis.set_ex(&key, &json, ttl::POSITIONS).await?;

        let side_str = match position.side {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        };
        let key = CacheKey::position_by_key(&position.address, &position.symbol, side_str);
        self.redis.set_ex(&key, &json, ttl::POSITIONS).await?;

        let user_positions_key = CacheKey::user_positions(&position.address);
        self.redis.hset(&user_positions_key, &position.id.to_string(), &json).await?;
        self.redis.expire(&user_positions_key, ttl::POSITIONS).await?;

        tracing::debug!("Cached position {} for {}", position.id, position.address);
        Ok(())
    }

    /// Get position by ID from cache
    pub async fn get_position(&self, position_id: Uuid) -> Result<Option<Position>, redis::RedisError> {
        let key = CacheKey::position(&position_id.to_string());
        let json: Option<String> = self.redis.get(&key).await?;

        if let Some(json) = json {
            if let Ok(cached) = serde_json::from_str::<CachedPosition>(&json) {
                return Ok(cached.to_position());
            }
        }
        Ok(None)
    }

    /// Get the open position for an address/symbol/side from cache
    pub async fn get_position_by_key(
        &self,
        address: &str,
        symbol: &str,
        side: PositionSide,
    ) -> Result<Option<Position>, redis::RedisError> {
        let side_str = match side {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        };
        let key = CacheKey::position_by_key(address, symbol, side_str);
        let json: Option<String> = self.redis.get(&key).await?;

        if let Some(json) = json {
            if let Ok(cached) = serde_json::from_str::<CachedPosition>(&json) {
                if let Some(position) = cached.to_position() {
                    if position.status == PositionStatus::Open {
                        return Ok(Some(position));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Get all open positions for an address from cache
    pub async fn get_user_positions(&self, address: &str) -> Result<Vec<Position>, redis::RedisError> {
        let key = CacheKey::user_positions(address);
        let all_positions: std::collections::HashMap<String, String> = self.redis.hgetall(&key).await?;

        let mut positions = Vec::new();
        for (_id, json) in all_positions {
            if let Ok(cached) = serde_json::from_str::<CachedPosition>(&json) {
                if let Some(position) = cached.to_position() {
                    if position.status == PositionStatus::Open {
                        positions.push(position);
                    }
                }
            }
        }

        Ok(positions)
    }

    /// Remove a position from cache
    pub async fn remove_position(&self, position: &Position) -> Result<(), redis::RedisError> {
        let key = CacheKey::position(&position.id.to_string());
        self.redis.del(&key).await?;

        let side_str = match position.side {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        };
        let key = CacheKey::position_by_key(&position.address, &position.symbol, side_str);
        self.redis.del(&key).await?;

        let user_positions_key = CacheKey::user_positions(&position.address);
        self.redis.hdel(&user_positions_key, &position.id.to_string()).await?;

        tracing::debug!("Removed position {} from cache", position.id);
        Ok(())
    }

    /// Invalidate all cached positions for an address
    pub async fn invalidate_user_positions(&self, address: &str) -> Result<(), redis::RedisError> {
        let key = CacheKey::user_positions(address);
        self.redis.del(&key).await?;
        tracing::debug!("Invalidated position cache for {}", address);
        Ok(())
    }

    /// Check if Redis is available
    pub async fn is_available(&self) -> bool {
        self.redis.is_available().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cached_position_round_trips() {
        let position = Position {
            id: Uuid::new_v4(),
            address: "0x123".to_string(),
            symbol: "AAPL-PERP".to_string(),
            side: PositionSide::Long,
            size: dec!(1.00),
            avg_entry_price: dec!(200.50),
            margin: dec!(20.05),
            leverage: dec!(10.00),
            realized_pnl: dec!(0),
            liquidation_price: dec!(189.9473684210526315789473684),
            status: PositionStatus::Open,
            liquidation_save_enabled: false,
            last_save_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let cached = CachedPosition::from(&position);
        let json = serde_json::to_string(&cached).unwrap();
        let restored: CachedPosition = serde_json::from_str(&json).unwrap();
        let restored_position = restored.to_position().unwrap();

        assert_eq!(position.id, restored_position.id);
        assert_eq!(position.symbol, restored_position.symbol);
        assert_eq!(position.side, restored_position.side);
        assert_eq!(position.liquidation_price, restored_position.liquidation_price);
    }
}
