//! Redis Pub/Sub Module
//!
//! Broadcasts price, orderbook, trade, candle, and per-user updates over Redis channels
//! so a WebSocket gateway process can fan them out without holding a direct dependency on
//! the matching engine. Channel names match the WebSocket topic format exactly
//! (`price:SYM`, `orderbook:SYM`, `trades:SYM`, `candles:SYM:INT`, `user:ADDR`), so a
//! consumer subscribing over Redis and one subscribing directly to the in-process
//! broadcast channels see the same name.

use redis::RedisError;
use serde::Serialize;
use std::sync::Arc;

use super::keys::CacheKey;
use super::redis_client::RedisClient;

/// Pub/Sub publisher for broadcasting messages
pub struct Publisher {
    redis: Arc<RedisClient>,
}

impl Publisher {
    /// Create new publisher
    pub fn new(redis: Arc<RedisClient>) -> Self {
        Self { redis }
    }

    /// Publish a message to a channel
    pub async fn publish(&self, channel: &str, message: &str) -> Result<i32, RedisError> {
        self.redis.publish(channel, message.to_string()).await
    }

    /// Publish JSON-serializable message
    pub async fn publish_json<T: Serialize>(
        &self,
        channel: &str,
        message: &T,
    ) -> Result<i32, RedisError> {
        let json = serde_json::to_string(message).map_err(|e| {
            RedisError::from((
                redis::ErrorKind::IoError,
                "Serialization error",
                e.to_string(),
            ))
        })?;
        self.publish(channel, &json).await
    }

    // ==================== Market Data Channels ====================

    /// Publish a price update to `price:SYM`
    pub async fn publish_price<T: Serialize>(&self, symbol: &str, update: &T) -> Result<i32, RedisError> {
        let channel = CacheKey::channel_price(symbol);
        self.publish_json(&channel, update).await
    }

    /// Publish an orderbook level update to `orderbook:SYM`
    pub async fn publish_orderbook<T: Serialize>(
        &self,
        symbol: &str,
        orderbook: &T,
    ) -> Result<i32, RedisError> {
        let channel = CacheKey::channel_orderbook(symbol);
        self.publish_json(&channel, orderbook).await
    }

    /// Publish a trade execution to `trades:SYM`
    pub async fn publish_trade<T: Serialize>(&self, symbol: &str, trade: &T) -> Result<i32, RedisError> {
        let channel = CacheKey::channel_trades(symbol);
        self.publish_json(&channel, trade).await
    }

    /// Publish a candle update to `candles:SYM:INT`
    pub async fn publish_candle<T: Serialize>(
        &self,
        symbol: &str,
        interval: &str,
        candle: &T,
    ) -> Result<i32, RedisError> {
        let channel = CacheKey::channel_candles(symbol, interval);
        self.publish_json(&channel, candle).await
    }

    // ==================== User Data Channel ====================

    /// Publish an order/position/balance update to `user:ADDR`
    pub async fn publish_user<T: Serialize>(&self, address: &str, update: &T) -> Result<i32, RedisError> {
        let channel = CacheKey::channel_user(address);
        self.publish_json(&channel, update).await
    }
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Buffer size for broadcast channel
    pub buffer_size: usize,
    /// Whether to auto-reconnect on connection loss
    pub auto_reconnect: bool,
    /// Reconnect delay in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            auto_reconnect: true,
            reconnect_delay_ms: 1000,
        }
    }
}

/// Subscription handle for receiving messages
/// Note: Full subscription implementation requires redis pub/sub client
/// which is more complex. This is a placeholder for the interface.
#[derive(Debug)]
pub struct Subscription {
    pub channel: String,
}

/// Pub/Sub subscriber (placeholder implementation)
/// Full implementation requires dedicated pub/sub connection
pub struct Subscriber {
    redis_url: String,
    config: SubscriberConfig,
}

impl Subscriber {
    /// Create new subscriber
    pub fn new(redis_url: &str, config: SubscriberConfig) -> Self {
        Self {
            redis_url: redis_url.to_string(),
            config,
        }
    }

    /// Get the Redis URL
    pub fn redis_url(&self) -> &str {
        &self.redis_url
    }

    /// Get the config
    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// Subscribe to a channel (returns channel name)
    /// Full implementation would spawn a task to listen for messages
    pub fn subscribe(&self, channel: &str) -> Subscription {
        tracing::debug!("Creating subscription for channel: {}", channel);
        Subscription {
            channel: channel.to_string(),
        }
    }

    /// Get the set of channels a symbol's market-data subscribers need
    pub fn get_market_channels(symbol: &str) -> Vec<String> {
        vec![
            CacheKey::channel_price(symbol),
            CacheKey::channel_orderbook(symbol),
            CacheKey::channel_trades(symbol),
        ]
    }

    /// Get the candle channel for a symbol/interval pair
    pub fn get_candle_channel(symbol: &str, interval: &str) -> String {
        CacheKey::channel_candles(symbol, interval)
    }

    /// Get the per-user channel
    pub fn get_user_channel(address: &str) -> String {
        CacheKey::channel_user(address)
    }
}

/// Convenience struct for pub/sub operations
pub struct PubSubManager {
    publisher: Publisher,
    redis_url: String,
    subscriber_config: SubscriberConfig,
}

impl PubSubManager {
    /// Create new pub/sub manager
    pub fn new(redis: Arc<RedisClient>, redis_url: &str) -> Self {
        Self {
            publisher: Publisher::new(redis),
            redis_url: redis_url.to_string(),
            subscriber_config: SubscriberConfig::default(),
        }
    }

    /// Create with custom subscriber config
    pub fn with_config(
        redis: Arc<RedisClient>,
        redis_url: &str,
        subscriber_config: SubscriberConfig,
    ) -> Self {
        Self {
            publisher: Publisher::new(redis),
            redis_url: redis_url.to_string(),
            subscriber_config,
        }
    }

    /// Get publisher reference
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Create a new subscriber
    pub fn create_subscriber(&self) -> Subscriber {
        Subscriber::new(&self.redis_url, self.subscriber_config.clone())
    }

    /// Get Redis URL
    pub fn redis_url(&self) -> &str {
        &self.redis_url
    }

    // ==================== Convenience Methods for Channels ====================

    pub fn price_channel(&self, symbol: &str) -> String {
        CacheKey::channel_price(symbol)
    }

    pub fn orderbook_channel(&self, symbol: &str) -> String {
        CacheKey::channel_orderbook(symbol)
    }

    pub fn trades_channel(&self, symbol: &str) -> String {
        CacheKey::channel_trades(symbol)
    }

    pub fn candle_channel(&self, symbol: &str, interval: &str) -> String {
        CacheKey::channel_candles(symbol, interval)
    }

    pub fn user_channel(&self, address: &str) -> String {
        CacheKey::channel_user(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_config_default() {
        let config = SubscriberConfig::default();
        assert_eq!(config.buffer_size, 1024);
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_delay_ms, 1000);
    }

    #[test]
    fn test_channel_names_match_ws_topic_format() {
        assert_eq!(Subscriber::get_candle_channel("AAPL-PERP", "1m"), "candles:AAPL-PERP:1m");
        assert_eq!(Subscriber::get_user_channel("0xABC"), "user:0xabc");
    }
}
