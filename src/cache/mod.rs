//! Redis-backed caching and pub/sub. Every cache here is a best-effort accelerator over a
//! source of truth that lives elsewhere (Market Registry, Position Keeper, matching engine
//! order books); a cache miss or a down Redis never blocks a request, it just falls back to
//! the in-process source.

pub mod keys;
pub mod orderbook_cache;
pub mod position_cache;
pub mod price_cache;
pub mod pubsub;
pub mod redis_client;

use std::sync::Arc;

use orderbook_cache::OrderbookCache;
use position_cache::PositionCache;
use price_cache::PriceCache;
use pubsub::PubSubManager;
use redis_client::{RedisClient, RedisConfig};

/// Cache manager configuration, loaded from the environment (spec's `redis_url`).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self {
            redis_url,
            timeout_ms: 5000,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

impl From<&CacheConfig> for RedisConfig {
    fn from(c: &CacheConfig) -> Self {
        RedisConfig {
            url: c.redis_url.clone(),
            timeout_ms: c.timeout_ms,
            max_retries: c.max_retries,
            retry_delay_ms: c.retry_delay_ms,
        }
    }
}

/// Owns the Redis connection and every cache/pub-sub facade built on top of it. Constructed
/// once at startup and shared via `Arc` across handlers and background services.
pub struct CacheManager {
    config: CacheConfig,
    redis: Option<Arc<RedisClient>>,
    price: Option<PriceCache>,
    orderbook: Option<OrderbookCache>,
    position: Option<PositionCache>,
    pubsub: Option<PubSubManager>,
}

impl CacheManager {
    /// Connects to Redis. Connection failure is not fatal: the manager comes up with every
    /// cache disabled and `is_available()` returning `false`, and the process runs without
    /// the acceleration Redis would have provided.
    pub async fn new(config: CacheConfig) -> anyhow::Result<Self> {
        match RedisClient::new(RedisConfig::from(&config)).await {
            Ok(client) => {
                let redis = Arc::new(client);
                Ok(Self {
                    price: Some(PriceCache::new(redis.clone())),
                    orderbook: Some(OrderbookCache::new(redis.clone())),
                    position: Some(PositionCache::new(redis.clone())),
                    pubsub: Some(PubSubManager::new(redis.clone(), &config.redis_url)),
                    redis: Some(redis),
                    config,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable at startup, caching disabled");
                Ok(Self {
                    config,
                    redis: None,
                    price: None,
                    orderbook: None,
                    position: None,
                    pubsub: None,
                })
            }
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn is_available(&self) -> bool {
        match &self.redis {
            Some(redis) => redis.is_available().await,
            None => false,
        }
    }

    pub fn price(&self) -> Option<&PriceCache> {
        self.price.as_ref()
    }

    pub fn orderbook(&self) -> Option<&OrderbookCache> {
        self.orderbook.as_ref()
    }

    pub fn position(&self) -> Option<&PositionCache> {
        self.position.as_ref()
    }

    pub fn pubsub_opt(&self) -> Option<&PubSubManager> {
        self.pubsub.as_ref()
    }
}
