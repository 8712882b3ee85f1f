//! Cache Key Module
//!
//! Centralizes the Redis key and Pub/Sub channel naming conventions so cache modules
//! never hand-format strings inline.

/// Namespaced key/channel builders. All methods are free functions grouped under a unit
/// struct so call sites read `CacheKey::orderbook_bids(...)` rather than importing loose
/// functions.
pub struct CacheKey;

impl CacheKey {
    // ==================== Oracle Price ====================

    pub fn oracle_price(symbol: &str) -> String {
        format!("price:oracle:{}", symbol.to_uppercase())
    }

    // ==================== Orderbook ====================

    pub fn orderbook_bids(symbol: &str) -> String {
        format!("orderbook:bids:{}", symbol.to_uppercase())
    }

    pub fn orderbook_asks(symbol: &str) -> String {
        format!("orderbook:asks:{}", symbol.to_uppercase())
    }

    pub fn orderbook_snapshot(symbol: &str) -> String {
        format!("orderbook:snapshot:{}", symbol.to_uppercase())
    }

    // ==================== Positions ====================

    pub fn position(position_id: &str) -> String {
        format!("position:id:{}", position_id)
    }

    pub fn position_by_key(address: &str, symbol: &str, side: &str) -> String {
        format!("position:key:{}:{}:{}", address.to_lowercase(), symbol.to_uppercase(), side)
    }

    pub fn user_positions(address: &str) -> String {
        format!("position:user:{}", address.to_lowercase())
    }

    // ==================== Candles ====================

    pub fn candle_recent(symbol: &str, interval: &str) -> String {
        format!("candle:recent:{}:{}", symbol.to_uppercase(), interval)
    }

    // ==================== Rate limiting / faucet (ambient) ====================

    pub fn rate_limit_ip(ip: &str) -> String {
        format!("ratelimit:ip:{}", ip)
    }

    pub fn rate_limit_address(address: &str) -> String {
        format!("ratelimit:address:{}", address.to_lowercase())
    }

    pub fn faucet_cooldown(address: &str) -> String {
        format!("faucet:cooldown:{}", address.to_lowercase())
    }

    // ==================== Pub/Sub channels ====================
    //
    // These match the topic names published to WebSocket subscribers exactly: a consumer
    // subscribing over Redis pub/sub and one subscribing over the WebSocket gateway observe
    // the same channel name.

    pub fn channel_price(symbol: &str) -> String {
        format!("price:{}", symbol.to_uppercase())
    }

    pub fn channel_orderbook(symbol: &str) -> String {
        format!("orderbook:{}", symbol.to_uppercase())
    }

    pub fn channel_trades(symbol: &str) -> String {
        format!("trades:{}", symbol.to_uppercase())
    }

    pub fn channel_candles(symbol: &str, interval: &str) -> String {
        format!("candles:{}:{}", symbol.to_uppercase(), interval)
    }

    pub fn channel_user(address: &str) -> String {
        format!("user:{}", address.to_lowercase())
    }
}

/// TTLs (seconds) for cached values. Pub/sub channels are not cached and have no TTL.
pub mod ttl {
    pub const PRICE: u64 = 30;
    pub const ORDERBOOK_SNAPSHOT: u64 = 5;
    pub const POSITIONS: u64 = 60;
    pub const RATE_LIMIT: u64 = 60;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_match_spec_topic_format() {
        assert_eq!(CacheKey::channel_price("aapl-perp"), "price:AAPL-PERP");
        assert_eq!(CacheKey::channel_orderbook("aapl-perp"), "orderbook:AAPL-PERP");
        assert_eq!(CacheKey::channel_trades("aapl-perp"), "trades:AAPL-PERP");
        assert_eq!(CacheKey::channel_candles("aapl-perp", "1m"), "candles:AAPL-PERP:1m");
        assert_eq!(CacheKey::channel_user("0xABC"), "user:0xabc");
    }

    #[test]
    fn storage_keys_are_distinct_from_channel_names() {
        assert_ne!(CacheKey::oracle_price("AAPL-PERP"), CacheKey::channel_price("AAPL-PERP"));
    }
}
