//! Fans engine-internal events out to topic-keyed broadcast channels so the WebSocket gateway
//! never has to know about `MatchingEngine`, `CandleAggregator`, or `OracleIngestor` directly.
//! Topic names match `cache::keys::CacheKey`'s channel builders exactly (`price:SYM`,
//! `orderbook:SYM`, `trades:SYM`, `candles:SYM:INT`, `user:ADDR`) so a Redis-backed consumer and
//! a direct in-process subscriber observe the same name. Publish is fire-and-forget per spec
//! §5: a send with no receivers is not an error, and a lagging receiver is the subscriber's
//! problem to detect on its own `recv()` call, not this hub's.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::cache::keys::CacheKey;
use crate::services::candle_aggregator::CandleAggregator;
use crate::services::matching::MatchingEngine;
use crate::services::oracle_ingestor::OracleIngestor;

/// Topic channel capacity. A subscriber more than this many messages behind is considered a
/// slow consumer; its next `recv()` returns `Lagged` and the WebSocket handler disconnects it.
const TOPIC_CAPACITY: usize = 1024;

pub struct PubSubHub {
    topics: DashMap<String, broadcast::Sender<Arc<str>>>,
}

impl PubSubHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { topics: DashMap::new() })
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Arc<str>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Arc<str>> {
        self.sender(topic).subscribe()
    }

    pub fn publish_json<T: Serialize>(&self, topic: &str, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(json) => {
                // No receivers is the common case for a topic nobody has subscribed to yet.
                let _ = self.sender(topic).send(Arc::from(json.as_str()));
            }
            Err(e) => warn!(%topic, error = %e, "failed to serialize pub/sub payload"),
        }
    }

    pub fn publish_user_event<T: Serialize>(&self, address: &str, payload: &T) {
        self.publish_json(&CacheKey::channel_user(address), payload);
    }

    /// Verbatim relay for an externally-authored event (e.g. an xp/reward-hook payload). The
    /// core never constructs these; it only forwards whatever the collaborator handed it.
    pub fn forward_raw_user_event(&self, address: &str, raw_json: &str) {
        let _ = self.sender(&CacheKey::channel_user(address)).send(Arc::from(raw_json));
    }

    /// Spawns the background tasks that translate matching-engine and candle-aggregator
    /// broadcast streams into topic publishes. Call once at startup.
    pub fn spawn_forwarders(self: &Arc<Self>, engine: Arc<MatchingEngine>, candles: Arc<CandleAggregator>, oracle: Arc<OracleIngestor>) {
        self.spawn_trade_forwarder(engine.clone());
        self.spawn_orderbook_forwarder(engine);
        self.spawn_candle_forwarder(candles);
        self.spawn_price_forwarder(oracle);
    }

    fn spawn_trade_forwarder(self: &Arc<Self>, engine: Arc<MatchingEngine>) {
        let hub = self.clone();
        let mut trades = engine.subscribe_trades();
        tokio::spawn(async move {
            loop {
                match trades.recv().await {
                    Ok(trade) => hub.publish_json(&CacheKey::channel_trades(&trade.symbol), &trade),
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "trade forwarder lagged"),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_orderbook_forwarder(self: &Arc<Self>, engine: Arc<MatchingEngine>) {
        let hub = self.clone();
        let mut updates = engine.subscribe_orderbook();
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => hub.publish_json(&CacheKey::channel_orderbook(&update.symbol), &update),
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "orderbook forwarder lagged"),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_candle_forwarder(self: &Arc<Self>, candles: Arc<CandleAggregator>) {
        let hub = self.clone();
        let mut updates = candles.subscribe();
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        let topic = CacheKey::channel_candles(&update.candle.market_symbol, update.candle.interval.as_str());
                        hub.publish_json(&topic, &update.candle);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "candle forwarder lagged"),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_price_forwarder(self: &Arc<Self>, oracle: Arc<OracleIngestor>) {
        let hub = self.clone();
        let mut ticks = oracle.subscribe();
        tokio::spawn(async move {
            loop {
                match ticks.recv().await {
                    Ok(tick) => hub.publish_json(&CacheKey::channel_price(&tick.symbol), &tick),
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "price forwarder lagged"),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_with_no_subscriber_does_not_panic() {
        let hub = PubSubHub::new();
        hub.publish_json("price:AAPL-PERP", &json!({"price": "200.00"}));
    }

    #[tokio::test]
    async fn subscriber_receives_published_payload() {
        let hub = PubSubHub::new();
        let mut rx = hub.subscribe("trades:AAPL-PERP");
        hub.publish_json("trades:AAPL-PERP", &json!({"price": "200.00"}));
        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("200.00"));
    }

    #[tokio::test]
    async fn distinct_topics_are_independent() {
        let hub = PubSubHub::new();
        let mut rx_a = hub.subscribe("user:0xabc");
        let _rx_b = hub.subscribe("user:0xdef");
        hub.publish_user_event("0xabc", &json!({"kind": "balance:updated"}));
        let msg = rx_a.recv().await.unwrap();
        assert!(msg.contains("balance:updated"));
    }

    /// Within one topic, a subscriber observes publishes in the order they were made (spec's
    /// broadcast ordering guarantee — a lagging receiver may drop messages but never reorders them).
    #[tokio::test]
    async fn publishes_to_one_topic_arrive_in_order() {
        let hub = PubSubHub::new();
        let mut rx = hub.subscribe("orderbook:AAPL-PERP");
        for seq in 0..5 {
            hub.publish_json("orderbook:AAPL-PERP", &json!({"seq": seq}));
        }
        for expected in 0..5 {
            let msg = rx.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
            assert_eq!(value["seq"], expected);
        }
    }
}
