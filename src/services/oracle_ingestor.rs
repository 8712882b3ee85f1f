//! Polls an upstream quote source on a fixed interval, updates the Market Registry's cached
//! price, and drives Position Keeper mark-to-market through the matching engine. Upstream
//! failures are never fatal: the last known price is retained and the tick is logged at `warn`.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::services::matching::MatchingEngine;
use crate::services::market_registry::MarketRegistry;

#[derive(Debug, Clone)]
pub struct PriceUpdateEvent {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp_ms: i64,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: Decimal,
}

/// Drives the periodic oracle poll. Owns the HTTP client and the set of symbols to poll.
pub struct OracleIngestor {
    client: reqwest::Client,
    upstream_url: String,
    market_registry: Arc<MarketRegistry>,
    matching_engine: Arc<MatchingEngine>,
    price_tx: broadcast::Sender<PriceUpdateEvent>,
}

impl OracleIngestor {
    pub fn new(upstream_url: String, market_registry: Arc<MarketRegistry>, matching_engine: Arc<MatchingEngine>) -> Arc<Self> {
        let (price_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            client: reqwest::Client::new(),
            upstream_url,
            market_registry,
            matching_engine,
            price_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdateEvent> {
        self.price_tx.subscribe()
    }

    /// Runs the poll loop for the process lifetime. Intended to be spawned as a background task
    /// and aborted on shutdown; never returns under normal operation.
    pub async fn run(self: Arc<Self>, poll_interval: Duration) {
        info!(interval_secs = poll_interval.as_secs(), "oracle ingestor starting");
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            for symbol in self.market_registry.symbols() {
                self.poll_one(&symbol).await;
            }
        }
    }

    async fn poll_one(&self, symbol: &str) {
        match self.fetch_quote(symbol).await {
            Ok(price) => {
                if let Err(e) = self.market_registry.update_oracle_price(symbol, price) {
                    warn!(%symbol, error = %e, "oracle price update rejected by market registry");
                    return;
                }
                self.matching_engine.mark_to_market(symbol, price);
                let event = PriceUpdateEvent {
                    symbol: symbol.to_string(),
                    price,
                    timestamp_ms: chrono::Utc::now().timestamp_millis(),
                };
                let _ = self.price_tx.send(event);
            }
            Err(e) => {
                // Upstream failures are never fatal (spec §7): the last known price is retained,
                // not zeroed, and this never escalates past `warn`.
                warn!(%symbol, error = %e, "oracle fetch failed, retaining last known price");
            }
        }
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Decimal, OracleFetchError> {
        let response = self
            .client
            .get(&self.upstream_url)
            .query(&[("symbol", symbol)])
            .send()
            .await?
            .error_for_status()?
            .json::<QuoteResponse>()
            .await?;
        if response.price <= Decimal::ZERO {
            return Err(OracleFetchError::NonPositivePrice(response.price));
        }
        Ok(response.price)
    }
}

#[derive(Debug, thiserror::Error)]
enum OracleFetchError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned a non-positive price: {0}")]
    NonPositivePrice(Decimal),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketSeed;
    use crate::services::balance_ledger::BalanceLedger;
    use crate::services::position_keeper::PositionKeeper;

    fn seed() -> MarketSeed {
        MarketSeed {
            symbol: "AAPL-PERP".into(),
            tick_size: "0.01".into(),
            lot_size: "0.01".into(),
            min_order_size: "0.01".into(),
            max_order_size: "1000".into(),
            max_leverage: 10,
            initial_margin_rate: "0.10".into(),
            maintenance_margin_rate: "0.05".into(),
            initial_oracle_price: "200.00".into(),
        }
    }

    #[tokio::test]
    async fn failed_fetch_retains_last_known_price() {
        let registry = MarketRegistry::from_seeds(&[seed()]).unwrap();
        let engine = MatchingEngine::new(registry.clone(), BalanceLedger::new(), PositionKeeper::new());
        let ingestor = OracleIngestor::new("http://127.0.0.1:0/unreachable".into(), registry.clone(), engine);

        ingestor.poll_one("AAPL-PERP").await;

        assert_eq!(registry.get("AAPL-PERP").unwrap().oracle_price, rust_decimal::Decimal::new(20000, 2));
    }
}
