//! Maintains live candles per `(market, interval)` from the trade stream, with 1m as the
//! authoritative source and 5m/15m/1h/4h/1d rolled up from it. Seeds history with a bounded
//! random walk on startup when too few 1m candles exist.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::models::{Candle, CandleInterval};

const HISTORY_SEED_THRESHOLD: usize = 200;
/// Per-tick bound: 0.05% of previous price.
const TICK_BOUND_BPS: i64 = 5;
/// Per-candle range bound: 0.15% of open.
const RANGE_BOUND_BPS: i64 = 15;

#[derive(Debug, Clone)]
pub struct CandleUpdate {
    pub symbol: String,
    pub candle: Candle,
}

struct SeriesKey {
    symbol: String,
    interval: CandleInterval,
}

/// One symbol's live candle state across all supported intervals, plus the closed history
/// needed to aggregate higher intervals and assert continuity.
struct MarketSeries {
    live: HashMap<CandleInterval, Candle>,
    closed: HashMap<CandleInterval, Vec<Candle>>,
}

impl MarketSeries {
    fn new() -> Self {
        Self {
            live: HashMap::new(),
            closed: HashMap::new(),
        }
    }
}

pub struct CandleAggregator {
    series: RwLock<HashMap<String, MarketSeries>>,
    candle_tx: broadcast::Sender<CandleUpdate>,
}

impl CandleAggregator {
    pub fn new() -> Arc<Self> {
        let (candle_tx, _) = broadcast::channel(4096);
        Arc::new(Self {
            series: RwLock::new(HashMap::new()),
            candle_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CandleUpdate> {
        self.candle_tx.subscribe()
    }

    pub fn get_recent(&self, symbol: &str, interval: CandleInterval, limit: usize) -> Vec<Candle> {
        let guard = self.series.read();
        let Some(series) = guard.get(symbol) else {
            return Vec::new();
        };
        let mut out: Vec<Candle> = series.closed.get(&interval).cloned().unwrap_or_default();
        if let Some(live) = series.live.get(&interval) {
            out.push(live.clone());
        }
        let len = out.len();
        out.split_off(len.saturating_sub(limit))
    }

    /// Authoritative candle update path: one trade rolls every supported interval's bucket.
    pub fn on_trade(&self, symbol: &str, price: Decimal, quantity: Decimal, ts: chrono::DateTime<chrono::Utc>) {
        let mut guard = self.series.write();
        let series = guard.entry(symbol.to_string()).or_insert_with(MarketSeries::new);

        for interval in CandleInterval::ALL {
            let bucket_start = interval.bucket_start(ts);
            let key = SeriesKey { symbol: symbol.to_string(), interval };
            Self::roll_bucket(series, &key, bucket_start, price, quantity, &self.candle_tx);
        }
    }

    fn roll_bucket(
        series: &mut MarketSeries,
        key: &SeriesKey,
        bucket_start: chrono::DateTime<chrono::Utc>,
        price: Decimal,
        quantity: Decimal,
        candle_tx: &broadcast::Sender<CandleUpdate>,
    ) {
        let previous_close = series.closed.get(&key.interval).and_then(|v| v.last()).map(|c| c.close);

        match series.live.get_mut(&key.interval) {
            Some(live) if live.bucket_start == bucket_start => {
                live.apply_trade(price, quantity);
                let _ = candle_tx.send(CandleUpdate { symbol: key.symbol.clone(), candle: live.clone() });
            }
            Some(live) => {
                // Bucket boundary crossed: close the old candle, open the next at its close.
                live.is_closed = true;
                let closed = live.clone();
                let _ = candle_tx.send(CandleUpdate { symbol: key.symbol.clone(), candle: closed.clone() });
                series.closed.entry(key.interval).or_default().push(closed.clone());

                let mut next = Candle::open_at(key.symbol.clone(), key.interval, bucket_start, closed.close);
                if price != closed.close {
                    next.high = next.high.max(price);
                    next.low = next.low.min(price);
                }
                next.apply_trade(price, quantity);
                let _ = candle_tx.send(CandleUpdate { symbol: key.symbol.clone(), candle: next.clone() });
                series.live.insert(key.interval, next);
            }
            None => {
                let seed_open = previous_close.unwrap_or(price);
                let mut candle = Candle::open_at(key.symbol.clone(), key.interval, bucket_start, seed_open);
                if price != seed_open {
                    candle.high = candle.high.max(price);
                    candle.low = candle.low.min(price);
                }
                candle.apply_trade(price, quantity);
                let _ = candle_tx.send(CandleUpdate { symbol: key.symbol.clone(), candle: candle.clone() });
                series.live.insert(key.interval, candle);
            }
        }
    }

    /// Flat-fills a bucket with zero volume when no trade lands in it, keeping the series
    /// gap-free. Called by a periodic ticker, not the trade path.
    pub fn flat_fill(&self, symbol: &str, interval: CandleInterval, bucket_start: chrono::DateTime<chrono::Utc>) {
        let mut guard = self.series.write();
        let series = guard.entry(symbol.to_string()).or_insert_with(MarketSeries::new);
        if series.live.contains_key(&interval) {
            return;
        }
        let previous_close = series
            .closed
            .get(&interval)
            .and_then(|v| v.last())
            .map(|c| c.close)
            .or_else(|| series.live.values().next().map(|c| c.close));
        if let Some(close) = previous_close {
            series.live.insert(interval, Candle::open_at(symbol, interval, bucket_start, close));
        }
    }

    /// Restores 1m history from rows read back from the store at startup, then aggregates the
    /// higher intervals from it (spec's restart recovery policy: "resumes candles from the last
    /// persisted bucket"). `one_minute` must be ordered oldest first.
    pub fn restore_from_store(&self, symbol: &str, one_minute: Vec<Candle>) {
        if one_minute.is_empty() {
            return;
        }
        let mut guard = self.series.write();
        let series = guard.entry(symbol.to_string()).or_insert_with(MarketSeries::new);
        series.closed.insert(CandleInterval::OneMinute, one_minute.clone());
        for interval in CandleInterval::ALL {
            if interval == CandleInterval::OneMinute {
                continue;
            }
            let aggregated = aggregate_from_one_minute(&one_minute, interval, symbol);
            series.closed.insert(interval, aggregated);
        }
    }

    /// Seeds 1m history with a bounded random walk anchored to `anchor_price`, then aggregates
    /// the higher intervals deterministically so continuity holds across the whole series.
    pub fn seed_history(&self, symbol: &str, anchor_price: Decimal, now: chrono::DateTime<chrono::Utc>) {
        let mut guard = self.series.write();
        let series = guard.entry(symbol.to_string()).or_insert_with(MarketSeries::new);
        if series.closed.get(&CandleInterval::OneMinute).map(|v| v.len()).unwrap_or(0) >= HISTORY_SEED_THRESHOLD {
            return;
        }

        let mut rng = rand::thread_rng();
        let mut price = anchor_price;
        let mut candles = Vec::with_capacity(HISTORY_SEED_THRESHOLD);
        let start = CandleInterval::OneMinute.bucket_start(now) - chrono::Duration::minutes(HISTORY_SEED_THRESHOLD as i64);

        for i in 0..HISTORY_SEED_THRESHOLD {
            let bucket_start = start + chrono::Duration::minutes(i as i64);
            let open = price;
            let mut high = open;
            let mut low = open;

            let ticks = rng.gen_range(1..=6);
            for _ in 0..ticks {
                let bound = open * Decimal::new(TICK_BOUND_BPS, 4);
                let change = bound * Decimal::new(rng.gen_range(-100..=100), 2);
                price = (price + change).max(Decimal::new(1, 2));
                let range_bound = open * Decimal::new(RANGE_BOUND_BPS, 4);
                price = price.clamp(open - range_bound, open + range_bound);
                high = high.max(price);
                low = low.min(price);
            }

            candles.push(Candle {
                market_symbol: symbol.to_string(),
                interval: CandleInterval::OneMinute,
                bucket_start,
                open,
                high,
                low,
                close: price,
                volume: Decimal::new(rng.gen_range(1..=500), 2),
                trades: ticks as i64,
                is_closed: true,
            });
        }

        series.closed.insert(CandleInterval::OneMinute, candles.clone());

        for interval in CandleInterval::ALL {
            if interval == CandleInterval::OneMinute {
                continue;
            }
            let aggregated = aggregate_from_one_minute(&candles, interval, symbol);
            series.closed.insert(interval, aggregated);
        }
    }
}

/// Deterministically rolls a 1m series up into a coarser interval: open=first, close=last,
/// high=max, low=min, volume=sum.
fn aggregate_from_one_minute(one_minute: &[Candle], interval: CandleInterval, symbol: &str) -> Vec<Candle> {
    let mut buckets: HashMap<chrono::DateTime<chrono::Utc>, Vec<&Candle>> = HashMap::new();
    for c in one_minute {
        buckets.entry(interval.bucket_start(c.bucket_start)).or_default().push(c);
    }
    let mut keys: Vec<_> = buckets.keys().cloned().collect();
    keys.sort();

    keys.into_iter()
        .map(|bucket_start| {
            let members = &buckets[&bucket_start];
            Candle {
                market_symbol: symbol.to_string(),
                interval,
                bucket_start,
                open: members.first().unwrap().open,
                close: members.last().unwrap().close,
                high: members.iter().map(|c| c.high).fold(Decimal::MIN, Decimal::max),
                low: members.iter().map(|c| c.low).fold(Decimal::MAX, Decimal::min),
                volume: members.iter().map(|c| c.volume).sum(),
                trades: members.iter().map(|c| c.trades).sum(),
                is_closed: true,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(secs: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn s6_bucket_crossing_opens_at_previous_close() {
        let agg = CandleAggregator::new();
        agg.on_trade("AAPL-PERP", dec!(210.25), dec!(1), t(59));
        agg.on_trade("AAPL-PERP", dec!(210.80), dec!(1), t(61));

        let candles = agg.get_recent("AAPL-PERP", CandleInterval::OneMinute, 10);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, dec!(210.25));
        assert_eq!(candles[1].open, dec!(210.25));
        assert_eq!(candles[1].high, dec!(210.80));
        assert_eq!(candles[1].low, dec!(210.25));
        assert_eq!(candles[1].close, dec!(210.80));
    }

    #[test]
    fn candle_ohlc_invariant_holds_within_a_bucket() {
        let agg = CandleAggregator::new();
        agg.on_trade("AAPL-PERP", dec!(200), dec!(1), t(0));
        agg.on_trade("AAPL-PERP", dec!(195), dec!(1), t(5));
        agg.on_trade("AAPL-PERP", dec!(205), dec!(1), t(10));

        let candles = agg.get_recent("AAPL-PERP", CandleInterval::OneMinute, 1);
        let c = &candles[0];
        assert!(c.low <= c.open.min(c.close));
        assert!(c.high >= c.open.max(c.close));
    }

    #[test]
    fn history_seed_produces_continuous_1m_series() {
        let agg = CandleAggregator::new();
        agg.seed_history("AAPL-PERP", dec!(200), t(0));
        let candles = agg.get_recent("AAPL-PERP", CandleInterval::OneMinute, HISTORY_SEED_THRESHOLD);
        for w in candles.windows(2) {
            assert_eq!(w[1].open, w[0].close);
        }
    }

    #[test]
    fn higher_interval_aggregation_matches_constituent_1m_candles() {
        let agg = CandleAggregator::new();
        agg.seed_history("AAPL-PERP", dec!(200), t(0));
        let ones = agg.get_recent("AAPL-PERP", CandleInterval::OneMinute, HISTORY_SEED_THRESHOLD);
        let fives = agg.get_recent("AAPL-PERP", CandleInterval::FiveMinutes, 100);
        let first_bucket: Vec<_> = ones.iter().filter(|c| CandleInterval::FiveMinutes.bucket_start(c.bucket_start) == fives[0].bucket_start).collect();
        assert_eq!(fives[0].open, first_bucket.first().unwrap().open);
        assert_eq!(fives[0].close, first_bucket.last().unwrap().close);
    }
}
