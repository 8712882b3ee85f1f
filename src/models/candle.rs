use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "candle_interval", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    #[sqlx(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    #[sqlx(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    #[sqlx(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    #[sqlx(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    #[sqlx(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    #[sqlx(rename = "1d")]
    OneDay,
}

impl CandleInterval {
    pub const ALL: [CandleInterval; 6] = [
        CandleInterval::OneMinute,
        CandleInterval::FiveMinutes,
        CandleInterval::FifteenMinutes,
        CandleInterval::OneHour,
        CandleInterval::FourHours,
        CandleInterval::OneDay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CandleInterval::OneMinute => "1m",
            CandleInterval::FiveMinutes => "5m",
            CandleInterval::FifteenMinutes => "15m",
            CandleInterval::OneHour => "1h",
            CandleInterval::FourHours => "4h",
            CandleInterval::OneDay => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.as_str() == s)
    }

    pub fn seconds(&self) -> i64 {
        match self {
            CandleInterval::OneMinute => 60,
            CandleInterval::FiveMinutes => 5 * 60,
            CandleInterval::FifteenMinutes => 15 * 60,
            CandleInterval::OneHour => 60 * 60,
            CandleInterval::FourHours => 4 * 60 * 60,
            CandleInterval::OneDay => 24 * 60 * 60,
        }
    }

    /// Floors a timestamp onto this interval's bucket boundary.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.seconds();
        let epoch = ts.timestamp();
        let floored = epoch - epoch.rem_euclid(secs);
        DateTime::from_timestamp(floored, 0).unwrap_or(ts)
    }
}

/// One OHLCV bucket. `(market_symbol, interval, bucket_start)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Candle {
    pub market_symbol: String,
    pub interval: CandleInterval,
    pub bucket_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trades: i64,
    pub is_closed: bool,
}

impl Candle {
    pub fn open_at(symbol: impl Into<String>, interval: CandleInterval, bucket_start: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            market_symbol: symbol.into(),
            interval,
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            trades: 0,
            is_closed: false,
        }
    }

    pub fn apply_trade(&mut self, price: Decimal, quantity: Decimal) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += quantity;
        self.trades += 1;
    }

    /// The continuity invariant: the next bucket for this (symbol, interval) must open
    /// at this candle's close.
    pub fn next_open(&self) -> Decimal {
        self.close
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleResponse {
    pub interval: String,
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trades: i64,
    pub is_closed: bool,
}

impl From<Candle> for CandleResponse {
    fn from(c: Candle) -> Self {
        Self {
            interval: c.interval.as_str().to_string(),
            open_time: c.bucket_start.timestamp_millis(),
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            trades: c.trades,
            is_closed: c.is_closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn bucket_start_floors_to_interval() {
        let ts = DateTime::from_timestamp(3_723, 0).unwrap(); // 1h 2m 3s
        assert_eq!(CandleInterval::OneMinute.bucket_start(ts).timestamp(), 3_720);
        assert_eq!(CandleInterval::OneHour.bucket_start(ts).timestamp(), 3_600);
    }

    #[test]
    fn continuity_invariant_chains_close_to_open() {
        let t0 = DateTime::from_timestamp(0, 0).unwrap();
        let mut c1 = Candle::open_at("AAPL-PERP", CandleInterval::OneMinute, t0, dec!(200));
        c1.apply_trade(dec!(201), dec!(1));
        let c2 = Candle::open_at("AAPL-PERP", CandleInterval::OneMinute, t0 + chrono::Duration::minutes(1), c1.next_open());
        assert_eq!(c2.open, c1.close);
    }

    #[test]
    fn parse_round_trips_all_intervals() {
        for i in CandleInterval::ALL {
            assert_eq!(CandleInterval::parse(i.as_str()), Some(i));
        }
        assert_eq!(CandleInterval::parse("1w"), None);
    }
}
