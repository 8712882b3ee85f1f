//! Parses the channel strings clients send in `subscribe`/`unsubscribe` messages into the
//! canonical pub/sub topic format (`price:SYM`, `orderbook:SYM`, `trades:SYM`, `candles:SYM:INT`,
//! `user:ADDR`) used by both `PubSubHub` and `cache::keys::CacheKey`.

use crate::models::candle::CandleInterval;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Price(String),
    Orderbook(String),
    Trades(String),
    Candles(String, CandleInterval),
    User(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelParseError {
    #[error("unknown channel kind: {0}")]
    UnknownKind(String),
    #[error("malformed channel: {0}")]
    Malformed(String),
}

impl Channel {
    pub fn parse(raw: &str) -> Result<Self, ChannelParseError> {
        let mut parts = raw.splitn(3, ':');
        let kind = parts.next().ok_or_else(|| ChannelParseError::Malformed(raw.to_string()))?;
        match kind {
            "price" => Ok(Channel::Price(require_symbol(&mut parts, raw)?)),
            "orderbook" => Ok(Channel::Orderbook(require_symbol(&mut parts, raw)?)),
            "trades" => Ok(Channel::Trades(require_symbol(&mut parts, raw)?)),
            "candles" => {
                let symbol = require_symbol(&mut parts, raw)?;
                let interval_str = parts.next().ok_or_else(|| ChannelParseError::Malformed(raw.to_string()))?;
                let interval = CandleInterval::parse(interval_str).ok_or_else(|| ChannelParseError::Malformed(raw.to_string()))?;
                Ok(Channel::Candles(symbol, interval))
            }
            "user" => Ok(Channel::User(require_symbol(&mut parts, raw)?)),
            other => Err(ChannelParseError::UnknownKind(other.to_string())),
        }
    }

    /// The exact string `PubSubHub`/`CacheKey` keys this channel on.
    pub fn topic(&self) -> String {
        match self {
            Channel::Price(s) => format!("price:{s}"),
            Channel::Orderbook(s) => format!("orderbook:{s}"),
            Channel::Trades(s) => format!("trades:{s}"),
            Channel::Candles(s, i) => format!("candles:{s}:{}", i.as_str()),
            Channel::User(addr) => format!("user:{addr}"),
        }
    }

    /// `user:ADDR` requires the connection's verified identity to match `addr`; every other
    /// topic is public per spec §4.6.
    pub fn requires_auth_for(&self) -> Option<&str> {
        match self {
            Channel::User(addr) => Some(addr),
            _ => None,
        }
    }
}

fn require_symbol(parts: &mut std::str::SplitN<'_, char>, raw: &str) -> Result<String, ChannelParseError> {
    parts.next().map(|s| s.to_string()).filter(|s| !s.is_empty()).ok_or_else(|| ChannelParseError::Malformed(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_channel_kind() {
        assert_eq!(Channel::parse("price:AAPL-PERP").unwrap(), Channel::Price("AAPL-PERP".into()));
        assert_eq!(Channel::parse("orderbook:AAPL-PERP").unwrap(), Channel::Orderbook("AAPL-PERP".into()));
        assert_eq!(Channel::parse("trades:AAPL-PERP").unwrap(), Channel::Trades("AAPL-PERP".into()));
        assert_eq!(Channel::parse("candles:AAPL-PERP:1m").unwrap(), Channel::Candles("AAPL-PERP".into(), CandleInterval::OneMinute));
        assert_eq!(Channel::parse("user:0xabc").unwrap(), Channel::User("0xabc".into()));
    }

    #[test]
    fn rejects_unknown_kind_and_malformed_channels() {
        assert!(matches!(Channel::parse("funding:AAPL-PERP"), Err(ChannelParseError::UnknownKind(_))));
        assert!(matches!(Channel::parse("price:"), Err(ChannelParseError::Malformed(_))));
        assert!(matches!(Channel::parse("candles:AAPL-PERP"), Err(ChannelParseError::Malformed(_))));
    }

    #[test]
    fn only_user_channel_requires_auth() {
        assert_eq!(Channel::parse("user:0xabc").unwrap().requires_auth_for(), Some("0xabc"));
        assert_eq!(Channel::parse("price:AAPL-PERP").unwrap().requires_auth_for(), None);
    }
}
