use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

/// Bootstrap definition for one market, sourced from `MARKETS` env configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketSeed {
    pub symbol: String,
    pub tick_size: String,
    pub lot_size: String,
    pub min_order_size: String,
    pub max_order_size: String,
    pub max_leverage: i32,
    pub initial_margin_rate: String,
    pub maintenance_margin_rate: String,
    pub initial_oracle_price: String,
}

fn default_markets() -> Vec<MarketSeed> {
    vec![MarketSeed {
        symbol: "AAPL-PERP".into(),
        tick_size: "0.01".into(),
        lot_size: "0.01".into(),
        min_order_size: "0.01".into(),
        max_order_size: "10000".into(),
        max_leverage: 50,
        initial_margin_rate: "0.10".into(),
        maintenance_margin_rate: "0.05".into(),
        initial_oracle_price: "200.00".into(),
    }]
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "AppConfig::default_environment")]
    pub environment: String,
    #[serde(default = "AppConfig::default_port")]
    pub port: u16,
    pub database_url: String,
    #[serde(default = "AppConfig::default_redis_url")]
    pub redis_url: String,
    pub jwt_secret: String,
    #[serde(default = "AppConfig::default_jwt_expiry")]
    pub jwt_expiry_seconds: i64,
    #[serde(default)]
    pub auth_disabled: bool,

    #[serde(default = "default_markets")]
    pub markets: Vec<MarketSeed>,

    #[serde(default = "AppConfig::default_oracle_poll_interval_secs")]
    pub oracle_poll_interval_secs: u64,
    #[serde(default = "AppConfig::default_oracle_upstream_url")]
    pub oracle_upstream_url: String,
    #[serde(default = "AppConfig::default_oracle_drift_bps")]
    pub oracle_max_drift_bps: i64,

    #[serde(default = "AppConfig::default_faucet_amount")]
    pub faucet_amount: String,
    #[serde(default = "AppConfig::default_faucet_cooldown_secs")]
    pub faucet_cooldown_secs: u64,

    #[serde(default = "AppConfig::default_liquidation_sweep_interval_ms")]
    pub liquidation_sweep_interval_ms: u64,

    #[serde(default = "AppConfig::default_metrics_port")]
    pub metrics_port: u16,
}

impl AppConfig {
    fn default_environment() -> String {
        "development".to_string()
    }
    fn default_port() -> u16 {
        8080
    }
    fn default_redis_url() -> String {
        "redis://127.0.0.1:6379".to_string()
    }
    fn default_jwt_expiry() -> i64 {
        86_400
    }
    fn default_oracle_poll_interval_secs() -> u64 {
        15
    }
    fn default_oracle_upstream_url() -> String {
        "https://quotes.internal.example/v1/price".to_string()
    }
    fn default_oracle_drift_bps() -> i64 {
        50
    }
    fn default_faucet_amount() -> String {
        "10000".to_string()
    }
    fn default_faucet_cooldown_secs() -> u64 {
        24 * 60 * 60
    }
    fn default_liquidation_sweep_interval_ms() -> u64 {
        500
    }
    fn default_metrics_port() -> u16 {
        9090
    }

    /// Loads configuration from the environment, with `.env` already applied by the caller.
    pub fn load() -> anyhow::Result<Self> {
        let cfg = ::config::Config::builder()
            .add_source(::config::Environment::default().separator("__"))
            .build()?;
        let app_config: AppConfig = cfg.try_deserialize()?;
        for seed in &app_config.markets {
            Decimal::from_str(&seed.tick_size)?;
            Decimal::from_str(&seed.initial_oracle_price)?;
        }
        Ok(app_config)
    }

    /// Dev-mode bypass: when set, request handlers skip bearer-token verification and trust
    /// the `X-Test-Address` header instead.
    pub fn is_auth_disabled(&self) -> bool {
        self.auth_disabled
    }

    pub fn is_valid_symbol(&self, symbol: &str) -> bool {
        self.markets.iter().any(|m| m.symbol == symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.markets.iter().map(|m| m.symbol.clone()).collect()
    }

    pub fn faucet_amount(&self) -> Decimal {
        Decimal::from_str(&self.faucet_amount).unwrap_or(Decimal::new(10_000, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_markets_parse_as_decimals() {
        for seed in default_markets() {
            assert!(Decimal::from_str(&seed.tick_size).is_ok());
            assert!(Decimal::from_str(&seed.initial_oracle_price).is_ok());
        }
    }
}
