pub mod balance_ledger;
pub mod candle_aggregator;
pub mod faucet;
pub mod market_registry;
pub mod matching;
pub mod oracle_ingestor;
pub mod position_keeper;
pub mod pubsub_hub;
