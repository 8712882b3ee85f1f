//! Order matching: price-time priority per market, one `Orderbook` per symbol, all orchestrated
//! by `MatchingEngine`.

mod engine;
mod orchestrator;
mod orderbook;
mod types;

pub use engine::{MatchingEngine, SubmitOrderParams};
pub use orchestrator::{OrderFlowOrchestrator, PersistenceWorker};
pub use orderbook::Orderbook;
pub use types::*;
