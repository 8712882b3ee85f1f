use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use rust_decimal::Decimal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod cache;
mod config;
mod db;
mod metrics;
mod models;
mod services;
mod utils;
mod websocket;

use crate::auth::rate_limit::{RateLimitConfig, RateLimiterState};
use crate::cache::{CacheConfig, CacheManager};
use crate::config::AppConfig;
use crate::db::Database;
use crate::models::order::OrderSide;
use crate::services::balance_ledger::BalanceLedger;
use crate::services::candle_aggregator::CandleAggregator;
use crate::services::faucet::Faucet;
use crate::services::market_registry::MarketRegistry;
use crate::services::matching::{MatchingEngine, OrderFlowOrchestrator, PersistenceWorker, Side};
use crate::services::oracle_ingestor::OracleIngestor;
use crate::services::position_keeper::PositionKeeper;
use crate::services::pubsub_hub::PubSubHub;

pub struct AppState {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub cache: Arc<CacheManager>,
    pub market_registry: Arc<MarketRegistry>,
    pub matching_engine: Arc<MatchingEngine>,
    pub candle_aggregator: Arc<CandleAggregator>,
    pub orchestrator: Arc<OrderFlowOrchestrator>,
    pub pubsub: Arc<PubSubHub>,
    pub faucet: Arc<Faucet>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perp_clob_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("starting perp-clob-engine v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(environment = %config.environment, "environment loaded");

    let db = Arc::new(Database::connect(&config.database_url).await?);
    tracing::info!("store connected");

    let cache_config = CacheConfig::from_env();
    let cache = Arc::new(CacheManager::new(cache_config).await?);
    if cache.is_available().await {
        tracing::info!(redis_url = %cache.config().redis_url, "cache manager initialized");
    } else {
        tracing::warn!("cache manager running without Redis (graceful degradation)");
    }

    let market_registry = MarketRegistry::from_seeds(&config.markets)?;
    tracing::info!(symbols = ?config.symbols(), "market registry initialized");

    let balance_ledger = BalanceLedger::new();
    let position_keeper = PositionKeeper::new();
    let matching_engine = MatchingEngine::new(market_registry.clone(), balance_ledger.clone(), position_keeper.clone());
    let candle_aggregator = CandleAggregator::new();

    // Recovery: rebuild resting limit orders into their books, replay open positions, and
    // resume candle history from the last persisted bucket (spec's restart recovery policy).
    match db.open_orders_for_recovery().await {
        Ok(orders) => {
            let mut restored = 0;
            for order in orders {
                let Some(price) = order.price else { continue };
                let remaining = order.amount - order.filled_amount;
                if remaining <= Decimal::ZERO {
                    continue;
                }
                let side = match order.side {
                    OrderSide::Buy => Side::Buy,
                    OrderSide::Sell => Side::Sell,
                };
                match matching_engine.restore_order(&order.symbol, order.id, &order.user_address, side, price, remaining, order.leverage, order.reduce_only) {
                    Ok(()) => restored += 1,
                    Err(e) => tracing::warn!(order_id = %order.id, error = %e, "failed to restore order into book"),
                }
            }
            tracing::info!(count = restored, "resting orders restored from store");
        }
        Err(e) => tracing::error!(error = %e, "failed to load open orders for recovery, starting with empty books"),
    }

    match db.open_positions_for_recovery().await {
        Ok(positions) => {
            let count = positions.len();
            for position in positions {
                position_keeper.restore(position);
            }
            tracing::info!(count, "open positions restored from store");
        }
        Err(e) => tracing::error!(error = %e, "failed to load open positions for recovery"),
    }

    for symbol in config.symbols() {
        match db.recent_candles(&symbol, crate::models::candle::CandleInterval::OneMinute.as_str(), 500).await {
            Ok(mut candles) => {
                candles.reverse();
                candle_aggregator.restore_from_store(&symbol, candles);
            }
            Err(e) => tracing::warn!(%symbol, error = %e, "failed to restore candle history"),
        }
        if let Ok(market) = market_registry.get(&symbol) {
            candle_aggregator.seed_history(&symbol, market.oracle_price, chrono::Utc::now());
        }
    }

    let oracle_ingestor = OracleIngestor::new(config.oracle_upstream_url.clone(), market_registry.clone(), matching_engine.clone());
    let oracle_for_poll = oracle_ingestor.clone();
    let poll_interval = std::time::Duration::from_secs(config.oracle_poll_interval_secs);
    tokio::spawn(async move {
        oracle_for_poll.run(poll_interval).await;
    });
    tracing::info!(interval_secs = config.oracle_poll_interval_secs, "oracle ingestor spawned");

    let faucet = Faucet::new(config.faucet_amount(), config.faucet_cooldown_secs, balance_ledger.clone());

    let orchestrator = Arc::new(OrderFlowOrchestrator::new(matching_engine.clone(), db.clone()));
    PersistenceWorker::new(matching_engine.clone(), db.clone()).spawn();
    tracing::info!("persistence workers spawned");

    // Trade stream feeds the candle aggregator directly; this is the one place a fill's side
    // effects extend past the matching engine's own critical section (spec §5: "applied
    // synchronously before the fill completes" is satisfied at the engine layer, this just
    // relays what already happened).
    let candle_feed = candle_aggregator.clone();
    let mut trade_rx = matching_engine.subscribe_trades();
    tokio::spawn(async move {
        loop {
            match trade_rx.recv().await {
                Ok(trade) => candle_feed.on_trade(&trade.symbol, trade.price, trade.quantity, chrono::Utc::now()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => tracing::warn!(skipped = n, "candle feed lagged"),
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let pubsub = PubSubHub::new();
    pubsub.spawn_forwarders(matching_engine.clone(), candle_aggregator.clone(), oracle_ingestor.clone());
    tracing::info!("pub/sub hub forwarders spawned");

    let metrics_handle = metrics::init_metrics();

    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        cache,
        market_registry,
        matching_engine,
        candle_aggregator,
        orchestrator,
        pubsub,
        faucet,
    });

    let rate_limiter = RateLimiterState::new(RateLimitConfig::default());

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(move || { let handle = metrics_handle.clone(); async move { handle.render() } }))
        .merge(api::routes::create_router(state.clone()))
        .nest("/ws", websocket::routes::create_router(state.clone()))
        .layer(axum::middleware::from_fn(api::middleware::metrics_middleware))
        .layer(axum::middleware::from_fn_with_state(rate_limiter, auth::rate_limit::rate_limit_by_header))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
