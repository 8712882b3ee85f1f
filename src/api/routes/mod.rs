use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::auth::middleware::auth_middleware;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes: market data, no identity required (spec §6).
    let public_routes = Router::new()
        .route("/clob/markets", get(handlers::market::list_markets))
        .route("/clob/markets/:symbol", get(handlers::market::get_market))
        .route("/clob/orderbook/:symbol", get(handlers::market::get_orderbook))
        .route("/clob/trades/:symbol", get(handlers::market::get_trades))
        .route("/clob/candles/:symbol", get(handlers::candle::get_candles));

    // Protected routes: every endpoint that reads or mutates one address's orders, positions,
    // or balance.
    let protected_routes = Router::new()
        .route("/clob/orders", post(handlers::order::create_order))
        .route("/clob/orders", get(handlers::order::list_open_orders))
        .route("/clob/orders/history", get(handlers::order::order_history))
        .route("/clob/orders/:order_id", delete(handlers::order::cancel_order))
        .route("/clob/trades/history", get(handlers::order::trade_history))
        .route("/clob/positions", get(handlers::position::list_positions))
        .route("/clob/positions/:symbol", get(handlers::position::get_position))
        .route("/clob/positions/:symbol/close", post(handlers::position::close_position))
        .route("/faucet/claim", post(handlers::faucet::claim))
        .route("/faucet/balance", get(handlers::faucet::balance))
        .layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new().merge(public_routes).merge(protected_routes)
}
