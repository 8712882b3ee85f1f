use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::models::market::MarketResponse;
use crate::models::trade::TradeResponse;
use crate::services::matching::OrderbookSnapshot;
use crate::utils::response::{AppError, ApiResponse};
use crate::AppState;

/// `GET /clob/markets`
pub async fn list_markets(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<MarketResponse>>> {
    let markets: Vec<MarketResponse> = state.market_registry.list().iter().map(MarketResponse::from).collect();
    Json(ApiResponse::success(markets))
}

/// `GET /clob/markets/:symbol`
pub async fn get_market(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<MarketResponse>>, AppError> {
    let market = state.market_registry.get(&symbol)?;
    Ok(Json(ApiResponse::success(MarketResponse::from(&market))))
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    #[serde(default = "default_depth")]
    depth: usize,
}

fn default_depth() -> usize {
    20
}

/// `GET /clob/orderbook/:symbol?depth=N`
pub async fn get_orderbook(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(q): Query<DepthQuery>,
) -> Result<Json<ApiResponse<OrderbookSnapshot>>, AppError> {
    let snapshot = state.matching_engine.get_orderbook_snapshot(&symbol, q.depth.clamp(1, 200))?;
    Ok(Json(ApiResponse::success(snapshot)))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_trades_limit")]
    limit: i64,
}

fn default_trades_limit() -> i64 {
    50
}

/// `GET /clob/trades/:symbol?limit=N`
pub async fn get_trades(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<ApiResponse<Vec<TradeResponse>>>, AppError> {
    state.market_registry.get(&symbol)?;
    let trades = state.db.recent_trades(&symbol, q.limit.clamp(1, 500)).await?;
    Ok(Json(ApiResponse::success(trades.into_iter().map(TradeResponse::from).collect())))
}
