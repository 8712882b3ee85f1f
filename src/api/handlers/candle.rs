use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::models::candle::{CandleInterval, CandleResponse};
use crate::utils::response::{AppError, ApiResponse};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CandleQuery {
    #[serde(default = "default_interval")]
    interval: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_interval() -> String {
    "1m".to_string()
}

fn default_limit() -> usize {
    100
}

/// `GET /clob/candles/:symbol?interval=1m&limit=100`
pub async fn get_candles(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(q): Query<CandleQuery>,
) -> Result<Json<ApiResponse<Vec<CandleResponse>>>, AppError> {
    state.market_registry.get(&symbol)?;
    let interval = CandleInterval::parse(&q.interval).ok_or_else(|| AppError::invalid_interval(&q.interval))?;
    let candles = state.candle_aggregator.get_recent(&symbol, interval, q.limit.clamp(1, 1000));
    Ok(Json(ApiResponse::success(candles.into_iter().map(CandleResponse::from).collect())))
}
