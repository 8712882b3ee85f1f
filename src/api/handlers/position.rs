use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};

use crate::auth::AuthUser;
use crate::models::order::SelfTradePolicy;
use crate::models::position::{PositionResponse, PositionSide};
use crate::services::matching::{OrderType as EngineOrderType, Side as EngineSide};
use crate::utils::response::{AppError, ApiResponse};
use crate::AppState;

fn mark_price(state: &AppState, symbol: &str) -> rust_decimal::Decimal {
    state.market_registry.get(symbol).map(|m| m.oracle_price).unwrap_or_default()
}

/// `GET /clob/positions`: every open position for the caller.
pub async fn list_positions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<ApiResponse<Vec<PositionResponse>>> {
    let responses = state
        .matching_engine
        .position_keeper()
        .list_for_address(&user.address)
        .into_iter()
        .map(|p| {
            let mark = mark_price(&state, &p.symbol);
            p.to_response(mark)
        })
        .collect();
    Json(ApiResponse::success(responses))
}

/// `GET /clob/positions/:symbol`
pub async fn get_position(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<PositionResponse>>, AppError> {
    let position = state
        .matching_engine
        .position_keeper()
        .get(&user.address, &symbol)
        .ok_or_else(|| AppError::not_found(&format!("no open position for {symbol}")))?;
    let mark = mark_price(&state, &symbol);
    Ok(Json(ApiResponse::success(position.to_response(mark))))
}

/// `POST /clob/positions/:symbol/close`. Submits a reduce-only market order for the position's
/// full remaining size on the closing side; the fill path (engine → position keeper) is the
/// same one a regular reduce-only order takes.
pub async fn close_position(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let position = state
        .matching_engine
        .position_keeper()
        .get(&user.address, &symbol)
        .ok_or_else(|| AppError::not_found(&format!("no open position for {symbol}")))?;

    let closing_side = match position.side {
        PositionSide::Long => EngineSide::Sell,
        PositionSide::Short => EngineSide::Buy,
    };

    let result = state
        .orchestrator
        .submit_order(
            &symbol,
            &user.address,
            closing_side,
            EngineOrderType::Market,
            None,
            position.size,
            1,
            false,
            true,
            SelfTradePolicy::Allow,
            None,
        )
        .await?;

    state.pubsub.publish_user_event(&user.address, &serde_json::json!({
        "kind": "position:closed",
        "symbol": symbol,
        "filled_quantity": result.filled_quantity,
    }));

    Ok(Json(ApiResponse::success(serde_json::json!({
        "order_id": result.order_id,
        "filled_quantity": result.filled_quantity,
        "status": result.status,
    }))))
}
