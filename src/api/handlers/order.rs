use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::auth::AuthUser;
use crate::models::order::{CreateOrderRequest, Order, OrderResponse, OrderStatus, SelfTradePolicy};
use crate::models::OrderSide;
use crate::services::matching::{OrderType as EngineOrderType, Side as EngineSide};
use crate::utils::response::{AppError, ApiResponse};
use crate::AppState;

fn to_engine_side(side: OrderSide) -> EngineSide {
    match side {
        OrderSide::Buy => EngineSide::Buy,
        OrderSide::Sell => EngineSide::Sell,
    }
}

fn to_engine_order_type(order_type: crate::models::order::OrderType) -> EngineOrderType {
    match order_type {
        crate::models::order::OrderType::Limit => EngineOrderType::Limit,
        crate::models::order::OrderType::Market => EngineOrderType::Market,
    }
}

/// `POST /clob/orders`. Idempotent on `client_order_id`: a retry with the same key returns the
/// already-accepted order instead of submitting a second one.
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    req.validate().map_err(|e| AppError::bad_request(&e.to_string()))?;

    if let Some(client_order_id) = req.client_order_id {
        if let Some(existing) = state.db.find_order_by_client_id(&user.address, client_order_id).await? {
            return Ok(Json(ApiResponse::success(OrderResponse::from(existing))));
        }
    }

    let result = state
        .orchestrator
        .submit_order(
            &req.symbol,
            &user.address,
            to_engine_side(req.side),
            to_engine_order_type(req.order_type),
            req.price,
            req.quantity,
            req.leverage,
            req.post_only,
            req.reduce_only,
            SelfTradePolicy::Allow,
            req.client_order_id,
        )
        .await?;

    let order = Order {
        id: result.order_id,
        user_address: user.address.clone(),
        symbol: req.symbol,
        side: req.side,
        order_type: req.order_type,
        price: req.price,
        amount: req.quantity,
        filled_amount: result.filled_quantity,
        avg_fill_price: result.avg_fill_price,
        leverage: req.leverage,
        post_only: req.post_only,
        reduce_only: req.reduce_only,
        self_trade_policy: SelfTradePolicy::Allow,
        client_order_id: req.client_order_id,
        status: result.status,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };

    state.pubsub.publish_user_event(&user.address, &serde_json::json!({
        "kind": "order:accepted",
        "order": OrderResponse::from(order.clone()),
    }));

    Ok(Json(ApiResponse::success(OrderResponse::from(order))))
}

/// `DELETE /clob/orders/:orderId`. The symbol isn't part of the path (spec's external
/// interface), so we look the order up in the store first to find which book to cancel on.
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let order = state
        .db
        .order_history_for_address(&user.address, 1000)
        .await?
        .into_iter()
        .find(|o| o.id == order_id)
        .ok_or_else(|| AppError::order_not_found(order_id))?;

    let cancelled = state.orchestrator.cancel_order(&order.symbol, order_id, &user.address).await?;
    if cancelled {
        state.pubsub.publish_user_event(&user.address, &serde_json::json!({
            "kind": "order:cancelled",
            "order_id": order_id,
        }));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({ "cancelled": cancelled }))))
}

/// `GET /clob/orders`: currently-open orders for the caller, across all markets.
pub async fn list_open_orders(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, AppError> {
    let orders = state.db.open_orders_for_address(&user.address).await?;
    Ok(Json(ApiResponse::success(orders.into_iter().map(OrderResponse::from).collect())))
}

#[derive(Debug, serde::Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    100
}

/// `GET /clob/orders/history`: every order the caller has ever submitted, most recent first.
pub async fn order_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    axum::extract::Query(q): axum::extract::Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, AppError> {
    let orders = state.db.order_history_for_address(&user.address, q.limit.clamp(1, 1000)).await?;
    Ok(Json(ApiResponse::success(orders.into_iter().map(OrderResponse::from).collect())))
}

/// `GET /clob/trades/history`: every fill the caller was maker or taker on.
pub async fn trade_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    axum::extract::Query(q): axum::extract::Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<crate::models::trade::TradeResponse>>>, AppError> {
    let trades = state.db.trade_history_for_address(&user.address, q.limit.clamp(1, 1000)).await?;
    Ok(Json(ApiResponse::success(trades.into_iter().map(crate::models::trade::TradeResponse::from).collect())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_side_mapping_round_trips() {
        assert!(matches!(to_engine_side(OrderSide::Buy), EngineSide::Buy));
        assert!(matches!(to_engine_side(OrderSide::Sell), EngineSide::Sell));
    }

    #[test]
    fn rejected_status_is_not_open() {
        assert_ne!(OrderStatus::Rejected, OrderStatus::Open);
    }
}
