use std::sync::Arc;

use axum::extract::State;
use axum::{Extension, Json};

use crate::auth::AuthUser;
use crate::utils::response::{AppError, ApiResponse};
use crate::AppState;

/// `POST /faucet/claim`
pub async fn claim(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let free_balance = state.faucet.claim(&user.address)?;
    let _ = state.db.insert_faucet_claim(&user.address, state.config.faucet_amount()).await;

    state.pubsub.publish_user_event(&user.address, &serde_json::json!({
        "kind": "balance:updated",
        "free": free_balance,
    }));

    Ok(Json(ApiResponse::success(serde_json::json!({ "free_balance": free_balance }))))
}

/// `GET /faucet/balance`
pub async fn balance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<ApiResponse<serde_json::Value>> {
    let account = state.matching_engine.balance_ledger().get(&user.address);
    let next_eligible_at = state.faucet.next_eligible_at(&user.address);
    Json(ApiResponse::success(serde_json::json!({
        "free": account.free,
        "locked": account.locked,
        "next_eligible_at": next_eligible_at,
    })))
}
