#![allow(dead_code)]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn error(code: &str, message: &str) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Application error type
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn invalid_amount(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_AMOUNT", message)
    }

    pub fn invalid_interval(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_INTERVAL", message)
    }

    pub fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn invalid_token(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", message)
    }

    pub fn invalid_token_expired() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "INVALID_TOKEN_EXPIRED", "token has expired")
    }

    pub fn rate_limited(message: &str) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", message)
    }

    pub fn market_paused(symbol: &str) -> Self {
        Self::new(StatusCode::CONFLICT, "MARKET_PAUSED", &format!("market {symbol} is not active"))
    }

    pub fn insufficient_balance(message: &str) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE", message)
    }

    pub fn post_only_would_cross() -> Self {
        Self::new(StatusCode::CONFLICT, "POST_ONLY_WOULD_CROSS", "post-only order would cross the book")
    }

    pub fn no_position_to_reduce() -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "NO_POSITION_TO_REDUCE", "reduce-only order has no opposite position to reduce")
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn order_not_found(order_id: uuid::Uuid) -> Self {
        Self::new(StatusCode::NOT_FOUND, "ORDER_NOT_FOUND", &format!("order not found: {order_id}"))
    }

    pub fn store_unavailable(message: &str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", message)
    }

    pub fn internal(message: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl From<crate::services::matching::MatchingError> for AppError {
    fn from(e: crate::services::matching::MatchingError) -> Self {
        use crate::services::matching::MatchingError as E;
        match e {
            E::MarketNotFound(s) => AppError::not_found(&format!("unknown market: {s}")),
            E::MarketPaused(s) => AppError::market_paused(&s),
            E::OrderNotFound(id) => AppError::order_not_found(id),
            E::InvalidPrice(msg) | E::InvalidQuantity(msg) => AppError::invalid_amount(&msg),
            E::LeverageExceeded { symbol, leverage, max } => {
                AppError::bad_request(&format!("leverage {leverage} exceeds max {max} for {symbol}"))
            }
            E::InsufficientBalance { required, available } => {
                AppError::insufficient_balance(&format!("need {required}, have {available}"))
            }
            E::PostOnlyWouldCross => AppError::post_only_would_cross(),
            E::NoPositionToReduce => AppError::no_position_to_reduce(),
            E::OraclePriceUnavailable(symbol) => AppError::market_paused(&symbol),
            E::Store(msg) => AppError::store_unavailable(&msg),
        }
    }
}

impl From<crate::services::market_registry::MarketRegistryError> for AppError {
    fn from(e: crate::services::market_registry::MarketRegistryError) -> Self {
        use crate::services::market_registry::MarketRegistryError as E;
        match e {
            E::UnknownSymbol(s) => AppError::not_found(&format!("unknown market: {s}")),
            E::NotActive(s) => AppError::market_paused(&s),
            E::InvalidSeed { symbol, reason } => AppError::internal(&format!("{symbol}: {reason}")),
        }
    }
}

impl From<crate::services::balance_ledger::BalanceLedgerError> for AppError {
    fn from(e: crate::services::balance_ledger::BalanceLedgerError) -> Self {
        use crate::services::balance_ledger::BalanceLedgerError as E;
        match e {
            E::InsufficientFree { available, requested, .. } => {
                AppError::insufficient_balance(&format!("need {requested}, have {available}"))
            }
            E::InsufficientLocked { locked, requested, .. } => {
                AppError::insufficient_balance(&format!("need {requested}, have {locked} locked"))
            }
            E::NonPositiveAmount(d) => AppError::invalid_amount(&format!("amount must be positive, got {d}")),
        }
    }
}

impl From<crate::services::faucet::FaucetError> for AppError {
    fn from(e: crate::services::faucet::FaucetError) -> Self {
        use crate::services::faucet::FaucetError as E;
        match e {
            E::RateLimited { next_eligible_at } => {
                AppError::rate_limited(&format!("next eligible at {next_eligible_at}"))
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::store_unavailable(&e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::error(&self.code, &self.message);
        (self.status, Json(body)).into_response()
    }
}
