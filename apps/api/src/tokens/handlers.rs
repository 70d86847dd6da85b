use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::account::{Account, TokenTransaction};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct OpenAccountRequest {
    pub account_id: Uuid,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub account_id: Uuid,
    pub token_balance: i64,
    /// Drives the purchase prompt. Generation is never blocked on it.
    pub low_balance: bool,
}

#[derive(Deserialize)]
pub struct CreditRequest {
    pub amount: i64,
    pub description: String,
}

#[derive(Deserialize)]
pub struct AdjustRequest {
    pub delta: i64,
    pub operator_id: String,
}

#[derive(Deserialize)]
pub struct LockPriceRequest {
    pub package_id: String,
    pub price: i64,
}

#[derive(Serialize)]
pub struct LockPriceResponse {
    pub package_id: String,
    pub locked_price: i64,
}

fn balance_response(account_id: Uuid, token_balance: i64) -> BalanceResponse {
    BalanceResponse {
        account_id,
        token_balance,
        low_balance: token_balance <= 0,
    }
}

/// POST /api/v1/accounts
pub async fn handle_open_account(
    State(state): State<AppState>,
    Json(req): Json<OpenAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account = state.tokens.open_account(req.account_id).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /api/v1/accounts/:id/balance
pub async fn handle_balance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.tokens.balance(id).await?;
    Ok(Json(balance_response(id, balance)))
}

/// GET /api/v1/accounts/:id/transactions
pub async fn handle_transactions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TokenTransaction>>, AppError> {
    Ok(Json(state.tokens.transactions(id).await?))
}

/// POST /api/v1/accounts/:id/credit
pub async fn handle_credit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CreditRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state.tokens.credit(id, req.amount, &req.description).await?;
    Ok(Json(balance_response(id, balance)))
}

/// POST /api/v1/accounts/:id/package-prices
pub async fn handle_lock_package_price(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<LockPriceRequest>,
) -> Result<Json<LockPriceResponse>, AppError> {
    let locked_price = state
        .tokens
        .lock_package_price(id, &req.package_id, req.price)
        .await?;
    Ok(Json(LockPriceResponse {
        package_id: req.package_id,
        locked_price,
    }))
}

/// POST /api/v1/admin/accounts/:id/adjust
pub async fn handle_adjust(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AdjustRequest>,
) -> Result<Json<BalanceResponse>, AppError> {
    if req.operator_id.trim().is_empty() {
        return Err(AppError::Validation("operator_id is required".to_string()));
    }
    let balance = state.tokens.adjust(id, req.delta, &req.operator_id).await?;
    Ok(Json(balance_response(id, balance)))
}
