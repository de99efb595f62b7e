//! Wallet Handlers
//!
//! Balances, journal history and the mock deposit / withdrawal tickets.

use axum::{extract::State, http::StatusCode, Extension, Json};
use std::sync::Arc;

use crate::auth::middleware::AuthUser;
use crate::models::{
    Deposit, DepositRequest, Transaction, WalletResponse, WithdrawRequest, Withdrawal,
};
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

/// GET /wallets
pub async fn wallets(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Json<ApiResponse<Vec<WalletResponse>>> {
    let wallets = state
        .ledger
        .snapshot(auth.user_id)
        .iter()
        .map(WalletResponse::from)
        .collect();
    Json(ApiResponse::success(wallets))
}

/// GET /wallets/transactions
pub async fn transactions(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Json<ApiResponse<Vec<Transaction>>> {
    Json(ApiResponse::success(state.ledger.journal_for(auth.user_id)))
}

/// POST /wallets/deposit
pub async fn deposit(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<DepositRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Deposit>>), AppError> {
    let ticket = state.accounts.deposit(auth.user_id, &req)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(ticket))))
}

/// POST /wallets/withdraw
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<WithdrawRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Withdrawal>>), AppError> {
    let ticket = state.accounts.withdraw(auth.user_id, &req)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(ticket))))
}
