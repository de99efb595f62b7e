//! Auth Handlers
//!
//! Email + password registration and login with JWT access/refresh tokens.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use validator::Validate;

use crate::models::{LoginRequest, RegisterRequest, TokenResponse, UserProfile};
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

/// POST /auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UserProfile>>), AppError> {
    req.validate()
        .map_err(|e| AppError::bad_request(&e.to_string()))?;

    let user = state.accounts.register(&req.email, &req.password)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(UserProfile::from(&user))),
    ))
}

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<TokenResponse>>, AppError> {
    let user = state
        .accounts
        .verify_login(&req.email, &req.password)
        .map_err(|_| AppError::unauthorized("invalid email or password"))?;
    let tokens = state.jwt.issue_pair(user.id, &user.email)?;
    Ok(Json(ApiResponse::success(tokens)))
}
