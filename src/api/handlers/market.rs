//! Market Data Handlers
//!
//! Public read-only surface: pairs, tickers, order book depth, klines.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::resolve_symbol;
use crate::engine::book::BookSnapshot;
use crate::models::{MarketData, TradingPair};
use crate::services::kline::{Candle, KlineInterval};
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

/// GET /markets/pairs
pub async fn pairs(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<TradingPair>>> {
    Json(ApiResponse::success(state.registry.active_pairs()))
}

/// GET /markets/tickers
pub async fn tickers(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<MarketData>>> {
    Json(ApiResponse::success(state.market_data.all_tickers()))
}

/// GET /markets/ticker/{sym}
pub async fn ticker(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<MarketData>>, AppError> {
    let symbol = resolve_symbol(&symbol);
    state
        .registry
        .get_by_symbol(&symbol)
        .ok_or_else(|| AppError::not_found(&format!("trading pair {}", symbol)))?;
    let data = state
        .market_data
        .ticker(&symbol)
        .ok_or_else(|| AppError::not_found(&format!("no market data for {}", symbol)))?;
    Ok(Json(ApiResponse::success(data)))
}

#[derive(Debug, Deserialize)]
pub struct DepthQuery {
    pub depth: Option<usize>,
}

/// GET /markets/orderbook/{sym}
pub async fn orderbook(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<ApiResponse<BookSnapshot>>, AppError> {
    let symbol = resolve_symbol(&symbol);
    let depth = query.depth.unwrap_or(20).clamp(1, 100);
    let snapshot = state.orders.orderbook(&symbol, depth)?;
    Ok(Json(ApiResponse::success(snapshot)))
}

#[derive(Debug, Deserialize)]
pub struct KlineQuery {
    pub interval: Option<String>,
    pub limit: Option<usize>,
}

/// GET /markets/klines/{sym}?interval=
pub async fn klines(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    Query(query): Query<KlineQuery>,
) -> Result<Json<ApiResponse<Vec<Candle>>>, AppError> {
    let symbol = resolve_symbol(&symbol);
    state
        .registry
        .get_by_symbol(&symbol)
        .ok_or_else(|| AppError::not_found(&format!("trading pair {}", symbol)))?;
    let interval = query.interval.as_deref().unwrap_or("1m");
    let interval = KlineInterval::parse(interval)
        .ok_or_else(|| AppError::bad_request(&format!("unknown interval {}", interval)))?;
    let limit = query.limit.unwrap_or(200).clamp(1, 1000);
    Ok(Json(ApiResponse::success(
        state.klines.klines(&symbol, interval, limit),
    )))
}
