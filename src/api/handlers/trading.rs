//! Trading Handlers
//!
//! Order submission and cancellation plus the caller's order and trade
//! history. The submit response carries every fill reachable within the
//! request; later maker-side fills surface on the user's order topic.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::models::{CreateOrderRequest, OrderResponse, OrderStatus, Trade};
use crate::utils::response::{ApiResponse, AppError};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TradeFill {
    pub trade_id: String,
    pub price: rust_decimal::Decimal,
    pub quantity: rust_decimal::Decimal,
    pub total_value: rust_decimal::Decimal,
}

#[derive(Debug, Serialize)]
pub struct SubmitOrderResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub fills: Vec<TradeFill>,
}

/// POST /trading/orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SubmitOrderResponse>>), AppError> {
    let deadline = Duration::from_millis(state.config.submit_deadline_ms);
    let result = state
        .orders
        .submit(auth.user_id, &req, Some(deadline))
        .await?;

    let fills = result
        .trades
        .iter()
        .map(|t| TradeFill {
            trade_id: t.trade_id.clone(),
            price: t.price,
            quantity: t.quantity,
            total_value: t.total_value,
        })
        .collect();
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(SubmitOrderResponse {
            order: OrderResponse::from(&result.order),
            fills,
        })),
    ))
}

/// POST /trading/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, AppError> {
    let order = state.orders.cancel(auth.user_id, order_id).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(&order))))
}

#[derive(Debug, Deserialize)]
pub struct OrderHistoryQuery {
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
}

/// GET /trading/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<OrderHistoryQuery>,
) -> Json<ApiResponse<Vec<OrderResponse>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let orders = state
        .store
        .orders_for_user(auth.user_id, query.status, limit)
        .iter()
        .map(OrderResponse::from)
        .collect();
    Json(ApiResponse::success(orders))
}

#[derive(Debug, Deserialize)]
pub struct TradeHistoryQuery {
    pub limit: Option<usize>,
}

/// GET /trading/trades
pub async fn list_trades(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<TradeHistoryQuery>,
) -> Json<ApiResponse<Vec<Trade>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Json(ApiResponse::success(
        state.trades.trades_for_user(auth.user_id, limit),
    ))
}
