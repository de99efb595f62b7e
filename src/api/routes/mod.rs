use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::auth::middleware::auth_middleware;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/markets/pairs", get(handlers::market::pairs))
        .route("/markets/tickers", get(handlers::market::tickers))
        .route("/markets/ticker/:symbol", get(handlers::market::ticker))
        .route("/markets/orderbook/:symbol", get(handlers::market::orderbook))
        .route("/markets/klines/:symbol", get(handlers::market::klines));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/trading/orders", post(handlers::trading::create_order))
        .route("/trading/orders", get(handlers::trading::list_orders))
        .route(
            "/trading/orders/:order_id/cancel",
            post(handlers::trading::cancel_order),
        )
        .route("/trading/trades", get(handlers::trading::list_trades))
        .route("/wallets", get(handlers::wallet::wallets))
        .route("/wallets/transactions", get(handlers::wallet::transactions))
        .route("/wallets/deposit", post(handlers::wallet::deposit))
        .route("/wallets/withdraw", post(handlers::wallet::withdraw))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new().merge(public_routes).merge(protected_routes)
}
