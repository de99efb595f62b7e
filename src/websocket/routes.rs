use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;

use crate::websocket::handler::{orderbook_socket, price_socket, trading_socket};
use crate::AppState;

pub fn create_router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/price/:pair", get(price_handler))
        .route("/orderbook/:pair", get(orderbook_handler))
        .route("/trading/:room", get(trading_handler))
}

async fn price_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(pair): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| price_socket(socket, state, pair))
}

async fn orderbook_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(pair): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| orderbook_socket(socket, state, pair))
}

async fn trading_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| trading_socket(socket, state, room))
}
