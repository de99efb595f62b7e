//! WebSocket Handlers
//!
//! One socket per topic: price, order book, and the administrative trading
//! rooms. Every book subscriber receives a full snapshot before any delta;
//! deltas then arrive in publish order. A subscriber that falls behind its
//! broadcast queue is dropped and the drop is logged.

use axum::extract::ws::{Message, WebSocket};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::bus::{Event, Topic};
use crate::engine::book::{BookDelta, BookLevel};
use crate::AppState;

/// Pair symbols carry `-` instead of `/` in URL paths.
fn resolve_symbol(raw: &str) -> String {
    raw.to_uppercase().replace('-', "/")
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    value: serde_json::Value,
) -> bool {
    match serde_json::to_string(&value) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            tracing::error!("websocket payload serialization failed: {}", e);
            false
        }
    }
}

/// `/ws/price/{pair}`: initial `price_data` snapshot, then `price_update`
/// frames as trades and simulator ticks move the market.
pub async fn price_socket(socket: WebSocket, state: Arc<AppState>, raw_symbol: String) {
    let symbol = resolve_symbol(&raw_symbol);
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.bus.subscribe(&Topic::Price(symbol.clone()));
    let initial = state
        .market_data
        .ticker(&symbol)
        .map(|t| serde_json::to_value(t).unwrap_or_default())
        .unwrap_or_else(|| json!({}));
    if !send_json(&mut sender, json!({"type": "price_data", "data": initial})).await {
        return;
    }
    tracing::debug!(%symbol, "price subscriber connected");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                if !handle_client_frame(msg, &mut sender).await {
                    break;
                }
            }
            event = rx.recv() => match event {
                Ok(Event::Price(data)) => {
                    let frame = json!({"type": "price_update", "data": data});
                    if !send_json(&mut sender, frame).await {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    metrics::counter!("subscriber_lag_drops_total").increment(1);
                    tracing::warn!(%symbol, lagged = n, "dropping slow price subscriber");
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn levels_json(levels: &[BookLevel]) -> serde_json::Value {
    json!(levels
        .iter()
        .map(|l| json!({"price": l.price, "quantity": l.quantity, "count": l.count}))
        .collect::<Vec<_>>())
}

fn delta_json(delta: &BookDelta) -> serde_json::Value {
    let level = json!([{
        "price": delta.price,
        "quantity": delta.quantity,
        "count": delta.count,
    }]);
    match delta.side {
        crate::models::OrderSide::Buy => json!({"bids": level, "asks": [], "seq": delta.seq}),
        crate::models::OrderSide::Sell => json!({"bids": [], "asks": level, "seq": delta.seq}),
    }
}

/// `/ws/orderbook/{pair}`: subscribe first, then send the full
/// `orderbook_data` snapshot, then forward deltas in publish order — a
/// subscriber joining mid-stream never sees a delta before its snapshot.
pub async fn orderbook_socket(socket: WebSocket, state: Arc<AppState>, raw_symbol: String) {
    let symbol = resolve_symbol(&raw_symbol);
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.bus.subscribe(&Topic::Book(symbol.clone()));
    let snapshot = state
        .orders
        .orderbook(&symbol, state.config.simulator_depth)
        .ok();
    let data = snapshot
        .map(|s| {
            json!({
                "bids": levels_json(&s.bids),
                "asks": levels_json(&s.asks),
                "seq": s.seq,
            })
        })
        .unwrap_or_else(|| json!({"bids": [], "asks": []}));
    if !send_json(&mut sender, json!({"type": "orderbook_data", "data": data})).await {
        return;
    }
    tracing::debug!(%symbol, "orderbook subscriber connected");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                if !handle_client_frame(msg, &mut sender).await {
                    break;
                }
            }
            event = rx.recv() => match event {
                Ok(Event::BookDelta(delta)) => {
                    let frame = json!({"type": "orderbook_update", "data": delta_json(&delta)});
                    if !send_json(&mut sender, frame).await {
                        break;
                    }
                }
                Ok(Event::BookSnapshot(snapshot)) => {
                    let frame = json!({
                        "type": "orderbook_data",
                        "data": {
                            "bids": levels_json(&snapshot.bids),
                            "asks": levels_json(&snapshot.asks),
                            "seq": snapshot.seq,
                        }
                    });
                    if !send_json(&mut sender, frame).await {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    metrics::counter!("subscriber_lag_drops_total").increment(1);
                    tracing::warn!(%symbol, lagged = n, "dropping slow orderbook subscriber");
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// `/ws/trading/{room}`: administrative/test rooms. Text frames from any
/// member are rebroadcast to the room through the bus.
pub async fn trading_socket(socket: WebSocket, state: Arc<AppState>, room: String) {
    let (mut sender, mut receiver) = socket.split();
    let topic = Topic::Room(room.clone());
    let mut rx = state.bus.subscribe(&topic);
    tracing::debug!(%room, "trading room member connected");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(value) => {
                                state.bus.publish(&topic, Event::Room(value));
                            }
                            Err(_) => {
                                let frame = json!({
                                    "type": "error",
                                    "data": {"code": "VALIDATION", "message": "frames must be JSON"}
                                });
                                if !send_json(&mut sender, frame).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!("websocket disconnected: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            event = rx.recv() => match event {
                Ok(Event::Room(value)) => {
                    let frame = json!({"type": "trading_update", "data": value});
                    if !send_json(&mut sender, frame).await {
                        break;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    metrics::counter!("subscriber_lag_drops_total").increment(1);
                    tracing::warn!(%room, lagged = n, "dropping slow room subscriber");
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Shared handling for client-side frames on read-only sockets.
async fn handle_client_frame(
    msg: Option<Result<Message, axum::Error>>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> bool {
    match msg {
        Some(Ok(Message::Ping(data))) => sender.send(Message::Pong(data)).await.is_ok(),
        Some(Ok(Message::Text(text))) => {
            if text.trim().eq_ignore_ascii_case("ping")
                || text.contains("\"ping\"")
            {
                return send_json(sender, json!({"type": "pong"})).await;
            }
            true
        }
        Some(Ok(Message::Close(_))) | None => false,
        Some(Err(e)) => {
            tracing::warn!("websocket disconnected: {}", e);
            false
        }
        _ => true,
    }
}
