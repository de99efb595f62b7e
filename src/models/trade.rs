//! Trade Model
//!
//! Immutable execution records. One trade per match; the execution price is
//! the resting (maker) order's price, so price improvement goes to the
//! aggressor.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    /// Unique external identifier.
    pub trade_id: String,
    pub pair_id: Uuid,
    pub symbol: String,
    /// The resting order (maker side).
    pub maker_order_id: Uuid,
    /// The aggressor order (taker side).
    pub taker_order_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
    /// `price * quantity`, quantized to the quote currency.
    pub total_value: Decimal,
    pub buyer_fee: Decimal,
    pub seller_fee: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Trade event payload for bus subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct TradeEvent {
    pub trade_id: String,
    pub symbol: String,
    pub maker_order_id: Uuid,
    pub taker_order_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
    pub total_value: Decimal,
    pub buyer_fee: Decimal,
    pub seller_fee: Decimal,
    /// Aggressor side, the conventional tape direction.
    pub side: String,
    pub timestamp: i64,
}

impl Trade {
    pub fn to_event(&self, taker_side: &str) -> TradeEvent {
        TradeEvent {
            trade_id: self.trade_id.clone(),
            symbol: self.symbol.clone(),
            maker_order_id: self.maker_order_id,
            taker_order_id: self.taker_order_id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            price: self.price,
            quantity: self.quantity,
            total_value: self.total_value,
            buyer_fee: self.buyer_fee,
            seller_fee: self.seller_fee,
            side: taker_side.to_string(),
            timestamp: self.created_at.timestamp_millis(),
        }
    }
}
