//! Order Model
//!
//! Orders with lifecycle state, fee accumulators and reservation tracking.
//! Status transitions form a DAG: pending orders may partially fill, fill,
//! cancel or reject; partially filled orders may fill or cancel; terminal
//! states are permanent.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    /// Accepted by the enumeration but rejected on submit; no trigger
    /// component exists yet.
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn is_matchable(&self) -> bool {
        matches!(self, OrderType::Market | OrderType::Limit)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
            OrderType::Stop => write!(f, "stop"),
            OrderType::StopLimit => write!(f, "stop_limit"),
        }
    }
}

/// Remainder handling for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good Till Cancel: remainder rests.
    GTC,
    /// Immediate or Cancel: remainder is cancelled.
    IOC,
    /// Fill or Kill: all-or-nothing, checked up front.
    FOK,
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::GTC
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PartialFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PartialFilled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::PartialFilled => write!(f, "partial_filled"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pair_id: Uuid,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub status: OrderStatus,
    /// Required for limit; ignored for market.
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    /// Monotonically non-decreasing, never exceeds `quantity`.
    pub filled: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub total_fee: Decimal,
    pub time_in_force: TimeInForce,
    /// Funds originally frozen to back the order, in the reserve currency
    /// (quote for buys, base for sells).
    pub reserved: Decimal,
    /// Portion of the reservation not yet settled or refunded.
    pub reserved_remaining: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled
    }
}

// ============================================================================
// Requests / Responses
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub pair_id: Uuid,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub total_fee: Decimal,
    pub time_in_force: TimeInForce,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            symbol: order.symbol.clone(),
            order_type: order.order_type,
            side: order.side,
            status: order.status,
            price: order.price,
            quantity: order.quantity,
            filled: order.filled,
            remaining: order.remaining(),
            average_fill_price: order.average_fill_price,
            total_fee: order.total_fee,
            time_in_force: order.time_in_force,
            created_at: order.created_at.timestamp_millis(),
            updated_at: order.updated_at.timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_terminality() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Pending.is_open());
        assert!(OrderStatus::PartialFilled.is_open());
    }

    #[test]
    fn serde_status_uses_snake_case() {
        let s = serde_json::to_string(&OrderStatus::PartialFilled).unwrap();
        assert_eq!(s, "\"partial_filled\"");
    }

    #[test]
    fn request_accepts_type_field() {
        let req: CreateOrderRequest = serde_json::from_str(
            r#"{"pair_id":"6e9bdc9e-35a2-4b5f-9b6c-0d8f3f8f3f8f","type":"limit","side":"buy","quantity":"1.5","price":"50000","time_in_force":"IOC"}"#,
        )
        .unwrap();
        assert_eq!(req.order_type, OrderType::Limit);
        assert_eq!(req.time_in_force, TimeInForce::IOC);
        assert_eq!(req.quantity, dec!(1.5));
    }

    #[test]
    fn tif_defaults_to_gtc() {
        let req: CreateOrderRequest = serde_json::from_str(
            r#"{"pair_id":"6e9bdc9e-35a2-4b5f-9b6c-0d8f3f8f3f8f","type":"market","side":"sell","quantity":"1"}"#,
        )
        .unwrap();
        assert_eq!(req.time_in_force, TimeInForce::GTC);
    }
}
