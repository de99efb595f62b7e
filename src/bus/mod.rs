//! Event Bus
//!
//! Topic-addressed, best-effort publish/subscribe fabric. Every producer
//! (matching engine, ledger, simulator) publishes through the bus so
//! subscribers need not know where an event came from.
//!
//! Each topic is backed by its own `tokio::sync::broadcast` channel, so
//! delivery order per topic is publish order. A subscriber that falls more
//! than `queue_limit` messages behind observes `Lagged` on receive and is
//! dropped by its consumer loop. A global firehose channel carries every
//! event once for write-behind persistence.

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::engine::book::{BookDelta, BookSnapshot};
use crate::models::{MarketData, OrderResponse, TradeEvent, Transaction, WalletUpdate};

/// Addressable topics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Last-price and 24h rollups for a pair.
    Price(String),
    /// Incremental level deltas and periodic full snapshots.
    Book(String),
    /// Fresh trades for a pair.
    Trade(String),
    /// Order lifecycle transitions for one user.
    UserOrders(Uuid),
    /// Balance changes for one user.
    UserWallet(Uuid),
    /// Administrative / test rooms.
    Room(String),
}

impl Topic {
    pub fn key(&self) -> String {
        match self {
            Topic::Price(symbol) => format!("price.{}", symbol),
            Topic::Book(symbol) => format!("book.{}", symbol),
            Topic::Trade(symbol) => format!("trade.{}", symbol),
            Topic::UserOrders(user) => format!("user.{}.orders", user),
            Topic::UserWallet(user) => format!("user.{}.wallet", user),
            Topic::Room(room) => format!("trading.{}", room),
        }
    }
}

/// Events carried by the bus.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Event {
    Price(MarketData),
    BookDelta(BookDelta),
    BookSnapshot(BookSnapshot),
    Trade(TradeEvent),
    Order(OrderResponse),
    Journal(Transaction),
    Wallet(WalletUpdate),
    Room(serde_json::Value),
}

pub struct EventBus {
    topics: DashMap<String, broadcast::Sender<Event>>,
    firehose: broadcast::Sender<(String, Event)>,
    capacity: usize,
}

impl EventBus {
    /// `capacity` is the per-subscriber outstanding-message limit.
    pub fn new(capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(capacity.max(1024));
        Self {
            topics: DashMap::new(),
            firehose,
            capacity,
        }
    }

    fn sender(&self, key: &str) -> broadcast::Sender<Event> {
        self.topics
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish an event; returns the number of topic subscribers reached.
    /// Publishing never blocks matching.
    pub fn publish(&self, topic: &Topic, event: Event) -> usize {
        let key = topic.key();
        let _ = self.firehose.send((key.clone(), event.clone()));
        match self.sender(&key).send(event) {
            Ok(n) => n,
            // No receivers on the topic; best-effort delivery drops it.
            Err(_) => 0,
        }
    }

    /// Subscribe to a topic. The receiver sees events published after this
    /// call; events before it are missed by contract.
    pub fn subscribe(&self, topic: &Topic) -> broadcast::Receiver<Event> {
        self.sender(&topic.key()).subscribe()
    }

    /// Subscribe to every event on the bus, keyed by topic. Used by the
    /// persistence mirror.
    pub fn subscribe_all(&self) -> broadcast::Receiver<(String, Event)> {
        self.firehose.subscribe()
    }

    pub fn queue_limit(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn trade_event(i: i64) -> Event {
        Event::Trade(TradeEvent {
            trade_id: format!("T-{}", i),
            symbol: "BTC/USDT".to_string(),
            maker_order_id: Uuid::from_u128(1),
            taker_order_id: Uuid::from_u128(2),
            buyer_id: Uuid::from_u128(3),
            seller_id: Uuid::from_u128(4),
            price: dec!(50000),
            quantity: dec!(1),
            total_value: dec!(50000),
            buyer_fee: dec!(50),
            seller_fee: dec!(50),
            side: "buy".to_string(),
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    #[tokio::test]
    async fn subscriber_receives_events_published_after_subscribe() {
        let bus = EventBus::new(16);
        let topic = Topic::Trade("BTC/USDT".to_string());

        bus.publish(&topic, trade_event(0));
        let mut rx = bus.subscribe(&topic);
        bus.publish(&topic, trade_event(1));

        match rx.recv().await.unwrap() {
            Event::Trade(t) => assert_eq!(t.trade_id, "T-1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn delivery_order_matches_publish_order() {
        let bus = EventBus::new(64);
        let topic = Topic::Trade("BTC/USDT".to_string());
        let mut rx = bus.subscribe(&topic);

        for i in 0..10 {
            bus.publish(&topic, trade_event(i));
        }
        for i in 0..10 {
            match rx.recv().await.unwrap() {
                Event::Trade(t) => assert_eq!(t.trade_id, format!("T-{}", i)),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_observes_lag() {
        let bus = EventBus::new(4);
        let topic = Topic::Trade("BTC/USDT".to_string());
        let mut rx = bus.subscribe(&topic);

        for i in 0..20 {
            bus.publish(&topic, trade_event(i));
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = EventBus::new(16);
        let btc = Topic::Trade("BTC/USDT".to_string());
        let eth = Topic::Trade("ETH/USDT".to_string());
        let mut rx = bus.subscribe(&eth);

        bus.publish(&btc, trade_event(0));
        assert!(rx.try_recv().is_err());
    }
}
