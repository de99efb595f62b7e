//! Authoritative Stores
//!
//! The order store is the durable record of every order; the book is a
//! rebuildable projection of it. Writes to a given order serialize on its
//! map entry. The trade log is append-only. The pair registry holds market
//! reference data seeded at startup.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{Currency, MarketType, Order, OrderStatus, OrderType, Trade, TradingPair};

pub struct OrderStore {
    orders: DashMap<Uuid, Order>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self {
            orders: DashMap::new(),
        }
    }

    pub fn insert(&self, order: Order) {
        self.orders.insert(order.id, order);
    }

    pub fn get(&self, id: Uuid) -> Option<Order> {
        self.orders.get(&id).map(|o| o.clone())
    }

    /// Apply a mutation to one order under its entry lock. Terminal statuses
    /// are permanent; a mutation attempting to leave one is a bug.
    pub fn update<F>(&self, id: Uuid, f: F) -> Result<Order, CoreError>
    where
        F: FnOnce(&mut Order),
    {
        let mut entry = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("order {}", id)))?;
        let was_terminal = entry.status.is_terminal();
        f(&mut entry);
        entry.updated_at = Utc::now();
        if was_terminal && !entry.status.is_terminal() {
            return Err(CoreError::Invariant(format!(
                "order {} left terminal status",
                id
            )));
        }
        Ok(entry.clone())
    }

    pub fn orders_for_user(
        &self,
        user_id: Uuid,
        status: Option<OrderStatus>,
        limit: usize,
    ) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .filter(|o| status.map_or(true, |s| o.status == s))
            .map(|o| o.clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders.truncate(limit);
        orders
    }

    /// Open limit orders for a pair, oldest first — the projection the book
    /// is rebuilt from.
    pub fn open_orders_for_pair(&self, pair_id: Uuid) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| {
                o.pair_id == pair_id
                    && o.status.is_open()
                    && o.order_type == OrderType::Limit
                    && o.remaining() > Decimal::ZERO
            })
            .map(|o| o.clone())
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TradeLog {
    trades: Mutex<Vec<Trade>>,
}

impl TradeLog {
    pub fn new() -> Self {
        Self {
            trades: Mutex::new(Vec::new()),
        }
    }

    pub fn append(&self, trade: Trade) {
        self.trades.lock().push(trade);
    }

    pub fn recent_for_symbol(&self, symbol: &str, limit: usize) -> Vec<Trade> {
        let trades = self.trades.lock();
        trades
            .iter()
            .rev()
            .filter(|t| t.symbol == symbol)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn trades_for_user(&self, user_id: Uuid, limit: usize) -> Vec<Trade> {
        let trades = self.trades.lock();
        trades
            .iter()
            .rev()
            .filter(|t| t.buyer_id == user_id || t.seller_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.trades.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.lock().is_empty()
    }
}

impl Default for TradeLog {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PairRegistry {
    pairs: DashMap<Uuid, TradingPair>,
    by_symbol: DashMap<String, Uuid>,
    currencies: DashMap<String, Currency>,
}

impl PairRegistry {
    pub fn new() -> Self {
        Self {
            pairs: DashMap::new(),
            by_symbol: DashMap::new(),
            currencies: DashMap::new(),
        }
    }

    pub fn add_currency(&self, currency: Currency) {
        self.currencies.insert(currency.symbol.clone(), currency);
    }

    pub fn add_pair(&self, pair: TradingPair) {
        self.by_symbol.insert(pair.symbol.clone(), pair.id);
        self.pairs.insert(pair.id, pair);
    }

    pub fn get(&self, id: Uuid) -> Option<TradingPair> {
        self.pairs.get(&id).map(|p| p.clone())
    }

    pub fn get_by_symbol(&self, symbol: &str) -> Option<TradingPair> {
        let id = *self.by_symbol.get(symbol)?;
        self.get(id)
    }

    pub fn active_pairs(&self) -> Vec<TradingPair> {
        let mut pairs: Vec<TradingPair> = self
            .pairs
            .iter()
            .filter(|p| p.is_active())
            .map(|p| p.clone())
            .collect();
        pairs.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        pairs
    }

    pub fn active_currencies(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .currencies
            .iter()
            .filter(|c| c.is_active)
            .map(|c| c.symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Seed the default spot markets.
    pub fn seed_default_markets(&self) {
        let usdt = Currency::new("USDT", "Tether USD", 8, true);
        let markets = [
            ("BTC", "Bitcoin", Decimal::new(1, 4)),
            ("ETH", "Ethereum", Decimal::new(1, 3)),
            ("BNB", "BNB", Decimal::new(1, 2)),
            ("SOL", "Solana", Decimal::new(1, 2)),
        ];
        self.add_currency(usdt.clone());
        for (symbol, name, min_size) in markets {
            let base = Currency::new(symbol, name, 8, true);
            self.add_currency(base.clone());
            let pair = TradingPair::new(
                base,
                usdt.clone(),
                MarketType::Spot,
                min_size,
                Decimal::new(1000, 0),
                2,
                6,
                Decimal::new(1, 3),
                Decimal::new(1, 3),
            )
            .expect("seed pairs are well-formed");
            self.add_pair(pair);
        }
    }
}

impl Default for PairRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, TimeInForce};
    use rust_decimal_macros::dec;

    fn order(id: u128, user: u128, status: OrderStatus) -> Order {
        Order {
            id: Uuid::from_u128(id),
            user_id: Uuid::from_u128(user),
            pair_id: Uuid::from_u128(100),
            symbol: "BTC/USDT".to_string(),
            order_type: OrderType::Limit,
            side: OrderSide::Buy,
            status,
            price: Some(dec!(50000)),
            quantity: dec!(1),
            filled: dec!(0),
            average_fill_price: None,
            maker_fee: dec!(0),
            taker_fee: dec!(0),
            total_fee: dec!(0),
            time_in_force: TimeInForce::GTC,
            reserved: dec!(50000),
            reserved_remaining: dec!(50000),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            filled_at: None,
        }
    }

    #[test]
    fn update_rejects_leaving_terminal_status() {
        let store = OrderStore::new();
        store.insert(order(1, 1, OrderStatus::Cancelled));

        let err = store
            .update(Uuid::from_u128(1), |o| o.status = OrderStatus::Pending)
            .unwrap_err();
        assert!(matches!(err, CoreError::Invariant(_)));
    }

    #[test]
    fn open_orders_projection_skips_terminal_and_market_orders() {
        let store = OrderStore::new();
        store.insert(order(1, 1, OrderStatus::Pending));
        store.insert(order(2, 1, OrderStatus::Filled));
        let mut market = order(3, 1, OrderStatus::Pending);
        market.order_type = OrderType::Market;
        store.insert(market);

        let open = store.open_orders_for_pair(Uuid::from_u128(100));
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, Uuid::from_u128(1));
    }

    #[test]
    fn registry_seeds_active_spot_pairs() {
        let registry = PairRegistry::new();
        registry.seed_default_markets();

        let pairs = registry.active_pairs();
        assert_eq!(pairs.len(), 4);
        assert!(registry.get_by_symbol("BTC/USDT").is_some());
        assert!(registry.active_currencies().contains(&"USDT".to_string()));
    }

    #[test]
    fn trade_log_filters_by_user_and_symbol() {
        let log = TradeLog::new();
        log.append(Trade {
            id: Uuid::from_u128(1),
            trade_id: "T-1".to_string(),
            pair_id: Uuid::from_u128(100),
            symbol: "BTC/USDT".to_string(),
            maker_order_id: Uuid::from_u128(10),
            taker_order_id: Uuid::from_u128(11),
            buyer_id: Uuid::from_u128(1),
            seller_id: Uuid::from_u128(2),
            price: dec!(50000),
            quantity: dec!(1),
            total_value: dec!(50000),
            buyer_fee: dec!(50),
            seller_fee: dec!(50),
            created_at: Utc::now(),
        });

        assert_eq!(log.recent_for_symbol("BTC/USDT", 10).len(), 1);
        assert_eq!(log.recent_for_symbol("ETH/USDT", 10).len(), 0);
        assert_eq!(log.trades_for_user(Uuid::from_u128(2), 10).len(), 1);
        assert_eq!(log.trades_for_user(Uuid::from_u128(3), 10).len(), 0);
    }
}
