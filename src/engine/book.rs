//! Order Book
//!
//! Per-pair price-level aggregation. Bids sort descending, asks ascending;
//! each level holds a FIFO queue of resting orders, so price-time priority
//! falls out of the structure. The book is owned by the pair's matching
//! writer; readers get seq-numbered point-in-time snapshots.
//!
//! Every mutation bumps the sequence number and yields a level delta for the
//! bus. A level whose quantity reaches zero is removed.

use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use crate::models::OrderSide;

/// Price level with 8 decimal precision for exact comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceLevel(i64);

impl PriceLevel {
    const SCALE: i64 = 100_000_000;

    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = price * Decimal::from(Self::SCALE);
        let truncated = scaled.trunc();
        let value = truncated.mantissa() / 10i128.pow(truncated.scale());
        PriceLevel(value as i64)
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(Self::SCALE)
    }
}

impl Ord for PriceLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An order resting on the book. Only limit orders rest.
#[derive(Debug, Clone)]
pub struct RestingOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub price: Decimal,
    pub remaining: Decimal,
    pub created_at: i64,
}

/// Aggregated view of one price level.
#[derive(Debug, Clone, Serialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub count: u32,
}

/// Level delta emitted after each mutation. `quantity == 0` means the level
/// was removed.
#[derive(Debug, Clone, Serialize)]
pub struct BookDelta {
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub count: u32,
    pub seq: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub seq: u64,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: i64,
}

pub struct OrderBook {
    symbol: String,
    bids: BTreeMap<PriceLevel, VecDeque<RestingOrder>>,
    asks: BTreeMap<PriceLevel, VecDeque<RestingOrder>>,
    seq: u64,
}

impl OrderBook {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            seq: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    fn side(&self, side: OrderSide) -> &BTreeMap<PriceLevel, VecDeque<RestingOrder>> {
        match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: OrderSide) -> &mut BTreeMap<PriceLevel, VecDeque<RestingOrder>> {
        match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        }
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().map(|p| p.to_decimal())
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().map(|p| p.to_decimal())
    }

    /// No-cross invariant: strictly `best_bid < best_ask` whenever both
    /// sides are populated.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// Rest an order at its price level.
    pub fn insert(&mut self, side: OrderSide, order: RestingOrder) -> BookDelta {
        let level = PriceLevel::from_decimal(order.price);
        let price = order.price;
        self.side_mut(side)
            .entry(level)
            .or_insert_with(VecDeque::new)
            .push_back(order);
        self.bump(side, level, price)
    }

    /// Remove a resting order (cancel path).
    pub fn remove(
        &mut self,
        side: OrderSide,
        price: Decimal,
        order_id: Uuid,
    ) -> Option<(RestingOrder, BookDelta)> {
        let level = PriceLevel::from_decimal(price);
        let book = self.side_mut(side);
        let queue = book.get_mut(&level)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        let removed = queue.remove(pos)?;
        if queue.is_empty() {
            book.remove(&level);
        }
        let delta = self.bump(side, level, price);
        Some((removed, delta))
    }

    /// Consume quantity from a resting order after a fill. The order is
    /// popped when fully consumed and its level dropped when empty.
    pub fn reduce(
        &mut self,
        side: OrderSide,
        price: Decimal,
        order_id: Uuid,
        quantity: Decimal,
    ) -> Option<BookDelta> {
        let level = PriceLevel::from_decimal(price);
        let book = self.side_mut(side);
        let queue = book.get_mut(&level)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        queue[pos].remaining -= quantity;
        if queue[pos].remaining <= Decimal::ZERO {
            queue.remove(pos);
        }
        if queue.is_empty() {
            book.remove(&level);
        }
        Some(self.bump(side, level, price))
    }

    /// Best eligible resting order for an aggressor: price-time priority,
    /// excluding the aggressor's own orders (self-trade prevention by
    /// exclusion) and honoring the aggressor's limit price.
    pub fn first_eligible(
        &self,
        taker_side: OrderSide,
        limit: Option<Decimal>,
        exclude_user: Uuid,
    ) -> Option<RestingOrder> {
        let maker_side = taker_side.opposite();
        let mut found: Option<RestingOrder> = None;
        self.walk_eligible(maker_side, taker_side, limit, exclude_user, |order| {
            found = Some(order.clone());
            false
        });
        found
    }

    /// Price of the deepest opposite level needed to cover `quantity` — the
    /// basis for a market order's upper-bound reservation. Falls back to the
    /// worst populated level when depth is insufficient.
    pub fn marketable_price(&self, taker_side: OrderSide, quantity: Decimal) -> Option<Decimal> {
        let maker_side = taker_side.opposite();
        let book = self.side(maker_side);
        let levels: Box<dyn Iterator<Item = (&PriceLevel, &VecDeque<RestingOrder>)>> =
            match maker_side {
                OrderSide::Sell => Box::new(book.iter()),
                OrderSide::Buy => Box::new(book.iter().rev()),
            };
        let mut cumulative = Decimal::ZERO;
        let mut worst = None;
        for (level, queue) in levels {
            worst = Some(level.to_decimal());
            cumulative += queue.iter().map(|o| o.remaining).sum::<Decimal>();
            if cumulative >= quantity {
                break;
            }
        }
        worst
    }

    /// Eligible quantity up to `needed` — the FOK dry run.
    pub fn fillable(
        &self,
        taker_side: OrderSide,
        limit: Option<Decimal>,
        exclude_user: Uuid,
        needed: Decimal,
    ) -> Decimal {
        let maker_side = taker_side.opposite();
        let mut total = Decimal::ZERO;
        self.walk_eligible(maker_side, taker_side, limit, exclude_user, |order| {
            total += order.remaining;
            total < needed
        });
        total.min(needed)
    }

    fn walk_eligible<'a, F>(
        &'a self,
        maker_side: OrderSide,
        taker_side: OrderSide,
        limit: Option<Decimal>,
        exclude_user: Uuid,
        mut visit: F,
    ) where
        F: FnMut(&'a RestingOrder) -> bool,
    {
        let book = self.side(maker_side);
        let levels: Box<dyn Iterator<Item = (&PriceLevel, &VecDeque<RestingOrder>)>> =
            match maker_side {
                OrderSide::Sell => Box::new(book.iter()),
                OrderSide::Buy => Box::new(book.iter().rev()),
            };
        for (level, queue) in levels {
            let price = level.to_decimal();
            if let Some(limit) = limit {
                let within = match taker_side {
                    OrderSide::Buy => price <= limit,
                    OrderSide::Sell => price >= limit,
                };
                if !within {
                    return;
                }
            }
            for order in queue {
                if order.user_id == exclude_user {
                    continue;
                }
                if !visit(order) {
                    return;
                }
            }
        }
    }

    pub fn top_n(&self, side: OrderSide, n: usize) -> Vec<BookLevel> {
        let book = self.side(side);
        let levels: Box<dyn Iterator<Item = (&PriceLevel, &VecDeque<RestingOrder>)>> = match side {
            OrderSide::Buy => Box::new(book.iter().rev()),
            OrderSide::Sell => Box::new(book.iter()),
        };
        levels
            .take(n)
            .map(|(level, queue)| BookLevel {
                price: level.to_decimal(),
                quantity: queue.iter().map(|o| o.remaining).sum(),
                count: queue.len() as u32,
            })
            .collect()
    }

    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            symbol: self.symbol.clone(),
            seq: self.seq,
            bids: self.top_n(OrderSide::Buy, depth),
            asks: self.top_n(OrderSide::Sell, depth),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Rebuild the book from the authoritative order store after an aborted
    /// matching step.
    pub fn rebuild(&mut self, resting: Vec<(OrderSide, RestingOrder)>) {
        self.bids.clear();
        self.asks.clear();
        for (side, order) in resting {
            let level = PriceLevel::from_decimal(order.price);
            self.side_mut(side)
                .entry(level)
                .or_insert_with(VecDeque::new)
                .push_back(order);
        }
        // Queues rebuild in created_at order for time priority.
        for queue in self.bids.values_mut().chain(self.asks.values_mut()) {
            queue
                .make_contiguous()
                .sort_by_key(|o| (o.created_at, o.id));
        }
        self.seq += 1;
    }

    fn bump(&mut self, side: OrderSide, level: PriceLevel, price: Decimal) -> BookDelta {
        self.seq += 1;
        let (quantity, count) = match self.side(side).get(&level) {
            Some(queue) => (
                queue.iter().map(|o| o.remaining).sum(),
                queue.len() as u32,
            ),
            None => (Decimal::ZERO, 0),
        };
        BookDelta {
            symbol: self.symbol.clone(),
            side,
            price,
            quantity,
            count,
            seq: self.seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn resting(id: u128, user: u128, price: Decimal, qty: Decimal, ts: i64) -> RestingOrder {
        RestingOrder {
            id: Uuid::from_u128(id),
            user_id: Uuid::from_u128(user),
            price,
            remaining: qty,
            created_at: ts,
        }
    }

    #[test]
    fn price_level_round_trips() {
        let price = dec!(50123.45678901);
        let level = PriceLevel::from_decimal(price);
        assert_eq!(level.to_decimal(), dec!(50123.45678901));
    }

    #[test]
    fn best_prices_and_no_cross() {
        let mut book = OrderBook::new("BTC/USDT");
        book.insert(OrderSide::Buy, resting(1, 1, dec!(49900), dec!(1), 1));
        book.insert(OrderSide::Buy, resting(2, 1, dec!(49800), dec!(2), 2));
        book.insert(OrderSide::Sell, resting(3, 2, dec!(50100), dec!(1), 3));

        assert_eq!(book.best_bid(), Some(dec!(49900)));
        assert_eq!(book.best_ask(), Some(dec!(50100)));
        assert!(!book.is_crossed());

        book.insert(OrderSide::Sell, resting(4, 2, dec!(49850), dec!(1), 4));
        assert!(book.is_crossed());
    }

    #[test]
    fn insert_emits_aggregated_delta() {
        let mut book = OrderBook::new("BTC/USDT");
        let d1 = book.insert(OrderSide::Buy, resting(1, 1, dec!(49900), dec!(1), 1));
        assert_eq!(d1.quantity, dec!(1));
        assert_eq!(d1.count, 1);
        assert_eq!(d1.seq, 1);

        let d2 = book.insert(OrderSide::Buy, resting(2, 2, dec!(49900), dec!(0.5), 2));
        assert_eq!(d2.quantity, dec!(1.5));
        assert_eq!(d2.count, 2);
        assert_eq!(d2.seq, 2);
    }

    #[test]
    fn reduce_pops_filled_orders_and_drops_empty_levels() {
        let mut book = OrderBook::new("BTC/USDT");
        book.insert(OrderSide::Sell, resting(1, 1, dec!(50000), dec!(1), 1));

        let delta = book
            .reduce(OrderSide::Sell, dec!(50000), Uuid::from_u128(1), dec!(0.4))
            .unwrap();
        assert_eq!(delta.quantity, dec!(0.6));
        assert_eq!(delta.count, 1);

        let delta = book
            .reduce(OrderSide::Sell, dec!(50000), Uuid::from_u128(1), dec!(0.6))
            .unwrap();
        assert_eq!(delta.quantity, dec!(0));
        assert_eq!(delta.count, 0);
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn first_eligible_respects_price_time_priority() {
        let mut book = OrderBook::new("BTC/USDT");
        book.insert(OrderSide::Sell, resting(1, 1, dec!(50100), dec!(1), 1));
        book.insert(OrderSide::Sell, resting(2, 2, dec!(50000), dec!(1), 5));
        book.insert(OrderSide::Sell, resting(3, 3, dec!(50000), dec!(1), 2));

        // Best price wins; FIFO within the level (id 2 was queued first).
        let best = book
            .first_eligible(OrderSide::Buy, None, Uuid::from_u128(99))
            .unwrap();
        assert_eq!(best.id, Uuid::from_u128(2));
    }

    #[test]
    fn first_eligible_excludes_own_orders() {
        let mut book = OrderBook::new("BTC/USDT");
        book.insert(OrderSide::Sell, resting(1, 7, dec!(50000), dec!(1), 1));

        assert!(book
            .first_eligible(OrderSide::Buy, None, Uuid::from_u128(7))
            .is_none());
        let other = book
            .first_eligible(OrderSide::Buy, None, Uuid::from_u128(8))
            .unwrap();
        assert_eq!(other.id, Uuid::from_u128(1));
    }

    #[test]
    fn first_eligible_honors_limit_price() {
        let mut book = OrderBook::new("BTC/USDT");
        book.insert(OrderSide::Sell, resting(1, 1, dec!(50100), dec!(1), 1));

        assert!(book
            .first_eligible(OrderSide::Buy, Some(dec!(50000)), Uuid::from_u128(9))
            .is_none());
        assert!(book
            .first_eligible(OrderSide::Buy, Some(dec!(50100)), Uuid::from_u128(9))
            .is_some());
    }

    #[test]
    fn marketable_price_walks_to_the_needed_depth() {
        let mut book = OrderBook::new("BTC/USDT");
        book.insert(OrderSide::Sell, resting(1, 1, dec!(49900), dec!(0.5), 1));
        book.insert(OrderSide::Sell, resting(2, 2, dec!(50100), dec!(1.0), 2));

        assert_eq!(
            book.marketable_price(OrderSide::Buy, dec!(0.5)),
            Some(dec!(49900))
        );
        assert_eq!(
            book.marketable_price(OrderSide::Buy, dec!(1)),
            Some(dec!(50100))
        );
        // Depth exhausted: fall back to the worst level.
        assert_eq!(
            book.marketable_price(OrderSide::Buy, dec!(10)),
            Some(dec!(50100))
        );
        assert_eq!(book.marketable_price(OrderSide::Sell, dec!(1)), None);
    }

    #[test]
    fn fillable_sums_until_needed() {
        let mut book = OrderBook::new("BTC/USDT");
        book.insert(OrderSide::Sell, resting(1, 1, dec!(50000), dec!(0.3), 1));
        book.insert(OrderSide::Sell, resting(2, 2, dec!(50100), dec!(0.5), 2));
        book.insert(OrderSide::Sell, resting(3, 3, dec!(50200), dec!(5), 3));

        let exclude = Uuid::from_u128(9);
        assert_eq!(
            book.fillable(OrderSide::Buy, Some(dec!(50100)), exclude, dec!(1)),
            dec!(0.8)
        );
        assert_eq!(
            book.fillable(OrderSide::Buy, None, exclude, dec!(1)),
            dec!(1)
        );
    }

    #[test]
    fn top_n_orders_by_best_price_first() {
        let mut book = OrderBook::new("BTC/USDT");
        book.insert(OrderSide::Buy, resting(1, 1, dec!(49800), dec!(1), 1));
        book.insert(OrderSide::Buy, resting(2, 1, dec!(49900), dec!(1), 2));
        book.insert(OrderSide::Sell, resting(3, 2, dec!(50100), dec!(1), 3));
        book.insert(OrderSide::Sell, resting(4, 2, dec!(50000), dec!(1), 4));

        let bids = book.top_n(OrderSide::Buy, 10);
        assert_eq!(bids[0].price, dec!(49900));
        assert_eq!(bids[1].price, dec!(49800));

        let asks = book.top_n(OrderSide::Sell, 10);
        assert_eq!(asks[0].price, dec!(50000));
        assert_eq!(asks[1].price, dec!(50100));
    }

    #[test]
    fn rebuild_restores_time_priority() {
        let mut book = OrderBook::new("BTC/USDT");
        book.rebuild(vec![
            (OrderSide::Sell, resting(1, 1, dec!(50000), dec!(1), 10)),
            (OrderSide::Sell, resting(2, 2, dec!(50000), dec!(1), 5)),
        ]);
        let best = book
            .first_eligible(OrderSide::Buy, None, Uuid::from_u128(9))
            .unwrap();
        assert_eq!(best.id, Uuid::from_u128(2));
    }
}
