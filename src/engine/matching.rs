//! Matching Engine
//!
//! Price-time priority matching for one trading pair. `process` runs to
//! completion inside the pair's writer before the next input is accepted,
//! so the book, the pair's order rows and the trade log mutate under a
//! single writer.
//!
//! Execution price is always the resting order's price; price improvement
//! goes to the aggressor. Each fill settles atomically across both
//! participants' wallets through the ledger. A mid-fill ledger invariant
//! aborts the step: prior fills stand (they carry their own journal), the
//! aggressor is rejected, and the book is reconciled to the order store
//! before the next input.

use chrono::Utc;
use metrics::counter;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::bus::{Event, EventBus, Topic};
use crate::engine::book::{BookDelta, OrderBook, RestingOrder};
use crate::error::CoreError;
use crate::ledger::{FillSettlement, Ledger};
use crate::models::{
    Order, OrderResponse, OrderSide, OrderStatus, OrderType, TimeInForce, Trade, TradingPair,
};
use crate::store::{OrderStore, TradeLog};

/// Full book snapshot is republished after this many deltas.
const SNAPSHOT_EVERY_DELTAS: u64 = 64;

/// Outcome of one matching step, returned to the submitter.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub order: Order,
    pub trades: Vec<Trade>,
}

pub struct MatchingEngine {
    pair: TradingPair,
    book: Arc<RwLock<OrderBook>>,
    ledger: Arc<Ledger>,
    store: Arc<OrderStore>,
    trades: Arc<TradeLog>,
    bus: Arc<EventBus>,
    deltas_since_snapshot: AtomicU64,
    book_depth: usize,
}

impl MatchingEngine {
    pub fn new(
        pair: TradingPair,
        book: Arc<RwLock<OrderBook>>,
        ledger: Arc<Ledger>,
        store: Arc<OrderStore>,
        trades: Arc<TradeLog>,
        bus: Arc<EventBus>,
        book_depth: usize,
    ) -> Self {
        Self {
            pair,
            book,
            ledger,
            store,
            trades,
            bus,
            deltas_since_snapshot: AtomicU64::new(0),
            book_depth,
        }
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub fn book(&self) -> Arc<RwLock<OrderBook>> {
        Arc::clone(&self.book)
    }

    /// Match an admitted order against the book. The order must already be
    /// persisted as `pending` with its reservation frozen.
    pub fn process(&self, order_id: Uuid) -> Result<MatchResult, CoreError> {
        let mut order = self
            .store
            .get(order_id)
            .ok_or_else(|| CoreError::NotFound(format!("order {}", order_id)))?;
        if order.status != OrderStatus::Pending {
            return Ok(MatchResult {
                order,
                trades: Vec::new(),
            });
        }

        let mut book = self.book.write();
        let limit = match order.order_type {
            OrderType::Limit => order.price,
            _ => None,
        };

        // FOK: walk the candidates dry before committing anything.
        if order.order_type == OrderType::Limit && order.time_in_force == TimeInForce::FOK {
            let fillable = book.fillable(order.side, limit, order.user_id, order.quantity);
            if fillable < order.quantity {
                drop(book);
                let rejected = self.reject(&order, "full quantity cannot be filled")?;
                return Err(CoreError::NoLiquidity(format!(
                    "FOK order {} can fill only {} of {}",
                    rejected.id, fillable, rejected.quantity
                )));
            }
        }

        let mut fills: Vec<Trade> = Vec::new();
        let mut filled_value = Decimal::ZERO;

        while order.remaining() > Decimal::ZERO {
            let Some(maker) = book.first_eligible(order.side, limit, order.user_id) else {
                break;
            };
            let quantity = order.remaining().min(maker.remaining);
            let price = maker.price;
            let value = self.pair.quantize_quote(price * quantity);

            // A market buy walks only as far as its upper-bound reservation;
            // asks beyond it count as exhausted liquidity, not an invariant.
            if order.order_type == OrderType::Market
                && order.side == OrderSide::Buy
                && value > order.reserved_remaining
            {
                debug!(order = %order.id, "market buy reservation exhausted");
                break;
            }

            let maker_order = self
                .store
                .get(maker.id)
                .ok_or_else(|| CoreError::Invariant(format!("resting order {} lost", maker.id)))?;

            let (buyer_id, seller_id) = match order.side {
                OrderSide::Buy => (order.user_id, maker.user_id),
                OrderSide::Sell => (maker.user_id, order.user_id),
            };
            let taker_fee = self.pair.quantize_quote(value * self.pair.taker_fee);
            let maker_fee = self.pair.quantize_quote(value * self.pair.maker_fee);
            let (buyer_fee, seller_fee) = match order.side {
                OrderSide::Buy => (taker_fee, maker_fee),
                OrderSide::Sell => (maker_fee, taker_fee),
            };

            let trade_ref = format!("TRADE_{}", Uuid::new_v4().simple());
            let settlement = FillSettlement {
                buyer_id,
                seller_id,
                base: self.pair.base_currency.symbol.clone(),
                quote: self.pair.quote_currency.symbol.clone(),
                quantity,
                quote_value: value,
                buyer_fee,
                seller_fee,
                reference: trade_ref.clone(),
            };
            if let Err(e) = self.ledger.settle_fill(&settlement) {
                error!(
                    order = %order.id,
                    maker = %maker.id,
                    error = %e,
                    "invariant alarm: fill settlement failed, aborting match step"
                );
                drop(book);
                // Sync the fills applied so far, then unwind the remainder.
                self.store.update(order.id, |o| *o = order.clone())?;
                self.abort_step(&order)?;
                return Err(e);
            }

            // Aggressor bookkeeping.
            order.filled += quantity;
            filled_value += value;
            order.average_fill_price =
                Some(self.pair.quantize_price(filled_value / order.filled));
            order.taker_fee += taker_fee;
            order.total_fee += taker_fee;
            match order.side {
                OrderSide::Buy => {
                    order.reserved_remaining -= value;
                    // Price improvement over the limit reservation unfreezes
                    // immediately; market buys release the excess at terminal.
                    if let Some(limit_price) = limit {
                        let improvement = self.pair.quantize_quote((limit_price - price) * quantity);
                        if improvement > Decimal::ZERO {
                            self.ledger.unfreeze(
                                order.user_id,
                                &self.pair.quote_currency.symbol,
                                improvement,
                                &format!("ORDER_{}", order.id),
                            );
                            order.reserved_remaining -= improvement;
                        }
                    }
                }
                OrderSide::Sell => {
                    order.reserved_remaining -= quantity;
                }
            }

            // Maker bookkeeping.
            let maker_release = match maker_order.side {
                OrderSide::Buy => value,
                OrderSide::Sell => quantity,
            };
            let updated_maker = self.store.update(maker.id, |m| {
                m.filled += quantity;
                let prior_value = m
                    .average_fill_price
                    .map(|avg| avg * (m.filled - quantity))
                    .unwrap_or(Decimal::ZERO);
                m.average_fill_price =
                    Some(self.pair.quantize_price((prior_value + value) / m.filled));
                m.maker_fee += maker_fee;
                m.total_fee += maker_fee;
                m.reserved_remaining -= maker_release;
                if m.remaining() <= Decimal::ZERO {
                    m.status = OrderStatus::Filled;
                    m.filled_at = Some(Utc::now());
                    m.reserved_remaining = Decimal::ZERO;
                } else {
                    m.status = OrderStatus::PartialFilled;
                }
            })?;

            // Consume the level and broadcast the delta.
            if let Some(delta) = book.reduce(maker_order.side, price, maker.id, quantity) {
                self.publish_delta(&book, delta);
            }

            let trade = Trade {
                id: Uuid::new_v4(),
                trade_id: trade_ref,
                pair_id: self.pair.id,
                symbol: self.pair.symbol.clone(),
                maker_order_id: maker.id,
                taker_order_id: order.id,
                buyer_id,
                seller_id,
                price,
                quantity,
                total_value: value,
                buyer_fee,
                seller_fee,
                created_at: Utc::now(),
            };
            debug!(
                trade = %trade.trade_id,
                symbol = %trade.symbol,
                price = %price,
                quantity = %quantity,
                "trade executed"
            );
            counter!("trades_executed_total").increment(1);
            self.trades.append(trade.clone());
            self.bus.publish(
                &Topic::Trade(self.pair.symbol.clone()),
                Event::Trade(trade.to_event(&order.side.to_string())),
            );
            self.publish_order_update(&updated_maker);
            fills.push(trade);
        }

        // Terminal handling for the aggressor.
        let result = self.finish(&mut book, order, fills)?;
        drop(book);

        self.store.update(result.order.id, |o| *o = result.order.clone())?;
        self.publish_order_update(&result.order);
        if !result.trades.is_empty() {
            counter!("orders_matched_total").increment(1);
        }
        Ok(result)
    }

    /// Cancel a resting or partially filled order. Idempotent: a terminal
    /// order is returned unchanged.
    pub fn cancel(&self, order_id: Uuid, user_id: Uuid) -> Result<Order, CoreError> {
        let order = self
            .store
            .get(order_id)
            .ok_or_else(|| CoreError::NotFound(format!("order {}", order_id)))?;
        if order.user_id != user_id {
            return Err(CoreError::Forbidden(format!(
                "order {} does not belong to caller",
                order_id
            )));
        }
        if order.status.is_terminal() {
            return Ok(order);
        }

        let mut book = self.book.write();
        if let Some(price) = order.price {
            if let Some((_, delta)) = book.remove(order.side, price, order.id) {
                self.publish_delta(&book, delta);
            }
        }
        drop(book);

        if order.reserved_remaining > Decimal::ZERO {
            self.ledger.unfreeze(
                order.user_id,
                self.reserve_currency(&order),
                order.reserved_remaining,
                &format!("ORDER_CANCEL_{}", order.id),
            );
        }
        let updated = self.store.update(order.id, |o| {
            o.status = OrderStatus::Cancelled;
            o.reserved_remaining = Decimal::ZERO;
        })?;
        info!(order = %order.id, symbol = %self.pair.symbol, "order cancelled");
        counter!("orders_cancelled_total").increment(1);
        self.publish_order_update(&updated);
        Ok(updated)
    }

    /// Publish the current book snapshot (periodic cadence and subscriber
    /// joins go through here).
    pub fn publish_snapshot(&self) {
        let book = self.book.read();
        let snapshot = book.snapshot(self.book_depth);
        drop(book);
        self.bus.publish(
            &Topic::Book(self.pair.symbol.clone()),
            Event::BookSnapshot(snapshot),
        );
        self.deltas_since_snapshot.store(0, Ordering::Relaxed);
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn finish(
        &self,
        book: &mut OrderBook,
        mut order: Order,
        fills: Vec<Trade>,
    ) -> Result<MatchResult, CoreError> {
        if order.remaining() <= Decimal::ZERO {
            order.status = OrderStatus::Filled;
            order.filled_at = Some(Utc::now());
            self.release_remainder(&mut order);
            return Ok(MatchResult {
                order,
                trades: fills,
            });
        }

        match (order.order_type, order.time_in_force) {
            (OrderType::Market, _) | (OrderType::Limit, TimeInForce::IOC) => {
                self.release_remainder(&mut order);
                order.status = if order.filled > Decimal::ZERO {
                    OrderStatus::PartialFilled
                } else {
                    OrderStatus::Cancelled
                };
                Ok(MatchResult {
                    order,
                    trades: fills,
                })
            }
            (OrderType::Limit, TimeInForce::GTC) => {
                let price = order
                    .price
                    .ok_or_else(|| CoreError::Invariant("limit order without price".into()))?;
                // A remainder that ties or crosses the opposite best is only
                // reachable through self-trade exclusion; resting it would
                // cross the book.
                let would_cross = match order.side {
                    OrderSide::Buy => book.best_ask().map_or(false, |ask| price >= ask),
                    OrderSide::Sell => book.best_bid().map_or(false, |bid| price <= bid),
                };
                if would_cross {
                    self.release_remainder(&mut order);
                    if order.filled.is_zero() {
                        order.status = OrderStatus::Rejected;
                        let symbol = self.pair.symbol.clone();
                        self.store.update(order.id, |o| *o = order.clone())?;
                        self.publish_order_update(&order);
                        return Err(CoreError::NoLiquidity(format!(
                            "resting order {} would cross the book on {}",
                            order.id, symbol
                        )));
                    }
                    order.status = OrderStatus::Cancelled;
                    return Ok(MatchResult {
                        order,
                        trades: fills,
                    });
                }

                let delta = book.insert(
                    order.side,
                    RestingOrder {
                        id: order.id,
                        user_id: order.user_id,
                        price,
                        remaining: order.remaining(),
                        created_at: order.created_at.timestamp_millis(),
                    },
                );
                self.publish_delta(book, delta);
                order.status = if order.filled > Decimal::ZERO {
                    OrderStatus::PartialFilled
                } else {
                    OrderStatus::Pending
                };
                Ok(MatchResult {
                    order,
                    trades: fills,
                })
            }
            // FOK either filled fully above or was rejected before any fill.
            (OrderType::Limit, TimeInForce::FOK) => Err(CoreError::Invariant(format!(
                "FOK order {} reached terminal handling with remainder",
                order.id
            ))),
            (OrderType::Stop | OrderType::StopLimit, _) => Err(CoreError::Invariant(format!(
                "unmatchable order {} reached the engine",
                order.id
            ))),
        }
    }

    /// Unfreeze whatever is left of the reservation.
    fn release_remainder(&self, order: &mut Order) {
        if order.reserved_remaining > Decimal::ZERO {
            self.ledger.unfreeze(
                order.user_id,
                self.reserve_currency(order),
                order.reserved_remaining,
                &format!("ORDER_{}", order.id),
            );
            order.reserved_remaining = Decimal::ZERO;
        }
    }

    /// Reject an order with zero fills and unwind its freeze.
    fn reject(&self, order: &Order, reason: &str) -> Result<Order, CoreError> {
        info!(order = %order.id, reason, "order rejected");
        if order.reserved_remaining > Decimal::ZERO {
            self.ledger.unfreeze(
                order.user_id,
                self.reserve_currency(order),
                order.reserved_remaining,
                &format!("ORDER_{}", order.id),
            );
        }
        let updated = self.store.update(order.id, |o| {
            o.status = OrderStatus::Rejected;
            o.reserved_remaining = Decimal::ZERO;
        })?;
        self.publish_order_update(&updated);
        Ok(updated)
    }

    /// Abort after a failed settlement: reject the aggressor's remainder and
    /// reconcile the book to the order store.
    fn abort_step(&self, order: &Order) -> Result<(), CoreError> {
        let current = self.store.get(order.id).unwrap_or_else(|| order.clone());
        if current.reserved_remaining > Decimal::ZERO {
            self.ledger.unfreeze(
                current.user_id,
                self.reserve_currency(&current),
                current.reserved_remaining,
                &format!("ORDER_{}", current.id),
            );
        }
        let updated = self.store.update(order.id, |o| {
            o.status = OrderStatus::Rejected;
            o.reserved_remaining = Decimal::ZERO;
        })?;
        self.publish_order_update(&updated);

        let resting = self
            .store
            .open_orders_for_pair(self.pair.id)
            .into_iter()
            .filter_map(|o| {
                o.price.map(|price| {
                    (
                        o.side,
                        RestingOrder {
                            id: o.id,
                            user_id: o.user_id,
                            price,
                            remaining: o.remaining(),
                            created_at: o.created_at.timestamp_millis(),
                        },
                    )
                })
            })
            .collect();
        self.book.write().rebuild(resting);
        self.publish_snapshot();
        Ok(())
    }

    fn reserve_currency<'a>(&'a self, order: &Order) -> &'a str {
        match order.side {
            OrderSide::Buy => &self.pair.quote_currency.symbol,
            OrderSide::Sell => &self.pair.base_currency.symbol,
        }
    }

    fn publish_delta(&self, book: &OrderBook, delta: BookDelta) {
        let topic = Topic::Book(self.pair.symbol.clone());
        self.bus.publish(&topic, Event::BookDelta(delta));
        let n = self.deltas_since_snapshot.fetch_add(1, Ordering::Relaxed) + 1;
        if n >= SNAPSHOT_EVERY_DELTAS {
            self.deltas_since_snapshot.store(0, Ordering::Relaxed);
            self.bus
                .publish(&topic, Event::BookSnapshot(book.snapshot(self.book_depth)));
        }
    }

    fn publish_order_update(&self, order: &Order) {
        self.bus.publish(
            &Topic::UserOrders(order.user_id),
            Event::Order(OrderResponse::from(order)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Currency, MarketType};
    use rust_decimal_macros::dec;

    struct Harness {
        engine: MatchingEngine,
        ledger: Arc<Ledger>,
        store: Arc<OrderStore>,
        trades: Arc<TradeLog>,
        pair: TradingPair,
    }

    fn harness() -> Harness {
        let bus = Arc::new(EventBus::new(256));
        let ledger = Arc::new(Ledger::new(Arc::clone(&bus)));
        let store = Arc::new(OrderStore::new());
        let trades = Arc::new(TradeLog::new());
        let pair = TradingPair::new(
            Currency::new("BTC", "Bitcoin", 8, true),
            Currency::new("USDT", "Tether USD", 8, true),
            MarketType::Spot,
            dec!(0.0001),
            dec!(1000),
            2,
            6,
            dec!(0.001),
            dec!(0.001),
        )
        .unwrap();
        let book = Arc::new(RwLock::new(OrderBook::new(&pair.symbol)));
        let engine = MatchingEngine::new(
            pair.clone(),
            book,
            Arc::clone(&ledger),
            Arc::clone(&store),
            Arc::clone(&trades),
            bus,
            15,
        );
        Harness {
            engine,
            ledger,
            store,
            trades,
            pair,
        }
    }

    impl Harness {
        /// Mimic order-service admission: compute the reservation, freeze it
        /// and persist the order as pending.
        fn admit(
            &self,
            user: Uuid,
            side: OrderSide,
            order_type: OrderType,
            quantity: Decimal,
            price: Option<Decimal>,
            tif: TimeInForce,
        ) -> Uuid {
            let reserved = match (side, order_type) {
                (OrderSide::Buy, OrderType::Limit) => {
                    self.pair.quantize_quote(quantity * price.unwrap())
                }
                (OrderSide::Buy, OrderType::Market) => {
                    let ask = self
                        .engine
                        .book()
                        .read()
                        .marketable_price(OrderSide::Buy, quantity)
                        .expect("market buy test needs an ask");
                    self.pair.quantize_quote(quantity * ask * dec!(1.05))
                }
                (OrderSide::Sell, _) => quantity,
                _ => unreachable!("tests only admit matchable orders"),
            };
            let currency = match side {
                OrderSide::Buy => "USDT",
                OrderSide::Sell => "BTC",
            };
            let id = Uuid::new_v4();
            self.ledger
                .freeze(user, currency, reserved, &format!("ORDER_{}", id))
                .unwrap();
            self.store.insert(Order {
                id,
                user_id: user,
                pair_id: self.pair.id,
                symbol: self.pair.symbol.clone(),
                order_type,
                side,
                status: OrderStatus::Pending,
                price,
                quantity,
                filled: Decimal::ZERO,
                average_fill_price: None,
                maker_fee: Decimal::ZERO,
                taker_fee: Decimal::ZERO,
                total_fee: Decimal::ZERO,
                time_in_force: tif,
                reserved,
                reserved_remaining: reserved,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                filled_at: None,
            });
            id
        }
    }

    fn alice() -> Uuid {
        Uuid::from_u128(0xA11CE)
    }

    fn bob() -> Uuid {
        Uuid::from_u128(0xB0B)
    }

    fn carol() -> Uuid {
        Uuid::from_u128(0xCA501)
    }

    #[test]
    fn crossed_limit_orders_fill_at_resting_price() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(100000), "DEP");
        h.ledger.deposit(bob(), "BTC", dec!(1), "DEP");

        let sell = h.admit(
            bob(),
            OrderSide::Sell,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        let result = h.engine.process(sell).unwrap();
        assert_eq!(result.order.status, OrderStatus::Pending);
        assert!(result.trades.is_empty());

        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        let result = h.engine.process(buy).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.price, dec!(50000));
        assert_eq!(trade.quantity, dec!(1));
        assert_eq!(trade.buyer_fee, dec!(50));
        assert_eq!(trade.seller_fee, dec!(50));
        assert_eq!(result.order.status, OrderStatus::Filled);
        assert_eq!(result.order.average_fill_price, Some(dec!(50000)));

        let alice_usdt = h.ledger.balance(alice(), "USDT");
        assert_eq!(alice_usdt.total, dec!(49950));
        assert_eq!(alice_usdt.frozen, dec!(0));
        assert_eq!(h.ledger.balance(alice(), "BTC").total, dec!(1));

        let bob_btc = h.ledger.balance(bob(), "BTC");
        assert_eq!(bob_btc.total, dec!(0));
        assert_eq!(bob_btc.frozen, dec!(0));
        assert_eq!(h.ledger.balance(bob(), "USDT").total, dec!(49950));

        let maker = h.store.get(sell).unwrap();
        assert_eq!(maker.status, OrderStatus::Filled);
        assert_eq!(maker.maker_fee, dec!(50));
    }

    #[test]
    fn market_buy_walks_the_book_with_price_improvement() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(100000), "DEP");
        h.ledger.deposit(bob(), "BTC", dec!(0.5), "DEP");
        h.ledger.deposit(carol(), "BTC", dec!(1), "DEP");

        let ask1 = h.admit(
            bob(),
            OrderSide::Sell,
            OrderType::Limit,
            dec!(0.5),
            Some(dec!(49900)),
            TimeInForce::GTC,
        );
        h.engine.process(ask1).unwrap();
        let ask2 = h.admit(
            carol(),
            OrderSide::Sell,
            OrderType::Limit,
            dec!(1.0),
            Some(dec!(50100)),
            TimeInForce::GTC,
        );
        h.engine.process(ask2).unwrap();

        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Market,
            dec!(1),
            None,
            TimeInForce::GTC,
        );
        let reserved = h.store.get(buy).unwrap().reserved;
        assert_eq!(reserved, dec!(52605));

        let result = h.engine.process(buy).unwrap();
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].price, dec!(49900));
        assert_eq!(result.trades[0].quantity, dec!(0.5));
        assert_eq!(result.trades[1].price, dec!(50100));
        assert_eq!(result.trades[1].quantity, dec!(0.5));
        assert_eq!(result.order.status, OrderStatus::Filled);
        assert_eq!(result.order.average_fill_price, Some(dec!(50000)));

        // 100_000 - 24_950 - 25_050 - 50 fee, excess reservation released.
        let alice_usdt = h.ledger.balance(alice(), "USDT");
        assert_eq!(alice_usdt.total, dec!(49950));
        assert_eq!(alice_usdt.frozen, dec!(0));
        assert_eq!(h.ledger.balance(alice(), "BTC").total, dec!(1));
    }

    #[test]
    fn fok_without_full_liquidity_rejects_with_no_ledger_change() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(100000), "DEP");
        h.ledger.deposit(bob(), "BTC", dec!(0.3), "DEP");

        let ask = h.admit(
            bob(),
            OrderSide::Sell,
            OrderType::Limit,
            dec!(0.3),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        h.engine.process(ask).unwrap();

        let usdt_before = h.ledger.balance(alice(), "USDT");
        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::FOK,
        );
        let err = h.engine.process(buy).unwrap_err();
        assert!(matches!(err, CoreError::NoLiquidity(_)));

        let order = h.store.get(buy).unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert_eq!(order.filled, dec!(0));
        assert!(h.trades.is_empty());

        let usdt_after = h.ledger.balance(alice(), "USDT");
        assert_eq!(usdt_after.total, usdt_before.total);
        assert_eq!(usdt_after.frozen, dec!(0));

        // The resting ask is untouched.
        assert_eq!(h.engine.book().read().best_ask(), Some(dec!(50000)));
    }

    #[test]
    fn ioc_fills_what_it_can_and_rests_nothing() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(100000), "DEP");
        h.ledger.deposit(bob(), "BTC", dec!(0.3), "DEP");

        let ask = h.admit(
            bob(),
            OrderSide::Sell,
            OrderType::Limit,
            dec!(0.3),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        h.engine.process(ask).unwrap();

        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::IOC,
        );
        let result = h.engine.process(buy).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].quantity, dec!(0.3));
        assert_eq!(result.order.status, OrderStatus::PartialFilled);
        assert_eq!(result.order.filled, dec!(0.3));

        // Nothing rests; remainder reservation released.
        let book = h.engine.book();
        let book = book.read();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
        assert_eq!(h.ledger.balance(alice(), "USDT").frozen, dec!(0));
    }

    #[test]
    fn self_trade_is_prevented_and_tie_is_rejected() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(100000), "DEP");
        h.ledger.deposit(alice(), "BTC", dec!(1), "DEP");

        let sell = h.admit(
            alice(),
            OrderSide::Sell,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        h.engine.process(sell).unwrap();

        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        let err = h.engine.process(buy).unwrap_err();
        assert!(matches!(err, CoreError::NoLiquidity(_)));

        assert!(h.trades.is_empty());
        assert_eq!(h.store.get(buy).unwrap().status, OrderStatus::Rejected);
        assert_eq!(h.store.get(sell).unwrap().status, OrderStatus::Pending);

        // No cross: the buy never rested.
        let book = h.engine.book();
        let book = book.read();
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), Some(dec!(50000)));
        assert!(!book.is_crossed());

        // Reservation fully unwound.
        assert_eq!(h.ledger.balance(alice(), "USDT").frozen, dec!(0));
    }

    #[test]
    fn cancel_of_partially_filled_order_refunds_remainder() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(100000), "DEP");
        h.ledger.deposit(bob(), "BTC", dec!(1), "DEP");

        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(2),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        h.engine.process(buy).unwrap();
        assert_eq!(h.ledger.balance(alice(), "USDT").frozen, dec!(100000));

        let sell = h.admit(
            bob(),
            OrderSide::Sell,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        let result = h.engine.process(sell).unwrap();
        assert_eq!(result.trades.len(), 1);

        let cancelled = h.engine.cancel(buy, alice()).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.filled, dec!(1));

        let alice_usdt = h.ledger.balance(alice(), "USDT");
        assert_eq!(alice_usdt.frozen, dec!(0));
        // 100_000 - 50_000 settled - 50 maker fee.
        assert_eq!(alice_usdt.total, dec!(49950));
        assert_eq!(h.trades.len(), 1);

        let book = h.engine.book();
        assert_eq!(book.read().best_bid(), None);
    }

    #[test]
    fn cancel_is_idempotent_on_terminal_orders() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(100000), "DEP");

        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        h.engine.process(buy).unwrap();

        let first = h.engine.cancel(buy, alice()).unwrap();
        assert_eq!(first.status, OrderStatus::Cancelled);
        let journal_len = h.ledger.journal_for(alice()).len();

        let second = h.engine.cancel(buy, alice()).unwrap();
        assert_eq!(second.status, OrderStatus::Cancelled);
        assert_eq!(h.ledger.journal_for(alice()).len(), journal_len);
    }

    #[test]
    fn cancel_checks_ownership() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(100000), "DEP");

        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        h.engine.process(buy).unwrap();

        let err = h.engine.cancel(buy, bob()).unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[test]
    fn submit_then_cancel_restores_wallets_exactly() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(100000), "DEP");
        let before = h.ledger.snapshot(alice());

        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1.5),
            Some(dec!(49000.55)),
            TimeInForce::GTC,
        );
        h.engine.process(buy).unwrap();
        h.engine.cancel(buy, alice()).unwrap();

        let after = h.ledger.snapshot(alice());
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.currency, a.currency);
            assert_eq!(b.total, a.total);
            assert_eq!(b.frozen, a.frozen);
        }
    }

    #[test]
    fn opposing_limits_produce_exactly_one_trade_at_resting_price() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(100000), "DEP");
        h.ledger.deposit(bob(), "BTC", dec!(2), "DEP");

        let sell = h.admit(
            bob(),
            OrderSide::Sell,
            OrderType::Limit,
            dec!(2),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        h.engine.process(sell).unwrap();
        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1.2),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        let result = h.engine.process(buy).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].price, dec!(50000));
        assert_eq!(result.trades[0].quantity, dec!(1.2));

        let maker = h.store.get(sell).unwrap();
        assert_eq!(maker.status, OrderStatus::PartialFilled);
        assert_eq!(maker.filled + result.order.filled, dec!(2.4));
    }

    #[test]
    fn price_time_priority_fills_older_maker_first() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(200000), "DEP");
        h.ledger.deposit(bob(), "BTC", dec!(1), "DEP");
        h.ledger.deposit(carol(), "BTC", dec!(1), "DEP");

        let first = h.admit(
            bob(),
            OrderSide::Sell,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        h.engine.process(first).unwrap();
        let second = h.admit(
            carol(),
            OrderSide::Sell,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        h.engine.process(second).unwrap();

        let buy = h.admit(
            alice(),
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50000)),
            TimeInForce::GTC,
        );
        let result = h.engine.process(buy).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].maker_order_id, first);
        assert_eq!(h.store.get(second).unwrap().status, OrderStatus::Pending);
    }

    #[test]
    fn conservation_holds_across_a_burst_of_fills() {
        let h = harness();
        h.ledger.deposit(alice(), "USDT", dec!(500000), "DEP");
        h.ledger.deposit(bob(), "BTC", dec!(5), "DEP");
        let usdt_supply = h.ledger.total_supply("USDT");
        let btc_supply = h.ledger.total_supply("BTC");

        for i in 0..5 {
            let price = dec!(50000) + Decimal::from(i * 10);
            let sell = h.admit(
                bob(),
                OrderSide::Sell,
                OrderType::Limit,
                dec!(1),
                Some(price),
                TimeInForce::GTC,
            );
            h.engine.process(sell).unwrap();
            let buy = h.admit(
                alice(),
                OrderSide::Buy,
                OrderType::Limit,
                dec!(1),
                Some(price),
                TimeInForce::GTC,
            );
            h.engine.process(buy).unwrap();
        }

        assert_eq!(h.trades.len(), 5);
        assert_eq!(h.ledger.total_supply("USDT"), usdt_supply);
        assert_eq!(h.ledger.total_supply("BTC"), btc_supply);
    }
}
