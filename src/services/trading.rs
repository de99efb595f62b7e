//! Order Service
//!
//! Public boundary for order admission: validation, reservation
//! computation, ledger freeze, persistence and hand-off to the pair's
//! matching writer. A queue slot is acquired before any freeze, so an
//! overloaded pair rejects without touching funds.

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::{Event, EventBus, Topic};
use crate::engine::book::BookSnapshot;
use crate::engine::{MatchResult, PairWriter};
use crate::error::CoreError;
use crate::ledger::Ledger;
use crate::models::{
    CreateOrderRequest, MarketType, Order, OrderResponse, OrderSide, OrderStatus, OrderType,
    TimeInForce, TradingPair,
};
use crate::services::market_data::MarketDataService;
use crate::store::{OrderStore, PairRegistry};
use dashmap::DashMap;

pub struct OrderService {
    registry: Arc<PairRegistry>,
    ledger: Arc<Ledger>,
    store: Arc<OrderStore>,
    bus: Arc<EventBus>,
    market_data: Arc<MarketDataService>,
    writers: DashMap<Uuid, PairWriter>,
    slippage_cap: Decimal,
}

impl OrderService {
    pub fn new(
        registry: Arc<PairRegistry>,
        ledger: Arc<Ledger>,
        store: Arc<OrderStore>,
        bus: Arc<EventBus>,
        market_data: Arc<MarketDataService>,
        slippage_cap: Decimal,
    ) -> Self {
        Self {
            registry,
            ledger,
            store,
            bus,
            market_data,
            writers: DashMap::new(),
            slippage_cap,
        }
    }

    pub fn register_writer(&self, pair_id: Uuid, writer: PairWriter) {
        self.writers.insert(pair_id, writer);
    }

    pub fn writer(&self, pair_id: Uuid) -> Option<PairWriter> {
        self.writers.get(&pair_id).map(|w| w.clone())
    }

    /// Admit and match an order. The returned result carries every fill
    /// reachable within this call; later maker-side fills surface on the
    /// user's order topic.
    pub async fn submit(
        &self,
        user_id: Uuid,
        req: &CreateOrderRequest,
        deadline: Option<Duration>,
    ) -> Result<MatchResult, CoreError> {
        let pair = self
            .registry
            .get(req.pair_id)
            .ok_or_else(|| CoreError::NotFound(format!("trading pair {}", req.pair_id)))?;
        let (quantity, price) = self.validate(&pair, req)?;

        let writer = self
            .writers
            .get(&pair.id)
            .map(|w| w.clone())
            .ok_or_else(|| CoreError::NotFound(format!("no matching writer for {}", pair.symbol)))?;

        // Queue admission happens before the freeze; Overloaded must not
        // leave funds reserved.
        let permit = writer.acquire_slot(deadline).await?;

        let (reserve_currency, reserved) = self.reservation(&pair, req, quantity, price)?;
        let order_id = Uuid::new_v4();
        self.ledger.freeze(
            user_id,
            &reserve_currency,
            reserved,
            &format!("ORDER_{}", order_id),
        )?;

        let now = Utc::now();
        let order = Order {
            id: order_id,
            user_id,
            pair_id: pair.id,
            symbol: pair.symbol.clone(),
            order_type: req.order_type,
            side: req.side,
            status: OrderStatus::Pending,
            price,
            quantity,
            filled: Decimal::ZERO,
            average_fill_price: None,
            maker_fee: Decimal::ZERO,
            taker_fee: Decimal::ZERO,
            total_fee: Decimal::ZERO,
            time_in_force: req.time_in_force,
            reserved,
            reserved_remaining: reserved,
            created_at: now,
            updated_at: now,
            filled_at: None,
        };
        self.store.insert(order.clone());
        self.bus.publish(
            &Topic::UserOrders(user_id),
            Event::Order(OrderResponse::from(&order)),
        );
        self.market_data.record_activity(&pair.symbol);
        counter!("orders_submitted_total").increment(1);
        debug!(
            order = %order_id,
            symbol = %pair.symbol,
            side = %req.side,
            %quantity,
            "order admitted"
        );

        let result = writer.submit(permit, order_id).await?;
        for trade in &result.trades {
            self.market_data
                .record_trade(&trade.symbol, trade.price, trade.quantity);
        }
        info!(
            order = %order_id,
            status = %result.order.status,
            filled = %result.order.filled,
            trades = result.trades.len(),
            "order processed"
        );
        Ok(result)
    }

    /// Cancel synchronously through the pair's writer. Idempotent: a
    /// terminal order is returned as-is.
    pub async fn cancel(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, CoreError> {
        let order = self
            .store
            .get(order_id)
            .ok_or_else(|| CoreError::NotFound(format!("order {}", order_id)))?;
        let writer = self
            .writers
            .get(&order.pair_id)
            .map(|w| w.clone())
            .ok_or_else(|| {
                CoreError::NotFound(format!("no matching writer for {}", order.symbol))
            })?;
        writer.cancel(order_id, user_id).await
    }

    /// Point-in-time book snapshot for a pair.
    pub fn orderbook(&self, symbol: &str, depth: usize) -> Result<BookSnapshot, CoreError> {
        let pair = self
            .registry
            .get_by_symbol(symbol)
            .ok_or_else(|| CoreError::NotFound(format!("trading pair {}", symbol)))?;
        let writer = self
            .writers
            .get(&pair.id)
            .map(|w| w.clone())
            .ok_or_else(|| CoreError::NotFound(format!("no matching writer for {}", symbol)))?;
        let book = writer.engine().book();
        let snapshot = book.read().snapshot(depth);
        Ok(snapshot)
    }

    fn validate(
        &self,
        pair: &TradingPair,
        req: &CreateOrderRequest,
    ) -> Result<(Decimal, Option<Decimal>), CoreError> {
        if !pair.is_active() {
            return Err(CoreError::Validation(format!(
                "trading pair {} is not active",
                pair.symbol
            )));
        }
        if pair.market_type != MarketType::Spot {
            return Err(CoreError::Validation(format!(
                "{} is not a spot market",
                pair.symbol
            )));
        }
        if !req.order_type.is_matchable() {
            // Stop orders have no trigger component yet.
            return Err(CoreError::Validation(format!(
                "order type {} is not supported",
                req.order_type
            )));
        }

        let quantity = pair.quantize_quantity(req.quantity);
        if quantity <= Decimal::ZERO {
            return Err(CoreError::Validation(format!(
                "quantity must be positive, got {}",
                req.quantity
            )));
        }
        if quantity < pair.min_order_size || quantity > pair.max_order_size {
            return Err(CoreError::Validation(format!(
                "quantity {} outside [{}, {}]",
                quantity, pair.min_order_size, pair.max_order_size
            )));
        }

        let price = match req.order_type {
            OrderType::Limit => {
                let price = req
                    .price
                    .ok_or_else(|| CoreError::Validation("limit order requires a price".into()))?;
                let price = pair.quantize_price(price);
                if price <= Decimal::ZERO {
                    return Err(CoreError::Validation(format!(
                        "price must be positive, got {}",
                        price
                    )));
                }
                Some(price)
            }
            // Market orders ignore any client-sent price.
            _ => None,
        };
        Ok((quantity, price))
    }

    fn reservation(
        &self,
        pair: &TradingPair,
        req: &CreateOrderRequest,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<(String, Decimal), CoreError> {
        match (req.side, req.order_type) {
            (OrderSide::Buy, OrderType::Limit) => {
                let price = price.ok_or_else(|| {
                    CoreError::Invariant("validated limit order lost its price".into())
                })?;
                Ok((
                    pair.quote_currency.symbol.clone(),
                    pair.quantize_quote(quantity * price),
                ))
            }
            (OrderSide::Buy, OrderType::Market) => {
                // Upper bound at the deepest ask level needed for the full
                // quantity, plus the slippage cap; an empty ask side is an
                // explicit rejection.
                let ask = self
                    .marketable_price(pair, OrderSide::Buy, quantity)?
                    .ok_or_else(|| {
                        CoreError::NoLiquidity(format!("no asks on {}", pair.symbol))
                    })?;
                let bound = quantity * ask * (Decimal::ONE + self.slippage_cap);
                Ok((pair.quote_currency.symbol.clone(), pair.quantize_quote(bound)))
            }
            (OrderSide::Sell, OrderType::Market) => {
                if matches!(req.time_in_force, TimeInForce::IOC | TimeInForce::FOK)
                    && self.best_bid(pair)?.is_none()
                {
                    return Err(CoreError::NoLiquidity(format!(
                        "no bids on {}",
                        pair.symbol
                    )));
                }
                Ok((pair.base_currency.symbol.clone(), quantity))
            }
            (OrderSide::Sell, _) => Ok((pair.base_currency.symbol.clone(), quantity)),
            _ => Err(CoreError::Validation(format!(
                "order type {} is not supported",
                req.order_type
            ))),
        }
    }

    fn marketable_price(
        &self,
        pair: &TradingPair,
        taker_side: OrderSide,
        quantity: Decimal,
    ) -> Result<Option<Decimal>, CoreError> {
        let writer = self
            .writers
            .get(&pair.id)
            .map(|w| w.clone())
            .ok_or_else(|| {
                CoreError::NotFound(format!("no matching writer for {}", pair.symbol))
            })?;
        let book = writer.engine().book();
        let price = book.read().marketable_price(taker_side, quantity);
        Ok(price)
    }

    fn best_bid(&self, pair: &TradingPair) -> Result<Option<Decimal>, CoreError> {
        let writer = self
            .writers
            .get(&pair.id)
            .map(|w| w.clone())
            .ok_or_else(|| {
                CoreError::NotFound(format!("no matching writer for {}", pair.symbol))
            })?;
        let book = writer.engine().book();
        let bid = book.read().best_bid();
        Ok(bid)
    }
}
