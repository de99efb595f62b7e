//! Market Simulator
//!
//! Background producer of synthetic price and book updates for pairs with
//! no real participant flow, so the public surface has movement during
//! development. Prices follow a bounded random walk; book levels fan out
//! around the walked price. The simulator publishes through the bus and
//! never touches the ledger or the matching engine. It stands down for any
//! pair that saw real order flow recently.

use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::bus::{Event, EventBus, Topic};
use crate::engine::book::{BookLevel, BookSnapshot};
use crate::services::kline::KlineService;
use crate::services::market_data::MarketDataService;
use crate::store::PairRegistry;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub price_interval: Duration,
    pub book_interval: Duration,
    pub depth: usize,
    /// Stand down for a pair whose last real flow is younger than this.
    pub quiet_window: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            price_interval: Duration::from_secs(5),
            book_interval: Duration::from_secs(2),
            depth: 15,
            quiet_window: Duration::from_secs(60),
        }
    }
}

pub struct MarketSimulator {
    registry: Arc<PairRegistry>,
    market_data: Arc<MarketDataService>,
    klines: Arc<KlineService>,
    bus: Arc<EventBus>,
    config: SimulatorConfig,
}

impl MarketSimulator {
    pub fn new(
        registry: Arc<PairRegistry>,
        market_data: Arc<MarketDataService>,
        klines: Arc<KlineService>,
        bus: Arc<EventBus>,
        config: SimulatorConfig,
    ) -> Self {
        Self {
            registry,
            market_data,
            klines,
            bus,
            config,
        }
    }

    /// Seed base prices and spawn the price and book loops.
    pub fn start(self: Arc<Self>) {
        for pair in self.registry.active_pairs() {
            let base = base_price(&pair.symbol);
            // +-5% initial variation so restarts do not all look identical.
            let variation = Decimal::from_f64(rand::thread_rng().gen_range(-0.05..0.05))
                .unwrap_or(Decimal::ZERO);
            self.market_data
                .seed(&pair.symbol, base * (Decimal::ONE + variation));
        }
        info!(
            price_interval = ?self.config.price_interval,
            book_interval = ?self.config.book_interval,
            depth = self.config.depth,
            "market simulator started"
        );

        let price_sim = Arc::clone(&self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(price_sim.config.price_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                price_sim.price_tick();
            }
        });

        let book_sim = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(book_sim.config.book_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                book_sim.book_tick();
            }
        });
    }

    fn price_tick(&self) {
        let mut rng = rand::thread_rng();
        for pair in self.registry.active_pairs() {
            if self
                .market_data
                .has_recent_activity(&pair.symbol, self.config.quiet_window)
            {
                debug!(symbol = %pair.symbol, "simulator standing down, pair has real flow");
                continue;
            }
            let Some(ticker) = self.market_data.ticker(&pair.symbol) else {
                continue;
            };
            let price = pair.quantize_price(walk_price(ticker.price, &mut rng));
            let quantity = pair
                .quantize_quantity(Decimal::from_f64(rng.gen_range(0.1..5.0)).unwrap_or(Decimal::ONE));
            self.market_data.record_trade(&pair.symbol, price, quantity);
            self.klines.record_trade(
                &pair.symbol,
                price,
                quantity,
                chrono::Utc::now().timestamp_millis(),
            );
        }
    }

    fn book_tick(&self) {
        let mut rng = rand::thread_rng();
        for pair in self.registry.active_pairs() {
            if self
                .market_data
                .has_recent_activity(&pair.symbol, self.config.quiet_window)
            {
                continue;
            }
            let Some(ticker) = self.market_data.ticker(&pair.symbol) else {
                continue;
            };
            let (bids, asks) = synthetic_book(ticker.price, self.config.depth, &mut rng);
            self.market_data.update_top_of_book(
                &pair.symbol,
                bids.first().map(|l| l.price),
                asks.first().map(|l| l.price),
            );
            let snapshot = BookSnapshot {
                symbol: pair.symbol.clone(),
                seq: 0,
                bids,
                asks,
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            self.bus.publish(
                &Topic::Book(pair.symbol.clone()),
                Event::BookSnapshot(snapshot),
            );
        }
    }
}

/// Common crypto reference prices keep the development surface plausible.
fn base_price(symbol: &str) -> Decimal {
    if symbol.contains("BTC") {
        Decimal::new(50000, 0)
    } else if symbol.contains("ETH") {
        Decimal::new(3000, 0)
    } else if symbol.contains("BNB") {
        Decimal::new(400, 0)
    } else if symbol.contains("SOL") {
        Decimal::new(100, 0)
    } else {
        Decimal::ONE
    }
}

/// One random-walk step, bounded to +-0.1%.
fn walk_price<R: Rng>(price: Decimal, rng: &mut R) -> Decimal {
    let step = Decimal::from_f64(rng.gen_range(-0.001..0.001)).unwrap_or(Decimal::ZERO);
    price * (Decimal::ONE + step)
}

/// Synthetic depth around a base price: offsets widen with the level index,
/// quantities and order counts follow the original generator's ranges.
fn synthetic_book<R: Rng>(
    base_price: Decimal,
    depth: usize,
    rng: &mut R,
) -> (Vec<BookLevel>, Vec<BookLevel>) {
    let mut bids = Vec::with_capacity(depth);
    let mut asks = Vec::with_capacity(depth);
    for i in 0..depth {
        let spread = Decimal::from_f64(rng.gen_range(0.0001..0.0005)).unwrap_or(Decimal::ZERO);
        let offset = base_price * spread * Decimal::from(i as i64 + 1);
        let quantity = Decimal::from_f64(rng.gen_range(0.1..5.0)).unwrap_or(Decimal::ONE);
        let count = rng.gen_range(1..=10);
        bids.push(BookLevel {
            price: (base_price - offset).round_dp(2),
            quantity: quantity.round_dp(6),
            count,
        });

        let spread = Decimal::from_f64(rng.gen_range(0.0001..0.0005)).unwrap_or(Decimal::ZERO);
        let offset = base_price * spread * Decimal::from(i as i64 + 1);
        let quantity = Decimal::from_f64(rng.gen_range(0.1..5.0)).unwrap_or(Decimal::ONE);
        asks.push(BookLevel {
            price: (base_price + offset).round_dp(2),
            quantity: quantity.round_dp(6),
            count: rng.gen_range(1..=10),
        });
    }
    (bids, asks)
}
