//! Market Data Service
//!
//! Per-pair ticker snapshots with rolling 24h rollups, fed by real trades
//! and by the simulator. Also tracks when a pair last saw real order flow,
//! which the simulator uses to stand down.

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{Event, EventBus, Topic};
use crate::models::MarketData;

const ROLLUP_WINDOW_MILLIS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Default)]
struct TickerState {
    last_price: Decimal,
    bid_price: Option<Decimal>,
    ask_price: Option<Decimal>,
    /// (timestamp millis, price, quantity), pruned to the 24h window.
    window: VecDeque<(i64, Decimal, Decimal)>,
}

impl TickerState {
    fn prune(&mut self, now: i64) {
        while let Some(&(ts, _, _)) = self.window.front() {
            if now - ts > ROLLUP_WINDOW_MILLIS {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn to_market_data(&self, symbol: &str, now: i64) -> MarketData {
        let open = self
            .window
            .front()
            .map(|&(_, price, _)| price)
            .unwrap_or(self.last_price);
        let change = self.last_price - open;
        let change_percent = if open.is_zero() {
            Decimal::ZERO
        } else {
            (change / open * Decimal::from(100)).round_dp(4)
        };
        let high = self
            .window
            .iter()
            .map(|&(_, price, _)| price)
            .max()
            .unwrap_or(self.last_price);
        let low = self
            .window
            .iter()
            .map(|&(_, price, _)| price)
            .min()
            .unwrap_or(self.last_price);
        MarketData {
            symbol: symbol.to_string(),
            price: self.last_price,
            change_24h: change,
            change_percent_24h: change_percent,
            volume_24h: self.window.iter().map(|&(_, _, qty)| qty).sum(),
            high_24h: high,
            low_24h: low,
            bid_price: self.bid_price,
            ask_price: self.ask_price,
            timestamp: now,
        }
    }
}

pub struct MarketDataService {
    tickers: DashMap<String, TickerState>,
    /// Last real order flow per symbol, millis.
    activity: DashMap<String, i64>,
    bus: Arc<EventBus>,
}

impl MarketDataService {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            tickers: DashMap::new(),
            activity: DashMap::new(),
            bus,
        }
    }

    /// Fold a trade (real or synthetic) into the rollup and publish the
    /// refreshed ticker.
    pub fn record_trade(&self, symbol: &str, price: Decimal, quantity: Decimal) {
        let now = Utc::now().timestamp_millis();
        let data = {
            let mut state = self.tickers.entry(symbol.to_string()).or_default();
            state.last_price = price;
            state.window.push_back((now, price, quantity));
            state.prune(now);
            state.to_market_data(symbol, now)
        };
        self.bus
            .publish(&Topic::Price(symbol.to_string()), Event::Price(data));
    }

    /// Refresh the top-of-book fields from an engine or simulator snapshot.
    pub fn update_top_of_book(&self, symbol: &str, bid: Option<Decimal>, ask: Option<Decimal>) {
        let mut state = self.tickers.entry(symbol.to_string()).or_default();
        state.bid_price = bid;
        state.ask_price = ask;
    }

    /// Seed an initial price so a pair has a snapshot before any flow.
    pub fn seed(&self, symbol: &str, price: Decimal) {
        let mut state = self.tickers.entry(symbol.to_string()).or_default();
        if state.last_price.is_zero() {
            state.last_price = price;
        }
    }

    /// Stamp real order flow on a pair.
    pub fn record_activity(&self, symbol: &str) {
        self.activity
            .insert(symbol.to_string(), Utc::now().timestamp_millis());
    }

    pub fn has_recent_activity(&self, symbol: &str, window: Duration) -> bool {
        self.activity.get(symbol).map_or(false, |ts| {
            Utc::now().timestamp_millis() - *ts <= window.as_millis() as i64
        })
    }

    pub fn ticker(&self, symbol: &str) -> Option<MarketData> {
        let mut state = self.tickers.get_mut(symbol)?;
        let now = Utc::now().timestamp_millis();
        state.prune(now);
        if state.last_price.is_zero() {
            return None;
        }
        Some(state.to_market_data(symbol, now))
    }

    pub fn all_tickers(&self) -> Vec<MarketData> {
        let now = Utc::now().timestamp_millis();
        let mut tickers: Vec<MarketData> = self
            .tickers
            .iter_mut()
            .filter_map(|mut entry| {
                entry.prune(now);
                if entry.last_price.is_zero() {
                    None
                } else {
                    let symbol = entry.key().clone();
                    Some(entry.to_market_data(&symbol, now))
                }
            })
            .collect();
        tickers.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        tickers
    }
}
