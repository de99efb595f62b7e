//! K-line Service
//!
//! OHLCV candle aggregation from trade events, per (pair, interval).

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KlineInterval {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl KlineInterval {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(KlineInterval::M1),
            "5m" => Some(KlineInterval::M5),
            "15m" => Some(KlineInterval::M15),
            "1h" => Some(KlineInterval::H1),
            "4h" => Some(KlineInterval::H4),
            "1d" => Some(KlineInterval::D1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KlineInterval::M1 => "1m",
            KlineInterval::M5 => "5m",
            KlineInterval::M15 => "15m",
            KlineInterval::H1 => "1h",
            KlineInterval::H4 => "4h",
            KlineInterval::D1 => "1d",
        }
    }

    pub fn millis(&self) -> i64 {
        match self {
            KlineInterval::M1 => 60_000,
            KlineInterval::M5 => 300_000,
            KlineInterval::M15 => 900_000,
            KlineInterval::H1 => 3_600_000,
            KlineInterval::H4 => 14_400_000,
            KlineInterval::D1 => 86_400_000,
        }
    }

    pub fn all() -> [KlineInterval; 6] {
        [
            KlineInterval::M1,
            KlineInterval::M5,
            KlineInterval::M15,
            KlineInterval::H1,
            KlineInterval::H4,
            KlineInterval::D1,
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Keep at most this many candles per (symbol, interval).
const MAX_CANDLES: usize = 1000;

pub struct KlineService {
    candles: DashMap<(String, KlineInterval), BTreeMap<i64, Candle>>,
}

impl KlineService {
    pub fn new() -> Self {
        Self {
            candles: DashMap::new(),
        }
    }

    /// Fold one trade into every interval's current candle.
    pub fn record_trade(&self, symbol: &str, price: Decimal, quantity: Decimal, ts_millis: i64) {
        for interval in KlineInterval::all() {
            let bucket = ts_millis - ts_millis.rem_euclid(interval.millis());
            let mut series = self
                .candles
                .entry((symbol.to_string(), interval))
                .or_default();
            series
                .entry(bucket)
                .and_modify(|c| {
                    c.high = c.high.max(price);
                    c.low = c.low.min(price);
                    c.close = price;
                    c.volume += quantity;
                })
                .or_insert(Candle {
                    open_time: bucket,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: quantity,
                });
            while series.len() > MAX_CANDLES {
                let oldest = *series.keys().next().expect("non-empty series");
                series.remove(&oldest);
            }
        }
    }

    /// Most recent candles, oldest first.
    pub fn klines(&self, symbol: &str, interval: KlineInterval, limit: usize) -> Vec<Candle> {
        let Some(series) = self.candles.get(&(symbol.to_string(), interval)) else {
            return Vec::new();
        };
        let mut rows: Vec<Candle> = series.values().rev().take(limit).cloned().collect();
        rows.reverse();
        rows
    }
}

impl Default for KlineService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trades_in_one_bucket_fold_into_one_candle() {
        let svc = KlineService::new();
        let base = 1_700_000_040_000; // some minute boundary + 40s offset
        svc.record_trade("BTC/USDT", dec!(50000), dec!(1), base);
        svc.record_trade("BTC/USDT", dec!(50500), dec!(0.5), base + 1000);
        svc.record_trade("BTC/USDT", dec!(49900), dec!(0.25), base + 2000);

        let rows = svc.klines("BTC/USDT", KlineInterval::M1, 10);
        assert_eq!(rows.len(), 1);
        let candle = &rows[0];
        assert_eq!(candle.open, dec!(50000));
        assert_eq!(candle.high, dec!(50500));
        assert_eq!(candle.low, dec!(49900));
        assert_eq!(candle.close, dec!(49900));
        assert_eq!(candle.volume, dec!(1.75));
    }

    #[test]
    fn trades_across_buckets_split_candles() {
        let svc = KlineService::new();
        let minute = KlineInterval::M1.millis();
        let base = 1_700_000_000_000 - 1_700_000_000_000 % minute;
        svc.record_trade("BTC/USDT", dec!(50000), dec!(1), base);
        svc.record_trade("BTC/USDT", dec!(50100), dec!(1), base + minute);

        let rows = svc.klines("BTC/USDT", KlineInterval::M1, 10);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].close, dec!(50000));
        assert_eq!(rows[1].open, dec!(50100));

        // Both land in the same hourly candle.
        let hours = svc.klines("BTC/USDT", KlineInterval::H1, 10);
        assert_eq!(hours.len(), 1);
        assert_eq!(hours[0].volume, dec!(2));
    }

    #[test]
    fn interval_parsing_round_trips() {
        for interval in KlineInterval::all() {
            assert_eq!(KlineInterval::parse(interval.as_str()), Some(interval));
        }
        assert_eq!(KlineInterval::parse("3w"), None);
    }
}
