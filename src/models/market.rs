//! Market Reference Data
//!
//! Currencies, trading pairs and the live per-pair ticker snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CoreError;

/// A cryptocurrency or fiat currency. Immutable once created; referenced by
/// symbol in wallets and pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Currency {
    pub symbol: String,
    pub name: String,
    /// Decimal places to the right of the point.
    pub precision: u32,
    pub is_crypto: bool,
    pub is_active: bool,
}

impl Currency {
    pub fn new(symbol: &str, name: &str, precision: u32, is_crypto: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            precision,
            is_crypto,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    /// Matched by the engine.
    Spot,
    /// Recorded only; never matched.
    Futures,
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketType::Spot => write!(f, "spot"),
            MarketType::Futures => write!(f, "futures"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairStatus {
    Active,
    Inactive,
    Maintenance,
}

/// A trading pair (e.g. BTC/USDT).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPair {
    pub id: Uuid,
    pub symbol: String,
    pub base_currency: Currency,
    pub quote_currency: Currency,
    pub market_type: MarketType,
    pub status: PairStatus,
    /// Order size bounds in base units.
    pub min_order_size: Decimal,
    pub max_order_size: Decimal,
    pub price_precision: u32,
    pub quantity_precision: u32,
    /// Unit-fraction fee rates (0.001 = 10 bps).
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub created_at: DateTime<Utc>,
}

impl TradingPair {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base: Currency,
        quote: Currency,
        market_type: MarketType,
        min_order_size: Decimal,
        max_order_size: Decimal,
        price_precision: u32,
        quantity_precision: u32,
        maker_fee: Decimal,
        taker_fee: Decimal,
    ) -> Result<Self, CoreError> {
        if base.symbol == quote.symbol {
            return Err(CoreError::Validation(format!(
                "base and quote currency must differ: {}",
                base.symbol
            )));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            symbol: format!("{}/{}", base.symbol, quote.symbol),
            base_currency: base,
            quote_currency: quote,
            market_type,
            status: PairStatus::Active,
            min_order_size,
            max_order_size,
            price_precision,
            quantity_precision,
            maker_fee,
            taker_fee,
            created_at: Utc::now(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == PairStatus::Active
    }

    /// Quantize a price to the pair's price precision, half-away-from-zero.
    pub fn quantize_price(&self, price: Decimal) -> Decimal {
        price.round_dp_with_strategy(self.price_precision, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Quantize a quantity to the pair's quantity precision.
    pub fn quantize_quantity(&self, qty: Decimal) -> Decimal {
        qty.round_dp_with_strategy(
            self.quantity_precision,
            RoundingStrategy::MidpointAwayFromZero,
        )
    }

    /// Quantize an amount of quote currency (trade values, fees).
    pub fn quantize_quote(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(
            self.quote_currency.precision,
            RoundingStrategy::MidpointAwayFromZero,
        )
    }
}

/// Live market-data snapshot for a pair, maintained from trade and simulator
/// events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketData {
    pub symbol: String,
    pub price: Decimal,
    pub change_24h: Decimal,
    pub change_percent_24h: Decimal,
    pub volume_24h: Decimal,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    pub bid_price: Option<Decimal>,
    pub ask_price: Option<Decimal>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> Currency {
        Currency::new("BTC", "Bitcoin", 8, true)
    }

    fn usdt() -> Currency {
        Currency::new("USDT", "Tether USD", 8, true)
    }

    fn pair() -> TradingPair {
        TradingPair::new(
            btc(),
            usdt(),
            MarketType::Spot,
            dec!(0.0001),
            dec!(1000),
            2,
            6,
            dec!(0.001),
            dec!(0.001),
        )
        .unwrap()
    }

    #[test]
    fn rejects_identical_base_and_quote() {
        let result = TradingPair::new(
            btc(),
            btc(),
            MarketType::Spot,
            dec!(0.0001),
            dec!(1000),
            2,
            6,
            dec!(0.001),
            dec!(0.001),
        );
        assert!(result.is_err());
    }

    #[test]
    fn quantizes_half_away_from_zero() {
        let p = pair();
        assert_eq!(p.quantize_price(dec!(50000.005)), dec!(50000.01));
        assert_eq!(p.quantize_price(dec!(50000.004)), dec!(50000.00));
        assert_eq!(p.quantize_quantity(dec!(0.1234565)), dec!(0.123457));
    }

    #[test]
    fn composite_symbol() {
        assert_eq!(pair().symbol, "BTC/USDT");
    }
}
