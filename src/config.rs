//! Application Configuration
//!
//! Typed configuration loaded from the environment (prefix `SPOTCORE_`)
//! over built-in defaults. `.env` files are honored via dotenvy in `main`.

use config::{Config, Environment};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub port: u16,
    /// Optional PostgreSQL mirror; the core runs in memory either way.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    /// Quote-currency credit on a user's first deposit call.
    pub starting_balance: Decimal,
    /// Market-buy reservation multiplier over the best ask.
    pub slippage_cap: Decimal,
    /// Outstanding-message limit per bus subscriber.
    pub subscriber_queue_limit: usize,
    /// Depth of each pair writer's command queue.
    pub writer_queue_depth: usize,
    /// Default submission deadline against the writer queue.
    pub submit_deadline_ms: u64,
    pub simulator_price_interval_seconds: u64,
    pub simulator_book_interval_seconds: u64,
    pub simulator_depth: usize,
    /// Simulator stands down for pairs with real flow within this window.
    pub simulator_quiet_seconds: u64,
    /// Periodic full book snapshot cadence.
    pub book_snapshot_interval_seconds: u64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let cfg = Config::builder()
            .set_default("environment", "development")?
            .set_default("port", 8080)?
            .set_default("jwt_secret", "dev-secret-change-me")?
            .set_default("starting_balance", "10000")?
            .set_default("slippage_cap", "0.05")?
            .set_default("subscriber_queue_limit", 256)?
            .set_default("writer_queue_depth", 256)?
            .set_default("submit_deadline_ms", 2000)?
            .set_default("simulator_price_interval_seconds", 5)?
            .set_default("simulator_book_interval_seconds", 2)?
            .set_default("simulator_depth", 15)?
            .set_default("simulator_quiet_seconds", 60)?
            .set_default("book_snapshot_interval_seconds", 10)?
            .add_source(Environment::with_prefix("SPOTCORE"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_match_the_recognized_options() {
        let cfg = AppConfig::load().unwrap();
        assert_eq!(cfg.starting_balance, dec!(10000));
        assert_eq!(cfg.slippage_cap, dec!(0.05));
        assert_eq!(cfg.subscriber_queue_limit, 256);
        assert_eq!(cfg.simulator_price_interval_seconds, 5);
        assert_eq!(cfg.simulator_book_interval_seconds, 2);
        assert_eq!(cfg.simulator_depth, 15);
    }
}
