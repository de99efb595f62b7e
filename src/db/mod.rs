//! Database Mirror
//!
//! The trading core is authoritative in memory; PostgreSQL is a write-behind
//! mirror fed from the event bus firehose. Mirror failures are logged and
//! never block matching.

pub mod persistence;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}
