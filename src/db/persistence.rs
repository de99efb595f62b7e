//! Persistence Mirror Worker
//!
//! Subscribes to the bus firehose and mirrors orders, trades, journal
//! entries, wallet balances and book levels into PostgreSQL. Strictly
//! write-behind: a failed write is logged and counted, never retried into
//! the matching path.

use metrics::counter;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::{Event, EventBus};
use crate::db::Database;
use crate::engine::book::BookDelta;
use crate::models::{OrderResponse, TradeEvent, Transaction, WalletUpdate};

pub fn spawn_mirror(db: Database, bus: std::sync::Arc<EventBus>) {
    let mut rx = bus.subscribe_all();
    tokio::spawn(async move {
        info!("persistence mirror started");
        loop {
            match rx.recv().await {
                Ok((topic, event)) => {
                    if let Err(e) = apply(&db.pool, &topic, &event).await {
                        counter!("persistence_errors_total").increment(1);
                        error!(topic, error = %e, "mirror write failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "persistence mirror lagged, rows may be stale");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("event bus closed, stopping persistence mirror");
                    break;
                }
            }
        }
    });
}

async fn apply(pool: &PgPool, topic: &str, event: &Event) -> Result<(), sqlx::Error> {
    match event {
        Event::Order(order) => {
            if let Some(user_id) = user_from_topic(topic) {
                upsert_order(pool, user_id, order).await?;
            }
        }
        Event::Trade(trade) => insert_trade(pool, trade).await?,
        Event::Journal(tx) => insert_transaction(pool, tx).await?,
        Event::Wallet(wallet) => upsert_wallet(pool, wallet).await?,
        Event::BookDelta(delta) => apply_book_delta(pool, delta).await?,
        _ => {}
    }
    Ok(())
}

/// Order and wallet events travel on `user.<uuid>.*` topics.
fn user_from_topic(topic: &str) -> Option<Uuid> {
    topic.strip_prefix("user.")?.split('.').next()?.parse().ok()
}

async fn upsert_order(pool: &PgPool, user_id: Uuid, order: &OrderResponse) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO orders (id, user_id, symbol, order_type, side, status, price, quantity,
                            filled, average_fill_price, total_fee, time_in_force, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                to_timestamp($13::double precision / 1000),
                to_timestamp($14::double precision / 1000))
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            filled = EXCLUDED.filled,
            average_fill_price = EXCLUDED.average_fill_price,
            total_fee = EXCLUDED.total_fee,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(order.order_id)
    .bind(user_id)
    .bind(&order.symbol)
    .bind(order.order_type.to_string())
    .bind(order.side.to_string())
    .bind(order.status.to_string())
    .bind(order.price)
    .bind(order.quantity)
    .bind(order.filled)
    .bind(order.average_fill_price)
    .bind(order.total_fee)
    .bind(format!("{:?}", order.time_in_force))
    .bind(order.created_at as f64)
    .bind(order.updated_at as f64)
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_trade(pool: &PgPool, trade: &TradeEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO trades (trade_id, symbol, maker_order_id, taker_order_id, buyer_id, seller_id,
                            side, price, quantity, total_value, buyer_fee, seller_fee, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                to_timestamp($13::double precision / 1000))
        ON CONFLICT (trade_id) DO NOTHING
        "#,
    )
    .bind(&trade.trade_id)
    .bind(&trade.symbol)
    .bind(trade.maker_order_id)
    .bind(trade.taker_order_id)
    .bind(trade.buyer_id)
    .bind(trade.seller_id)
    .bind(&trade.side)
    .bind(trade.price)
    .bind(trade.quantity)
    .bind(trade.total_value)
    .bind(trade.buyer_fee)
    .bind(trade.seller_fee)
    .bind(trade.timestamp as f64)
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_transaction(pool: &PgPool, tx: &Transaction) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transactions (id, user_id, currency, kind, status, amount,
                                  balance_before, balance_after, reference, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(tx.id)
    .bind(tx.user_id)
    .bind(&tx.currency)
    .bind(tx.kind.to_string())
    .bind(format!("{:?}", tx.status).to_lowercase())
    .bind(tx.amount)
    .bind(tx.balance_before)
    .bind(tx.balance_after)
    .bind(&tx.reference)
    .bind(&tx.description)
    .bind(tx.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_wallet(pool: &PgPool, wallet: &WalletUpdate) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO wallets (user_id, currency, total, frozen, updated_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (user_id, currency) DO UPDATE SET
            total = EXCLUDED.total,
            frozen = EXCLUDED.frozen,
            updated_at = NOW()
        "#,
    )
    .bind(wallet.user_id)
    .bind(&wallet.currency)
    .bind(wallet.total)
    .bind(wallet.frozen)
    .execute(pool)
    .await?;
    Ok(())
}

/// The denormalized book cache mirrors engine deltas; a zero-quantity level
/// is deleted.
async fn apply_book_delta(pool: &PgPool, delta: &BookDelta) -> Result<(), sqlx::Error> {
    if delta.quantity.is_zero() {
        sqlx::query("DELETE FROM order_book WHERE symbol = $1 AND side = $2 AND price = $3")
            .bind(&delta.symbol)
            .bind(delta.side.to_string())
            .bind(delta.price)
            .execute(pool)
            .await?;
    } else {
        sqlx::query(
            r#"
            INSERT INTO order_book (symbol, side, price, quantity, order_count, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (symbol, side, price) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                order_count = EXCLUDED.order_count,
                updated_at = NOW()
            "#,
        )
        .bind(&delta.symbol)
        .bind(delta.side.to_string())
        .bind(delta.price)
        .bind(delta.quantity)
        .bind(delta.count as i32)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Mirror the seeded currencies and pairs once at startup.
pub async fn mirror_reference_data(
    db: &Database,
    registry: &crate::store::PairRegistry,
) -> Result<(), sqlx::Error> {
    for pair in registry.active_pairs() {
        for currency in [&pair.base_currency, &pair.quote_currency] {
            sqlx::query(
                r#"
                INSERT INTO currencies (symbol, name, decimals, is_crypto, is_active)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (symbol) DO NOTHING
                "#,
            )
            .bind(&currency.symbol)
            .bind(&currency.name)
            .bind(currency.precision as i32)
            .bind(currency.is_crypto)
            .bind(currency.is_active)
            .execute(&db.pool)
            .await?;
        }
        sqlx::query(
            r#"
            INSERT INTO trading_pairs (id, symbol, base_currency, quote_currency, market_type,
                                       status, min_order_size, max_order_size, price_precision,
                                       quantity_precision, maker_fee, taker_fee, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (symbol) DO NOTHING
            "#,
        )
        .bind(pair.id)
        .bind(&pair.symbol)
        .bind(&pair.base_currency.symbol)
        .bind(&pair.quote_currency.symbol)
        .bind(pair.market_type.to_string())
        .bind(format!("{:?}", pair.status).to_lowercase())
        .bind(pair.min_order_size)
        .bind(pair.max_order_size)
        .bind(pair.price_precision as i32)
        .bind(pair.quantity_precision as i32)
        .bind(pair.maker_fee)
        .bind(pair.taker_fee)
        .bind(pair.created_at)
        .execute(&db.pool)
        .await?;
    }
    Ok(())
}
